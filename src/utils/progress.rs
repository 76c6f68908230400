//! Progress indicators for the per-file build phase.
//!
//! Progress display is decided once per invocation and passed in explicitly;
//! when disabled (or when stderr is not a terminal) a hidden bar is used so
//! callers never need to branch.

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle};
use std::io::IsTerminal;

/// Progress bar used while source files are processed.
///
/// Cloning is cheap: clones share the same underlying bar, so it can be moved
/// into concurrent tasks.
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// Creates a bar tracking `len` units of work.
    ///
    /// Returns a hidden bar when `enabled` is false or stderr is not a TTY.
    #[must_use]
    pub fn new(len: u64, enabled: bool) -> Self {
        let inner = if enabled && std::io::stderr().is_terminal() {
            let bar = IndicatifBar::new(len);
            bar.set_style(default_style());
            bar
        } else {
            IndicatifBar::hidden()
        };
        Self { inner }
    }

    /// Sets the message displayed next to the bar.
    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    /// Advances the bar by `delta` units.
    pub fn inc(&self, delta: u64) {
        self.inner.inc(delta);
    }

    /// Current position, useful in tests with hidden bars.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// Removes the bar from the terminal.
    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}

fn default_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}
