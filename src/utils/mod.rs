//! File system and terminal utilities.
//!
//! - [`fs`] - atomic writes, JSON documents, output-root safety checks, hashing
//! - [`progress`] - progress bar for the per-file build phase

pub mod fs;
pub mod progress;

pub use fs::{
    atomic_write, atomic_write_multiple, ensure_dir, is_safe_path, json_bytes, read_json_file, sha256_hex,
    write_json_file,
};
pub use progress::ProgressBar;
