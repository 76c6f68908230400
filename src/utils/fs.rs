//! File system utilities for the builder.
//!
//! Every cache document and build artifact goes through the helpers here:
//!
//! - **Atomic writes**: content is written to a temporary file next to the
//!   target and renamed into place, so readers never observe partial files
//! - **Parallel writes**: [`atomic_write_multiple`] fans out over `spawn_blocking`
//! - **Output root safety**: [`is_safe_path`] keeps deletions inside the output root
//! - **Hashing**: [`sha256_hex`] for minified-cache identity and the builder hash
//!
//! # Examples
//!
//! ```rust,no_run
//! use wsbuild::utils::fs::{atomic_write, read_json_file};
//! use std::collections::BTreeMap;
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! atomic_write(Path::new("cache/bundles.json"), b"{}")?;
//! let bundles: BTreeMap<String, Vec<String>> = read_json_file(Path::new("cache/bundles.json"))?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Ensures a directory exists, creating it and all parent directories if necessary.
///
/// # Errors
///
/// Fails if the path exists and is not a directory, or cannot be created.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Atomically writes bytes to a file using a write-then-rename strategy.
///
/// The temporary file is created in the target's directory so the final
/// rename never crosses a filesystem boundary. Parent directories are
/// created as needed.
///
/// # Errors
///
/// Fails if any step of the write, sync or rename fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in: {}", parent.display()))?;
    temp.write_all(content)
        .with_context(|| format!("Failed to write temp file for: {}", path.display()))?;
    temp.as_file().sync_all().with_context(|| "Failed to sync file to disk")?;
    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

/// Writes multiple files concurrently, each one atomically.
///
/// All writes are attempted; failures are collected into one error.
///
/// # Errors
///
/// Returns an error listing every file that failed to be written.
pub async fn atomic_write_multiple(files: Vec<(PathBuf, Vec<u8>)>) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }

    let tasks = files.into_iter().map(|(path, content)| {
        tokio::task::spawn_blocking(move || {
            atomic_write(&path, &content).with_context(|| path.display().to_string())
        })
    });

    let results = try_join_all(tasks).await.context("Failed to join atomic write tasks")?;

    let error_msgs: Vec<String> =
        results.into_iter().filter_map(Result::err).map(|error| format!("  {error:#}")).collect();

    if !error_msgs.is_empty() {
        return Err(anyhow::anyhow!(
            "Failed to write {} files:\n{}",
            error_msgs.len(),
            error_msgs.join("\n")
        ));
    }

    Ok(())
}

/// Reads a UTF-8 text file.
///
/// # Errors
/// Returns an error with context if the file cannot be read.
pub fn read_text_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Reads and parses a JSON file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn read_json_file<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let content = read_text_file(path)?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse JSON from file: {}", path.display()))
}

/// Serializes data as pretty-printed JSON with a trailing newline.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn json_bytes<T>(data: &T) -> Result<Vec<u8>>
where
    T: serde::Serialize + ?Sized,
{
    let mut json = serde_json::to_string_pretty(data)?;
    json.push('\n');
    Ok(json.into_bytes())
}

/// Writes data as pretty-printed JSON, atomically.
///
/// Callers pass `BTreeMap`/`BTreeSet` based data so the bytes are stable.
///
/// # Errors
/// Returns an error if serialization fails or the file cannot be written.
pub fn write_json_file<T>(path: &Path, data: &T) -> Result<()>
where
    T: serde::Serialize + ?Sized,
{
    atomic_write(path, &json_bytes(data)?)
        .with_context(|| format!("Failed to write JSON file: {}", path.display()))
}

/// Lexically normalizes a path, resolving `.` and `..` without touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                components.pop();
            }
            c => components.push(c),
        }
    }

    components.iter().collect()
}

/// Checks that a path stays inside the base directory once normalized.
///
/// Relative paths are resolved against `base`.
#[must_use]
pub fn is_safe_path(base: &Path, path: &Path) -> bool {
    let normalized_base = normalize_path(base);
    let normalized_path = if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    };

    normalized_path.starts_with(&normalized_base) && normalized_path != normalized_base
}

/// Modification time of a file in milliseconds since the Unix epoch.
///
/// # Errors
/// Fails if the metadata cannot be read.
pub fn modified_millis(path: &Path) -> Result<i64> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to read modification time: {}", path.display()))?;
    let millis = match modified.duration_since(UNIX_EPOCH) {
        Ok(duration) => i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
        Err(before_epoch) => -i64::try_from(before_epoch.duration().as_millis()).unwrap_or(i64::MAX),
    };
    Ok(millis)
}

/// SHA-256 of the given bytes as lowercase hex.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Removes a file, treating "already gone" as success.
///
/// Empty parent directories up to (but excluding) `stop_at` are removed too.
///
/// # Errors
/// Fails if the file exists and cannot be removed.
pub fn remove_file_and_empty_parents(path: &Path, stop_at: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }

    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        // Fails on non-empty directories, which ends the walk.
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
    Ok(())
}
