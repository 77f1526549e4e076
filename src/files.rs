//! Filesystem checks used to validate TLS material before binding.
//!
//! A path that cannot be stat'ed (missing, permission denied) answers `false`
//! rather than erroring.

use std::fs;
use std::path::Path;

/// Returns true if anything exists at `path`.
pub fn path_exists(path: impl AsRef<Path>) -> bool {
    fs::metadata(path).is_ok()
}

/// Returns true if `path` is an existing directory.
pub fn is_dir(path: impl AsRef<Path>) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Returns true if `path` is an existing regular file.
pub fn is_file(path: impl AsRef<Path>) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
