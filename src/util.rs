//! Small shared helpers for metadata provenance and atomic file writes.

use std::path::Path;

use crate::error::Result;

/// Writes `bytes` to `path` through a sibling temp file and a rename, so a
/// reader never observes a partially written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    });
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Unix timestamp in seconds, as a string for metadata files
#[must_use]
pub(crate) fn now_secs() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
        .to_string()
}

#[must_use]
pub(crate) fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[must_use]
pub(crate) fn username() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}
