//! Durable file writes for reported results.
//!
//! A reader of the output directory must never observe a half-written
//! metrics file, so every write goes to a `.tmp` sibling that is synced to
//! disk and then renamed over the target.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Atomically write a value as pretty-printed JSON.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let mut json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    json.push('\n');
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes. Creates parent directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

/// Append bytes to a file and sync them before returning.
pub fn append_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(data)?;
    file.flush()?;
    file.sync_all()
}

/// Create `dir` (idempotently) and prove it accepts new files.
pub fn ensure_writable_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(".trialkit-write-probe");
    File::create(&probe)?;
    fs::remove_file(&probe)
}
