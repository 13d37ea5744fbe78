//! Atomic file writes and JSON load/save for run artifacts.
//!
//! Checkpoints, reports, snapshots and tracker records are staged in a
//! `<file name>.partial` sibling and renamed into place, so a reader never
//! sees a half written artifact. Errors carry the artifact path.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Attach the artifact path to an I/O error.
fn at_path(path: &Path, err: io::Error) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {err}", path.display()))
}

/// Staging path next to `path`: `metrics.json` stages as `metrics.json.partial`.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| at_path(parent, e))
        }
        _ => Ok(()),
    }
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(data)
        .map_err(|e| at_path(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
    atomic_write(path, &json)
}

/// Write `data` to `path` through a staging file, creating parent
/// directories as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    ensure_parent(path)?;
    let staging = staging_path(path);
    std::fs::write(&staging, data).map_err(|e| at_path(&staging, e))?;
    std::fs::rename(&staging, path).map_err(|e| at_path(path, e))
}

/// Append one compact JSON record as a line of a JSON-lines file.
pub fn append_json_line<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    ensure_parent(path)?;
    let mut line = serde_json::to_vec(data)
        .map_err(|e| at_path(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
    line.push(b'\n');
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(&line))
        .map_err(|e| at_path(path, e))
}

/// Read a JSON artifact. `Ok(None)` when the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(at_path(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| at_path(path, io::Error::new(io::ErrorKind::InvalidData, e)))
}
