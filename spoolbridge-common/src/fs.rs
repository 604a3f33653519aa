//! Atomic file writes
//!
//! State files are never written in place. Content goes to a sibling
//! `<name>.tmp` file which is then renamed over the target, so readers see
//! either the previous file or the new one.
//!
//! [`file_lock`] hands out one process-wide mutex per state file so that
//! read-modify-write cycles from independent handles do not interleave.

use crate::{Error, Result};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

static FILE_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn lock_key(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    // The key must not change when the folder is created later
    let _ = std::fs::create_dir_all(parent);
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) if dir.is_dir() => dir.join(name),
        _ => lexical_absolute(path),
    }
}

/// Absolute form of `path` with `.` and `..` folded, without touching the disk
fn lexical_absolute(path: &Path) -> PathBuf {
    let mut out = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Process-wide lock for the state file at `path`
///
/// Handles created for the same file (through any spelling of its path that
/// resolves to the same directory) share one mutex. The parent directory is
/// created if missing.
pub fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = FILE_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
    locks
        .entry(lock_key(path))
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write raw bytes to `target` via temp file + rename
///
/// # Errors
/// Any I/O failure is reported as [`Error::Persistence`] for `target`. The
/// temp file is removed on failure (best effort).
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::persistence(target, e))?;
        }
    }

    let temp = temp_path_for(target);
    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&temp, target)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp);
        return Err(Error::persistence(target, e));
    }
    Ok(())
}

/// Serialize `value` as pretty JSON (4-space indent) and write atomically
pub fn write_json_atomic<T: Serialize + ?Sized>(target: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    buf.push(b'\n');
    write_atomic(target, &buf)
}
