//! File helpers shared by the sync pair and the watch loop.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Compute SHA-256 hash of content, returning "sha256:<hex-digest>" format.
pub fn sha256_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("sha256:{:x}", digest)
}

/// Read a file as UTF-8, mapping failures to `Error::Io` with the path.
pub fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Like [`read_text`], but a missing file reads as `None`.
pub fn read_text_if_exists(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Replace the contents of `path` without ever exposing a partial file.
///
/// The content goes to a temporary file next to the target, is flushed to
/// disk, and is renamed over the target. If anything fails the target keeps
/// its previous content and the temporary file is removed.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp = temp_path_for(path);

    let written = File::create(&temp)
        .and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&temp, path));

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp);
        return Err(Error::io(path, e));
    }

    debug!(path = %path.display(), bytes = content.len(), "Wrote file");
    Ok(())
}

/// Directory containing `path`; `.` for a bare file name.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Canonical form of a path whose file may not exist (yet): the parent is
/// canonicalized, the file name is kept.
pub fn canonical_target(path: &Path) -> PathBuf {
    let parent = parent_dir(path);
    let parent = parent.canonicalize().unwrap_or(parent);
    match path.file_name() {
        Some(name) => parent.join(name),
        None => parent,
    }
}

/// Hidden sibling of `path` used as the rename source.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.bibsync.tmp", name))
}
