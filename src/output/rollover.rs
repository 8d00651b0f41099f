//! Size-based rollover for append-only files.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Appends `content` to `path`, first rolling the file over if the append would take it
/// past `max_size` bytes.
///
/// Rolling shifts `path.N` to `path.N+1` (the oldest beyond `max_backups` is discarded) and
/// moves `path` to `path.1`. With `max_backups == 0` the current file is simply removed.
///
/// # Errors
///
/// Errors if a backup cannot be moved or the append fails.
pub fn append_with_rollover(
    path: &Path,
    content: &[u8],
    max_size: u64,
    max_backups: u32,
) -> io::Result<()> {
    let current = match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Some(metadata.len()),
        Ok(_) => None,
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(err),
    };

    if let Some(current) = current {
        if current.saturating_add(content.len() as u64) > max_size {
            roll(path, max_backups)?;
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(content)?;
    file.flush()
}

fn roll(path: &Path, max_backups: u32) -> io::Result<()> {
    debug!(path = %path.display(), max_backups, "Rolling file");

    if max_backups == 0 {
        return fs::remove_file(path);
    }

    for index in (1..max_backups).rev() {
        let from = backup_path(path, index);
        if !from.exists() {
            continue;
        }

        move_file(&from, &backup_path(path, index.saturating_add(1)))?;
    }

    move_file(path, &backup_path(path, 1))
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::remove_file(to) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }

    fs::rename(from, to)
}

/// `path.N`
#[must_use]
pub fn backup_path(path: &Path, index: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));

    PathBuf::from(name)
}
