//! Daily log file under the state directory
//!
//! `--log-file` sends log output to `<state_dir>/logs/ignition_<date>.log`
//! with timestamps. A file that has reached [`MAX_BYTES`] is rotated when it
//! is opened, keeping [`BACKUPS`] numbered copies.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

pub const MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const BACKUPS: usize = 5;

/// Today's log file in `dir`
pub fn today(dir: &Path) -> PathBuf {
    dir.join(format!("ignition_{}.log", Local::now().format("%Y-%m-%d")))
}

/// Open `path` for appending, rotating it first when it is too large
pub fn open(path: &Path) -> Result<File> {
    open_with_limit(path, MAX_BYTES, BACKUPS)
}

fn open_with_limit(path: &Path, max_bytes: u64, backups: usize) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    if fs::metadata(path).is_ok_and(|meta| meta.len() >= max_bytes) {
        rotate(path, backups)
            .with_context(|| format!("Failed to rotate {}", path.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

/// `file.log` becomes `file.log.1`, `.1` becomes `.2`, and the oldest is dropped
fn rotate(path: &Path, backups: usize) -> std::io::Result<()> {
    let backup = |n: usize| PathBuf::from(format!("{}.{n}", path.display()));

    let oldest = backup(backups);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..backups).rev() {
        let from = backup(n);
        if from.exists() {
            fs::rename(&from, backup(n + 1))?;
        }
    }
    fs::rename(path, backup(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_directory_and_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("ignition.log");

        writeln!(open(&path).unwrap(), "first").unwrap();
        writeln!(open(&path).unwrap(), "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_large_file_is_rotated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ignition.log");
        let backup = |n: usize| PathBuf::from(format!("{}.{n}", path.display()));

        for round in 0..4 {
            fs::write(&path, format!("round {round}\n")).unwrap();
            open_with_limit(&path, 4, 2).unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        assert_eq!(fs::read_to_string(backup(1)).unwrap(), "round 3\n");
        assert_eq!(fs::read_to_string(backup(2)).unwrap(), "round 2\n");
        assert!(!backup(3).exists());
    }

    #[test]
    fn test_today_is_dated() {
        let name = today(Path::new("/logs"));
        let name = name.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("ignition_20"));
        assert!(name.ends_with(".log"));
    }
}
