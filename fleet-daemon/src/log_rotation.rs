//! Size-based log rotation for daemon log files.
//!
//! Rotates `daemon.log` and `daemon-err.log` when they exceed 10 MiB.
//! Keeps at most 5 rotated copies using the scheme:
//!   daemon.log → daemon.log.1 → daemon.log.2 → … → daemon.log.5
//!
//! The live file is copied then truncated in place: systemd holds it open in
//! append mode, so renaming it would leave the daemon writing to the copy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated backup files to keep.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` if its size reaches `max_bytes`.
///
/// Returns `true` if rotation occurred, `false` if the file was under the
/// threshold or does not exist yet.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        let dst = numbered_path(log_path, n + 1);
        if src.exists() {
            fs::rename(&src, &dst)?;
        }
    }

    fs::copy(log_path, numbered_path(log_path, 1))?;
    fs::OpenOptions::new().write(true).open(log_path)?.set_len(0)?;

    Ok(true)
}

/// Rotate both daemon logs under `home`. Failures are logged, never raised.
pub fn rotate_logs(home: &Path) {
    let stdout_log = crate::paths::stdout_log_path(home);
    let stderr_log = crate::paths::stderr_log_path(home);

    for log_path in [&stdout_log, &stderr_log] {
        match rotate_if_needed(log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

/// `daemon.log` → `daemon.log.<n>`.
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("daemon.log");
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const SMALL_LIMIT: u64 = 1024;

    fn write_log(path: &Path, byte: u8, len: usize) {
        fs::write(path, vec![byte; len]).unwrap();
    }

    #[test]
    fn small_file_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        write_log(&log, b'a', 10);

        assert!(!rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn oversized_file_is_copied_then_truncated() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        write_log(&log, b'a', SMALL_LIMIT as usize + 1);

        assert!(rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(
            fs::metadata(numbered_path(&log, 1)).unwrap().len(),
            SMALL_LIMIT + 1
        );
    }

    #[test]
    fn open_append_handle_keeps_writing_to_live_file() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        write_log(&log, b'a', SMALL_LIMIT as usize + 1);

        let mut handle = fs::OpenOptions::new().append(true).open(&log).unwrap();
        rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap();
        handle.write_all(b"after rotation\n").unwrap();

        assert_eq!(fs::read_to_string(&log).unwrap(), "after rotation\n");
    }

    #[test]
    fn rotated_copies_are_capped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        for n in 1..=MAX_ROTATED_FILES {
            fs::write(numbered_path(&log, n), format!("rotated-{n}")).unwrap();
        }
        write_log(&log, b'z', SMALL_LIMIT as usize);

        assert!(rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
        assert_eq!(
            fs::read_to_string(numbered_path(&log, MAX_ROTATED_FILES)).unwrap(),
            format!("rotated-{}", MAX_ROTATED_FILES - 1)
        );
        assert!(!numbered_path(&log, MAX_ROTATED_FILES + 1).exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("nonexistent.log");
        assert!(!rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
    }

    #[test]
    fn sequential_rotations_shift_history() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");

        for round in 1..=3u8 {
            write_log(&log, b'0' + round, SMALL_LIMIT as usize);
            rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap();
        }

        assert_eq!(fs::read(numbered_path(&log, 1)).unwrap()[0], b'3');
        assert_eq!(fs::read(numbered_path(&log, 3)).unwrap()[0], b'1');
        assert!(!numbered_path(&log, 4).exists());
    }
}
