//! Advisory single-instance lock on the configured PID file.
//!
//! Grounded on the `fs2` file-locking dependency already carried in
//! `Cargo.toml`: an exclusive, non-blocking `flock` held for the life of the
//! process, refusing a second instance rather than letting two processes
//! race for the same guilds' voice connections.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

#[derive(Debug, thiserror::Error)]
pub enum PidLockError {
    #[error("another instance is already running (lock held on {0})")]
    AlreadyRunning(String),
    #[error("failed to open pid file: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds the exclusive lock on the pid file for as long as it is alive;
/// dropping it releases the lock and leaves the file behind.
pub struct PidLock {
    file: File,
}

impl PidLock {
    /// Acquires the lock at `path`, writing the current process id into the
    /// file on success.
    pub fn acquire(path: &Path) -> Result<Self, PidLockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).write(true).truncate(false).open(path)?;

        file.try_lock_exclusive().map_err(|_| PidLockError::AlreadyRunning(path.display().to_string()))?;

        file.set_len(0)?;
        use std::io::Write;
        (&file).write_all(std::process::id().to_string().as_bytes())?;

        Ok(Self { file })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_the_same_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.pid");

        let first = PidLock::acquire(&path).unwrap();
        let second = PidLock::acquire(&path);
        assert!(matches!(second, Err(PidLockError::AlreadyRunning(_))));

        drop(first);
        assert!(PidLock::acquire(&path).is_ok());
    }
}
