use crate::constants::LOCK_FILE_NAME;
use crate::error::{ShrinkError, ShrinkResult};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on a working directory, held for a whole run.
///
/// The lock is released when the value is dropped or the process exits.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    // Keeps the descriptor, and with it the lock, alive
    _file: File,
}

impl RunLock {
    /// Take the lock without waiting; contention is [`ShrinkError::Locked`]
    pub fn acquire(workdir: &Path) -> ShrinkResult<Self> {
        let path = workdir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(ShrinkError::Locked(workdir.to_path_buf()));
            }
            return Err(ShrinkError::Io(err));
        }
        debug!("Acquired run lock {}", path.display());

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
