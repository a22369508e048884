//! Exclusive ownership of an index directory.
//!
//! `pagerag.lock` sits next to the snapshot. The daemon holds it while it
//! serves, a CLI command holds it for one call, and whoever comes second gets
//! `WouldBlock` instead of waiting.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = "pagerag.lock";

/// Guard for the directory lock. Released when dropped.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn try_acquire(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match flock(&file, Mode::ExclusiveNonBlocking) {
            Ok(()) => {
                log::debug!("holding {}", path.display());
                Ok(Self { file, path })
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!(
                    "{} is held by another pagerag process (daemon or CLI)",
                    path.display()
                ),
            )),
            Err(err) => Err(err),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = flock(&self.file, Mode::Unlock) {
            log::warn!("failed to release {}: {err}", self.path.display());
        }
    }
}

enum Mode {
    ExclusiveNonBlocking,
    Unlock,
}

#[cfg(unix)]
fn flock(file: &File, mode: Mode) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let operation = match mode {
        Mode::ExclusiveNonBlocking => libc::LOCK_EX | libc::LOCK_NB,
        Mode::Unlock => libc::LOCK_UN,
    };

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    if unsafe { libc::flock(file.as_raw_fd(), operation) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _mode: Mode) -> io::Result<()> {
    Ok(())
}
