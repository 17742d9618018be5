use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};

use log::warn;
use nix::{
    errno::Errno,
    fcntl::{flock, FlockArg},
};

const LOCK_FILE_NAME: &str = "lock";

/// Advisory, cross-process lock backed by `flock(2)`.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
}

impl FileLock {
    /// Opens (creating if needed) the lock file. A directory path locks
    /// `<dir>/lock` instead.
    pub fn open(path: &Path) -> io::Result<Self> {
        let path = if path.is_dir() {
            path.join(LOCK_FILE_NAME)
        } else {
            path.to_owned()
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until the lock is held. There is no timeout.
    pub fn acquire(&self) -> Result<FileLockGuard<'_>, Errno> {
        loop {
            match flock(self.file.as_raw_fd(), FlockArg::LockExclusive) {
                Ok(()) => return Ok(FileLockGuard { lock: self }),
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

/// Releases the lock when dropped.
#[derive(Debug)]
pub struct FileLockGuard<'a> {
    lock: &'a FileLock,
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = flock(self.lock.file.as_raw_fd(), FlockArg::Unlock) {
            warn!("Couldn't release lock {:?}! {err}", self.lock.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        thread,
        time::Duration,
    };

    use super::FileLock;

    #[test]
    fn directory_lock_uses_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::open(dir.path()).unwrap();

        assert_eq!(lock.path(), dir.path().join("lock"));
        assert!(dir.path().join("lock").exists());
    }

    #[test]
    fn lock_excludes_other_descriptors_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileLock::open(dir.path()).unwrap();
        let guard = first.acquire().unwrap();

        let path = dir.path().to_owned();
        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            let second = FileLock::open(&path).unwrap();
            let _guard = second.acquire().unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        drop(guard);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
