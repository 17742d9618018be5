use std::{
    fs::File,
    io,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
    process,
};

use log::{debug, error};
use nix::sched::{setns, CloneFlags};

use super::DataplaneError;

const THREAD_NETNS_PATH: &str = "/proc/thread-self/ns/net";

/// An open handle to a network namespace.
#[derive(Debug)]
pub struct NetNs {
    path: PathBuf,
    file: File,
}

impl NetNs {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            path: path.to_owned(),
            file: File::open(path)?,
        })
    }

    /// The namespace the calling thread currently lives in.
    pub fn current() -> io::Result<Self> {
        Self::open(Path::new(THREAD_NETNS_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the calling thread into this namespace until the guard is dropped.
    pub fn enter(&self) -> Result<NetNsGuard, DataplaneError> {
        let origin = Self::current()
            .map_err(|err| DataplaneError::NamespaceError(THREAD_NETNS_PATH.into(), err))?;

        setns(self.file.as_raw_fd(), CloneFlags::CLONE_NEWNET)
            .map_err(|err| DataplaneError::SetNsError(self.path.clone(), err))?;

        debug!("Entered network namespace {:?}", self.path);

        Ok(NetNsGuard { origin })
    }

    /// Runs `op` inside this namespace. The caller's namespace is restored on
    /// every exit path.
    pub fn run<T>(
        &self,
        op: impl FnOnce() -> Result<T, DataplaneError>,
    ) -> Result<T, DataplaneError> {
        let _guard = self.enter()?;

        op()
    }
}

/// Switches the thread back to the namespace it came from.
#[derive(Debug)]
pub struct NetNsGuard {
    origin: NetNs,
}

impl Drop for NetNsGuard {
    fn drop(&mut self) {
        if let Err(err) = setns(self.origin.file.as_raw_fd(), CloneFlags::CLONE_NEWNET) {
            // every following kernel call would run in the wrong namespace
            error!(
                "Couldn't switch back to network namespace {:?}! {err}",
                self.origin.path
            );
            process::abort();
        }

        debug!("Returned to network namespace {:?}", self.origin.path);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{NetNs, THREAD_NETNS_PATH};

    #[test]
    fn current_namespace_is_the_calling_thread() {
        let netns = NetNs::current().unwrap();

        assert_eq!(netns.path(), Path::new(THREAD_NETNS_PATH));
    }
}
