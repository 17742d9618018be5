use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};
use thiserror::Error;

use self::lock::{FileLock, FileLockGuard};

pub mod lock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Io error on '{}': {}", .0.display(), .1)]
    IoError(PathBuf, std::io::Error),
    #[error("Couldn't lock '{}'! {}", .0.display(), .1)]
    LockError(PathBuf, nix::Error),
    #[error("Lease file '{}' is malformed! {}", .0.display(), .1)]
    MalformedData(PathBuf, serde_json::Error),
    #[error("Serialization error: {}", .0)]
    SerializationError(serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    #[serde(rename = "containerID")]
    pub container_id: String,
    #[serde(rename = "ifName")]
    pub if_name: String,
}

/// In-memory image of a lease file.
#[serde_as]
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseSnapshot {
    pub records: BTreeMap<Ipv4Addr, LeaseRecord>,
    #[serde_as(as = "NoneAsEmptyString")]
    pub last: Option<Ipv4Addr>,
}

/// Durable lease table of a single network, kept in
/// `<data dir>/<network>/<network>.json` and guarded by `<data dir>/<network>/lock`.
#[derive(Debug)]
pub struct LeaseStore {
    data_file: PathBuf,
    lock: FileLock,
}

impl LeaseStore {
    pub fn open(data_dir: &Path, network: &str) -> Result<Self, StoreError> {
        let dir = data_dir.join(network);

        fs::create_dir_all(&dir).map_err(|err| StoreError::IoError(dir.clone(), err))?;

        let lock = FileLock::open(&dir).map_err(|err| StoreError::IoError(dir.clone(), err))?;
        let data_file = dir.join(format!("{network}.json"));

        Ok(Self { data_file, lock })
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    /// Takes the network lock and loads a fresh snapshot. Everything done
    /// through the returned session happens under the lock.
    pub fn lock(&self) -> Result<LeaseSession<'_>, StoreError> {
        debug!("Waiting for lease lock {:?}...", self.lock.path());

        let guard = self
            .lock
            .acquire()
            .map_err(|err| StoreError::LockError(self.lock.path().to_owned(), err))?;
        let snapshot = self.load()?;

        Ok(LeaseSession {
            store: self,
            snapshot,
            _guard: guard,
        })
    }

    fn load(&self) -> Result<LeaseSnapshot, StoreError> {
        match fs::read(&self.data_file) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|err| StoreError::MalformedData(self.data_file.clone(), err)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No lease file at {:?}, starting empty", self.data_file);

                fs::write(&self.data_file, b"{}")
                    .map_err(|err| StoreError::IoError(self.data_file.clone(), err))?;

                Ok(LeaseSnapshot::default())
            }
            Err(err) => Err(StoreError::IoError(self.data_file.clone(), err)),
        }
    }

    // whole-file overwrite, a crash halfway through leaves a truncated file behind
    fn persist(&self, snapshot: &LeaseSnapshot) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(snapshot).map_err(StoreError::SerializationError)?;

        fs::write(&self.data_file, raw)
            .map_err(|err| StoreError::IoError(self.data_file.clone(), err))
    }
}

/// A locked read-modify-write session over the lease table.
#[derive(Debug)]
pub struct LeaseSession<'a> {
    store: &'a LeaseStore,
    snapshot: LeaseSnapshot,
    _guard: FileLockGuard<'a>,
}

impl LeaseSession<'_> {
    pub fn lookup_by_container(&self, container_id: &str) -> Option<Ipv4Addr> {
        self.snapshot
            .records
            .iter()
            .find(|(_, record)| record.container_id == container_id)
            .map(|(ip, _)| *ip)
    }

    pub fn contains(&self, ip: &Ipv4Addr) -> bool {
        self.snapshot.records.contains_key(ip)
    }

    pub fn last(&self) -> Option<Ipv4Addr> {
        self.snapshot.last
    }

    pub fn snapshot(&self) -> &LeaseSnapshot {
        &self.snapshot
    }

    pub fn put(&mut self, ip: Ipv4Addr, container_id: &str, if_name: &str) -> Result<(), StoreError> {
        self.snapshot.records.insert(
            ip,
            LeaseRecord {
                container_id: container_id.to_owned(),
                if_name: if_name.to_owned(),
            },
        );
        self.snapshot.last = Some(ip);

        self.store.persist(&self.snapshot)
    }

    /// Drops the lease held by `container_id`, if any, and returns the freed address.
    pub fn remove(&mut self, container_id: &str) -> Result<Option<Ipv4Addr>, StoreError> {
        let ip = match self.lookup_by_container(container_id) {
            Some(ip) => ip,
            None => return Ok(None),
        };

        self.snapshot.records.remove(&ip);
        self.store.persist(&self.snapshot)?;

        Ok(Some(ip))
    }
}
