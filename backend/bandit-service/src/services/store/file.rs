use super::{conflict, decode, encode, ArmStore, StoreResult};
use crate::error::StoreError;
use crate::models::{InstanceKey, InstanceState};
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(3);

/// One JSON file per instance under a root directory.
///
/// Files are named after the percent-encoded storage key, and each file body
/// is exactly the shared record format, so a directory written here can be
/// bootstrapped into any other backend. Compare-and-swap is serialized per
/// key inside this process; the directory must not be shared by several
/// writer processes.
///
/// `io_timeout` bounds reads and the wait for the key lock. Once a write has
/// started it runs to completion under the lock, so a returned error always
/// means nothing was written.
pub struct FileArmStore {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    io_timeout: Duration,
}

impl FileArmStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!(root = %root.display(), "File arm store ready");
        Self {
            root,
            locks: DashMap::new(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &InstanceKey) -> PathBuf {
        self.root.join(file_name_for(key))
    }

    fn lock_for(&self, key: &InstanceKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.storage_key()).or_default().clone()
    }

    async fn acquire(&self, key: &InstanceKey) -> StoreResult<OwnedMutexGuard<()>> {
        tokio::time::timeout(self.io_timeout, self.lock_for(key).lock_owned())
            .await
            .map_err(|_| StoreError::Unavailable(format!("timed out waiting for {key}")))
    }

    async fn read(&self, key: &InstanceKey) -> StoreResult<InstanceState> {
        let path = self.path_for(key);
        match tokio::time::timeout(self.io_timeout, tokio::fs::read_to_string(&path)).await {
            Ok(Ok(raw)) => decode(&raw),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.storage_key()))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(StoreError::Unavailable("file store read timed out".into())),
        }
    }
}

/// `{percent-encoded storage key}.json`
pub fn file_name_for(key: &InstanceKey) -> String {
    format!("{}.json", urlencoding::encode(&key.storage_key()))
}

/// Inverse of [`file_name_for`]; `None` for files that are not instance records.
pub fn key_from_file_name(name: &str) -> Option<InstanceKey> {
    let stem = name.strip_suffix(".json")?;
    let storage_key = urlencoding::decode(stem).ok()?;
    InstanceKey::parse(&storage_key).ok()
}

fn read_blocking(path: &Path, key: &InstanceKey) -> StoreResult<InstanceState> {
    match std::fs::read_to_string(path) {
        Ok(raw) => decode(&raw),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.storage_key())),
        Err(e) => Err(e.into()),
    }
}

/// Write to a uniquely named temporary sibling, fsync it, rename it over
/// `path`, then fsync the directory.
fn write_atomic(root: &Path, path: &Path, payload: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(root)?;
    let mut tmp = NamedTempFile::new_in(root)?;
    tmp.write_all(payload)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    fsync_dir(root)
}

#[cfg(target_family = "unix")]
fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(target_family = "unix"))]
fn fsync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Run blocking file work that owns the key guard until it finishes.
async fn run_locked<T, F>(guard: OwnedMutexGuard<()>, work: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _guard = guard;
        work()
    })
    .await
    .map_err(|e| StoreError::Unavailable(format!("file store task failed: {e}")))?
}

#[async_trait]
impl ArmStore for FileArmStore {
    async fn get(&self, key: &InstanceKey) -> StoreResult<InstanceState> {
        self.read(key).await
    }

    async fn put(&self, key: &InstanceKey, state: &InstanceState) -> StoreResult<()> {
        let payload = encode(state)?;
        let (root, path) = (self.root.clone(), self.path_for(key));

        let guard = self.acquire(key).await?;
        run_locked(guard, move || {
            write_atomic(&root, &path, payload.as_bytes()).map_err(StoreError::from)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &InstanceKey,
        expected_version: u64,
        new_state: &InstanceState,
    ) -> StoreResult<InstanceState> {
        let next = new_state.clone().with_version(expected_version + 1);
        let payload = encode(&next)?;
        let (root, path, owned_key) = (self.root.clone(), self.path_for(key), key.clone());

        let guard = self.acquire(key).await?;
        let swapped = run_locked(guard, move || {
            let current = read_blocking(&path, &owned_key)?;
            if current.version() != expected_version {
                return Err(conflict(&owned_key, expected_version, current.version()));
            }
            write_atomic(&root, &path, payload.as_bytes())?;
            Ok(())
        })
        .await;

        match swapped {
            Ok(()) => Ok(next),
            Err(StoreError::VersionConflict { actual, .. }) => {
                debug!(key = %key, expected_version, actual, "CAS rejected");
                Err(conflict(key, expected_version, actual))
            }
            Err(e) => Err(e),
        }
    }
}
