use async_trait::async_trait;
use leasehold_core::lease_store::conditions;
use leasehold_core::{Clock, Lease, LeaseStore, StoreResult, SystemClock};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::errors::FileStoreError;

const RECORD_EXTENSION: &str = "lease";
const LOCK_EXTENSION: &str = "lock";

// FileLeaseStore keeps one JSON record per partition in a single directory.
// Any number of processes may share the directory:
// root/
//     0.lease
//     0.lock            (exists only while a writer holds the record)
//     orders%2F1.lease  (partition "orders/1")

/// Tuning for record locking.
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Pause between attempts to take a held record lock.
    pub lock_retry_interval: Duration,
    /// Give up on a held record lock after this long.
    pub lock_wait: Duration,
    /// A lock file older than this is assumed to belong to a crashed writer.
    pub stale_lock_after: Duration,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            lock_retry_interval: Duration::from_millis(10),
            lock_wait: Duration::from_secs(5),
            stale_lock_after: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileLeaseStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    options: FileStoreOptions,
}

/// Exclusive hold on one record, released when dropped.
struct RecordLock {
    path: PathBuf,
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(lock = %self.path.display(), error = %e, "failed to release record lock");
            }
        }
    }
}

/// Percent-encodes a partition id into a file stem. `.` is escaped as well so an id
/// can never collide with another record's extension.
fn encode_partition_id(partition_id: &str) -> String {
    urlencoding::encode(partition_id).replace('.', "%2E")
}

async fn read_record(path: &Path) -> Result<Option<Lease>, FileStoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_record(path: &Path, lease: &Lease) -> Result<(), FileStoreError> {
    let bytes = serde_json::to_vec(lease)?;
    let tmp = path.with_extension("lease.tmp");
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .await?;
    f.write_all(&bytes).await?;
    f.flush().await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

impl FileLeaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(SystemClock))
    }

    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
            options: FileStoreOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FileStoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, partition_id: &str) -> PathBuf {
        self.root.join(format!(
            "{}.{}",
            encode_partition_id(partition_id),
            RECORD_EXTENSION
        ))
    }

    fn lock_path(&self, partition_id: &str) -> PathBuf {
        self.root.join(format!(
            "{}.{}",
            encode_partition_id(partition_id),
            LOCK_EXTENSION
        ))
    }

    async fn is_dir(&self) -> Result<bool, FileStoreError> {
        match fs::metadata(&self.root).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_dir(&self) -> Result<(), FileStoreError> {
        if self.is_dir().await? {
            Ok(())
        } else {
            Err(FileStoreError::MissingDirectory(self.root.clone()))
        }
    }

    /// Removes `path` if it is older than the stale threshold. Returns true when the
    /// caller should retry right away.
    async fn break_if_stale(&self, path: &Path) -> bool {
        let meta = match fs::metadata(path).await {
            Ok(meta) => meta,
            // released between our attempt and this check
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(_) => return false,
        };
        let age = meta
            .modified()
            .ok()
            .map(|modified| SystemTime::now().duration_since(modified).unwrap_or_default());
        match age {
            Some(age) if age >= self.options.stale_lock_after => {
                warn!(
                    lock = %path.display(),
                    age_ms = age.as_millis() as u64,
                    "breaking stale record lock"
                );
                fs::remove_file(path).await.is_ok()
            }
            _ => false,
        }
    }

    async fn lock_record(&self, partition_id: &str) -> Result<RecordLock, FileStoreError> {
        let path = self.lock_path(partition_id);
        let deadline = Instant::now() + self.options.lock_wait;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(RecordLock { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.break_if_stale(&path).await {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(FileStoreError::LockTimeout(path));
                    }
                    sleep(self.options.lock_retry_interval).await;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(FileStoreError::MissingDirectory(self.root.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Runs `rule` against the record while holding its lock. With `create_missing` a
    /// partition without a record is evaluated as its bootstrap record.
    async fn compare_and_set<F>(
        &self,
        lease: &mut Lease,
        create_missing: bool,
        rule: F,
    ) -> Result<bool, FileStoreError>
    where
        F: FnOnce(&Lease, u64) -> Option<Lease> + Send,
    {
        self.ensure_dir().await?;
        let path = self.record_path(lease.partition_id());
        let _lock = self.lock_record(lease.partition_id()).await?;

        let stored = match read_record(&path).await? {
            Some(stored) => stored,
            None if create_missing => Lease::new(lease.partition_id()),
            None => return Ok(false),
        };
        match rule(&stored, self.clock.now_ms()) {
            Some(next) => {
                write_record(&path, &next).await?;
                *lease = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_record(&self, partition_id: &str) -> Result<Lease, FileStoreError> {
        self.ensure_dir().await?;
        let path = self.record_path(partition_id);
        let _lock = self.lock_record(partition_id).await?;

        if let Some(existing) = read_record(&path).await? {
            return Ok(existing);
        }
        let lease = Lease::new(partition_id);
        write_record(&path, &lease).await?;
        Ok(lease)
    }

    async fn list_records(&self) -> Result<Vec<Lease>, FileStoreError> {
        self.ensure_dir().await?;
        let mut leases = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path).await {
                Ok(Some(lease)) => leases.push(lease),
                // deleted after listing
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        record = %path.display(),
                        error = %e,
                        "skipping unreadable lease record"
                    );
                }
            }
        }
        leases.sort_by(|a, b| a.partition_id().cmp(b.partition_id()));
        Ok(leases)
    }

    async fn remove_record(&self, partition_id: &str) -> Result<(), FileStoreError> {
        self.ensure_dir().await?;
        let _lock = self.lock_record(partition_id).await?;
        match fs::remove_file(self.record_path(partition_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl LeaseStore for FileLeaseStore {
    async fn store_exists(&self) -> StoreResult<bool> {
        Ok(self.is_dir().await?)
    }

    async fn create_store_if_not_exists(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(FileStoreError::from)?;
        Ok(())
    }

    async fn delete_store(&self) -> StoreResult<bool> {
        if !self.is_dir().await? {
            return Ok(false);
        }
        fs::remove_dir_all(&self.root)
            .await
            .map_err(FileStoreError::from)?;
        Ok(true)
    }

    async fn get_lease(&self, partition_id: &str) -> StoreResult<Option<Lease>> {
        self.ensure_dir().await?;
        Ok(read_record(&self.record_path(partition_id)).await?)
    }

    async fn get_all_leases(&self) -> StoreResult<Vec<Lease>> {
        Ok(self.list_records().await?)
    }

    async fn create_lease_if_not_exists(&self, partition_id: &str) -> StoreResult<Lease> {
        Ok(self.create_record(partition_id).await?)
    }

    async fn delete_lease(&self, lease: &Lease) -> StoreResult<()> {
        Ok(self.remove_record(lease.partition_id()).await?)
    }

    async fn try_acquire(
        &self,
        lease: &mut Lease,
        owner: &str,
        duration: Duration,
    ) -> StoreResult<bool> {
        Ok(self
            .compare_and_set(lease, true, |stored, now| {
                conditions::acquire(stored, owner, now, duration)
            })
            .await?)
    }

    async fn try_steal(
        &self,
        lease: &mut Lease,
        owner: &str,
        duration: Duration,
    ) -> StoreResult<bool> {
        let snapshot = lease.clone();
        Ok(self
            .compare_and_set(lease, false, |stored, now| {
                conditions::steal(stored, &snapshot, owner, now, duration)
            })
            .await?)
    }

    async fn try_renew(&self, lease: &mut Lease, duration: Duration) -> StoreResult<bool> {
        let request = lease.clone();
        Ok(self
            .compare_and_set(lease, false, |stored, now| {
                conditions::renew(stored, &request, now, duration)
            })
            .await?)
    }

    async fn try_release(&self, lease: &mut Lease) -> StoreResult<bool> {
        let request = lease.clone();
        Ok(self
            .compare_and_set(lease, false, |stored, now| {
                conditions::release(stored, &request, now)
            })
            .await?)
    }

    async fn try_update(&self, lease: &mut Lease, duration: Duration) -> StoreResult<bool> {
        let request = lease.clone();
        Ok(self
            .compare_and_set(lease, false, |stored, now| {
                conditions::update(stored, &request, now, duration)
            })
            .await?)
    }
}
