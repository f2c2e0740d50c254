use std::path::PathBuf;

use leasehold_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timed out waiting for record lock {}", .0.display())]
    LockTimeout(PathBuf),
    #[error("lease store directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),
}

impl From<FileStoreError> for StoreError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::Io(e) => StoreError::Io(e),
            FileStoreError::Json(e) => StoreError::Serialization(e),
            FileStoreError::LockTimeout(path) => StoreError::Unavailable(format!(
                "record lock {} is held by another writer",
                path.display()
            )),
            FileStoreError::MissingDirectory(_) => StoreError::NotBootstrapped,
        }
    }
}
