mod errors;
pub use errors::FileStoreError;

mod file_store;
pub use file_store::{FileLeaseStore, FileStoreOptions};
