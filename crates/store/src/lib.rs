//! The range-partitioned store that bulk-loaded files are adopted into.
//!
//! [`Store`] is the contract the loader relies on: current partition
//! boundaries, atomic adoption of an externally written SST into one
//! partition, and an adoption ledger that makes retries no-ops.
//! [`LocalStore`] implements it on a directory where every partition is its
//! own RocksDB instance and the dataset's column group is a column family.

mod local;
mod manifest;

use std::path::{Path, PathBuf};

use logload_model::{BoundaryError, KeyError, MappingError, PartitionMap};
use thiserror::Error;

pub use local::LocalStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no store at {0}")]
    Missing(PathBuf),
    #[error("a store already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("partition {0} does not exist")]
    PartitionNotFound(u64),
    #[error("column group {0:?} is missing from the partition")]
    MissingColumnGroup(String),
    #[error("rows {first:?}..={last:?} of file {file_id} fall outside partition {partition_id}")]
    RangeOutsidePartition {
        file_id: String,
        partition_id: u64,
        first: String,
        last: String,
    },
    #[error("split key {0:?} does not fall strictly inside a partition")]
    InvalidSplitKey(String),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Boundary(#[from] BoundaryError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("rocksdb: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl StoreError {
    /// Errors caused by boundaries moving under the caller; re-reading the
    /// partitions and retrying can succeed.
    pub fn is_boundary_drift(&self) -> bool {
        matches!(
            self,
            StoreError::PartitionNotFound(_) | StoreError::RangeOutsidePartition { .. }
        )
    }
}

/// An externally written, sorted SST to be adopted into one partition.
#[derive(Debug, Clone, Copy)]
pub struct AdoptRequest<'a> {
    /// Stable identity of the file across retries.
    pub file_id: &'a str,
    pub partition_id: u64,
    pub path: &'a Path,
    pub first_row: &'a [u8],
    pub last_row: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    Adopted,
    AlreadyAdopted,
}

/// A cell as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCell {
    pub version: u64,
    pub value: Vec<u8>,
}

pub trait Store: Send + Sync {
    fn dataset(&self) -> &str;

    fn column_group(&self) -> &str;

    /// Current boundary set. Callers must not cache it across adoptions.
    fn partitions(&self) -> Result<PartitionMap, StoreError>;

    /// Makes `request.path` visible as committed data in its partition.
    ///
    /// The file is copied in; removing it stays with the caller, once this
    /// returns successfully.
    ///
    /// Fails with [`StoreError::RangeOutsidePartition`] when the file's rows
    /// are no longer inside the partition, and is a no-op for a
    /// `(file_id, partition_id)` pair that was adopted before.
    fn adopt(&self, request: &AdoptRequest<'_>) -> Result<Adoption, StoreError>;

    /// Partitions `file_id` (or pieces of it) has been adopted into.
    fn adopted_partitions(&self, file_id: &str) -> Result<Vec<u64>, StoreError>;
}
