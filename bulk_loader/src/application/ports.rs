use std::path::PathBuf;

use logload_model::{PartitionDesc, PartitionMap};

use super::report::{CommitReport, RecordCounts};
use crate::infrastructure::staging::StagingLayout;

/// Facts fixed for one run and shared by every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Write version stamped on every cell of the run.
    pub version: u64,
    /// Boundaries read from the store when the run started.
    pub partitions: PartitionMap,
    pub staging: StagingLayout,
}

/// One partition's cells, sorted by `(row, column)` and without duplicates.
#[derive(Debug, Clone)]
pub struct SortedRun {
    pub partition: PartitionDesc,
    pub path: PathBuf,
    pub cells: u64,
    pub first_row: Vec<u8>,
    pub last_row: Vec<u8>,
}

#[derive(Debug)]
pub struct SortOutcome {
    pub counts: RecordCounts,
    /// In partition order; partitions that received no cells have no run.
    pub runs: Vec<SortedRun>,
}

/// A generated file awaiting adoption.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StagedFile {
    pub file_id: String,
    /// Partition the file was generated for.
    pub partition_id: u64,
    pub path: PathBuf,
    pub first_row: Vec<u8>,
    pub last_row: Vec<u8>,
    pub cells: u64,
}

/// A contract for a service that performs Stage 1:
/// decoding, projecting and partitioning the extract into one sorted run
/// per partition.
pub trait Sorter {
    fn run(&self, context: &RunContext) -> anyhow::Result<SortOutcome>;
}

/// A contract for a service that performs Stage 2:
/// writing one immutable SST file per sorted run.
pub trait SstGenerator {
    fn run(&self, context: &RunContext, runs: &[SortedRun]) -> anyhow::Result<Vec<StagedFile>>;
}

/// A contract for a service that performs Stage 3:
/// adopting staged files into the live store.
///
/// Failures are per file and reported, never raised.
pub trait Committer {
    fn run(&self, files: &[StagedFile]) -> CommitReport;
}
