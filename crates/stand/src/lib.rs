//! Fixtures shared by the benches: a generated `tbl_logs` extract and fresh
//! run contexts over it.

use bulk_loader::application::ports::RunContext;
use bulk_loader::infrastructure::staging::StagingLayout;
use logload_model::{PartitionMap, Schema, generate_extract};

use std::path::PathBuf;
use std::sync::Arc;

/// Row-key prefixes the benches split the key space at.
pub const SPLIT_KEYS: [&str; 4] = ["2", "4", "6", "8"];

pub struct Fixture {
    dir: tempfile::TempDir,
    pub lines: usize,
    pub well_formed: usize,
    pub schema: Arc<Schema>,
    pub partitions: PartitionMap,
}

impl Fixture {
    pub fn new(splits: usize, lines_per_split: usize) -> anyhow::Result<Self> {
        let dir = tempfile::Builder::new().prefix("logload-stand").tempdir()?;
        let well_formed = generate_extract(&dir.path().join("input"), splits, lines_per_split, Some(1))?;
        Ok(Self {
            dir,
            lines: splits * lines_per_split,
            well_formed,
            schema: Arc::new(Schema::tbl_logs()),
            partitions: PartitionMap::from_split_keys(&SPLIT_KEYS)?,
        })
    }

    pub fn input(&self) -> PathBuf {
        self.dir.path().join("input")
    }

    /// A run context over an emptied staging directory.
    pub fn context(&self) -> anyhow::Result<RunContext> {
        let staging = StagingLayout::new(self.dir.path().join("staging"));
        staging.prepare()?;
        Ok(RunContext {
            version: 1,
            partitions: self.partitions.clone(),
            staging,
        })
    }
}
