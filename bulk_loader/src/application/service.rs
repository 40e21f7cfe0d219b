use logload_store::{Store, StoreError};
use thiserror::Error;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::ports::{Committer, RunContext, Sorter, SstGenerator};
use super::report::{CommitReport, RunReport};
use crate::infrastructure::staging::{StagingLayout, StagingManifest};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot read partition boundaries: {0}")]
    Store(#[from] StoreError),
    #[error("staging failed: {0:#}")]
    Staging(anyhow::Error),
    #[error("parallel stage failed: {0:#}")]
    ParallelStage(anyhow::Error),
    #[error("{} of {} staged files failed to commit", .0.failed.len(), .0.total())]
    Commit(CommitReport),
}

impl PipelineError {
    /// Process exit status: 1 when nothing reached the store, 2 when the
    /// commit stage ran and left some files unadopted.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Store(_) | PipelineError::Staging(_) | PipelineError::ParallelStage(_) => 1,
            PipelineError::Commit(_) => 2,
        }
    }
}

/// The main application service that orchestrates the bulk loading process.
/// It is generic over the stage ports, allowing for dependency injection.
pub struct BulkLoaderService<S: Sorter, G: SstGenerator, C: Committer, St: Store> {
    sorter: S,
    sst_generator: G,
    committer: C,
    store: Arc<St>,
    staging: StagingLayout,
}

impl<S: Sorter, G: SstGenerator, C: Committer, St: Store> BulkLoaderService<S, G, C, St> {
    /// Creates a new service with concrete implementations of the ports.
    pub fn new(sorter: S, sst_generator: G, committer: C, store: Arc<St>, staging: StagingLayout) -> Self {
        Self {
            sorter,
            sst_generator,
            committer,
            store,
            staging,
        }
    }

    /// Executes the entire bulk loading pipeline.
    pub fn run(&self) -> Result<RunReport, PipelineError> {
        let manifest = self.generate()?;
        self.commit(manifest)
    }

    /// Adopts a staging directory generated by an earlier run.
    pub fn commit_only(&self) -> Result<RunReport, PipelineError> {
        let manifest = self.staging.read_manifest().map_err(PipelineError::Staging)?;
        if manifest.dataset != self.store.dataset() || manifest.column_group != self.store.column_group() {
            return Err(PipelineError::Staging(anyhow::anyhow!(
                "staging holds {}:{} but the store is {}:{}",
                manifest.dataset,
                manifest.column_group,
                self.store.dataset(),
                self.store.column_group()
            )));
        }
        tracing::info!(
            version = manifest.version,
            files = manifest.files.len(),
            "Committing existing staging output"
        );
        self.commit(manifest)
    }

    /// Sorts the extract and writes the staged files, without touching the
    /// store's data.
    pub fn generate(&self) -> Result<StagingManifest, PipelineError> {
        let partitions = self.store.partitions()?;
        tracing::info!(partitions = partitions.len(), "Read partition boundaries");

        self.staging.prepare().map_err(PipelineError::Staging)?;
        let context = RunContext {
            version: job_version(),
            partitions,
            staging: self.staging.clone(),
        };

        tracing::info!("Starting Stage 1: Sorting");
        let sorted = self.sorter.run(&context).map_err(PipelineError::ParallelStage)?;
        tracing::info!(
            runs = sorted.runs.len(),
            processed = sorted.counts.processed,
            rejected = sorted.counts.rejected,
            cells = sorted.counts.cells,
            "Stage 1: Sorting finished successfully"
        );

        tracing::info!("Starting Stage 2: SST Generation");
        let files = self
            .sst_generator
            .run(&context, &sorted.runs)
            .map_err(PipelineError::ParallelStage)?;
        tracing::info!(files = files.len(), "Stage 2: SST Generation finished successfully");

        let manifest = StagingManifest {
            dataset: self.store.dataset().to_string(),
            column_group: self.store.column_group().to_string(),
            version: context.version,
            counts: sorted.counts,
            files,
        };
        self.staging
            .write_manifest(&manifest)
            .and_then(|()| self.staging.discard_intermediate())
            .map_err(PipelineError::Staging)?;
        Ok(manifest)
    }

    /// Adopts every file in `manifest` into the store.
    pub fn commit(&self, manifest: StagingManifest) -> Result<RunReport, PipelineError> {
        tracing::info!("Starting Stage 3: Bulk Commit");
        let commit = self.committer.run(&manifest.files);
        if !commit.is_success() {
            return Err(PipelineError::Commit(commit));
        }
        tracing::info!(files = commit.total(), "Stage 3: Bulk Commit finished successfully");

        Ok(RunReport {
            version: manifest.version,
            counts: manifest.counts,
            commit,
        })
    }
}

/// Milliseconds since the epoch at job start; later runs carry higher
/// versions.
fn job_version() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
