use anyhow::{Context, Result};
use logload_model::MappingError;
use logload_store::{AdoptRequest, Adoption, Store, StoreError};
use rayon::prelude::*;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::application::ports::{Committer, StagedFile};
use crate::application::report::{CommitOutcome, CommitReport, CommittedFile, FailedCommit};
use crate::config::Config;
use crate::infrastructure::sst::{CellFileReader, write_cell_file};

/// An adapter that implements the `Committer` port against a [`Store`].
///
/// Files are committed in parallel and independently. Before adopting a file
/// the current boundaries are re-read; a file that now spans several
/// partitions is cut into one piece per partition, and each piece is adopted
/// on its own. Adoption is keyed by file id, so committing a staging
/// directory again only adopts what is still missing.
pub struct BulkCommitter<St: Store> {
    store: Arc<St>,
    num_threads: usize,
    commit_attempts: usize,
}

impl<St: Store> BulkCommitter<St> {
    pub fn new(store: Arc<St>, config: &Config) -> Self {
        Self::with_settings(
            store,
            config.bulk_loader.num_threads,
            config.bulk_loader.commit_attempts,
        )
    }

    pub fn with_settings(store: Arc<St>, num_threads: usize, commit_attempts: usize) -> Self {
        Self {
            store,
            num_threads,
            commit_attempts: commit_attempts.max(1),
        }
    }
}

impl<St: Store> Committer for BulkCommitter<St> {
    fn run(&self, files: &[StagedFile]) -> CommitReport {
        let outcomes: Vec<Result<CommittedFile>> =
            match rayon::ThreadPoolBuilder::new().num_threads(self.num_threads).build() {
                Ok(pool) => pool.install(|| files.par_iter().map(|f| self.commit_file(f)).collect()),
                Err(e) => {
                    tracing::warn!("Falling back to sequential commit: {}", e);
                    files.iter().map(|f| self.commit_file(f)).collect()
                }
            };

        let mut report = CommitReport::default();
        for (file, outcome) in files.iter().zip(outcomes) {
            match outcome {
                Ok(committed) => report.committed.push(committed),
                Err(e) => {
                    tracing::error!(file_id = %file.file_id, "Commit failed: {:#}", e);
                    report.failed.push(FailedCommit {
                        file_id: file.file_id.clone(),
                        path: file.path.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }
        report
    }
}

fn is_boundary_drift(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<StoreError>()
        .is_some_and(StoreError::is_boundary_drift)
        || error.downcast_ref::<MappingError>().is_some()
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            Err(e).with_context(|| format!("Failed to remove {:?}", path))
        }
        _ => Ok(()),
    }
}

impl<St: Store> BulkCommitter<St> {
    fn commit_file(&self, file: &StagedFile) -> Result<CommittedFile> {
        if !file.path.exists() {
            let partitions = self.store.adopted_partitions(&file.file_id)?;
            if partitions.is_empty() {
                anyhow::bail!("Staged file {:?} is missing and was never adopted", file.path);
            }
            tracing::info!(file_id = %file.file_id, "File was adopted by an earlier run");
            return Ok(CommittedFile {
                file_id: file.file_id.clone(),
                partitions,
                outcome: CommitOutcome::AlreadyAdopted,
            });
        }

        let mut attempt = 1;
        loop {
            match self.try_commit(file) {
                Ok(committed) => {
                    remove_if_present(&file.path)?;
                    return Ok(committed);
                }
                Err(e) if attempt < self.commit_attempts && is_boundary_drift(&e) => {
                    tracing::warn!(
                        file_id = %file.file_id,
                        attempt,
                        "Boundaries moved during commit, retrying: {:#}",
                        e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_commit(&self, file: &StagedFile) -> Result<CommittedFile> {
        let partitions = self.store.partitions()?;
        let targets = partitions.overlapping(&file.first_row, &file.last_row)?;

        if let [idx] = targets.as_slice() {
            let partition = partitions.get(*idx);
            let adoption = self.store.adopt(&AdoptRequest {
                file_id: &file.file_id,
                partition_id: partition.id,
                path: &file.path,
                first_row: &file.first_row,
                last_row: &file.last_row,
            })?;
            let outcome = match adoption {
                Adoption::Adopted => CommitOutcome::Adopted,
                Adoption::AlreadyAdopted => CommitOutcome::AlreadyAdopted,
            };
            return Ok(CommittedFile {
                file_id: file.file_id.clone(),
                partitions: vec![partition.id],
                outcome,
            });
        }

        tracing::info!(
            file_id = %file.file_id,
            pieces = targets.len(),
            "File spans several partitions after a split, cutting it along the new boundaries"
        );
        let done = self.store.adopted_partitions(&file.file_id)?;
        let scratch_dir = file.path.parent().unwrap_or(Path::new("."));
        let reader = CellFileReader::open(&file.path, self.store.column_group(), scratch_dir)?;
        let mut adopted = Vec::with_capacity(targets.len());

        for idx in targets {
            let partition = partitions.get(idx);
            if done.contains(&partition.id) {
                adopted.push(partition.id);
                continue;
            }
            let piece_path = file.path.with_extension(format!("p{:06}.sst", partition.id));
            // A failed attempt may have left its piece behind.
            remove_if_present(&piece_path)?;

            let cells = reader.cells_in(&partition.start_key, &partition.end_key)?;
            let Some(piece) = write_cell_file(&piece_path, cells)? else {
                continue;
            };
            self.store.adopt(&AdoptRequest {
                file_id: &file.file_id,
                partition_id: partition.id,
                path: &piece.path,
                first_row: &piece.first_row,
                last_row: &piece.last_row,
            })?;
            remove_if_present(&piece.path)?;
            adopted.push(partition.id);
        }

        Ok(CommittedFile {
            file_id: file.file_id.clone(),
            outcome: CommitOutcome::Split {
                pieces: adopted.len(),
            },
            partitions: adopted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logload_model::PartitionMap;
    use logload_model::key::{encode_cell_key, encode_cell_value};
    use logload_store::LocalStore;
    use std::sync::Mutex;

    type AdoptFault = Box<dyn Fn(usize, &AdoptRequest<'_>) -> Option<StoreError> + Send + Sync>;

    /// Delegates to a real store, failing the adoptions `fault` picks by
    /// call number (from 1).
    struct FlakyStore {
        inner: Arc<LocalStore>,
        adopt_calls: Mutex<Vec<u64>>,
        fault: AdoptFault,
    }

    impl FlakyStore {
        fn new(inner: Arc<LocalStore>, fault: AdoptFault) -> Arc<Self> {
            Arc::new(Self {
                inner,
                adopt_calls: Mutex::new(Vec::new()),
                fault,
            })
        }

        /// Partition id of every adoption attempted so far.
        fn adopt_calls(&self) -> Vec<u64> {
            self.adopt_calls.lock().unwrap().clone()
        }
    }

    impl Store for FlakyStore {
        fn dataset(&self) -> &str {
            self.inner.dataset()
        }

        fn column_group(&self) -> &str {
            self.inner.column_group()
        }

        fn partitions(&self) -> Result<PartitionMap, StoreError> {
            self.inner.partitions()
        }

        fn adopt(&self, request: &AdoptRequest<'_>) -> Result<Adoption, StoreError> {
            let call = {
                let mut calls = self.adopt_calls.lock().unwrap();
                calls.push(request.partition_id);
                calls.len()
            };
            match (self.fault)(call, request) {
                Some(err) => Err(err),
                None => self.inner.adopt(request),
            }
        }

        fn adopted_partitions(&self, file_id: &str) -> Result<Vec<u64>, StoreError> {
            self.inner.adopted_partitions(file_id)
        }
    }

    fn moved_away(request: &AdoptRequest<'_>) -> StoreError {
        StoreError::RangeOutsidePartition {
            file_id: request.file_id.to_string(),
            partition_id: request.partition_id,
            first: String::from_utf8_lossy(request.first_row).into_owned(),
            last: String::from_utf8_lossy(request.last_row).into_owned(),
        }
    }

    fn stage(dir: &Path, file_id: &str, partition_id: u64, rows: &[&str]) -> Result<StagedFile> {
        let path = dir.join(format!("{file_id}.sst"));
        let cells = rows.iter().map(|row| {
            Ok((
                encode_cell_key(row.as_bytes(), b"name"),
                encode_cell_value(5, format!("v{row}").as_bytes()),
            ))
        });
        let summary = write_cell_file(&path, cells)?.context("no cells")?;
        Ok(StagedFile {
            file_id: file_id.to_string(),
            partition_id,
            path,
            first_row: summary.first_row,
            last_row: summary.last_row,
            cells: summary.cells,
        })
    }

    fn store(dir: &Path, split_keys: &[&str]) -> Result<Arc<LocalStore>> {
        Ok(Arc::new(LocalStore::create(
            &dir.join("store"),
            "tbl_logs",
            "detail",
            split_keys,
        )?))
    }

    #[test]
    fn adopts_files_and_removes_them() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path(), &["m"])?;
        let files = vec![
            stage(dir.path(), "1-p000000", 0, &["a", "c"])?,
            stage(dir.path(), "1-p000001", 1, &["n", "z"])?,
        ];

        let report = BulkCommitter::with_settings(store.clone(), 2, 3).run(&files);
        assert!(report.is_success());
        assert_eq!(report.count(|o| matches!(o, CommitOutcome::Adopted)), 2);
        assert!(files.iter().all(|f| !f.path.exists()));

        let cell = store.get(b"z", b"name")?.context("missing cell")?;
        assert_eq!(cell.value, b"vz");
        assert_eq!(cell.version, 5);
        Ok(())
    }

    #[test]
    fn recommit_reports_already_adopted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path(), &[])?;
        let files = vec![stage(dir.path(), "1-p000000", 0, &["a"])?];
        let committer = BulkCommitter::with_settings(store.clone(), 1, 3);

        assert!(committer.run(&files).is_success());
        let again = committer.run(&files);
        assert!(again.is_success());
        assert_eq!(again.committed[0].outcome, CommitOutcome::AlreadyAdopted);
        Ok(())
    }

    #[test]
    fn file_is_split_when_its_partition_was_split() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path(), &[])?;
        let files = vec![stage(dir.path(), "1-p000000", 0, &["a", "f", "k", "t"])?];
        store.split_partition(b"k")?;

        let report = BulkCommitter::with_settings(store.clone(), 1, 3).run(&files);
        assert!(report.is_success());
        assert_eq!(report.committed[0].outcome, CommitOutcome::Split { pieces: 2 });
        assert_eq!(report.committed[0].partitions.len(), 2);

        for row in ["a", "f", "k", "t"] {
            let cell = store.get(row.as_bytes(), b"name")?.context("missing cell")?;
            assert_eq!(cell.value, format!("v{row}").into_bytes());
        }
        let partitions = store.partitions()?;
        let right = partitions.get(1).id;
        assert_eq!(store.partition_rows(right)?, vec![b"k".to_vec(), b"t".to_vec()]);
        assert!(!files[0].path.exists());
        Ok(())
    }

    #[test]
    fn one_bad_file_does_not_stop_the_others() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path(), &[])?;
        let good = stage(dir.path(), "1-p000000", 0, &["a"])?;
        let missing = StagedFile {
            file_id: "1-p000009".to_string(),
            partition_id: 0,
            path: dir.path().join("gone.sst"),
            first_row: b"b".to_vec(),
            last_row: b"b".to_vec(),
            cells: 1,
        };

        let report = BulkCommitter::with_settings(store, 2, 3).run(&[good, missing]);
        assert_eq!(report.committed.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].file_id, "1-p000009");
        Ok(())
    }

    #[test]
    fn drift_during_adoption_is_retried() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let inner = store(dir.path(), &["m"])?;
        let files = vec![stage(dir.path(), "1-p000000", 0, &["a", "c"])?];
        let flaky = FlakyStore::new(
            inner.clone(),
            Box::new(|call: usize, request: &AdoptRequest<'_>| (call == 1).then(|| moved_away(request))),
        );

        let report = BulkCommitter::with_settings(flaky.clone(), 1, 3).run(&files);
        assert!(report.is_success());
        assert_eq!(report.committed[0].outcome, CommitOutcome::Adopted);
        assert_eq!(flaky.adopt_calls(), vec![0, 0]);
        assert_eq!(inner.get(b"c", b"name")?.map(|c| c.value), Some(b"vc".to_vec()));
        assert!(!files[0].path.exists());
        Ok(())
    }

    #[test]
    fn persistent_drift_gives_up_and_keeps_the_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let inner = store(dir.path(), &["m"])?;
        let files = vec![stage(dir.path(), "1-p000000", 0, &["a"])?];
        let flaky = FlakyStore::new(
            inner.clone(),
            Box::new(|_: usize, request: &AdoptRequest<'_>| Some(StoreError::PartitionNotFound(request.partition_id))),
        );

        let report = BulkCommitter::with_settings(flaky.clone(), 1, 2).run(&files);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(flaky.adopt_calls().len(), 2);
        assert!(files[0].path.exists());
        assert!(inner.adopted_partitions("1-p000000")?.is_empty());
        Ok(())
    }

    #[test]
    fn split_resumes_after_a_failed_piece() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let inner = store(dir.path(), &[])?;
        let files = vec![stage(dir.path(), "1-p000000", 0, &["a", "f", "k", "t"])?];
        let (left, right) = inner.split_partition(b"k")?;

        let failing = FlakyStore::new(
            inner.clone(),
            Box::new(|call: usize, _: &AdoptRequest<'_>| {
                (call == 2).then(|| StoreError::Io(std::io::Error::other("disk full")))
            }),
        );
        let report = BulkCommitter::with_settings(failing.clone(), 1, 3).run(&files);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(failing.adopt_calls(), vec![left, right]);
        assert!(files[0].path.exists());
        assert_eq!(inner.adopted_partitions("1-p000000")?, vec![left]);
        let stale_piece = files[0].path.with_extension(format!("p{right:06}.sst"));
        assert!(stale_piece.exists());

        let healthy = FlakyStore::new(inner.clone(), Box::new(|_: usize, _: &AdoptRequest<'_>| -> Option<StoreError> { None }));
        let report = BulkCommitter::with_settings(healthy.clone(), 1, 3).run(&files);
        assert!(report.is_success());
        assert_eq!(report.committed[0].outcome, CommitOutcome::Split { pieces: 2 });
        assert_eq!(healthy.adopt_calls(), vec![right]);
        assert_eq!(inner.adopted_partitions("1-p000000")?, vec![left, right]);

        assert_eq!(inner.partition_rows(left)?, vec![b"a".to_vec(), b"f".to_vec()]);
        assert_eq!(inner.partition_rows(right)?, vec![b"k".to_vec(), b"t".to_vec()]);
        assert!(!stale_piece.exists());
        assert!(!files[0].path.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".cell-file"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[test]
    fn failed_ledger_write_is_recovered_on_retry() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let inner = store(dir.path(), &[])?;
        let files = vec![stage(dir.path(), "1-p000000", 0, &["a"])?];
        let committer = BulkCommitter::with_settings(inner.clone(), 1, 3);

        let blocker = dir.path().join("store").join("manifest.json.tmp");
        fs::create_dir(&blocker)?;
        let report = committer.run(&files);
        assert_eq!(report.failed.len(), 1);
        assert!(files[0].path.exists());

        fs::remove_dir(&blocker)?;
        let report = committer.run(&files);
        assert!(report.is_success());
        assert_eq!(report.committed[0].outcome, CommitOutcome::Adopted);
        assert_eq!(inner.adopted_partitions("1-p000000")?, vec![0]);
        assert_eq!(inner.get(b"a", b"name")?.map(|c| c.value), Some(b"va".to_vec()));
        assert!(!files[0].path.exists());
        Ok(())
    }
}
