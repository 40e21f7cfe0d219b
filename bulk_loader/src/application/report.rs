use std::path::PathBuf;

/// Record counters of the sort stage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecordCounts {
    /// Lines read from the extract, including rejected ones.
    pub processed: u64,
    pub rejected: u64,
    /// Cells emitted before duplicate cells were collapsed.
    pub cells: u64,
}

impl RecordCounts {
    pub fn accepted(&self) -> u64 {
        self.processed - self.rejected
    }

    pub fn add(&mut self, other: &RecordCounts) {
        self.processed += other.processed;
        self.rejected += other.rejected;
        self.cells += other.cells;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Adopted,
    /// Boundaries moved since generation; the file was cut into this many
    /// partition-aligned pieces.
    Split { pieces: usize },
    /// A previous run already adopted the file.
    AlreadyAdopted,
}

#[derive(Debug, Clone)]
pub struct CommittedFile {
    pub file_id: String,
    pub partitions: Vec<u64>,
    pub outcome: CommitOutcome,
}

#[derive(Debug, Clone)]
pub struct FailedCommit {
    pub file_id: String,
    pub path: PathBuf,
    pub error: String,
}

/// Per-file outcome of the commit stage.
#[derive(Debug, Default, Clone)]
pub struct CommitReport {
    pub committed: Vec<CommittedFile>,
    pub failed: Vec<FailedCommit>,
}

impl CommitReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.committed.len() + self.failed.len()
    }

    pub fn count(&self, outcome: fn(&CommitOutcome) -> bool) -> usize {
        self.committed
            .iter()
            .filter(|file| outcome(&file.outcome))
            .count()
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub version: u64,
    pub counts: RecordCounts,
    pub commit: CommitReport,
}

impl RunReport {
    pub fn log_summary(&self) {
        tracing::info!(
            version = self.version,
            processed = self.counts.processed,
            accepted = self.counts.accepted(),
            rejected = self.counts.rejected,
            cells = self.counts.cells,
            "Records summary"
        );
        tracing::info!(
            files = self.commit.total(),
            adopted = self.commit.count(|o| matches!(o, CommitOutcome::Adopted)),
            split = self.commit.count(|o| matches!(o, CommitOutcome::Split { .. })),
            already_adopted = self.commit.count(|o| matches!(o, CommitOutcome::AlreadyAdopted)),
            "Commit summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_add_up() {
        let mut total = RecordCounts::default();
        total.add(&RecordCounts {
            processed: 10,
            rejected: 2,
            cells: 88,
        });
        total.add(&RecordCounts {
            processed: 5,
            rejected: 0,
            cells: 55,
        });
        assert_eq!(total.processed, 15);
        assert_eq!(total.accepted(), 13);
        assert_eq!(total.cells, 143);
    }

    #[test]
    fn report_counts_outcomes() {
        let file = |id: &str, outcome| CommittedFile {
            file_id: id.to_string(),
            partitions: vec![0],
            outcome,
        };
        let report = CommitReport {
            committed: vec![
                file("a", CommitOutcome::Adopted),
                file("b", CommitOutcome::Split { pieces: 2 }),
                file("c", CommitOutcome::AlreadyAdopted),
            ],
            failed: vec![FailedCommit {
                file_id: "d".to_string(),
                path: PathBuf::from("d.sst"),
                error: "boom".to_string(),
            }],
        };
        assert!(!report.is_success());
        assert_eq!(report.total(), 4);
        assert_eq!(report.count(|o| matches!(o, CommitOutcome::Split { .. })), 1);
    }
}
