use anyhow::{Context, Result};

use std::fs;
use std::path::{Path, PathBuf};

use crate::application::ports::StagedFile;
use crate::application::report::RecordCounts;

pub const MANIFEST_FILE: &str = "_manifest.json";

/// Directory layout of one run's staging output:
///
/// ```text
/// <root>/spill/p<id>/      unsorted-input runs, removed after merging
/// <root>/sorted/           one sorted run per partition
/// <root>/<column_group>/   the generated SST files
/// <root>/_manifest.json    what the commit stage adopts
/// ```
#[derive(Debug, Clone)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn spill_dir(&self) -> PathBuf {
        self.root.join("spill")
    }

    pub fn sorted_dir(&self) -> PathBuf {
        self.root.join("sorted")
    }

    pub fn files_dir(&self, column_group: &str) -> PathBuf {
        self.root.join(column_group)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Clears whatever an earlier run left behind and recreates the root.
    pub fn prepare(&self) -> Result<()> {
        if self.root.exists() {
            tracing::info!(staging = ?self.root, "Removing previous staging output");
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("Failed to clear staging directory {:?}", self.root))?;
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create staging directory {:?}", self.root))?;
        Ok(())
    }

    /// Drops the spill and sorted runs once the files have been written.
    pub fn discard_intermediate(&self) -> Result<()> {
        for dir in [self.spill_dir(), self.sorted_dir()] {
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("Failed to remove {dir:?}"))?;
            }
        }
        Ok(())
    }

    pub fn write_manifest(&self, manifest: &StagingManifest) -> Result<()> {
        let path = self.manifest_path();
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(manifest)?)?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to write staging manifest {path:?}"))?;
        Ok(())
    }

    pub fn read_manifest(&self) -> Result<StagingManifest> {
        let path = self.manifest_path();
        let bytes = fs::read(&path)
            .with_context(|| format!("No staging manifest at {path:?}; run generation first"))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt staging manifest {path:?}"))
    }
}

/// Everything the commit stage needs to adopt a generated staging directory,
/// including after a restart.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StagingManifest {
    pub dataset: String,
    pub column_group: String,
    pub version: u64,
    pub counts: RecordCounts,
    pub files: Vec<StagedFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_clears_previous_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = StagingLayout::new(dir.path().join("staging"));
        fs::create_dir_all(staging.files_dir("detail"))?;
        fs::write(staging.files_dir("detail").join("stale.sst"), b"stale")?;

        staging.prepare()?;
        assert!(staging.root().exists());
        assert!(!staging.files_dir("detail").exists());
        Ok(())
    }

    #[test]
    fn manifest_survives_a_restart() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = StagingLayout::new(dir.path());
        let manifest = StagingManifest {
            dataset: "tbl_logs".to_string(),
            column_group: "detail".to_string(),
            version: 42,
            counts: RecordCounts {
                processed: 3,
                rejected: 1,
                cells: 22,
            },
            files: vec![StagedFile {
                file_id: "42-p000000".to_string(),
                partition_id: 0,
                path: staging.files_dir("detail").join("42-p000000.sst"),
                first_row: b"1".to_vec(),
                last_row: b"2".to_vec(),
                cells: 22,
            }],
        };
        staging.write_manifest(&manifest)?;

        let reopened = StagingLayout::new(dir.path()).read_manifest()?;
        assert_eq!(reopened, manifest);
        Ok(())
    }

    #[test]
    fn missing_manifest_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(StagingLayout::new(dir.path()).read_manifest().is_err());
        Ok(())
    }
}
