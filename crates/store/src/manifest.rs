use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use logload_model::PartitionMap;

use crate::StoreError;

pub(crate) const MANIFEST_FILE: &str = "manifest.json";

/// Persistent store metadata: boundaries plus the adoption ledger.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct StoreManifest {
    pub dataset: String,
    pub column_group: String,
    pub next_partition_id: u64,
    pub partitions: PartitionMap,
    /// file id -> partitions it has been adopted into
    #[serde(default)]
    pub adopted: BTreeMap<String, BTreeSet<u64>>,
}

impl StoreManifest {
    pub fn load(root: &Path) -> Result<Self, StoreError> {
        let path = root.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(StoreError::Missing(root.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replaces the manifest through a rename so readers never see a torn file.
    pub fn persist(&self, root: &Path) -> Result<(), StoreError> {
        let tmp_path = root.join(format!("{MANIFEST_FILE}.tmp"));
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(tmp_path, root.join(MANIFEST_FILE))?;
        Ok(())
    }

    pub fn is_adopted(&self, file_id: &str, partition_id: u64) -> bool {
        self.adopted
            .get(file_id)
            .is_some_and(|partitions| partitions.contains(&partition_id))
    }
}
