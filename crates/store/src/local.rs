use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use logload_model::key::{decode_cell_key, decode_cell_value, encode_cell_key, encode_row_bound};
use logload_model::{PartitionDesc, PartitionMap};
use rocksdb::{DB, Direction, IngestExternalFileOptions, IteratorMode, Options, WriteBatch};

use crate::manifest::{MANIFEST_FILE, StoreManifest};
use crate::{AdoptRequest, Adoption, Store, StoreError, StoredCell};

const PARTITIONS_DIR: &str = "partitions";
const SPLIT_BATCH_KEYS: usize = 10_000;

/// A store rooted at one directory:
///
/// ```text
/// <root>/manifest.json        boundaries + adoption ledger
/// <root>/partitions/<id>/     one RocksDB per partition
/// ```
///
/// Adoptions hold the metadata lock shared, splits hold it exclusively, so a
/// split never interleaves with an ingest into the partition it cuts.
pub struct LocalStore {
    root: PathBuf,
    dataset: String,
    column_group: String,
    manifest: RwLock<StoreManifest>,
    handles: Mutex<HashMap<u64, Arc<DB>>>,
}

impl LocalStore {
    /// Provisions a new store whose partitions are cut at `split_keys`.
    pub fn create<K: AsRef<[u8]>>(
        root: &Path,
        dataset: &str,
        column_group: &str,
        split_keys: &[K],
    ) -> Result<Self, StoreError> {
        if root.join(MANIFEST_FILE).exists() {
            return Err(StoreError::AlreadyExists(root.to_path_buf()));
        }
        std::fs::create_dir_all(root.join(PARTITIONS_DIR))?;

        let partitions = PartitionMap::from_split_keys(split_keys)?;
        let manifest = StoreManifest {
            dataset: dataset.to_string(),
            column_group: column_group.to_string(),
            next_partition_id: partitions.len() as u64,
            partitions,
            adopted: Default::default(),
        };
        manifest.persist(root)?;
        tracing::info!(
            root = %root.display(),
            dataset,
            partitions = manifest.partitions.len(),
            "Provisioned store"
        );

        Self::open(root)
    }

    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let manifest = StoreManifest::load(root)?;
        tracing::debug!(
            root = %root.display(),
            dataset = %manifest.dataset,
            partitions = manifest.partitions.len(),
            "Opened store"
        );
        Ok(Self {
            root: root.to_path_buf(),
            dataset: manifest.dataset.clone(),
            column_group: manifest.column_group.clone(),
            manifest: RwLock::new(manifest),
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Flushes every open partition and releases the handles.
    pub fn close(self) -> Result<(), StoreError> {
        let handles = self
            .handles
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        for (id, db) in handles {
            if let Some(cf) = db.cf_handle(&self.column_group) {
                db.flush_cf(cf)?;
            }
            tracing::trace!(partition = id, "Closed partition");
        }
        Ok(())
    }

    /// Reads one cell.
    pub fn get(&self, row: &[u8], column: &[u8]) -> Result<Option<StoredCell>, StoreError> {
        let manifest = self.manifest.read().unwrap_or_else(PoisonError::into_inner);
        let idx = manifest.partitions.locate(row)?;
        let db = self.partition(manifest.partitions.get(idx).id)?;
        let cf = self.column_family(&db)?;

        let Some(encoded) = db.get_cf(cf, encode_cell_key(row, column))? else {
            return Ok(None);
        };
        let (version, value) = decode_cell_value(&encoded)?;
        Ok(Some(StoredCell {
            version,
            value: value.to_vec(),
        }))
    }

    /// Reads every cell of one row, in column order.
    pub fn scan_row(&self, row: &[u8]) -> Result<Vec<(Vec<u8>, StoredCell)>, StoreError> {
        let manifest = self.manifest.read().unwrap_or_else(PoisonError::into_inner);
        let idx = manifest.partitions.locate(row)?;
        let db = self.partition(manifest.partitions.get(idx).id)?;
        let cf = self.column_family(&db)?;

        let bound = encode_row_bound(row);
        let mut cells = Vec::new();
        for item in db.iterator_cf(cf, IteratorMode::From(&bound, Direction::Forward)) {
            let (key, encoded) = item?;
            let (key_row, column) = decode_cell_key(&key)?;
            if key_row != row {
                break;
            }
            let (version, value) = decode_cell_value(&encoded)?;
            let cell = StoredCell {
                version,
                value: value.to_vec(),
            };
            cells.push((column.to_vec(), cell));
        }
        Ok(cells)
    }

    /// Distinct row keys physically held by one partition, ascending.
    pub fn partition_rows(&self, partition_id: u64) -> Result<Vec<Vec<u8>>, StoreError> {
        {
            let manifest = self.manifest.read().unwrap_or_else(PoisonError::into_inner);
            if manifest.partitions.by_id(partition_id).is_none() {
                return Err(StoreError::PartitionNotFound(partition_id));
            }
        }
        let db = self.partition(partition_id)?;
        let cf = self.column_family(&db)?;

        let mut rows: Vec<Vec<u8>> = Vec::new();
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let (row, _) = decode_cell_key(&key)?;
            if rows.last() != Some(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Splits the partition holding `split_row` at that key, moving the upper
    /// half of its rows into a new partition. Returns `(left, right)` ids.
    pub fn split_partition(&self, split_row: &[u8]) -> Result<(u64, u64), StoreError> {
        let mut manifest = self.manifest.write().unwrap_or_else(PoisonError::into_inner);
        let idx = manifest.partitions.locate(split_row)?;
        let left = manifest.partitions.get(idx).clone();
        if split_row <= left.start_key.as_slice() {
            let key = String::from_utf8_lossy(split_row).into_owned();
            return Err(StoreError::InvalidSplitKey(key));
        }

        let right = PartitionDesc {
            id: manifest.next_partition_id,
            start_key: split_row.to_vec(),
            end_key: left.end_key.clone(),
        };
        let moved = self.migrate_upper_half(left.id, right.id, split_row)?;

        let mut partitions: Vec<PartitionDesc> = manifest
            .partitions
            .iter()
            .filter(|p| p.id != left.id)
            .cloned()
            .collect();
        partitions.push(PartitionDesc {
            end_key: split_row.to_vec(),
            ..left.clone()
        });
        partitions.push(right.clone());

        manifest.partitions = PartitionMap::new(partitions)?;
        manifest.next_partition_id += 1;
        manifest.persist(&self.root)?;

        tracing::info!(
            left = %manifest.partitions.by_id(left.id).unwrap_or(&left),
            right = %right,
            moved_cells = moved,
            "Split partition"
        );
        Ok((left.id, right.id))
    }

    fn migrate_upper_half(&self, from: u64, to: u64, split_row: &[u8]) -> Result<usize, StoreError> {
        let source = self.partition(from)?;
        let target = self.partition(to)?;
        let source_cf = self.column_family(&source)?;
        let target_cf = self.column_family(&target)?;

        let bound = encode_row_bound(split_row);
        let mut moved = 0;
        let mut copy = WriteBatch::default();
        let mut purge = WriteBatch::default();
        for item in source.iterator_cf(source_cf, IteratorMode::From(&bound, Direction::Forward)) {
            let (key, value) = item?;
            copy.put_cf(target_cf, &key, &value);
            purge.delete_cf(source_cf, &key);
            moved += 1;
            if copy.len() >= SPLIT_BATCH_KEYS {
                target.write(std::mem::take(&mut copy))?;
                source.write(std::mem::take(&mut purge))?;
            }
        }
        target.write(copy)?;
        source.write(purge)?;
        Ok(moved)
    }

    fn partition(&self, id: u64) -> Result<Arc<DB>, StoreError> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(db) = handles.get(&id) {
            return Ok(db.clone());
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let path = self.root.join(PARTITIONS_DIR).join(format!("{id:06}"));
        let db = Arc::new(DB::open_cf(&opts, path, [self.column_group.as_str()])?);
        handles.insert(id, db.clone());
        Ok(db)
    }

    fn column_family<'a>(&self, db: &'a DB) -> Result<&'a rocksdb::ColumnFamily, StoreError> {
        db.cf_handle(&self.column_group)
            .ok_or_else(|| StoreError::MissingColumnGroup(self.column_group.clone()))
    }
}

impl Store for LocalStore {
    fn dataset(&self) -> &str {
        &self.dataset
    }

    fn column_group(&self) -> &str {
        &self.column_group
    }

    fn partitions(&self) -> Result<PartitionMap, StoreError> {
        let manifest = self.manifest.read().unwrap_or_else(PoisonError::into_inner);
        Ok(manifest.partitions.clone())
    }

    fn adopt(&self, request: &AdoptRequest<'_>) -> Result<Adoption, StoreError> {
        {
            let manifest = self.manifest.read().unwrap_or_else(PoisonError::into_inner);
            if manifest.is_adopted(request.file_id, request.partition_id) {
                return Ok(Adoption::AlreadyAdopted);
            }
            let partition = manifest
                .partitions
                .by_id(request.partition_id)
                .ok_or(StoreError::PartitionNotFound(request.partition_id))?;
            if !partition.contains(request.first_row) || !partition.contains(request.last_row) {
                return Err(StoreError::RangeOutsidePartition {
                    file_id: request.file_id.to_string(),
                    partition_id: request.partition_id,
                    first: String::from_utf8_lossy(request.first_row).into_owned(),
                    last: String::from_utf8_lossy(request.last_row).into_owned(),
                });
            }

            let db = self.partition(request.partition_id)?;
            let cf = self.column_family(&db)?;
            // The caller's file stays in place until the ledger records it,
            // so a failed ledger write can be retried from the same file.
            let mut ingest = IngestExternalFileOptions::default();
            ingest.set_move_files(false);
            db.ingest_external_file_cf_opts(cf, &ingest, vec![request.path])?;
        }

        let mut manifest = self.manifest.write().unwrap_or_else(PoisonError::into_inner);
        let newly_recorded = manifest
            .adopted
            .entry(request.file_id.to_string())
            .or_default()
            .insert(request.partition_id);
        if let Err(e) = manifest.persist(&self.root) {
            if newly_recorded {
                forget_adoption(&mut manifest, request);
            }
            return Err(e);
        }

        tracing::debug!(
            file_id = request.file_id,
            partition = request.partition_id,
            "Adopted file"
        );
        Ok(Adoption::Adopted)
    }

    fn adopted_partitions(&self, file_id: &str) -> Result<Vec<u64>, StoreError> {
        let manifest = self.manifest.read().unwrap_or_else(PoisonError::into_inner);
        Ok(manifest
            .adopted
            .get(file_id)
            .map(|partitions| partitions.iter().copied().collect())
            .unwrap_or_default())
    }
}

fn forget_adoption(manifest: &mut StoreManifest, request: &AdoptRequest<'_>) {
    if let Some(partitions) = manifest.adopted.get_mut(request.file_id) {
        partitions.remove(&request.partition_id);
        if partitions.is_empty() {
            manifest.adopted.remove(request.file_id);
        }
    }
}
