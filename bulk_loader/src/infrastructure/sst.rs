//! Immutable, indexed cell files in RocksDB's SST format.

use anyhow::{Context, Result};
use logload_model::key::{decode_cell_key, encode_row_bound};
use rocksdb::{DB, Direction, IngestExternalFileOptions, IteratorMode, Options, SstFileWriter};
use tempfile::TempDir;

use std::fs;
use std::path::{Path, PathBuf};

/// A finished cell file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellFileSummary {
    pub path: PathBuf,
    pub first_row: Vec<u8>,
    pub last_row: Vec<u8>,
    pub cells: u64,
}

/// Writes encoded `(key, value)` cells to a new SST at `path`.
///
/// Keys must be strictly increasing. Returns `None`, and leaves no file
/// behind, when `cells` is empty; a partially written file is removed on
/// error. An existing file at `path` is never overwritten.
pub fn write_cell_file<I>(path: &Path, cells: I) -> Result<Option<CellFileSummary>>
where
    I: IntoIterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
{
    if path.exists() {
        anyhow::bail!("Refusing to overwrite existing file: {:?}", path);
    }
    let result = write_new_cell_file(path, cells);
    if result.is_err() && path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to remove partial file {:?}: {}", path, e);
        }
    }
    result
}

fn write_new_cell_file<I>(path: &Path, cells: I) -> Result<Option<CellFileSummary>>
where
    I: IntoIterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
{
    let opts = Options::default();
    let mut writer = SstFileWriter::create(&opts);
    let mut first_row = Vec::new();
    let mut previous: Option<Vec<u8>> = None;
    let mut count = 0u64;

    for cell in cells {
        let (key, value) = cell?;
        match &previous {
            None => {
                writer.open(path)?;
                first_row = decode_cell_key(&key)?.0;
            }
            Some(prev) if key.as_slice() <= prev.as_slice() => {
                anyhow::bail!(
                    "Cells out of order in {:?}: {} after {}",
                    path,
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(prev)
                );
            }
            Some(_) => {}
        }
        writer.put(&key, &value)?;
        count += 1;
        previous = Some(key);
    }

    let Some(last_key) = previous else {
        return Ok(None);
    };
    writer.finish()?;
    let last_row = decode_cell_key(&last_key)?.0;

    Ok(Some(CellFileSummary {
        path: path.to_path_buf(),
        first_row,
        last_row,
        cells: count,
    }))
}

/// Read access to a finished cell file.
///
/// The bindings expose no standalone SST reader, so the file is copied into
/// a throwaway database under `scratch_dir` and read through it. Keep
/// `scratch_dir` on the same volume as the file.
pub struct CellFileReader {
    db: DB,
    column_group: String,
    _scratch: TempDir,
}

impl CellFileReader {
    pub fn open(path: &Path, column_group: &str, scratch_dir: &Path) -> Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix(".cell-file")
            .tempdir_in(scratch_dir)
            .with_context(|| format!("Failed to create scratch directory in {:?}", scratch_dir))?;
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf(&opts, scratch.path(), [column_group])?;

        let cf = db
            .cf_handle(column_group)
            .with_context(|| format!("Missing column family {column_group}"))?;
        let mut ingest = IngestExternalFileOptions::default();
        ingest.set_move_files(false);
        db.ingest_external_file_cf_opts(cf, &ingest, vec![path])
            .with_context(|| format!("Failed to read cell file {:?}", path))?;

        Ok(Self {
            db,
            column_group: column_group.to_string(),
            _scratch: scratch,
        })
    }

    /// Cells whose row lies in `[start_row, end_row)`, in key order; an empty
    /// `end_row` is unbounded.
    pub fn cells_in(
        &self,
        start_row: &[u8],
        end_row: &[u8],
    ) -> Result<impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
        let cf = self
            .db
            .cf_handle(&self.column_group)
            .with_context(|| format!("Missing column family {}", self.column_group))?;
        let start = encode_row_bound(start_row);
        let end = (!end_row.is_empty()).then(|| encode_row_bound(end_row));

        let cells = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
            .map(|item| {
                item.map(|(key, value)| (key.into_vec(), value.into_vec()))
                    .map_err(anyhow::Error::from)
            })
            .take_while(move |item| match (item, &end) {
                (Ok((key, _)), Some(end)) => key < end,
                _ => true,
            });
        Ok(cells)
    }
}
