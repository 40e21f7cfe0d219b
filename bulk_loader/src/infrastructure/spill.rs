//! Parquet-backed sort runs and their k-way merge.
//!
//! A run is a Parquet file of `(row, column, value, seq)` entries sorted by
//! `(row, column, seq)`. `seq` orders duplicate cells by input position so
//! that merging keeps the latest one.

use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, BinaryArray, UInt64Array},
    datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::{
        ArrowWriter,
        arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
    },
    basic::Compression,
    file::properties::WriterProperties,
};

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A cell on its way through the sort, tagged with its input position.
///
/// Equality and order both look at `(row, column, seq)` only.
#[derive(Debug, Clone)]
pub struct SortEntry {
    pub row: Vec<u8>,
    pub column: Vec<u8>,
    pub value: Vec<u8>,
    pub seq: u64,
}

impl SortEntry {
    pub fn same_cell(&self, other: &SortEntry) -> bool {
        self.row == other.row && self.column == other.column
    }
}

impl Ord for SortEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.column.cmp(&other.column))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialEq for SortEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortEntry {}

impl PartialOrd for SortEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Input position of a line: split index in the high bits, line number in
/// the low 40.
pub fn sequence(split: usize, line: u64) -> u64 {
    ((split as u64) << 40) | (line & ((1 << 40) - 1))
}

/// Collapses every group of equal cells to the one with the highest `seq`.
///
/// `entries` must already be sorted.
pub fn keep_latest(entries: &mut Vec<SortEntry>) {
    entries.dedup_by(|later, earlier| {
        if later.same_cell(earlier) {
            std::mem::swap(later, earlier);
            true
        } else {
            false
        }
    });
}

fn run_schema() -> SchemaRef {
    Arc::new(ArrowSchema::new(vec![
        Field::new("row", DataType::Binary, false),
        Field::new("column", DataType::Binary, false),
        Field::new("value", DataType::Binary, false),
        Field::new("seq", DataType::UInt64, false),
    ]))
}

/// Key range and size of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cells: u64,
    pub first_row: Vec<u8>,
    pub last_row: Vec<u8>,
}

/// Streams sorted entries into a new Parquet run.
pub struct RunWriter {
    writer: ArrowWriter<File>,
    schema: SchemaRef,
    pending: Vec<SortEntry>,
    batch_size: usize,
    summary: RunSummary,
}

impl RunWriter {
    pub fn create(path: &Path, batch_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create_new(path)
            .with_context(|| format!("Failed to create run file: {:?}", path))?;
        let schema = run_schema();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
        Ok(Self {
            writer,
            schema,
            pending: Vec::with_capacity(batch_size),
            batch_size,
            summary: RunSummary::default(),
        })
    }

    pub fn push(&mut self, entry: SortEntry) -> Result<()> {
        if self.summary.cells == 0 {
            self.summary.first_row = entry.row.clone();
        }
        if self.summary.last_row != entry.row {
            self.summary.last_row = entry.row.clone();
        }
        self.summary.cells += 1;
        self.pending.push(entry);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rows = BinaryArray::from_iter_values(self.pending.iter().map(|e| e.row.as_slice()));
        let columns =
            BinaryArray::from_iter_values(self.pending.iter().map(|e| e.column.as_slice()));
        let values = BinaryArray::from_iter_values(self.pending.iter().map(|e| e.value.as_slice()));
        let seqs = UInt64Array::from_iter_values(self.pending.iter().map(|e| e.seq));

        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![
                Arc::new(rows) as ArrayRef,
                Arc::new(columns) as ArrayRef,
                Arc::new(values) as ArrayRef,
                Arc::new(seqs) as ArrayRef,
            ],
        )?;
        self.writer.write(&batch)?;
        self.pending.clear();
        Ok(())
    }

    pub fn finish(mut self) -> Result<RunSummary> {
        self.flush()?;
        self.writer.close()?;
        Ok(self.summary)
    }
}

/// Iterates the entries of a run file batch by batch.
pub struct RunReader {
    reader: ParquetRecordBatchReader,
    current_batch_iter: std::vec::IntoIter<SortEntry>,
}

impl RunReader {
    pub fn open(path: &Path, batch_size: usize) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open run file: {:?}", path))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(batch_size)
            .build()?;
        Ok(Self {
            reader,
            current_batch_iter: Vec::new().into_iter(),
        })
    }

    fn process_batch(batch: RecordBatch) -> Result<Vec<SortEntry>> {
        let binary = |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|col| col.as_any().downcast_ref::<BinaryArray>())
                .with_context(|| format!("Failed to downcast '{name}' column"))
        };
        let rows = binary("row")?;
        let columns = binary("column")?;
        let values = binary("value")?;
        let seqs = batch
            .column_by_name("seq")
            .and_then(|col| col.as_any().downcast_ref::<UInt64Array>())
            .context("Failed to downcast 'seq' column")?;

        if rows.null_count() + columns.null_count() + values.null_count() + seqs.null_count() > 0 {
            anyhow::bail!("Found null in run file");
        }

        Ok((0..batch.num_rows())
            .map(|i| SortEntry {
                row: rows.value(i).to_vec(),
                column: columns.value(i).to_vec(),
                value: values.value(i).to_vec(),
                seq: seqs.value(i),
            })
            .collect())
    }
}

impl Iterator for RunReader {
    type Item = Result<SortEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.current_batch_iter.next() {
            return Some(Ok(entry));
        }

        loop {
            match self.reader.next()? {
                Ok(batch) => match Self::process_batch(batch) {
                    Ok(entries) => self.current_batch_iter = entries.into_iter(),
                    Err(e) => return Some(Err(e)),
                },
                Err(e) => return Some(Err(e.into())),
            }
            if let Some(entry) = self.current_batch_iter.next() {
                return Some(Ok(entry));
            }
        }
    }
}

struct HeapItem {
    entry: SortEntry,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .cmp(&other.entry)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// K-way merge of sorted entry streams into one sorted stream.
pub struct KWayMerge<I: Iterator<Item = Result<SortEntry>>> {
    sources: Vec<I>,
    heap: BinaryHeap<Reverse<HeapItem>>,
}

impl<I: Iterator<Item = Result<SortEntry>>> KWayMerge<I> {
    /// Seeds the heap with the head of every non-empty source.
    pub fn new(mut sources: Vec<I>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (source, stream) in sources.iter_mut().enumerate() {
            if let Some(entry) = stream.next() {
                heap.push(Reverse(HeapItem {
                    entry: entry?,
                    source,
                }));
            }
        }
        Ok(Self { sources, heap })
    }
}

impl<I: Iterator<Item = Result<SortEntry>>> Iterator for KWayMerge<I> {
    type Item = Result<SortEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(HeapItem { entry, source }) = self.heap.pop()?;
        match self.sources[source].next() {
            Some(Ok(next)) => self.heap.push(Reverse(HeapItem {
                entry: next,
                source,
            })),
            Some(Err(e)) => return Some(Err(e)),
            None => {}
        }
        Some(Ok(entry))
    }
}

/// Keeps only the last of consecutive entries for the same cell.
pub struct LatestCells<I: Iterator<Item = Result<SortEntry>>> {
    inner: Peekable<I>,
}

impl<I: Iterator<Item = Result<SortEntry>>> LatestCells<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner: inner.peekable(),
        }
    }
}

impl<I: Iterator<Item = Result<SortEntry>>> Iterator for LatestCells<I> {
    type Item = Result<SortEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut current = match self.inner.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        while let Some(item) = self
            .inner
            .next_if(|item| matches!(item, Ok(next) if next.same_cell(&current)))
        {
            if let Ok(next) = item {
                current = next;
            }
        }
        Some(Ok(current))
    }
}

/// Merges `inputs` into a new run at `output`, keeping the latest version of
/// every cell. The inputs are left in place.
pub fn merge_runs(inputs: &[PathBuf], output: &Path, batch_size: usize) -> Result<RunSummary> {
    let readers = inputs
        .iter()
        .map(|path| RunReader::open(path, batch_size))
        .collect::<Result<Vec<_>>>()?;
    let mut writer = RunWriter::create(output, batch_size)?;
    for entry in LatestCells::new(KWayMerge::new(readers)?) {
        writer.push(entry?)?;
    }
    writer.finish()
}
