use anyhow::{Context, Result};
use logload_model::{
    KeyValueProjector, RecordDecoder, Schema, list_extract_files, record::trim_line_terminator,
};
use rayon::prelude::*;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::application::ports::{RunContext, SortOutcome, SortedRun, Sorter};
use crate::application::report::RecordCounts;
use crate::config::Config;
use crate::infrastructure::spill::{RunWriter, SortEntry, keep_latest, merge_runs, sequence};

/// Knobs of the external sort.
#[derive(Debug, Clone)]
pub struct SortSettings {
    pub num_threads: usize,
    pub spill_threshold_cells: usize,
    pub merge_fan_in: usize,
    pub batch_size: usize,
}

impl From<&Config> for SortSettings {
    fn from(config: &Config) -> Self {
        let settings = &config.bulk_loader;
        Self {
            num_threads: settings.num_threads,
            spill_threshold_cells: settings.spill_threshold_cells,
            merge_fan_in: settings.merge_fan_in,
            batch_size: settings.batch_size,
        }
    }
}

/// An adapter that implements the `Sorter` port with a two-phase external
/// sort.
///
/// Map: every split is decoded on its own worker; cells are buffered, and
/// whenever the buffer fills it is sorted, deduplicated and spilled as one
/// Parquet run per partition. Merge: after all splits are done, each
/// partition's runs are k-way merged into its single sorted run.
pub struct ExternalSorter {
    input: PathBuf,
    decoder: RecordDecoder,
    projector: KeyValueProjector,
    settings: SortSettings,
}

impl ExternalSorter {
    pub fn new(config: &Config, schema: Arc<Schema>) -> Self {
        Self::with_settings(&config.paths.input_dir, schema, SortSettings::from(config))
    }

    pub fn with_settings(input: &Path, schema: Arc<Schema>, settings: SortSettings) -> Self {
        Self {
            input: input.to_path_buf(),
            decoder: RecordDecoder::new(schema.clone()),
            projector: KeyValueProjector::new(schema),
            settings,
        }
    }
}

/// What one map worker produced.
#[derive(Debug, Default)]
struct MapOutput {
    counts: RecordCounts,
    /// `(partition index, run file)`
    runs: Vec<(usize, PathBuf)>,
}

impl Sorter for ExternalSorter {
    fn run(&self, context: &RunContext) -> Result<SortOutcome> {
        let splits = list_extract_files(&self.input)
            .with_context(|| format!("Failed to list extract at {:?}", self.input))?;
        tracing::info!(
            splits = splits.len(),
            partitions = context.partitions.len(),
            threads = self.settings.num_threads,
            "Input directory: {:?}",
            self.input
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.num_threads)
            .build()?;

        let mapped = pool.install(|| {
            splits
                .par_iter()
                .enumerate()
                .map(|(split, path)| self.map_split(split, path, context))
                .collect::<Result<Vec<_>>>()
        })?;

        // Every split has been read; merging may start.
        let mut counts = RecordCounts::default();
        let mut runs_by_partition: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
        for output in mapped {
            counts.add(&output.counts);
            for (partition, path) in output.runs {
                runs_by_partition.entry(partition).or_default().push(path);
            }
        }
        tracing::info!(
            processed = counts.processed,
            rejected = counts.rejected,
            cells = counts.cells,
            "Map phase finished"
        );

        let sorted_dir = context.staging.sorted_dir();
        fs::create_dir_all(&sorted_dir)?;
        let groups: Vec<(usize, Vec<PathBuf>)> = runs_by_partition.into_iter().collect();
        let mut runs = pool.install(|| {
            groups
                .into_par_iter()
                .map(|(partition, runs)| {
                    self.merge_partition(partition, runs, context, &sorted_dir)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        runs.sort_by(|a, b| a.partition.start_key.cmp(&b.partition.start_key));

        let spill_dir = context.staging.spill_dir();
        if spill_dir.exists() {
            fs::remove_dir_all(&spill_dir)?;
        }

        Ok(SortOutcome { counts, runs })
    }
}

impl ExternalSorter {
    fn map_split(&self, split: usize, path: &Path, context: &RunContext) -> Result<MapOutput> {
        let file = File::open(path).with_context(|| format!("Failed to open split {:?}", path))?;
        let mut reader = BufReader::new(file);
        let mut buffer = SpillBuffer::new(split, context);
        let mut output = MapOutput::default();
        let mut line = Vec::new();
        let mut line_no = 0u64;

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            line_no += 1;
            output.counts.processed += 1;

            let record = match self.decoder.decode(trim_line_terminator(&line)) {
                Ok(record) => record,
                Err(rejection) => {
                    output.counts.rejected += 1;
                    tracing::trace!(split, line = line_no, %rejection, "Rejected line");
                    continue;
                }
            };
            let partition = context
                .partitions
                .locate(record.row_key())
                .with_context(|| format!("{}:{line_no}", path.display()))?;

            let seq = sequence(split, line_no);
            for cell in self.projector.project(&record) {
                output.counts.cells += 1;
                buffer.push(
                    partition,
                    SortEntry {
                        row: cell.row,
                        column: cell.column,
                        value: cell.value,
                        seq,
                    },
                );
            }
            if buffer.len() >= self.settings.spill_threshold_cells {
                output.runs.extend(buffer.spill(self.settings.batch_size)?);
            }
        }
        output.runs.extend(buffer.spill(self.settings.batch_size)?);

        tracing::debug!(
            split,
            lines = output.counts.processed,
            runs = output.runs.len(),
            "Split mapped: {:?}",
            path
        );
        Ok(output)
    }

    /// Merges one partition's spill runs into its sorted run, in several
    /// passes when there are more runs than the fan-in.
    fn merge_partition(
        &self,
        partition: usize,
        mut runs: Vec<PathBuf>,
        context: &RunContext,
        sorted_dir: &Path,
    ) -> Result<SortedRun> {
        let partition = context.partitions.get(partition).clone();
        let fan_in = self.settings.merge_fan_in;
        let partition_spill = context.staging.spill_dir().join(format!("p{:06}", partition.id));

        let mut pass = 0;
        while runs.len() > fan_in {
            pass += 1;
            tracing::debug!(partition = partition.id, pass, runs = runs.len(), "Intermediate merge");
            let mut merged = Vec::with_capacity(runs.len().div_ceil(fan_in));
            for (group_no, group) in runs.chunks(fan_in).enumerate() {
                if let [single] = group {
                    merged.push(single.clone());
                    continue;
                }
                let path = partition_spill.join(format!("merge{pass}-{group_no}.parquet"));
                merge_runs(group, &path, self.settings.batch_size)?;
                remove_runs(group)?;
                merged.push(path);
            }
            runs = merged;
        }

        let path = sorted_dir.join(format!("p{:06}.parquet", partition.id));
        let summary = merge_runs(&runs, &path, self.settings.batch_size)?;
        remove_runs(&runs)?;

        tracing::debug!(
            partition = %partition,
            cells = summary.cells,
            "Sorted run written"
        );
        Ok(SortedRun {
            partition,
            path,
            cells: summary.cells,
            first_row: summary.first_row,
            last_row: summary.last_row,
        })
    }
}

fn remove_runs(runs: &[PathBuf]) -> Result<()> {
    for run in runs {
        fs::remove_file(run).with_context(|| format!("Failed to remove run {:?}", run))?;
    }
    Ok(())
}

/// A map worker's in-memory cells, spilled as sorted per-partition runs.
struct SpillBuffer<'a> {
    split: usize,
    context: &'a RunContext,
    entries: Vec<(usize, SortEntry)>,
    spills: usize,
}

impl<'a> SpillBuffer<'a> {
    fn new(split: usize, context: &'a RunContext) -> Self {
        Self {
            split,
            context,
            entries: Vec::new(),
            spills: 0,
        }
    }

    fn push(&mut self, partition: usize, entry: SortEntry) {
        self.entries.push((partition, entry));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn spill(&mut self, batch_size: usize) -> Result<Vec<(usize, PathBuf)>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        self.entries.sort_unstable();

        let mut by_partition: BTreeMap<usize, Vec<SortEntry>> = BTreeMap::new();
        for (partition, entry) in self.entries.drain(..) {
            by_partition.entry(partition).or_default().push(entry);
        }

        let mut runs = Vec::with_capacity(by_partition.len());
        for (partition, mut entries) in by_partition {
            keep_latest(&mut entries);
            let id = self.context.partitions.get(partition).id;
            let path = self
                .context
                .staging
                .spill_dir()
                .join(format!("p{id:06}"))
                .join(format!("s{:06}-r{:04}.parquet", self.split, self.spills));
            let mut writer = RunWriter::create(&path, batch_size)?;
            for entry in entries {
                writer.push(entry)?;
            }
            writer.finish()?;
            runs.push((partition, path));
        }
        self.spills += 1;
        Ok(runs)
    }
}
