use anyhow::{Context, Result};
use logload_model::key::{encode_cell_key, encode_cell_value};
use rayon::prelude::*;

use std::{fs, path::Path};

use crate::{
    application::ports::{RunContext, SortedRun, SstGenerator, StagedFile},
    config::Config,
    infrastructure::{spill::RunReader, sst::write_cell_file},
};

// --- Public Struct ---

/// An adapter that implements the `SstGenerator` port.
///
/// Every sorted run is turned into exactly one SST file under
/// `<staging>/<column_group>/`, with one writer per partition running in
/// parallel. Each cell is stamped with the run's version.
pub struct RocksSstGenerator {
    column_group: String,
    num_threads: usize,
    batch_size: usize,
}

impl RocksSstGenerator {
    pub fn new(config: &Config) -> Self {
        Self::with_settings(
            &config.dataset.column_group,
            config.bulk_loader.num_threads,
            config.bulk_loader.batch_size,
        )
    }

    pub fn with_settings(column_group: &str, num_threads: usize, batch_size: usize) -> Self {
        Self {
            column_group: column_group.to_string(),
            num_threads,
            batch_size,
        }
    }
}

// --- Port Implementation ---

impl SstGenerator for RocksSstGenerator {
    fn run(&self, context: &RunContext, runs: &[SortedRun]) -> Result<Vec<StagedFile>> {
        let out_dir = context.staging.files_dir(&self.column_group);
        fs::create_dir_all(&out_dir)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()?;
        let files = pool.install(|| {
            runs.par_iter()
                .map(|run| self.generate_sst_file(context.version, run, &out_dir))
                .collect::<Result<Vec<_>>>()
        })?;

        tracing::info!(files = files.len(), "SST files written to {:?}", out_dir);
        Ok(files)
    }
}

// --- Core Logic ---

/// Stable identity of the file generated for `partition_id` in run `version`.
pub fn file_id(version: u64, partition_id: u64) -> String {
    format!("{version}-p{partition_id:06}")
}

impl RocksSstGenerator {
    fn generate_sst_file(&self, version: u64, run: &SortedRun, out_dir: &Path) -> Result<StagedFile> {
        let file_id = file_id(version, run.partition.id);
        let path = out_dir.join(format!("{file_id}.sst"));
        tracing::debug!(partition = %run.partition, "Generating SST file at {:?}...", path);

        let cells = RunReader::open(&run.path, self.batch_size)?.map(|entry| {
            entry.map(|e| {
                (
                    encode_cell_key(&e.row, &e.column),
                    encode_cell_value(version, &e.value),
                )
            })
        });
        let summary = write_cell_file(&path, cells)?
            .with_context(|| format!("Sorted run {:?} holds no cells", run.path))?;

        if !run.partition.contains(&summary.first_row) || !run.partition.contains(&summary.last_row) {
            fs::remove_file(&path)?;
            anyhow::bail!(
                "SST file {:?} straddles the boundaries of {}",
                path,
                run.partition
            );
        }

        Ok(StagedFile {
            file_id,
            partition_id: run.partition.id,
            path,
            first_row: summary.first_row,
            last_row: summary.last_row,
            cells: summary.cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::spill::{RunWriter, SortEntry};
    use crate::infrastructure::sst::CellFileReader;
    use crate::infrastructure::staging::StagingLayout;
    use logload_model::{PartitionMap, key::decode_cell_value};

    fn sorted_run(dir: &Path, partitions: &PartitionMap, idx: usize, rows: &[&str]) -> Result<SortedRun> {
        let partition = partitions.get(idx).clone();
        let path = dir.join(format!("p{}.parquet", partition.id));
        let mut writer = RunWriter::create(&path, 4)?;
        for (seq, row) in rows.iter().enumerate() {
            writer.push(SortEntry {
                row: row.as_bytes().to_vec(),
                column: b"name".to_vec(),
                value: format!("v{row}").into_bytes(),
                seq: seq as u64,
            })?;
        }
        let summary = writer.finish()?;
        Ok(SortedRun {
            partition,
            path,
            cells: summary.cells,
            first_row: summary.first_row,
            last_row: summary.last_row,
        })
    }

    #[test]
    fn one_file_per_run_with_version() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = StagingLayout::new(dir.path().join("staging"));
        staging.prepare()?;
        let partitions = PartitionMap::from_split_keys(&["m"])?;
        let runs = vec![
            sorted_run(dir.path(), &partitions, 0, &["a", "b"])?,
            sorted_run(dir.path(), &partitions, 1, &["x", "y", "z"])?,
        ];
        let context = RunContext {
            version: 77,
            partitions,
            staging: staging.clone(),
        };

        let files = RocksSstGenerator::with_settings("detail", 2, 4).run(&context, &runs)?;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_id, "77-p000000");
        assert_eq!(files[1].partition_id, 1);
        assert_eq!(files[1].first_row, b"x");
        assert_eq!(files[1].last_row, b"z");
        assert!(files[1].path.starts_with(staging.files_dir("detail")));

        let reader = CellFileReader::open(&files[1].path, "detail", dir.path())?;
        let cells: Vec<_> = reader.cells_in(b"", b"")?.collect::<Result<_>>()?;
        assert_eq!(cells.len(), 3);
        assert_eq!(decode_cell_value(&cells[0].1)?, (77, &b"vx"[..]));
        Ok(())
    }

    #[test]
    fn run_straddling_its_partition_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let staging = StagingLayout::new(dir.path().join("staging"));
        staging.prepare()?;
        let partitions = PartitionMap::from_split_keys(&["m"])?;
        let runs = vec![sorted_run(dir.path(), &partitions, 0, &["a", "q"])?];
        let context = RunContext {
            version: 1,
            partitions,
            staging: staging.clone(),
        };

        let generator = RocksSstGenerator::with_settings("detail", 1, 4);
        assert!(generator.run(&context, &runs).is_err());
        assert!(!staging.files_dir("detail").join("1-p000000.sst").exists());
        Ok(())
    }
}
