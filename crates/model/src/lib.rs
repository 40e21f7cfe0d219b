pub mod bulk_data;
pub mod error;
pub mod key;
pub mod partition;
pub mod projector;
pub mod record;
pub mod schema;

pub use error::{BoundaryError, KeyError, MappingError, Rejection, SchemaError};
pub use partition::{PartitionDesc, PartitionMap};
pub use projector::{Cell, KeyValueProjector};
pub use record::{Record, RecordDecoder};
pub use schema::Schema;

/// Writes `splits` tab-separated extract files of `lines` lines each into
/// `out_dir`, named like Hive's output (`000000_0`, `000001_0`, ...).
///
/// Returns the number of well-formed lines written.
pub fn generate_extract(
    out_dir: &std::path::Path,
    splits: usize,
    lines: usize,
    seed: Option<u64>,
) -> anyhow::Result<usize> {
    std::fs::create_dir_all(out_dir)?;
    let mut generator = match seed {
        Some(seed) => bulk_data::LogLineGenerator::seeded(seed),
        None => bulk_data::LogLineGenerator::new(),
    };
    let mut well_formed = 0;
    for split in 0..splits {
        let file_path = out_dir.join(format!("{split:06}_0"));
        let file = std::fs::File::create(file_path)?;
        well_formed += write_split_file(file, &mut generator, lines)?;
    }
    Ok(well_formed)
}

fn write_split_file(
    file: std::fs::File,
    generator: &mut bulk_data::LogLineGenerator,
    lines: usize,
) -> anyhow::Result<usize> {
    let mut tsv_file = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .flexible(true)
        .has_headers(false)
        .from_writer(file);
    let mut well_formed = 0;
    for line in generator.take(lines) {
        if line.is_well_formed() {
            well_formed += 1;
        }
        line.serialize_tsv(&mut tsv_file)?;
    }
    tsv_file.flush()?;
    Ok(well_formed)
}

/// Extract splits in processing order. Names starting with `_` or `.` are
/// markers, not data, and are skipped.
pub fn list_extract_files(input: &std::path::Path) -> anyhow::Result<Vec<std::path::PathBuf>> {
    // IMPLEMENTATION NOTES:
    // We iterate over all entries up front to surface any io errors before
    // the first split is handed to a worker.

    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files = vec![];
    for entry in std::fs::read_dir(input)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            anyhow::bail!("non utf-8 file name in extract: {}", path.display());
        };
        if path.is_file() && !name.starts_with('_') && !name.starts_with('.') {
            files.push(path);
        }
    }

    files.sort();

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_extract_decodes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let well_formed = generate_extract(dir.path(), 2, 500, Some(3))?;
        std::fs::write(dir.path().join("_SUCCESS"), b"")?;

        let files = list_extract_files(dir.path())?;
        assert_eq!(files.len(), 2);

        let schema = std::sync::Arc::new(Schema::tbl_logs());
        let decoder = RecordDecoder::new(schema);
        let mut decoded = 0;
        for file in files {
            let text = std::fs::read(file)?;
            decoded += text
                .split(|b| *b == b'\n')
                .filter(|line| !line.is_empty())
                .filter(|line| decoder.decode(line).is_ok())
                .count();
        }
        assert_eq!(decoded, well_formed);
        Ok(())
    }
}
