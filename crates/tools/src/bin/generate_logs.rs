use clap::Parser;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let well_formed = logload_model::generate_extract(
        &config.out_dir,
        config.splits,
        config.lines,
        config.seed,
    )?;
    std::fs::write(config.out_dir.join("_SUCCESS"), b"")?;
    println!(
        "wrote {} lines ({} well-formed) to {}",
        config.splits * config.lines,
        well_formed,
        config.out_dir.display()
    );
    Ok(())
}

/// Writes a synthetic tbl_logs extract.
#[derive(Clone, Debug, Parser)]
#[command()]
struct Config {
    #[arg()]
    out_dir: Box<std::path::Path>,
    /// Number of split files.
    #[arg(short, long, default_value_t = 4)]
    splits: usize,
    /// Lines per split file.
    #[arg(short, long, default_value_t = 100_000)]
    lines: usize,
    #[arg(long)]
    seed: Option<u64>,
}
