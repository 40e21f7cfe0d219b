use project_root::get_project_root;

use clap::Parser;
use figment::{
    Figment,
    providers::{Format, Toml},
};
use logload_model::Schema;

use std::path::{Path, PathBuf};

/// A single, unified struct holding all application settings.
/// It is deserialized from the TOML file.
#[derive(serde::Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub bulk_loader: BulkLoaderConfig,
    pub dataset: DatasetConfig,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct PathsConfig {
    /// Extract to load: a directory of splits or a single file.
    pub input_dir: PathBuf,
    /// Owned by one run and cleared before it starts.
    pub staging_dir: PathBuf,
    pub store_dir: PathBuf,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct BulkLoaderConfig {
    /// Worker threads per parallel stage; 0 picks the available parallelism.
    #[serde(default)]
    pub num_threads: usize,
    /// Cells a map worker buffers before sorting and spilling a run.
    #[serde(default = "default_spill_threshold_cells")]
    pub spill_threshold_cells: usize,
    /// Runs merged at once; more runs cost extra merge passes.
    #[serde(default = "default_merge_fan_in")]
    pub merge_fan_in: usize,
    /// Rows per Parquet record batch in spill and sorted runs.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Attempts per file when the store's boundaries move during commit.
    #[serde(default = "default_commit_attempts")]
    pub commit_attempts: usize,
    /// Skip generation and adopt the files listed in the staging manifest.
    #[serde(default)]
    pub commit_only: bool,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct DatasetConfig {
    pub name: String,
    pub column_group: String,
    pub delimiter: char,
    /// Field order of the extract; the first column is the row key.
    pub columns: Vec<String>,
}

impl DatasetConfig {
    pub fn schema(&self) -> anyhow::Result<Schema> {
        Ok(Schema::new(&self.columns, &self.column_group, self.delimiter)?)
    }
}

fn default_spill_threshold_cells() -> usize {
    4_000_000
}

fn default_merge_fan_in() -> usize {
    64
}

fn default_batch_size() -> usize {
    8_192
}

fn default_commit_attempts() -> usize {
    3
}

/// Parses command-line arguments using the clap derive macro.
#[derive(Parser, Debug, Default)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Settings file; defaults to `config/settings.toml` in the project root.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(short, long)]
    pub num_threads: Option<usize>,
    /// Retry adoption of an already generated staging directory.
    #[arg(long)]
    pub commit_only: bool,
}

/// Loads configuration from the TOML file and merges it with CLI arguments.
pub fn get_config() -> anyhow::Result<Config> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => get_project_root()?.join("config/settings.toml"),
    };
    load_config(&config_path, &cli)
}

pub fn load_config(config_path: &Path, cli: &Cli) -> anyhow::Result<Config> {
    if !config_path.exists() {
        anyhow::bail!("configuration file not found: {}", config_path.display());
    }
    let mut figment = Figment::new().merge(Toml::file(config_path));

    if let Some(cli_threads) = cli.num_threads {
        figment = figment.merge(("bulk_loader.num_threads", cli_threads));
    }
    if cli.commit_only {
        figment = figment.merge(("bulk_loader.commit_only", true));
    }

    let mut config: Config = figment.extract()?;

    if config.bulk_loader.num_threads == 0 {
        let num_threads = std::thread::available_parallelism()?.get();
        config.bulk_loader.num_threads = num_threads;
    }
    if config.bulk_loader.merge_fan_in < 2 {
        anyhow::bail!("bulk_loader.merge_fan_in must be at least 2");
    }
    if config.bulk_loader.spill_threshold_cells == 0 || config.bulk_loader.batch_size == 0 {
        anyhow::bail!("bulk_loader.spill_threshold_cells and batch_size must be positive");
    }
    config.bulk_loader.commit_attempts = config.bulk_loader.commit_attempts.max(1);
    config.paths.validate()?;

    Ok(config)
}

impl PathsConfig {
    /// The staging directory is wiped on every run, so it must not hold the
    /// input or the store.
    fn validate(&self) -> anyhow::Result<()> {
        for (name, path) in [("input_dir", &self.input_dir), ("store_dir", &self.store_dir)] {
            if path.starts_with(&self.staging_dir) {
                anyhow::bail!(
                    "paths.{name} ({}) lies inside paths.staging_dir ({})",
                    path.display(),
                    self.staging_dir.display()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"
[logging]
level = "debug"

[paths]
input_dir = "/data/tbl_logs"
staging_dir = "/data/output_hfile/tbl_logs"
store_dir = "/data/store"

[bulk_loader]
num_threads = 4
merge_fan_in = 8

[dataset]
name = "tbl_logs"
column_group = "detail"
delimiter = "\t"
columns = ["id", "log_id", "remote_ip"]
"#;

    #[test]
    fn cli_overrides_file_settings() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, SETTINGS)?;

        let config = load_config(&path, &Cli::default())?;
        assert_eq!(config.bulk_loader.num_threads, 4);
        assert_eq!(config.bulk_loader.merge_fan_in, 8);
        assert_eq!(config.bulk_loader.commit_attempts, 3);
        assert!(!config.bulk_loader.commit_only);
        assert_eq!(config.dataset.delimiter, '\t');
        assert_eq!(config.dataset.schema()?.field_count(), 3);

        let cli = Cli {
            num_threads: Some(2),
            commit_only: true,
            ..Cli::default()
        };
        let config = load_config(&path, &cli)?;
        assert_eq!(config.bulk_loader.num_threads, 2);
        assert!(config.bulk_loader.commit_only);
        Ok(())
    }

    #[test]
    fn zero_threads_means_available_parallelism() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, SETTINGS.replace("num_threads = 4", "num_threads = 0"))?;

        let config = load_config(&path, &Cli::default())?;
        assert_eq!(
            config.bulk_loader.num_threads,
            std::thread::available_parallelism()?.get()
        );
        Ok(())
    }

    #[test]
    fn staging_may_not_contain_the_store() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            SETTINGS.replace("store_dir = \"/data/store\"", "store_dir = \"/data/output_hfile/tbl_logs/db\""),
        )?;
        assert!(load_config(&path, &Cli::default()).is_err());
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config(Path::new("/nonexistent/settings.toml"), &Cli::default());
        assert!(err.is_err());
    }
}
