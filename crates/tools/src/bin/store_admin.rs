use clap::{Parser, Subcommand};
use logload_store::{LocalStore, Store};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    match config.command {
        Command::Create {
            dataset,
            column_group,
            split_keys,
        } => {
            let store = LocalStore::create(&config.store_dir, &dataset, &column_group, &split_keys)?;
            print_partitions(&store)?;
            store.close()?;
        }
        Command::Split { row } => {
            let store = LocalStore::open(&config.store_dir)?;
            let (left, right) = store.split_partition(row.as_bytes())?;
            println!("split p{left} at {row:?}, new partition p{right}");
            store.close()?;
        }
        Command::Partitions => {
            let store = LocalStore::open(&config.store_dir)?;
            print_partitions(&store)?;
        }
        Command::Get { row } => {
            let store = LocalStore::open(&config.store_dir)?;
            for (column, cell) in store.scan_row(row.as_bytes())? {
                println!(
                    "{}:{}\t{}\t{}",
                    store.column_group(),
                    String::from_utf8_lossy(&column),
                    cell.version,
                    String::from_utf8_lossy(&cell.value)
                );
            }
        }
    }
    Ok(())
}

fn print_partitions(store: &LocalStore) -> anyhow::Result<()> {
    for partition in store.partitions()?.iter() {
        let rows = store.partition_rows(partition.id)?.len();
        println!("{partition}\t{rows} rows");
    }
    Ok(())
}

/// Provisions and inspects a local store.
#[derive(Clone, Debug, Parser)]
#[command()]
struct Config {
    #[arg(short, long)]
    store_dir: Box<std::path::Path>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Create a store pre-split at the given row keys.
    Create {
        #[arg(long, default_value = "tbl_logs")]
        dataset: String,
        #[arg(long, default_value = "detail")]
        column_group: String,
        split_keys: Vec<String>,
    },
    /// Split the partition holding `row` at that key.
    Split { row: String },
    /// List partitions and their row counts.
    Partitions,
    /// Print every cell of one row.
    Get { row: String },
}
