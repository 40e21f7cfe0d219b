use anyhow::Result;
use bulk_loader::application::report::RunReport;
use bulk_loader::application::service::{BulkLoaderService, PipelineError};
use bulk_loader::config::get_config;
use bulk_loader::infrastructure::{
    committer::BulkCommitter, generator::RocksSstGenerator, sorter::ExternalSorter,
    staging::StagingLayout,
};
use logload_store::{LocalStore, Store, StoreError};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::Arc;

fn setup_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.parse()?)
        .from_env_lossy();

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

fn main() -> Result<()> {
    let config = get_config()?;
    setup_tracing(&config.logging.level)?;
    tracing::info!("Configuration loaded successfully");

    tracing::info!("Starting bulk_loader...");
    tracing::debug!(?config, "Full application configuration");

    let schema = Arc::new(config.dataset.schema()?);
    let store = Arc::new(LocalStore::open(&config.paths.store_dir)?);
    if store.dataset() != config.dataset.name || store.column_group() != schema.column_group() {
        anyhow::bail!(
            "store at {:?} holds {}:{}, not {}:{}",
            config.paths.store_dir,
            store.dataset(),
            store.column_group(),
            config.dataset.name,
            schema.column_group()
        );
    }

    let sorter = ExternalSorter::new(&config, schema);
    let sst_generator = RocksSstGenerator::new(&config);
    let committer = BulkCommitter::new(store.clone(), &config);
    let staging = StagingLayout::new(&config.paths.staging_dir);

    let service = BulkLoaderService::new(sorter, sst_generator, committer, store.clone(), staging);

    let result = if config.bulk_loader.commit_only {
        service.commit_only()
    } else {
        service.run()
    };
    drop(service);
    let closed = match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => Ok(()),
    };

    let status = finish(result, closed);
    if status != 0 {
        std::process::exit(status);
    }
    Ok(())
}

/// Logs how the run ended and returns the process exit status. A store that
/// fails to close does not mask a pipeline error.
fn finish(result: Result<RunReport, PipelineError>, closed: Result<(), StoreError>) -> i32 {
    if let Err(e) = &closed {
        tracing::error!("Failed to close the store: {}", e);
    }

    match result {
        Ok(report) => {
            report.log_summary();
            if closed.is_err() {
                return 1;
            }
            tracing::info!("Bulk loading completed successfully, data is now queryable");
            0
        }
        Err(e) => {
            tracing::error!("Application finished with an error: {}", e);
            if let PipelineError::Commit(report) = &e {
                for failed in &report.failed {
                    tracing::error!(
                        file_id = %failed.file_id,
                        path = ?failed.path,
                        "Not adopted: {}",
                        failed.error
                    );
                }
                tracing::error!("Rerun with --commit-only to retry the remaining files");
            }
            e.exit_code()
        }
    }
}
