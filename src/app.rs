// src/app.rs

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::{load_schema, UploadConfig};
use crate::history::HistoryStore;
use crate::jobs::JobPoller;
use crate::orchestrator::{UploadOrchestrator, UploadOutcome};
use crate::tables::TableManager;
use crate::uploader::Uploader;
use crate::warehouse::Warehouse;

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("Total time taken: {:02} min, {:02} sec", secs / 60, secs % 60)
}

/// Everything a run does once the client exists.
///
/// The history table is bootstrapped first, then tables are listed, the
/// target table is created and the file is uploaded, each only when asked for.
pub fn run(config: &UploadConfig, warehouse: &dyn Warehouse) -> Result<Option<UploadOutcome>> {
    let started = Instant::now();
    let result = run_steps(config, warehouse);
    info!("{}", format_elapsed(started.elapsed()));
    result
}

fn run_steps(config: &UploadConfig, warehouse: &dyn Warehouse) -> Result<Option<UploadOutcome>> {
    let tables = TableManager::new(warehouse);
    tables.bootstrap_history()?;

    if config.list_tables {
        for table in tables.list_tables()? {
            println!("{table}");
        }
    }

    if config.create_table {
        if let Some(schema_file) = &config.schema_file {
            let schema = load_schema(schema_file)?;
            tables.create_table(&config.target.table_id, &schema)?;
        }
    }

    let mut outcome = None;
    if let Some(bq_file) = &config.bq_file {
        info!(
            file = %bq_file.display(),
            table = %config.target,
            upload_type = %config.upload_type,
            streaming = config.streaming_upload,
            "uploading"
        );
        let poller = JobPoller::new(config.polling_interval, config.polling_timeout);
        let uploader = Uploader::from_config(config);
        let orchestrator =
            UploadOrchestrator::new(warehouse, HistoryStore::new(warehouse, poller), &uploader);
        outcome = Some(orchestrator.upload(bq_file, config.upload_type)?);
    }
    Ok(outcome)
}
