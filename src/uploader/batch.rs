// src/uploader/batch.rs

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use super::TransferReport;
use crate::jobs::JobPoller;
use crate::warehouse::{JobConfigurationLoad, LoadSource, Warehouse, WriteDisposition};

/// Uploads a whole file as one NDJSON load job. The file is streamed as it
/// sits on disk; gzip input is sent compressed.
#[derive(Debug, Clone)]
pub struct BatchUploader {
    table_id: String,
    write_disposition: WriteDisposition,
    poller: JobPoller,
}

impl BatchUploader {
    pub fn new(table_id: &str, write_disposition: WriteDisposition, poller: JobPoller) -> Self {
        Self {
            table_id: table_id.to_string(),
            write_disposition,
            poller,
        }
    }

    pub fn upload(&self, warehouse: &dyn Warehouse, path: &Path) -> Result<TransferReport> {
        let mut load = JobConfigurationLoad::ndjson(
            warehouse.table_ref(&self.table_id),
            self.write_disposition,
        );
        // Missing target: submit without a schema and let the job decide.
        match warehouse.get_table(&self.table_id) {
            Ok(table) => load.schema = table.schema,
            Err(e) if e.is_not_found() => {
                warn!(table = %load.destination_table, "Table not found, loading without schema");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to get table {}", self.table_id))
            }
        }

        info!(
            file = %path.display(),
            table = %load.destination_table,
            disposition = self.write_disposition.as_str(),
            "starting batch upload"
        );
        let job = self
            .poller
            .run_load(warehouse, &load, LoadSource::File(path))
            .with_context(|| format!("failed to load {}", path.display()))?;
        Ok(TransferReport::Loaded {
            job_id: job.job_id().unwrap_or_default().to_string(),
            output_rows: job.output_rows(),
        })
    }
}
