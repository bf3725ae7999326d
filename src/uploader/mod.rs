// src/uploader/mod.rs

pub mod batch;
pub mod streaming;

use anyhow::Result;
use std::path::Path;

use crate::config::UploadConfig;
use crate::jobs::JobPoller;
use crate::warehouse::Warehouse;

pub use batch::BatchUploader;
pub use streaming::{StreamReport, StreamingUploader};

/// How a file's rows reach the target table.
#[derive(Debug, Clone)]
pub enum Uploader {
    Batch(BatchUploader),
    Streaming(StreamingUploader),
}

/// What a successful transfer did.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferReport {
    Loaded {
        job_id: String,
        output_rows: Option<u64>,
    },
    Streamed(StreamReport),
}

impl Uploader {
    pub fn from_config(config: &UploadConfig) -> Self {
        if config.streaming_upload {
            Uploader::Streaming(StreamingUploader::new(
                &config.target.table_id,
                config.insert_id_field.clone(),
                config.template_suffix.clone(),
            ))
        } else {
            Uploader::Batch(BatchUploader::new(
                &config.target.table_id,
                config.write_disposition,
                JobPoller::new(config.polling_interval, config.polling_timeout),
            ))
        }
    }

    /// Move every row of `path` into the target table.
    pub fn transfer(&self, warehouse: &dyn Warehouse, path: &Path) -> Result<TransferReport> {
        match self {
            Uploader::Batch(b) => b.upload(warehouse, path),
            Uploader::Streaming(s) => s.upload(warehouse, path).map(TransferReport::Streamed),
        }
    }
}
