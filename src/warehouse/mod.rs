// src/warehouse/mod.rs

pub mod client;
pub mod types;
pub mod upload;

pub use client::BigQueryClient;
pub use types::*;

use crate::error::WarehouseError;
use std::{fmt, path::Path};

/// Data handed to a load job.
///
/// Files are streamed from disk as-is, so gzip input stays compressed on the
/// wire and BigQuery decompresses it.
#[derive(Debug, Clone, Copy)]
pub enum LoadSource<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

impl fmt::Display for LoadSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::Bytes(bytes) => write!(f, "{} in-memory bytes", bytes.len()),
            LoadSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// The data-warehouse operations the uploader relies on.
///
/// An implementation is bound to a single project and dataset; table ids are
/// resolved inside that dataset. All calls block until the server answers.
pub trait Warehouse {
    fn project_id(&self) -> &str;

    fn dataset_id(&self) -> &str;

    fn get_table(&self, table_id: &str) -> Result<Table, WarehouseError>;

    fn create_table(&self, table_id: &str, schema: &TableSchema) -> Result<Table, WarehouseError>;

    fn list_tables(&self) -> Result<Vec<TableReference>, WarehouseError>;

    /// Submit a load job reading its rows from `source`.
    fn run_load_job(
        &self,
        load: &JobConfigurationLoad,
        source: LoadSource<'_>,
    ) -> Result<Job, WarehouseError>;

    fn get_job(&self, job_id: &str) -> Result<Job, WarehouseError>;

    fn stream_insert_row(
        &self,
        table_id: &str,
        request: &InsertAllRequest,
    ) -> Result<InsertAllResponse, WarehouseError>;

    fn run_query(&self, request: &QueryRequest) -> Result<QueryResponse, WarehouseError>;

    fn table_ref(&self, table_id: &str) -> TableReference {
        TableReference {
            project_id: self.project_id().to_string(),
            dataset_id: self.dataset_id().to_string(),
            table_id: table_id.to_string(),
        }
    }
}
