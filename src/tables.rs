// src/tables.rs

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::history::{history_schema, UPLOAD_HISTORY_TABLE_ID};
use crate::warehouse::{Table, TableReference, TableSchema, Warehouse};

pub struct TableManager<'a> {
    warehouse: &'a dyn Warehouse,
}

impl<'a> TableManager<'a> {
    pub fn new(warehouse: &'a dyn Warehouse) -> Self {
        Self { warehouse }
    }

    /// Create `table_id`; an existing table is logged and left alone.
    pub fn create_table(&self, table_id: &str, schema: &TableSchema) -> Result<()> {
        match self.warehouse.create_table(table_id, schema) {
            Ok(table) => {
                info!(table = %table.table_reference, "Table created successfully");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                info!(table = table_id, "Table already exists: {}", e);
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("creating table {table_id}")),
        }
    }

    /// `None` when the table does not exist; every other failure is an error.
    pub fn get_table(&self, table_id: &str) -> Result<Option<Table>> {
        match self.warehouse.get_table(table_id) {
            Ok(table) => Ok(Some(table)),
            Err(e) if e.is_not_found() => {
                warn!(table = table_id, "Table not found");
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("failed to get table {table_id}")),
        }
    }

    pub fn list_tables(&self) -> Result<Vec<TableReference>> {
        self.warehouse.list_tables().context("failed to list tables")
    }

    /// Make sure the upload history table exists before anything else runs.
    pub fn bootstrap_history(&self) -> Result<()> {
        if self.get_table(UPLOAD_HISTORY_TABLE_ID)?.is_none() {
            info!(table = UPLOAD_HISTORY_TABLE_ID, "creating upload history table");
            self.create_table(UPLOAD_HISTORY_TABLE_ID, &history_schema())?;
        }
        Ok(())
    }
}
