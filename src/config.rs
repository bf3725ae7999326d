// src/config.rs

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser};
use serde_json::Value;
use std::{collections::HashSet, fmt, fs, path::Path, path::PathBuf, time::Duration};

use crate::error::ConfigError;
use crate::history::UploadType;
use crate::warehouse::{TableFieldSchema, TableSchema, WriteDisposition};

/// Command-line flags, spelled the way the `-projectId` style CLI expects.
#[derive(Parser, Debug)]
#[command(
    name = "bq-upload",
    about = "Upload newline-delimited JSON into a BigQuery table",
    disable_help_flag = true
)]
pub struct Args {
    /// BigQuery projectId (Required)
    #[arg(long = "projectId")]
    pub project_id: Option<String>,

    /// BigQuery datasetId (Required)
    #[arg(long = "datasetId")]
    pub dataset_id: Option<String>,

    /// BigQuery tableId (Required)
    #[arg(long = "tableId")]
    pub table_id: Option<String>,

    /// BigQuery record file (JSON objects separated by new line, optionally gzipped)
    #[arg(long = "bqFile")]
    pub bq_file: Option<PathBuf>,

    /// BigQuery JSON credential file
    #[arg(long = "credentialFile")]
    pub credential_file: Option<PathBuf>,

    /// Create BigQuery table using provided schema
    #[arg(long = "schemaFile", value_name = "SCHEMA_JSON_FILE")]
    pub schema_file: Option<PathBuf>,

    /// Template suffix to be used with this upload (streaming upload only)
    #[arg(long = "templateSuffix")]
    pub template_suffix: Option<String>,

    /// Top level JSON field to use for insertId (streaming upload only)
    #[arg(long = "insertIdField")]
    pub insert_id_field: Option<String>,

    /// WRITE_APPEND (default), WRITE_EMPTY or WRITE_TRUNCATE
    #[arg(long = "writeDisposition")]
    pub write_disposition: Option<String>,

    /// Create new table using the given -tableId and -schemaFile
    #[arg(long = "createTable", action = ArgAction::Set, num_args = 0..=1,
          default_value_t = false, default_missing_value = "true")]
    pub create_table: bool,

    /// Upload row by row with streaming inserts instead of a load job
    #[arg(long = "streamingUpload", action = ArgAction::Set, num_args = 0..=1,
          default_value_t = false, default_missing_value = "true")]
    pub streaming_upload: bool,

    /// Print every table in the dataset
    #[arg(long = "listTables", action = ArgAction::Set, num_args = 0..=1,
          default_value_t = false, default_missing_value = "true")]
    pub list_tables: bool,

    /// Submitted job polling interval (in seconds)
    #[arg(long = "pollingInterval", default_value_t = 1)]
    pub polling_interval: u64,

    /// Give up waiting for a load job after this many seconds (default: wait forever)
    #[arg(long = "pollingTimeout")]
    pub polling_timeout: Option<u64>,

    /// census or extension
    #[arg(long = "uploadType", default_value = "extension")]
    pub upload_type: String,

    /// Print help message
    #[arg(short = 'h', long = "help", action = ArgAction::Help)]
    pub help: Option<bool>,
}

/// Identifies the destination table for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl fmt::Display for TargetTableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Validated, immutable settings for a run.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub target: TargetTableRef,
    pub bq_file: Option<PathBuf>,
    pub credential_file: Option<PathBuf>,
    pub schema_file: Option<PathBuf>,
    pub template_suffix: Option<String>,
    pub insert_id_field: Option<String>,
    pub write_disposition: WriteDisposition,
    pub create_table: bool,
    pub streaming_upload: bool,
    pub list_tables: bool,
    pub polling_interval: Duration,
    pub polling_timeout: Option<Duration>,
    pub upload_type: UploadType,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingRequired(name))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Args {
    /// Rewrite `-flagName` into `--flagName` for every long flag we know,
    /// then parse. Short `-h` and values are left untouched.
    pub fn parse_from_legacy<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::try_parse_from(normalize_args(args))
    }

    pub fn into_config(self) -> Result<UploadConfig, ConfigError> {
        let project_id = required(self.project_id, "projectId")?;
        let dataset_id = required(self.dataset_id, "datasetId")?;
        let table_id = required(self.table_id, "tableId")?;

        if self.bq_file.is_none() && self.schema_file.is_none() && !self.list_tables {
            return Err(ConfigError::NothingToDo);
        }
        if self.create_table && self.schema_file.is_none() {
            return Err(ConfigError::SchemaFileRequired);
        }

        let write_disposition = match self.write_disposition.as_deref() {
            None => WriteDisposition::default(),
            Some(raw) => WriteDisposition::parse(raw)
                .ok_or_else(|| ConfigError::InvalidWriteDisposition(raw.to_string()))?,
        };
        let upload_type = self
            .upload_type
            .parse::<UploadType>()
            .map_err(ConfigError::InvalidUploadType)?;
        if self.polling_interval == 0 {
            return Err(ConfigError::InvalidPollingInterval);
        }

        Ok(UploadConfig {
            target: TargetTableRef {
                project_id,
                dataset_id,
                table_id,
            },
            bq_file: self.bq_file,
            credential_file: self.credential_file,
            schema_file: self.schema_file,
            template_suffix: non_empty(self.template_suffix),
            insert_id_field: non_empty(self.insert_id_field),
            write_disposition,
            create_table: self.create_table,
            streaming_upload: self.streaming_upload,
            list_tables: self.list_tables,
            polling_interval: Duration::from_secs(self.polling_interval),
            polling_timeout: self.polling_timeout.map(Duration::from_secs),
            upload_type,
        })
    }
}

/// Turn the single-dash long flags (`-projectId x`, `-createTable=true`)
/// into the double-dash form clap understands.
pub fn normalize_args<I, T>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let longs: HashSet<String> = Args::command()
        .get_arguments()
        .filter_map(|a| a.get_long().map(str::to_string))
        .collect();

    args.into_iter()
        .map(Into::into)
        .enumerate()
        .map(|(i, arg)| {
            if i == 0 || arg.starts_with("--") || !arg.starts_with('-') {
                return arg;
            }
            let name = arg[1..].split('=').next().unwrap_or_default();
            if longs.contains(name) {
                format!("-{arg}")
            } else {
                arg
            }
        })
        .collect()
}

/// Load a table schema from either a `{"fields": [...]}` document or a bare
/// field array (the `bq show --schema` format).
pub fn load_schema(path: &Path) -> Result<TableSchema> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading schema file {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse BigQuery schema file {}", path.display()))?;
    let schema = match value {
        Value::Array(_) => TableSchema {
            fields: serde_json::from_value::<Vec<TableFieldSchema>>(value)?,
        },
        other => serde_json::from_value::<TableSchema>(other)?,
    };
    if schema.fields.is_empty() {
        anyhow::bail!("schema file {} defines no fields", path.display());
    }
    Ok(schema)
}
