// src/history.rs

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::{fmt, str::FromStr};
use tracing::info;

use crate::jobs::JobPoller;
use crate::warehouse::{
    JobConfigurationLoad, LoadSource, QueryParameter, QueryRequest, TableFieldSchema, TableSchema,
    Warehouse, WriteDisposition,
};

/// Bookkeeping table living next to the target table.
pub const UPLOAD_HISTORY_TABLE_ID: &str = "upload_history";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Started,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Started => "STARTED",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STARTED" => Ok(UploadStatus::Started),
            "COMPLETED" => Ok(UploadStatus::Completed),
            "FAILED" => Ok(UploadStatus::Failed),
            other => bail!("unknown upload status `{other}`"),
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of data a file carries; decides dedup and timestamp rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadType {
    Census,
    Extension,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadType::Census => "census",
            UploadType::Extension => "extension",
        }
    }
}

impl FromStr for UploadType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "census" => Ok(UploadType::Census),
            "extension" => Ok(UploadType::Extension),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for UploadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadFileInfo {
    pub name: String,
    #[serde(rename = "sizeInMB")]
    pub size_in_mb: f64,
    #[serde(serialize_with = "micros")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub upload_type: UploadType,
}

/// One row of the upload history. Rows are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub status: UploadStatus,
    #[serde(rename = "timestamp", serialize_with = "micros")]
    pub recorded_at: DateTime<Utc>,
    pub file: UploadFileInfo,
}

impl UploadRecord {
    /// Same file info, new status, stamped now.
    pub fn transition(file: &UploadFileInfo, status: UploadStatus) -> Self {
        Self {
            status,
            recorded_at: Utc::now().trunc_subsecs(6),
            file: file.clone(),
        }
    }
}

/// TIMESTAMP columns hold microseconds; finer fractions fail the load.
fn micros<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// Fixed schema of the history table.
pub fn history_schema() -> TableSchema {
    TableSchema {
        fields: vec![
            TableFieldSchema::new("status", "STRING"),
            TableFieldSchema::new("timestamp", "TIMESTAMP"),
            TableFieldSchema::record(
                "file",
                vec![
                    TableFieldSchema::new("name", "STRING"),
                    TableFieldSchema::new("sizeInMB", "FLOAT"),
                    TableFieldSchema::new("timestamp", "TIMESTAMP"),
                    TableFieldSchema::new("type", "STRING"),
                ],
            ),
        ],
    }
}

/// The upload event log stored in `UPLOAD_HISTORY_TABLE_ID`.
pub struct HistoryStore<'a> {
    warehouse: &'a dyn Warehouse,
    poller: JobPoller,
}

impl<'a> HistoryStore<'a> {
    pub fn new(warehouse: &'a dyn Warehouse, poller: JobPoller) -> Self {
        Self { warehouse, poller }
    }

    /// Every status ever recorded for `file_name`, in no particular order.
    pub fn previous_statuses(&self, file_name: &str) -> Result<Vec<UploadStatus>> {
        let sql = format!(
            "SELECT status FROM `{}.{}.{}` WHERE file.name = @file_name",
            self.warehouse.project_id(),
            self.warehouse.dataset_id(),
            UPLOAD_HISTORY_TABLE_ID
        );
        let request =
            QueryRequest::standard(sql, vec![QueryParameter::string("file_name", file_name)]);
        let response = self
            .warehouse
            .run_query(&request)
            .with_context(|| format!("querying upload history for {file_name}"))?;
        if response.job_complete == Some(false) {
            bail!("upload history query for {file_name} did not complete in time");
        }

        let mut statuses = Vec::new();
        for row in &response.rows {
            for cell in &row.f {
                let Some(s) = cell.v.as_str() else {
                    continue;
                };
                let status = s
                    .parse::<UploadStatus>()
                    .with_context(|| format!("upload history row for {file_name}"))?;
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    /// Durably append one record; returns only once the load job is DONE.
    pub fn append(&self, record: &UploadRecord) -> Result<()> {
        info!(
            table = UPLOAD_HISTORY_TABLE_ID,
            file = %record.file.name,
            status = %record.status,
            "recording upload status"
        );
        let mut line = serde_json::to_vec(record).context("serialising upload record")?;
        line.push(b'\n');
        let load = JobConfigurationLoad::ndjson(
            self.warehouse.table_ref(UPLOAD_HISTORY_TABLE_ID),
            WriteDisposition::WriteAppend,
        );
        self.poller
            .run_load(self.warehouse, &load, LoadSource::Bytes(&line))
            .with_context(|| {
                format!(
                    "recording {} for {} in {}",
                    record.status, record.file.name, UPLOAD_HISTORY_TABLE_ID
                )
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWarehouse;
    use chrono::{TimeZone, Timelike};
    use serde_json::json;
    use std::time::Duration;

    fn file_info(name: &str) -> UploadFileInfo {
        UploadFileInfo {
            name: name.to_string(),
            size_in_mb: 1.5,
            timestamp: Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap(),
            upload_type: UploadType::Census,
        }
    }

    #[test]
    fn test_record_wire_shape() {
        let rec = UploadRecord {
            status: UploadStatus::Started,
            recorded_at: Utc.with_ymd_and_hms(2023, 4, 2, 10, 30, 0).unwrap(),
            file: file_info("usage.20230401.gz"),
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(
            v,
            json!({
                "status": "STARTED",
                "timestamp": "2023-04-02T10:30:00.000000Z",
                "file": {
                    "name": "usage.20230401.gz",
                    "sizeInMB": 1.5,
                    "timestamp": "2023-04-01T00:00:00.000000Z",
                    "type": "CENSUS"
                }
            })
        );
    }

    #[test]
    fn test_timestamps_never_exceed_microseconds() {
        let at = Utc
            .with_ymd_and_hms(2023, 4, 2, 10, 30, 0)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();
        let rec = UploadRecord {
            status: UploadStatus::Completed,
            recorded_at: at,
            file: UploadFileInfo {
                timestamp: at,
                ..file_info("usage.20230401.gz")
            },
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["timestamp"], json!("2023-04-02T10:30:00.123456Z"));
        assert_eq!(v["file"]["timestamp"], json!("2023-04-02T10:30:00.123456Z"));

        let fresh = UploadRecord::transition(&file_info("a.json"), UploadStatus::Started);
        assert_eq!(fresh.recorded_at.nanosecond() % 1_000, 0);
    }

    #[test]
    fn test_status_and_type_parsing() {
        assert_eq!("completed".parse::<UploadStatus>().unwrap(), UploadStatus::Completed);
        assert!("DONE".parse::<UploadStatus>().is_err());
        assert_eq!("Census".parse::<UploadType>().unwrap(), UploadType::Census);
        assert_eq!("bogus".parse::<UploadType>(), Err("bogus".to_string()));
    }

    #[test]
    fn test_history_schema_has_nested_file_record() {
        let schema = history_schema();
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["status", "timestamp", "file"]);
        let file = &schema.fields[2];
        assert_eq!(file.field_type, "RECORD");
        assert_eq!(file.fields.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn test_append_then_query() {
        let wh = FakeWarehouse::new();
        let store = HistoryStore::new(&wh, JobPoller::new(Duration::ZERO, None));
        let info = file_info("usage.20230401.gz");

        assert!(store.previous_statuses(&info.name).unwrap().is_empty());
        store
            .append(&UploadRecord::transition(&info, UploadStatus::Started))
            .unwrap();
        store
            .append(&UploadRecord::transition(&info, UploadStatus::Failed))
            .unwrap();

        let mut statuses = store.previous_statuses(&info.name).unwrap();
        statuses.sort_by_key(|s| s.as_str());
        assert_eq!(statuses, vec![UploadStatus::Failed, UploadStatus::Started]);
        assert!(store.previous_statuses("other.20230401.gz").unwrap().is_empty());

        let query = wh.last_query().unwrap();
        assert!(query.query.contains("`proj.ds.upload_history`"));
        assert_eq!(query.query_parameters[0].parameter_value.value, info.name);
    }

    #[test]
    fn test_append_failure_propagates() {
        let wh = FakeWarehouse::new();
        wh.fail_loads_into(UPLOAD_HISTORY_TABLE_ID);
        let store = HistoryStore::new(&wh, JobPoller::new(Duration::ZERO, None));

        let err = store
            .append(&UploadRecord::transition(&file_info("a.20230401.gz"), UploadStatus::Started))
            .unwrap_err();
        assert!(format!("{err:#}").contains("recording STARTED"));
    }

    #[test]
    fn test_unknown_status_in_history_is_fatal() {
        let wh = FakeWarehouse::new();
        wh.seed_raw_status("a.20230401.gz", "WHATEVER");
        let store = HistoryStore::new(&wh, JobPoller::new(Duration::ZERO, None));
        assert!(store.previous_statuses("a.20230401.gz").is_err());
    }
}
