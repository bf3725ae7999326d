// src/uploader/streaming.rs

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::{io::BufRead, path::Path};
use tracing::{error, info, warn};

use crate::ndjson;
use crate::warehouse::{InsertAllRequest, InsertRow, Warehouse};

/// Per-line outcome counts of a streaming upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub lines: usize,
    pub inserted: usize,
    pub malformed: usize,
    pub failed: usize,
}

/// Sends each line as its own insertAll request.
///
/// A bad line or a rejected row is logged and skipped; only failing to read
/// the file aborts the upload.
#[derive(Debug, Clone)]
pub struct StreamingUploader {
    table_id: String,
    insert_id_field: Option<String>,
    template_suffix: Option<String>,
}

/// `insertId` from a top-level string or number field.
fn insert_id_for(row: &Map<String, Value>, field: Option<&str>) -> Option<String> {
    match row.get(field?)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl StreamingUploader {
    pub fn new(
        table_id: &str,
        insert_id_field: Option<String>,
        template_suffix: Option<String>,
    ) -> Self {
        Self {
            table_id: table_id.to_string(),
            insert_id_field,
            template_suffix,
        }
    }

    pub fn upload(&self, warehouse: &dyn Warehouse, path: &Path) -> Result<StreamReport> {
        let reader = ndjson::open(path)?;
        let mut report = StreamReport::default();
        info!(
            file = %path.display(),
            table = %warehouse.table_ref(&self.table_id),
            "starting streaming upload"
        );

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line
                .with_context(|| format!("reading line {line_no} of {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            report.lines += 1;

            let json = match serde_json::from_str::<Value>(&line) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    warn!(line = line_no, "skipping line: not a JSON object");
                    report.malformed += 1;
                    continue;
                }
                Err(e) => {
                    warn!(line = line_no, "skipping malformed line: {}", e);
                    report.malformed += 1;
                    continue;
                }
            };

            let row = InsertRow {
                insert_id: insert_id_for(&json, self.insert_id_field.as_deref()),
                json,
            };
            let request = InsertAllRequest::single(row, self.template_suffix.clone());
            match warehouse.stream_insert_row(&self.table_id, &request) {
                Ok(resp) if resp.insert_errors.is_empty() => report.inserted += 1,
                Ok(resp) => {
                    for e in resp.insert_errors.iter().flat_map(|ie| &ie.errors) {
                        error!(line = line_no, "row rejected: {}", e);
                    }
                    report.failed += 1;
                }
                Err(e) => {
                    error!(line = line_no, "insert failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            lines = report.lines,
            inserted = report.inserted,
            malformed = report.malformed,
            failed = report.failed,
            "streaming upload finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWarehouse;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn write_rows(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.json");
        fs::write(&path, body).unwrap();
        (dir, path)
    }

    #[test]
    fn test_insert_id_for() {
        let row = json!({"id": "abc", "n": 42, "nested": {"x": 1}});
        let row = row.as_object().unwrap();
        assert_eq!(insert_id_for(row, Some("id")).as_deref(), Some("abc"));
        assert_eq!(insert_id_for(row, Some("n")).as_deref(), Some("42"));
        assert_eq!(insert_id_for(row, Some("nested")), None);
        assert_eq!(insert_id_for(row, Some("missing")), None);
        assert_eq!(insert_id_for(row, None), None);
    }

    #[test]
    fn test_each_line_is_one_request() {
        let (_dir, path) = write_rows("{\"id\":\"a\"}\n\n{\"id\":\"b\"}\n");
        let wh = FakeWarehouse::new();
        let up = StreamingUploader::new("events", Some("id".into()), Some("_2023".into()));

        let report = up.upload(&wh, &path).unwrap();
        assert_eq!(
            report,
            StreamReport {
                lines: 2,
                inserted: 2,
                malformed: 0,
                failed: 0
            }
        );
        let inserts = wh.inserts();
        assert_eq!(inserts.len(), 2);
        assert_eq!(inserts[0].0, "events");
        assert_eq!(inserts[0].1.rows.len(), 1);
        assert_eq!(inserts[0].1.rows[0].insert_id.as_deref(), Some("a"));
        assert_eq!(inserts[1].1.template_suffix.as_deref(), Some("_2023"));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (_dir, path) = write_rows("{\"id\":1}\nnot json\n[1,2]\n{\"id\":2}\n");
        let wh = FakeWarehouse::new();
        let report = StreamingUploader::new("events", None, None)
            .upload(&wh, &path)
            .unwrap();
        assert_eq!(report.lines, 4);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.inserted, 2);
        assert!(wh.inserts().iter().all(|(_, r)| r.rows[0].insert_id.is_none()));
    }

    #[test]
    fn test_rejected_and_failed_rows_continue() {
        let (_dir, path) = write_rows("{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n");
        let wh = FakeWarehouse::new();
        wh.reject_insert_call(0);
        wh.fail_insert_call(1);
        let report = StreamingUploader::new("events", None, None)
            .upload(&wh, &path)
            .unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(wh.inserts()[0].1.rows[0].json["a"], json!(3));
    }

    #[test]
    fn test_unreadable_file_is_fatal() {
        let wh = FakeWarehouse::new();
        let up = StreamingUploader::new("events", None, None);
        assert!(up.upload(&wh, Path::new("/nonexistent/rows.json")).is_err());
    }
}
