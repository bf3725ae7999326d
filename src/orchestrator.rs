// src/orchestrator.rs

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::path::Path;
use tracing::{error, info, warn};

use crate::history::{HistoryStore, UploadFileInfo, UploadRecord, UploadStatus, UploadType};
use crate::ndjson;
use crate::uploader::{TransferReport, Uploader};
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Completed(TransferReport),
    /// A census file that already has history rows; nothing was sent.
    SkippedDuplicate { previous: Vec<UploadStatus> },
}

/// `YYYYMMDD`, either alone or after the last `_` of the token.
fn date_token(token: &str) -> Option<&str> {
    let digits = token.rsplit('_').next().unwrap_or(token);
    (digits.len() == 8 && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

/// Date a census file covers, at midnight UTC.
///
/// The date is the second-to-last dot-separated token, looked up again past a
/// trailing `.gz`: `usage.20230401.gz` and `census_20230401.ndjson.gz` both
/// give 2023-04-01.
pub fn census_timestamp(file_name: &str) -> Result<DateTime<Utc>> {
    let tokens: Vec<&str> = file_name.split('.').collect();
    let n = tokens.len();
    if n < 2 {
        bail!("census file name {file_name} has no date token");
    }
    let mut candidates = vec![tokens[n - 2]];
    if n >= 3 && tokens[n - 1].eq_ignore_ascii_case("gz") {
        candidates.push(tokens[n - 3]);
    }
    let Some(digits) = candidates.iter().find_map(|t| date_token(t)) else {
        bail!("census file name {file_name} carries no YYYYMMDD date before its extension");
    };
    let date = NaiveDate::parse_from_str(digits, "%Y%m%d")
        .with_context(|| format!("census file name {file_name}: invalid date `{digits}`"))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

/// Census files carry their date in the name; everything else is stamped `now`.
pub fn file_timestamp(
    file_name: &str,
    upload_type: UploadType,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match upload_type {
        UploadType::Census => census_timestamp(file_name),
        UploadType::Extension => Ok(now),
    }
}

/// Writes FAILED if the transfer unwinds before a terminal record is written.
struct FailOnPanic<'s, 'a> {
    history: &'s HistoryStore<'a>,
    file: &'s UploadFileInfo,
    armed: bool,
}

impl Drop for FailOnPanic<'_, '_> {
    fn drop(&mut self) {
        if self.armed && std::thread::panicking() {
            let record = UploadRecord::transition(self.file, UploadStatus::Failed);
            if let Err(e) = self.history.append(&record) {
                error!(file = %self.file.name, "could not record FAILED after panic: {:#}", e);
            }
        }
    }
}

/// Runs one file through dedup, history bookkeeping and transfer.
pub struct UploadOrchestrator<'a> {
    history: HistoryStore<'a>,
    uploader: &'a Uploader,
    warehouse: &'a dyn Warehouse,
}

impl<'a> UploadOrchestrator<'a> {
    pub fn new(
        warehouse: &'a dyn Warehouse,
        history: HistoryStore<'a>,
        uploader: &'a Uploader,
    ) -> Self {
        Self {
            history,
            uploader,
            warehouse,
        }
    }

    pub fn upload(&self, path: &Path, upload_type: UploadType) -> Result<UploadOutcome> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;

        if upload_type == UploadType::Census {
            let previous = self.history.previous_statuses(&name)?;
            if !previous.is_empty() {
                warn!(file = %name, ?previous, "There was previous attempt to upload file");
                return Ok(UploadOutcome::SkippedDuplicate { previous });
            }
        }

        let file = UploadFileInfo {
            timestamp: file_timestamp(&name, upload_type, Utc::now())?,
            size_in_mb: ndjson::size_in_mb(path)?,
            upload_type,
            name,
        };

        self.history
            .append(&UploadRecord::transition(&file, UploadStatus::Started))?;

        let mut guard = FailOnPanic {
            history: &self.history,
            file: &file,
            armed: true,
        };
        let result = self.uploader.transfer(self.warehouse, path);
        guard.armed = false;

        match result {
            Ok(report) => {
                self.history
                    .append(&UploadRecord::transition(&file, UploadStatus::Completed))?;
                info!(file = %file.name, "upload completed");
                Ok(UploadOutcome::Completed(report))
            }
            Err(transfer_err) => {
                error!(file = %file.name, "upload failed: {:#}", transfer_err);
                self.history
                    .append(&UploadRecord::transition(&file, UploadStatus::Failed))
                    .with_context(|| {
                        format!("could not record FAILED after transfer error: {transfer_err:#}")
                    })?;
                Err(transfer_err)
            }
        }
    }
}
