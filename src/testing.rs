// src/testing.rs
//
// In-memory `Warehouse` used by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::error::WarehouseError;
use crate::history::{UploadRecord, UPLOAD_HISTORY_TABLE_ID};
use crate::warehouse::*;

#[derive(Default)]
struct FakeState {
    tables: BTreeMap<String, Table>,
    create_calls: usize,
    fail_table_calls: bool,

    next_job: usize,
    polls_before_done: usize,
    pending: HashMap<String, (usize, Option<ErrorProto>)>,
    job_polls: usize,
    fail_loads_into: HashSet<String>,
    fail_jobs_into: HashSet<String>,
    panic_loads_into: HashSet<String>,
    loads: Vec<(String, Vec<u8>)>,

    /// (file name, raw status) in append order
    history: Vec<(String, String)>,
    queries: Vec<QueryRequest>,

    inserts: Vec<(String, InsertAllRequest)>,
    insert_calls: usize,
    fail_insert_calls: HashSet<usize>,
    reject_insert_calls: HashSet<usize>,
}

pub struct FakeWarehouse {
    state: Mutex<FakeState>,
}

fn api_error(message: &str) -> WarehouseError {
    WarehouseError::Api {
        status: 500,
        message: message.to_string(),
    }
}

/// A failed job reports its headline error plus one row-level entry.
fn detail_errors(error: &Option<ErrorProto>) -> Vec<ErrorProto> {
    match error {
        Some(e) => vec![
            e.clone(),
            ErrorProto {
                reason: Some("invalid".into()),
                location: Some("line 1".into()),
                message: Some("bad row".into()),
            },
        ],
        None => Vec::new(),
    }
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn set_polls_before_done(&self, n: usize) {
        self.with(|s| s.polls_before_done = n);
    }

    pub fn fail_loads_into(&self, table_id: &str) {
        self.with(|s| s.fail_loads_into.insert(table_id.to_string()));
    }

    pub fn fail_jobs_into(&self, table_id: &str) {
        self.with(|s| s.fail_jobs_into.insert(table_id.to_string()));
    }

    /// Loads into `table_id` panic before any state is touched.
    pub fn panic_loads_into(&self, table_id: &str) {
        self.with(|s| s.panic_loads_into.insert(table_id.to_string()));
    }

    pub fn fail_table_calls(&self) {
        self.with(|s| s.fail_table_calls = true);
    }

    /// The `n`th insertAll call (0-based) fails at the transport level.
    pub fn fail_insert_call(&self, n: usize) {
        self.with(|s| s.fail_insert_calls.insert(n));
    }

    /// The `n`th insertAll call (0-based) returns row-level insert errors.
    pub fn reject_insert_call(&self, n: usize) {
        self.with(|s| s.reject_insert_calls.insert(n));
    }

    pub fn seed_raw_status(&self, file_name: &str, status: &str) {
        self.with(|s| s.history.push((file_name.to_string(), status.to_string())));
    }

    pub fn job_polls(&self) -> usize {
        self.with(|s| s.job_polls)
    }

    pub fn create_calls(&self) -> usize {
        self.with(|s| s.create_calls)
    }

    pub fn table_count(&self) -> usize {
        self.with(|s| s.tables.len())
    }

    pub fn loaded_bytes(&self, table_id: &str) -> Vec<Vec<u8>> {
        self.with(|s| {
            s.loads
                .iter()
                .filter(|(t, _)| t == table_id)
                .map(|(_, b)| b.clone())
                .collect()
        })
    }

    pub fn last_query(&self) -> Option<QueryRequest> {
        self.with(|s| s.queries.last().cloned())
    }

    pub fn inserts(&self) -> Vec<(String, InsertAllRequest)> {
        self.with(|s| s.inserts.clone())
    }

    /// Statuses recorded for `file_name`, oldest first.
    pub fn history_statuses(&self, file_name: &str) -> Vec<String> {
        self.with(|s| {
            s.history
                .iter()
                .filter(|(n, _)| n == file_name)
                .map(|(_, st)| st.clone())
                .collect()
        })
    }

    /// Parsed history records loaded through load jobs.
    pub fn history_records(&self) -> Vec<UploadRecord> {
        self.loaded_bytes(UPLOAD_HISTORY_TABLE_ID)
            .iter()
            .flat_map(|b| {
                String::from_utf8_lossy(b)
                    .lines()
                    .map(|l| serde_json::from_str::<UploadRecord>(l).unwrap())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl Warehouse for FakeWarehouse {
    fn project_id(&self) -> &str {
        "proj"
    }

    fn dataset_id(&self) -> &str {
        "ds"
    }

    fn get_table(&self, table_id: &str) -> Result<Table, WarehouseError> {
        self.with(|s| {
            if s.fail_table_calls {
                return Err(api_error("backend unavailable"));
            }
            s.tables
                .get(table_id)
                .cloned()
                .ok_or_else(|| WarehouseError::NotFound(format!("Table proj:ds.{table_id}")))
        })
    }

    fn create_table(&self, table_id: &str, schema: &TableSchema) -> Result<Table, WarehouseError> {
        let table_reference = self.table_ref(table_id);
        self.with(|s| {
            s.create_calls += 1;
            if s.fail_table_calls {
                return Err(api_error("backend unavailable"));
            }
            if s.tables.contains_key(table_id) {
                return Err(WarehouseError::AlreadyExists(format!(
                    "Table proj:ds.{table_id}"
                )));
            }
            let table = Table {
                table_reference,
                schema: Some(schema.clone()),
            };
            s.tables.insert(table_id.to_string(), table.clone());
            Ok(table)
        })
    }

    fn list_tables(&self) -> Result<Vec<TableReference>, WarehouseError> {
        self.with(|s| Ok(s.tables.values().map(|t| t.table_reference.clone()).collect()))
    }

    fn run_load_job(
        &self,
        load: &JobConfigurationLoad,
        source: LoadSource<'_>,
    ) -> Result<Job, WarehouseError> {
        let table_id = load.destination_table.table_id.clone();
        if self.with(|s| s.panic_loads_into.contains(&table_id)) {
            panic!("load into {table_id} crashed");
        }
        let payload = match source {
            LoadSource::Bytes(bytes) => bytes.to_vec(),
            LoadSource::File(path) => std::fs::read(path)?,
        };
        self.with(|s| {
            if s.fail_loads_into.contains(&table_id) {
                return Err(api_error("load rejected"));
            }
            s.next_job += 1;
            let job_id = format!("job_{}", s.next_job);
            let error = s.fail_jobs_into.contains(&table_id).then(|| ErrorProto {
                reason: Some("invalid".into()),
                location: None,
                message: Some("Error while reading data".into()),
            });

            if table_id == UPLOAD_HISTORY_TABLE_ID && error.is_none() {
                for line in String::from_utf8_lossy(&payload).lines() {
                    let rec: UploadRecord = serde_json::from_str(line)?;
                    s.history
                        .push((rec.file.name.clone(), rec.status.as_str().to_string()));
                }
            }

            s.loads.push((table_id.clone(), payload));

            let job = |state: JobState, error: Option<ErrorProto>| Job {
                job_reference: Some(JobReference {
                    project_id: "proj".into(),
                    job_id: job_id.clone(),
                    location: None,
                }),
                configuration: Some(JobConfiguration {
                    load: Some(load.clone()),
                }),
                status: Some(JobStatus {
                    state,
                    errors: detail_errors(&error),
                    error_result: error,
                }),
                statistics: None,
            };

            if s.polls_before_done == 0 {
                Ok(job(JobState::Done, error))
            } else {
                s.pending
                    .insert(job_id.clone(), (s.polls_before_done, error));
                Ok(job(JobState::Pending, None))
            }
        })
    }

    fn get_job(&self, job_id: &str) -> Result<Job, WarehouseError> {
        self.with(|s| {
            s.job_polls += 1;
            let Some((remaining, error)) = s.pending.get_mut(job_id) else {
                return Err(WarehouseError::NotFound(format!("Job {job_id}")));
            };
            *remaining = remaining.saturating_sub(1);
            let (state, error) = if *remaining == 0 {
                (JobState::Done, error.clone())
            } else {
                (JobState::Running, None)
            };
            let errors = detail_errors(&error);
            Ok(Job {
                job_reference: Some(JobReference {
                    project_id: "proj".into(),
                    job_id: job_id.to_string(),
                    location: None,
                }),
                configuration: None,
                status: Some(JobStatus {
                    state,
                    error_result: error,
                    errors,
                }),
                statistics: Some(JobStatistics {
                    load: Some(LoadStatistics {
                        output_rows: Some(1),
                    }),
                }),
            })
        })
    }

    fn stream_insert_row(
        &self,
        table_id: &str,
        request: &InsertAllRequest,
    ) -> Result<InsertAllResponse, WarehouseError> {
        self.with(|s| {
            let n = s.insert_calls;
            s.insert_calls += 1;
            if s.fail_insert_calls.contains(&n) {
                return Err(api_error("insertAll unavailable"));
            }
            if s.reject_insert_calls.contains(&n) {
                return Ok(InsertAllResponse {
                    insert_errors: vec![InsertError {
                        index: 0,
                        errors: vec![ErrorProto {
                            reason: Some("invalid".into()),
                            location: Some("id".into()),
                            message: Some("no such field".into()),
                        }],
                    }],
                });
            }
            s.inserts.push((table_id.to_string(), request.clone()));
            Ok(InsertAllResponse::default())
        })
    }

    fn run_query(&self, request: &QueryRequest) -> Result<QueryResponse, WarehouseError> {
        self.with(|s| {
            s.queries.push(request.clone());
            let name = request
                .query_parameters
                .iter()
                .find(|p| p.name == "file_name")
                .map(|p| p.parameter_value.value.clone())
                .unwrap_or_default();
            let rows = s
                .history
                .iter()
                .filter(|(n, _)| *n == name)
                .map(|(_, st)| TableRow {
                    f: vec![TableCell {
                        v: serde_json::Value::String(st.clone()),
                    }],
                })
                .collect();
            Ok(QueryResponse {
                rows,
                job_complete: Some(true),
                total_rows: None,
            })
        })
    }
}
