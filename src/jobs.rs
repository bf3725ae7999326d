// src/jobs.rs

use anyhow::{bail, Context, Result};
use std::{
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::warehouse::{ErrorProto, Job, JobConfigurationLoad, JobState, LoadSource, Warehouse};

/// A load job reached DONE carrying an error payload.
///
/// Every individual error entry the server returned is kept for diagnostics.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("load job {job_id} failed: {error}")]
pub struct LoadJobFailed {
    pub job_id: String,
    pub error: ErrorProto,
    pub errors: Vec<ErrorProto>,
}

/// Submits load jobs and blocks until they reach a terminal state.
///
/// PENDING → RUNNING → DONE; the first DONE observation ends polling.
/// With no timeout the loop waits for as long as the server takes.
#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    interval: Duration,
    timeout: Option<Duration>,
}

impl JobPoller {
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }

    /// Submit a load job reading `source` and wait for it to finish.
    pub fn run_load(
        &self,
        warehouse: &dyn Warehouse,
        load: &JobConfigurationLoad,
        source: LoadSource<'_>,
    ) -> Result<Job> {
        let job = warehouse
            .run_load_job(load, source)
            .with_context(|| format!("submitting load job into {}", load.destination_table))?;
        info!(
            job_id = job.job_id().unwrap_or("?"),
            table = %load.destination_table,
            %source,
            "load job submitted"
        );
        self.wait(warehouse, job)
    }

    /// Poll `job` until DONE, then turn an error payload into `LoadJobFailed`.
    pub fn wait(&self, warehouse: &dyn Warehouse, mut job: Job) -> Result<Job> {
        let started = Instant::now();
        if job.state() != JobState::Done {
            let job_id = match job.job_id() {
                Some(id) => id.to_string(),
                None => bail!("load job was accepted without a job reference"),
            };
            loop {
                if let Some(limit) = self.timeout {
                    if started.elapsed() >= limit {
                        bail!(
                            "load job {job_id} still {:?} after {}s",
                            job.state(),
                            limit.as_secs()
                        );
                    }
                }
                debug!(
                    job_id = %job_id,
                    state = ?job.state(),
                    "job not done, waiting {}s", self.interval.as_secs()
                );
                thread::sleep(self.interval);
                job = warehouse
                    .get_job(&job_id)
                    .with_context(|| format!("polling job {job_id}"))?;
                if job.state() == JobState::Done {
                    break;
                }
            }
        }
        check_done(&job)?;
        Ok(job)
    }
}

fn check_done(job: &Job) -> Result<(), LoadJobFailed> {
    let Some(status) = job.status.as_ref() else {
        return Ok(());
    };
    match &status.error_result {
        Some(err) => {
            let job_id = job.job_id().unwrap_or("?").to_string();
            error!(job_id = %job_id, "{}. Status: {:?}", err, status.state);
            for e in &status.errors {
                error!(job_id = %job_id, "{}", e);
            }
            Err(LoadJobFailed {
                job_id,
                error: err.clone(),
                errors: status.errors.clone(),
            })
        }
        None => {
            info!(
                job_id = job.job_id().unwrap_or("?"),
                rows = job.output_rows(),
                "load job finished successfully"
            );
            Ok(())
        }
    }
}
