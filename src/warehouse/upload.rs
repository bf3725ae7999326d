// src/warehouse/upload.rs
//
// Load jobs with local source data go through BigQuery's resumable media
// upload: one POST opens a session with the job metadata, one PUT streams the
// bytes. The BigQuery client library only submits jobs over GCS URIs.

use anyhow::{bail, Context, Result};
use reqwest::{
    header::{AUTHORIZATION, CONTENT_LENGTH, LOCATION},
    Body, Client, Response,
};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use super::types::Job;
use super::LoadSource;
use crate::error::WarehouseError;

pub const DEFAULT_UPLOAD_URL: &str = "https://bigquery.googleapis.com";
pub const UPLOAD_URL_ENV: &str = "BIGQUERY_UPLOAD_URL";

pub struct MediaUploader {
    http: Client,
    base: Url,
}

impl MediaUploader {
    pub fn new(http: Client, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("parsing upload url {base_url}"))?;
        if base.cannot_be_a_base() {
            bail!("upload url {base_url} cannot be used as a base url");
        }
        Ok(Self { http, base })
    }

    /// No overall timeout: a large file may legitimately take a while.
    pub fn default_http() -> Result<Client> {
        Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")
    }

    fn sessions_url(&self, project_id: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["upload", "bigquery", "v2", "projects", project_id, "jobs"]);
        }
        url.query_pairs_mut().append_pair("uploadType", "resumable");
        url
    }

    /// Open an upload session for `job` and stream `source` into it.
    ///
    /// `authorization` is a complete header value, e.g. `Bearer ya29...`.
    #[instrument(level = "debug", skip(self, authorization, job, source))]
    pub async fn insert_load_job(
        &self,
        authorization: &str,
        project_id: &str,
        job: &Job,
        source: LoadSource<'_>,
    ) -> Result<Job, WarehouseError> {
        let (body, len) = body_for(source).await?;
        let resp = self
            .http
            .post(self.sessions_url(project_id))
            .header(AUTHORIZATION, authorization)
            .header("X-Upload-Content-Type", "application/octet-stream")
            .json(job)
            .send()
            .await?;
        let resp = check(resp, "open load upload session").await?;
        let session = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| WarehouseError::Api {
                status: resp.status().as_u16(),
                message: "upload session response carried no Location header".to_string(),
            })?
            .to_string();
        debug!(%session, bytes = len, "upload session opened");

        let resp = self
            .http
            .put(session)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;
        let resp = check(resp, "upload load data").await?;
        Ok(resp.json().await?)
    }
}

async fn body_for(source: LoadSource<'_>) -> Result<(Body, u64), WarehouseError> {
    match source {
        LoadSource::Bytes(bytes) => Ok((Body::from(bytes.to_vec()), bytes.len() as u64)),
        LoadSource::File(path) => {
            let file = tokio::fs::File::open(path).await?;
            let len = file.metadata().await?.len();
            Ok((Body::from(file), len))
        }
    }
}

async fn check(resp: Response, what: &str) -> Result<Response, WarehouseError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await?;
    let message = api_error_message(&body).unwrap_or(body);
    debug!(status = status.as_u16(), %message, "{what} failed");
    Err(super::client::status_error(status.as_u16(), format!("{what}: {message}")))
}

/// Pull `error.message` out of a Google JSON error body.
fn api_error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}
