// src/warehouse/client.rs
//
// `Warehouse` over the google-cloud-bigquery client. The library is async;
// each call is driven to completion on a runtime owned by the client.

use anyhow::{Context, Result};
use google_cloud_bigquery::client::google_cloud_auth::{
    project::Config as AuthConfig, token::DefaultTokenSourceProvider,
};
use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::error::Error as HttpError;
use google_cloud_bigquery::http::job::get::GetJobRequest;
use google_cloud_bigquery::http::job::query::QueryRequest as BqQueryRequest;
use google_cloud_bigquery::http::table::list::ListTablesRequest;
use google_cloud_bigquery::http::table::{Table as BqTable, TableReference as BqTableReference};
use google_cloud_bigquery::http::tabledata::insert_all::{
    InsertAllRequest as BqInsertAllRequest, Row as BqRow,
};
use google_cloud_token::{TokenSource, TokenSourceProvider};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::instrument;

use super::types::*;
use super::upload::MediaUploader;
use super::{LoadSource, Warehouse};
use crate::auth::{Credentials, BIGQUERY_SCOPES};
use crate::error::WarehouseError;

pub struct BigQueryClient {
    runtime: Runtime,
    client: Client,
    tokens: Arc<dyn TokenSource>,
    uploads: MediaUploader,
    project_id: String,
    dataset_id: String,
}

impl BigQueryClient {
    pub fn connect(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        credentials: &Credentials,
        upload_url: &str,
    ) -> Result<Self> {
        let runtime = Runtime::new().context("starting async runtime")?;
        let (client, tokens) = runtime.block_on(async {
            let (config, _) = ClientConfig::new_with_credentials(credentials.credentials_file()?)
                .await
                .context("configuring BigQuery client")?;
            let client = Client::new(config)
                .await
                .context("creating BigQuery client")?;
            let provider = DefaultTokenSourceProvider::new_with_credentials(
                AuthConfig::default().with_scopes(&BIGQUERY_SCOPES),
                Box::new(credentials.credentials_file()?),
            )
            .await
            .context("creating upload token source")?;
            Ok::<_, anyhow::Error>((client, provider.token_source()))
        })?;
        let uploads = MediaUploader::new(MediaUploader::default_http()?, upload_url)?;

        Ok(Self {
            runtime,
            client,
            tokens,
            uploads,
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
        })
    }
}

/// 404 and 409 are answers callers branch on; everything else is fatal.
pub(crate) fn status_error(status: u16, message: String) -> WarehouseError {
    match status {
        404 => WarehouseError::NotFound(message),
        409 => WarehouseError::AlreadyExists(message),
        status => WarehouseError::Api { status, message },
    }
}

fn api_error(e: HttpError, what: &str) -> WarehouseError {
    let message = format!("{what}: {e}");
    match &e {
        HttpError::Response(resp) => status_error(u16::try_from(resp.code).unwrap_or(500), message),
        _ => WarehouseError::Client(message),
    }
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Re-read a library model as one of ours. Both sides follow the REST JSON
/// shape; absent optionals come through as nulls and are dropped first.
fn bridge<T: Serialize, U: DeserializeOwned>(from: &T) -> Result<U, WarehouseError> {
    let mut value = serde_json::to_value(from)?;
    strip_nulls(&mut value);
    Ok(serde_json::from_value(value)?)
}

/// Lay the fields of `patch` over the library's default request.
fn overlay<T, P>(patch: &P) -> Result<T, WarehouseError>
where
    T: Default + Serialize + DeserializeOwned,
    P: Serialize,
{
    let mut base = serde_json::to_value(T::default())?;
    if let (Value::Object(base), Value::Object(patch)) = (&mut base, serde_json::to_value(patch)?) {
        base.extend(patch);
    }
    Ok(serde_json::from_value(base)?)
}

fn from_bq_ref(r: &BqTableReference) -> TableReference {
    TableReference {
        project_id: r.project_id.clone(),
        dataset_id: r.dataset_id.clone(),
        table_id: r.table_id.clone(),
    }
}

impl Warehouse for BigQueryClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    #[instrument(level = "debug", skip(self))]
    fn get_table(&self, table_id: &str) -> Result<Table, WarehouseError> {
        let table = self
            .runtime
            .block_on(self.client.table().get(&self.project_id, &self.dataset_id, table_id))
            .map_err(|e| api_error(e, &format!("get table {table_id}")))?;
        bridge(&table)
    }

    #[instrument(level = "debug", skip(self, schema))]
    fn create_table(&self, table_id: &str, schema: &TableSchema) -> Result<Table, WarehouseError> {
        let table = BqTable {
            table_reference: BqTableReference {
                project_id: self.project_id.clone(),
                dataset_id: self.dataset_id.clone(),
                table_id: table_id.to_string(),
            },
            schema: Some(bridge(schema)?),
            ..Default::default()
        };
        let created = self
            .runtime
            .block_on(self.client.table().create(&table))
            .map_err(|e| api_error(e, &format!("create table {table_id}")))?;
        bridge(&created)
    }

    fn list_tables(&self) -> Result<Vec<TableReference>, WarehouseError> {
        let tables = self
            .runtime
            .block_on(self.client.table().list(
                &self.project_id,
                &self.dataset_id,
                &ListTablesRequest::default(),
            ))
            .map_err(|e| api_error(e, "list tables"))?;
        Ok(tables.iter().map(|t| from_bq_ref(&t.table_reference)).collect())
    }

    #[instrument(level = "debug", skip(self, load, source), fields(table = %load.destination_table))]
    fn run_load_job(
        &self,
        load: &JobConfigurationLoad,
        source: LoadSource<'_>,
    ) -> Result<Job, WarehouseError> {
        let job = Job::load(load.clone());
        self.runtime.block_on(async {
            let authorization = self
                .tokens
                .token()
                .await
                .map_err(|e| WarehouseError::Client(format!("fetching access token: {e}")))?;
            self.uploads
                .insert_load_job(&authorization, &self.project_id, &job, source)
                .await
        })
    }

    fn get_job(&self, job_id: &str) -> Result<Job, WarehouseError> {
        let job = self
            .runtime
            .block_on(
                self.client
                    .job()
                    .get(&self.project_id, job_id, &GetJobRequest::default()),
            )
            .map_err(|e| api_error(e, &format!("get job {job_id}")))?;
        bridge(&job)
    }

    fn stream_insert_row(
        &self,
        table_id: &str,
        request: &InsertAllRequest,
    ) -> Result<InsertAllResponse, WarehouseError> {
        let rows: Vec<BqRow<Map<String, Value>>> = request
            .rows
            .iter()
            .map(|row| BqRow {
                insert_id: row.insert_id.clone(),
                json: row.json.clone(),
            })
            .collect();
        let request = BqInsertAllRequest {
            ignore_unknown_values: Some(request.ignore_unknown_values),
            template_suffix: request.template_suffix.clone(),
            rows,
            ..Default::default()
        };
        let response = self
            .runtime
            .block_on(self.client.tabledata().insert(
                &self.project_id,
                &self.dataset_id,
                table_id,
                &request,
            ))
            .map_err(|e| api_error(e, &format!("insertAll into {table_id}")))?;
        bridge(&response)
    }

    #[instrument(level = "debug", skip(self, request), fields(query = %request.query))]
    fn run_query(&self, request: &QueryRequest) -> Result<QueryResponse, WarehouseError> {
        let request: BqQueryRequest = overlay(request)?;
        let response = self
            .runtime
            .block_on(self.client.job().query(&self.project_id, &request))
            .map_err(|e| api_error(e, "query"))?;
        bridge(&response)
    }
}
