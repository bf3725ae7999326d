// src/auth.rs
//
// Google credential discovery. Token minting is left to the BigQuery client.

use anyhow::{bail, Context, Result};
use google_cloud_bigquery::client::google_cloud_auth::credentials::CredentialsFile;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

pub const BIGQUERY_SCOPES: [&str; 1] = ["https://www.googleapis.com/auth/bigquery"];
pub const GOOGLE_JSON_KEY_ENV: &str = "GOOGLE_JSON_KEY";
pub const GOOGLE_APPLICATION_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Where a credential document came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOrigin {
    Flag(PathBuf),
    InlineEnv,
    ApplicationDefault(PathBuf),
}

/// A validated credential document, kept as JSON so each auth consumer can
/// parse its own `CredentialsFile`.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub origin: CredentialOrigin,
    pub kind: String,
    json: String,
}

#[derive(Deserialize)]
struct KeyHeader {
    #[serde(rename = "type")]
    kind: String,
}

impl Credentials {
    fn parse(origin: CredentialOrigin, json: String) -> Result<Self> {
        let header: KeyHeader =
            serde_json::from_str(&json).context("parsing Google credential JSON")?;
        let creds = Self {
            origin,
            kind: header.kind,
            json,
        };
        creds.credentials_file()?;
        Ok(creds)
    }

    fn from_file(path: &Path, origin: CredentialOrigin) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading credential file {}", path.display()))?;
        Self::parse(origin, json).with_context(|| format!("in {}", path.display()))
    }

    pub fn credentials_file(&self) -> Result<CredentialsFile> {
        serde_json::from_str(&self.json).context("parsing Google credential JSON")
    }
}

/// Resolve credentials from the process environment.
pub fn resolve_credentials(credential_file: Option<&Path>) -> Result<Credentials> {
    resolve_credentials_with(credential_file, |key| std::env::var(key).ok())
}

/// Explicit file first, then an inline key in `GOOGLE_JSON_KEY`, then the
/// file named by `GOOGLE_APPLICATION_CREDENTIALS`.
pub fn resolve_credentials_with<F>(credential_file: Option<&Path>, env: F) -> Result<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let creds = if let Some(path) = credential_file {
        Credentials::from_file(path, CredentialOrigin::Flag(path.to_path_buf()))?
    } else if let Some(key) = env(GOOGLE_JSON_KEY_ENV).filter(|k| !k.trim().is_empty()) {
        Credentials::parse(CredentialOrigin::InlineEnv, key)
            .with_context(|| format!("in ${GOOGLE_JSON_KEY_ENV}"))?
    } else if let Some(path) = env(GOOGLE_APPLICATION_CREDENTIALS_ENV) {
        let path = PathBuf::from(path);
        Credentials::from_file(&path, CredentialOrigin::ApplicationDefault(path.clone()))?
    } else {
        bail!(
            "No google credentials found: pass -credentialFile or set ${} / ${}",
            GOOGLE_JSON_KEY_ENV,
            GOOGLE_APPLICATION_CREDENTIALS_ENV
        );
    };
    info!(kind = %creds.kind, origin = ?creds.origin, "resolved Google credentials");
    Ok(creds)
}
