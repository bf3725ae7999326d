// src/main.rs

use anyhow::{Context, Result};
use bq_uploader::{
    app,
    auth::resolve_credentials,
    config::Args,
    logging,
    warehouse::{
        upload::{DEFAULT_UPLOAD_URL, UPLOAD_URL_ENV},
        BigQueryClient,
    },
};
use clap::CommandFactory;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let args = match Args::parse_from_legacy(std::env::args()) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };
    logging::init();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}\n");
            let _ = Args::command().print_help();
            return ExitCode::from(2);
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: bq_uploader::config::UploadConfig) -> Result<()> {
    let credentials = resolve_credentials(config.credential_file.as_deref())?;
    let upload_url =
        std::env::var(UPLOAD_URL_ENV).unwrap_or_else(|_| DEFAULT_UPLOAD_URL.to_string());
    let client = BigQueryClient::connect(
        &config.target.project_id,
        &config.target.dataset_id,
        &credentials,
        &upload_url,
    )
    .context("creating BigQuery client")?;

    info!(table = %config.target, "startup");
    app::run(&config, &client)?;
    Ok(())
}
