// src/lib.rs

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod history;
pub mod jobs;
pub mod logging;
pub mod ndjson;
pub mod orchestrator;
pub mod tables;
pub mod uploader;
pub mod warehouse;

#[cfg(test)]
mod testing;
