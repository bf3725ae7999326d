// src/ndjson.rs

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::{
    fs::{self, File},
    io::{BufRead, BufReader},
    path::Path,
};

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("gz"))
}

/// Open an NDJSON file for line reading, decompressing `.gz` transparently.
pub fn open(path: &Path) -> Result<Box<dyn BufRead>> {
    let file =
        File::open(path).with_context(|| format!("failed to open input {}", path.display()))?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// On-disk size in MB (10^6 bytes), rounded to two decimals.
pub fn size_in_mb(path: &Path) -> Result<f64> {
    let len = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    Ok(((len as f64 / 1_000_000.0) * 100.0).round() / 100.0)
}
