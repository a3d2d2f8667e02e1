use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::storage::{Location, StorageError};

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("No input files match {0}")]
    NoInput(String),
    #[error("Failed to build decode pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("Decode task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Records decoded from every file matching a location, in input order
/// (files by key, lines in file order).
#[derive(Debug)]
pub struct Decoded<T> {
    pub records: Vec<T>,
    pub files: usize,
    pub lines: usize,
    pub malformed: usize,
}

impl<T> Default for Decoded<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            files: 0,
            lines: 0,
            malformed: 0,
        }
    }
}

/// Fetch every object matching `location` and decode it as JSON lines.
///
/// Listing or fetching failures abort the read. Lines that do not decode are
/// counted in [`Decoded::malformed`] and skipped.
pub async fn read_json_lines<T>(
    location: &Location,
    workers: usize,
) -> Result<Decoded<T>, ReadError>
where
    T: DeserializeOwned + Send + 'static,
{
    let objects = location.list_matching().await?;
    if objects.is_empty() {
        return Err(ReadError::NoInput(location.url().to_string()));
    }

    log::info!("Reading {} files from {}", objects.len(), location.url());

    let pb = ProgressBar::new(objects.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message("Fetching...");

    let mut contents = Vec::with_capacity(objects.len());
    for meta in &objects {
        let data = location.fetch(&meta.location).await?;
        contents.push((meta.location.to_string(), data));
        pb.inc(1);
    }
    pb.finish_with_message("Fetched");

    // Decoding is CPU-bound; keep it off the async runtime
    let per_file = tokio::task::spawn_blocking(move || -> Result<Vec<Decoded<T>>, ReadError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()?;
        Ok(pool.install(|| {
            contents
                .par_iter()
                .map(|(key, data)| decode_lines(key, data))
                .collect()
        }))
    })
    .await??;

    let mut decoded = Decoded::default();
    for file in per_file {
        decoded.files += 1;
        decoded.lines += file.lines;
        decoded.malformed += file.malformed;
        decoded.records.extend(file.records);
    }

    if decoded.malformed > 0 {
        log::warn!(
            "{}: skipped {} malformed lines out of {}",
            location.url(),
            decoded.malformed,
            decoded.lines
        );
    }

    Ok(decoded)
}

/// Decode one file's worth of JSON lines. Blank lines are ignored; a line
/// that is not valid UTF-8 counts as malformed.
pub fn decode_lines<T: DeserializeOwned>(key: &str, data: &[u8]) -> Decoded<T> {
    let mut decoded = Decoded {
        files: 1,
        ..Default::default()
    };

    for (line_no, raw) in data.split(|&b| b == b'\n').enumerate() {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                log::debug!("{}:{}: {}", key, line_no + 1, e);
                decoded.lines += 1;
                decoded.malformed += 1;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        decoded.lines += 1;
        match serde_json::from_str::<T>(line) {
            Ok(record) => decoded.records.push(record),
            Err(e) => {
                log::debug!("{}:{}: {}", key, line_no + 1, e);
                decoded.malformed += 1;
            }
        }
    }

    decoded
}
