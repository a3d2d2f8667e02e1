use thiserror::Error;

use crate::activity::{SongIndex, extract_activity_tables};
use crate::config::AwsConfig;
use crate::models::{ActivityRecord, SongRecord};
use crate::reader::{ReadError, read_json_lines};
use crate::songs::extract_song_dimensions;
use crate::storage::{Location, StorageError};
use crate::tables::TableRow;
use crate::writer::{TableWrite, WriteError, write_table};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to read song data: {0}")]
    SongData(#[source] ReadError),
    #[error("Failed to read log data: {0}")]
    LogData(#[source] ReadError),
    #[error("Failed to write {table} table: {source}")]
    Write {
        table: &'static str,
        #[source]
        source: WriteError,
    },
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub song_data: String,
    pub log_data: String,
    pub destination: String,
    pub aws: AwsConfig,
    pub workers: usize,
    pub duration_tolerance: f64,
    pub rows_per_file: usize,
}

/// Counts collected over a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub song_files: usize,
    pub song_records: usize,
    pub song_lines_malformed: usize,
    pub songs_missing_id: usize,
    pub artists_missing_id: usize,
    pub duplicate_songs: usize,

    pub log_files: usize,
    pub log_records: usize,
    pub log_lines_malformed: usize,
    pub events_skipped: usize,
    pub plays_dropped: usize,
    pub unmatched_plays: usize,

    /// One entry per table, in write order.
    pub tables: Vec<TableWrite>,
}

impl RunSummary {
    /// Input lines or plays discarded as malformed.
    pub fn dropped_records(&self) -> usize {
        self.song_lines_malformed + self.log_lines_malformed + self.plays_dropped
    }

    pub fn rows_written(&self, table: &str) -> Option<usize> {
        self.tables.iter().find(|t| t.table == table).map(|t| t.rows)
    }
}

/// Resolve the configured locations and run the job.
pub async fn run(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    let song_data = Location::resolve(&config.song_data, &config.aws)?;
    let log_data = Location::resolve(&config.log_data, &config.aws)?;
    let destination = Location::resolve_destination(&config.destination, &config.aws)?;
    run_at(&song_data, &log_data, &destination, config).await
}

/// Run the job against already resolved locations.
///
/// All input is read and transformed before the first table is written, so
/// an unreadable input leaves previous output untouched.
pub async fn run_at(
    song_data: &Location,
    log_data: &Location,
    destination: &Location,
    config: &PipelineConfig,
) -> Result<RunSummary, PipelineError> {
    let mut summary = RunSummary::default();

    let songs = read_json_lines::<SongRecord>(song_data, config.workers)
        .await
        .map_err(PipelineError::SongData)?;
    summary.song_files = songs.files;
    summary.song_records = songs.records.len();
    summary.song_lines_malformed = songs.malformed;

    let dims = extract_song_dimensions(&songs.records);
    drop(songs);
    summary.songs_missing_id = dims.missing_song_id;
    summary.artists_missing_id = dims.missing_artist_id;
    summary.duplicate_songs = dims.duplicate_songs;

    let index = SongIndex::new(&dims.songs, &dims.artists, config.duration_tolerance);
    log::info!("Indexed {} songs for play matching", index.len());

    let logs = read_json_lines::<ActivityRecord>(log_data, config.workers)
        .await
        .map_err(PipelineError::LogData)?;
    summary.log_files = logs.files;
    summary.log_records = logs.records.len();
    summary.log_lines_malformed = logs.malformed;

    let activity = extract_activity_tables(&logs.records, &index);
    drop(logs);
    summary.events_skipped = activity.events_skipped;
    summary.plays_dropped = activity.plays_dropped;
    summary.unmatched_plays = activity.unmatched_plays;

    let rows_per_file = config.rows_per_file;
    summary.tables.push(write(destination, &dims.songs, rows_per_file).await?);
    summary.tables.push(write(destination, &dims.artists, rows_per_file).await?);
    summary.tables.push(write(destination, &activity.users, rows_per_file).await?);
    summary.tables.push(write(destination, &activity.time, rows_per_file).await?);
    summary.tables.push(write(destination, &activity.songplays, rows_per_file).await?);

    log::info!(
        "Run complete: {} dropped records, {} unmatched plays",
        summary.dropped_records(),
        summary.unmatched_plays
    );
    Ok(summary)
}

async fn write<T: TableRow>(
    destination: &Location,
    rows: &[T],
    rows_per_file: usize,
) -> Result<TableWrite, PipelineError> {
    write_table(destination, rows, rows_per_file)
        .await
        .map_err(|source| PipelineError::Write {
            table: T::NAME,
            source,
        })
}
