use anyhow::{Context, Result};
use clap::Parser;
use songplay_etl::config::AppConfig;
use songplay_etl::pipeline::RunSummary;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "songplay-etl",
    version,
    about = "Build a Parquet star schema from song metadata and listening logs"
)]
struct Cli {
    /// Config file (defaults to ~/.config/songplay-etl/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Song metadata location, e.g. s3://bucket/song_data/*/*/*/*.json
    #[arg(long)]
    song_data: Option<String>,

    /// Activity log location, e.g. s3://bucket/log_data/*/*/*.json
    #[arg(long)]
    log_data: Option<String>,

    /// Output prefix for the five tables
    #[arg(long)]
    destination: Option<String>,

    /// Number of parallel decode workers (0 = from config)
    #[arg(short = 'j', long, default_value = "0")]
    jobs: usize,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Explicit --config must load; the default path falls back to defaults
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path).context("Failed to load config")?,
        None => AppConfig::load(),
    };

    // CLI > config
    if let Some(song_data) = cli.song_data {
        config.song_data = Some(song_data);
    }
    if let Some(log_data) = cli.log_data {
        config.log_data = Some(log_data);
    }
    if let Some(destination) = cli.destination {
        config.destination = Some(destination);
    }
    if cli.jobs > 0 {
        config.workers = cli.jobs;
    }

    let pipeline = config.pipeline_config().context("Invalid configuration")?;
    log::info!(
        "Song data: {}, log data: {}, destination: {}",
        pipeline.song_data,
        pipeline.log_data,
        pipeline.destination
    );

    let summary = songplay_etl::pipeline::run(&pipeline)
        .await
        .context("ETL run failed")?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Song data: {} files, {} records ({} malformed lines, {} duplicate songs)",
        summary.song_files, summary.song_records, summary.song_lines_malformed, summary.duplicate_songs
    );
    if summary.songs_missing_id > 0 || summary.artists_missing_id > 0 {
        println!(
            "  {} records without song_id, {} without artist_id",
            summary.songs_missing_id, summary.artists_missing_id
        );
    }
    println!(
        "Log data: {} files, {} records ({} malformed lines, {} non-play events, {} plays dropped)",
        summary.log_files,
        summary.log_records,
        summary.log_lines_malformed,
        summary.events_skipped,
        summary.plays_dropped
    );
    println!();
    println!("{:<12} {:>10} {:>11} {:>7}", "Table", "Rows", "Partitions", "Files");
    println!("{}", "-".repeat(43));
    for table in &summary.tables {
        println!(
            "{:<12} {:>10} {:>11} {:>7}",
            table.table, table.rows, table.partitions, table.files
        );
    }
    println!();
    println!(
        "ETL complete: {} unmatched plays, {} dropped records",
        summary.unmatched_plays,
        summary.dropped_records()
    );
}
