use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::PipelineConfig;

/// Default tolerance (seconds) when matching a play's length to a song duration.
pub const DEFAULT_DURATION_TOLERANCE: f64 = 0.001;

/// Default upper bound on rows per Parquet file.
pub const DEFAULT_ROWS_PER_FILE: usize = 100_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("No {0} location configured. Set it in the config file or pass it on the command line.")]
    Missing(&'static str),
    #[error("Invalid setting {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// Song metadata location pattern, e.g. `s3://udacity-dend/song_data/*/*/*/*.json`.
    pub song_data: Option<String>,
    /// Activity log location pattern, e.g. `s3://udacity-dend/log_data/*/*/*.json`.
    pub log_data: Option<String>,
    /// Output prefix; each table is written beneath it.
    pub destination: Option<String>,
    /// Number of parallel decode workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Object store access.
    pub aws: AwsConfig,
    pub join: JoinConfig,
    pub output: OutputConfig,
}

/// S3 access settings. Unset fields fall back to the `AWS_*` environment variables.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack).
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JoinConfig {
    /// Maximum |song duration - play length| in seconds for a match.
    pub duration_tolerance: f64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            duration_tolerance: DEFAULT_DURATION_TOLERANCE,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub rows_per_file: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            rows_per_file: DEFAULT_ROWS_PER_FILE,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/songplay-etl/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("{}. Using defaults.", e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path. Unlike [`AppConfig::load`], any
    /// failure is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Check that every location is set and produce the pipeline settings.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let song_data = self.song_data.clone().ok_or(ConfigError::Missing("song_data"))?;
        let log_data = self.log_data.clone().ok_or(ConfigError::Missing("log_data"))?;
        let destination = self.destination.clone().ok_or(ConfigError::Missing("destination"))?;

        let tolerance = self.join.duration_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                name: "join.duration_tolerance",
                message: format!("must be a non-negative number, got {}", tolerance),
            });
        }
        if self.output.rows_per_file == 0 {
            return Err(ConfigError::Invalid {
                name: "output.rows_per_file",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(PipelineConfig {
            song_data,
            log_data,
            destination,
            aws: self.aws.clone(),
            workers: self.resolve_workers(),
            duration_tolerance: tolerance,
            rows_per_file: self.output.rows_per_file,
        })
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::parse(
            r#"
            song_data = "s3://udacity-dend/song_data/*/*/*/*.json"
            log_data = "s3://udacity-dend/log_data/*/*/*.json"
            destination = "s3://sparkify-lake/"
            workers = 4

            [aws]
            region = "us-west-2"
            access_key_id = "AKIDEXAMPLE"
            secret_access_key = "secret"

            [join]
            duration_tolerance = 0.5

            [output]
            rows_per_file = 5000
            "#,
        )
        .unwrap();

        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.song_data, "s3://udacity-dend/song_data/*/*/*/*.json");
        assert_eq!(pipeline.destination, "s3://sparkify-lake/");
        assert_eq!(pipeline.workers, 4);
        assert_eq!(pipeline.duration_tolerance, 0.5);
        assert_eq!(pipeline.rows_per_file, 5000);
        assert_eq!(pipeline.aws.region.as_deref(), Some("us-west-2"));
        assert!(pipeline.aws.endpoint.is_none());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.join.duration_tolerance, DEFAULT_DURATION_TOLERANCE);
        assert_eq!(config.output.rows_per_file, DEFAULT_ROWS_PER_FILE);
        assert!(config.resolve_workers() >= 1);
    }

    #[test]
    fn test_missing_locations() {
        let mut config = AppConfig::default();
        assert!(matches!(config.pipeline_config(), Err(ConfigError::Missing("song_data"))));
        config.song_data = Some("songs".into());
        config.log_data = Some("logs".into());
        assert!(matches!(config.pipeline_config(), Err(ConfigError::Missing("destination"))));
    }

    #[test]
    fn test_invalid_settings() {
        let mut config = AppConfig {
            song_data: Some("songs".into()),
            log_data: Some("logs".into()),
            destination: Some("out".into()),
            ..Default::default()
        };
        config.join.duration_tolerance = -1.0;
        assert!(matches!(config.pipeline_config(), Err(ConfigError::Invalid { .. })));

        config.join.duration_tolerance = 0.0;
        config.output.rows_per_file = 0;
        assert!(matches!(config.pipeline_config(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            AppConfig::load_from(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
