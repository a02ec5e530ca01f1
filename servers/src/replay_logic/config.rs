use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "server_replay.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Telemetry replay gateway: replays a recorded dataset as a live push feed", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "REPLAY_PORT", help = "Port to listen on for HTTP, WebSocket and SSE clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "REPLAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "REPLAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "REPLAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "REPLAY_DATASET", help = "Dataset location: a local .csv/.tsv path or an http(s) object URL.")]
    pub dataset: Option<String>,

    #[clap(long, env = "REPLAY_LOOP_MODE", help = "Wrap around to the first record when the dataset is exhausted.")]
    pub loop_mode: Option<bool>,

    #[clap(long, env = "REPLAY_BATCH_SIZE", help = "Records emitted per tick.")]
    pub batch_size: Option<usize>,

    #[clap(long, env = "REPLAY_SEND_INTERVAL_MS", help = "Milliseconds between ticks.")]
    pub send_interval_ms: Option<u64>,

    #[clap(long, env = "REPLAY_BACKEND_URL", help = "Base URL of the persistence backend. Omit to disable persistence.")]
    pub backend_url: Option<String>,

    #[clap(long, env = "REPLAY_BACKEND_TIMEOUT_MS", help = "Per-request timeout for the persistence backend.")]
    pub backend_timeout_ms: Option<u64>,

    #[clap(long, env = "REPLAY_SSE_TIMEOUT_SECS", help = "Seconds after which an SSE stream is closed by the server.")]
    pub sse_timeout_secs: Option<u64>,

    #[clap(long, env = "REPLAY_TOPIC_CAPACITY", help = "Frames buffered for WebSocket topic subscribers before they lag.")]
    pub topic_capacity: Option<usize>,

    #[clap(long, env = "REPLAY_STREAM_BUFFER", help = "Events buffered per SSE stream before it is dropped.")]
    pub stream_buffer: Option<usize>,

    #[clap(long, env = "REPLAY_AUTO_START", help = "Start replaying immediately at boot.")]
    pub auto_start: Option<bool>,

    #[clap(long, env = "REPLAY_CORS", help = "Enable a permissive CORS layer.")]
    pub cors: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path} not found")]
    NotFound { path: PathBuf },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub dataset: String,
    pub loop_mode: bool,
    pub batch_size: usize,
    pub send_interval: Duration,
    pub backend_url: Option<String>,
    pub backend_timeout: Duration,
    pub sse_timeout: Duration,
    pub topic_capacity: usize,
    pub stream_buffer: usize,
    pub auto_start: bool,
    pub cors: bool,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            dataset: other.dataset.or(self.dataset),
            loop_mode: other.loop_mode.or(self.loop_mode),
            batch_size: other.batch_size.or(self.batch_size),
            send_interval_ms: other.send_interval_ms.or(self.send_interval_ms),
            backend_url: other.backend_url.or(self.backend_url),
            backend_timeout_ms: other.backend_timeout_ms.or(self.backend_timeout_ms),
            sse_timeout_secs: other.sse_timeout_secs.or(self.sse_timeout_secs),
            topic_capacity: other.topic_capacity.or(self.topic_capacity),
            stream_buffer: other.stream_buffer.or(self.stream_buffer),
            auto_start: other.auto_start.or(self.auto_start),
            cors: other.cors.or(self.cors),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8081),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            dataset: Some("data/page_samples.csv".to_string()),
            loop_mode: Some(true),
            batch_size: Some(10),
            send_interval_ms: Some(1000),
            backend_url: None,
            backend_timeout_ms: Some(5000),
            sse_timeout_secs: Some(30 * 60),
            topic_capacity: Some(256),
            stream_buffer: Some(64),
            auto_start: Some(true),
            cors: Some(true),
            config_path: None,
        }
    }

    /// Validates and fills every setting.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let filled = Config::defaults().merge(self);

        let batch_size = positive("batchSize", filled.batch_size)?;
        let send_interval_ms = positive("sendIntervalMs", filled.send_interval_ms)?;
        let backend_url = filled.backend_url.filter(|url| !url.trim().is_empty());
        if let Some(url) = &backend_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    name: "backendUrl",
                    reason: format!("{url} is not an http(s) URL"),
                });
            }
        }

        Ok(Settings {
            port: filled.port.unwrap_or(8081),
            log_dir: filled.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: filled.log_level.unwrap_or_else(|| "info".to_string()),
            dataset: filled.dataset.unwrap_or_default(),
            loop_mode: filled.loop_mode.unwrap_or(true),
            batch_size,
            send_interval: Duration::from_millis(send_interval_ms),
            backend_url,
            backend_timeout: Duration::from_millis(filled.backend_timeout_ms.unwrap_or(5000)),
            sse_timeout: Duration::from_secs(filled.sse_timeout_secs.unwrap_or(30 * 60)),
            topic_capacity: positive("topicCapacity", filled.topic_capacity)?,
            stream_buffer: positive("streamBuffer", filled.stream_buffer)?,
            auto_start: filled.auto_start.unwrap_or(true),
            cors: filled.cors.unwrap_or(true),
        })
    }
}

fn positive<T>(name: &'static str, value: Option<T>) -> Result<T, ConfigError>
where
    T: Default + PartialEq + std::fmt::Display,
{
    match value {
        Some(v) if v != T::default() => Ok(v),
        Some(v) => Err(ConfigError::Invalid {
            name,
            reason: format!("must be greater than zero, got {v}"),
        }),
        None => Err(ConfigError::Invalid {
            name,
            reason: "missing".to_string(),
        }),
    }
}

/// Loads settings from defaults, then the JSON config file, then environment
/// variables and command-line arguments.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_from(Config::parse())
}

/// Same as [`load_config`] with the CLI/env layer supplied by the caller.
pub fn load_from(cli: Config) -> Result<Settings, ConfigError> {
    let explicit = cli.config_path.clone();
    let config_file_path = explicit
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path).map_err(|source| ConfigError::Read {
            path: config_file_path.clone(),
            source,
        })?;
        let file_config = serde_json::from_str::<Config>(&config_str).map_err(|source| ConfigError::Parse {
            path: config_file_path.clone(),
            source,
        })?;
        current_config = current_config.merge(file_config);
    } else if explicit.is_some() {
        return Err(ConfigError::NotFound {
            path: config_file_path,
        });
    }

    current_config.merge(cli).resolve()
}
