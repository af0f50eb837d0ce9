use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::models::policy::MatchPolicy;

#[derive(Debug)]
pub enum ConfigError {
    Missing(String),
    Invalid { name: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(name) => {
                write!(f, "{} environment variable must be set", name)
            }
            ConfigError::Invalid { name, value } => {
                write!(f, "{} has an invalid value: {}", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where queue buckets, schedules, matches and the event topic live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local stores. Only meaningful with a single process.
    Memory,
    DynamoDb(DynamoDbTables),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamoDbTables {
    pub schedules_table: String,
    pub matches_table: String,
    pub queue_table: String,
    pub events_table: String,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub lone_searcher_backoff: Duration,
    pub error_backoff: Duration,
    pub pop_timeout: Duration,
    pub sweep_interval: Duration,
    pub queue_poll_interval: Duration,
    pub events_poll_interval: Duration,
    /// How long a popped entry stays hidden from other workers before it can
    /// be claimed again.
    pub claim_lease: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            lone_searcher_backoff: Duration::from_millis(1000),
            error_backoff: Duration::from_millis(1000),
            pop_timeout: Duration::from_millis(5000),
            sweep_interval: Duration::from_millis(5000),
            queue_poll_interval: Duration::from_millis(250),
            events_poll_interval: Duration::from_millis(500),
            claim_lease: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoRoomSettings {
    pub api_key: String,
    pub api_secret: String,
    pub server_url: String,
    pub credential_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct MatchmakingConfig {
    pub storage: StorageBackend,
    pub policy: MatchPolicy,
    pub worker: WorkerSettings,
    pub video_room: VideoRoomSettings,
    pub port: u16,
    pub embedded_worker: bool,
}

impl MatchmakingConfig {
    /// Load configuration from environment variables, honouring a `.env`
    /// file when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = match lookup("STORAGE_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackend::Memory,
            "dynamodb" => StorageBackend::DynamoDb(DynamoDbTables {
                schedules_table: required(&lookup, "SCHEDULES_TABLE")?,
                matches_table: required(&lookup, "MATCHES_TABLE")?,
                queue_table: required(&lookup, "MATCHMAKING_QUEUE_TABLE")?,
                events_table: required(&lookup, "MATCHMAKING_EVENTS_TABLE")?,
            }),
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORAGE_BACKEND".to_string(),
                    value: other.to_string(),
                })
            }
        };

        let defaults = MatchPolicy::default();
        let policy = MatchPolicy {
            match_window: seconds(&lookup, "MATCH_WINDOW_SECS", defaults.match_window)?,
            wait_budget: seconds(&lookup, "WAIT_BUDGET_SECS", defaults.wait_budget)?,
            join_early: seconds(&lookup, "JOIN_EARLY_SECS", defaults.join_early)?,
            join_late: seconds(&lookup, "JOIN_LATE_SECS", defaults.join_late)?,
            skip_time_window_check: parsed(&lookup, "SKIP_TIME_WINDOW_CHECK", false)?,
        };

        let worker_defaults = WorkerSettings::default();
        let worker = WorkerSettings {
            lone_searcher_backoff: millis(
                &lookup,
                "LONE_SEARCHER_BACKOFF_MS",
                worker_defaults.lone_searcher_backoff,
            )?,
            error_backoff: millis(&lookup, "ERROR_BACKOFF_MS", worker_defaults.error_backoff)?,
            pop_timeout: millis(&lookup, "POP_TIMEOUT_MS", worker_defaults.pop_timeout)?,
            sweep_interval: millis(&lookup, "SWEEP_INTERVAL_MS", worker_defaults.sweep_interval)?,
            queue_poll_interval: millis(
                &lookup,
                "QUEUE_POLL_INTERVAL_MS",
                worker_defaults.queue_poll_interval,
            )?,
            events_poll_interval: millis(
                &lookup,
                "EVENTS_POLL_INTERVAL_MS",
                worker_defaults.events_poll_interval,
            )?,
            claim_lease: millis(&lookup, "CLAIM_LEASE_MS", worker_defaults.claim_lease)?,
        };

        let video_room = VideoRoomSettings {
            api_key: required(&lookup, "LIVEKIT_API_KEY")?,
            api_secret: required(&lookup, "LIVEKIT_API_SECRET")?,
            server_url: required(&lookup, "LIVEKIT_URL")?,
            credential_ttl: Duration::from_secs(parsed(&lookup, "CREDENTIAL_TTL_SECS", 7200)?),
        };

        Ok(Self {
            storage,
            policy,
            worker,
            video_room,
            port: parsed(&lookup, "PORT", 3000)?,
            embedded_worker: parsed(&lookup, "EMBEDDED_WORKER", true)?,
        })
    }
}

fn required<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name.to_string())),
    }
}

fn parsed<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn millis<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let ms: u64 = parsed(lookup, name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

fn seconds<F>(
    lookup: &F,
    name: &str,
    default: chrono::Duration,
) -> Result<chrono::Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: i64 = parsed(lookup, name, default.num_seconds())?;
    if secs < 0 {
        return Err(ConfigError::Invalid {
            name: name.to_string(),
            value: secs.to_string(),
        });
    }
    Ok(chrono::Duration::seconds(secs))
}
