//! Configuration types for multi-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transfer behavior configuration (directories, concurrency, segmenting)
///
/// Groups settings related to how transfers are fetched and stored.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent transferring tasks, system-wide (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,

    /// Range fetchers per resumable task (default: 4)
    ///
    /// Bounded independently of `max_concurrent_tasks`; a single task never
    /// borrows from the task-level budget for its own segments.
    #[serde(default = "default_segments_per_task")]
    pub segments_per_task: usize,

    /// Minimum bytes per segment before a transfer is split (default: 512 KiB)
    ///
    /// Sources smaller than twice this value transfer as a single segment.
    #[serde(default = "default_segment_min_bytes")]
    pub segment_min_bytes: u64,

    /// Maximum silence interval before a transfer is failed as stalled
    /// (default: 30 seconds)
    #[serde(default = "default_stall_timeout", with = "duration_serde")]
    pub stall_timeout: Duration,

    /// Interval between coalesced progress events (default: 500 ms)
    #[serde(default = "default_progress_interval", with = "duration_millis_serde")]
    pub progress_interval: Duration,

    /// Connect timeout for metadata probes and transfers (default: 15 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_tasks: default_max_concurrent(),
            segments_per_task: default_segments_per_task(),
            segment_min_bytes: default_segment_min_bytes(),
            stall_timeout: default_stall_timeout(),
            progress_interval: default_progress_interval(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Retry configuration for failed probes and transfers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to the SQLite task store (default: "./multi-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for [`MultiDownloader`](crate::engine::MultiDownloader)
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) — directories, concurrency, segmenting
/// - [`retry`](RetryConfig) — attempt budget and backoff shape
/// - [`persistence`](PersistenceConfig) — task store location
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Transfer behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_segments_per_task() -> usize {
    4
}

fn default_segment_min_bytes() -> u64 {
    512 * 1024
}

fn default_stall_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./multi-dl.db")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second intervals)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.download.max_concurrent_tasks, 3);
        assert_eq!(config.download.segments_per_task, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.retry.jitter);
    }

    #[test]
    fn deserializes_from_partial_json() {
        let config: Config = serde_json::from_str(r#"{"max_concurrent_tasks": 8}"#).unwrap();
        assert_eq!(config.download.max_concurrent_tasks, 8);
        assert_eq!(config.download.stall_timeout, Duration::from_secs(30));
    }

    #[test]
    fn durations_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.download.stall_timeout, config.download.stall_timeout);
        assert_eq!(
            parsed.download.progress_interval,
            config.download.progress_interval
        );
    }
}
