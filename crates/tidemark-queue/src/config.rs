//! Queue configuration and processor identity.
//!
//! These settings make the coordinator layout and retry limits explicit and
//! reproducible for operators. Environment loading is strict: a malformed
//! value is a configuration error, never a silent fallback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{QueueError, Result};

const ENV_ROOT_PATH: &str = "TIDEMARK_QUEUE_ROOT_PATH";
const ENV_BUCKETS: &str = "TIDEMARK_QUEUE_BUCKETS";
const ENV_MAX_LOADING_RETRIES: &str = "TIDEMARK_QUEUE_MAX_LOADING_RETRIES";
const ENV_PROCESSOR_IDENTITY: &str = "TIDEMARK_QUEUE_PROCESSOR_IDENTITY";
const ENV_HASH_SEED: &str = "TIDEMARK_QUEUE_HASH_SEED";

const DEFAULT_BUCKETS: u32 = 1;
const DEFAULT_MAX_LOADING_RETRIES: u32 = 0;
const DEFAULT_HASH_SEED: u64 = 0;

/// Configuration for one ordered ingestion queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Coordinator path under which all queue state lives.
    pub root_path: String,
    /// Number of independent ordered shards (≥ 1).
    pub buckets: u32,
    /// Retriable-failure budget per path; 0 disables retries.
    pub max_loading_retries: u32,
    /// Stable string identifying this worker in `processing_id` payloads
    /// and lock bodies.
    pub processor_identity: String,
    /// Fixed seed for the path hasher. Changing it after data exists
    /// invalidates bucket placement.
    pub hash_seed: u64,
}

impl QueueConfig {
    /// Creates a configuration with defaults for everything but the root.
    #[must_use]
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            buckets: DEFAULT_BUCKETS,
            max_loading_retries: DEFAULT_MAX_LOADING_RETRIES,
            processor_identity: default_processor_identity(),
            hash_seed: DEFAULT_HASH_SEED,
        }
    }

    /// Returns whether the queue is sharded (`buckets > 1`).
    #[must_use]
    pub fn is_sharded(&self) -> bool {
        self.buckets > 1
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the root path is not absolute,
    /// when it ends with a slash, or when the bucket count is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.root_path.starts_with('/') {
            return Err(QueueError::configuration(format!(
                "root_path must be absolute, got '{}'",
                self.root_path
            )));
        }
        if self.root_path.len() > 1 && self.root_path.ends_with('/') {
            return Err(QueueError::configuration(format!(
                "root_path must not end with '/', got '{}'",
                self.root_path
            )));
        }
        if self.buckets == 0 {
            return Err(QueueError::configuration("buckets must be at least 1"));
        }
        if self.processor_identity.is_empty() {
            return Err(QueueError::configuration(
                "processor_identity must not be empty",
            ));
        }
        Ok(())
    }

    /// Loads configuration from the process environment.
    ///
    /// `TIDEMARK_QUEUE_ROOT_PATH` is required; the remaining variables fall
    /// back to defaults when unset.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the root path is missing or any
    /// provided value fails to parse or validate.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the root path is missing or any
    /// provided value fails to parse or validate.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root_path = get_env(ENV_ROOT_PATH)
            .ok_or_else(|| QueueError::configuration(format!("{ENV_ROOT_PATH} must be set")))?;

        let config = Self {
            root_path,
            buckets: parse_u32_env(&get_env, ENV_BUCKETS, DEFAULT_BUCKETS)?,
            max_loading_retries: parse_u32_env(
                &get_env,
                ENV_MAX_LOADING_RETRIES,
                DEFAULT_MAX_LOADING_RETRIES,
            )?,
            processor_identity: get_env(ENV_PROCESSOR_IDENTITY)
                .unwrap_or_else(default_processor_identity),
            hash_seed: parse_u64_env(&get_env, ENV_HASH_SEED, DEFAULT_HASH_SEED)?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_u32_env<F>(get_env: &F, key: &str, default: u32) -> Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    raw.parse::<u32>().map_err(|_| {
        QueueError::configuration(format!("{key} must be an unsigned integer, got '{raw}'"))
    })
}

fn parse_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    raw.parse::<u64>().map_err(|_| {
        QueueError::configuration(format!("{key} must be an unsigned integer, got '{raw}'"))
    })
}

/// Builds a `<hostname>:<pid>:<random>` identity for this process.
fn default_processor_identity() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{hostname}:{}:{}", std::process::id(), Ulid::new())
}

/// The record written into `processing_id` payloads and lock bodies,
/// identifying the worker that currently owns a claim or a bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorInfo {
    /// Stable worker identity from [`QueueConfig::processor_identity`].
    pub identity: String,

    /// The per-claim processing id, when this record describes a claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_id: Option<String>,

    /// When this record was written.
    pub acquired_at: DateTime<Utc>,
}

impl ProcessorInfo {
    /// Creates a record for a bucket lease.
    #[must_use]
    pub fn for_lease(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            processing_id: None,
            acquired_at: Utc::now(),
        }
    }

    /// Creates a record for a file claim with its processing id.
    #[must_use]
    pub fn for_claim(identity: impl Into<String>, processing_id: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            processing_id: Some(processing_id.into()),
            acquired_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = QueueConfig::new("/queues/events");
        assert_eq!(config.buckets, 1);
        assert_eq!(config.max_loading_retries, 0);
        assert!(!config.is_sharded());
        config.validate().expect("valid");
    }

    #[test]
    fn test_validate_rejects_relative_root() {
        let config = QueueConfig::new("queues/events");
        assert!(matches!(
            config.validate(),
            Err(QueueError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_trailing_slash() {
        let config = QueueConfig::new("/queues/events/");
        assert!(matches!(
            config.validate(),
            Err(QueueError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_buckets() {
        let mut config = QueueConfig::new("/queues/events");
        config.buckets = 0;
        assert!(matches!(
            config.validate(),
            Err(QueueError::Configuration { .. })
        ));
    }

    #[test]
    fn test_from_env_requires_root() {
        let result = QueueConfig::from_env_with(env_of(&[]));
        assert!(matches!(result, Err(QueueError::Configuration { .. })));
    }

    #[test]
    fn test_from_env_parses_values() {
        let config = QueueConfig::from_env_with(env_of(&[
            (ENV_ROOT_PATH, "/queues/events"),
            (ENV_BUCKETS, "4"),
            (ENV_MAX_LOADING_RETRIES, "3"),
            (ENV_PROCESSOR_IDENTITY, "host-1:42:abc"),
            (ENV_HASH_SEED, "7"),
        ]))
        .expect("config");
        assert_eq!(config.root_path, "/queues/events");
        assert_eq!(config.buckets, 4);
        assert_eq!(config.max_loading_retries, 3);
        assert_eq!(config.processor_identity, "host-1:42:abc");
        assert_eq!(config.hash_seed, 7);
        assert!(config.is_sharded());
    }

    #[test]
    fn test_from_env_rejects_malformed_buckets() {
        let result = QueueConfig::from_env_with(env_of(&[
            (ENV_ROOT_PATH, "/queues/events"),
            (ENV_BUCKETS, "four"),
        ]));
        assert!(matches!(result, Err(QueueError::Configuration { .. })));
    }

    #[test]
    fn test_processor_info_roundtrip() {
        let info = ProcessorInfo::for_claim("host-1:42:abc", "01H000000000000000000000AB");
        let json = serde_json::to_string(&info).expect("serialize");
        let parsed: ProcessorInfo = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(info, parsed);
    }

    #[test]
    fn test_processor_info_lease_omits_processing_id() {
        let info = ProcessorInfo::for_lease("host-1:42:abc");
        let json = serde_json::to_string(&info).expect("serialize");
        assert!(!json.contains("processingId"));
    }
}
