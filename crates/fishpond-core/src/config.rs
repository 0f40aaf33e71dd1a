//! Pond configuration.
//!
//! Loaded from TOML; every section falls back to defaults so an empty file
//! is a valid configuration.
//!
//! ```toml
//! [snapshots]
//! min_events_for_snapshot = 1024
//! storage_min_age_secs = 3600
//!
//! [monotonic]
//! min_events_for_snapshot = 10
//! state_cache_capacity = 32
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::retry::RetryPolicy;
use crate::snapshot_scheduler::SnapshotScheduler;

/// Highest tier the scheduler may assign.
pub const MAX_TIER_LIMIT: u8 = 40;

// =============================================================================
// Sections
// =============================================================================

/// Scheduling and persistence of local snapshots in the replay engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Cycle interval between snapshot candidates.
    pub min_events_for_snapshot: u64,
    /// Highest tier label handed out; cycles divisible by more get this one.
    pub max_tier: u8,
    /// Minimum wall-clock age (relative to the newest event) before a
    /// candidate is persisted.
    pub storage_min_age_secs: u64,
    /// Bound of the persistence job queue.
    pub persist_queue_capacity: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            min_events_for_snapshot: 1024,
            max_tier: 20,
            storage_min_age_secs: 3600,
            persist_queue_capacity: 64,
        }
    }
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_scheduler(
            "snapshots",
            self.min_events_for_snapshot,
            self.max_tier,
        )?;
        if self.persist_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "snapshots.persist_queue_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn scheduler(&self) -> SnapshotScheduler {
        SnapshotScheduler::new(
            self.min_events_for_snapshot,
            self.max_tier,
            Duration::from_secs(self.storage_min_age_secs),
        )
    }
}

/// Snapshot retrieval behaviour during `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    pub retrieve_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            retrieve_attempts: 3,
            retry_initial_delay_ms: 50,
            retry_max_delay_ms: 2_000,
        }
    }
}

impl HydrationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieve_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "hydration.retrieve_attempts must be > 0".into(),
            ));
        }
        validate_delays(
            "hydration",
            self.retry_initial_delay_ms,
            self.retry_max_delay_ms,
        )
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_attempts: Some(self.retrieve_attempts),
            ..RetryPolicy::snapshot_retrieval()
        }
    }
}

/// Monotonic subscription pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonotonicConfig {
    pub min_events_for_snapshot: u64,
    pub max_tier: u8,
    pub storage_min_age_secs: u64,
    /// Known-good states kept around as time-travel reset points.
    pub state_cache_capacity: usize,
    pub resubscribe_initial_delay_ms: u64,
    pub resubscribe_max_delay_ms: u64,
    /// Capacity of the state channel handed to the application.
    pub output_buffer: usize,
    pub persist_queue_capacity: usize,
}

impl Default for MonotonicConfig {
    fn default() -> Self {
        Self {
            min_events_for_snapshot: 10,
            max_tier: 20,
            storage_min_age_secs: 3600,
            state_cache_capacity: 32,
            resubscribe_initial_delay_ms: 100,
            resubscribe_max_delay_ms: 10_000,
            output_buffer: 16,
            persist_queue_capacity: 64,
        }
    }
}

impl MonotonicConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_scheduler(
            "monotonic",
            self.min_events_for_snapshot,
            self.max_tier,
        )?;
        validate_delays(
            "monotonic",
            self.resubscribe_initial_delay_ms,
            self.resubscribe_max_delay_ms,
        )?;
        for (name, value) in [
            ("state_cache_capacity", self.state_cache_capacity),
            ("output_buffer", self.output_buffer),
            ("persist_queue_capacity", self.persist_queue_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "monotonic.{name} must be > 0"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn scheduler(&self) -> SnapshotScheduler {
        SnapshotScheduler::new(
            self.min_events_for_snapshot,
            self.max_tier,
            Duration::from_secs(self.storage_min_age_secs),
        )
    }

    #[must_use]
    pub fn resubscribe_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.resubscribe_initial_delay_ms),
            max_delay: Duration::from_millis(self.resubscribe_max_delay_ms),
            ..RetryPolicy::resubscribe()
        }
    }
}

fn validate_scheduler(section: &str, interval: u64, max_tier: u8) -> Result<(), ConfigError> {
    if interval == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{section}.min_events_for_snapshot must be > 0"
        )));
    }
    if max_tier > MAX_TIER_LIMIT {
        return Err(ConfigError::ValidationError(format!(
            "{section}.max_tier must be <= {MAX_TIER_LIMIT}"
        )));
    }
    Ok(())
}

fn validate_delays(section: &str, initial_ms: u64, max_ms: u64) -> Result<(), ConfigError> {
    if initial_ms > max_ms {
        return Err(ConfigError::ValidationError(format!(
            "{section}: initial delay ({initial_ms}ms) exceeds max delay ({max_ms}ms)"
        )));
    }
    Ok(())
}

// =============================================================================
// Root
// =============================================================================

/// Complete configuration for a pond process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PondConfig {
    pub snapshots: SnapshotConfig,
    pub hydration: HydrationConfig,
    pub monotonic: MonotonicConfig,
    pub logging: LogConfig,
}

impl PondConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.snapshots.validate()?;
        self.hydration.validate()?;
        self.monotonic.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = PondConfig::default();
        config.validate().unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.hydration.retrieve_attempts, 3);

        let written = toml::to_string(&config).unwrap();
        assert_eq!(PondConfig::from_toml_str(&written).unwrap(), config);
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = PondConfig::from_toml_str("").unwrap();
        assert_eq!(config, PondConfig::default());
        assert_eq!(config.snapshots.min_events_for_snapshot, 1024);
        assert_eq!(config.monotonic.min_events_for_snapshot, 10);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = PondConfig::from_toml_str(
            r#"
            [snapshots]
            min_events_for_snapshot = 16

            [monotonic]
            state_cache_capacity = 4

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.snapshots.min_events_for_snapshot, 16);
        assert_eq!(config.snapshots.storage_min_age_secs, 3600);
        assert_eq!(config.monotonic.state_cache_capacity, 4);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.snapshots.scheduler().interval(), 16);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = PondConfig::from_toml_str("[snapshots]\nmin_events_for_snapshot = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)), "{err}");
    }

    #[test]
    fn tier_limit_is_enforced() {
        let mut config = PondConfig::default();
        config.monotonic.max_tier = MAX_TIER_LIMIT + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_delays_are_rejected() {
        let mut config = PondConfig::default();
        config.monotonic.resubscribe_initial_delay_ms = 5_000;
        config.monotonic.resubscribe_max_delay_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let mut config = PondConfig::default();
        config.monotonic.output_buffer = 0;
        assert!(config.validate().is_err());

        let mut config = PondConfig::default();
        config.snapshots.persist_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = PondConfig::default();
        config.hydration.retrieve_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = PondConfig::from_toml_str("[snapshots\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(_)));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[hydration]\nretrieve_attempts = 7").unwrap();
        let config = PondConfig::load(file.path()).unwrap();
        assert_eq!(config.hydration.retrieve_attempts, 7);
        assert_eq!(config.hydration.retry_policy().max_attempts, Some(7));
    }

    #[test]
    fn load_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("pond.toml");
        let err = PondConfig::load(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(p) if p.ends_with("pond.toml")));
    }

    #[test]
    fn resubscribe_policy_never_gives_up() {
        let policy = MonotonicConfig::default().resubscribe_policy();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
    }
}
