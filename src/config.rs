//! Engine configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `ENGINE_*` environment variables, then CLI flags (applied by the caller).

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compute::{ExecutorConfig, DEFAULT_NOTIFICATIONS_PER_SECOND, DEFAULT_WORKERS};
use crate::scheduler::{
    AdmissionConfig, DEFAULT_JOB_DROP_AGE, DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_CONCURRENT_JOBS,
};

/// Default job store location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://jobs.db";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Configuration for the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker threads per batch.
    pub workers: usize,
    /// Progress notifications per second while a batch runs.
    pub notifications_per_second: u32,
    /// Maximum number of admitted jobs running at once.
    pub max_concurrent_jobs: usize,
    /// Age in seconds after which a running job is marked `timed_out`.
    pub job_timeout_secs: u64,
    /// Age in seconds after which any job record is deleted.
    pub job_drop_age_secs: u64,
    /// SQLite job store URL or path.
    pub database_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            notifications_per_second: DEFAULT_NOTIFICATIONS_PER_SECOND,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT.as_secs(),
            job_drop_age_secs: DEFAULT_JOB_DROP_AGE.as_secs(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overlaid with `path` when given, then the environment.
    /// The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML file. Missing keys keep their defaults. Not validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Defaults overlaid with the environment, validated.
    ///
    /// # Environment Variables
    ///
    /// - `ENGINE_WORKERS`: worker threads per batch (default: 6)
    /// - `ENGINE_NOTIFICATIONS_PER_SECOND`: progress cadence (default: 2)
    /// - `ENGINE_MAX_CONCURRENT_JOBS`: admission limit (default: 2)
    /// - `ENGINE_JOB_TIMEOUT_SECS`: running-job timeout (default: 1800)
    /// - `ENGINE_JOB_DROP_AGE_SECS`: record drop age (default: 86400)
    /// - `ENGINE_DATABASE_URL`: job store (default: sqlite://jobs.db)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Overlays `ENGINE_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlays variables looked up through `lookup`.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("ENGINE_WORKERS") {
            self.workers = parse_env_value(&val, "ENGINE_WORKERS")?;
        }

        if let Some(val) = lookup("ENGINE_NOTIFICATIONS_PER_SECOND") {
            self.notifications_per_second = parse_env_value(&val, "ENGINE_NOTIFICATIONS_PER_SECOND")?;
        }

        if let Some(val) = lookup("ENGINE_MAX_CONCURRENT_JOBS") {
            self.max_concurrent_jobs = parse_env_value(&val, "ENGINE_MAX_CONCURRENT_JOBS")?;
        }

        if let Some(val) = lookup("ENGINE_JOB_TIMEOUT_SECS") {
            self.job_timeout_secs = parse_env_value(&val, "ENGINE_JOB_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("ENGINE_JOB_DROP_AGE_SECS") {
            self.job_drop_age_secs = parse_env_value(&val, "ENGINE_JOB_DROP_AGE_SECS")?;
        }

        if let Some(val) = lookup("ENGINE_DATABASE_URL") {
            self.database_url = val;
        }

        Ok(())
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "workers must be greater than 0".to_string(),
            ));
        }

        if self.notifications_per_second == 0 {
            return Err(ConfigError::ValidationFailed(
                "notifications_per_second must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_jobs must be greater than 0".to_string(),
            ));
        }

        if self.job_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "job_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.job_drop_age_secs < self.job_timeout_secs {
            return Err(ConfigError::ValidationFailed(
                "job_drop_age_secs cannot be shorter than job_timeout_secs".to_string(),
            ));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Executor settings derived from this configuration.
    pub fn executor(&self) -> Result<ExecutorConfig, ConfigError> {
        let workers = NonZeroUsize::new(self.workers).ok_or_else(|| {
            ConfigError::ValidationFailed("workers must be greater than 0".to_string())
        })?;
        if self.notifications_per_second == 0 {
            return Err(ConfigError::ValidationFailed(
                "notifications_per_second must be greater than 0".to_string(),
            ));
        }

        Ok(ExecutorConfig::new(workers)
            .with_notify_interval(Duration::from_secs(1) / self.notifications_per_second))
    }

    /// Admission settings derived from this configuration.
    pub fn admission(&self) -> Result<AdmissionConfig, ConfigError> {
        let max = NonZeroUsize::new(self.max_concurrent_jobs).ok_or_else(|| {
            ConfigError::ValidationFailed("max_concurrent_jobs must be greater than 0".to_string())
        })?;

        Ok(AdmissionConfig::default()
            .with_max_concurrent_jobs(max)
            .with_job_timeout(Duration::from_secs(self.job_timeout_secs))
            .with_job_drop_age(Duration::from_secs(self.job_drop_age_secs)))
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_notifications_per_second(mut self, rate: u32) -> Self {
        self.notifications_per_second = rate;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, 6);
        assert_eq!(config.notifications_per_second, 2);
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.job_timeout_secs, 1800);
        assert_eq!(config.job_drop_age_secs, 86400);
        assert_eq!(config.database_url, "sqlite://jobs.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_component_configs() {
        let config = EngineConfig::default()
            .with_workers(3)
            .with_notifications_per_second(4)
            .with_max_concurrent_jobs(5);

        let executor = config.executor().expect("executor config");
        assert_eq!(executor.workers.get(), 3);
        assert_eq!(executor.notify_interval, Duration::from_millis(250));

        let admission = config.admission().expect("admission config");
        assert_eq!(admission.max_concurrent_jobs.get(), 5);
        assert_eq!(admission.job_timeout, Duration::from_secs(1800));
        assert_eq!(admission.job_drop_age, Duration::from_secs(86400));
    }

    #[test]
    fn test_yaml_overlays_defaults() {
        let config = EngineConfig::from_yaml("workers: 12\ndatabase_url: sqlite:///tmp/x.db\n")
            .expect("valid yaml");
        assert_eq!(config.workers, 12);
        assert_eq!(config.database_url, "sqlite:///tmp/x.db");
        assert_eq!(config.max_concurrent_jobs, 2);
    }

    #[test]
    fn test_yaml_rejects_unknown_keys() {
        let err = EngineConfig::from_yaml("wokers: 12\n").expect_err("typo");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "max_concurrent_jobs: 7").expect("write");

        let config = EngineConfig::from_file(file.path()).expect("load");
        assert_eq!(config.max_concurrent_jobs, 7);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ENGINE_WORKERS", "8"),
            ("ENGINE_JOB_TIMEOUT_SECS", " 60 "),
            ("ENGINE_DATABASE_URL", "sqlite://other.db"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_vars(|key| vars.get(key).map(|v| v.to_string()))
            .expect("valid vars");

        assert_eq!(config.workers, 8);
        assert_eq!(config.job_timeout_secs, 60);
        assert_eq!(config.database_url, "sqlite://other.db");
        assert_eq!(config.notifications_per_second, 2);
    }

    #[test]
    fn test_env_invalid_value() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_vars(|key| (key == "ENGINE_WORKERS").then(|| "many".to_string()))
            .expect_err("not a number");
        assert!(err.to_string().contains("ENGINE_WORKERS"));
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        for config in [
            EngineConfig::default().with_workers(0),
            EngineConfig::default().with_notifications_per_second(0),
            EngineConfig::default().with_max_concurrent_jobs(0),
            EngineConfig::default().with_database_url(""),
        ] {
            assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));
        }
    }

    #[test]
    fn test_validation_drop_age_not_shorter_than_timeout() {
        let config = EngineConfig {
            job_timeout_secs: 600,
            job_drop_age_secs: 300,
            ..Default::default()
        };
        let err = config.validate().expect_err("drop age too short");
        assert!(err.to_string().contains("job_drop_age_secs"));
    }
}
