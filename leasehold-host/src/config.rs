use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::errors::{HostError, Result};

/// Lease timing shared by every host of a deployment.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LeaseConfig {
    /// How often the scanner wakes to renew, acquire and steal (milliseconds)
    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,
    /// Validity granted by each acquire or renew (milliseconds)
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,
    /// Upper bound on a single lease store call (milliseconds)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

fn default_renew_interval_ms() -> u64 {
    10_000
}

fn default_lease_duration_ms() -> u64 {
    30_000
}

fn default_operation_timeout_ms() -> u64 {
    5_000
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            renew_interval_ms: default_renew_interval_ms(),
            lease_duration_ms: default_lease_duration_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

impl LeaseConfig {
    /// Builds a validated config with the default operation timeout.
    pub fn new(renew_interval_ms: u64, lease_duration_ms: u64) -> Result<Self> {
        let config = Self {
            renew_interval_ms,
            lease_duration_ms,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_operation_timeout_ms(mut self, operation_timeout_ms: u64) -> Result<Self> {
        self.operation_timeout_ms = operation_timeout_ms;
        self.validate()?;
        Ok(self)
    }

    /// The renew interval must be under half the lease duration so that a single
    /// missed cycle does not cost the lease. Violations are rejected, never adjusted.
    pub fn validate(&self) -> Result<()> {
        if self.renew_interval_ms == 0 || self.lease_duration_ms == 0 {
            return Err(HostError::InvalidConfiguration(
                "renew interval and lease duration must be positive".to_string(),
            ));
        }
        if self.renew_interval_ms.saturating_mul(2) >= self.lease_duration_ms {
            return Err(HostError::InvalidConfiguration(format!(
                "renew interval ({} ms) must be less than half the lease duration ({} ms)",
                self.renew_interval_ms, self.lease_duration_ms
            )));
        }
        if self.operation_timeout_ms == 0 {
            return Err(HostError::InvalidConfiguration(
                "operation timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Settings for one host process, loadable from YAML.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfiguration {
    /// Identifier written as the lease owner; must be unique among hosts
    pub host_name: String,
    /// The fixed set of partitions shared by all hosts
    pub partitions: Vec<String>,
    /// Lease timing
    #[serde(default)]
    pub lease: LeaseConfig,
    /// Take leases from busier hosts to even out the distribution
    #[serde(default = "default_stealing_enabled")]
    pub stealing_enabled: bool,
}

fn default_stealing_enabled() -> bool {
    true
}

impl HostConfiguration {
    pub fn new(host_name: impl Into<String>, partitions: Vec<String>, lease: LeaseConfig) -> Self {
        Self {
            host_name: host_name.into(),
            partitions,
            lease,
            stealing_enabled: default_stealing_enabled(),
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: HostConfiguration = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_name.trim().is_empty() {
            return Err(HostError::InvalidConfiguration(
                "host name must not be empty".to_string(),
            ));
        }
        if self.partitions.is_empty() {
            return Err(HostError::InvalidConfiguration(
                "at least one partition is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for partition in &self.partitions {
            if !seen.insert(partition.as_str()) {
                return Err(HostError::InvalidConfiguration(format!(
                    "partition {} is listed more than once",
                    partition
                )));
            }
        }
        self.lease.validate()
    }
}
