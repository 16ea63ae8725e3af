//! Watchdog Configuration
//!
//! Read from the `systemd_watchdog` section of a YAML file; every field has a
//! default so the section, or the whole file, may be absent.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for the diagnostic interval (ten years)
pub const MAX_SMART_TEST_INTERVAL_SECS: u64 = 10 * 365 * 86400;

/// Watchdog configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Service units to monitor; empty means every discovered service
    pub monitored_services: Vec<String>,
    /// Seconds between periodic drive diagnostics
    pub smart_test_interval_secs: u64,
    /// Sleep between reactor iterations
    pub poll_interval_ms: u64,
    /// Wait before connecting to the event source
    pub startup_delay_secs: u64,
    /// Capacity of the bounded bus queue
    pub event_queue_capacity: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            monitored_services: Vec::new(),
            smart_test_interval_secs: 86400,
            poll_interval_ms: 2000,
            startup_delay_secs: 60,
            event_queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default, rename = "systemd_watchdog")]
    watchdog: Option<WatchdogConfig>,
}

impl WatchdogConfig {
    /// Parse the watchdog section out of a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: ConfigFile = serde_yaml::from_str(yaml)?;
        let config = file.watchdog.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Load the watchdog section from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Configuration(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.smart_test_interval_secs > MAX_SMART_TEST_INTERVAL_SECS {
            return Err(Error::Configuration(format!(
                "smart_test_interval_secs must not exceed {}",
                MAX_SMART_TEST_INTERVAL_SECS
            )));
        }
        if self.monitored_services.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::Configuration(
                "monitored_services contains a blank name".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn smart_test_interval(&self) -> Duration {
        Duration::from_secs(self.smart_test_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }
}
