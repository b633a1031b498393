//! Runtime settings
//!
//! Settings are stored in JSON and are entirely optional: a missing or
//! empty file yields the defaults, and any field left out of the file keeps
//! its default value.

use crate::lifecycle::LifecycleConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PortUP settings
///
/// # Example
/// ```rust,no_run
/// use portup::config::Settings;
///
/// let settings = Settings::load("portup.json").expect("Failed to load");
/// println!("Scanning {} slots during cleanup", settings.max_scan_slots);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SSDP search timeout, in milliseconds
    pub discovery_timeout_ms: u64,
    /// Pause after a failed add or delete, in milliseconds
    pub retry_backoff_ms: u64,
    /// Pause between mapping table reads during cleanup, in milliseconds
    pub scan_delay_ms: u64,
    /// Number of mapping table slots read during cleanup
    pub max_scan_slots: u32,
    /// Lease requested for new mappings in seconds, 0 for permanent
    pub lease_duration_secs: u32,
    /// Re-run discovery after a failed add or delete
    pub rediscover_on_failure: bool,
    /// Query the release feed on startup
    pub check_for_updates: bool,
    /// Compare the gateway's external IP with the HTTP-observed one
    pub check_public_ip: bool,
    /// Release feed timeout, in milliseconds
    pub update_timeout_ms: u64,
}

impl Settings {
    /// Load settings from a JSON file
    ///
    /// Returns the defaults if the file doesn't exist or is empty. Unreadable
    /// files surface as `Error::Io`, malformed JSON as
    /// `Error::JsonSerialization` and out-of-range values as `Error::Config`.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Self = serde_json::from_str(&data)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a JSON file, creating parent directories
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;

        Ok(())
    }

    /// Reject values the gateway scan cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_scan_slots == 0 || self.max_scan_slots > u32::from(u16::MAX) {
            return Err(Error::Config(format!(
                "max_scan_slots must be between 1 and {}, got {}",
                u16::MAX,
                self.max_scan_slots
            )));
        }
        Ok(())
    }

    /// Discovery search timeout
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Release feed timeout
    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }

    /// Settings relevant to the lifecycle manager
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            scan_delay: Duration::from_millis(self.scan_delay_ms),
            // validate() keeps this within u16
            max_scan_slots: u16::try_from(self.max_scan_slots).unwrap_or(u16::MAX),
            lease_duration_secs: self.lease_duration_secs,
            rediscover_on_failure: self.rediscover_on_failure,
            check_public_ip: self.check_public_ip,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 3_000,
            retry_backoff_ms: 50,
            scan_delay_ms: 50,
            max_scan_slots: 64,
            lease_duration_secs: 0,
            rediscover_on_failure: true,
            check_for_updates: true,
            check_public_ip: true,
            update_timeout_ms: 10_000,
        }
    }
}
