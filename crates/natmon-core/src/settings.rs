//! Monitor Settings

use crate::config::ConfigError;
use crate::probe::ProbePolicy;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Destination of the default route
pub const DEFAULT_ROUTE_CIDR: &str = "0.0.0.0/0";

/// Tunables of the failover loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Wait between monitoring cycles
    pub check_interval_secs: u64,
    /// Echo requests sent per liveness probe
    pub probe_count: u32,
    /// Per-request probe timeout
    pub probe_timeout_secs: u64,
    /// Route destination watched in every route table
    pub destination_cidr: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            probe_count: 3,
            probe_timeout_secs: 1,
            destination_cidr: DEFAULT_ROUTE_CIDR.into(),
        }
    }
}

impl MonitorSettings {
    /// Load from a JSON file; missing keys fall back to defaults
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.into(),
            reason: e.to_string(),
        })?;
        let settings: Self = serde_json::from_str(&content)
            .map_err(|e| ConfigError::InvalidSetting(format!("{}: {}", path, e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_secs == 0 {
            return Err(ConfigError::InvalidSetting("check_interval_secs must be > 0".into()));
        }
        if self.probe_count == 0 {
            return Err(ConfigError::InvalidSetting("probe_count must be > 0".into()));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting("probe_timeout_secs must be > 0".into()));
        }
        self.destination_cidr
            .parse::<IpNetwork>()
            .map_err(|e| ConfigError::InvalidSetting(format!(
                "destination_cidr {:?}: {}", self.destination_cidr, e
            )))?;
        Ok(())
    }

    /// Wait between cycles
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Probe bounds for peer liveness checks
    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            count: self.probe_count,
            timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }
}
