use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{
    CONNECT_RETRY_DELAY_MS, DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_SCAN_DURATION_SECS,
    DeviceFilter, MAX_CONNECT_RETRIES, RetryPolicy,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Only list devices advertising the lock name prefix
    pub filter_by_name: bool,
    /// Only list devices whose strongest signal reached the proximity threshold
    pub nearby_only: bool,
    /// How long the bridge scans before picking a device, in seconds
    pub scan_duration_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            filter_by_name: true,
            nearby_only: false,
            scan_duration_secs: DEFAULT_SCAN_DURATION_SECS,
        }
    }
}

impl ScanConfig {
    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter {
            name_required: self.filter_by_name,
            nearby_only: self.nearby_only,
        }
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Number of connection attempts
    pub max_retries: u32,
    /// Pause between connection attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Time allowed for the long-connect handshake, in seconds
    pub handshake_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_CONNECT_RETRIES,
            retry_delay_ms: CONNECT_RETRY_DELAY_MS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }
}

impl ConnectionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}
