//! Defines shared data structures for the Bluetooth module.

use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    SIGNAL_BAR_THRESHOLDS, UUID_LOCK_NOTIFY_CHAR, UUID_LOCK_SERVICE, UUID_LOCK_WRITE_CHAR,
};

/// A single advertisement as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Stable address of the advertising peripheral
    pub address: String,
    /// Advertised local name, if any
    pub name: Option<String>,
    /// Signal strength of this advertisement [dBm]
    pub rssi: i16,
}

impl Advertisement {
    pub fn new(address: impl Into<String>, name: Option<&str>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
            rssi,
        }
    }
}

/// Represents a discovered peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// The address of the device, used as the primary key
    pub address: String,
    /// The name from the most recent advertisement
    pub name: Option<String>,
    /// The most recent signal strength
    pub rssi: i16,
    /// The signal strength before the most recent one
    pub previous_rssi: i16,
    /// The strongest signal seen since the device was first discovered
    pub highest_rssi: i16,
}

impl DiscoveredDevice {
    /// Creates a record from the first advertisement of a device
    pub fn new(advertisement: &Advertisement) -> Self {
        Self {
            address: advertisement.address.clone(),
            name: advertisement.name.clone(),
            rssi: advertisement.rssi,
            previous_rssi: advertisement.rssi,
            highest_rssi: advertisement.rssi,
        }
    }

    /// Applies a later advertisement from the same address in place.
    pub fn update(&mut self, advertisement: &Advertisement) {
        self.name = advertisement.name.clone();
        self.previous_rssi = self.rssi;
        self.rssi = advertisement.rssi;
        if self.highest_rssi < self.rssi {
            self.highest_rssi = self.rssi;
        }
    }

    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        self.address == advertisement.address
    }

    /// Returns true if the signal bar band changed with the last update.
    pub fn has_signal_level_changed(&self) -> bool {
        signal_level(self.rssi) != signal_level(self.previous_rssi)
    }
}

/// Maps a signal strength onto one of the five signal bar bands (0..=4).
pub fn signal_level(rssi: i16) -> u8 {
    SIGNAL_BAR_THRESHOLDS
        .iter()
        .position(|threshold| rssi <= *threshold)
        .unwrap_or(SIGNAL_BAR_THRESHOLDS.len()) as u8
}

/// Why the session ended up disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    /// Initial state, or disconnected on request
    Unspecified,
    /// The peripheral does not expose the lock service
    UnsupportedDevice,
    /// Link lost or all connection attempts failed
    Timeout,
}

/// Lifecycle state of the connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected { reason: DisconnectReason },
    Connecting,
    Initializing,
    Ready,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected {
            reason: DisconnectReason::Unspecified,
        }
    }
}

/// How a characteristic write is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Opaque reference to a characteristic on a connected peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub device: String,
    pub uuid: Uuid,
}

impl CharacteristicHandle {
    pub fn new(device: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            device: device.into(),
            uuid,
        }
    }
}

/// The two characteristics the lock protocol runs over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicBinding {
    /// Inbound events
    pub notify: CharacteristicHandle,
    /// Outbound commands
    pub write: CharacteristicHandle,
}

/// Which service and characteristics `resolve_service` looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceLayout {
    pub service: Uuid,
    pub notify: Uuid,
    pub write: Uuid,
}

impl ServiceLayout {
    pub const LOCK: ServiceLayout = ServiceLayout {
        service: UUID_LOCK_SERVICE,
        notify: UUID_LOCK_NOTIFY_CHAR,
        write: UUID_LOCK_WRITE_CHAR,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_level_bands() {
        assert_eq!(signal_level(-70), 0);
        assert_eq!(signal_level(10), 0);
        assert_eq!(signal_level(11), 1);
        assert_eq!(signal_level(28), 1);
        assert_eq!(signal_level(45), 2);
        assert_eq!(signal_level(65), 3);
        assert_eq!(signal_level(66), 4);
    }

    #[test]
    fn test_update_keeps_highest_rssi() {
        let mut device = DiscoveredDevice::new(&Advertisement::new("AA", Some("YX_1"), -70));
        device.update(&Advertisement::new("AA", Some("YX_1"), -40));
        device.update(&Advertisement::new("AA", None, -90));

        assert_eq!(device.rssi, -90);
        assert_eq!(device.previous_rssi, -40);
        assert_eq!(device.highest_rssi, -40);
        assert_eq!(device.name, None);
    }

    #[test]
    fn test_signal_level_changed() {
        let mut device = DiscoveredDevice::new(&Advertisement::new("AA", None, 5));
        assert!(!device.has_signal_level_changed());

        device.update(&Advertisement::new("AA", None, 20));
        assert!(device.has_signal_level_changed());

        device.update(&Advertisement::new("AA", None, 25));
        assert!(!device.has_signal_level_changed());
    }

    #[test]
    fn test_default_state_is_disconnected() {
        assert_eq!(
            ConnectionState::default(),
            ConnectionState::Disconnected {
                reason: DisconnectReason::Unspecified
            }
        );
    }
}
