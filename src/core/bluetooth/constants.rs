//! Constants used throughout the lock bridge
//! This module contains the fixed protocol values: service and characteristic
//! UUIDs, op-codes, command frames and discovery thresholds.

use std::time::Duration;

use uuid::Uuid;

/// Advertised name prefix of supported locks
pub const DEVICE_NAME_PREFIX: &str = "YX_";

/// Minimum `highest_rssi` for the proximity filter [dBm]
pub const NEARBY_RSSI_THRESHOLD: i16 = -50;

/// Upper bounds of the signal bar bands, in order. Anything above the last one is the top band.
pub const SIGNAL_BAR_THRESHOLDS: [i16; 4] = [10, 28, 45, 65];

/// The UUID of the lock service
pub const UUID_LOCK_SERVICE: Uuid = Uuid::from_u128(0x0000ffb0_0000_1000_8000_00805f9b34fb);

/// The UUID of the notify characteristic (inbound protocol events)
pub const UUID_LOCK_NOTIFY_CHAR: Uuid = Uuid::from_u128(0x0000ffb2_0000_1000_8000_00805f9b34fb);

/// The UUID of the write characteristic (outbound commands)
pub const UUID_LOCK_WRITE_CHAR: Uuid = Uuid::from_u128(0x0000ffb1_0000_1000_8000_00805f9b34fb);

/// Device asks the central to start the long-connect handshake
pub const OP_PREPARE_FOR_CONNECT: u16 = 0xFCCF;
/// Long connection established
pub const OP_LONG_CONNECT_SUCCESS: u16 = 0xA90D;
/// Unlock accepted
pub const OP_UNLOCK_SUCCESS: u16 = 0xA70D;
/// Unlock rejected
pub const OP_UNLOCK_FAILURE: u16 = 0xA700;

/// Reply to `OP_PREPARE_FOR_CONNECT`
pub const CONNECT_HANDSHAKE_FRAME: [u8; 4] = [0xA9, 0x02, 0xFC, 0xCF];

/// Unlock request
pub const UNLOCK_FRAME: [u8; 9] = [0xA7, 0x07, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x03];

pub const LED_ON: u8 = 0x01;
pub const LED_OFF: u8 = 0x00;

/// Maximum number of connection attempts
pub const MAX_CONNECT_RETRIES: u32 = 3;

/// Delay between connection attempts in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 100;

/// Default scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;

/// Default time allowed for the long-connect handshake in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 15;

pub const fn connect_retry_delay() -> Duration {
    Duration::from_millis(CONNECT_RETRY_DELAY_MS)
}
