//! Bluetooth functionality for the lock bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, and running the unlock protocol against a lock.

mod commands;
mod connection;
mod constants;
mod error;
mod manager;
mod notification;
mod observable;
mod registry;
mod scanner;
mod session;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use commands::LockCommand;
pub use connection::{BluestTransport, extract_mac_address};
pub use constants::*; // Re-export all constants
pub use error::{SessionError, TransportError};
pub use manager::BluetoothManager;
pub use notification::{
    OpCode, ProtocolEvent, WriteFeedback, decode_notification, decode_write_result,
};
pub use observable::Observable;
pub use registry::{DeviceFilter, DeviceRegistry, FilteredView};
pub use scanner::BluetoothScanner;
pub use session::ConnectionSession;
pub use transport::{
    AdvertisementStream, ByteStream, RetryPolicy, Transport, TransportResult,
};
pub use types::{
    Advertisement, CharacteristicBinding, CharacteristicHandle, ConnectionState,
    DisconnectReason, DiscoveredDevice, ServiceLayout, WriteMode, signal_level,
};
