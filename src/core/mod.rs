//! Core functionality for the lock bridge
//! This module contains everything needed to discover, connect to and unlock a lock

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BluetoothManager, ConnectionSession, DeviceRegistry};
