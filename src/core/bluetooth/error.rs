//! Error types for the Bluetooth module

use thiserror::Error;

use crate::core::bluetooth::types::DisconnectReason;

/// Errors surfaced by the connection session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The peripheral does not expose the lock service or one of its characteristics
    #[error("device does not expose the lock service")]
    UnsupportedDevice,
    /// The link could not be established or was lost
    #[error("connection timed out")]
    ConnectionTimeout,
    /// A payload did not match any known op-code
    #[error("invalid protocol data: {0:02X?}")]
    InvalidProtocolData(Vec<u8>),
    /// A command was issued while the characteristics were not bound
    #[error("characteristic is not bound")]
    OperationOnUnboundCharacteristic,
    /// The session driver is no longer running
    #[error("session is closed")]
    SessionClosed,
}

impl SessionError {
    /// Returns the disconnect reason this error is reported as, if any.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            SessionError::UnsupportedDevice => Some(DisconnectReason::UnsupportedDevice),
            SessionError::ConnectionTimeout => Some(DisconnectReason::Timeout),
            _ => None,
        }
    }
}

/// Errors reported by a transport implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    AdapterUnavailable,
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("unknown characteristic {uuid} on {device}")]
    UnknownCharacteristic { device: String, uuid: uuid::Uuid },
    #[error("failed to connect to {address} after {attempts} attempts: {reason}")]
    ConnectFailed {
        address: String,
        attempts: u32,
        reason: String,
    },
    #[error("bluetooth backend error: {0}")]
    Backend(String),
}

impl From<bluest::Error> for TransportError {
    fn from(err: bluest::Error) -> Self {
        TransportError::Backend(err.to_string())
    }
}
