//! BLE lock bridge library
//! Discovers nearby locks, runs the long-connect handshake and sends unlock commands.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
