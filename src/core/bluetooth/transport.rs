//! Transport capability consumed by the lock session
//! The session and the scanner only talk to the radio through this trait, so the
//! platform stack can be swapped for an in-memory one.

use std::time::Duration;

use futures_util::stream::BoxStream;

use crate::core::bluetooth::constants::{MAX_CONNECT_RETRIES, connect_retry_delay};
use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::types::{
    Advertisement, CharacteristicBinding, CharacteristicHandle, ServiceLayout, WriteMode,
};

pub type TransportResult<T> = Result<T, TransportError>;

/// Advertisements in arrival order. Dropping the stream stops the scan.
pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Notification payloads for one characteristic. The stream ends when the link drops.
pub type ByteStream = BoxStream<'static, Vec<u8>>;

/// How often and how patiently `Transport::connect` retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of connection attempts
    pub attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_CONNECT_RETRIES, connect_retry_delay())
    }
}

/// Transport trait
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Starts scanning and returns the advertisement stream
    async fn start_scan(&self) -> TransportResult<AdvertisementStream>;

    /// Connects to `address`, retrying according to `policy`. Auto-reconnect is never requested.
    async fn connect(&self, address: &str, policy: RetryPolicy) -> TransportResult<()>;

    async fn disconnect(&self, address: &str) -> TransportResult<()>;

    /// Looks up the service described by `layout`. `Ok(None)` means the peripheral does
    /// not expose it or one of its two characteristics.
    async fn resolve_service(
        &self,
        address: &str,
        layout: ServiceLayout,
    ) -> TransportResult<Option<CharacteristicBinding>>;

    async fn read_characteristic(&self, handle: &CharacteristicHandle) -> TransportResult<Vec<u8>>;

    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        bytes: &[u8],
        mode: WriteMode,
    ) -> TransportResult<()>;

    /// Subscribes to notifications on `handle`
    async fn enable_notifications(&self, handle: &CharacteristicHandle)
    -> TransportResult<ByteStream>;

    /// Forgets any cached service description so the next resolve rediscovers it.
    async fn purge_service_cache(&self, address: &str) -> TransportResult<()>;
}
