#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use ble_lock_bridge_lib::core::bluetooth::{
    Advertisement, AdvertisementStream, ByteStream, CharacteristicBinding, CharacteristicHandle,
    ConnectionState, FilteredView, RetryPolicy, ServiceLayout, Transport, TransportError,
    TransportResult, WriteMode,
};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(2);

/// Calls recorded by the fake transport, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    ConnectAttempt(String),
    Disconnect(String),
    Resolve(String),
    Read(Uuid),
    Write(Vec<u8>, WriteMode),
    EnableNotifications(Uuid),
    Purge(String),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    unsupported: bool,
    failing_connects: u32,
    hold_connect: bool,
    fail_writes: bool,
    notify_delay: Option<Duration>,
    reads: HashMap<Uuid, Vec<u8>>,
    scan_tx: Option<UnboundedSender<Advertisement>>,
    notify_tx: Option<UnboundedSender<Vec<u8>>>,
}

/// In-memory transport driven by the tests
pub struct FakeTransport {
    state: Mutex<FakeState>,
    writes_tx: UnboundedSender<(Vec<u8>, WriteMode)>,
}

impl FakeTransport {
    pub fn new() -> (Self, UnboundedReceiver<(Vec<u8>, WriteMode)>) {
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let transport = Self {
            state: Mutex::new(FakeState::default()),
            writes_tx,
        };
        (transport, writes_rx)
    }

    pub fn set_supported(&self, supported: bool) {
        self.state.lock().unsupported = !supported;
    }

    /// The next `count` connection attempts fail
    pub fn fail_connects(&self, count: u32) {
        self.state.lock().failing_connects = count;
    }

    /// Connection attempts never complete while set
    pub fn hold_connect(&self, hold: bool) {
        self.state.lock().hold_connect = hold;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Enabling notifications takes `delay` before it completes
    pub fn delay_notifications(&self, delay: Duration) {
        self.state.lock().notify_delay = Some(delay);
    }

    pub fn set_read(&self, uuid: Uuid, bytes: &[u8]) {
        self.state.lock().reads.insert(uuid, bytes.to_vec());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::ConnectAttempt(_)))
            .count()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn rposition(&self, call: &Call) -> Option<usize> {
        self.calls().iter().rposition(|c| c == call)
    }

    /// Pushes a notification from the lock. Returns false if notifications are not enabled.
    pub fn notify(&self, bytes: &[u8]) -> bool {
        match &self.state.lock().notify_tx {
            Some(tx) => tx.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Ends the notification stream, which the session sees as link loss.
    pub fn drop_link(&self) {
        self.state.lock().notify_tx = None;
    }

    pub fn advertise(&self, address: &str, name: Option<&str>, rssi: i16) -> bool {
        match &self.state.lock().scan_tx {
            Some(tx) => tx.send(Advertisement::new(address, name, rssi)).is_ok(),
            None => false,
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

fn receiver_stream<T: Send + 'static>(
    mut rx: UnboundedReceiver<T>,
) -> futures_util::stream::BoxStream<'static, T> {
    futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn start_scan(&self) -> TransportResult<AdvertisementStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.calls.push(Call::StartScan);
        state.scan_tx = Some(tx);
        Ok(receiver_stream(rx))
    }

    async fn connect(&self, address: &str, policy: RetryPolicy) -> TransportResult<()> {
        for attempt in 1..=policy.attempts {
            let (hold, fail) = {
                let mut state = self.state.lock();
                state.calls.push(Call::ConnectAttempt(address.to_string()));
                let fail = state.failing_connects > 0;
                if fail {
                    state.failing_connects -= 1;
                }
                (state.hold_connect, fail)
            };
            if hold {
                std::future::pending::<()>().await;
            }
            if !fail {
                return Ok(());
            }
            if attempt < policy.attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }
        Err(TransportError::ConnectFailed {
            address: address.to_string(),
            attempts: policy.attempts,
            reason: "fake failure".to_string(),
        })
    }

    async fn disconnect(&self, address: &str) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Disconnect(address.to_string()));
        state.notify_tx = None;
        Ok(())
    }

    async fn resolve_service(
        &self,
        address: &str,
        layout: ServiceLayout,
    ) -> TransportResult<Option<CharacteristicBinding>> {
        let mut state = self.state.lock();
        state.calls.push(Call::Resolve(address.to_string()));
        if state.unsupported {
            return Ok(None);
        }
        Ok(Some(CharacteristicBinding {
            notify: CharacteristicHandle::new(address, layout.notify),
            write: CharacteristicHandle::new(address, layout.write),
        }))
    }

    async fn read_characteristic(&self, handle: &CharacteristicHandle) -> TransportResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.calls.push(Call::Read(handle.uuid));
        Ok(state.reads.get(&handle.uuid).cloned().unwrap_or_default())
    }

    async fn write_characteristic(
        &self,
        _handle: &CharacteristicHandle,
        bytes: &[u8],
        mode: WriteMode,
    ) -> TransportResult<()> {
        let fail = {
            let mut state = self.state.lock();
            state.calls.push(Call::Write(bytes.to_vec(), mode));
            state.fail_writes
        };
        if fail {
            return Err(TransportError::Backend("write failed".to_string()));
        }
        let _ = self.writes_tx.send((bytes.to_vec(), mode));
        Ok(())
    }

    async fn enable_notifications(
        &self,
        handle: &CharacteristicHandle,
    ) -> TransportResult<ByteStream> {
        let delay = self.state.lock().notify_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.calls.push(Call::EnableNotifications(handle.uuid));
        state.notify_tx = Some(tx);
        Ok(receiver_stream(rx))
    }

    async fn purge_service_cache(&self, address: &str) -> TransportResult<()> {
        self.record(Call::Purge(address.to_string()));
        Ok(())
    }
}

/// Waits until `rx` yields `target`
pub async fn wait_for_state(rx: &mut UnboundedReceiver<ConnectionState>, target: ConnectionState) {
    tokio::time::timeout(WAIT, async {
        while let Some(state) = rx.recv().await {
            if state == target {
                return;
            }
        }
        panic!("state channel closed before reaching {:?}", target);
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", target));
}

/// Waits for the next value on any observer channel
pub async fn next_value<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a value")
        .expect("channel closed")
}

/// Waits until a published filtered view satisfies `predicate`
pub async fn wait_for_view(
    rx: &mut UnboundedReceiver<FilteredView>,
    predicate: impl Fn(&FilteredView) -> bool,
) -> FilteredView {
    tokio::time::timeout(WAIT, async {
        while let Some(view) = rx.recv().await {
            if predicate(&view) {
                return view;
            }
        }
        panic!("view channel closed");
    })
    .await
    .expect("timed out waiting for the filtered view")
}

pub fn addresses(view: &FilteredView) -> Vec<String> {
    view.as_ref()
        .map(|devices| devices.iter().map(|d| d.address.clone()).collect())
        .unwrap_or_default()
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10))
}
