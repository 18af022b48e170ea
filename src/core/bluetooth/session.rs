//! Connection session for a single lock
//! Owns the connection state machine and the handshake signals. Every public
//! operation and every piece of transport progress is funnelled through one
//! ordered channel into a driver task, which is the only writer of session state.

use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::commands::LockCommand;
use crate::core::bluetooth::error::{SessionError, TransportError};
use crate::core::bluetooth::notification::{
    ProtocolEvent, WriteFeedback, decode_notification, decode_write_result, to_hex,
};
use crate::core::bluetooth::observable::Observable;
use crate::core::bluetooth::transport::{ByteStream, RetryPolicy, Transport};
use crate::core::bluetooth::types::{
    CharacteristicBinding, ConnectionState, DisconnectReason, ServiceLayout,
};

/// Which characteristic a payload was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Notify,
    Write,
}

/// Progress reported by a link task
#[derive(Debug)]
enum LinkProgress {
    LinkUp,
    ServiceResolved(Option<CharacteristicBinding>),
    Payload { source: Endpoint, bytes: Vec<u8> },
    SetupComplete,
    SetupFailed(TransportError),
    ConnectFailed(TransportError),
    LinkLost,
}

#[derive(Debug)]
enum SessionInput {
    Connect(String),
    Reconnect,
    Disconnect,
    Command(LockCommand),
    Shutdown,
    Progress { generation: u64, progress: LinkProgress },
}

#[derive(Clone)]
struct Outputs {
    state: Arc<Observable<ConnectionState>>,
    long_connect: Arc<Observable<bool>>,
    unlock_result: Arc<Observable<Option<bool>>>,
}

/// Handle to a running session. Dropping it stops the driver.
pub struct ConnectionSession {
    tx: UnboundedSender<SessionInput>,
    outputs: Outputs,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Starts a session driver on the current tokio runtime.
    pub fn create(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let outputs = Outputs {
            state: Arc::new(Observable::default()),
            long_connect: Arc::new(Observable::new(false)),
            unlock_result: Arc::new(Observable::new(None)),
        };

        let driver = SessionDriver {
            transport,
            policy,
            tx: tx.clone(),
            outputs: outputs.clone(),
            device: None,
            generation: 0,
            active: None,
            pending: false,
            binding: None,
            supported: true,
            link_address: None,
        };
        let handle = tokio::spawn(driver.run(rx));

        Self {
            tx,
            outputs,
            driver: Mutex::new(Some(handle)),
        }
    }

    fn send(&self, input: SessionInput) -> Result<(), SessionError> {
        self.tx.send(input).map_err(|_| SessionError::SessionClosed)
    }

    /// Binds `address` and connects. Ignored while a device is already bound.
    pub fn connect(&self, address: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionInput::Connect(address.into()))
    }

    /// Reissues the connect sequence for the bound device.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.send(SessionInput::Reconnect)
    }

    /// Unbinds the device, cancelling a pending connect or closing the link.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionInput::Disconnect)
    }

    /// Sends the unlock command. Ignored while the write characteristic is unbound.
    pub fn try_unlock(&self) -> Result<(), SessionError> {
        self.send(SessionInput::Command(LockCommand::Unlock))
    }

    /// Switches the lock LED. Ignored while the write characteristic is unbound.
    pub fn set_led(&self, on: bool) -> Result<(), SessionError> {
        self.send(SessionInput::Command(LockCommand::Led(on)))
    }

    pub fn state(&self) -> ConnectionState {
        self.outputs.state.get()
    }

    pub fn subscribe_state(&self) -> (ConnectionState, UnboundedReceiver<ConnectionState>) {
        self.outputs.state.subscribe()
    }

    pub fn long_connect_achieved(&self) -> bool {
        self.outputs.long_connect.get()
    }

    pub fn subscribe_long_connect(&self) -> (bool, UnboundedReceiver<bool>) {
        self.outputs.long_connect.subscribe()
    }

    pub fn last_unlock_result(&self) -> Option<bool> {
        self.outputs.unlock_result.get()
    }

    pub fn subscribe_unlock_result(&self) -> (Option<bool>, UnboundedReceiver<Option<bool>>) {
        self.outputs.unlock_result.subscribe()
    }

    /// Disconnects, stops the driver and waits for it to finish.
    pub async fn dispose(self) {
        let _ = self.send(SessionInput::Shutdown);
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Session driver finished with a join error: {:?}", e);
            }
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        let _ = self.tx.send(SessionInput::Shutdown);
    }
}

struct SessionDriver {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    tx: UnboundedSender<SessionInput>,
    outputs: Outputs,
    /// Bound device address
    device: Option<String>,
    generation: u64,
    /// Generation and cancellation token of the live attempt, pending or ready
    active: Option<(u64, CancellationToken)>,
    /// A connect sequence is in flight and has not reached Ready
    pending: bool,
    binding: Option<CharacteristicBinding>,
    supported: bool,
    /// Address the link came up on, for teardown
    link_address: Option<String>,
}

impl SessionDriver {
    async fn run(mut self, mut rx: UnboundedReceiver<SessionInput>) {
        debug!("Session driver started");
        while let Some(input) = rx.recv().await {
            match input {
                SessionInput::Connect(address) => self.connect(address),
                SessionInput::Reconnect => self.reconnect(),
                SessionInput::Disconnect => self.disconnect().await,
                SessionInput::Command(command) => self.write_command(command).await,
                SessionInput::Progress {
                    generation,
                    progress,
                } => self.progress(generation, progress).await,
                SessionInput::Shutdown => {
                    self.disconnect().await;
                    break;
                }
            }
        }
        debug!("Session driver stopped");
    }

    fn connect(&mut self, address: String) {
        if let Some(bound) = &self.device {
            if *bound == address {
                debug!("Device {} already bound, ignoring connect", address);
            } else {
                warn!(
                    "Ignoring connect to {} while {} is bound to the session",
                    address, bound
                );
            }
            return;
        }
        self.device = Some(address);
        self.reconnect();
    }

    fn reconnect(&mut self) {
        let Some(address) = self.device.clone() else {
            debug!("No device bound, ignoring reconnect");
            return;
        };
        if self.pending || self.outputs.state.get().is_ready() {
            debug!("Connect to {} already in progress", address);
            return;
        }

        if let Some((_, token)) = self.active.take() {
            token.cancel();
        }
        self.generation += 1;
        let token = CancellationToken::new();
        self.active = Some((self.generation, token.clone()));
        self.pending = true;
        self.supported = true;
        self.link_address = None;

        info!("Connecting to {} (attempt {})", address, self.generation);
        self.outputs.state.set(ConnectionState::Connecting);

        let link = LinkTask {
            transport: self.transport.clone(),
            address,
            policy: self.policy,
            generation: self.generation,
            tx: self.tx.clone(),
        };
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Link task {} cancelled", link.generation);
                }
                _ = link.run() => {}
            }
        });
    }

    async fn disconnect(&mut self) {
        if let Some(address) = self.device.take() {
            info!("Unbinding device {}", address);
        }
        if self.active.is_some() {
            self.teardown(DisconnectReason::Unspecified).await;
        }
    }

    async fn progress(&mut self, generation: u64, progress: LinkProgress) {
        if self.active.as_ref().map(|(live, _)| *live) != Some(generation) {
            debug!("Dropping stale progress from attempt {}: {:?}", generation, progress);
            return;
        }

        match progress {
            LinkProgress::LinkUp => {
                self.link_address = self.device.clone();
                info!("Link up, discovering services...");
                self.outputs.state.set(ConnectionState::Initializing);
            }
            LinkProgress::ServiceResolved(Some(binding)) => {
                debug!("Bound lock characteristics: {:?}", binding);
                self.binding = Some(binding);
            }
            LinkProgress::ServiceResolved(None) => {
                let err = SessionError::UnsupportedDevice;
                warn!("{}", err);
                self.supported = false;
                self.teardown(reason_for(&err)).await;
            }
            LinkProgress::Payload { source, bytes } => match source {
                Endpoint::Notify => self.handle_event(decode_notification(&bytes)).await,
                Endpoint::Write => match decode_write_result(&bytes) {
                    WriteFeedback::Echo(op) => debug!("Write characteristic echoed {:?}", op),
                    WriteFeedback::InvalidData(bytes) => {
                        warn!("{}", SessionError::InvalidProtocolData(bytes))
                    }
                },
            },
            LinkProgress::SetupComplete => {
                self.pending = false;
                info!("Lock session ready");
                self.outputs.state.set(ConnectionState::Ready);
            }
            LinkProgress::SetupFailed(e) => {
                warn!("Characteristic setup failed: {}", e);
                self.teardown(reason_for(&SessionError::ConnectionTimeout))
                    .await;
            }
            LinkProgress::ConnectFailed(e) => {
                let err = SessionError::ConnectionTimeout;
                warn!("{}: {}", err, e);
                self.active = None;
                self.pending = false;
                self.outputs.state.set(ConnectionState::Disconnected {
                    reason: reason_for(&err),
                });
            }
            LinkProgress::LinkLost => {
                warn!("Link to the lock was lost");
                self.teardown(reason_for(&SessionError::ConnectionTimeout))
                    .await;
            }
        }
    }

    async fn handle_event(&mut self, event: ProtocolEvent) {
        debug!("Protocol event: {:?}", event);
        match event {
            ProtocolEvent::PrepareForConnect => {
                self.write_command(LockCommand::ConnectHandshake).await;
            }
            ProtocolEvent::LongConnectAchieved => {
                if self.outputs.long_connect.set(true) {
                    info!("Long connection established");
                }
            }
            ProtocolEvent::UnlockResult(success) => {
                info!("Unlock {}", if success { "succeeded" } else { "failed" });
                self.outputs.unlock_result.publish(Some(success));
            }
            ProtocolEvent::InvalidData(bytes) => {
                warn!("{}", SessionError::InvalidProtocolData(bytes));
            }
        }
    }

    async fn write_command(&self, command: LockCommand) {
        let Some(binding) = &self.binding else {
            debug!(
                "Ignoring {:?}: {}",
                command,
                SessionError::OperationOnUnboundCharacteristic
            );
            return;
        };

        let bytes = command.as_bytes();
        info!("Sending {:?} ({})", command, to_hex(bytes));
        if let Err(e) = self
            .transport
            .write_characteristic(&binding.write, bytes, command.write_mode())
            .await
        {
            warn!("{}: {}", SessionError::InvalidProtocolData(bytes.to_vec()), e);
        }
    }

    /// Takes the session down to `Disconnected { reason }`.
    async fn teardown(&mut self, reason: DisconnectReason) {
        self.outputs.state.set(ConnectionState::Disconnecting);
        if let Some((_, token)) = self.active.take() {
            token.cancel();
        }
        self.pending = false;

        if let Some(address) = self.link_address.take() {
            if let Err(e) = self.transport.disconnect(&address).await {
                warn!("Failed to disconnect from {}: {}", address, e);
            }
            if !self.supported {
                if let Err(e) = self.transport.purge_service_cache(&address).await {
                    warn!("Failed to purge service cache for {}: {}", address, e);
                }
            }
        }

        self.binding = None;
        self.outputs.long_connect.set(false);
        info!("Disconnected ({:?})", reason);
        self.outputs
            .state
            .set(ConnectionState::Disconnected { reason });
    }
}

fn reason_for(err: &SessionError) -> DisconnectReason {
    err.disconnect_reason().unwrap_or(DisconnectReason::Unspecified)
}

/// One connect attempt: link, service discovery, characteristic setup, then
/// notification forwarding until the link drops.
struct LinkTask {
    transport: Arc<dyn Transport>,
    address: String,
    policy: RetryPolicy,
    generation: u64,
    tx: UnboundedSender<SessionInput>,
}

impl LinkTask {
    fn post(&self, progress: LinkProgress) {
        let _ = self.tx.send(SessionInput::Progress {
            generation: self.generation,
            progress,
        });
    }

    async fn run(&self) {
        if let Err(e) = self.transport.connect(&self.address, self.policy).await {
            self.post(LinkProgress::ConnectFailed(e));
            return;
        }
        self.post(LinkProgress::LinkUp);

        let binding = match self
            .transport
            .resolve_service(&self.address, ServiceLayout::LOCK)
            .await
        {
            Ok(Some(binding)) => binding,
            Ok(None) => {
                self.post(LinkProgress::ServiceResolved(None));
                return;
            }
            Err(e) => {
                self.post(LinkProgress::SetupFailed(e));
                return;
            }
        };
        self.post(LinkProgress::ServiceResolved(Some(binding.clone())));

        let mut notifications = match self.setup(&binding).await {
            Ok(stream) => stream,
            Err(e) => {
                self.post(LinkProgress::SetupFailed(e));
                return;
            }
        };
        self.post(LinkProgress::SetupComplete);

        while let Some(bytes) = notifications.next().await {
            self.post(LinkProgress::Payload {
                source: Endpoint::Notify,
                bytes,
            });
        }
        self.post(LinkProgress::LinkLost);
    }

    async fn setup(
        &self,
        binding: &CharacteristicBinding,
    ) -> Result<ByteStream, TransportError> {
        let bytes = self.transport.read_characteristic(&binding.write).await?;
        self.post(LinkProgress::Payload {
            source: Endpoint::Write,
            bytes,
        });

        let bytes = self.transport.read_characteristic(&binding.notify).await?;
        self.post(LinkProgress::Payload {
            source: Endpoint::Notify,
            bytes,
        });

        self.transport.enable_notifications(&binding.notify).await
    }
}
