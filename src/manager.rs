//! Connection manager: the serialized actor behind the public API.
//!
//! # Architecture
//!
//! ```text
//!   ConnectionManager (handle)                 actor task
//!         │  connect / disconnect / ...            │
//!         │ ──── ManagerInput::Control ──────────► │ StateMachine::apply
//!         │                                        │   └─ on entry: transport, monitor
//!         │                     TransportSignal ─► │ FrameDecoder
//!         │                         HealthEvent ─► │
//!         │  ◄──── watch::Receiver<ConnectionState>┤
//!         │                                        └─► ListenerHub ─► subscribers
//! ```
//!
//! Every input, whatever its origin, is handled by one task in arrival
//! order. Side effects run on state entry, never during transition lookup.
//! Follow-up signals produced by an entry (network gating, restart, URL
//! errors) are queued and applied before the next input.
//!
//! Signals of a replaced or closed transport are never seen: the actor
//! drops the receiver of a connection as soon as it stops caring about it.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::config::ClientConfig;
use crate::connection::{redact_url, ConnectionConfig};
use crate::decoder::{encode_keep_alive, DecodedFrame, FrameDecoder, SessionInfo};
use crate::error::{ChatError, ErrorCode, ErrorKind};
use crate::events::ManagerInput;
use crate::health::{HealthEvent, HealthMonitor};
use crate::listeners::{ListenerHub, ListenerId, SocketListener, Subscription};
use crate::state::{ConnectKind, ConnectionState, ControlSignal, Disconnected, StateMachine};
use crate::transport::{ShutdownReason, Transport, TransportSignal, WsTransport};

/// Handle to a running connection manager.
///
/// Construct once and share by reference (or wrap in `Arc`). Dropping the
/// handle shuts the actor down.
#[derive(Debug)]
pub struct ConnectionManager {
    inputs: mpsc::UnboundedSender<ManagerInput>,
    state_rx: watch::Receiver<ConnectionState>,
    hub: ListenerHub,
    transport: Arc<dyn Transport>,
    monitor: Arc<HealthMonitor>,
}

impl ConnectionManager {
    /// Spawn the actor over the given transport.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(client: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let (inputs, input_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (monitor, health_rx) = HealthMonitor::spawn(client.health());
        let monitor = Arc::new(monitor);
        let hub = ListenerHub::new();

        let actor = Actor {
            client,
            transport: Arc::clone(&transport),
            monitor: Arc::clone(&monitor),
            health_rx,
            transport_rx: None,
            machine: StateMachine::new(),
            decoder: FrameDecoder::new(),
            hub: hub.clone(),
            state_tx,
            last_config: None,
            network_available: true,
            pending: VecDeque::new(),
        };
        tokio::spawn(actor.run(input_rx));

        Self {
            inputs,
            state_rx,
            hub,
            transport,
            monitor,
        }
    }

    /// Spawn the actor over a WebSocket transport.
    #[must_use]
    pub fn with_websocket(client: ClientConfig) -> Self {
        let transport = Arc::new(WsTransport::new(client.connect_timeout()));
        Self::new(client, transport)
    }

    // ========== Commands ==========

    /// Submit a raw signal to the state machine.
    pub fn submit(&self, signal: ControlSignal) {
        self.send(ManagerInput::Control(signal));
    }

    /// Connect as `config` (`Initial`).
    pub fn connect(&self, config: ConnectionConfig) {
        self.connect_with(config, ConnectKind::Initial);
    }

    /// Connect with an explicit request kind.
    ///
    /// `ForcedRetry` breaks out of `ByRequest` and `Permanent`;
    /// `AutomaticRetry` does not.
    pub fn connect_with(&self, config: ConnectionConfig, kind: ConnectKind) {
        self.submit(ControlSignal::RequestConnect { config, kind });
    }

    /// Disconnect and suppress automatic reconnection.
    pub fn disconnect(&self) {
        self.submit(ControlSignal::DisconnectRequested);
    }

    /// App went to the background.
    pub fn stop(&self) {
        self.submit(ControlSignal::StopRequested);
    }

    /// App came back to the foreground.
    pub fn resume(&self) {
        self.submit(ControlSignal::ResumeRequested);
    }

    /// The device regained connectivity.
    pub fn on_network_available(&self) {
        self.send(ManagerInput::Network { available: true });
    }

    /// The device lost connectivity.
    pub fn on_network_unavailable(&self) {
        self.send(ManagerInput::Network { available: false });
    }

    /// Queue a text frame on the live connection.
    ///
    /// Returns `true` only when connected and the transport accepted it.
    pub fn send_frame(&self, frame: impl Into<String>) -> bool {
        self.is_connected() && self.transport.send(frame.into())
    }

    /// Stop the actor, closing the transport and the health monitor.
    pub fn shutdown(&self) {
        self.send(ManagerInput::Shutdown);
    }

    // ========== Queries ==========

    /// Latest published state.
    #[must_use]
    pub fn current_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver that observes every published state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether the session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Server-assigned id of the open session.
    pub fn connection_id(&self) -> Result<String, ChatError> {
        self.state_rx
            .borrow()
            .session()
            .map(|session| session.connection_id.clone())
            .ok_or_else(|| ChatError::with_message(ErrorCode::SocketClosed, "Not connected"))
    }

    /// Wait until `Connected`, up to `timeout`.
    pub async fn await_connected(&self, timeout: Duration) -> Result<SessionInfo, ChatError> {
        let mut state_rx = self.state_rx.clone();
        let wait = async {
            loop {
                if let Some(session) = state_rx.borrow_and_update().session() {
                    return Ok(session.clone());
                }
                if state_rx.changed().await.is_err() {
                    return Err(ChatError::with_message(
                        ErrorCode::SocketClosed,
                        "Manager shut down",
                    ));
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or_else(|_| Err(ChatError::new(ErrorCode::Timeout)))
    }

    /// Reconnect attempts since the last successful session.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.monitor.failures()
    }

    // ========== Listeners ==========

    /// Channel subscription to state changes, events and errors.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    /// Register a callback listener.
    pub fn add_listener(&self, listener: Arc<dyn SocketListener>) -> ListenerId {
        let id = self.hub.add_listener(listener);
        log::debug!("[Listeners] {:?} registered ({} total)", id, self.hub.len());
        id
    }

    /// Unregister a listener or subscription.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.hub.remove(id)
    }

    fn send(&self, input: ManagerInput) {
        if self.inputs.send(input).is_err() {
            log::debug!("[Socket] Manager already shut down");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Map a classified error to the signal it forces, if any.
fn error_signal(error: ChatError) -> Option<ControlSignal> {
    match error.kind() {
        ErrorKind::Fatal => Some(ControlSignal::FatalError(error)),
        ErrorKind::Recoverable => Some(ControlSignal::RecoverableError(error)),
        ErrorKind::Informational => None,
    }
}

async fn next_transport_signal(
    rx: &mut Option<mpsc::UnboundedReceiver<TransportSignal>>,
) -> Option<TransportSignal> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// State owned by the actor task.
struct Actor {
    client: ClientConfig,
    transport: Arc<dyn Transport>,
    monitor: Arc<HealthMonitor>,
    health_rx: mpsc::UnboundedReceiver<HealthEvent>,
    transport_rx: Option<mpsc::UnboundedReceiver<TransportSignal>>,
    machine: StateMachine,
    decoder: FrameDecoder,
    hub: ListenerHub,
    state_tx: watch::Sender<ConnectionState>,
    /// Config of the latest connect request, reused by automatic retries.
    last_config: Option<ConnectionConfig>,
    network_available: bool,
    /// Follow-up signals produced while handling the current input.
    pending: VecDeque<ControlSignal>,
}

impl Actor {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<ManagerInput>) {
        log::debug!("[Socket] Manager started");
        loop {
            let input = tokio::select! {
                input = inputs.recv() => input.unwrap_or(ManagerInput::Shutdown),
                signal = next_transport_signal(&mut self.transport_rx) => match signal {
                    Some(signal) => ManagerInput::Transport(signal),
                    None => {
                        self.transport_rx = None;
                        continue;
                    }
                },
                Some(event) = self.health_rx.recv() => ManagerInput::Health(event),
            };

            if !self.handle_input(input) {
                break;
            }
        }

        self.drop_transport(ShutdownReason::GRACEFUL);
        self.monitor.shutdown();
        log::info!("[Socket] Manager stopped");
    }

    /// Returns `false` when the actor should exit.
    fn handle_input(&mut self, input: ManagerInput) -> bool {
        match input {
            ManagerInput::Control(signal) => self.submit(signal),
            ManagerInput::Network { available } => {
                self.network_available = available;
                self.submit(if available {
                    ControlSignal::NetworkRestored
                } else {
                    ControlSignal::NetworkLost
                });
            }
            ManagerInput::Transport(signal) => self.on_transport(signal),
            ManagerInput::Health(event) => self.on_health(event),
            ManagerInput::Shutdown => return false,
        }
        true
    }

    /// Apply a signal and everything its entry effects queue.
    fn submit(&mut self, signal: ControlSignal) {
        self.pending.push_back(signal);
        while let Some(signal) = self.pending.pop_front() {
            if let Some(entered) = self.machine.apply(&signal) {
                let entered = entered.clone();
                self.publish(&entered);
                self.on_enter(&entered);
            }
        }
    }

    fn publish(&self, state: &ConnectionState) {
        self.state_tx.send_replace(state.clone());
        self.hub.state_changed(state);
    }

    // ========== State entry ==========

    fn on_enter(&mut self, state: &ConnectionState) {
        match state {
            ConnectionState::Connecting { config, kind } => self.on_connecting(config, *kind),
            ConnectionState::Connected(session) => {
                log::info!(
                    "[Socket] Connected as {} (connection_id={})",
                    session.user_id,
                    session.connection_id
                );
                self.monitor.reset_backoff();
                self.monitor.start();
            }
            ConnectionState::Disconnected(disconnected) => {
                self.monitor.stop_liveness();
                match disconnected {
                    Disconnected::Temporary(error) => {
                        log::warn!("[Socket] Temporarily disconnected: {}", error);
                        self.drop_transport(ShutdownReason::ABNORMAL);
                        self.monitor.schedule_reconnect();
                    }
                    Disconnected::EventStreamStale => {
                        self.drop_transport(ShutdownReason::ABNORMAL);
                    }
                    Disconnected::Permanent(error) => {
                        log::error!("[Socket] Permanently disconnected: {}", error);
                        self.drop_transport(ShutdownReason::GRACEFUL);
                        self.monitor.stop();
                    }
                    Disconnected::NetworkUnavailable
                    | Disconnected::ByRequest
                    | Disconnected::Stopped => {
                        self.drop_transport(ShutdownReason::GRACEFUL);
                        self.monitor.stop();
                    }
                }
            }
            ConnectionState::RestartPending(reason) => match &self.last_config {
                Some(config) => {
                    log::info!("[Socket] Restarting after {:?}", reason);
                    self.pending.push_back(ControlSignal::RequestConnect {
                        config: config.as_reconnection(),
                        kind: ConnectKind::AutomaticRetry,
                    });
                }
                None => log::info!("[Socket] {:?} but never connected, staying idle", reason),
            },
        }
    }

    fn on_connecting(&mut self, config: &ConnectionConfig, kind: ConnectKind) {
        self.transport.cancel();
        self.transport_rx = None;
        self.monitor.cancel_reconnect();
        self.last_config = Some(config.clone());

        if !self.network_available {
            log::info!("[Socket] Network unavailable, not dialing");
            self.pending.push_back(ControlSignal::NetworkLost);
            return;
        }

        match config.authenticated_url(&self.client.ws_url, &self.client.api_key) {
            Ok(url) => {
                log::info!("[Socket] Opening {} ({:?})", redact_url(&url), kind);
                self.decoder.reset();
                self.transport_rx = Some(self.transport.open(url));
            }
            Err(error) => {
                log::warn!("[Socket] Cannot build connect URL: {}", error);
                let signal = self.report_error(error);
                self.pending.extend(signal);
            }
        }
    }

    /// Publish an error and return the signal its classification forces.
    ///
    /// A rejected token is expired first so the next attempt asks the
    /// provider for a fresh one.
    fn report_error(&mut self, error: ChatError) -> Option<ControlSignal> {
        if error.is_authentication_error() {
            if let Some(config) = &self.last_config {
                log::info!("[Socket] Token rejected ({}), expiring it", error.code.code());
                config.expire_token();
            }
        }
        self.hub.error(&error);
        error_signal(error)
    }

    fn drop_transport(&mut self, reason: ShutdownReason) {
        if self.transport_rx.take().is_some() {
            log::debug!("[Socket] Closing transport: {}", reason);
        }
        self.transport.close(reason);
    }

    // ========== Transport ==========

    fn on_transport(&mut self, signal: TransportSignal) {
        if signal.is_terminal() {
            self.transport_rx = None;
        }
        match signal {
            TransportSignal::Opened => {
                log::debug!("[Socket] Transport open, awaiting session");
                self.decoder.reset();
                self.monitor.start();
            }
            TransportSignal::FrameReceived(raw) => {
                self.monitor.ack();
                self.on_frame(&raw);
            }
            TransportSignal::Closing(reason) => {
                log::debug!("[Socket] Transport closing: {}", reason);
            }
            TransportSignal::Closed(reason) => {
                if reason.is_graceful() {
                    log::info!("[Socket] Server closed the connection: {}", reason);
                } else {
                    log::warn!("[Socket] Transport closed unexpectedly: {}", reason);
                }
                let error = ChatError::with_message(
                    ErrorCode::SocketClosed,
                    format!("Socket closed ({})", reason),
                );
                self.hub.error(&error);
                self.submit(ControlSignal::RecoverableError(error));
            }
            TransportSignal::Failed(error) => {
                log::warn!("[Socket] Transport failed: {}", error);
                if let Some(signal) = self.report_error(error) {
                    self.submit(signal);
                }
            }
        }
    }

    fn on_frame(&mut self, raw: &str) {
        match self.decoder.decode(raw) {
            DecodedFrame::SessionEstablished(session) => {
                self.submit(ControlSignal::SessionEstablished(session));
            }
            DecodedFrame::ApplicationEvent(event) => {
                if event.is_health_check() {
                    log::trace!("[Socket] health.check received");
                } else {
                    self.hub.event(&event);
                }
            }
            DecodedFrame::TransportError(error) => {
                log::warn!("[Socket] Frame error: {}", error);
                if let Some(signal) = self.report_error(error) {
                    self.submit(signal);
                }
            }
        }
    }

    // ========== Health ==========

    fn on_health(&mut self, event: HealthEvent) {
        match event {
            HealthEvent::SendKeepAlive => match self.machine.state().session() {
                Some(session) => {
                    let frame = encode_keep_alive(&session.connection_id);
                    if !self.transport.send(frame) {
                        log::debug!("[Socket] Keep-alive not sent, transport closed");
                    }
                }
                None => log::trace!("[Socket] Skipping keep-alive, not connected"),
            },
            HealthEvent::Stale => self.submit(ControlSignal::StreamStale),
            HealthEvent::Reconnect if self.machine.state().is_stopped() => {
                log::debug!("[Socket] Reconnect timer fired after stop, ignoring");
            }
            HealthEvent::Reconnect => match &self.last_config {
                Some(config) => {
                    let config = config.as_reconnection();
                    self.submit(ControlSignal::RequestConnect {
                        config,
                        kind: ConnectKind::AutomaticRetry,
                    });
                }
                None => log::debug!("[Socket] Reconnect timer fired without a config"),
            },
        }
    }
}
