//! Shared helpers for integration tests.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_socket::{
    ChatError, ClientConfig, ConnectionConfig, ConnectionManager, Notification, ShutdownReason,
    Subscription, TokenProvider, Transport, TransportSignal, User,
};
use tokio::sync::mpsc;
use url::Url;

/// First frame the backend sends after a successful handshake.
pub const SESSION_FRAME: &str =
    r#"{"type":"health.check","connection_id":"conn-1","me":{"id":"jc","name":"JC"}}"#;

/// Server liveness frame after the session opened.
pub const HEALTH_CHECK_FRAME: &str = r#"{"type":"health.check","connection_id":"conn-1"}"#;

/// A regular application event.
pub const MESSAGE_FRAME: &str =
    r#"{"type":"message.new","cid":"messaging:general","created_at":"2024-01-01T10:00:00Z"}"#;

/// Error envelope for an expired token (recoverable).
pub const TOKEN_EXPIRED_FRAME: &str =
    r#"{"error":{"code":40,"message":"token expired","StatusCode":401}}"#;

/// Error envelope rejecting the token signature (fatal).
pub const AUTH_ERROR_FRAME: &str =
    r#"{"error":{"code":43,"message":"signature mismatch","StatusCode":401}}"#;

#[derive(Debug, Default)]
struct MockState {
    opened: Vec<Url>,
    sent: Vec<String>,
    closes: Vec<ShutdownReason>,
    cancels: usize,
    current: Option<mpsc::UnboundedSender<TransportSignal>>,
    is_open: bool,
}

/// In-memory transport. Tests play the server by emitting signals on the
/// channel of the latest `open`.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock lock poisoned")
    }

    /// Deliver a signal on the current connection. `false` when none is live.
    pub fn emit(&self, signal: TransportSignal) -> bool {
        let mut state = self.lock();
        if matches!(signal, TransportSignal::Opened) {
            state.is_open = true;
        }
        match &state.current {
            Some(tx) => tx.send(signal).is_ok(),
            None => false,
        }
    }

    /// Shorthand for `emit(FrameReceived(..))`.
    pub fn frame(&self, raw: &str) -> bool {
        self.emit(TransportSignal::FrameReceived(raw.to_string()))
    }

    pub fn open_count(&self) -> usize {
        self.lock().opened.len()
    }

    pub fn last_url(&self) -> Option<Url> {
        self.lock().opened.last().cloned()
    }

    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    pub fn closes(&self) -> Vec<ShutdownReason> {
        self.lock().closes.clone()
    }

    pub fn is_live(&self) -> bool {
        self.lock().current.is_some()
    }
}

impl Transport for MockTransport {
    fn open(&self, url: Url) -> mpsc::UnboundedReceiver<TransportSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.opened.push(url);
        state.current = Some(tx);
        state.is_open = false;
        rx
    }

    fn send(&self, frame: String) -> bool {
        let mut state = self.lock();
        if state.current.is_some() && state.is_open {
            state.sent.push(frame);
            true
        } else {
            false
        }
    }

    fn close(&self, reason: ShutdownReason) {
        let mut state = self.lock();
        if state.current.take().is_some() {
            state.closes.push(reason);
        }
        state.is_open = false;
    }

    fn cancel(&self) {
        let mut state = self.lock();
        if state.current.take().is_some() {
            state.cancels += 1;
        }
        state.is_open = false;
    }
}

/// Hands out `jwt-1`, `jwt-2`, ... on every load.
#[derive(Debug, Default)]
pub struct RotatingTokens {
    loads: AtomicU32,
}

impl RotatingTokens {
    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }
}

impl TokenProvider for RotatingTokens {
    fn load_token(&self) -> Result<String, ChatError> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("jwt-{n}"))
    }
}

/// Token carried in the `authorization` parameter of a connect URL.
pub fn url_token(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == "authorization")
        .map(|(_, v)| v.into_owned())
}

/// Client settings pointing at a fake backend with default timings.
pub fn client_config() -> ClientConfig {
    ClientConfig {
        ws_url: "wss://chat.test".to_string(),
        api_key: "test-key".to_string(),
        ..ClientConfig::default()
    }
}

pub fn user_config() -> ConnectionConfig {
    ConnectionConfig::user(User::new("jc"), "jwt-token")
}

pub fn manager() -> (ConnectionManager, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let manager = ConnectionManager::new(client_config(), Arc::clone(&transport) as Arc<dyn Transport>);
    (manager, transport)
}

/// Let spawned tasks (actor, monitor) process everything queued.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Advance paused time, letting tasks react in between.
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}

/// Connect and complete the handshake plus session envelope.
pub async fn connected_manager() -> (ConnectionManager, Arc<MockTransport>) {
    let (manager, transport) = manager();
    manager.connect(user_config());
    settle().await;
    assert!(transport.emit(TransportSignal::Opened));
    assert!(transport.frame(SESSION_FRAME));
    settle().await;
    assert!(manager.is_connected(), "expected Connected, got {}", manager.current_state());
    (manager, transport)
}

/// Drain queued notifications, keeping only state names.
pub fn drain_states(subscription: &mut Subscription) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Some(notification) = subscription.try_recv() {
        if let Notification::StateChanged(state) = notification {
            names.push(state.name());
        }
    }
    names
}

/// Drain queued notifications.
pub fn drain(subscription: &mut Subscription) -> Vec<Notification> {
    std::iter::from_fn(|| subscription.try_recv()).collect()
}
