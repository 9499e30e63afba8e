//! Transport: one physical streaming connection at a time.
//!
//! # Architecture
//!
//! ```text
//!   ConnectionManager ── open(url) ──► WsTransport ── spawn ──► connection task
//!          ▲                                │                        │
//!          │       TransportSignal          │ outbound (send/close)  │ ws::connect
//!          └──────────── mpsc ◄─────────────┴──── CancellationToken ─┘
//! ```
//!
//! Every `open` spawns a fresh task with its own signal channel. The task
//! emits `Opened`, any number of `FrameReceived`, then at most one terminal
//! `Closed` or `Failed` and exits. `cancel` aborts it without a close
//! handshake and without any further signal.

// Rust guideline compliant 2026-02

pub mod ws;

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::connection::redact_url;
use crate::error::{ChatError, ErrorCode};

/// Code and reason attached to a close handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReason {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text.
    pub reason: Cow<'static, str>,
}

impl ShutdownReason {
    /// Client-initiated graceful close.
    pub const GRACEFUL: Self = Self {
        code: 1000,
        reason: Cow::Borrowed("Connection close by client"),
    };

    /// Abnormal closure (no close frame, stream ended).
    pub const ABNORMAL: Self = Self {
        code: 1006,
        reason: Cow::Borrowed("Abnormal close"),
    };

    /// Build a reason from a received close frame.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: Cow::Owned(reason.into()),
        }
    }

    /// Whether this is a normal (1000) closure.
    #[must_use]
    pub fn is_graceful(&self) -> bool {
        self.code == Self::GRACEFUL.code
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// Low-level lifecycle signal of one physical connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// The handshake completed.
    Opened,
    /// A text frame arrived.
    FrameReceived(String),
    /// The closing handshake started.
    Closing(ShutdownReason),
    /// The connection is closed. Terminal.
    Closed(ShutdownReason),
    /// The connection failed. Terminal.
    Failed(ChatError),
}

impl TransportSignal {
    /// Whether no signal can follow this one.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::Failed(_))
    }
}

/// A streaming connection the manager can drive.
///
/// All methods take `&self`; implementations must be safe to call in any
/// order, including `close`/`cancel` after the connection already failed.
pub trait Transport: Send + Sync + std::fmt::Debug + 'static {
    /// Open a fresh connection, replacing any existing one.
    ///
    /// Must be called from within a tokio runtime.
    fn open(&self, url: Url) -> mpsc::UnboundedReceiver<TransportSignal>;

    /// Queue a text frame. Returns `false` when nothing is open.
    fn send(&self, frame: String) -> bool;

    /// Start a close handshake on the current connection.
    fn close(&self, reason: ShutdownReason);

    /// Abort the current connection without a handshake.
    fn cancel(&self);
}

/// Outbound request to the connection task.
#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close(ShutdownReason),
}

/// Handles to the connection task of the current `open`.
#[derive(Debug)]
struct ActiveConnection {
    outbound: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug)]
pub struct WsTransport {
    connect_timeout: Duration,
    current: Mutex<Option<ActiveConnection>>,
}

impl WsTransport {
    /// Create a transport whose handshakes are bounded by `connect_timeout`.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            current: Mutex::new(None),
        }
    }

    fn take_current(&self) -> Option<ActiveConnection> {
        self.current
            .lock()
            .expect("transport lock poisoned")
            .take()
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(crate::constants::CONNECT_TIMEOUT)
    }
}

impl Transport for WsTransport {
    fn open(&self, url: Url) -> mpsc::UnboundedReceiver<TransportSignal> {
        if let Some(previous) = self.take_current() {
            previous.cancel.cancel();
        }

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_connection(
            url,
            self.connect_timeout,
            outbound_rx,
            cancel.clone(),
            Arc::clone(&open),
            signal_tx,
        ));

        *self.current.lock().expect("transport lock poisoned") = Some(ActiveConnection {
            outbound: outbound_tx,
            cancel,
            open,
        });
        signal_rx
    }

    fn send(&self, frame: String) -> bool {
        let current = self.current.lock().expect("transport lock poisoned");
        match current.as_ref() {
            Some(active) if active.open.load(Ordering::SeqCst) => {
                active.outbound.send(Outbound::Frame(frame)).is_ok()
            }
            _ => false,
        }
    }

    fn close(&self, reason: ShutdownReason) {
        if let Some(active) = self.take_current() {
            if active.outbound.send(Outbound::Close(reason)).is_err() {
                log::debug!("[Transport] Close on a finished connection");
            }
        }
    }

    fn cancel(&self) {
        if let Some(active) = self.take_current() {
            active.cancel.cancel();
        }
    }
}

/// Body of one physical connection.
async fn run_connection(
    url: Url,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
    signals: mpsc::UnboundedSender<TransportSignal>,
) {
    log::info!("[Transport] Connecting to {}", redact_url(&url));

    let connected = tokio::select! {
        () = cancel.cancelled() => {
            log::debug!("[Transport] Cancelled during handshake");
            return;
        }
        result = tokio::time::timeout(connect_timeout, ws::connect(&url)) => result,
    };

    let (mut writer, mut reader) = match connected {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            log::warn!("[Transport] Handshake failed: {:#}", e);
            let _ = signals.send(TransportSignal::Failed(
                ChatError::new(ErrorCode::SocketFailure).caused_by(format!("{e:#}")),
            ));
            return;
        }
        Err(_) => {
            log::warn!(
                "[Transport] Handshake timed out after {}ms",
                connect_timeout.as_millis()
            );
            let _ = signals.send(TransportSignal::Failed(ChatError::new(ErrorCode::Timeout)));
            return;
        }
    };

    open.store(true, Ordering::SeqCst);
    let _ = signals.send(TransportSignal::Opened);
    log::info!("[Transport] WebSocket connected");

    let terminal = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                log::debug!("[Transport] Cancelled");
                break None;
            }

            Some(outbound) = outbound_rx.recv() => match outbound {
                Outbound::Frame(text) => {
                    log::trace!("[Transport] >> {}", text);
                    if let Err(e) = writer.send_text(&text).await {
                        break Some(TransportSignal::Failed(
                            ChatError::new(ErrorCode::SocketFailure).caused_by(format!("{e:#}")),
                        ));
                    }
                }
                Outbound::Close(reason) => {
                    let _ = signals.send(TransportSignal::Closing(reason.clone()));
                    if let Err(e) = writer.send_close(reason.code, &reason.reason).await {
                        log::debug!("[Transport] Close frame not sent: {:#}", e);
                    }
                    await_close_reply(&mut reader).await;
                    let _ = writer.close().await;
                    break Some(TransportSignal::Closed(reason));
                }
            },

            message = reader.recv() => match message {
                Some(Ok(ws::WsMessage::Text(text))) => {
                    log::trace!("[Transport] << {}", text);
                    let _ = signals.send(TransportSignal::FrameReceived(text));
                }
                Some(Ok(ws::WsMessage::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        let _ = signals.send(TransportSignal::FrameReceived(text));
                    }
                    Err(e) => log::warn!("[Transport] Dropping non UTF-8 binary frame: {}", e),
                },
                Some(Ok(ws::WsMessage::Ping(data))) => {
                    let _ = writer.send_pong(data).await;
                }
                Some(Ok(ws::WsMessage::Pong(_))) => {}
                Some(Ok(ws::WsMessage::Close { code, reason })) => {
                    let reason = ShutdownReason::new(code, reason);
                    log::info!("[Transport] Closed by server: {}", reason);
                    let _ = signals.send(TransportSignal::Closing(reason.clone()));
                    break Some(TransportSignal::Closed(reason));
                }
                Some(Err(e)) => {
                    log::warn!("[Transport] Read error: {:#}", e);
                    break Some(TransportSignal::Failed(
                        ChatError::new(ErrorCode::SocketFailure).caused_by(format!("{e:#}")),
                    ));
                }
                None => {
                    log::info!("[Transport] Stream ended");
                    break Some(TransportSignal::Closed(ShutdownReason::ABNORMAL));
                }
            },
        }
    };

    open.store(false, Ordering::SeqCst);
    if let Some(signal) = terminal {
        let _ = signals.send(signal);
    }
}

/// Drain the reader until the peer answers our close frame or the
/// handshake timeout elapses.
async fn await_close_reply(reader: &mut ws::WsReader) {
    let drain = async {
        while let Some(message) = reader.recv().await {
            match message {
                Ok(ws::WsMessage::Close { .. }) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    if tokio::time::timeout(crate::constants::CLOSE_HANDSHAKE_TIMEOUT, drain)
        .await
        .is_err()
    {
        log::debug!("[Transport] Peer did not answer close frame");
    }
}
