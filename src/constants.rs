//! Crate-wide constants for chat-socket.
//!
//! Timing defaults live here so [`crate::config::ClientConfig`] and the
//! tests agree on them. Grouped by the component that consumes them.
//!
//! # Categories
//!
//! - **Health**: liveness checks and keep-alive pings
//! - **Backoff**: reconnection delay bounds
//! - **Transport**: handshake and close timeouts

use std::time::Duration;

// ============================================================================
// Health
// ============================================================================

/// Interval between liveness checks while connected.
///
/// Every check compares the time since the last received event against
/// [`STALE_THRESHOLD`].
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(10);

/// Silence after which the event stream is considered dead.
///
/// The backend sends a `health.check` event roughly every 30 seconds, so
/// anything longer than that without traffic means the socket is gone.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(30);

/// Delay between a healthy liveness check and the keep-alive frame.
pub const PING_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Backoff
// ============================================================================

/// Upper bound on any reconnection delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(25);

/// Smallest delay ever scheduled.
pub const BACKOFF_MIN_FLOOR: Duration = Duration::from_millis(250);

/// Base added to the ceiling, so the first retry is never instant.
pub const BACKOFF_CEILING_BASE: Duration = Duration::from_millis(500);

/// Per-failure growth of both floor and ceiling.
pub const BACKOFF_STEP: Duration = Duration::from_secs(2);

// ============================================================================
// Transport
// ============================================================================

/// Maximum time for TCP connect + TLS + WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the peer's close frame after sending ours.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Server
// ============================================================================

/// Default backend endpoint.
pub const DEFAULT_WS_URL: &str = "wss://chat.stream-io-api.com";
