//! Connection state machine.
//!
//! [`ConnectionState`] is a closed set of variants and [`ControlSignal`] is
//! the machine's input alphabet. [`transition`] is the whole transition
//! table as one exhaustive match; it is pure so it can be folded over any
//! signal sequence in tests. [`StateMachine`] holds the current state and is
//! owned by exactly one task (the manager actor), which is what serializes
//! all signals.
//!
//! ```text
//!                 Connect                 SessionEstablished
//!   Stopped ───────────────► Connecting ─────────────────────► Connected
//!      ▲                        │  ▲                               │
//!      │ Stop                   │  │ Connect(AutomaticRetry)       │ StreamStale / NetworkLost /
//!      │                        ▼  │                               ▼ FatalError / RecoverableError
//!      └──────────────────── Disconnected::{EventStreamStale, NetworkUnavailable, Temporary, ...}
//! ```

pub mod machine;

pub use machine::{transition, StateMachine, Transition};

use crate::connection::ConnectionConfig;
use crate::decoder::SessionInfo;
use crate::error::ChatError;

/// Origin of a connect request.
///
/// `AutomaticRetry` is suppressed from `ByRequest` and `Permanent` so
/// background reconnection never overrides an explicit disconnect or an
/// unrecoverable rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectKind {
    /// First connection requested by the caller.
    Initial,
    /// Reconnection scheduled by the health monitor or a restart trigger.
    AutomaticRetry,
    /// Reconnection explicitly forced by the caller.
    ForcedRetry,
}

impl ConnectKind {
    /// Whether this request may leave `ByRequest` / `Permanent`.
    #[must_use]
    pub fn is_caller_initiated(self) -> bool {
        matches!(self, Self::Initial | Self::ForcedRetry)
    }
}

/// Why the manager is in a `RestartPending` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The app came back to the foreground.
    Resumed,
    /// The network became reachable again.
    NetworkRestored,
}

/// Disconnected sub-states.
#[derive(Debug, Clone, PartialEq)]
pub enum Disconnected {
    /// Initial state, or stopped by an app-lifecycle pause.
    Stopped,
    /// The device reported no network.
    NetworkUnavailable,
    /// No event arrived within the staleness threshold.
    EventStreamStale,
    /// The caller asked to disconnect.
    ByRequest,
    /// A recoverable error happened; automatic retry allowed.
    Temporary(ChatError),
    /// An unrecoverable error happened; automatic retry suppressed.
    Permanent(ChatError),
}

impl std::fmt::Display for Disconnected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Disconnected.Stopped"),
            Self::NetworkUnavailable => write!(f, "Disconnected.Network"),
            Self::EventStreamStale => write!(f, "Disconnected.InactiveWS"),
            Self::ByRequest => write!(f, "Disconnected.ByRequest"),
            Self::Temporary(error) => write!(f, "Disconnected.Temporarily({})", error.code.code()),
            Self::Permanent(error) => write!(f, "Disconnected.Permanently({})", error.code.code()),
        }
    }
}

/// The authoritative connection state.
///
/// Replaced, never mutated, on every transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// A connection attempt is in flight.
    Connecting {
        /// Config of this attempt.
        config: ConnectionConfig,
        /// Why the attempt was started.
        kind: ConnectKind,
    },
    /// The session is open.
    Connected(SessionInfo),
    /// No session.
    Disconnected(Disconnected),
    /// Transient: an external trigger says reconnecting is allowed now.
    RestartPending(RestartReason),
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected(Disconnected::Stopped)
    }
}

impl ConnectionState {
    /// Whether the session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Whether the state is `Disconnected::Stopped`.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Disconnected(Disconnected::Stopped))
    }

    /// Session info when connected.
    #[must_use]
    pub fn session(&self) -> Option<&SessionInfo> {
        match self {
            Self::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// Short name without payload, for logs and table-driven tests.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "Connecting",
            Self::Connected(_) => "Connected",
            Self::Disconnected(Disconnected::Stopped) => "Stopped",
            Self::Disconnected(Disconnected::NetworkUnavailable) => "NetworkUnavailable",
            Self::Disconnected(Disconnected::EventStreamStale) => "EventStreamStale",
            Self::Disconnected(Disconnected::ByRequest) => "ByRequest",
            Self::Disconnected(Disconnected::Temporary(_)) => "Temporary",
            Self::Disconnected(Disconnected::Permanent(_)) => "Permanent",
            Self::RestartPending(_) => "RestartPending",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting { kind, .. } => write!(f, "Connecting({kind:?})"),
            Self::Connected(session) => write!(f, "Connected({})", session.connection_id),
            Self::Disconnected(disconnected) => write!(f, "{disconnected}"),
            Self::RestartPending(reason) => write!(f, "RestartPending({reason:?})"),
        }
    }
}

/// Input alphabet of the state machine. Immutable value objects.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSignal {
    /// Start (or restart) a connection attempt.
    RequestConnect {
        /// Config of the attempt.
        config: ConnectionConfig,
        /// Origin of the request.
        kind: ConnectKind,
    },
    /// The session envelope was received.
    SessionEstablished(SessionInfo),
    /// The health monitor judged the event stream dead.
    StreamStale,
    /// The device lost connectivity.
    NetworkLost,
    /// The device regained connectivity.
    NetworkRestored,
    /// Unrecoverable error (credentials rejected).
    FatalError(ChatError),
    /// Transient error (network, abnormal closure, decode failure).
    RecoverableError(ChatError),
    /// The caller asked to disconnect.
    DisconnectRequested,
    /// The app went to the background.
    StopRequested,
    /// The app came back to the foreground.
    ResumeRequested,
}

impl ControlSignal {
    /// Short name without payload.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestConnect { .. } => "RequestConnect",
            Self::SessionEstablished(_) => "SessionEstablished",
            Self::StreamStale => "StreamStale",
            Self::NetworkLost => "NetworkLost",
            Self::NetworkRestored => "NetworkRestored",
            Self::FatalError(_) => "FatalError",
            Self::RecoverableError(_) => "RecoverableError",
            Self::DisconnectRequested => "DisconnectRequested",
            Self::StopRequested => "StopRequested",
            Self::ResumeRequested => "ResumeRequested",
        }
    }
}
