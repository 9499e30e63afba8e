//! chat-socket - persistent real-time connection manager for chat clients.
//!
//! Keeps one logical, always-reconnecting WebSocket session to a chat
//! backend: authenticates through the connect URL, detects silently dead
//! connections, reconnects with jittered backoff and publishes a race-free
//! view of the connection state plus decoded events.
//!
//! # Architecture
//!
//! A single actor owns the state machine; everything else feeds it:
//!
//! - **Manager** - Actor and public handle ([`ConnectionManager`])
//! - **State** - Pure transition table over [`ConnectionState`]
//! - **Transport** - One physical connection at a time
//! - **Decoder** - Raw frames to session / event / error
//! - **Health** - Liveness timers and reconnect backoff
//! - **Listeners** - Fan-out to observers
//!
//! # Modules
//!
//! - [`manager`] - The actor and its handle
//! - [`state`] - States, signals and the transition function
//! - [`transport`] - Transport trait and the WebSocket implementation
//! - [`decoder`] - Frame decoding and keep-alive encoding
//! - [`health`] - Health monitor and backoff formula
//! - [`listeners`] - Listener hub and subscriptions
//! - [`config`] - Configuration loading/saving

pub mod config;
pub mod connection;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod health;
pub mod listeners;
pub mod manager;
pub mod state;
pub mod transport;

mod events;

// Re-export commonly used types
pub use config::ClientConfig;
pub use connection::{ConnectionConfig, Principal, StaticToken, TokenProvider, User, UserToken};
pub use decoder::{ApplicationEvent, DecodedFrame, SessionInfo};
pub use error::{ChatError, ErrorCode, ErrorKind};
pub use listeners::{ListenerHub, ListenerId, Notification, SocketListener, Subscription};
pub use manager::ConnectionManager;
pub use state::{ConnectKind, ConnectionState, ControlSignal, Disconnected, RestartReason};
pub use transport::{ShutdownReason, Transport, TransportSignal, WsTransport};
