//! Unified input for the manager actor.
//!
//! Callers send [`ManagerInput`] through one `mpsc::UnboundedSender`. The
//! actor's `select!` loop also wraps the current transport's signals and the
//! health monitor's events into the same enum, so every input goes through
//! one `handle_input()` in arrival order.

// Rust guideline compliant 2026-02

use crate::health::HealthEvent;
use crate::state::ControlSignal;
use crate::transport::TransportSignal;

/// One input processed by the manager actor.
#[derive(Debug)]
pub(crate) enum ManagerInput {
    /// A state machine signal from a caller.
    Control(ControlSignal),

    /// The device's network reachability changed.
    ///
    /// Recorded by the actor before the matching `NetworkLost` /
    /// `NetworkRestored` signal is applied, so a `Connecting` entry in the
    /// same step sees the new value.
    Network {
        /// Whether the network is reachable.
        available: bool,
    },

    /// Lifecycle signal of the current physical connection.
    Transport(TransportSignal),

    /// Timer output of the health monitor.
    Health(HealthEvent),

    /// Stop the actor after closing the transport and the monitor.
    Shutdown,
}
