//! Transition function and the single-owner state holder.

use super::{ConnectKind, ConnectionState, ControlSignal, Disconnected, RestartReason};
use crate::connection::ConnectionConfig;

/// Outcome of evaluating one (state, signal) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Enter this state (possibly re-entering the same variant).
    Enter(ConnectionState),
    /// Explicit no-op: suppressed automatic retry or a repeated disconnect/stop.
    Unchanged,
    /// The pair is not handled in this state; logged and ignored.
    Ignored,
}

/// Evaluate the transition table.
///
/// Pure: never looks at anything but its arguments.
#[must_use]
pub fn transition(state: &ConnectionState, signal: &ControlSignal) -> Transition {
    use ConnectionState as S;
    use ControlSignal as C;
    use Disconnected as D;

    match (state, signal) {
        // ---- Stopped ----
        (S::Disconnected(D::Stopped), C::RequestConnect { config, kind }) => {
            connecting(config, *kind)
        }
        (S::Disconnected(D::Stopped), C::DisconnectRequested) => {
            Transition::Enter(S::Disconnected(D::ByRequest))
        }
        (S::Disconnected(D::Stopped), C::ResumeRequested) => {
            Transition::Enter(S::RestartPending(RestartReason::Resumed))
        }
        (S::Disconnected(D::Stopped), C::StopRequested) => Transition::Unchanged,

        // ---- ByRequest / Permanent: only caller-initiated connects break out ----
        (
            S::Disconnected(D::ByRequest | D::Permanent(_)),
            C::RequestConnect { config, kind },
        ) => {
            if kind.is_caller_initiated() {
                connecting(config, *kind)
            } else {
                Transition::Unchanged
            }
        }
        (S::Disconnected(D::ByRequest), C::DisconnectRequested) => Transition::Unchanged,
        (S::Disconnected(D::Permanent(_)), C::DisconnectRequested) => {
            Transition::Enter(S::Disconnected(D::ByRequest))
        }

        // ---- Connected ignores connect requests ----
        (S::Connected(_), C::RequestConnect { .. }) => Transition::Ignored,

        // ---- Connect from every other active/retryable state ----
        (
            S::Connecting { .. }
            | S::RestartPending(_)
            | S::Disconnected(D::NetworkUnavailable | D::EventStreamStale | D::Temporary(_)),
            C::RequestConnect { config, kind },
        ) => connecting(config, *kind),

        // ---- NetworkUnavailable specifics ----
        (S::Disconnected(D::NetworkUnavailable), C::NetworkRestored) => {
            Transition::Enter(S::RestartPending(RestartReason::NetworkRestored))
        }
        (
            S::Disconnected(D::NetworkUnavailable),
            C::StreamStale | C::NetworkLost | C::ResumeRequested,
        ) => Transition::Ignored,

        // ---- EventStreamStale ignores a repeated stale signal ----
        (S::Disconnected(D::EventStreamStale), C::StreamStale) => Transition::Ignored,

        // ---- Shared arms for the active group ----
        (
            S::Connecting { .. }
            | S::Connected(_)
            | S::RestartPending(_)
            | S::Disconnected(
                D::NetworkUnavailable | D::EventStreamStale | D::Temporary(_),
            ),
            signal,
        ) => active_transition(signal),

        _ => Transition::Ignored,
    }
}

fn connecting(config: &ConnectionConfig, kind: ConnectKind) -> Transition {
    Transition::Enter(ConnectionState::Connecting {
        config: config.clone(),
        kind,
    })
}

/// Transitions shared by Connecting, Connected, RestartPending,
/// NetworkUnavailable, EventStreamStale and Temporary.
fn active_transition(signal: &ControlSignal) -> Transition {
    use ConnectionState as S;
    use ControlSignal as C;
    use Disconnected as D;

    match signal {
        C::SessionEstablished(session) => Transition::Enter(S::Connected(session.clone())),
        C::StreamStale => Transition::Enter(S::Disconnected(D::EventStreamStale)),
        C::NetworkLost => Transition::Enter(S::Disconnected(D::NetworkUnavailable)),
        C::FatalError(error) => Transition::Enter(S::Disconnected(D::Permanent(error.clone()))),
        C::RecoverableError(error) => {
            Transition::Enter(S::Disconnected(D::Temporary(error.clone())))
        }
        C::DisconnectRequested => Transition::Enter(S::Disconnected(D::ByRequest)),
        C::StopRequested => Transition::Enter(S::Disconnected(D::Stopped)),
        C::RequestConnect { .. } | C::NetworkRestored | C::ResumeRequested => Transition::Ignored,
    }
}

/// Holder of the current state.
///
/// Owned by a single task; every signal goes through [`StateMachine::apply`].
#[derive(Debug, Default)]
pub struct StateMachine {
    state: ConnectionState,
}

impl StateMachine {
    /// Start in `Disconnected::Stopped`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start in an arbitrary state (tests, restoring a snapshot).
    #[must_use]
    pub fn with_state(state: ConnectionState) -> Self {
        Self { state }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Apply one signal. Returns the entered state, or `None` when the
    /// state did not change.
    pub fn apply(&mut self, signal: &ControlSignal) -> Option<&ConnectionState> {
        match transition(&self.state, signal) {
            Transition::Enter(next) => {
                log::info!(
                    "[StateMachine] {} --{}--> {}",
                    self.state,
                    signal.name(),
                    next
                );
                self.state = next;
                Some(&self.state)
            }
            Transition::Unchanged => {
                log::debug!(
                    "[StateMachine] {} stays on {}",
                    self.state,
                    signal.name()
                );
                None
            }
            Transition::Ignored => {
                log::warn!(
                    "[StateMachine] Cannot handle {} while in {}",
                    signal.name(),
                    self.state
                );
                None
            }
        }
    }
}
