//! Health monitor: liveness checks, keep-alive pings and reconnect backoff.
//!
//! # Architecture
//!
//! The monitor is a single tokio task that owns exactly one armed timer:
//!
//! ```text
//!            ack()                       healthy
//!   ┌──────► Liveness ────────────────────────────► Ping ──(SendKeepAlive)──┐
//!   │           │ stale                                                     │
//!   │           ▼ (Stale)                                                   │
//!   │        Backoff ──(Reconnect, failures += 1)──► Liveness ◄─────────────┘
//!   │           ▲
//!   │           └── schedule_reconnect()
//! ```
//!
//! Because there is one slot, arming any timer cancels the previous one in
//! the same step. Two timers can never both fire, and a reconnect can only
//! be triggered once per backoff cycle.
//!
//! The last-event timestamp is the only value shared with the manager: it
//! is written by [`HealthMonitor::ack`] and read by the monitor task.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::constants::{
    BACKOFF_CAP, BACKOFF_CEILING_BASE, BACKOFF_MIN_FLOOR, BACKOFF_STEP, LIVENESS_INTERVAL,
    PING_DELAY, STALE_THRESHOLD,
};

/// Timing parameters of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Interval between liveness checks.
    pub liveness_interval: Duration,
    /// Silence after which the stream is stale.
    pub stale_threshold: Duration,
    /// Delay between a healthy check and the keep-alive frame.
    pub ping_delay: Duration,
    /// Upper bound on reconnection delays.
    pub backoff_cap: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            liveness_interval: LIVENESS_INTERVAL,
            stale_threshold: STALE_THRESHOLD,
            ping_delay: PING_DELAY,
            backoff_cap: BACKOFF_CAP,
        }
    }
}

/// Consecutive-failure counter driving the backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    failures: u32,
}

impl BackoffState {
    /// Number of reconnect attempts since the last successful session.
    #[must_use]
    pub fn failures(self) -> u32 {
        self.failures
    }

    /// Record one more reconnect attempt.
    pub fn increment(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Back to zero after a successful session.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Delay before the next attempt.
    #[must_use]
    pub fn next_delay(self, cap: Duration) -> Duration {
        retry_interval(self.failures, cap)
    }
}

/// Floor and ceiling of the reconnect delay after `failures` attempts.
///
/// Ceiling is `500ms + failures * 2s`, floor is `(failures - 1) * 2s` but at
/// least 250ms. Both are capped.
#[must_use]
pub fn retry_bounds(failures: u32, cap: Duration) -> (Duration, Duration) {
    let step = BACKOFF_STEP.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;
    let failures = u64::from(failures);

    let ceiling = (BACKOFF_CEILING_BASE.as_millis() as u64)
        .saturating_add(failures.saturating_mul(step))
        .min(cap_ms);
    let floor = failures
        .saturating_sub(1)
        .saturating_mul(step)
        .max(BACKOFF_MIN_FLOOR.as_millis() as u64)
        .min(cap_ms);

    (Duration::from_millis(floor), Duration::from_millis(ceiling))
}

/// Randomized reconnect delay between [`retry_bounds`].
///
/// When the floor reaches the ceiling (both capped) the floor is used.
#[must_use]
pub fn retry_interval(failures: u32, cap: Duration) -> Duration {
    let (floor, ceiling) = retry_bounds(failures, cap);
    if floor >= ceiling {
        return floor;
    }
    let ms = rand::random_range(floor.as_millis() as u64..ceiling.as_millis() as u64);
    Duration::from_millis(ms)
}

/// Output of the monitor, consumed by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// Send an application-level keep-alive frame.
    SendKeepAlive,
    /// No event arrived within the staleness threshold.
    Stale,
    /// The backoff delay elapsed: dial again.
    Reconnect,
}

#[derive(Debug)]
enum Command {
    Start,
    Ack,
    StopLiveness,
    ScheduleReconnect,
    CancelReconnect,
    ResetBackoff,
    Stop,
    Shutdown,
}

/// Handle to the monitor task.
#[derive(Debug)]
pub struct HealthMonitor {
    commands: mpsc::UnboundedSender<Command>,
    epoch: Instant,
    last_event_ms: Arc<AtomicU64>,
    failures: Arc<AtomicU32>,
}

impl HealthMonitor {
    /// Spawn the monitor task. Events are delivered on the returned receiver.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: HealthConfig) -> (Self, mpsc::UnboundedReceiver<HealthEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let epoch = Instant::now();
        let last_event_ms = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU32::new(0));

        let task = MonitorTask {
            config,
            epoch,
            last_event_ms: Arc::clone(&last_event_ms),
            failures_mirror: Arc::clone(&failures),
            backoff: BackoffState::default(),
            armed: Armed::Idle,
            deadline: epoch,
            events: event_tx,
        };
        tokio::spawn(task.run(command_rx));

        (
            Self {
                commands: command_tx,
                epoch,
                last_event_ms,
                failures,
            },
            event_rx,
        )
    }

    /// Start liveness checks from now.
    pub fn start(&self) {
        self.touch();
        self.command(Command::Start);
    }

    /// An event arrived: reset the timestamp and restart the liveness timer.
    pub fn ack(&self) {
        self.touch();
        self.command(Command::Ack);
    }

    /// Stop liveness and ping timers, keeping a pending reconnect.
    pub fn stop_liveness(&self) {
        self.command(Command::StopLiveness);
    }

    /// Arm the backoff timer unless one is already armed.
    pub fn schedule_reconnect(&self) {
        self.command(Command::ScheduleReconnect);
    }

    /// Disarm a pending backoff timer, leaving liveness timers alone.
    pub fn cancel_reconnect(&self) {
        self.command(Command::CancelReconnect);
    }

    /// Reset the failure counter (on `Connected` entry only).
    pub fn reset_backoff(&self) {
        self.command(Command::ResetBackoff);
    }

    /// Cancel every timer. Idempotent.
    pub fn stop(&self) {
        self.command(Command::Stop);
    }

    /// Stop the task for good.
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    /// Failure counter as last published by the task.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_event_ms.store(now, Ordering::SeqCst);
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("[Health] Monitor task already stopped");
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// The single armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Armed {
    Idle,
    Liveness,
    Ping,
    Backoff,
}

struct MonitorTask {
    config: HealthConfig,
    epoch: Instant,
    last_event_ms: Arc<AtomicU64>,
    failures_mirror: Arc<AtomicU32>,
    backoff: BackoffState,
    armed: Armed,
    deadline: Instant,
    events: mpsc::UnboundedSender<HealthEvent>,
}

impl MonitorTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let armed = self.armed != Armed::Idle;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                () = tokio::time::sleep_until(self.deadline), if armed => self.fire(),
            }
        }
        log::debug!("[Health] Monitor task exiting");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start => self.arm(Armed::Liveness, self.config.liveness_interval),
            Command::Ack => {
                if matches!(self.armed, Armed::Liveness | Armed::Ping) {
                    self.arm(Armed::Liveness, self.config.liveness_interval);
                }
            }
            Command::StopLiveness => {
                if matches!(self.armed, Armed::Liveness | Armed::Ping) {
                    self.armed = Armed::Idle;
                }
            }
            Command::ScheduleReconnect => {
                if self.armed == Armed::Backoff {
                    log::debug!("[Health] Reconnect already scheduled");
                } else {
                    self.arm_backoff();
                }
            }
            Command::CancelReconnect => {
                if self.armed == Armed::Backoff {
                    self.armed = Armed::Idle;
                }
            }
            Command::ResetBackoff => self.set_failures(0),
            Command::Stop => self.armed = Armed::Idle,
            Command::Shutdown => {}
        }
    }

    fn fire(&mut self) {
        match self.armed {
            Armed::Idle => {}
            Armed::Liveness => {
                let now = self.epoch.elapsed().as_millis() as u64;
                let silent = now.saturating_sub(self.last_event_ms.load(Ordering::SeqCst));
                if Duration::from_millis(silent) >= self.config.stale_threshold {
                    log::warn!("[Health] No event for {}ms, stream is stale", silent);
                    self.emit(HealthEvent::Stale);
                    self.arm_backoff();
                } else {
                    self.arm(Armed::Ping, self.config.ping_delay);
                }
            }
            Armed::Ping => {
                self.emit(HealthEvent::SendKeepAlive);
                self.arm(Armed::Liveness, self.config.liveness_interval);
            }
            Armed::Backoff => {
                log::info!(
                    "[Health] Backoff elapsed, reconnecting (attempt {})",
                    self.backoff.failures() + 1
                );
                self.emit(HealthEvent::Reconnect);
                let mut backoff = self.backoff;
                backoff.increment();
                self.set_failures(backoff.failures());
                self.arm(Armed::Liveness, self.config.liveness_interval);
            }
        }
    }

    fn arm_backoff(&mut self) {
        let delay = self.backoff.next_delay(self.config.backoff_cap);
        log::info!(
            "[Health] Reconnect in {}ms ({} failures)",
            delay.as_millis(),
            self.backoff.failures()
        );
        self.arm(Armed::Backoff, delay);
    }

    fn arm(&mut self, timer: Armed, delay: Duration) {
        self.armed = timer;
        self.deadline = Instant::now() + delay;
    }

    fn set_failures(&mut self, failures: u32) {
        if failures == 0 {
            self.backoff.reset();
        } else {
            self.backoff = BackoffState { failures };
        }
        self.failures_mirror.store(failures, Ordering::SeqCst);
    }

    fn emit(&self, event: HealthEvent) {
        if self.events.send(event).is_err() {
            log::debug!("[Health] Event receiver dropped: {:?}", event);
        }
    }
}
