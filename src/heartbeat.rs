//! Application-level liveness probe.
//!
//! Intermediary proxies can drop idle connections without a close frame, so the
//! manager sends its own `ping` every interval and expects a `pong` before the
//! deadline. The watchdog only tracks deadlines; the connection task owns the
//! timers and acts on what [`HeartbeatWatchdog::poll`] returns.

use crate::config::HeartbeatConfig;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping now; the pong deadline has been armed.
    SendPing,
    /// The pong deadline passed. The connection is considered dead.
    TimedOut,
}

#[derive(Debug)]
pub struct HeartbeatWatchdog {
    config: HeartbeatConfig,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
}

impl HeartbeatWatchdog {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            next_ping: None,
            pong_deadline: None,
        }
    }

    /// Starts the ping interval; the first ping is due one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        self.next_ping = Some(now + self.config.interval);
        self.pong_deadline = None;
    }

    /// Cancels the interval and any outstanding pong deadline. Idempotent.
    pub fn stop(&mut self) {
        self.next_ping = None;
        self.pong_deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_ping.is_some()
    }

    pub fn awaiting_pong(&self) -> bool {
        self.pong_deadline.is_some()
    }

    /// Disarms the pong deadline.
    pub fn on_pong(&mut self) {
        self.pong_deadline = None;
    }

    /// Earliest instant at which [`HeartbeatWatchdog::poll`] has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_ping, self.pong_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn poll(&mut self, now: Instant) -> Option<HeartbeatAction> {
        if let Some(deadline) = self.pong_deadline {
            if now >= deadline {
                self.stop();
                return Some(HeartbeatAction::TimedOut);
            }
        }
        match self.next_ping {
            Some(at) if now >= at => {
                self.next_ping = Some(at + self.config.interval);
                // Keep the oldest deadline if a previous ping is still unanswered.
                if self.pong_deadline.is_none() {
                    self.pong_deadline = Some(now + self.config.pong_timeout);
                }
                Some(HeartbeatAction::SendPing)
            }
            _ => None,
        }
    }
}
