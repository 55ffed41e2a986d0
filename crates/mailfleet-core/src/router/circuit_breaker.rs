//! Per-provider circuit breaker
//!
//! ```text
//! Closed --(threshold failures inside window)--> Open
//! Open --(routing attempt after reset timeout)--> HalfOpen
//! HalfOpen --(trial succeeds)--> Closed
//! HalfOpen --(trial fails)--> Open
//! ```
//!
//! The Open -> HalfOpen move is lazy: it only happens when a routing attempt
//! asks for admission. While HalfOpen, exactly one trial send may be in
//! flight.

use mailfleet_common::config::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Tripped; sends are rejected until the reset timeout elapses
    Open,
    /// Probing recovery with a single trial send
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Result of asking the breaker for permission to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed circuit; send normally
    Allowed,
    /// The single HalfOpen trial
    Trial,
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

/// Circuit breaker for one provider
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    /// Failure times inside the monitoring window, oldest first
    failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    failure_threshold: u32,
    monitoring_window: Duration,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            last_failure: None,
            trial_in_flight: false,
            failure_threshold: config.failure_threshold.max(1),
            monitoring_window: config.monitoring_window(),
            reset_timeout: config.reset_timeout(),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    fn reset_elapsed(&self, now: Instant) -> bool {
        self.last_failure
            .map_or(true, |last| now.saturating_duration_since(last) > self.reset_timeout)
    }

    /// Whether an admission request right now could succeed
    pub fn is_selectable(&self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.reset_elapsed(now),
            CircuitState::HalfOpen => !self.trial_in_flight,
        }
    }

    /// Ask for permission to send.
    ///
    /// Returns the new state when the call moved Open to HalfOpen.
    pub fn try_acquire(&mut self, now: Instant) -> (Admission, Option<CircuitState>) {
        match self.state {
            CircuitState::Closed => (Admission::Allowed, None),
            CircuitState::Open if self.reset_elapsed(now) => {
                self.state = CircuitState::HalfOpen;
                self.trial_in_flight = true;
                (Admission::Trial, Some(CircuitState::HalfOpen))
            }
            CircuitState::Open => (Admission::Rejected, None),
            CircuitState::HalfOpen if !self.trial_in_flight => {
                self.trial_in_flight = true;
                (Admission::Trial, None)
            }
            CircuitState::HalfOpen => (Admission::Rejected, None),
        }
    }

    /// Record a successful send; returns the new state on a transition.
    ///
    /// Only the trial's own outcome decides a HalfOpen circuit.
    pub fn record_success(&mut self, admission: Admission) -> Option<CircuitState> {
        match (self.state, admission) {
            (CircuitState::Closed, _) => {
                self.failures.clear();
                None
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                self.state = CircuitState::Closed;
                self.trial_in_flight = false;
                self.failures.clear();
                Some(CircuitState::Closed)
            }
            // Sends admitted before the circuit tripped
            _ => None,
        }
    }

    /// Record a failed send; returns the new state on a transition
    pub fn record_failure(&mut self, admission: Admission, now: Instant) -> Option<CircuitState> {
        match (self.state, admission) {
            (CircuitState::Closed, _) => {
                self.last_failure = Some(now);
                while let Some(&oldest) = self.failures.front() {
                    if now.saturating_duration_since(oldest) > self.monitoring_window {
                        self.failures.pop_front();
                    } else {
                        break;
                    }
                }
                self.failures.push_back(now);

                if self.failures.len() >= self.failure_threshold as usize {
                    self.state = CircuitState::Open;
                    self.failures.clear();
                    Some(CircuitState::Open)
                } else {
                    None
                }
            }
            (CircuitState::HalfOpen, Admission::Trial) => self.reopen(now),
            _ => None,
        }
    }

    /// Give up on a trial that never reported an outcome.
    ///
    /// The circuit reopens and the reset timeout restarts.
    pub fn abandon_trial(&mut self, now: Instant) -> Option<CircuitState> {
        if self.state == CircuitState::HalfOpen && self.trial_in_flight {
            self.reopen(now)
        } else {
            None
        }
    }

    fn reopen(&mut self, now: Instant) -> Option<CircuitState> {
        self.state = CircuitState::Open;
        self.trial_in_flight = false;
        self.last_failure = Some(now);
        self.failures.clear();
        Some(CircuitState::Open)
    }
}
