//! Scan session gate.
//!
//! One scan is handled at a time. After a scan finishes the session cools
//! down, so the same credential held in front of the camera is not
//! registered twice.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Processing,
    CoolingDown { until: Instant },
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Processing => "processing",
            SessionState::CoolingDown { .. } => "coolingDown",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("scanner busy, retry in {}ms", .retry_after.as_millis())]
pub struct ScannerBusy {
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: &'static str,
    pub retry_after_ms: u64,
}

#[derive(Debug)]
pub struct ScanSession {
    state: SessionState,
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    /// Current state with an expired cool-down already folded back to Idle.
    pub fn state(&mut self, now: Instant) -> SessionState {
        if let SessionState::CoolingDown { until } = self.state {
            if now >= until {
                self.state = SessionState::Idle;
            }
        }
        self.state
    }

    pub fn status(&mut self, now: Instant) -> SessionStatus {
        let state = self.state(now);
        let retry_after_ms = match state {
            SessionState::CoolingDown { until } => {
                until.saturating_duration_since(now).as_millis() as u64
            }
            _ => 0,
        };
        SessionStatus {
            state: state.label(),
            retry_after_ms,
        }
    }

    pub fn accept(&mut self, now: Instant) -> Result<(), ScannerBusy> {
        match self.state(now) {
            SessionState::Idle => {
                self.state = SessionState::Scanning;
                Ok(())
            }
            SessionState::CoolingDown { until } => Err(ScannerBusy {
                retry_after: until.saturating_duration_since(now),
            }),
            SessionState::Scanning | SessionState::Processing => Err(ScannerBusy {
                retry_after: Duration::ZERO,
            }),
        }
    }

    /// Payload decoded; the store calls are about to run.
    pub fn processing(&mut self) {
        if self.state == SessionState::Scanning {
            self.state = SessionState::Processing;
        }
    }

    pub fn finish(&mut self, now: Instant, cooldown: Duration) {
        if matches!(
            self.state,
            SessionState::Scanning | SessionState::Processing
        ) {
            self.state = if cooldown.is_zero() {
                SessionState::Idle
            } else {
                SessionState::CoolingDown {
                    until: now + cooldown,
                }
            };
        }
    }

    /// Drops straight back to Idle, e.g. after an unreadable payload.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
    }
}
