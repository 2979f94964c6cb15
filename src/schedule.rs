//! Schedule gate
//!
//! Computes how long to hold before the race may begin, aligning the local
//! wall-clock to the target unlock instant.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::GatePolicy;
use crate::{Error, Result};

/// What the gate decided for a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The race may begin immediately.
    Start,

    /// Hold for this long, then race.
    Sleep(Duration),

    /// The request arrived too far ahead of the unlock instant.
    TooEarly {
        /// Seconds between now and the unlock instant.
        seconds_remaining: u64,
    },
}

/// Gate configuration for one race.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleGate {
    policy: GatePolicy,
    early_start_offset_ms: i64,
    race_start_window_ms: u64,
}

impl ScheduleGate {
    /// Create the gate for one race.
    pub fn new(policy: GatePolicy, early_start_offset_ms: i64, race_start_window_ms: u64) -> Self {
        Self {
            policy,
            early_start_offset_ms,
            race_start_window_ms,
        }
    }

    /// Pure decision for the given unlock instant and current time.
    ///
    /// The wait is `(unlock_at - early_start_offset) - now`. Within the
    /// start window (or already past it) the race begins immediately;
    /// beyond the window the policy decides between suspending for the
    /// excess and refusing with `TooEarly`.
    pub fn decide(&self, unlock_at: u64, now_ms: u64) -> GateDecision {
        let target_ms = unlock_at as i128 * 1000 - self.early_start_offset_ms as i128;
        let wait_ms = target_ms - now_ms as i128;

        if wait_ms <= self.race_start_window_ms as i128 {
            return GateDecision::Start;
        }

        let wait_ms = wait_ms as u64;
        match self.policy {
            GatePolicy::Wait => {
                GateDecision::Sleep(Duration::from_millis(wait_ms - self.race_start_window_ms))
            }
            GatePolicy::FailFast => GateDecision::TooEarly {
                seconds_remaining: wait_ms.div_ceil(1000),
            },
        }
    }

    /// Hold the caller until the race may begin.
    pub async fn hold(&self, unlock_at: u64, now_ms: u64) -> Result<()> {
        match self.decide(unlock_at, now_ms) {
            GateDecision::Start => {
                debug!("gate released immediately");
                Ok(())
            }
            GateDecision::Sleep(wait) => {
                info!(
                    wait_ms = wait.as_millis() as u64,
                    "holding until the race window opens"
                );
                tokio::time::sleep(wait).await;
                Ok(())
            }
            GateDecision::TooEarly { seconds_remaining } => {
                Err(Error::TooEarly { seconds_remaining })
            }
        }
    }
}
