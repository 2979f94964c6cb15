//! Clock synchronization
//!
//! Reads the remote network's authoritative wall-clock before scheduling a
//! race. Best effort: on any failure the local process clock is used and
//! the result is flagged as degraded, never surfaced as an error.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::client::LedgerClient;

/// Default budget for the remote time probe. Kept short so a slow or
/// unreachable time source does not stall the race disproportionately.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(3);

/// Authoritative instant for scheduling, with an accuracy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncedClock {
    /// Epoch milliseconds.
    pub unix_ms: u64,

    /// True when the remote probe failed and the local clock was used.
    pub degraded: bool,
}

/// Read the network wall-clock, falling back to the local clock.
pub async fn synchronize<C: LedgerClient + ?Sized>(client: &C, budget: Duration) -> SyncedClock {
    match tokio::time::timeout(budget, client.network_time()).await {
        Ok(Ok(seconds)) => {
            debug!(seconds, "synchronized against the network clock");
            SyncedClock {
                unix_ms: seconds.saturating_mul(1000),
                degraded: false,
            }
        }
        Ok(Err(e)) => {
            warn!("network clock unavailable ({e}), using the local clock");
            SyncedClock {
                unix_ms: local_unix_ms(),
                degraded: true,
            }
        }
        Err(_) => {
            warn!("network clock probe timed out, using the local clock");
            SyncedClock {
                unix_ms: local_unix_ms(),
                degraded: true,
            }
        }
    }
}

/// Local process clock, epoch milliseconds.
pub fn local_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
