//! Race configuration
//!
//! One `RaceConfig` is constructed per invocation from caller input and is
//! immutable thereafter. Every strategy constant of a race lives here as an
//! explicit field with a documented default; the engine loop never
//! hard-codes them.

use serde::Deserialize;

use crate::transaction::{Address, TransferRequest};
use crate::{Error, Result};

/// Fee mechanism selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMechanism {
    /// Per-operation fee equals the current network base fee.
    Automatic,

    /// Network base fee multiplied by a fixed headroom factor.
    HighSpeed,

    /// A caller-supplied total, ceiling-divided across all operations.
    CustomTotal,

    /// A caller-supplied total that grows by a fixed increment per attempt.
    CustomBumped,
}

/// What the schedule gate does when the race is requested ahead of the
/// acceptable pre-race window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Suspend the caller until the window opens, then race. The default.
    Wait,

    /// Refuse immediately with the seconds remaining. For hosts with hard
    /// execution-time limits.
    FailFast,
}

/// Loop bound for the racing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceBound {
    /// Race until the wall-clock budget is spent. Preferred when ledger
    /// timing is uncertain.
    Duration {
        /// Budget in milliseconds.
        ms: u64,
    },

    /// Race for a fixed number of attempts. For pure reliability retries
    /// with no competitor.
    Attempts {
        /// Number of attempts.
        count: u32,
    },
}

/// The immutable input of one race.
#[derive(Clone, Deserialize)]
pub struct RaceConfig {
    /// Hex-encoded 32-byte signing seed of the claiming principal.
    pub sender_secret: String,

    /// Optional fee-paying principal. When present, the transaction is
    /// fee-sourced from this account and co-signed by it.
    #[serde(default)]
    pub sponsor_secret: Option<String>,

    /// Identifier of the time-locked balance to claim.
    pub balance_id: String,

    /// Hex address the claimed amount is forwarded to.
    #[serde(default)]
    pub recipient: Option<String>,

    /// Amount forwarded per transfer operation. Must be positive.
    pub amount: i64,

    /// Number of claim+transfer operation pairs per attempt.
    #[serde(default = "default_records_per_attempt")]
    pub records_per_attempt: u32,

    /// Release the sponsorship entry for the sender's account in the same
    /// transaction.
    #[serde(default)]
    pub revoke_sponsorship: bool,

    /// Target unlock instant, epoch seconds.
    pub unlock_at: u64,

    /// Fee mechanism.
    #[serde(default = "default_fee_mechanism")]
    pub fee_mechanism: FeeMechanism,

    /// Total fee for the custom mechanisms. Must be positive when one of
    /// them is selected.
    #[serde(default)]
    pub custom_fee_total: Option<u64>,

    /// Per-attempt increment for `CustomBumped`.
    #[serde(default = "default_fee_bump_increment")]
    pub fee_bump_increment: u64,

    /// How far ahead of the unlock instant the race should begin. May be
    /// zero or negative.
    #[serde(default)]
    pub early_start_offset_ms: i64,

    /// Gate behavior when the request arrives early.
    #[serde(default = "default_gate_policy")]
    pub gate_policy: GatePolicy,

    /// Tolerance within which the gate releases without suspending.
    #[serde(default = "default_race_start_window_ms")]
    pub race_start_window_ms: u64,

    /// Loop bound for the racing phase.
    #[serde(default = "default_bound")]
    pub bound: RaceBound,

    /// Delay between attempts, milliseconds.
    #[serde(default = "default_attempt_delay_ms")]
    pub attempt_delay_ms: u64,

    /// Length of the transaction validity window past the unlock instant.
    #[serde(default = "default_validity_window_secs")]
    pub validity_window_secs: u64,

    /// Submit without awaiting confirmation. Sacrifices definite outcome
    /// reporting: the terminal result is always `Unconfirmed`.
    #[serde(default)]
    pub fire_and_forget: bool,
}

impl RaceConfig {
    /// Checks that run before any network call.
    pub fn validate(&self) -> Result<()> {
        if self.records_per_attempt < 1 {
            return Err(Error::InvalidConfiguration(
                "records_per_attempt must be at least 1".to_string(),
            ));
        }

        match self.fee_mechanism {
            FeeMechanism::CustomTotal | FeeMechanism::CustomBumped => match self.custom_fee_total {
                Some(total) if total > 0 => {}
                _ => {
                    return Err(Error::InvalidConfiguration(
                        "custom fee mechanism requires a positive custom_fee_total".to_string(),
                    ))
                }
            },
            FeeMechanism::Automatic | FeeMechanism::HighSpeed => {}
        }

        match self.bound {
            RaceBound::Duration { ms: 0 } => {
                return Err(Error::InvalidConfiguration(
                    "race duration must be positive".to_string(),
                ))
            }
            RaceBound::Attempts { count: 0 } => {
                return Err(Error::InvalidConfiguration(
                    "attempt count must be at least 1".to_string(),
                ))
            }
            _ => {}
        }

        if self.validity_window_secs == 0 {
            return Err(Error::InvalidConfiguration(
                "validity_window_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// The transfer this race submits on every attempt.
    pub fn transfer_request(&self) -> Result<TransferRequest> {
        let recipient = match &self.recipient {
            Some(hex) => Some(Address::from_hex(hex)?),
            None => None,
        };

        Ok(TransferRequest {
            balance_id: self.balance_id.clone(),
            recipient,
            amount: self.amount,
            records_per_attempt: self.records_per_attempt,
            revoke_sponsorship: self.revoke_sponsorship,
        })
    }
}

impl std::fmt::Debug for RaceConfig {
    // Signing seeds stay out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaceConfig")
            .field("balance_id", &self.balance_id)
            .field("recipient", &self.recipient)
            .field("amount", &self.amount)
            .field("records_per_attempt", &self.records_per_attempt)
            .field("sponsored", &self.sponsor_secret.is_some())
            .field("revoke_sponsorship", &self.revoke_sponsorship)
            .field("unlock_at", &self.unlock_at)
            .field("fee_mechanism", &self.fee_mechanism)
            .field("custom_fee_total", &self.custom_fee_total)
            .field("fee_bump_increment", &self.fee_bump_increment)
            .field("early_start_offset_ms", &self.early_start_offset_ms)
            .field("gate_policy", &self.gate_policy)
            .field("race_start_window_ms", &self.race_start_window_ms)
            .field("bound", &self.bound)
            .field("attempt_delay_ms", &self.attempt_delay_ms)
            .field("validity_window_secs", &self.validity_window_secs)
            .field("fire_and_forget", &self.fire_and_forget)
            .finish()
    }
}

// --- Default value functions for serde ---

fn default_records_per_attempt() -> u32 {
    1
}
fn default_fee_mechanism() -> FeeMechanism {
    FeeMechanism::Automatic
}
fn default_fee_bump_increment() -> u64 {
    100
}
fn default_gate_policy() -> GatePolicy {
    GatePolicy::Wait
}
fn default_race_start_window_ms() -> u64 {
    5000
}
fn default_bound() -> RaceBound {
    RaceBound::Duration { ms: 6000 }
}
fn default_attempt_delay_ms() -> u64 {
    250
}
fn default_validity_window_secs() -> u64 {
    90
}
