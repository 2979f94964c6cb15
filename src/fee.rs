//! Fee policy
//!
//! Pure computation of the per-operation fee bid on each attempt of a race.

use crate::config::FeeMechanism;
use crate::{Error, Result};

/// Headroom factor applied to the network base fee for high-speed races.
pub const HIGH_SPEED_MULTIPLIER: u64 = 10;

/// Fallback when the network base-fee quote is unavailable.
pub const DEFAULT_BASE_FEE: u64 = 100;

/// Per-race fee schedule.
///
/// `fee_for_attempt` is pure and non-decreasing in the attempt index, so a
/// later attempt in one race never bids below an earlier one.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    mechanism: FeeMechanism,
    total_operations: u64,
    custom_total: u64,
    bump_increment: u64,
    base_fee: u64,
}

impl FeeSchedule {
    /// Build the schedule for one race.
    ///
    /// `total_operations` is the operation count of one assembled
    /// transaction. Fails with `InvalidConfiguration` when a custom
    /// mechanism is selected without a positive custom total.
    pub fn new(
        mechanism: FeeMechanism,
        total_operations: u64,
        custom_total: Option<u64>,
        bump_increment: u64,
        base_fee: u64,
    ) -> Result<Self> {
        if total_operations == 0 {
            return Err(Error::InvalidConfiguration(
                "a transaction must carry at least one operation".to_string(),
            ));
        }

        let custom_total = match mechanism {
            FeeMechanism::CustomTotal | FeeMechanism::CustomBumped => match custom_total {
                Some(total) if total > 0 => total,
                _ => {
                    return Err(Error::InvalidConfiguration(
                        "custom fee mechanism requires a positive custom total".to_string(),
                    ))
                }
            },
            FeeMechanism::Automatic | FeeMechanism::HighSpeed => 0,
        };

        Ok(Self {
            mechanism,
            total_operations,
            custom_total,
            bump_increment,
            base_fee,
        })
    }

    /// Per-operation fee for the given zero-based attempt index.
    pub fn fee_for_attempt(&self, attempt: u32) -> u64 {
        match self.mechanism {
            FeeMechanism::Automatic => self.base_fee,
            FeeMechanism::HighSpeed => self.base_fee * HIGH_SPEED_MULTIPLIER,
            FeeMechanism::CustomTotal => self.custom_total.div_ceil(self.total_operations),
            FeeMechanism::CustomBumped => {
                let total = self.custom_total + u64::from(attempt) * self.bump_increment;
                total.div_ceil(self.total_operations)
            }
        }
    }
}
