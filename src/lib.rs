//! # Claim Racer
//!
//! Time-targeted submission race engine: claims a time-locked ledger
//! balance and forwards it to a recipient at the earliest legally valid
//! moment, racing other actors attempting the same claim.
//!
//! This crate provides:
//! - Clock synchronization against the remote network
//! - A schedule gate aligning the race start to the target unlock instant
//! - Fee policy computation (automatic, high-speed, custom, bumped)
//! - Transaction assembly and signing with optional sponsorship
//! - A bounded submission loop with retriable/fatal outcome classification

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]
#![allow(missing_docs)] // Internal implementation details

mod client;
mod clock;
mod config;
mod coordinator;
mod error;
mod fee;
mod racer;
mod schedule;
mod transaction;

pub use client::{
    AccountState, ClientError, HttpLedgerClient, LedgerClient, Rejection, SubmitOutcome,
};
pub use clock::{local_unix_ms, synchronize, SyncedClock, SYNC_TIMEOUT};
pub use config::{FeeMechanism, GatePolicy, RaceBound, RaceConfig};
pub use coordinator::RaceCoordinator;
pub use error::{Error, Result};
pub use fee::{FeeSchedule, DEFAULT_BASE_FEE, HIGH_SPEED_MULTIPLIER};
pub use racer::{
    classify_code, Attempt, AttemptOutcome, ErrorClass, RacePhase, RaceReport, RaceResult,
    SubmissionRacer,
};
pub use schedule::{GateDecision, ScheduleGate};
pub use transaction::{
    assemble, Address, Keypair, Operation, SignedTransaction, SourcedOperation, TimeWindow,
    TransactionPayload, TransactionSignature, TransferRequest,
};
