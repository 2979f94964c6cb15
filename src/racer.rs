//! Submission racer
//!
//! The control loop of a race: reload account state, assemble and sign,
//! submit, classify the outcome, and decide to retry, succeed, or abort.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{LedgerClient, SubmitOutcome};
use crate::config::RaceBound;
use crate::fee::FeeSchedule;
use crate::transaction::{assemble, Keypair, TimeWindow, TransferRequest};
use crate::Error;

/// Race phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    /// The schedule gate has not yet released control.
    Scheduled,

    /// The submission loop is running.
    Racing,

    /// A submission was accepted.
    Succeeded,

    /// The loop bound was reached with only retriable failures.
    Exhausted,

    /// A fatal rejection terminated the loop.
    Aborted,
}

impl RacePhase {
    /// Check if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RacePhase::Succeeded | RacePhase::Exhausted | RacePhase::Aborted
        )
    }
}

impl std::fmt::Display for RacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RacePhase::Scheduled => write!(f, "Scheduled"),
            RacePhase::Racing => write!(f, "Racing"),
            RacePhase::Succeeded => write!(f, "Succeeded"),
            RacePhase::Exhausted => write!(f, "Exhausted"),
            RacePhase::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Whether a structured rejection may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected under racing; the loop continues.
    Retriable,

    /// Terminates the race immediately.
    Fatal,
}

/// Maps a transaction-level result code to a class.
///
/// A stale sequence number and a not-yet-open validity window are the two
/// expected rejections while racing. Everything else, including codes this
/// table has never seen, aborts the race.
pub fn classify_code(code: &str) -> ErrorClass {
    match code {
        "tx_bad_seq" | "tx_too_early" => ErrorClass::Retriable,
        _ => ErrorClass::Fatal,
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// The network accepted the submission.
    Accepted {
        /// Confirmed transaction hash.
        hash: String,
    },

    /// Structured rejection the loop absorbed.
    Retriable {
        /// Transaction-level result code.
        code: String,
    },

    /// Structured rejection that terminated the race.
    Fatal {
        /// Transaction-level result code.
        code: String,
    },

    /// Transport failure with no structured response.
    Transport {
        /// Failure description.
        detail: String,
    },

    /// Submitted without awaiting the verdict.
    Unawaited,
}

/// One iteration of the race loop.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Zero-based attempt index.
    pub number: u32,

    /// Per-operation fee bid on this attempt.
    pub fee_per_operation: u64,

    /// Sequence number consumed, when the account refresh succeeded.
    pub sequence: Option<u64>,

    /// What happened.
    pub outcome: AttemptOutcome,
}

/// Terminal result of one race.
#[derive(Debug, Clone)]
pub enum RaceResult {
    /// A submission was confirmed; the race stopped immediately.
    Succeeded {
        /// Confirmed transaction hash.
        hash: String,
        /// Attempts made, the winning one included.
        attempts: u32,
        /// Time spent in the racing phase.
        elapsed: Duration,
    },

    /// The loop bound was reached with only retriable failures.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Last observed retriable error, for diagnostics.
        last_error: String,
    },

    /// A fatal rejection terminated the race.
    Aborted {
        /// Attempts made, the fatal one included.
        attempts: u32,
        /// The terminating error.
        error: Error,
    },

    /// The race was requested too far ahead of the unlock instant.
    TooEarly {
        /// Seconds between now and the unlock instant.
        seconds_remaining: u64,
    },

    /// Fire-and-forget: attempts were dispatched, true outcome unknown to
    /// the engine; check externally.
    Unconfirmed {
        /// Attempts dispatched.
        attempts: u32,
    },
}

impl RaceResult {
    /// Check if this result carries a confirmed winning hash.
    pub fn is_successful(&self) -> bool {
        matches!(self, RaceResult::Succeeded { .. })
    }

    /// The phase the race terminated in. `TooEarly` never left
    /// `Scheduled`; an unconfirmed fire-and-forget race counts as
    /// `Exhausted` because no winning hash is known.
    pub fn phase(&self) -> RacePhase {
        match self {
            RaceResult::Succeeded { .. } => RacePhase::Succeeded,
            RaceResult::Exhausted { .. } | RaceResult::Unconfirmed { .. } => RacePhase::Exhausted,
            RaceResult::Aborted { .. } => RacePhase::Aborted,
            RaceResult::TooEarly { .. } => RacePhase::Scheduled,
        }
    }
}

/// Terminal result plus the attempt trail that produced it.
#[derive(Debug)]
pub struct RaceReport {
    /// Terminal result.
    pub result: RaceResult,

    /// Every attempt, in submission order.
    pub attempts: Vec<Attempt>,
}

/// The submission race loop.
///
/// Runs one race as a single sequential cooperative loop. Each attempt
/// consumes a sequence number that only advances once the previous
/// attempt's outcome is known, so there is no attempt parallelism; the
/// fire-and-forget variant is the one exception and dispatches without
/// awaiting the round trip.
pub struct SubmissionRacer<C: LedgerClient + ?Sized> {
    client: Arc<C>,
    sender: Keypair,
    sponsor: Option<Keypair>,
    request: TransferRequest,
    fees: FeeSchedule,
    time_window: TimeWindow,
    bound: RaceBound,
    attempt_delay: Duration,
    fire_and_forget: bool,
}

impl<C: LedgerClient + ?Sized + 'static> SubmissionRacer<C> {
    /// Create the racer for one race.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<C>,
        sender: Keypair,
        sponsor: Option<Keypair>,
        request: TransferRequest,
        fees: FeeSchedule,
        time_window: TimeWindow,
        bound: RaceBound,
        attempt_delay: Duration,
        fire_and_forget: bool,
    ) -> Self {
        Self {
            client,
            sender,
            sponsor,
            request,
            fees,
            time_window,
            bound,
            attempt_delay,
            fire_and_forget,
        }
    }

    /// Drive the race to a terminal phase.
    pub async fn run(self) -> RaceReport {
        let started = Instant::now();
        let fee_source = match &self.sponsor {
            Some(sponsor) => sponsor.address(),
            None => self.sender.address(),
        };

        let mut attempts: Vec<Attempt> = Vec::new();
        let mut attempt: u32 = 0;
        let mut last_error = String::from("no attempts were made");

        info!(
            phase = %RacePhase::Racing,
            bound = ?self.bound,
            fire_and_forget = self.fire_and_forget,
            "entering racing phase"
        );

        while !self.bound_reached(attempt, started.elapsed()) {
            // The sequence snapshot goes stale the moment anyone else
            // touches the account, so it is re-read on every attempt.
            let account = match self.client.load_account(&fee_source).await {
                Ok(account) => account,
                Err(e) => {
                    debug!(attempt, "account refresh failed: {e}");
                    last_error = e.to_string();
                    attempts.push(Attempt {
                        number: attempt,
                        fee_per_operation: 0,
                        sequence: None,
                        outcome: AttemptOutcome::Transport {
                            detail: last_error.clone(),
                        },
                    });
                    attempt += 1;
                    tokio::time::sleep(self.attempt_delay).await;
                    continue;
                }
            };

            let fee = self.fees.fee_for_attempt(attempt);
            let transaction = match assemble(
                &account,
                &self.sender,
                self.sponsor.as_ref(),
                &self.request,
                fee,
                self.time_window,
            ) {
                Ok(transaction) => transaction,
                Err(error) => {
                    // Assembly never fails on remote state; this is a
                    // caller fault and retrying cannot fix it.
                    warn!(attempt, "assembly failed: {error}");
                    return RaceReport {
                        result: RaceResult::Aborted {
                            attempts: attempt + 1,
                            error,
                        },
                        attempts,
                    };
                }
            };
            let sequence = transaction.payload.sequence;

            if self.fire_and_forget {
                let client = Arc::clone(&self.client);
                let detached = transaction.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.submit(&detached).await {
                        debug!("detached submission failed: {e}");
                    }
                });
                attempts.push(Attempt {
                    number: attempt,
                    fee_per_operation: fee,
                    sequence: Some(sequence),
                    outcome: AttemptOutcome::Unawaited,
                });
                attempt += 1;
                tokio::time::sleep(self.attempt_delay).await;
                continue;
            }

            match self.client.submit(&transaction).await {
                Ok(SubmitOutcome::Accepted { hash }) => {
                    // At most one winning attempt; stop immediately.
                    info!(attempt, %hash, "submission accepted");
                    attempts.push(Attempt {
                        number: attempt,
                        fee_per_operation: fee,
                        sequence: Some(sequence),
                        outcome: AttemptOutcome::Accepted { hash: hash.clone() },
                    });
                    return RaceReport {
                        result: RaceResult::Succeeded {
                            hash,
                            attempts: attempt + 1,
                            elapsed: started.elapsed(),
                        },
                        attempts,
                    };
                }
                Ok(SubmitOutcome::Rejected(rejection)) => match classify_code(&rejection.code) {
                    ErrorClass::Retriable => {
                        // Expected while racing; not an error condition.
                        debug!(attempt, code = %rejection.code, "retriable rejection");
                        last_error = rejection.code.clone();
                        attempts.push(Attempt {
                            number: attempt,
                            fee_per_operation: fee,
                            sequence: Some(sequence),
                            outcome: AttemptOutcome::Retriable {
                                code: rejection.code,
                            },
                        });
                    }
                    ErrorClass::Fatal => {
                        warn!(attempt, code = %rejection.code, "fatal rejection, aborting race");
                        attempts.push(Attempt {
                            number: attempt,
                            fee_per_operation: fee,
                            sequence: Some(sequence),
                            outcome: AttemptOutcome::Fatal {
                                code: rejection.code.clone(),
                            },
                        });
                        return RaceReport {
                            result: RaceResult::Aborted {
                                attempts: attempt + 1,
                                error: Error::Ledger {
                                    code: rejection.code,
                                    operations: rejection.operation_codes,
                                },
                            },
                            attempts,
                        };
                    }
                },
                Err(e) => {
                    debug!(attempt, "submission transport failure: {e}");
                    last_error = e.to_string();
                    attempts.push(Attempt {
                        number: attempt,
                        fee_per_operation: fee,
                        sequence: Some(sequence),
                        outcome: AttemptOutcome::Transport {
                            detail: last_error.clone(),
                        },
                    });
                }
            }

            attempt += 1;
            tokio::time::sleep(self.attempt_delay).await;
        }

        if self.fire_and_forget {
            info!(attempts = attempt, "all attempts dispatched without awaiting confirmation");
            RaceReport {
                result: RaceResult::Unconfirmed { attempts: attempt },
                attempts,
            }
        } else {
            warn!(attempts = attempt, %last_error, "race exhausted without an accepted submission");
            RaceReport {
                result: RaceResult::Exhausted {
                    attempts: attempt,
                    last_error,
                },
                attempts,
            }
        }
    }

    fn bound_reached(&self, attempt: u32, elapsed: Duration) -> bool {
        match self.bound {
            RaceBound::Duration { ms } => elapsed >= Duration::from_millis(ms),
            RaceBound::Attempts { count } => attempt >= count,
        }
    }
}
