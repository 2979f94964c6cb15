//! Race coordinator
//!
//! Wires the clock, gate, fee policy, and racer into the single exposed
//! operation, `race_submit`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::LedgerClient;
use crate::clock::{self, SYNC_TIMEOUT};
use crate::config::RaceConfig;
use crate::fee::{FeeSchedule, DEFAULT_BASE_FEE};
use crate::racer::{RaceResult, SubmissionRacer};
use crate::schedule::ScheduleGate;
use crate::transaction::{Keypair, TimeWindow};
use crate::{Error, Result};

/// Orchestrates one race per invocation.
///
/// Stateless across invocations: every call validates its own config,
/// synchronizes its own clock, and runs its own race loop.
pub struct RaceCoordinator<C: LedgerClient + ?Sized> {
    client: Arc<C>,
    sync_budget: Duration,
}

impl<C: LedgerClient + ?Sized + 'static> RaceCoordinator<C> {
    /// Create a coordinator over the given ledger client.
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            sync_budget: SYNC_TIMEOUT,
        }
    }

    /// Override the clock-probe budget.
    pub fn with_sync_budget(mut self, budget: Duration) -> Self {
        self.sync_budget = budget;
        self
    }

    /// Run one race to a terminal result.
    ///
    /// Pre-network faults (`InvalidConfiguration`, `InvalidSecret`,
    /// `InvalidAmount`, `MissingRecipient`) return `Err`. Every race
    /// outcome, `TooEarly` included, returns `Ok` so the shell can report
    /// expected outcomes without treating them as server faults.
    pub async fn race_submit(&self, config: &RaceConfig) -> Result<RaceResult> {
        config.validate()?;

        let sender = Keypair::from_secret_hex(&config.sender_secret)?;
        let sponsor = config
            .sponsor_secret
            .as_deref()
            .map(Keypair::from_secret_hex)
            .transpose()?;
        let request = config.transfer_request()?;
        request.validate()?;

        info!(config = ?config, sender = %sender.address(), "race requested");

        let base_fee = match self.client.base_fee().await {
            Ok(fee) => fee,
            Err(e) => {
                warn!("network base fee unavailable ({e}), falling back to {DEFAULT_BASE_FEE}");
                DEFAULT_BASE_FEE
            }
        };
        let fees = FeeSchedule::new(
            config.fee_mechanism,
            request.total_operations(),
            config.custom_fee_total,
            config.fee_bump_increment,
            base_fee,
        )?;

        let synced = clock::synchronize(self.client.as_ref(), self.sync_budget).await;
        if synced.degraded {
            warn!("scheduling against the local clock only");
        }

        let gate = ScheduleGate::new(
            config.gate_policy,
            config.early_start_offset_ms,
            config.race_start_window_ms,
        );
        debug!(phase = %crate::racer::RacePhase::Scheduled, "holding at the schedule gate");
        match gate.hold(config.unlock_at, synced.unix_ms).await {
            Ok(()) => {}
            Err(Error::TooEarly { seconds_remaining }) => {
                info!(seconds_remaining, "race requested too early, no submission made");
                return Ok(RaceResult::TooEarly { seconds_remaining });
            }
            Err(e) => return Err(e),
        }

        let window = TimeWindow::from_unlock(config.unlock_at, config.validity_window_secs);
        let racer = SubmissionRacer::new(
            Arc::clone(&self.client),
            sender,
            sponsor,
            request,
            fees,
            window,
            config.bound,
            Duration::from_millis(config.attempt_delay_ms),
            config.fire_and_forget,
        );

        let report = racer.run().await;
        for attempt in &report.attempts {
            debug!(
                number = attempt.number,
                fee = attempt.fee_per_operation,
                sequence = ?attempt.sequence,
                outcome = ?attempt.outcome,
                "attempt"
            );
        }
        info!(phase = %report.result.phase(), "race finished");

        Ok(report.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{Script, ScriptedLedger};

    const NETWORK_TIME: u64 = 1_700_000_000;

    fn config() -> RaceConfig {
        serde_json::from_value(serde_json::json!({
            "sender_secret": "11".repeat(32),
            "balance_id": "balance-0001",
            "recipient": "22".repeat(32),
            "amount": 5_000,
            "unlock_at": NETWORK_TIME,
            "race_start_window_ms": 3000,
        }))
        .unwrap()
    }

    fn coordinator(ledger: Arc<ScriptedLedger>) -> RaceCoordinator<ScriptedLedger> {
        RaceCoordinator::new(ledger)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_sequence_race_succeeds_on_sixth_attempt() {
        let ledger = Arc::new(ScriptedLedger::new(
            NETWORK_TIME,
            vec![Script::Reject("tx_bad_seq"); 5],
        ));
        let started = tokio::time::Instant::now();

        let result = coordinator(ledger.clone())
            .race_submit(&config())
            .await
            .unwrap();

        match result {
            RaceResult::Succeeded { attempts, .. } => assert_eq!(attempts, 6),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(ledger.submitted_count(), 6);
        assert!(started.elapsed() >= Duration::from_millis(1250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_balance_aborts_after_one_attempt() {
        let ledger = Arc::new(ScriptedLedger::new(
            NETWORK_TIME,
            vec![Script::Reject("tx_insufficient_balance"); 10],
        ));

        let result = coordinator(ledger.clone())
            .race_submit(&config())
            .await
            .unwrap();

        match result {
            RaceResult::Aborted { attempts, error } => {
                assert_eq!(attempts, 1);
                assert!(matches!(error, Error::Ledger { .. }));
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert_eq!(ledger.submitted_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_policy_suspends_before_racing() {
        let ledger = Arc::new(ScriptedLedger::new(NETWORK_TIME, Vec::new()));
        let mut config = config();
        config.unlock_at = NETWORK_TIME + 10;
        let started = tokio::time::Instant::now();

        let result = coordinator(ledger.clone())
            .race_submit(&config)
            .await
            .unwrap();

        assert!(result.is_successful());
        // 10s gap minus the 3s start window.
        assert!(started.elapsed() >= Duration::from_millis(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_gate_refuses_without_submitting() {
        let ledger = Arc::new(ScriptedLedger::new(NETWORK_TIME, Vec::new()));
        let mut config = config();
        config.unlock_at = NETWORK_TIME + 600;
        // A negative offset widens the gap past the tolerance window.
        config.early_start_offset_ms = -5000;
        config.gate_policy = crate::config::GatePolicy::FailFast;

        let result = coordinator(ledger.clone())
            .race_submit(&config)
            .await
            .unwrap();

        match result {
            RaceResult::TooEarly { seconds_remaining } => {
                assert_eq!(seconds_remaining, 605);
            }
            other => panic!("expected too-early, got {other:?}"),
        }
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sponsored_race_co_signs_every_attempt() {
        let ledger = Arc::new(ScriptedLedger::new(
            NETWORK_TIME,
            vec![Script::Reject("tx_bad_seq"); 2],
        ));
        let mut config = config();
        config.sponsor_secret = Some("33".repeat(32));

        let result = coordinator(ledger.clone())
            .race_submit(&config)
            .await
            .unwrap();
        assert!(result.is_successful());

        let submitted = ledger.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 3);
        for tx in submitted.iter() {
            assert_eq!(tx.signatures.len(), 2);
            assert_eq!(tx.payload.source, tx.signatures[1].signer);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_clock_does_not_fail_the_race() {
        let mut ledger = ScriptedLedger::new(NETWORK_TIME, Vec::new());
        ledger.fail_time_probe = true;
        let ledger = Arc::new(ledger);

        let mut config = config();
        // Local clock is far past this instant, so the gate releases
        // immediately and the race runs.
        config.unlock_at = 1;

        let result = coordinator(ledger.clone())
            .race_submit(&config)
            .await
            .unwrap();
        assert!(result.is_successful());
    }

    #[tokio::test]
    async fn test_invalid_secret_is_caught_before_any_network_call() {
        let ledger = Arc::new(ScriptedLedger::new(NETWORK_TIME, Vec::new()));
        let mut config = config();
        config.sender_secret = "not hex".to_string();

        let result = coordinator(ledger.clone()).race_submit(&config).await;
        assert!(matches!(result, Err(Error::InvalidSecret(_))));
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_recipient_is_caught_before_any_network_call() {
        let ledger = Arc::new(ScriptedLedger::new(NETWORK_TIME, Vec::new()));
        let mut config = config();
        config.recipient = None;

        let result = coordinator(ledger.clone()).race_submit(&config).await;
        assert!(matches!(result, Err(Error::MissingRecipient)));
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test]
    async fn test_custom_fee_without_total_is_caught_early() {
        let ledger = Arc::new(ScriptedLedger::new(NETWORK_TIME, Vec::new()));
        let mut config = config();
        config.fee_mechanism = crate::config::FeeMechanism::CustomTotal;

        let result = coordinator(ledger.clone()).race_submit(&config).await;
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_reports_unconfirmed() {
        let ledger = Arc::new(ScriptedLedger::new(NETWORK_TIME, Vec::new()));
        let mut config = config();
        config.fire_and_forget = true;
        config.bound = crate::config::RaceBound::Attempts { count: 4 };

        let result = coordinator(ledger.clone())
            .race_submit(&config)
            .await
            .unwrap();

        assert!(matches!(result, RaceResult::Unconfirmed { attempts: 4 }));
    }
}
