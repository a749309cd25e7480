//! Settlement watcher
//!
//! Polls the ledger on a fixed timer for transactions that mention a checkout
//! reference, then validates each candidate against what the buyer was asked
//! to pay. Only a successful record that credits the expected recipient with
//! the expected amount of the expected token confirms the checkout.
//!
//! ```text
//! Polling ──Found──▶ Validating ──match──▶ Confirmed (terminal)
//!    ▲                   │
//!    └──────mismatch─────┴──▶ Rejected (signature remembered, keep polling)
//! ```
//!
//! The watch path fails open: lookup errors are logged and retried on the
//! next tick, never surfaced. Polling is unbounded; cancelling or dropping
//! the [`WatchHandle`] is the only way to stop an unconfirmed watcher.

use crate::ledger::{Ledger, SettlementRecord};
use crate::metrics::metrics;
use crate::reference::Reference;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Interval between two ledger polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What a settled payment has to look like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementExpectation {
    pub reference: Reference,
    /// Owner of the token account that must be credited
    pub recipient: Pubkey,
    pub mint: Pubkey,
    /// Expected credit in the mint's base units
    pub amount: u64,
}

/// Why a candidate record was not accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationMismatch {
    #[error("transaction failed on chain: {0}")]
    ExecutionFailed(String),

    #[error("reference {0} is not part of the transaction")]
    ReferenceMissing(Reference),

    #[error("recipient {recipient} received no {mint} tokens")]
    RecipientNotCredited { recipient: Pubkey, mint: Pubkey },

    #[error("amount mismatch: expected {expected}, received {actual}")]
    AmountMismatch { expected: u64, actual: i128 },
}

/// Result of one ledger poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Unvalidated candidate signatures, oldest first
    Found(Vec<Signature>),
    NotFound,
    TransientError(String),
}

/// Watcher state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Polling,
    Validating(Signature),
    Confirmed(Signature),
    Rejected {
        signature: Signature,
        reason: ValidationMismatch,
    },
}

impl WatchState {
    pub fn confirmed_signature(&self) -> Option<Signature> {
        match self {
            Self::Confirmed(signature) => Some(*signature),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Check a settled transaction against the expected payment
pub fn validate_record(
    expectation: &SettlementExpectation,
    record: &SettlementRecord,
) -> Result<(), ValidationMismatch> {
    if let Some(err) = &record.error {
        return Err(ValidationMismatch::ExecutionFailed(err.clone()));
    }
    if !record.mentions(&expectation.reference.pubkey()) {
        return Err(ValidationMismatch::ReferenceMissing(expectation.reference));
    }

    let credited: Vec<i128> = record
        .token_balances
        .iter()
        .filter(|change| {
            change.mint == expectation.mint && change.owner == Some(expectation.recipient)
        })
        .map(|change| change.delta())
        .collect();
    if credited.is_empty() {
        return Err(ValidationMismatch::RecipientNotCredited {
            recipient: expectation.recipient,
            mint: expectation.mint,
        });
    }

    let actual: i128 = credited.iter().sum();
    if actual != i128::from(expectation.amount) {
        return Err(ValidationMismatch::AmountMismatch {
            expected: expectation.amount,
            actual,
        });
    }
    Ok(())
}

/// Polls the ledger for one checkout's settlement
#[derive(Debug)]
pub struct SettlementWatcher {
    ledger: Arc<dyn Ledger>,
    expectation: SettlementExpectation,
    state: WatchState,
    rejected: HashSet<Signature>,
}

impl SettlementWatcher {
    pub fn new(ledger: Arc<dyn Ledger>, expectation: SettlementExpectation) -> Self {
        Self {
            ledger,
            expectation,
            state: WatchState::Polling,
            rejected: HashSet::new(),
        }
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    pub fn expectation(&self) -> &SettlementExpectation {
        &self.expectation
    }

    /// Ask the ledger for transactions carrying the reference
    pub async fn poll(&self) -> PollOutcome {
        metrics().settlement_polls.inc();
        match self
            .ledger
            .signatures_for_address(&self.expectation.reference.pubkey())
            .await
        {
            Ok(signatures) => {
                let candidates: Vec<Signature> = signatures
                    .into_iter()
                    .rev()
                    .filter(|sig| !self.rejected.contains(sig))
                    .collect();
                if candidates.is_empty() {
                    PollOutcome::NotFound
                } else {
                    PollOutcome::Found(candidates)
                }
            }
            Err(e) => PollOutcome::TransientError(e.to_string()),
        }
    }

    /// Run one poll-and-validate cycle
    pub async fn step(&mut self) -> &WatchState {
        if self.state.is_terminal() {
            return &self.state;
        }
        self.state = WatchState::Polling;

        let candidates = match self.poll().await {
            PollOutcome::Found(candidates) => candidates,
            PollOutcome::NotFound => return &self.state,
            PollOutcome::TransientError(error) => {
                metrics().settlement_transient_errors.inc();
                warn!(
                    reference = %self.expectation.reference,
                    error = %error,
                    "Settlement poll failed, retrying on next tick"
                );
                return &self.state;
            }
        };

        for signature in candidates {
            self.state = WatchState::Validating(signature);

            let record = match self.ledger.settlement_record(&signature).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(signature = %signature, "Settlement record not available yet");
                    continue;
                }
                Err(e) => {
                    warn!(signature = %signature, error = %e, "Failed to fetch settlement record");
                    continue;
                }
            };

            match validate_record(&self.expectation, &record) {
                Ok(()) => {
                    metrics().settlements_confirmed.inc();
                    info!(
                        reference = %self.expectation.reference,
                        signature = %signature,
                        slot = record.slot,
                        "Payment confirmed"
                    );
                    self.state = WatchState::Confirmed(signature);
                    return &self.state;
                }
                Err(reason) => {
                    metrics().settlement_mismatches.inc();
                    warn!(
                        reference = %self.expectation.reference,
                        signature = %signature,
                        reason = %reason,
                        "ValidationMismatch: settled transaction does not match the checkout"
                    );
                    self.rejected.insert(signature);
                    self.state = WatchState::Rejected { signature, reason };
                }
            }
        }

        if matches!(self.state, WatchState::Validating(_)) {
            self.state = WatchState::Polling;
        }
        &self.state
    }

    /// Poll every `period` on a background task until confirmed or cancelled
    pub fn spawn(mut self, period: Duration) -> WatchHandle {
        let (notify, confirmed) = oneshot::channel();
        let reference = self.expectation.reference;

        let task = tokio::spawn(async move {
            let _active = ActiveWatcher::enter();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Some(signature) = self.step().await.confirmed_signature() {
                    // The receiver may already be gone; the watcher stops either way
                    let _ = notify.send(signature);
                    break;
                }
            }
        });

        debug!(reference = %reference, period_ms = period.as_millis() as u64, "Settlement watcher started");
        WatchHandle {
            task,
            confirmed: Some(confirmed),
            reference,
        }
    }
}

/// Keeps the active watcher gauge accurate across abort
struct ActiveWatcher;

impl ActiveWatcher {
    fn enter() -> Self {
        metrics().active_watchers.inc();
        Self
    }
}

impl Drop for ActiveWatcher {
    fn drop(&mut self) {
        metrics().active_watchers.dec();
    }
}

/// Owner side of a running watcher
///
/// Dropping the handle cancels the watcher.
#[derive(Debug)]
pub struct WatchHandle {
    task: JoinHandle<()>,
    confirmed: Option<oneshot::Receiver<Signature>>,
    reference: Reference,
}

impl WatchHandle {
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Wait for confirmation; `None` if the watcher was cancelled or the
    /// confirmation was already taken
    pub async fn confirmed(&mut self) -> Option<Signature> {
        let receiver = self.confirmed.take()?;
        receiver.await.ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling; no further ledger queries are issued
    pub fn cancel(self) {
        self.task.abort();
        debug!(reference = %self.reference, "Settlement watcher cancelled");
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
