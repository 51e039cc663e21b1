//! Settlement engine: escrow at arm time, payout or refund at close.
//!
//! Each operation follows the same three steps:
//! 1. take the guard lock on `settlements/{match_id}` by compare-and-set,
//!    bailing out if the work is already done or another attempt owns it
//! 2. commit one ledger batch under `arm:{match_id}` or `settle:{match_id}`
//! 3. mark the record (`armed` / `processed`) and drop the lock
//!
//! A crash between 2 and 3 leaves a stale lock; the next attempt after the
//! TTL finds the batch key already used, reads the committed entries back and
//! finishes step 3 without touching balances again.

use super::{
    errors::{SettlementError, SettlementResult},
    models::{GuardLock, GuardOp, MatchOutcome, SettlementRecord, player_deltas},
};
use crate::ledger::{
    AccountId, BalanceDelta, BalanceLedger, EntryType, LedgerBatch, LedgerEntry, LedgerError,
    Posting,
};
use crate::session::MatchSession;
use crate::store::{DocDecision, DocOutcome, StateStore, doc::read_doc, doc::transact_doc, keys};
use crate::types::MatchId;
use crate::{logging, metrics};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Result of an arm attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ArmOutcome {
    /// This attempt took the escrow
    Armed(SettlementRecord),
    /// Escrow was already taken
    AlreadyArmed(SettlementRecord),
    /// Another attempt holds the guard right now
    InFlight,
}

/// Result of a settle attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// This attempt moved the money
    Applied(SettlementRecord),
    /// Already done, or another attempt owns the guard. A silent no-op.
    AlreadySettled(SettlementRecord),
    /// Voiding a match whose escrow was never taken
    NothingToSettle,
}

impl SettleOutcome {
    pub fn record(&self) -> Option<&SettlementRecord> {
        match self {
            SettleOutcome::Applied(r) | SettleOutcome::AlreadySettled(r) => Some(r),
            SettleOutcome::NothingToSettle => None,
        }
    }

    /// The match needs no further settlement work
    pub fn is_final(&self) -> bool {
        match self {
            SettleOutcome::Applied(_) | SettleOutcome::NothingToSettle => true,
            SettleOutcome::AlreadySettled(r) => r.processed,
        }
    }
}

enum Acquired {
    Locked(SettlementRecord),
    Skipped(Option<SettlementRecord>),
}

/// Exactly-once escrow and settlement against the balance ledger
pub struct SettlementEngine {
    store: Arc<dyn StateStore>,
    ledger: Arc<dyn BalanceLedger>,
    lock_ttl: chrono::Duration,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        ledger: Arc<dyn BalanceLedger>,
        lock_ttl: std::time::Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            lock_ttl: chrono::Duration::from_std(lock_ttl).unwrap_or(chrono::Duration::seconds(30)),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn BalanceLedger> {
        &self.ledger
    }

    /// Current settlement record of a match
    pub async fn record(&self, match_id: MatchId) -> SettlementResult<Option<SettlementRecord>> {
        Ok(read_doc(self.store.as_ref(), &keys::settlement(match_id)).await?)
    }

    /// Debit both entry fees into the house, credit pool first.
    ///
    /// # Errors
    ///
    /// * `SettlementError::InsufficientFunds` - A player cannot cover the fee
    /// * `SettlementError::LedgerWriteFailure` - Nothing was debited; retry
    pub async fn arm(&self, session: &MatchSession) -> SettlementResult<ArmOutcome> {
        let match_id = session.match_id;
        let players = session.player_ids();
        let fee = session.tier.entry_fee;
        let now = Utc::now();

        let fresh = SettlementRecord::new(match_id, players, fee, session.tier.payout, now);
        let lock = GuardLock::new(GuardOp::Arm, now);

        let record = match self
            .acquire(match_id, &lock, Some(fresh), |r| r.armed || r.processed)
            .await?
        {
            Acquired::Locked(record) => record,
            Acquired::Skipped(Some(record)) if record.armed => {
                return Ok(ArmOutcome::AlreadyArmed(record));
            }
            Acquired::Skipped(_) => {
                metrics::settlement_race("arm");
                return Ok(ArmOutcome::InFlight);
            }
        };

        let idempotency_key = format!("arm:{match_id}");
        let mut batch = LedgerBatch::new(idempotency_key.clone()).for_match(match_id);
        for player_id in players {
            batch = batch
                .posting(
                    Posting::debit_credit_first(AccountId::Player(player_id), fee, EntryType::Escrow)
                        .with_description(format!("Entry fee for match {match_id}")),
                )
                .posting(Posting::delta(
                    AccountId::House,
                    BalanceDelta::new(fee, 0),
                    EntryType::Escrow,
                ));
        }

        let entries = match self.commit_or_recover(&batch).await {
            Ok(entries) => entries,
            Err(LedgerError::InsufficientFunds {
                account: AccountId::Player(player_id),
                available,
                required,
            }) => {
                self.release(match_id, lock.holder).await;
                log::warn!(
                    "Match {}: player {} cannot cover the stake ({} < {})",
                    match_id,
                    player_id,
                    available,
                    required
                );
                return Err(SettlementError::InsufficientFunds {
                    player_id,
                    available,
                    required,
                });
            }
            Err(source) => {
                self.release(match_id, lock.holder).await;
                metrics::ledger_failure("arm");
                log::error!("Match {}: escrow batch failed: {}", match_id, source);
                return Err(SettlementError::LedgerWriteFailure { match_id, source });
            }
        };

        let debited = player_deltas(players, &entries);
        for (player_id, delta) in players.iter().zip(debited.iter()) {
            logging::log_money_event(match_id, "escrow", Some(*player_id), delta.total());
        }

        let holder = lock.holder;
        let marked = transact_doc(
            self.store.as_ref(),
            &keys::settlement(match_id),
            |current: Option<SettlementRecord>| match current {
                // A racing void may have marked the escrow already; the lock
                // is still ours to drop
                Some(mut r) if !r.armed || r.holds_lock(holder) => {
                    if !r.armed {
                        r.armed = true;
                        r.debited = debited;
                    }
                    if r.holds_lock(holder) {
                        r.lock = None;
                    }
                    r.updated_at = Utc::now();
                    DocDecision::Write(r)
                }
                _ => DocDecision::Abort,
            },
        )
        .await
        .inspect_err(|e| {
            log::error!(
                "CRITICAL: Match {}: escrow committed but record not marked: {}",
                match_id,
                e
            );
        })?;

        metrics::escrow_armed();
        match marked {
            DocOutcome::Committed(Some(r)) => {
                log::info!("Match {}: escrow armed ({} each)", match_id, fee);
                Ok(ArmOutcome::Armed(r))
            }
            other => Ok(ArmOutcome::AlreadyArmed(
                other.into_doc().unwrap_or(record),
            )),
        }
    }

    /// Pay out a decided match, or void an aborted one.
    ///
    /// # Errors
    ///
    /// * `SettlementError::NotArmed` - Win or draw for a match without escrow
    /// * `SettlementError::LedgerWriteFailure` - Nothing moved; retry
    pub async fn resolve(
        &self,
        session: &MatchSession,
        outcome: MatchOutcome,
    ) -> SettlementResult<SettleOutcome> {
        let match_id = session.match_id;
        let armed = match self.record(match_id).await? {
            Some(record) if record.armed => true,
            Some(record) => self.recover_escrow(&record).await?,
            None => false,
        };

        if !armed {
            return match outcome {
                MatchOutcome::Void => Ok(SettleOutcome::NothingToSettle),
                _ => Err(SettlementError::NotArmed(match_id)),
            };
        }

        let lock = GuardLock::new(GuardOp::Settle, Utc::now());
        let record = match self
            .acquire(match_id, &lock, None, |r| r.processed || !r.armed)
            .await?
        {
            Acquired::Locked(record) => record,
            Acquired::Skipped(record) => {
                metrics::settlement_race("settle");
                log::debug!("Match {}: settlement already handled elsewhere", match_id);
                return match record {
                    Some(r) => Ok(SettleOutcome::AlreadySettled(r)),
                    None => Err(SettlementError::NotArmed(match_id)),
                };
            }
        };

        let batch = settlement_batch(&record, outcome);
        let entries = match self.commit_or_recover(&batch).await {
            Ok(entries) => entries,
            Err(source) => {
                self.release(match_id, lock.holder).await;
                metrics::ledger_failure("settle");
                log::error!(
                    "CRITICAL: Match {}: settlement batch failed, stakes held by house: {}",
                    match_id,
                    source
                );
                return Err(SettlementError::LedgerWriteFailure { match_id, source });
            }
        };

        let credited = match outcome {
            MatchOutcome::Win { winner } => Some((winner, record.payout)),
            MatchOutcome::Draw | MatchOutcome::Void => None,
        };
        let refunded = match outcome {
            MatchOutcome::Win { .. } => None,
            MatchOutcome::Draw | MatchOutcome::Void => Some(player_deltas(record.players, &entries)),
        };

        match credited {
            Some((winner, amount)) => {
                logging::log_money_event(match_id, "payout", Some(winner), amount);
            }
            None => {
                for (player_id, delta) in record.players.iter().zip(refunded.unwrap_or_default()) {
                    logging::log_money_event(match_id, "refund", Some(*player_id), delta.total());
                }
            }
        }

        let holder = lock.holder;
        let marked = transact_doc(
            self.store.as_ref(),
            &keys::settlement(match_id),
            |current: Option<SettlementRecord>| match current {
                Some(mut r) if !r.processed || r.holds_lock(holder) => {
                    if !r.processed {
                        r.processed = true;
                        r.outcome = Some(outcome);
                        r.credited = credited;
                        r.refunded = refunded;
                    }
                    if r.holds_lock(holder) {
                        r.lock = None;
                    }
                    r.updated_at = Utc::now();
                    DocDecision::Write(r)
                }
                _ => DocDecision::Abort,
            },
        )
        .await
        .inspect_err(|e| {
            log::error!(
                "CRITICAL: Match {}: settlement committed but record not marked: {}",
                match_id,
                e
            );
        })?;

        match marked {
            DocOutcome::Committed(Some(r)) => {
                metrics::settlement_applied(outcome_label(outcome));
                log::info!("Match {}: settled as {}", match_id, outcome);
                Ok(SettleOutcome::Applied(r))
            }
            other => Ok(SettleOutcome::AlreadySettled(
                other.into_doc().unwrap_or(record),
            )),
        }
    }

    /// Mark escrow whose batch committed but whose record never got marked,
    /// e.g. a ledger call that timed out after applying.
    async fn recover_escrow(&self, record: &SettlementRecord) -> SettlementResult<bool> {
        let match_id = record.match_id;
        let entries = self
            .ledger
            .batch_entries(&format!("arm:{match_id}"))
            .await
            .map_err(|source| SettlementError::LedgerWriteFailure { match_id, source })?;
        if entries.is_empty() {
            return Ok(false);
        }

        let debited = player_deltas(record.players, &entries);
        transact_doc(
            self.store.as_ref(),
            &keys::settlement(match_id),
            |current: Option<SettlementRecord>| match current {
                Some(mut r) if !r.armed => {
                    r.armed = true;
                    r.debited = debited;
                    r.updated_at = Utc::now();
                    DocDecision::Write(r)
                }
                _ => DocDecision::Abort,
            },
        )
        .await?;

        log::warn!("Match {}: recovered escrow that was never marked", match_id);
        Ok(true)
    }

    /// Take the guard lock. `done` says the work needs no lock at all.
    async fn acquire<F>(
        &self,
        match_id: MatchId,
        lock: &GuardLock,
        fresh: Option<SettlementRecord>,
        done: F,
    ) -> SettlementResult<Acquired>
    where
        F: Fn(&SettlementRecord) -> bool + Send + Sync,
    {
        let ttl = self.lock_ttl;
        let outcome = transact_doc(
            self.store.as_ref(),
            &keys::settlement(match_id),
            |current: Option<SettlementRecord>| {
                let Some(mut record) = current.or_else(|| fresh.clone()) else {
                    return DocDecision::Abort;
                };
                if done(&record) || record.is_locked(lock.acquired_at, ttl) {
                    return DocDecision::Abort;
                }
                if let Some(stale) = &record.lock {
                    log::warn!(
                        "Match {}: taking over expired {:?} lock from {}",
                        match_id,
                        stale.op,
                        stale.holder
                    );
                }
                record.lock = Some(lock.clone());
                record.updated_at = lock.acquired_at;
                DocDecision::Write(record)
            },
        )
        .await?;

        Ok(match outcome {
            DocOutcome::Committed(Some(record)) => Acquired::Locked(record),
            other => Acquired::Skipped(other.into_doc()),
        })
    }

    /// Drop our lock after a failed batch so the next attempt need not wait
    async fn release(&self, match_id: MatchId, holder: Uuid) {
        let result = transact_doc(
            self.store.as_ref(),
            &keys::settlement(match_id),
            |current: Option<SettlementRecord>| match current {
                Some(mut r) if r.holds_lock(holder) => {
                    r.lock = None;
                    DocDecision::Write(r)
                }
                _ => DocDecision::Abort,
            },
        )
        .await;

        if let Err(e) = result {
            log::warn!(
                "Match {}: could not release settlement lock, it will expire: {}",
                match_id,
                e
            );
        }
    }

    /// Commit a batch; a reused key means an earlier attempt already applied
    /// it, so its entries are read back instead.
    async fn commit_or_recover(&self, batch: &LedgerBatch) -> Result<Vec<LedgerEntry>, LedgerError> {
        match self.ledger.commit(batch).await {
            Ok(entries) => Ok(entries),
            Err(LedgerError::DuplicateTransaction(key)) => {
                log::warn!("Ledger batch {} already committed, recovering entries", key);
                self.ledger.batch_entries(&key).await
            }
            Err(e) => Err(e),
        }
    }
}

fn settlement_batch(record: &SettlementRecord, outcome: MatchOutcome) -> LedgerBatch {
    let match_id = record.match_id;
    let batch = LedgerBatch::new(format!("settle:{match_id}")).for_match(match_id);

    match outcome {
        MatchOutcome::Win { winner } => batch
            .posting(
                Posting::delta(
                    AccountId::Player(winner),
                    BalanceDelta::new(0, record.payout),
                    EntryType::Payout,
                )
                .with_description(format!("Prize for match {match_id}")),
            )
            .posting(Posting::delta(
                AccountId::House,
                BalanceDelta::new(-record.payout, 0),
                EntryType::Payout,
            )),
        MatchOutcome::Draw => record.players.iter().fold(batch, |batch, &player_id| {
            batch
                .posting(
                    Posting::delta(
                        AccountId::Player(player_id),
                        BalanceDelta::new(record.entry_fee, 0),
                        EntryType::Refund,
                    )
                    .with_description(format!("Draw refund for match {match_id}")),
                )
                .posting(Posting::delta(
                    AccountId::House,
                    BalanceDelta::new(-record.entry_fee, 0),
                    EntryType::Refund,
                ))
        }),
        MatchOutcome::Void => record.players.iter().zip(record.debited.iter()).fold(
            batch,
            |batch, (&player_id, debited)| {
                batch
                    .posting(
                        Posting::delta(AccountId::Player(player_id), debited.negate(), EntryType::Refund)
                            .with_description(format!("Stake returned for void match {match_id}")),
                    )
                    .posting(Posting::delta(
                        AccountId::House,
                        BalanceDelta::new(debited.total(), 0),
                        EntryType::Refund,
                    ))
            },
        ),
    }
}

fn outcome_label(outcome: MatchOutcome) -> &'static str {
    match outcome {
        MatchOutcome::Win { .. } => "win",
        MatchOutcome::Draw => "draw",
        MatchOutcome::Void => "void",
    }
}
