//! Pairing seekers per stake tier.
//!
//! A seeker first tries to claim someone already waiting; only when every
//! candidate in the scanned batch is gone or taken does it wait itself. The
//! claim is a compare-and-set on the candidate's entry, so of any number of
//! challengers racing for one entry exactly one commits.

use super::{
    errors::{QueueError, QueueResult},
    models::{CancelOutcome, Claim, JoinOutcome, MatchHandle, QueueEntry, SearchTicket},
};
use crate::config::{EngineConfig, Tier};
use crate::ledger::{AccountId, BalanceLedger, LedgerError};
use crate::session::{MatchCoordinator, Role};
use crate::store::{
    CleanupAction, ConnectionId, DocDecision, DocOutcome, DocSubscription, StateStore,
    doc::{decode, transact_doc, write_doc},
    keys,
};
use crate::types::{PlayerId, PlayerProfile};
use crate::metrics;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// Matchmaking service shared by every client of one store
pub struct Matchmaker {
    store: Arc<dyn StateStore>,
    ledger: Arc<dyn BalanceLedger>,
    coordinator: Arc<MatchCoordinator>,
    config: EngineConfig,
}

impl Matchmaker {
    pub fn new(
        store: Arc<dyn StateStore>,
        ledger: Arc<dyn BalanceLedger>,
        coordinator: Arc<MatchCoordinator>,
    ) -> Self {
        let config = coordinator.config().clone();
        Self {
            store,
            ledger,
            coordinator,
            config,
        }
    }

    /// Search once: claim a waiting opponent or start waiting.
    ///
    /// # Errors
    ///
    /// * `QueueError::InsufficientFunds` - Balance below the entry fee; nothing enqueued
    pub async fn join(
        &self,
        player: &PlayerProfile,
        tier: Tier,
        connection: ConnectionId,
    ) -> QueueResult<JoinOutcome> {
        self.check_funds(player.id, tier).await?;

        let tier_key = tier.key();
        let own_key = keys::queue_entry(&tier_key, player.id);

        // Leftover from an earlier search. If it was claimed meanwhile the
        // claimant is already waiting for us.
        if let Some(claim) = self.remove_unclaimed(&own_key).await? {
            let handle = self.accept_claim(&own_key, connection, tier, claim).await?;
            return Ok(JoinOutcome::Matched(handle));
        }

        let candidates = self
            .store
            .scan(&keys::queue_prefix(&tier_key), self.config.search_batch)
            .await?;

        for (key, value) in candidates {
            let entry: QueueEntry = match decode(&key, &value) {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping malformed queue entry {}: {}", key, e);
                    continue;
                }
            };
            if entry.player_id == player.id || entry.is_claimed() {
                continue;
            }

            match self.try_claim(&key, player, tier).await {
                Ok(handle) => return Ok(JoinOutcome::Matched(handle)),
                Err(QueueError::ClaimConflict(key)) => {
                    metrics::claim_conflict();
                    log::debug!("Player {} lost the claim on {}", player.id, key);
                }
                Err(e) => return Err(e),
            }
        }

        let now = Utc::now();
        write_doc(self.store.as_ref(), &own_key, &QueueEntry::new(player, now)).await?;
        self.store
            .on_disconnect(connection, &own_key, CleanupAction::Delete)
            .await?;

        log::info!("Player {} waiting in tier {}", player.id, tier_key);
        Ok(JoinOutcome::Waiting(SearchTicket {
            player: player.clone(),
            tier,
            key: own_key,
            connection,
            enqueued_at: now,
            deadline: Instant::now() + self.config.search_timeout,
        }))
    }

    /// Wait on our own entry until a challenger claims it or the search
    /// budget runs out.
    ///
    /// # Errors
    ///
    /// * `QueueError::SearchTimeout` - Budget spent; the entry was removed
    /// * `QueueError::EntryLost` - The entry vanished underneath us
    pub async fn await_claim(&self, ticket: &SearchTicket) -> QueueResult<MatchHandle> {
        let mut sub = self.watch_entry(ticket).await?;
        let mut entry = sub.current()?;

        loop {
            if let Some(handle) = self.observe(ticket, entry).await? {
                return Ok(handle);
            }
            entry = match tokio::time::timeout_at(ticket.deadline, sub.changed()).await {
                Ok(changed) => changed?,
                Err(_) => return self.expire(ticket).await,
            };
        }
    }

    pub async fn watch_entry(&self, ticket: &SearchTicket) -> QueueResult<DocSubscription<QueueEntry>> {
        Ok(DocSubscription::open(self.store.as_ref(), &ticket.key).await?)
    }

    /// React to a new value of our own entry.
    ///
    /// # Returns
    ///
    /// * `Some(MatchHandle)` - We were claimed and are now the host
    /// * `None` - Still waiting
    pub async fn observe(
        &self,
        ticket: &SearchTicket,
        entry: Option<QueueEntry>,
    ) -> QueueResult<Option<MatchHandle>> {
        match entry {
            Some(QueueEntry {
                claim: Some(claim), ..
            }) => {
                let handle = self
                    .accept_claim(&ticket.key, ticket.connection, ticket.tier, claim)
                    .await?;
                Ok(Some(handle))
            }
            Some(_) => Ok(None),
            None => Err(QueueError::EntryLost(ticket.key.clone())),
        }
    }

    /// Stop searching. A claim that already landed is honoured.
    pub async fn cancel(&self, ticket: &SearchTicket) -> QueueResult<CancelOutcome> {
        let outcome = transact_doc(
            self.store.as_ref(),
            &ticket.key,
            |current: Option<QueueEntry>| match current {
                Some(entry) if !entry.is_claimed() => DocDecision::Delete,
                _ => DocDecision::Abort,
            },
        )
        .await?;

        match outcome {
            DocOutcome::Committed(_) => {
                self.store
                    .cancel_on_disconnect(ticket.connection, &ticket.key)
                    .await?;
                log::info!("Player {} left the queue", ticket.player.id);
                Ok(CancelOutcome::Cancelled)
            }
            DocOutcome::Aborted(Some(QueueEntry {
                claim: Some(claim), ..
            })) => {
                let handle = self
                    .accept_claim(&ticket.key, ticket.connection, ticket.tier, claim)
                    .await?;
                Ok(CancelOutcome::AlreadyClaimed(handle))
            }
            DocOutcome::Aborted(_) => {
                self.store
                    .cancel_on_disconnect(ticket.connection, &ticket.key)
                    .await?;
                Ok(CancelOutcome::NotQueued)
            }
        }
    }

    /// `join` then `await_claim`, bounded by the search budget
    pub async fn find_match(
        &self,
        player: &PlayerProfile,
        tier: Tier,
        connection: ConnectionId,
    ) -> QueueResult<MatchHandle> {
        match self.join(player, tier, connection).await? {
            JoinOutcome::Matched(handle) => Ok(handle),
            JoinOutcome::Waiting(ticket) => self.await_claim(&ticket).await,
        }
    }

    /// Search budget spent: leave the queue, unless a claim beat us to it
    pub async fn expire(&self, ticket: &SearchTicket) -> QueueResult<MatchHandle> {
        match self.cancel(ticket).await? {
            CancelOutcome::AlreadyClaimed(handle) => Ok(handle),
            CancelOutcome::Cancelled | CancelOutcome::NotQueued => {
                metrics::search_timeout();
                log::info!(
                    "Player {}: no opponent in tier {} after {:?}",
                    ticket.player.id,
                    ticket.tier,
                    self.config.search_timeout
                );
                Err(QueueError::SearchTimeout(ticket.tier.key()))
            }
        }
    }

    async fn check_funds(&self, player_id: PlayerId, tier: Tier) -> QueueResult<()> {
        let available = match self.ledger.read_balance(AccountId::Player(player_id)).await {
            Ok(balance) => balance.total(),
            Err(LedgerError::AccountNotFound(_)) => 0,
            Err(e) => return Err(e.into()),
        };

        if available < tier.entry_fee {
            log::info!(
                "Player {} cannot afford tier {} ({} < {})",
                player_id,
                tier,
                available,
                tier.entry_fee
            );
            return Err(QueueError::InsufficientFunds {
                player_id,
                available,
                required: tier.entry_fee,
            });
        }
        Ok(())
    }

    /// Reserve a waiting entry and create the match as its joiner
    async fn try_claim(
        &self,
        key: &str,
        player: &PlayerProfile,
        tier: Tier,
    ) -> QueueResult<MatchHandle> {
        let match_id = Uuid::new_v4();
        let outcome = transact_doc(
            self.store.as_ref(),
            key,
            |current: Option<QueueEntry>| match current {
                Some(entry) if !entry.is_claimed() && entry.player_id != player.id => {
                    DocDecision::Write(entry.claimed(match_id, player))
                }
                _ => DocDecision::Abort,
            },
        )
        .await?;

        let DocOutcome::Committed(Some(entry)) = outcome else {
            return Err(QueueError::ClaimConflict(key.to_string()));
        };

        let host = entry.profile();
        self.coordinator
            .create(match_id, tier, &host, player)
            .await?;

        log::info!(
            "Player {} claimed player {} for match {}",
            player.id,
            host.id,
            match_id
        );
        Ok(MatchHandle {
            match_id,
            tier,
            role: Role::Joiner,
            opponent: host,
        })
    }

    /// Delete our entry unless claimed; returns the claim if there is one
    async fn remove_unclaimed(&self, key: &str) -> QueueResult<Option<Claim>> {
        let outcome = transact_doc(
            self.store.as_ref(),
            key,
            |current: Option<QueueEntry>| match current {
                Some(entry) if !entry.is_claimed() => DocDecision::Delete,
                _ => DocDecision::Abort,
            },
        )
        .await?;

        Ok(match outcome {
            DocOutcome::Aborted(Some(entry)) => entry.claim,
            _ => None,
        })
    }

    /// The waiting side of a claim: drop the entry and its hook, become host
    async fn accept_claim(
        &self,
        key: &str,
        connection: ConnectionId,
        tier: Tier,
        claim: Claim,
    ) -> QueueResult<MatchHandle> {
        self.store.delete(key).await?;
        self.store.cancel_on_disconnect(connection, key).await?;

        log::info!(
            "Claimed by player {} for match {}",
            claim.claimed_by,
            claim.match_id
        );
        Ok(MatchHandle {
            match_id: claim.match_id,
            tier,
            role: Role::Host,
            opponent: PlayerProfile::new(claim.claimed_by, claim.claimed_by_name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GameKind;
    use crate::ledger::{Balance, MemoryLedger};
    use crate::settlement::SettlementEngine;
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        matchmaker: Arc<Matchmaker>,
        coordinator: Arc<MatchCoordinator>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        for id in 1..=10 {
            ledger.open_account(id, Balance::new(20, 0));
        }
        ledger.open_account(11, Balance::new(3, 4));

        let config = EngineConfig::default();
        let settlement = Arc::new(SettlementEngine::new(
            store.clone(),
            ledger.clone(),
            config.settlement_lock_ttl,
        ));
        let coordinator = Arc::new(MatchCoordinator::new(store.clone(), settlement, config));
        let matchmaker = Arc::new(Matchmaker::new(
            store.clone(),
            ledger,
            coordinator.clone(),
        ));
        Fixture {
            store,
            matchmaker,
            coordinator,
        }
    }

    fn tier() -> Tier {
        Tier::new(GameKind::Grid, 10, 18).unwrap()
    }

    fn player(id: PlayerId) -> PlayerProfile {
        PlayerProfile::new(id, format!("player{id}"))
    }

    async fn waiting(f: &Fixture, id: PlayerId, conn: ConnectionId) -> SearchTicket {
        match f.matchmaker.join(&player(id), tier(), conn).await.unwrap() {
            JoinOutcome::Waiting(ticket) => ticket,
            JoinOutcome::Matched(handle) => panic!("unexpected match {handle:?}"),
        }
    }

    async fn queued(f: &Fixture) -> usize {
        f.store
            .scan(&keys::queue_prefix(&tier().key()), 100)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_first_seeker_waits_with_cleanup_hook() {
        let f = fixture();
        let conn = ConnectionId::new();

        let ticket = waiting(&f, 1, conn).await;

        assert_eq!(ticket.key, keys::queue_entry(&tier().key(), 1));
        assert_eq!(queued(&f).await, 1);
        assert_eq!(f.store.pending_hooks(conn), 1);
    }

    #[tokio::test]
    async fn test_second_seeker_claims_and_both_see_the_match() {
        let f = fixture();
        let ticket = waiting(&f, 1, ConnectionId::new()).await;

        let JoinOutcome::Matched(joiner) = f
            .matchmaker
            .join(&player(2), tier(), ConnectionId::new())
            .await
            .unwrap()
        else {
            panic!("second seeker should claim the waiting entry");
        };
        assert_eq!(joiner.role, Role::Joiner);
        assert_eq!(joiner.opponent.id, 1);

        let host = f.matchmaker.await_claim(&ticket).await.unwrap();
        assert_eq!(host.role, Role::Host);
        assert_eq!(host.match_id, joiner.match_id);
        assert_eq!(host.opponent, player(2));
        assert_eq!(queued(&f).await, 0);

        let session = f.coordinator.session(host.match_id).await.unwrap();
        assert_eq!(session.player_ids(), [1, 2]);
        assert_eq!(session.phase, crate::session::Phase::Matched);
    }

    #[tokio::test]
    async fn test_short_balance_is_never_enqueued() {
        let f = fixture();

        let err = f
            .matchmaker
            .join(&player(11), tier(), ConnectionId::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::InsufficientFunds {
                available: 7,
                required: 10,
                ..
            }
        ));

        let err = f
            .matchmaker
            .join(&player(42), tier(), ConnectionId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InsufficientFunds { available: 0, .. }));
        assert_eq!(queued(&f).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_challengers_claim_once() {
        let f = fixture();
        let _ticket = waiting(&f, 1, ConnectionId::new()).await;

        let mut tasks = Vec::new();
        for id in 2..=9 {
            let matchmaker = f.matchmaker.clone();
            tasks.push(tokio::spawn(async move {
                matchmaker
                    .join(&player(id), tier(), ConnectionId::new())
                    .await
                    .unwrap()
            }));
        }

        let mut claims_on_first = 0;
        for task in tasks {
            if let JoinOutcome::Matched(handle) = task.await.unwrap()
                && handle.opponent.id == 1
            {
                claims_on_first += 1;
            }
        }
        assert_eq!(claims_on_first, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_and_after_claim() {
        let f = fixture();
        let conn = ConnectionId::new();
        let ticket = waiting(&f, 1, conn).await;

        assert_eq!(f.matchmaker.cancel(&ticket).await.unwrap(), CancelOutcome::Cancelled);
        assert_eq!(queued(&f).await, 0);
        assert_eq!(f.store.pending_hooks(conn), 0);
        assert_eq!(f.matchmaker.cancel(&ticket).await.unwrap(), CancelOutcome::NotQueued);

        let ticket = waiting(&f, 1, conn).await;
        f.matchmaker
            .join(&player(2), tier(), ConnectionId::new())
            .await
            .unwrap();

        let CancelOutcome::AlreadyClaimed(handle) = f.matchmaker.cancel(&ticket).await.unwrap() else {
            panic!("a landed claim must be honoured");
        };
        assert_eq!(handle.opponent.id, 2);
        assert_eq!(queued(&f).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_expires_and_removes_entry() {
        let f = fixture();
        let ticket = waiting(&f, 1, ConnectionId::new()).await;

        let started = Instant::now();
        let err = f.matchmaker.await_claim(&ticket).await.unwrap_err();

        assert!(matches!(err, QueueError::SearchTimeout(_)));
        assert!(started.elapsed() >= EngineConfig::default().search_timeout);
        assert_eq!(queued(&f).await, 0);
    }

    #[tokio::test]
    async fn test_rejoin_replaces_stale_entry() {
        let f = fixture();
        waiting(&f, 1, ConnectionId::new()).await;

        let ticket = waiting(&f, 1, ConnectionId::new()).await;

        assert_eq!(ticket.player.id, 1);
        assert_eq!(queued(&f).await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_while_waiting_loses_entry() {
        let f = fixture();
        let conn = ConnectionId::new();
        let ticket = waiting(&f, 1, conn).await;

        f.store.disconnect(conn);

        let err = f.matchmaker.await_claim(&ticket).await.unwrap_err();
        assert!(matches!(err, QueueError::EntryLost(_)));
    }
}
