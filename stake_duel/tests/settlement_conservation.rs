//! Money conservation across many concurrent matches.
//!
//! Every match is driven by both peers at once: both begin arming, both arm,
//! both settle. Whatever the interleaving, every stake must be taken once and
//! paid once, and the ledger's total must never move.

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use stake_duel::config::{EngineConfig, Tier};
use stake_duel::engine::{GameKind, Rules};
use stake_duel::ledger::{
    AccountId, Balance, BalanceLedger, LedgerBatch, LedgerEntry, LedgerResult, MemoryLedger,
    NewEntry,
};
use stake_duel::session::{MatchCoordinator, Phase, TerminalReason};
use stake_duel::settlement::{MatchOutcome, SettlementEngine};
use stake_duel::store::MemoryStore;
use stake_duel::types::{MatchId, PlayerProfile};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

const PAIRS: i64 = 12;
const OPENING: Balance = Balance::new(100, 0);

fn setup() -> (Arc<MemoryLedger>, Arc<MatchCoordinator>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    for player_id in 1..=PAIRS * 2 {
        ledger.open_account(player_id, OPENING);
    }
    let config = EngineConfig::default();
    let settlement = Arc::new(SettlementEngine::new(
        store.clone(),
        ledger.clone(),
        config.settlement_lock_ttl,
    ));
    let coordinator = Arc::new(MatchCoordinator::new(store, settlement, config));
    (ledger, coordinator)
}

/// Run one step from both peers concurrently
async fn both<F, Fut>(coordinator: &Arc<MatchCoordinator>, step: F)
where
    F: Fn(Arc<MatchCoordinator>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let first = tokio::spawn(step(coordinator.clone()));
    let second = tokio::spawn(step(coordinator.clone()));
    first.await.unwrap();
    second.await.unwrap();
}

/// Play a match to a finish with random legal moves and let both peers settle
async fn play_match(coordinator: Arc<MatchCoordinator>, match_id: MatchId, tier: Tier) {
    both(&coordinator, move |c| async move {
        let _ = c.begin_arming(match_id).await;
    })
    .await;
    both(&coordinator, move |c| async move {
        let _ = c.arm(match_id).await;
    })
    .await;

    let session = coordinator.session(match_id).await.unwrap();
    assert_eq!(session.phase, Phase::Active, "tier {tier}");

    let mut session = session;
    while session.phase == Phase::Active {
        let seat = session.turn_holder;
        let actor = session.player(seat).id;
        let payload = *session
            .board
            .legal_moves(seat)
            .choose(&mut rand::rng())
            .unwrap();
        session = coordinator
            .submit_move(match_id, actor, payload)
            .await
            .unwrap();
    }

    both(&coordinator, move |c| async move {
        let _ = c.settle(match_id).await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_matches_conserve_money() {
    let (ledger, coordinator) = setup();
    let opening_supply = ledger.total_supply();
    let tiers = [
        Tier::new(GameKind::Grid, 10, 18).unwrap(),
        Tier::new(GameKind::Card, 25, 45).unwrap(),
    ];

    let mut matches = Vec::new();
    for pair in 0..PAIRS {
        let tier = tiers[(pair % 2) as usize];
        let match_id = Uuid::new_v4();
        coordinator
            .create(
                match_id,
                tier,
                &PlayerProfile::new(pair * 2 + 1, format!("host{pair}")),
                &PlayerProfile::new(pair * 2 + 2, format!("joiner{pair}")),
            )
            .await
            .unwrap();
        matches.push(tokio::spawn(play_match(coordinator.clone(), match_id, tier)));
    }
    for task in matches {
        task.await.unwrap();
    }

    assert_eq!(ledger.total_supply(), opening_supply);

    let house = ledger.read_balance(AccountId::House).await.unwrap().total();
    let mut expected_house = 0;
    for pair in 0..PAIRS {
        let tier = tiers[(pair % 2) as usize];
        let host = ledger
            .read_balance(AccountId::Player(pair * 2 + 1))
            .await
            .unwrap();
        let joiner = ledger
            .read_balance(AccountId::Player(pair * 2 + 2))
            .await
            .unwrap();
        let net = host.total() + joiner.total() - 2 * OPENING.total();

        match net {
            // Win: the house keeps its edge
            n if n == -tier.house_edge() => expected_house += tier.house_edge(),
            // Draw: both fees refunded
            0 => {
                assert_eq!(host.total(), OPENING.total());
                assert_eq!(joiner.total(), OPENING.total());
            }
            other => panic!("pair {pair}: unexpected net {other} for tier {tier}"),
        }
    }
    assert_eq!(house, expected_house);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settle_pays_once() {
    let (ledger, coordinator) = setup();
    let match_id = Uuid::new_v4();
    let tier = Tier::new(GameKind::Grid, 10, 18).unwrap();
    coordinator
        .create(
            match_id,
            tier,
            &PlayerProfile::new(1, "ann"),
            &PlayerProfile::new(2, "bob"),
        )
        .await
        .unwrap();
    coordinator.begin_arming(match_id).await.unwrap();
    coordinator.arm(match_id).await.unwrap();
    coordinator.leave(match_id, 2).await.unwrap();

    let mut settlers = Vec::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        settlers.push(tokio::spawn(async move {
            coordinator.settle(match_id).await.unwrap()
        }));
    }
    for settler in settlers {
        settler.await.unwrap();
    }

    let session = coordinator.session(match_id).await.unwrap();
    assert_eq!(session.phase, Phase::Closed);
    assert_eq!(
        ledger.read_balance(AccountId::Player(1)).await.unwrap(),
        Balance::new(90, 18)
    );
    assert_eq!(
        ledger.read_balance(AccountId::Player(2)).await.unwrap(),
        Balance::new(90, 0)
    );
    assert_eq!(
        ledger.read_balance(AccountId::House).await.unwrap().total(),
        2
    );
}

/// Memory ledger that stalls after applying the escrow batch, before it
/// replies
struct StallingLedger {
    inner: MemoryLedger,
    applied: Notify,
    release: Notify,
}

#[async_trait]
impl BalanceLedger for StallingLedger {
    async fn read_balance(&self, account: AccountId) -> LedgerResult<Balance> {
        self.inner.read_balance(account).await
    }

    async fn adjust_balance(
        &self,
        account: AccountId,
        credit_delta: i64,
        winnings_delta: i64,
    ) -> LedgerResult<Balance> {
        self.inner
            .adjust_balance(account, credit_delta, winnings_delta)
            .await
    }

    async fn append_transaction(&self, entry: NewEntry) -> LedgerResult<i64> {
        self.inner.append_transaction(entry).await
    }

    async fn commit(&self, batch: &LedgerBatch) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self.inner.commit(batch).await?;
        if batch.idempotency_key.starts_with("arm:") {
            self.applied.notify_one();
            self.release.notified().await;
        }
        Ok(entries)
    }

    async fn batch_entries(&self, idempotency_key: &str) -> LedgerResult<Vec<LedgerEntry>> {
        self.inner.batch_entries(idempotency_key).await
    }

    async fn entries(&self, account: AccountId, limit: i64) -> LedgerResult<Vec<LedgerEntry>> {
        self.inner.entries(account, limit).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_during_escrow_returns_both_stakes() {
    let ledger = Arc::new(StallingLedger {
        inner: MemoryLedger::new()
            .with_account(1, OPENING)
            .with_account(2, OPENING),
        applied: Notify::new(),
        release: Notify::new(),
    });
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig::default();
    let settlement = Arc::new(SettlementEngine::new(
        store.clone(),
        ledger.clone(),
        config.settlement_lock_ttl,
    ));
    let coordinator = Arc::new(MatchCoordinator::new(store, settlement, config));

    let match_id = Uuid::new_v4();
    coordinator
        .create(
            match_id,
            Tier::new(GameKind::Grid, 10, 18).unwrap(),
            &PlayerProfile::new(1, "ann"),
            &PlayerProfile::new(2, "bob"),
        )
        .await
        .unwrap();
    coordinator.begin_arming(match_id).await.unwrap();

    let arming = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.arm(match_id).await }
    });
    ledger.applied.notified().await;

    // The other peer gives up on the countdown while the stakes are in flight
    let aborted = coordinator
        .abort(match_id, TerminalReason::NoShow)
        .await
        .unwrap();
    assert_eq!(aborted.phase, Phase::Aborted);

    ledger.release.notify_one();
    let session = arming.await.unwrap().unwrap();
    assert_eq!(session.phase, Phase::Aborted);

    for player_id in [1, 2] {
        assert_eq!(
            ledger.read_balance(AccountId::Player(player_id)).await.unwrap(),
            OPENING
        );
    }
    assert_eq!(ledger.read_balance(AccountId::House).await.unwrap().total(), 0);
    assert_eq!(ledger.inner.total_supply(), 2 * OPENING.total());

    let record = coordinator
        .settlement()
        .record(match_id)
        .await
        .unwrap()
        .unwrap();
    assert!(record.processed);
    assert!(record.lock.is_none());
    assert_eq!(record.outcome, Some(MatchOutcome::Void));
}
