//! Match coordinator: the per-match state machine both peers drive.
//!
//! There is no authority process. Each peer calls into its own coordinator,
//! and every session write is a compare-and-set that re-runs the pure
//! transition from `models` against the document as it is at commit time.
//! A writer holding a stale copy therefore aborts instead of clobbering.

use super::{
    errors::{SessionError, SessionResult},
    models::{
        MatchSession, Phase, Presence, TerminalReason, abort_match, advance_phase, apply_departure,
        apply_move, apply_timeout, validate_move,
    },
};
use crate::config::{EngineConfig, Tier};
use crate::engine::{GameBoard, IllegalMove, MovePayload};
use crate::settlement::{ArmOutcome, MatchOutcome, SettleOutcome, SettlementEngine, SettlementError};
use crate::store::{
    CleanupAction, ConnectionId, DocDecision, DocSubscription, StateStore,
    doc::{read_doc, transact_doc, write_doc},
    keys,
};
use crate::types::{MatchId, PlayerId, PlayerProfile};
use crate::{logging, metrics};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;

/// Drives match sessions through their phases
pub struct MatchCoordinator {
    store: Arc<dyn StateStore>,
    settlement: Arc<SettlementEngine>,
    config: EngineConfig,
}

impl MatchCoordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        settlement: Arc<SettlementEngine>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            settlement,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn settlement(&self) -> &Arc<SettlementEngine> {
        &self.settlement
    }

    /// Write a fresh session in `Matched`. Called by the claimant right after
    /// its claim commits; a second call returns the existing session.
    pub async fn create(
        &self,
        match_id: MatchId,
        tier: Tier,
        host: &PlayerProfile,
        joiner: &PlayerProfile,
    ) -> SessionResult<MatchSession> {
        let board = GameBoard::new(tier.game, &mut rand::rng());
        let session = MatchSession::new(
            match_id,
            tier,
            host,
            joiner,
            board,
            self.config.lives,
            Utc::now(),
        );

        let outcome = transact_doc(
            self.store.as_ref(),
            &keys::session(match_id),
            |current: Option<MatchSession>| match current {
                None => DocDecision::Write(session.clone()),
                Some(_) => DocDecision::Abort,
            },
        )
        .await?;

        if outcome.is_committed() {
            metrics::match_created(tier.game);
            logging::log_phase_transition(match_id, Phase::Queued, Phase::Matched);
            log::info!(
                "Match {}: {} (host) vs {} (joiner) at tier {}",
                match_id,
                host.id,
                joiner.id,
                tier
            );
        }

        outcome.into_doc().ok_or(SessionError::NotFound(match_id))
    }

    pub async fn session(&self, match_id: MatchId) -> SessionResult<MatchSession> {
        read_doc(self.store.as_ref(), &keys::session(match_id))
            .await?
            .ok_or(SessionError::NotFound(match_id))
    }

    pub async fn watch(&self, match_id: MatchId) -> SessionResult<DocSubscription<MatchSession>> {
        Ok(DocSubscription::open(self.store.as_ref(), &keys::session(match_id)).await?)
    }

    pub async fn watch_presence(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
    ) -> SessionResult<DocSubscription<Presence>> {
        Ok(DocSubscription::open(self.store.as_ref(), &keys::presence(match_id, player_id)).await?)
    }

    /// Join a match as one of its players: wait for the session document,
    /// then publish presence that vanishes with the connection.
    ///
    /// # Errors
    ///
    /// * `SessionError::NeverCreated` - No session within splash + countdown
    /// * `SessionError::NotAParticipant` - Player is not seated in the match
    pub async fn attach(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        connection: ConnectionId,
    ) -> SessionResult<MatchSession> {
        let session = self.await_session(match_id).await?;
        if session.seat_of(player_id).is_none() {
            return Err(SessionError::NotAParticipant {
                match_id,
                player_id,
            });
        }

        let key = keys::presence(match_id, player_id);
        let presence = Presence {
            player_id,
            since: Utc::now(),
        };
        write_doc(self.store.as_ref(), &key, &presence).await?;
        self.store
            .on_disconnect(connection, &key, CleanupAction::Delete)
            .await?;

        log::debug!("Match {}: player {} attached", match_id, player_id);
        Ok(session)
    }

    /// Withdraw presence after the match is over
    pub async fn detach(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        connection: ConnectionId,
    ) -> SessionResult<()> {
        let key = keys::presence(match_id, player_id);
        self.store.cancel_on_disconnect(connection, &key).await?;
        self.store.delete(&key).await?;
        Ok(())
    }

    async fn await_session(&self, match_id: MatchId) -> SessionResult<MatchSession> {
        let mut sub =
            DocSubscription::<MatchSession>::open(self.store.as_ref(), &keys::session(match_id))
                .await?;
        let deadline = Instant::now() + self.config.splash + self.config.countdown;

        if let Some(session) = sub.current()? {
            return Ok(session);
        }
        loop {
            match tokio::time::timeout_at(deadline, sub.changed()).await {
                Ok(Ok(Some(session))) => return Ok(session),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(SessionError::NeverCreated(match_id)),
            }
        }
    }

    /// Splash over: `Matched` → `Arming`
    pub async fn begin_arming(&self, match_id: MatchId) -> SessionResult<MatchSession> {
        let now = Utc::now();
        let (session, committed) = self
            .update(match_id, |s| {
                advance_phase(s, Phase::Matched, Phase::Arming, now)
            })
            .await?;
        if committed {
            logging::log_phase_transition(match_id, Phase::Matched, Phase::Arming);
        }
        Ok(session)
    }

    /// Countdown over: take both stakes, then `Arming` → `Active`.
    ///
    /// The phase never reaches `Active` without escrow. A player who cannot
    /// cover the fee, or a ledger that keeps failing past the retry limit,
    /// aborts the match instead. On an aborted match this retries the
    /// refund of any stakes still held.
    pub async fn arm(&self, match_id: MatchId) -> SessionResult<MatchSession> {
        let session = self.session(match_id).await?;
        match session.phase {
            Phase::Arming => {}
            Phase::Aborted => {
                self.settle(match_id).await?;
                return Ok(session);
            }
            _ => return Ok(session),
        }

        let mut attempt = 1;
        loop {
            match self.settlement.arm(&session).await {
                Ok(ArmOutcome::Armed(_) | ArmOutcome::AlreadyArmed(_)) => break,
                Ok(ArmOutcome::InFlight) => {
                    log::debug!("Match {}: escrow in flight on the other peer", match_id);
                    return self.session(match_id).await;
                }
                Err(SettlementError::InsufficientFunds { player_id, .. }) => {
                    log::warn!(
                        "Match {}: player {} cannot cover the stake, aborting",
                        match_id,
                        player_id
                    );
                    return self.abort(match_id, TerminalReason::ArmFailed).await;
                }
                Err(e) if e.needs_retry() && attempt < self.config.arm_retry_limit => {
                    log::warn!(
                        "Match {}: escrow attempt {} failed, retrying: {}",
                        match_id,
                        attempt,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.arm_retry_delay).await;
                }
                Err(e) => {
                    log::error!(
                        "Match {}: escrow failed after {} attempts, aborting: {}",
                        match_id,
                        attempt,
                        e
                    );
                    return self.abort(match_id, TerminalReason::ArmFailed).await;
                }
            }
        }

        let now = Utc::now();
        let (session, committed) = self
            .update(match_id, |s| advance_phase(s, Phase::Arming, Phase::Active, now))
            .await?;

        if committed {
            logging::log_phase_transition(match_id, Phase::Arming, Phase::Active);
            log::info!("Match {}: escrow armed, play begins", match_id);
        } else if session.phase == Phase::Aborted {
            // Aborted while the stakes were being taken
            self.settle(match_id).await?;
        }
        Ok(session)
    }

    /// Abort a match that has not started play. Stakes already taken are
    /// returned.
    pub async fn abort(
        &self,
        match_id: MatchId,
        reason: TerminalReason,
    ) -> SessionResult<MatchSession> {
        let now = Utc::now();
        let before = self.session(match_id).await?.phase;
        let (session, committed) = self
            .update(match_id, |s| abort_match(s, reason, now))
            .await?;

        if committed {
            logging::log_phase_transition(match_id, before, Phase::Aborted);
            log::info!("Match {}: aborted ({})", match_id, reason);
        }
        if session.phase == Phase::Aborted {
            self.settle(match_id).await?;
        }
        Ok(session)
    }

    /// Play a move for `player_id`.
    ///
    /// The move is checked against the local copy first; an illegal move
    /// never reaches the store. The write re-applies it to the current
    /// document, so a move that lost a race is rejected the same way.
    pub async fn submit_move(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        payload: MovePayload,
    ) -> SessionResult<MatchSession> {
        let session = self.session(match_id).await?;
        if let Err(e) = validate_move(&session, player_id, &payload) {
            metrics::illegal_move();
            log::debug!("Match {}: rejected move from {}: {}", match_id, player_id, e);
            return Err(e.into());
        }

        let now = Utc::now();
        let (next, committed) = self
            .update(match_id, |s| apply_move(s, player_id, &payload, now).ok())
            .await?;

        if !committed {
            metrics::illegal_move();
            let err = validate_move(&next, player_id, &payload)
                .err()
                .unwrap_or(IllegalMove::NotYourTurn);
            return Err(err.into());
        }

        if next.phase == Phase::Settling {
            logging::log_phase_transition(match_id, Phase::Active, Phase::Settling);
            log::info!(
                "Match {}: decided by move, winner {:?}",
                match_id,
                next.winner
            );
        }
        Ok(next)
    }

    /// Enforce the turn clock on turn `expected_seq`.
    ///
    /// # Returns
    ///
    /// * `Some(MatchSession)` - The penalty was written
    /// * `None` - The turn had already moved on; nothing written
    pub async fn timeout_turn(
        &self,
        match_id: MatchId,
        expected_seq: u32,
    ) -> SessionResult<Option<MatchSession>> {
        let now = Utc::now();
        let (session, committed) = self
            .update(match_id, |s| apply_timeout(s, expected_seq, now))
            .await?;
        if !committed {
            return Ok(None);
        }

        metrics::turn_timeout();
        log::info!(
            "Match {}: turn {} timed out, lives now {:?}",
            match_id,
            expected_seq,
            session.lives
        );
        if session.phase == Phase::Settling {
            logging::log_phase_transition(match_id, Phase::Active, Phase::Settling);
        }
        Ok(Some(session))
    }

    /// Explicit leave. In play this forfeits to the opponent.
    pub async fn leave(&self, match_id: MatchId, player_id: PlayerId) -> SessionResult<MatchSession> {
        self.depart(match_id, player_id, TerminalReason::Left).await
    }

    /// The opponent's presence vanished
    pub async fn claim_abandonment(
        &self,
        match_id: MatchId,
        absent_player: PlayerId,
    ) -> SessionResult<MatchSession> {
        self.depart(match_id, absent_player, TerminalReason::Abandoned)
            .await
    }

    async fn depart(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        reason: TerminalReason,
    ) -> SessionResult<MatchSession> {
        let now = Utc::now();
        let before = self.session(match_id).await?.phase;
        let (session, committed) = self
            .update(match_id, |s| apply_departure(s, player_id, reason, now))
            .await?;

        if session.seat_of(player_id).is_none() {
            return Err(SessionError::NotAParticipant {
                match_id,
                player_id,
            });
        }

        if committed {
            logging::log_phase_transition(match_id, before, session.phase);
            log::info!("Match {}: player {} {}", match_id, player_id, reason);
            if session.phase == Phase::Aborted {
                self.settle(match_id).await?;
            }
        }
        Ok(session)
    }

    /// Settle a decided or aborted match and close it. Both peers call this;
    /// the second call is a silent no-op.
    pub async fn settle(&self, match_id: MatchId) -> SessionResult<SettleOutcome> {
        let session = self.session(match_id).await?;
        let outcome = match session.phase {
            Phase::Aborted => MatchOutcome::Void,
            Phase::Settling | Phase::Closed => match session.winner {
                Some(winner) => MatchOutcome::Win { winner },
                None if session.is_draw() => MatchOutcome::Draw,
                None => return Err(SettlementError::Undecided(match_id).into()),
            },
            phase => return Err(SessionError::InvalidPhase { match_id, phase }),
        };

        let settled = self.settlement.resolve(&session, outcome).await?;

        if session.phase == Phase::Settling && settled.is_final() {
            let now = Utc::now();
            let (_, committed) = self
                .update(match_id, |s| {
                    advance_phase(s, Phase::Settling, Phase::Closed, now)
                })
                .await?;
            if committed {
                logging::log_phase_transition(match_id, Phase::Settling, Phase::Closed);
                log::info!("Match {}: closed, {}", match_id, outcome);
            }
        }
        Ok(settled)
    }

    /// Compare-and-set a transition on the session document.
    ///
    /// Returns the document after the attempt and whether it was written.
    async fn update<F>(&self, match_id: MatchId, transition: F) -> SessionResult<(MatchSession, bool)>
    where
        F: Fn(&MatchSession) -> Option<MatchSession> + Send + Sync,
    {
        let outcome = transact_doc(
            self.store.as_ref(),
            &keys::session(match_id),
            |current: Option<MatchSession>| match current.as_ref().and_then(&transition) {
                Some(next) => DocDecision::Write(next),
                None => DocDecision::Abort,
            },
        )
        .await?;

        let committed = outcome.is_committed();
        let session = outcome
            .into_doc()
            .ok_or(SessionError::NotFound(match_id))?;
        Ok((session, committed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GameKind;
    use crate::ledger::{AccountId, Balance, BalanceLedger, MemoryLedger};
    use crate::store::MemoryStore;
    use std::time::Duration;
    use uuid::Uuid;

    const ANN: PlayerId = 1;
    const BOB: PlayerId = 2;

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: Arc<MemoryLedger>,
        coordinator: MatchCoordinator,
    }

    fn fixture(ann: Balance, bob: Balance) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(
            MemoryLedger::new()
                .with_account(ANN, ann)
                .with_account(BOB, bob),
        );
        let config = EngineConfig {
            arm_retry_delay: Duration::from_millis(1),
            ..EngineConfig::default()
        };
        let settlement = Arc::new(SettlementEngine::new(
            store.clone(),
            ledger.clone(),
            config.settlement_lock_ttl,
        ));
        let coordinator = MatchCoordinator::new(store.clone(), settlement, config);
        Fixture {
            store,
            ledger,
            coordinator,
        }
    }

    async fn matched(f: &Fixture) -> MatchId {
        let match_id = Uuid::new_v4();
        f.coordinator
            .create(
                match_id,
                Tier::new(GameKind::Grid, 10, 18).unwrap(),
                &PlayerProfile::new(ANN, "ann"),
                &PlayerProfile::new(BOB, "bob"),
            )
            .await
            .unwrap();
        match_id
    }

    async fn active(f: &Fixture) -> MatchId {
        let match_id = matched(f).await;
        f.coordinator.begin_arming(match_id).await.unwrap();
        let session = f.coordinator.arm(match_id).await.unwrap();
        assert_eq!(session.phase, Phase::Active);
        match_id
    }

    async fn balance(f: &Fixture, player_id: PlayerId) -> Balance {
        f.ledger
            .read_balance(AccountId::Player(player_id))
            .await
            .unwrap()
    }

    async fn play(f: &Fixture, match_id: MatchId, moves: &[(PlayerId, usize)]) -> MatchSession {
        let mut last = None;
        for &(player, cell) in moves {
            last = Some(
                f.coordinator
                    .submit_move(match_id, player, MovePayload::Mark { cell })
                    .await
                    .unwrap(),
            );
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn test_create_twice_keeps_first_session() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = matched(&f).await;
        let first = f.coordinator.session(match_id).await.unwrap();

        let second = f
            .coordinator
            .create(
                match_id,
                Tier::new(GameKind::Card, 25, 45).unwrap(),
                &PlayerProfile::new(BOB, "bob"),
                &PlayerProfile::new(ANN, "ann"),
            )
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_full_match_pays_winner() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = active(&f).await;
        assert_eq!(balance(&f, ANN).await, Balance::new(10, 0));

        let decided = play(&f, match_id, &[(ANN, 0), (BOB, 3), (ANN, 1), (BOB, 4), (ANN, 2)]).await;
        assert_eq!(decided.phase, Phase::Settling);
        assert_eq!(decided.winner, Some(ANN));

        let first = f.coordinator.settle(match_id).await.unwrap();
        let second = f.coordinator.settle(match_id).await.unwrap();
        assert!(matches!(first, SettleOutcome::Applied(_)));
        assert!(matches!(second, SettleOutcome::AlreadySettled(_)));

        assert_eq!(f.coordinator.session(match_id).await.unwrap().phase, Phase::Closed);
        assert_eq!(balance(&f, ANN).await, Balance::new(10, 18));
        assert_eq!(balance(&f, BOB).await, Balance::new(10, 0));
        assert_eq!(f.ledger.total_supply(), 40);
    }

    #[tokio::test]
    async fn test_out_of_turn_move_writes_nothing() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = active(&f).await;
        let before = f.coordinator.session(match_id).await.unwrap();

        let err = f
            .coordinator
            .submit_move(match_id, BOB, MovePayload::Mark { cell: 4 })
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::IllegalMove(IllegalMove::NotYourTurn)));
        assert_eq!(f.coordinator.session(match_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_move_before_active_is_rejected() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = matched(&f).await;

        let err = f
            .coordinator
            .submit_move(match_id, ANN, MovePayload::Mark { cell: 0 })
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::IllegalMove(IllegalMove::NotActive)));
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_lives() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = active(&f).await;

        assert!(f.coordinator.timeout_turn(match_id, 7).await.unwrap().is_none());

        for seq in 0..4 {
            let session = f.coordinator.timeout_turn(match_id, seq).await.unwrap().unwrap();
            assert_eq!(session.phase, Phase::Active);
        }
        // A second enforcer on the same turn is a no-op
        assert!(f.coordinator.timeout_turn(match_id, 3).await.unwrap().is_none());

        let decided = f.coordinator.timeout_turn(match_id, 4).await.unwrap().unwrap();
        assert_eq!(decided.lives, [0, 1]);
        assert_eq!(decided.winner, Some(BOB));
        assert_eq!(decided.terminal_reason, Some(TerminalReason::Timeout));

        f.coordinator.settle(match_id).await.unwrap();
        assert_eq!(balance(&f, BOB).await, Balance::new(10, 18));
    }

    #[tokio::test]
    async fn test_leave_in_play_forfeits() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = active(&f).await;

        let session = f.coordinator.leave(match_id, ANN).await.unwrap();
        assert_eq!(session.winner, Some(BOB));
        assert_eq!(session.terminal_reason, Some(TerminalReason::Left));

        f.coordinator.settle(match_id).await.unwrap();
        assert_eq!(balance(&f, BOB).await, Balance::new(10, 18));
        assert_eq!(balance(&f, ANN).await, Balance::new(10, 0));
    }

    #[tokio::test]
    async fn test_leave_before_play_moves_no_money() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = matched(&f).await;

        let session = f.coordinator.leave(match_id, BOB).await.unwrap();

        assert_eq!(session.phase, Phase::Aborted);
        assert_eq!(session.winner, None);
        assert_eq!(balance(&f, ANN).await, Balance::new(20, 0));
        assert_eq!(balance(&f, BOB).await, Balance::new(20, 0));
    }

    #[tokio::test]
    async fn test_short_balance_at_arm_aborts() {
        let f = fixture(Balance::new(20, 0), Balance::new(6, 0));
        let match_id = matched(&f).await;
        f.coordinator.begin_arming(match_id).await.unwrap();

        let session = f.coordinator.arm(match_id).await.unwrap();

        assert_eq!(session.phase, Phase::Aborted);
        assert_eq!(session.terminal_reason, Some(TerminalReason::ArmFailed));
        assert_eq!(balance(&f, ANN).await, Balance::new(20, 0));
        assert_eq!(balance(&f, BOB).await, Balance::new(6, 0));
    }

    #[tokio::test]
    async fn test_arm_retries_transient_ledger_failures() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = matched(&f).await;
        f.coordinator.begin_arming(match_id).await.unwrap();
        f.ledger.fail_next_commits(2);

        let session = f.coordinator.arm(match_id).await.unwrap();

        assert_eq!(session.phase, Phase::Active);
        assert_eq!(balance(&f, ANN).await, Balance::new(10, 0));
    }

    #[tokio::test]
    async fn test_arm_gives_up_after_retry_limit() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = matched(&f).await;
        f.coordinator.begin_arming(match_id).await.unwrap();
        f.ledger.fail_next_commits(10);

        let session = f.coordinator.arm(match_id).await.unwrap();

        assert_eq!(session.phase, Phase::Aborted);
        assert_eq!(f.ledger.total_supply(), 40);
    }

    #[tokio::test]
    async fn test_abort_after_escrow_returns_stakes() {
        let f = fixture(Balance::new(20, 0), Balance::new(4, 20));
        let match_id = matched(&f).await;
        let session = f.coordinator.begin_arming(match_id).await.unwrap();
        f.coordinator.settlement().arm(&session).await.unwrap();
        assert_eq!(balance(&f, BOB).await, Balance::new(0, 14));

        f.coordinator
            .abort(match_id, TerminalReason::NoShow)
            .await
            .unwrap();

        assert_eq!(balance(&f, ANN).await, Balance::new(20, 0));
        assert_eq!(balance(&f, BOB).await, Balance::new(4, 20));
        // Arm after the abort finds nothing to do
        let session = f.coordinator.arm(match_id).await.unwrap();
        assert_eq!(session.phase, Phase::Aborted);
    }

    #[tokio::test]
    async fn test_failed_refund_is_retried_by_arm() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = matched(&f).await;
        let session = f.coordinator.begin_arming(match_id).await.unwrap();
        f.coordinator.settlement().arm(&session).await.unwrap();
        f.ledger.fail_next_commits(1);

        let err = f
            .coordinator
            .abort(match_id, TerminalReason::NoShow)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Settlement(SettlementError::LedgerWriteFailure { .. })
        ));
        assert_eq!(balance(&f, ANN).await, Balance::new(10, 0));

        // The countdown timer fires again on the aborted match
        let session = f.coordinator.arm(match_id).await.unwrap();

        assert_eq!(session.phase, Phase::Aborted);
        assert_eq!(balance(&f, ANN).await, Balance::new(20, 0));
        assert_eq!(balance(&f, BOB).await, Balance::new(20, 0));
        let record = f
            .coordinator
            .settlement()
            .record(match_id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.processed);
        assert_eq!(record.outcome, Some(MatchOutcome::Void));
        assert_eq!(f.ledger.total_supply(), 40);
    }

    #[tokio::test]
    async fn test_attach_publishes_presence_until_disconnect() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = matched(&f).await;
        let conn = ConnectionId::new();

        f.coordinator.attach(match_id, ANN, conn).await.unwrap();
        let sub = f.coordinator.watch_presence(match_id, ANN).await.unwrap();
        assert_eq!(sub.current().unwrap().map(|p| p.player_id), Some(ANN));

        f.store.disconnect(conn);
        assert!(sub.current().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attach_rejects_outsider() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));
        let match_id = matched(&f).await;

        let err = f
            .coordinator
            .attach(match_id, 99, ConnectionId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotAParticipant { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_gives_up_on_missing_session() {
        let f = fixture(Balance::new(20, 0), Balance::new(20, 0));

        let err = f
            .coordinator
            .attach(Uuid::new_v4(), ANN, ConnectionId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NeverCreated(_)));
    }
}
