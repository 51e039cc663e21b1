//! Simulation driver: bot players, shared backend and the run report.

use anyhow::{Context, Error, anyhow, bail};
use rand::{Rng, seq::IndexedRandom};
use stake_duel::{
    client::{ClientResponse, ClientView, PlayerActor, PlayerHandle},
    config::{EngineConfig, Tier},
    db::{Database, DatabaseConfig},
    engine::{MovePayload, Rules},
    ledger::{AccountId, Balance, BalanceLedger, MemoryLedger, PgLedger},
    queue::Matchmaker,
    session::{MatchCoordinator, Phase},
    settlement::SettlementEngine,
    store::{ConnectionId, MemoryStore},
    types::{PlayerId, PlayerProfile},
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

enum LedgerBackend {
    Memory(Arc<MemoryLedger>),
    Postgres(Arc<PgLedger>),
}

/// Store, ledger and the shared services both bots talk to
pub struct Backend {
    ledger: LedgerBackend,
    coordinator: Arc<MatchCoordinator>,
    matchmaker: Arc<Matchmaker>,
}

impl Backend {
    /// Build the services, on Postgres when a URL is given
    pub async fn connect(database_url: Option<&str>, config: EngineConfig) -> Result<Self, Error> {
        let ledger = match database_url {
            Some(url) => {
                log::info!("Using Postgres ledger");
                let db = Database::new(&DatabaseConfig::with_url(url))
                    .await
                    .context("Failed to connect to database")?;
                db.migrate().await.context("Failed to apply ledger schema")?;
                LedgerBackend::Postgres(Arc::new(PgLedger::new(Arc::new(db.pool().clone()))))
            }
            None => {
                log::info!("Using in-memory ledger");
                LedgerBackend::Memory(Arc::new(MemoryLedger::new()))
            }
        };

        let shared: Arc<dyn BalanceLedger> = match &ledger {
            LedgerBackend::Memory(l) => l.clone(),
            LedgerBackend::Postgres(l) => l.clone(),
        };
        let store = Arc::new(MemoryStore::new());
        let settlement = Arc::new(SettlementEngine::new(
            store.clone(),
            shared.clone(),
            config.settlement_lock_ttl,
        ));
        let coordinator = Arc::new(MatchCoordinator::new(store.clone(), settlement, config));
        let matchmaker = Arc::new(Matchmaker::new(store, shared, coordinator.clone()));

        Ok(Self {
            ledger,
            coordinator,
            matchmaker,
        })
    }

    fn ledger(&self) -> &dyn BalanceLedger {
        match &self.ledger {
            LedgerBackend::Memory(l) => l.as_ref(),
            LedgerBackend::Postgres(l) => l.as_ref(),
        }
    }

    async fn fund(&self, player_id: PlayerId, opening: Balance) -> Result<(), Error> {
        match &self.ledger {
            LedgerBackend::Memory(l) => l.open_account(player_id, opening),
            LedgerBackend::Postgres(l) => {
                if !l.open_account(AccountId::Player(player_id), opening).await? {
                    bail!("Account for player {player_id} already exists");
                }
            }
        }
        Ok(())
    }

    async fn total(&self, accounts: &[AccountId]) -> Result<i64, Error> {
        let mut total = 0;
        for account in accounts {
            total += self.ledger().read_balance(*account).await?.total();
        }
        Ok(total)
    }

    fn spawn_bot(&self, player_id: PlayerId, name: &str) -> PlayerHandle {
        PlayerActor::spawn(
            PlayerProfile::new(player_id, name),
            ConnectionId::new(),
            self.matchmaker.clone(),
            self.coordinator.clone(),
        )
    }
}

/// How one match ended, from the first bot's side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub winner: Option<PlayerId>,
    pub phase: Phase,
    pub moves: usize,
    pub notice: String,
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub tier: Tier,
    pub players: [PlayerId; 2],
    pub results: Vec<MatchResult>,
    /// Closing balance per player
    pub balances: [Balance; 2],
    pub total_before: i64,
    pub total_after: i64,
    pub house_before: i64,
    pub house_after: i64,
}

impl Report {
    /// Players and house together hold what they held at the start
    pub fn is_conserved(&self) -> bool {
        self.drift() == 0
    }

    pub fn drift(&self) -> i64 {
        self.total_after - self.total_before
    }

    pub fn house_delta(&self) -> i64 {
        self.house_after - self.house_before
    }

    fn wins(&self, player_id: PlayerId) -> usize {
        self.results
            .iter()
            .filter(|r| r.winner == Some(player_id))
            .count()
    }

    fn count_phase(&self, phase: Phase) -> usize {
        self.results.iter().filter(|r| r.phase == phase).count()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [first, second] = self.players;
        let decided = self.results.iter().filter(|r| r.winner.is_some()).count();
        let draws = self.count_phase(Phase::Closed).saturating_sub(decided);

        writeln!(f, "Tier {}: {} match(es)", self.tier, self.results.len())?;
        for (player_id, balance) in [(first, self.balances[0]), (second, self.balances[1])] {
            writeln!(
                f,
                "  player {player_id}: {} wins, balance {} credit / {} winnings",
                self.wins(player_id),
                balance.credit,
                balance.winnings
            )?;
        }
        writeln!(f, "  draws: {draws}")?;
        writeln!(f, "  cancelled: {}", self.count_phase(Phase::Aborted))?;
        writeln!(
            f,
            "  house: {} -> {} ({:+})",
            self.house_before,
            self.house_after,
            self.house_delta()
        )?;
        write!(
            f,
            "  total: {} -> {} ({})",
            self.total_before,
            self.total_after,
            if self.is_conserved() { "conserved" } else { "DRIFTED" }
        )
    }
}

/// Play `matches` matches between two fresh bots
///
/// # Errors
///
/// Returns error if funding fails or a bot cannot queue
pub async fn run(
    backend: &Backend,
    tier: Tier,
    matches: usize,
    leave_rate: f64,
) -> Result<Report, Error> {
    // Ids are random so repeated runs against one database do not collide
    let base: PlayerId = rand::rng().random_range(1_000_000..1_000_000_000) * 2;
    let players = [base, base + 1];
    let opening = Balance::new(tier.entry_fee * matches.max(1) as i64, 0);
    for player_id in players {
        backend.fund(player_id, opening).await?;
    }

    let accounts = [
        AccountId::Player(players[0]),
        AccountId::Player(players[1]),
        AccountId::House,
    ];
    let total_before = backend.total(&accounts).await?;
    let house_before = backend.total(&[AccountId::House]).await?;

    let host = backend.spawn_bot(players[0], "bot-a");
    let joiner = backend.spawn_bot(players[1], "bot-b");
    let game = tier.game.to_string();

    let mut results = Vec::with_capacity(matches);
    for index in 0..matches {
        let started = Instant::now();

        match host.join_queue(tier).await {
            ClientResponse::Waiting | ClientResponse::Matched { .. } => {}
            other => bail!("Bot {} could not queue: {:?}", players[0], other),
        }
        let response = joiner.join_queue(tier).await;
        if !response.is_success() {
            bail!(
                "Bot {} could not queue: {}",
                players[1],
                response.error_message().unwrap_or_default()
            );
        }

        let (first, _) = tokio::try_join!(
            play_bot(&host, leave_rate),
            play_bot(&joiner, leave_rate)
        )?;

        let session = first
            .session
            .ok_or_else(|| anyhow!("Match {index} ended without a session"))?;
        let result = MatchResult {
            winner: session.winner,
            phase: session.phase,
            moves: session.moves.len(),
            notice: first.notice.unwrap_or_default(),
        };

        let elapsed = started.elapsed();
        crate::logging::log_match_result(index, &result.notice, result.moves, elapsed.as_millis());
        crate::metrics::match_finished(&game, result.moves, elapsed.as_secs_f64() * 1000.0);
        results.push(result);
    }

    let _ = host.shutdown().await;
    let _ = joiner.shutdown().await;

    let mut balances = [Balance::default(); 2];
    for (slot, player_id) in balances.iter_mut().zip(players) {
        *slot = backend
            .ledger()
            .read_balance(AccountId::Player(player_id))
            .await?;
    }

    Ok(Report {
        tier,
        players,
        results,
        balances,
        total_before,
        total_after: backend.total(&accounts).await?,
        house_before,
        house_after: backend.total(&[AccountId::House]).await?,
    })
}

/// Drive one bot until its match is over, answering every turn with a
/// random legal move
async fn play_bot(handle: &PlayerHandle, leave_rate: f64) -> Result<ClientView, Error> {
    let mut views = handle.subscribe();

    loop {
        let view = views.borrow_and_update().clone();
        if view.is_idle() && view.notice.is_some() {
            return Ok(view);
        }

        if view.is_my_turn()
            && let Some(action) = choose_action(&view, leave_rate)
        {
            let response = match action {
                Some(payload) => handle.submit_move(payload).await,
                None => {
                    crate::metrics::bot_left();
                    handle.leave_match().await
                }
            };
            if let Some(reason) = response.error_message() {
                log::debug!("Bot {}: {}", handle.player_id(), reason);
            }
            continue;
        }

        if views.changed().await.is_err() {
            bail!("Bot {} stopped mid-match", handle.player_id());
        }
    }
}

/// `Some(Some(move))` to play, `Some(None)` to quit, `None` if there is
/// nothing to do
fn choose_action(view: &ClientView, leave_rate: f64) -> Option<Option<MovePayload>> {
    let session = view.session.as_ref()?;
    let seat = session.seat_of(view.player_id)?;
    let mut rng = rand::rng();

    if leave_rate > 0.0 && rng.random_bool(leave_rate) {
        return Some(None);
    }
    let moves = session.board.legal_moves(seat);
    moves.choose(&mut rng).copied().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stake_duel::engine::GameKind;
    use std::time::Duration;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            splash: Duration::from_millis(10),
            countdown: Duration::from_millis(10),
            ..EngineConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_grid_run_conserves_money() {
        let backend = Backend::connect(None, fast_config()).await.unwrap();
        let tier = Tier::new(GameKind::Grid, 10, 18).unwrap();

        let report = run(&backend, tier, 3, 0.0).await.unwrap();

        assert_eq!(report.results.len(), 3);
        assert!(report.is_conserved(), "{report}");
        assert!(report.results.iter().all(|r| r.phase == Phase::Closed));

        let decided = report.results.iter().filter(|r| r.winner.is_some()).count() as i64;
        assert_eq!(report.house_delta(), decided * tier.house_edge());
    }

    #[tokio::test(start_paused = true)]
    async fn test_card_run_with_quitting_bots() {
        let backend = Backend::connect(None, fast_config()).await.unwrap();
        let tier = Tier::new(GameKind::Card, 25, 45).unwrap();

        let report = run(&backend, tier, 2, 1.0).await.unwrap();

        // The host quits on its first turn every time
        assert!(report.is_conserved(), "{report}");
        assert!(
            report
                .results
                .iter()
                .all(|r| r.winner == Some(report.players[1]))
        );
        assert_eq!(report.house_delta(), 2 * tier.house_edge());
    }

    #[test]
    fn test_report_flags_drift() {
        let report = Report {
            tier: Tier::new(GameKind::Grid, 10, 18).unwrap(),
            players: [1, 2],
            results: Vec::new(),
            balances: [Balance::new(10, 18), Balance::new(10, 0)],
            total_before: 40,
            total_after: 38,
            house_before: 0,
            house_after: 2,
        };

        assert!(!report.is_conserved());
        assert_eq!(report.drift(), -2);
        let printed = report.to_string();
        assert!(printed.contains("DRIFTED"));
        assert!(printed.contains("player 1: 0 wins, balance 10 credit / 18 winnings"));
    }
}
