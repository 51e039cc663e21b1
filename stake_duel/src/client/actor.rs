//! Player client actor: one event loop per player.
//!
//! The actor is the only place where a player's timers live. It reacts to UI
//! commands from its inbox and to change notifications on the shared keys it
//! cares about (its own queue entry, the match document, the opponent's
//! presence), and fires the splash, countdown, turn and settlement timers.

use super::messages::{ClientMessage, ClientResponse, ClientStatus, ClientView};
use crate::config::{EngineConfig, Tier};
use crate::engine::MovePayload;
use crate::queue::{CancelOutcome, JoinOutcome, MatchHandle, Matchmaker, QueueEntry, QueueError, SearchTicket};
use crate::session::{
    MatchCoordinator, MatchSession, Phase, Presence, SessionError, TerminalReason,
};
use crate::store::{ConnectionId, DocSubscription, StoreResult};
use crate::types::{PlayerId, PlayerProfile};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// Player client handle for sending messages
#[derive(Clone)]
pub struct PlayerHandle {
    sender: mpsc::Sender<ClientMessage>,
    view: watch::Receiver<ClientView>,
    player_id: PlayerId,
}

impl PlayerHandle {
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<ClientResponse>) -> ClientMessage,
    ) -> ClientResponse {
        let (response, reply) = oneshot::channel();
        if self.sender.send(build(response)).await.is_err() {
            return ClientResponse::Error("Client is closed".to_string());
        }
        reply
            .await
            .unwrap_or_else(|_| ClientResponse::Error("Client is closed".to_string()))
    }

    pub async fn join_queue(&self, tier: Tier) -> ClientResponse {
        self.request(|response| ClientMessage::JoinQueue { tier, response })
            .await
    }

    pub async fn cancel_queue(&self) -> ClientResponse {
        self.request(|response| ClientMessage::CancelQueue { response })
            .await
    }

    pub async fn submit_move(&self, payload: MovePayload) -> ClientResponse {
        self.request(|response| ClientMessage::SubmitMove { payload, response })
            .await
    }

    pub async fn leave_match(&self) -> ClientResponse {
        self.request(|response| ClientMessage::LeaveMatch { response })
            .await
    }

    pub async fn shutdown(&self) -> ClientResponse {
        self.request(|response| ClientMessage::Shutdown { response })
            .await
    }

    /// View as seen by the actor right now
    pub async fn get_view(&self) -> Option<ClientView> {
        let (response, reply) = oneshot::channel();
        self.sender
            .send(ClientMessage::GetView { response })
            .await
            .ok()?;
        reply.await.ok()
    }

    /// Latest published view, without a round trip
    pub fn view(&self) -> ClientView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientView> {
        self.view.clone()
    }

    /// Wait until the published view satisfies `predicate`. `None` once the
    /// actor has stopped.
    pub async fn wait_for<F>(&self, predicate: F) -> Option<ClientView>
    where
        F: FnMut(&ClientView) -> bool,
    {
        let mut view = self.view.clone();
        let seen = view.wait_for(predicate).await.ok()?;
        Some(seen.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    /// Splash over
    BeginArming,
    /// Countdown over
    Arm,
    /// Turn clock for this turn number ran out
    Turn { seq: u32 },
    Settle,
}

impl Timer {
    /// The work is still outstanding while the match sits in `phase`
    fn waits_in(self, phase: Phase) -> bool {
        match self {
            Timer::BeginArming => phase == Phase::Matched,
            Timer::Arm => phase == Phase::Arming,
            Timer::Turn { .. } => phase == Phase::Active,
            Timer::Settle => matches!(phase, Phase::Settling | Phase::Aborted),
        }
    }
}

/// Local bookkeeping for the match in progress
struct MatchState {
    handle: MatchHandle,
    session: MatchSession,
    /// Opponent presence observed at least once
    opponent_seen: bool,
    /// Stakes of an aborted match confirmed returned, or never taken
    settled: bool,
    phase_since: Instant,
    turn_since: Instant,
    timer: Option<(Instant, Timer)>,
}

impl MatchState {
    fn is_done(&self) -> bool {
        match self.session.phase {
            Phase::Closed => true,
            Phase::Aborted => self.settled,
            _ => false,
        }
    }
}

/// Player client actor
pub struct PlayerActor {
    player: PlayerProfile,
    connection: ConnectionId,
    config: EngineConfig,
    matchmaker: Arc<Matchmaker>,
    coordinator: Arc<MatchCoordinator>,

    /// Message inbox
    inbox: mpsc::Receiver<ClientMessage>,

    /// Published view
    view: watch::Sender<ClientView>,

    search: Option<SearchTicket>,
    queue_updates: Option<DocSubscription<QueueEntry>>,

    current: Option<MatchState>,
    match_updates: Option<DocSubscription<MatchSession>>,
    opponent_presence: Option<DocSubscription<Presence>>,

    is_closed: bool,
}

impl PlayerActor {
    /// Create a new player actor
    ///
    /// # Arguments
    ///
    /// * `player` - Who this client plays as
    /// * `connection` - Connection scoping the client's disconnect hooks
    /// * `matchmaker` - Shared matchmaking service
    /// * `coordinator` - Shared match coordinator
    ///
    /// # Returns
    ///
    /// * `(PlayerActor, PlayerHandle)` - Actor and handle for sending messages
    pub fn new(
        player: PlayerProfile,
        connection: ConnectionId,
        matchmaker: Arc<Matchmaker>,
        coordinator: Arc<MatchCoordinator>,
    ) -> (Self, PlayerHandle) {
        let (sender, inbox) = mpsc::channel(32);
        let (view, view_rx) = watch::channel(ClientView::new(player.id));
        let config = coordinator.config().clone();

        let handle = PlayerHandle {
            sender,
            view: view_rx,
            player_id: player.id,
        };

        let actor = Self {
            player,
            connection,
            config,
            matchmaker,
            coordinator,
            inbox,
            view,
            search: None,
            queue_updates: None,
            current: None,
            match_updates: None,
            opponent_presence: None,
            is_closed: false,
        };

        (actor, handle)
    }

    /// Create the actor and run it on the tokio runtime
    pub fn spawn(
        player: PlayerProfile,
        connection: ConnectionId,
        matchmaker: Arc<Matchmaker>,
        coordinator: Arc<MatchCoordinator>,
    ) -> PlayerHandle {
        let (actor, handle) = Self::new(player, connection, matchmaker, coordinator);
        tokio::spawn(actor.run());
        handle
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        log::info!("Player {} client starting", self.player.id);

        loop {
            let search_deadline = self.search.as_ref().map(|ticket| ticket.deadline);
            let timer = self.current.as_ref().and_then(|m| m.timer);

            tokio::select! {
                // Handle incoming messages
                message = self.inbox.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },

                entry = next_change(self.queue_updates.as_mut()) => {
                    self.on_queue_change(entry).await;
                }

                () = wait_until(search_deadline) => {
                    self.on_search_expired().await;
                }

                update = next_change(self.match_updates.as_mut()) => {
                    self.on_session_change(update).await;
                }

                presence = next_change(self.opponent_presence.as_mut()) => {
                    self.on_presence_change(presence).await;
                }

                () = wait_until(timer.map(|(at, _)| at)) => {
                    if let Some((_, timer)) = timer {
                        self.on_timer(timer).await;
                    }
                }
            }

            if self.is_closed {
                break;
            }
        }

        log::info!("Player {} client stopped", self.player.id);
    }

    async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::JoinQueue { tier, response } => {
                let result = self.handle_join(tier).await;
                let _ = response.send(result);
            }

            ClientMessage::CancelQueue { response } => {
                let result = self.handle_cancel().await;
                let _ = response.send(result);
            }

            ClientMessage::SubmitMove { payload, response } => {
                let result = self.handle_move(payload).await;
                let _ = response.send(result);
            }

            ClientMessage::LeaveMatch { response } => {
                let result = self.handle_leave().await;
                let _ = response.send(result);
            }

            ClientMessage::GetView { response } => {
                let _ = response.send(self.view.borrow().clone());
            }

            ClientMessage::Shutdown { response } => {
                let result = self.handle_shutdown().await;
                self.is_closed = true;
                let _ = response.send(result);
            }
        }
    }

    async fn handle_join(&mut self, tier: Tier) -> ClientResponse {
        if self.search.is_some() || self.current.is_some() {
            return ClientResponse::Error("Already searching or in a match".to_string());
        }

        let ticket = match self
            .matchmaker
            .join(&self.player, tier, self.connection)
            .await
        {
            Ok(JoinOutcome::Matched(handle)) => return self.enter_match(handle).await,
            Ok(JoinOutcome::Waiting(ticket)) => ticket,
            Err(QueueError::InsufficientFunds {
                available,
                required,
                ..
            }) => {
                return ClientResponse::InsufficientFunds {
                    required,
                    available,
                };
            }
            Err(e) => {
                log::warn!("Player {}: join failed: {}", self.player.id, e);
                return ClientResponse::Error(e.client_message());
            }
        };

        let sub = match self.matchmaker.watch_entry(&ticket).await {
            Ok(sub) => sub,
            Err(e) => {
                log::warn!("Player {}: cannot watch queue entry: {}", self.player.id, e);
                let _ = self.matchmaker.cancel(&ticket).await;
                return ClientResponse::Error(e.client_message());
            }
        };

        // A claim may have landed before the watch existed
        let initial = sub.current();
        self.search = Some(ticket);
        self.queue_updates = Some(sub);
        self.publish(|view| {
            view.status = ClientStatus::Searching { tier };
            view.notice = None;
        });
        self.on_queue_change(initial).await;

        match &self.current {
            Some(m) => matched_response(&m.handle),
            None => ClientResponse::Waiting,
        }
    }

    async fn handle_cancel(&mut self) -> ClientResponse {
        let Some(ticket) = self.stop_search() else {
            return match self.current {
                Some(_) => ClientResponse::Error("Already in a match".to_string()),
                None => ClientResponse::Error("Not searching".to_string()),
            };
        };

        match self.matchmaker.cancel(&ticket).await {
            Ok(CancelOutcome::Cancelled | CancelOutcome::NotQueued) => {
                self.publish(|view| {
                    view.status = ClientStatus::Idle;
                    view.notice = None;
                });
                ClientResponse::Success
            }
            Ok(CancelOutcome::AlreadyClaimed(handle)) => self.enter_match(handle).await,
            Err(e) => {
                log::warn!("Player {}: cancel failed: {}", self.player.id, e);
                self.publish(|view| view.status = ClientStatus::Idle);
                ClientResponse::Error(e.client_message())
            }
        }
    }

    async fn handle_move(&mut self, payload: MovePayload) -> ClientResponse {
        let Some(match_id) = self.current.as_ref().map(|m| m.handle.match_id) else {
            return ClientResponse::NotInMatch;
        };

        match self
            .coordinator
            .submit_move(match_id, self.player.id, payload)
            .await
        {
            Ok(session) => {
                self.apply_session(session).await;
                ClientResponse::Success
            }
            Err(SessionError::IllegalMove(e)) => ClientResponse::IllegalMove(e.to_string()),
            Err(e) => {
                log::warn!("Match {}: move failed: {}", match_id, e);
                ClientResponse::Error(e.client_message())
            }
        }
    }

    async fn handle_leave(&mut self) -> ClientResponse {
        if self.search.is_some() {
            return self.handle_cancel().await;
        }
        let Some(match_id) = self.current.as_ref().map(|m| m.handle.match_id) else {
            return ClientResponse::NotInMatch;
        };

        match self.coordinator.leave(match_id, self.player.id).await {
            Ok(session) => {
                self.apply_session(session).await;
                ClientResponse::Success
            }
            Err(e) => {
                log::warn!("Match {}: leave failed: {}", match_id, e);
                ClientResponse::Error(e.client_message())
            }
        }
    }

    async fn handle_shutdown(&mut self) -> ClientResponse {
        if self.search.is_some() {
            self.handle_cancel().await;
        }
        if let Some(m) = &self.current
            && !m.session.phase.is_final()
        {
            self.handle_leave().await;
        }
        self.finish_match(None).await;
        ClientResponse::Success
    }

    /// Attach to a paired match and start following it
    async fn enter_match(&mut self, handle: MatchHandle) -> ClientResponse {
        self.stop_search();
        let match_id = handle.match_id;

        let attached = async {
            let session = self
                .coordinator
                .attach(match_id, self.player.id, self.connection)
                .await?;
            let updates = self.coordinator.watch(match_id).await?;
            let presence = self
                .coordinator
                .watch_presence(match_id, handle.opponent.id)
                .await?;
            Ok::<_, SessionError>((session, updates, presence))
        }
        .await;

        let (session, updates, presence) = match attached {
            Ok(attached) => attached,
            Err(e) => {
                log::warn!("Match {}: player {} could not attach: {}", match_id, self.player.id, e);
                let notice = e.client_message();
                self.publish(|view| {
                    view.status = ClientStatus::Idle;
                    view.notice = Some(notice);
                });
                return ClientResponse::Error(e.client_message());
            }
        };

        let opponent_seen = matches!(presence.current(), Ok(Some(_)));
        let session = updates.current().ok().flatten().unwrap_or(session);
        let response = matched_response(&handle);
        let now = Instant::now();

        self.match_updates = Some(updates);
        self.opponent_presence = Some(presence);
        self.current = Some(MatchState {
            handle: handle.clone(),
            session: session.clone(),
            opponent_seen,
            settled: false,
            phase_since: now,
            turn_since: now,
            timer: None,
        });

        log::info!(
            "Player {} entered match {} as {:?} against {}",
            self.player.id,
            match_id,
            handle.role,
            handle.opponent.id
        );
        self.publish(|view| {
            view.status = ClientStatus::InMatch {
                match_id,
                role: handle.role,
            };
            view.session = Some(session.clone());
            view.notice = None;
        });

        if let Some(m) = self.current.as_mut() {
            m.timer = plan_timer(&self.config, self.player.id, m);
        }
        if self.current.as_ref().is_some_and(MatchState::is_done) {
            self.finish_match(Some(outcome_notice(&session, self.player.id)))
                .await;
        }
        response
    }

    /// Take in a newer copy of the match document
    async fn apply_session(&mut self, session: MatchSession) {
        let Some(m) = self.current.as_mut() else {
            return;
        };
        if session.match_id != m.handle.match_id || session.phase < m.session.phase {
            return;
        }

        let phase_changed = session.phase != m.session.phase;
        let turn_changed = session.turn_seq != m.session.turn_seq;
        let now = Instant::now();
        if phase_changed {
            m.phase_since = now;
        }
        if phase_changed || turn_changed {
            m.turn_since = now;
        }
        m.session = session.clone();
        if phase_changed || turn_changed {
            m.timer = plan_timer(&self.config, self.player.id, m);
        }
        let done = m.is_done();

        self.publish(|view| view.session = Some(session.clone()));

        if done {
            self.finish_match(Some(outcome_notice(&session, self.player.id)))
                .await;
        }
    }

    async fn on_timer(&mut self, timer: Timer) {
        let Some(m) = self.current.as_mut() else {
            return;
        };
        m.timer = None;
        let match_id = m.handle.match_id;
        let opponent_seen = m.opponent_seen;

        let result = match timer {
            Timer::BeginArming => self.coordinator.begin_arming(match_id).await.map(Some),
            Timer::Arm if !opponent_seen => {
                log::info!("Match {}: opponent never showed up", match_id);
                self.coordinator
                    .abort(match_id, TerminalReason::NoShow)
                    .await
                    .map(Some)
            }
            Timer::Arm => self.coordinator.arm(match_id).await.map(Some),
            Timer::Turn { seq } => self.coordinator.timeout_turn(match_id, seq).await,
            Timer::Settle => match self.coordinator.settle(match_id).await {
                Ok(outcome) => {
                    if outcome.is_final()
                        && let Some(m) = self.current.as_mut()
                    {
                        m.settled = true;
                    }
                    self.coordinator.session(match_id).await.map(Some)
                }
                Err(e) => Err(e),
            },
        };

        let retry_in = match result {
            Ok(Some(session)) => {
                self.apply_session(session).await;
                self.config.settlement_lock_ttl
            }
            Ok(None) => return,
            Err(SessionError::NotFound(_)) => {
                self.finish_match(Some("Match no longer exists".to_string()))
                    .await;
                return;
            }
            Err(e) => {
                log::warn!(
                    "Match {}: {:?} for player {} failed: {}",
                    match_id,
                    timer,
                    self.player.id,
                    e
                );
                self.config.arm_retry_delay
            }
        };

        // Still in the same phase: another peer holds the work or it failed,
        // look again later
        if let Some(m) = self.current.as_mut()
            && m.timer.is_none()
            && timer.waits_in(m.session.phase)
        {
            m.timer = Some((Instant::now() + retry_in, timer));
        }
    }

    async fn on_queue_change(&mut self, update: StoreResult<Option<QueueEntry>>) {
        let Some(ticket) = self.search.clone() else {
            return;
        };

        let observed = match update {
            Ok(entry) => self.matchmaker.observe(&ticket, entry).await,
            Err(e) => Err(e.into()),
        };

        match observed {
            Ok(Some(handle)) => {
                self.enter_match(handle).await;
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Player {}: search ended: {}", self.player.id, e);
                self.stop_search();
                let notice = e.client_message();
                self.publish(|view| {
                    view.status = ClientStatus::Idle;
                    view.notice = Some(notice);
                });
            }
        }
    }

    async fn on_search_expired(&mut self) {
        let Some(ticket) = self.stop_search() else {
            return;
        };

        match self.matchmaker.expire(&ticket).await {
            Ok(handle) => {
                self.enter_match(handle).await;
            }
            Err(e) => {
                let notice = e.client_message();
                self.publish(|view| {
                    view.status = ClientStatus::Idle;
                    view.notice = Some(notice);
                });
            }
        }
    }

    async fn on_session_change(&mut self, update: StoreResult<Option<MatchSession>>) {
        match update {
            Ok(Some(session)) => self.apply_session(session).await,
            Ok(None) => {
                log::warn!("Player {}: match document vanished", self.player.id);
                self.finish_match(Some("Match ended unexpectedly".to_string()))
                    .await;
            }
            Err(e) => {
                log::warn!("Player {}: match watch closed: {}", self.player.id, e);
                self.match_updates = None;
            }
        }
    }

    async fn on_presence_change(&mut self, update: StoreResult<Option<Presence>>) {
        let Some(m) = self.current.as_mut() else {
            return;
        };

        match update {
            Ok(Some(_)) => m.opponent_seen = true,
            Ok(None) if m.opponent_seen && !m.session.phase.is_final() => {
                let match_id = m.handle.match_id;
                let opponent = m.handle.opponent.id;
                log::info!("Match {}: opponent {} disconnected", match_id, opponent);

                match self.coordinator.claim_abandonment(match_id, opponent).await {
                    Ok(session) => self.apply_session(session).await,
                    Err(e) => log::warn!("Match {}: abandonment claim failed: {}", match_id, e),
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Player {}: presence watch closed: {}", self.player.id, e);
                self.opponent_presence = None;
            }
        }
    }

    /// Drop the match and publish the result
    async fn finish_match(&mut self, notice: Option<String>) {
        let Some(m) = self.current.take() else {
            return;
        };
        self.match_updates = None;
        self.opponent_presence = None;

        if let Err(e) = self
            .coordinator
            .detach(m.handle.match_id, self.player.id, self.connection)
            .await
        {
            log::warn!("Match {}: detach failed: {}", m.handle.match_id, e);
        }

        self.publish(|view| {
            view.status = ClientStatus::Idle;
            view.session = Some(m.session);
            if notice.is_some() {
                view.notice = notice;
            }
        });
    }

    fn stop_search(&mut self) -> Option<SearchTicket> {
        self.queue_updates = None;
        self.search.take()
    }

    fn publish(&self, update: impl FnOnce(&mut ClientView)) {
        self.view.send_modify(update);
    }
}

fn matched_response(handle: &MatchHandle) -> ClientResponse {
    ClientResponse::Matched {
        match_id: handle.match_id,
        role: handle.role,
        opponent: handle.opponent.display_name.clone(),
    }
}

/// Next local timer for the phase the match is in
fn plan_timer(config: &EngineConfig, me: PlayerId, m: &MatchState) -> Option<(Instant, Timer)> {
    let session = &m.session;
    match session.phase {
        Phase::Matched => Some((m.phase_since + config.splash, Timer::BeginArming)),
        Phase::Arming => Some((m.phase_since + config.countdown, Timer::Arm)),
        Phase::Active => {
            // The holder penalises itself; the other side waits out the grace
            let mut budget = config.turn_timeout;
            if session.turn_holder_id() != me {
                budget += config.turn_grace;
            }
            Some((
                m.turn_since + budget,
                Timer::Turn {
                    seq: session.turn_seq,
                },
            ))
        }
        Phase::Settling => Some((Instant::now(), Timer::Settle)),
        Phase::Aborted if !m.settled => Some((Instant::now(), Timer::Settle)),
        Phase::Queued | Phase::Closed | Phase::Aborted => None,
    }
}

fn outcome_notice(session: &MatchSession, me: PlayerId) -> String {
    let payout = session.tier.payout;
    match (session.phase, session.winner, session.terminal_reason) {
        (Phase::Aborted, _, Some(TerminalReason::ArmFailed)) => {
            "Match cancelled: a stake could not be taken".to_string()
        }
        (Phase::Aborted, _, Some(TerminalReason::NoShow)) => {
            "Match cancelled: opponent never arrived".to_string()
        }
        (Phase::Aborted, _, _) => "Match cancelled, no charge".to_string(),
        (_, Some(winner), reason) if winner == me => match reason {
            Some(TerminalReason::Left | TerminalReason::Abandoned) => {
                format!("Opponent forfeited, you won {payout}")
            }
            Some(TerminalReason::Timeout) => format!("Opponent ran out of time, you won {payout}"),
            _ => format!("You won {payout}"),
        },
        (_, Some(_), Some(TerminalReason::Timeout)) => "You ran out of time".to_string(),
        (_, Some(_), Some(TerminalReason::Left | TerminalReason::Abandoned)) => {
            "You forfeited the match".to_string()
        }
        (_, Some(_), _) => "You lost".to_string(),
        (_, None, _) => "Draw, entry fee refunded".to_string(),
    }
}

async fn next_change<T: DeserializeOwned>(
    sub: Option<&mut DocSubscription<T>>,
) -> StoreResult<Option<T>> {
    match sub {
        Some(sub) => sub.changed().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
