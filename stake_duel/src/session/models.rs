//! Match session document and its pure transition rules.
//!
//! Both peers hold a copy of the same `MatchSession` and rewrite it through
//! compare-and-set. Every transition here is a pure function of the current
//! document, so a transaction closure can re-run it against whatever the
//! store holds at commit time.

use crate::config::Tier;
use crate::engine::{GameBoard, IllegalMove, MovePayload, Outcome, Rules};
use crate::types::{HOST_SEAT, JOINER_SEAT, MatchId, PlayerId, PlayerProfile, Seat, opponent_seat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Match lifecycle. Phases only move forward; `Aborted` is a side exit
/// available until the result is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Matched,
    Arming,
    Active,
    Settling,
    Closed,
    Aborted,
}

impl Phase {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: Phase) -> bool {
        match next {
            Phase::Aborted => self <= Phase::Active,
            _ => self != Phase::Aborted && next > self,
        }
    }

    pub fn is_pre_active(self) -> bool {
        self < Phase::Active
    }

    /// No further phase changes are possible
    pub fn is_final(self) -> bool {
        matches!(self, Phase::Closed | Phase::Aborted)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Queued => "queued",
            Phase::Matched => "matched",
            Phase::Arming => "arming",
            Phase::Active => "active",
            Phase::Settling => "settling",
            Phase::Closed => "closed",
            Phase::Aborted => "aborted",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Waited in the queue and was claimed
    Host,
    /// Claimed a waiting entry
    Joiner,
}

impl Role {
    pub fn seat(self) -> Seat {
        match self {
            Role::Host => HOST_SEAT,
            Role::Joiner => JOINER_SEAT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: PlayerId,
    pub name: String,
    pub role: Role,
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The board produced a winner
    Completed,
    /// The board filled with no winner
    Draw,
    /// A player ran out of lives
    Timeout,
    /// A player left deliberately
    Left,
    /// A player's connection vanished
    Abandoned,
    /// Escrow could not be taken
    ArmFailed,
    /// The opponent never showed up before the countdown ended
    NoShow,
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TerminalReason::Completed => "completed",
            TerminalReason::Draw => "draw",
            TerminalReason::Timeout => "timeout",
            TerminalReason::Left => "left",
            TerminalReason::Abandoned => "abandoned",
            TerminalReason::ArmFailed => "arm_failed",
            TerminalReason::NoShow => "no_show",
        };
        write!(f, "{name}")
    }
}

/// One accepted move. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub actor_id: PlayerId,
    pub payload: MovePayload,
    pub at: DateTime<Utc>,
}

/// Online marker a peer keeps while attached to a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub player_id: PlayerId,
    pub since: DateTime<Utc>,
}

/// Shared state of one match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSession {
    pub match_id: MatchId,
    pub tier: Tier,
    /// Indexed by seat
    pub players: [Participant; 2],
    pub created_at: DateTime<Utc>,
    pub phase: Phase,
    pub turn_holder: Seat,
    /// Bumped on every turn change; timers and penalties key on it
    pub turn_seq: u32,
    pub turn_started_at: DateTime<Utc>,
    pub board: GameBoard,
    /// Indexed by seat
    pub lives: [u8; 2],
    pub moves: Vec<MoveRecord>,
    pub winner: Option<PlayerId>,
    pub terminal_reason: Option<TerminalReason>,
    pub updated_at: DateTime<Utc>,
}

impl MatchSession {
    /// New session in `Matched`, written by the claimant
    pub fn new(
        match_id: MatchId,
        tier: Tier,
        host: &PlayerProfile,
        joiner: &PlayerProfile,
        board: GameBoard,
        lives: u8,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id,
            tier,
            players: [
                Participant {
                    id: host.id,
                    name: host.display_name.clone(),
                    role: Role::Host,
                },
                Participant {
                    id: joiner.id,
                    name: joiner.display_name.clone(),
                    role: Role::Joiner,
                },
            ],
            created_at: now,
            phase: Phase::Matched,
            turn_holder: HOST_SEAT,
            turn_seq: 0,
            turn_started_at: now,
            board,
            lives: [lives; 2],
            moves: Vec::new(),
            winner: None,
            terminal_reason: None,
            updated_at: now,
        }
    }

    pub fn seat_of(&self, player_id: PlayerId) -> Option<Seat> {
        self.players.iter().position(|p| p.id == player_id)
    }

    pub fn player(&self, seat: Seat) -> &Participant {
        &self.players[seat]
    }

    pub fn player_ids(&self) -> [PlayerId; 2] {
        [self.players[0].id, self.players[1].id]
    }

    pub fn opponent_of(&self, player_id: PlayerId) -> Option<&Participant> {
        self.seat_of(player_id).map(|seat| &self.players[opponent_seat(seat)])
    }

    pub fn turn_holder_id(&self) -> PlayerId {
        self.players[self.turn_holder].id
    }

    /// Result decided, settlement outstanding or done
    pub fn is_decided(&self) -> bool {
        self.terminal_reason.is_some() && self.phase >= Phase::Settling && self.phase != Phase::Aborted
    }

    pub fn is_draw(&self) -> bool {
        self.terminal_reason == Some(TerminalReason::Draw)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn pass_turn(&mut self, now: DateTime<Utc>) {
        self.turn_holder = opponent_seat(self.turn_holder);
        self.turn_seq += 1;
        self.turn_started_at = now;
    }

    /// Record a decided result. A winner, once written, is never replaced.
    fn decide(&mut self, winner: Option<PlayerId>, reason: TerminalReason, now: DateTime<Utc>) {
        if self.winner.is_none() && self.terminal_reason.is_none() {
            self.winner = winner;
            self.terminal_reason = Some(reason);
        }
        self.phase = Phase::Settling;
        self.touch(now);
    }

    fn abort(&mut self, reason: TerminalReason, now: DateTime<Utc>) {
        self.phase = Phase::Aborted;
        if self.terminal_reason.is_none() {
            self.terminal_reason = Some(reason);
        }
        self.touch(now);
    }
}

/// Check a move without touching anything.
///
/// # Returns
///
/// * `Seat` - The actor's seat when the move is acceptable
pub fn validate_move(
    session: &MatchSession,
    actor_id: PlayerId,
    payload: &MovePayload,
) -> Result<Seat, IllegalMove> {
    if session.phase != Phase::Active {
        return Err(IllegalMove::NotActive);
    }
    if session.winner.is_some() || session.terminal_reason.is_some() {
        return Err(IllegalMove::GameOver);
    }
    let seat = session
        .seat_of(actor_id)
        .ok_or(IllegalMove::NotAParticipant)?;
    if seat != session.turn_holder {
        return Err(IllegalMove::NotYourTurn);
    }
    session.board.validate(seat, payload)?;
    Ok(seat)
}

/// Apply a validated move, writing the winner in the same document if the
/// board became terminal.
pub fn apply_move(
    session: &MatchSession,
    actor_id: PlayerId,
    payload: &MovePayload,
    now: DateTime<Utc>,
) -> Result<MatchSession, IllegalMove> {
    let seat = validate_move(session, actor_id, payload)?;
    let applied = session.board.apply(seat, payload)?;

    let mut next = session.clone();
    next.board = applied.board;
    next.moves.push(MoveRecord {
        actor_id,
        payload: *payload,
        at: now,
    });

    match applied.terminal {
        Some(Outcome::Winner(winner_seat)) => {
            let winner = next.players[winner_seat].id;
            next.decide(Some(winner), TerminalReason::Completed, now);
        }
        Some(Outcome::Draw) => next.decide(None, TerminalReason::Draw, now),
        None => {
            next.pass_turn(now);
            next.touch(now);
        }
    }

    Ok(next)
}

/// Penalise the turn holder for letting turn `expected_seq` expire: one life
/// lost and the turn passes; the last life ends the match.
///
/// Returns `None` if the turn already moved on or the match is not in play.
pub fn apply_timeout(
    session: &MatchSession,
    expected_seq: u32,
    now: DateTime<Utc>,
) -> Option<MatchSession> {
    if session.phase != Phase::Active
        || session.turn_seq != expected_seq
        || session.terminal_reason.is_some()
    {
        return None;
    }

    let mut next = session.clone();
    let holder = next.turn_holder;
    next.lives[holder] = next.lives[holder].saturating_sub(1);

    if next.lives[holder] == 0 {
        let winner = next.players[opponent_seat(holder)].id;
        next.decide(Some(winner), TerminalReason::Timeout, now);
    } else {
        next.pass_turn(now);
        next.touch(now);
    }
    Some(next)
}

/// A player quits or vanishes. In play this forfeits to the opponent; before
/// play it aborts with no financial effect.
///
/// Returns `None` when the match is already decided or over.
pub fn apply_departure(
    session: &MatchSession,
    player_id: PlayerId,
    reason: TerminalReason,
    now: DateTime<Utc>,
) -> Option<MatchSession> {
    let seat = session.seat_of(player_id)?;
    if session.terminal_reason.is_some() || session.phase.is_final() {
        return None;
    }

    let mut next = session.clone();
    match session.phase {
        Phase::Active => {
            let winner = next.players[opponent_seat(seat)].id;
            next.decide(Some(winner), reason, now);
        }
        phase if phase.is_pre_active() => next.abort(reason, now),
        _ => return None,
    }
    Some(next)
}

/// Move to `next` if the phase order allows it
pub fn advance_phase(
    session: &MatchSession,
    from: Phase,
    to: Phase,
    now: DateTime<Utc>,
) -> Option<MatchSession> {
    if session.phase != from || !from.can_advance_to(to) {
        return None;
    }
    let mut next = session.clone();
    next.phase = to;
    if to == Phase::Active {
        next.turn_holder = HOST_SEAT;
        next.turn_started_at = now;
    }
    next.touch(now);
    Some(next)
}

/// Abort a pre-active match
pub fn abort_match(
    session: &MatchSession,
    reason: TerminalReason,
    now: DateTime<Utc>,
) -> Option<MatchSession> {
    if !session.phase.can_advance_to(Phase::Aborted) || session.phase == Phase::Active {
        return None;
    }
    let mut next = session.clone();
    next.abort(reason, now);
    Some(next)
}
