//! Player client message types.

use crate::config::Tier;
use crate::engine::MovePayload;
use crate::session::{MatchSession, Role};
use crate::types::{MatchId, PlayerId};
use tokio::sync::oneshot;

/// Messages that can be sent to a PlayerActor
#[derive(Debug)]
pub enum ClientMessage {
    /// Start searching for an opponent in a tier
    JoinQueue {
        tier: Tier,
        response: oneshot::Sender<ClientResponse>,
    },

    /// Stop searching
    CancelQueue {
        response: oneshot::Sender<ClientResponse>,
    },

    /// Play a move in the current match
    SubmitMove {
        payload: MovePayload,
        response: oneshot::Sender<ClientResponse>,
    },

    /// Forfeit the current match, or abandon it before play starts
    LeaveMatch {
        response: oneshot::Sender<ClientResponse>,
    },

    /// Snapshot of what the UI should render
    GetView {
        response: oneshot::Sender<ClientView>,
    },

    /// Leave whatever is in progress and stop the actor
    Shutdown {
        response: oneshot::Sender<ClientResponse>,
    },
}

/// Response from client operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientResponse {
    /// Operation succeeded
    Success,

    /// Paired with an opponent
    Matched {
        match_id: MatchId,
        role: Role,
        opponent: String,
    },

    /// Queued, waiting for a challenger
    Waiting,

    /// Balance below the entry fee; redirect to funding
    InsufficientFunds { required: i64, available: i64 },

    /// Move rejected before anything was written
    IllegalMove(String),

    /// No match in progress
    NotInMatch,

    /// Operation failed
    Error(String),
}

impl ClientResponse {
    /// Check if response is success
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ClientResponse::Success | ClientResponse::Matched { .. } | ClientResponse::Waiting
        )
    }

    /// Get error message if response is error
    pub fn error_message(&self) -> Option<String> {
        match self {
            ClientResponse::InsufficientFunds {
                required,
                available,
            } => Some(format!(
                "Insufficient funds: need {required}, have {available}"
            )),
            ClientResponse::IllegalMove(reason) => Some(format!("Illegal move: {reason}")),
            ClientResponse::NotInMatch => Some("Not in a match".to_string()),
            ClientResponse::Error(msg) => Some(msg.clone()),
            _ => None,
        }
    }
}

/// What the player is doing right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStatus {
    Idle,
    Searching { tier: Tier },
    InMatch { match_id: MatchId, role: Role },
}

/// Everything the UI renders, republished on every change
#[derive(Debug, Clone, PartialEq)]
pub struct ClientView {
    pub player_id: PlayerId,
    pub status: ClientStatus,
    /// Latest observed session; kept after the match ends for the result screen
    pub session: Option<MatchSession>,
    /// Short notification for the player
    pub notice: Option<String>,
}

impl ClientView {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            status: ClientStatus::Idle,
            session: None,
            notice: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == ClientStatus::Idle
    }

    /// It is this player's move
    pub fn is_my_turn(&self) -> bool {
        matches!(self.status, ClientStatus::InMatch { .. })
            && self.session.as_ref().is_some_and(|s| {
                s.phase == crate::session::Phase::Active && s.turn_holder_id() == self.player_id
            })
    }
}
