//! Player client: the UI-facing surface.
//!
//! Each player runs one `PlayerActor`. The UI talks to it through a
//! `PlayerHandle` (`join_queue`, `cancel_queue`, `submit_move`,
//! `leave_match`) and renders the `ClientView` it publishes.

pub mod actor;
pub mod messages;

pub use actor::{PlayerActor, PlayerHandle};
pub use messages::{ClientMessage, ClientResponse, ClientStatus, ClientView};
