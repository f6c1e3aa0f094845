//! Error types for the session layer.
//!
//! Most things that go wrong for a client (bad password, unknown player,
//! not logged in) are not errors here: they are queued as notices for the
//! client to read. What remains are the cases the caller has to act on.

use tether_protocol::{PlayerId, SessionId, UserId};

/// Errors returned by [`SessionRegistry`](crate::SessionRegistry) and
/// [`SessionConfig`](crate::SessionConfig).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live session has this id. It was never issued, or it was
    /// pruned after staying link-dead too long.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// A player was about to be bound to a session whose user doesn't
    /// own it. The directory returned inconsistent records; nothing was
    /// changed.
    #[error("player {player_id} does not belong to user {user_id}")]
    IdentityMismatch { player_id: PlayerId, user_id: UserId },

    /// A config document could not be parsed.
    #[error("invalid session config: {0}")]
    InvalidConfig(#[source] serde_json::Error),
}
