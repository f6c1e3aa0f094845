//! Lifecycle events published by the registry, and connect hooks.
//!
//! Two channels, two jobs:
//!
//! - [`SessionEvent`]s go out on the registry's
//!   [`EventBus`](tether_events::EventBus) after the fact. Subscribers
//!   (audit logs, chat channels, metrics) observe but can't change
//!   anything.
//! - [`ConnectHook`]s run synchronously while a login is being built and
//!   may add fields to the `login`/`user_login` payload the client gets.

use tether_protocol::{ClientData, PlayerId, PresenceSnapshot, SessionId, UserId};

use crate::{PlayerRecord, UserRecord};

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session was created or resumed by reconnect.
    SessionConnect { session_id: SessionId },
    /// A user is now bound to a session.
    UserConnect { session_id: SessionId, user_id: UserId },
    /// A player is now bound to a session.
    PlayerConnect { session_id: SessionId, player_id: PlayerId },
    /// A player left play (logout or prune). Not published on eviction:
    /// the player stays in play on its new session.
    PlayerLogout { session_id: SessionId, player_id: PlayerId },
    /// Fresh presence for every bound player.
    PlayerList(PresenceSnapshot),
    /// A session was pruned and is gone for good.
    SessionDisconnect { session_id: SessionId },
}

/// Contributes client data when a user or player connects.
///
/// Both methods default to doing nothing, so an implementation only
/// overrides the one it cares about.
///
/// ```rust
/// use serde_json::json;
/// use tether_protocol::ClientData;
/// use tether_session::{ConnectHook, PlayerRecord};
///
/// struct Channels;
///
/// impl ConnectHook for Channels {
///     fn player_connect(&self, _player: &PlayerRecord, data: &mut ClientData) {
///         data.insert("channels".into(), json!(["ooc", "newbie"]));
///     }
/// }
/// ```
pub trait ConnectHook: Send + Sync + 'static {
    fn user_connect(&self, _user: &UserRecord, _data: &mut ClientData) {}

    fn player_connect(&self, _player: &PlayerRecord, _data: &mut ClientData) {}
}
