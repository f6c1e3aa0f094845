//! Transport boundary: one method per HTTP endpoint.
//!
//! [`SessionHandler`] is router-agnostic. An adapter for any HTTP
//! framework reads the `x-tether-session` header and the body, calls the
//! matching method, and writes back the [`Reply`]:
//!
//! | endpoint            | method                 | reply |
//! |---------------------|------------------------|-------|
//! | `POST /connect`     | [`connect`]            | always a JSON body |
//! | `POST /link`        | [`link`] + [`link_closed`] | long-poll, resolved once |
//! | `POST /login`       | [`login`]              | queued output, 204 if none |
//! | `POST /action`      | [`action`]             | queued output, 204 if none |
//! | `POST /poll`        | [`poll`]               | queued output, 204 if none |
//! | `POST /logout`      | [`logout`]             | queued output, 204 if none |
//! | `POST /register`    | [`register`]           | queued output, 204 if none |
//! | `POST /unregister`  | [`unregister`]         | queued output, 204 if none |
//! | `POST /roster`      | [`register_roster`]    | queued output, 204 if none |
//! | `POST /unroster`    | [`unregister_roster`]  | queued output, 204 if none |
//! | `POST /remote_log`  | [`remote_log`]         | always 204 |
//!
//! A header that names no live session gets
//! `[{"link_status":"session_not_found"}]` from every endpoint but
//! `connect` and `remote_log`, so the client can start over.
//!
//! [`connect`]: SessionHandler::connect
//! [`link`]: SessionHandler::link
//! [`link_closed`]: SessionHandler::link_closed
//! [`login`]: SessionHandler::login
//! [`action`]: SessionHandler::action
//! [`poll`]: SessionHandler::poll
//! [`logout`]: SessionHandler::logout
//! [`register`]: SessionHandler::register
//! [`unregister`]: SessionHandler::unregister
//! [`register_roster`]: SessionHandler::register_roster
//! [`unregister_roster`]: SessionHandler::unregister_roster
//! [`remote_log`]: SessionHandler::remote_log

use std::fmt;
use std::sync::Arc;

use tether_protocol::{
    ActionRequest, Codec, ConnectRequest, DisplayLine, LoginRequest, OutputEvent, ProtocolError,
    ServiceRequest, SessionId,
};
use tether_session::{PlayerRecord, ROSTER_SERVICE, Session, SessionRegistry};
use tether_transport::{LinkError, LinkReceiver, Reply, RequestId, link_channel};
use tracing::{debug, warn};

use crate::TetherError;
use crate::server::ServerState;

/// Notice for a login request carrying neither credentials nor a player.
pub const MISSING_CREDENTIALS: &str = "Browser did not submit credentials, please retype";

/// Receives player actions.
///
/// This is where in-world command parsing plugs in. The command is
/// already trimmed and HTML-escaped. Anything written to `session` (lines,
/// status patches) goes back to the client in the action's reply.
pub trait CommandSink: Send + Sync + 'static {
    fn handle(&self, player: &PlayerRecord, command: &str, session: &mut Session);
}

/// Echoes each command back as a display line. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoCommands;

impl CommandSink for EchoCommands {
    fn handle(&self, _player: &PlayerRecord, command: &str, session: &mut Session) {
        session.display_line(DisplayLine::plain(command));
    }
}

/// The HTTP-facing half of a [`TetherServer`](crate::TetherServer).
#[derive(Clone)]
pub struct SessionHandler {
    state: Arc<ServerState>,
}

impl fmt::Debug for SessionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandler").finish_non_exhaustive()
    }
}

impl SessionHandler {
    pub(crate) fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Starts a session, or resumes one when a session header is sent.
    ///
    /// A resume needs `{"player_id": ...}` in the body. If the session
    /// can't be resumed a fresh one is started; the client learns which
    /// from the `connect` event.
    ///
    /// # Errors
    /// [`TetherError::Protocol`] if a resume body is malformed or lacks
    /// `player_id`.
    pub async fn connect(&self, session: Option<&str>, body: &[u8]) -> Result<Reply, TetherError> {
        let resume = match header_id(session) {
            Some(id) => {
                let request: ConnectRequest = self.state.codec.decode(body)?;
                let player_id = request.player_id.ok_or_else(|| {
                    ProtocolError::InvalidMessage("reconnect requires player_id".to_string())
                })?;
                Some((id, player_id))
            }
            None => None,
        };

        let mut registry = self.state.registry.lock().await;
        let session = match &resume {
            Some((id, player_id)) => registry.reconnect(id, player_id),
            None => registry.create_session(),
        };
        let output = session.pull_output();
        Ok(Reply::always(&self.state.codec, &output)?)
    }

    /// Opens a long-poll.
    ///
    /// Await the receiver outside of any lock, e.g. with
    /// [`LinkReceiver::reply`]. If the client hangs up first, report it
    /// with [`link_closed`](Self::link_closed).
    pub async fn link(&self, session: Option<&str>) -> LinkReceiver {
        let Some(id) = header_id(session) else {
            return LinkReceiver::ready(LinkError::SessionNotFound.into_batch());
        };
        let (request, receiver) = link_channel();
        self.state.registry.lock().await.attach(&id, request);
        receiver
    }

    /// The client's connection for `request` closed before it was
    /// answered. The session goes link-dead, unless a newer request has
    /// already replaced that one.
    pub async fn link_closed(&self, session: Option<&str>, request: RequestId) {
        let Some(id) = header_id(session) else {
            return;
        };
        let mut registry = self.state.registry.lock().await;
        if let Some(session) = registry.get_mut(&id) {
            if session.pending_request_id() == Some(request) {
                session.link_failed("client connection closed");
            } else {
                debug!(session_id = %id, %request, "closed request no longer pending");
            }
        }
    }

    /// Logs in with credentials, or selects a player once logged in.
    ///
    /// # Errors
    /// - [`TetherError::Protocol`]: malformed body
    /// - [`TetherError::Session`]: the directory returned a player that
    ///   doesn't belong to the session's user
    pub async fn login(&self, session: Option<&str>, body: &[u8]) -> Result<Reply, TetherError> {
        let mut registry = self.state.registry.lock().await;
        let Some(id) = known_session(&registry, session) else {
            return self.not_found();
        };
        let request: LoginRequest = self.state.codec.decode(body)?;
        let has_user = registry.get(&id).is_some_and(|s| s.user().is_some());

        match request {
            LoginRequest {
                player_id: Some(player_id),
                ..
            } if has_user => registry.bind_player(&id, &player_id)?,
            LoginRequest {
                user_id: Some(user_name),
                password: Some(password),
                ..
            } => registry.authenticate(&id, &user_name, &password)?,
            _ => {
                if let Some(session) = registry.get_mut(&id) {
                    session.append(OutputEvent::LoginFailure(MISSING_CREDENTIALS.to_string()));
                }
            }
        }
        self.pull(&mut registry, &id)
    }

    /// Forwards a player action to the [`CommandSink`].
    ///
    /// Without a player bound the reply is
    /// `[{"link_status":"no_login"}]`.
    ///
    /// # Errors
    /// [`TetherError::Protocol`] if the body has no `action`.
    pub async fn action(&self, session: Option<&str>, body: &[u8]) -> Result<Reply, TetherError> {
        let mut registry = self.state.registry.lock().await;
        let Some(id) = known_session(&registry, session) else {
            return self.not_found();
        };
        let Some(session) = registry.get_mut(&id) else {
            return self.not_found();
        };
        let Some(player) = session.player().cloned() else {
            return Ok(Reply::always(&self.state.codec, &LinkError::NoLogin.into_batch())?);
        };
        let request: ActionRequest = self.state.codec.decode(body)?;
        let command = escape_html(request.action.trim());
        debug!(session_id = %id, player_id = %player.id, %command, "action");
        self.state.commands.handle(&player, &command, session);
        self.pull(&mut registry, &id)
    }

    /// Returns whatever is queued.
    pub async fn poll(&self, session: Option<&str>) -> Result<Reply, TetherError> {
        let mut registry = self.state.registry.lock().await;
        let Some(id) = known_session(&registry, session) else {
            return self.not_found();
        };
        self.pull(&mut registry, &id)
    }

    /// Logs the player out; the session stays.
    pub async fn logout(&self, session: Option<&str>) -> Result<Reply, TetherError> {
        let mut registry = self.state.registry.lock().await;
        let Some(id) = known_session(&registry, session) else {
            return self.not_found();
        };
        registry.logout(&id)?;
        self.pull(&mut registry, &id)
    }

    /// Registers the session for a client service:
    /// `{"service_id": ..., "data": ...}`.
    ///
    /// An unknown `service_id` is answered with a notice, not an error.
    ///
    /// # Errors
    /// [`TetherError::Protocol`] if the body has no `service_id`.
    pub async fn register(&self, session: Option<&str>, body: &[u8]) -> Result<Reply, TetherError> {
        let mut registry = self.state.registry.lock().await;
        let Some(id) = known_session(&registry, session) else {
            return self.not_found();
        };
        let request: ServiceRequest = self.state.codec.decode(body)?;
        self.state
            .services
            .register(&mut registry, &id, &request.service_id, request.data)?;
        self.pull(&mut registry, &id)
    }

    /// Unregisters the session from a client service.
    ///
    /// # Errors
    /// [`TetherError::Protocol`] if the body has no `service_id`.
    pub async fn unregister(&self, session: Option<&str>, body: &[u8]) -> Result<Reply, TetherError> {
        let mut registry = self.state.registry.lock().await;
        let Some(id) = known_session(&registry, session) else {
            return self.not_found();
        };
        let request: ServiceRequest = self.state.codec.decode(body)?;
        self.state
            .services
            .unregister(&mut registry, &id, &request.service_id)?;
        self.pull(&mut registry, &id)
    }

    /// Subscribes the session to live roster updates.
    pub async fn register_roster(&self, session: Option<&str>) -> Result<Reply, TetherError> {
        let mut registry = self.state.registry.lock().await;
        let Some(id) = known_session(&registry, session) else {
            return self.not_found();
        };
        self.state
            .services
            .register(&mut registry, &id, ROSTER_SERVICE, None)?;
        self.pull(&mut registry, &id)
    }

    /// Stops roster updates for the session.
    pub async fn unregister_roster(&self, session: Option<&str>) -> Result<Reply, TetherError> {
        let mut registry = self.state.registry.lock().await;
        let Some(id) = known_session(&registry, session) else {
            return self.not_found();
        };
        self.state
            .services
            .unregister(&mut registry, &id, ROSTER_SERVICE)?;
        self.pull(&mut registry, &id)
    }

    /// Writes a log message sent by the client to the server log.
    /// Always `204`; no session is needed.
    pub async fn remote_log(&self, body: &[u8]) -> Reply {
        let text = String::from_utf8_lossy(body);
        warn!(target: "tether::remote", text = %text.trim(), "client log");
        Reply::NoContent
    }

    fn pull(&self, registry: &mut SessionRegistry, id: &SessionId) -> Result<Reply, TetherError> {
        let output = registry.pull_output(id)?;
        Ok(Reply::from_batch(&self.state.codec, &output)?)
    }

    fn not_found(&self) -> Result<Reply, TetherError> {
        Ok(Reply::always(
            &self.state.codec,
            &LinkError::SessionNotFound.into_batch(),
        )?)
    }
}

/// A non-empty session header.
fn header_id(raw: Option<&str>) -> Option<SessionId> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(SessionId::new)
}

/// A session header that names a live session.
fn known_session(registry: &SessionRegistry, raw: Option<&str>) -> Option<SessionId> {
    header_id(raw).filter(|id| registry.get(id).is_some())
}

/// Escapes `&`, `<` and `>` so typed text can't inject markup into other
/// players' output panes. Quotes are left alone.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_id_blank_is_none() {
        assert_eq!(header_id(None), None);
        assert_eq!(header_id(Some("  ")), None);
        assert_eq!(header_id(Some(" abc ")), Some(SessionId::new("abc")));
    }

    #[test]
    fn test_escape_html_markup() {
        assert_eq!(escape_html("<b>hi</b> & \"bye\""), "&lt;b&gt;hi&lt;/b&gt; &amp; \"bye\"");
    }

    #[test]
    fn test_escape_html_plain_text_unchanged() {
        assert_eq!(escape_html("say hello"), "say hello");
    }
}
