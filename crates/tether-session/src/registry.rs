//! The session registry: every live session, and the player bindings
//! between them.
//!
//! This is the central piece of the session layer. It's responsible for:
//! - Minting session ids and creating sessions
//! - Logging users in and binding players, one session per player
//! - Resuming link-dead sessions on reconnect
//! - Link-health maintenance: keep-alives, link-dead detection, pruning
//! - Presence broadcasts and the delivery pulse
//!
//! # Concurrency note
//!
//! `SessionRegistry` is NOT thread-safe by itself. It uses plain
//! `HashMap`s and is meant to sit behind one `tokio::sync::Mutex` owned by
//! the server runtime, so every mutation (requests, maintenance jobs) is
//! serialized through a single authority.
//!
//! # Lifecycle
//!
//! ```text
//! create_session() ──→ authenticate() ──→ bind_player() ──→ logout()
//!        │                                     │
//!        ▼                                     ▼
//!   [no request for link_dead_interval]   [same player elsewhere]
//!        │                                     │
//!        ▼                                     ▼
//!    LinkDead ──(reconnect)──→ resumed     old session gets
//!        │                                 logout: other_location
//!        ▼ (after link_dead_prune)
//!     pruned
//! ```

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use tether_events::{EventBus, Pulse};
use tether_protocol::{
    ClientData, DisplayLine, LogoutReason, OutputEvent, PlayerId, PresenceSnapshot, SessionId,
};
use tether_transport::{LinkError, LinkRequest};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::session::{Identity, SessionKind};
use crate::{
    ConnectHook, IdentityDirectory, IdentityError, PlayerRecord, Session, SessionConfig,
    SessionError, SessionEvent, UserRecord,
};

/// Banner shown when a link-dead session is resumed.
pub const RECONNECT_BANNER: &str = "-- Reconnecting Session --";

/// Banner shown when a login took a player over from another session.
pub const TAKEOVER_BANNER: &str = "-- Existing Session Logged Out --";

const CLIENT_SESSION_LOGIN: &str = "This session cannot log in";
const NOT_LOGGED_IN: &str = "Not logged in";

/// What one link-health pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Sessions removed after staying link-dead too long, sorted.
    pub pruned: Vec<SessionId>,
    /// Sessions newly marked link-dead, sorted.
    pub link_dead: Vec<SessionId>,
    /// Pending requests recycled with a `keep_alive`.
    pub keep_alives: usize,
}

/// Owns every live session.
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,

    /// player → session. Kept 1:1 with the sessions' player bindings.
    player_sessions: HashMap<PlayerId, SessionId>,

    /// Last computed roster, one entry per bound player.
    presence: PresenceSnapshot,

    /// Sessions that receive `player_list` output on every broadcast.
    roster_watchers: BTreeSet<SessionId>,

    pulse: Pulse<SessionId>,
    events: EventBus<SessionEvent>,
    directory: Arc<dyn IdentityDirectory>,
    hooks: Vec<Arc<dyn ConnectHook>>,
    config: SessionConfig,
}

impl SessionRegistry {
    /// Creates an empty registry. The config is validated first.
    pub fn new(config: SessionConfig, directory: Arc<dyn IdentityDirectory>) -> Self {
        let config = config.validated();
        Self {
            sessions: HashMap::new(),
            player_sessions: HashMap::new(),
            presence: PresenceSnapshot::new(),
            roster_watchers: BTreeSet::new(),
            pulse: Pulse::new(),
            events: EventBus::new(config.event_capacity),
            directory,
            hooks: Vec::new(),
            config,
        }
    }

    /// Registers a hook that contributes client data on login.
    pub fn add_hook(&mut self, hook: Arc<dyn ConnectHook>) {
        self.hooks.push(hook);
    }

    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.events
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replaces the thresholds. Takes effect on the next maintenance pass.
    ///
    /// The event bus keeps the capacity it was created with.
    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config.validated();
        info!(
            refresh_secs = self.config.refresh_link_interval_secs,
            dead_secs = self.config.link_dead_interval_secs,
            prune_secs = self.config.link_dead_prune_secs,
            idle_refresh_secs = self.config.link_idle_refresh_secs,
            "session config updated"
        );
    }

    // ---- Lookup ----

    pub fn get(&self, session_id: &SessionId) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    /// The session a player is bound to, if any.
    pub fn player_session(&self, player_id: &PlayerId) -> Option<&Session> {
        self.sessions.get(self.player_sessions.get(player_id)?)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.keys()
    }

    /// The roster as of the last broadcast or binding change.
    pub fn presence(&self) -> &PresenceSnapshot {
        &self.presence
    }

    /// Sessions currently waiting on the pulse.
    pub fn pulse_waiting(&self) -> usize {
        self.pulse.len()
    }

    // ---- Creation ----

    /// Creates a player-client session and queues `connect: <id>` for it.
    pub fn create_session(&mut self) -> &mut Session {
        let id = self.mint_id();
        let mut session = Session::new(id.clone(), SessionKind::Game, self.pulse.clone());
        session.append(OutputEvent::Connect(id.clone()));
        self.events.publish(SessionEvent::SessionConnect {
            session_id: id.clone(),
        });
        info!(session_id = %id, "session created");
        self.store(session)
    }

    /// Creates a transport-only session for a tool client. Nothing is
    /// queued and no event is published; the caller hands the id out.
    pub fn create_client_session(&mut self) -> &mut Session {
        let id = self.mint_id();
        info!(session_id = %id, "client session created");
        let session = Session::new(id, SessionKind::Client, self.pulse.clone());
        self.store(session)
    }

    /// Resumes a link-dead session, or starts a fresh one.
    ///
    /// Resumes only if `session_id` names a live session that is link-dead
    /// and bound to `player_id`; anything else is treated as a first
    /// connect. A resumed session keeps its id. It replays, in order:
    /// `connect`, `login`, everything still undelivered, and a
    /// reconnect banner.
    ///
    /// The replay is appended as finished events, so lines that were
    /// already undelivered keep their own `display` event and the banner
    /// starts a new one. Coalescing applies from the banner onward.
    pub fn reconnect(&mut self, session_id: &SessionId, player_id: &PlayerId) -> &mut Session {
        let resumable = self
            .sessions
            .get(session_id)
            .is_some_and(|s| s.is_link_dead() && s.player_id() == Some(player_id));
        let taken = if resumable {
            self.sessions.remove(session_id)
        } else {
            None
        };
        let Some(mut session) = taken else {
            debug!(session_id = %session_id, %player_id, "session not resumable, starting fresh");
            return self.create_session();
        };

        let stale = session.pull_output();
        session.revive();
        session.append(OutputEvent::Connect(session_id.clone()));
        self.events.publish(SessionEvent::SessionConnect {
            session_id: session_id.clone(),
        });

        if let Identity::Player { user, player } = session.identity().clone() {
            let data = connect_data(&self.hooks, &user, Some(&player));
            session.append(OutputEvent::Login(data));
            self.events.publish(SessionEvent::UserConnect {
                session_id: session_id.clone(),
                user_id: user.id,
            });
            self.events.publish(SessionEvent::PlayerConnect {
                session_id: session_id.clone(),
                player_id: player.id,
            });
        }

        session.append_batch(stale);
        session.display_line(DisplayLine::system(RECONNECT_BANNER));
        info!(session_id = %session_id, %player_id, "session reconnected");
        self.store(session)
    }

    // ---- Identity ----

    /// Logs a user in on a session.
    ///
    /// The name is lowercased before it reaches the directory. Refusals
    /// are queued as `login_failure` notices. An account with exactly one
    /// player goes straight into play, as does a login by player name;
    /// otherwise the client gets `user_login` and picks a player with
    /// [`bind_player`](Self::bind_player).
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: unknown session
    /// - [`SessionError::IdentityMismatch`]: see `bind_player`
    pub fn authenticate(
        &mut self,
        session_id: &SessionId,
        user_name: &str,
        credential: &str,
    ) -> Result<(), SessionError> {
        let user_name = user_name.to_lowercase();
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;

        if session.kind() == SessionKind::Client {
            session.append(OutputEvent::LoginFailure(CLIENT_SESSION_LOGIN.to_string()));
            return Ok(());
        }
        if let Some(current) = session.player_id() {
            let notice = format!("Already playing {current}");
            session.append(OutputEvent::LoginFailure(notice));
            return Ok(());
        }

        let user = match self.directory.validate_user(&user_name, credential) {
            Ok(user) => user,
            Err(e) => {
                match &e {
                    IdentityError::InvalidCredential => {
                        info!(%session_id, %user_name, "login rejected");
                    }
                    IdentityError::Unavailable(reason) => {
                        warn!(%session_id, %user_name, %reason, "identity directory unavailable");
                    }
                }
                session.append(OutputEvent::LoginFailure(e.to_string()));
                return Ok(());
            }
        };
        session.connect_user(user.clone());
        info!(%session_id, user_id = %user.id, "user authenticated");

        if let [only] = user.player_ids.as_slice() {
            let only = only.clone();
            return self.bind_player(session_id, &only);
        }
        if user_name != user.user_name {
            return self.bind_player(session_id, &PlayerId::new(&user_name));
        }

        let data = connect_data(&self.hooks, &user, None);
        self.events.publish(SessionEvent::UserConnect {
            session_id: session_id.clone(),
            user_id: user.id,
        });
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.append(OutputEvent::UserLogin(data));
        }
        Ok(())
    }

    /// Puts a player into play on a session whose user is logged in.
    ///
    /// If the player is bound to another session, that session loses the
    /// binding and gets exactly one `logout: other_location`; this one
    /// gets a takeover banner. Otherwise the directory's `login_player`
    /// hook runs and the player is welcomed. Either way the client gets
    /// `login` and a presence broadcast follows.
    ///
    /// Soft failures (no user, unknown player, already playing someone
    /// else) are queued as `login_failure` notices.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: unknown session
    /// - [`SessionError::IdentityMismatch`]: the player belongs to a
    ///   different user. Checked before anything is changed.
    pub fn bind_player(
        &mut self,
        session_id: &SessionId,
        player_id: &PlayerId,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;

        let Some(user) = session.user().cloned() else {
            session.append(OutputEvent::LoginFailure(NOT_LOGGED_IN.to_string()));
            return Ok(());
        };
        if let Some(current) = session.player_id() {
            if current != player_id {
                let notice = format!("Already playing {current}");
                session.append(OutputEvent::LoginFailure(notice));
            }
            return Ok(());
        }
        let Some(player) = self.directory.find_player(player_id) else {
            session.append(OutputEvent::LoginFailure(format!("No player named {player_id}")));
            return Ok(());
        };
        if player.user_id != user.id {
            error!(
                %session_id,
                player_id = %player.id,
                player_user = %player.user_id,
                session_user = %user.id,
                "player does not belong to session user"
            );
            return Err(SessionError::IdentityMismatch {
                player_id: player.id,
                user_id: user.id,
            });
        }

        // One session per player: take the binding away from the old one.
        let mut took_over = false;
        let previous = self
            .player_sessions
            .get(&player.id)
            .filter(|&id| id != session_id)
            .cloned();
        if let Some(old_id) = previous {
            if let Some(old) = self.sessions.get_mut(&old_id) {
                old.take_identity();
                old.append(OutputEvent::Logout(LogoutReason::OtherLocation));
                info!(session_id = %old_id, player_id = %player.id, "player evicted from session");
                took_over = true;
            }
        }
        let greeting = if took_over {
            TAKEOVER_BANNER.to_string()
        } else {
            self.directory.login_player(&player);
            format!("Welcome {}", player.name)
        };

        let data = connect_data(&self.hooks, &user, Some(&player));
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        session.connect_player(user.clone(), player.clone());
        session.display_line(DisplayLine::system(greeting));
        session.append(OutputEvent::Login(data));
        if let Some(info) = session.presence(Instant::now()) {
            self.presence.insert(player.id.clone(), info);
        }
        self.player_sessions.insert(player.id.clone(), session_id.clone());

        self.events.publish(SessionEvent::UserConnect {
            session_id: session_id.clone(),
            user_id: user.id,
        });
        self.events.publish(SessionEvent::PlayerConnect {
            session_id: session_id.clone(),
            player_id: player.id.clone(),
        });
        info!(%session_id, player_id = %player.id, "player bound");

        self.broadcast_status();
        Ok(())
    }

    /// Logs the user out of a session. The transport session stays.
    ///
    /// If a player was bound it leaves play: the client gets
    /// `logout: logout`, the binding and roster entry go, and presence is
    /// rebroadcast. Logging out an unbound session does nothing.
    ///
    /// # Errors
    /// [`SessionError::NotFound`]: unknown session
    pub fn logout(&mut self, session_id: &SessionId) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;

        let Identity::Player { player, .. } = session.take_identity() else {
            return Ok(());
        };
        session.append(OutputEvent::Logout(LogoutReason::Logout));
        self.release_player(session_id, &player);
        info!(%session_id, player_id = %player.id, "player logged out");

        self.broadcast_status();
        Ok(())
    }

    /// Drops a player's binding, roster entry, and directory presence.
    fn release_player(&mut self, session_id: &SessionId, player: &PlayerRecord) {
        self.directory.logout_player(player);
        if self.player_sessions.get(&player.id) == Some(session_id) {
            self.player_sessions.remove(&player.id);
        }
        self.presence.remove(&player.id);
        self.events.publish(SessionEvent::PlayerLogout {
            session_id: session_id.clone(),
            player_id: player.id.clone(),
        });
    }

    // ---- Transport ----

    /// Attaches a long-poll request to a session.
    ///
    /// An unknown session gets `[link_status: session_not_found]` right
    /// away. Returns `true` if the request was attached.
    pub fn attach(&mut self, session_id: &SessionId, request: LinkRequest) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.attach_request(request);
                true
            }
            None => {
                debug!(%session_id, request = %request.id(), "link for unknown session");
                let _ = request.resolve(LinkError::SessionNotFound.into_batch());
                false
            }
        }
    }

    /// The client's connection closed before its request was answered.
    ///
    /// # Errors
    /// [`SessionError::NotFound`]: unknown session
    pub fn link_failed(&mut self, session_id: &SessionId, reason: &str) -> Result<(), SessionError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?
            .link_failed(reason);
        Ok(())
    }

    /// Takes a session's queued output.
    ///
    /// # Errors
    /// [`SessionError::NotFound`]: unknown session
    pub fn pull_output(&mut self, session_id: &SessionId) -> Result<Vec<OutputEvent>, SessionError> {
        Ok(self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?
            .pull_output())
    }

    // ---- Roster ----

    /// Subscribes a session to the live roster. The current roster is
    /// queued right away; fresh ones follow every broadcast.
    ///
    /// # Errors
    /// [`SessionError::NotFound`]: unknown session
    pub fn watch_roster(&mut self, session_id: &SessionId) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        session.append(OutputEvent::PlayerList(self.presence.clone()));
        self.roster_watchers.insert(session_id.clone());
        debug!(%session_id, "roster watch registered");
        Ok(())
    }

    /// Returns `true` if the session was watching.
    pub fn unwatch_roster(&mut self, session_id: &SessionId) -> bool {
        self.roster_watchers.remove(session_id)
    }

    // ---- Maintenance ----

    /// One link-health pass over every session.
    ///
    /// Per session, first match wins:
    /// 1. link-dead for longer than `link_dead_prune` → removed
    /// 2. request pending → link-dead if its client hung up, else a
    ///    `keep_alive` once it has been pending `link_idle_refresh`
    /// 3. no request for longer than `link_dead_interval` → link-dead
    pub fn refresh_link_status(&mut self) -> LinkReport {
        let now = Instant::now();
        let prune_after = self.config.link_dead_prune();
        let dead_after = self.config.link_dead_interval();
        let idle_refresh = self.config.link_idle_refresh();

        let mut report = LinkReport::default();
        for (id, session) in &mut self.sessions {
            if let Some(dead_at) = session.link_dead_at() {
                if now.saturating_duration_since(dead_at) > prune_after {
                    report.pruned.push(id.clone());
                }
            } else if session.has_request() {
                if session.request_closed() {
                    session.link_failed("client closed");
                    report.link_dead.push(id.clone());
                } else if now.saturating_duration_since(session.attached_at()) >= idle_refresh
                    && session.keep_alive()
                {
                    report.keep_alives += 1;
                }
            } else if now.saturating_duration_since(session.attached_at()) > dead_after {
                session.link_failed("timeout");
                report.link_dead.push(id.clone());
            }
        }

        report.pruned.sort();
        report.link_dead.sort();
        let mut players_left = false;
        for id in &report.pruned {
            players_left |= self.detach(id);
        }
        if players_left {
            self.broadcast_status();
        }

        if !report.pruned.is_empty() || !report.link_dead.is_empty() {
            debug!(
                pruned = report.pruned.len(),
                link_dead = report.link_dead.len(),
                keep_alives = report.keep_alives,
                "link status refreshed"
            );
        }
        report
    }

    /// Removes a session and every trace of it. Returns `true` if a
    /// player left play.
    fn detach(&mut self, session_id: &SessionId) -> bool {
        let Some(mut session) = self.sessions.remove(session_id) else {
            return false;
        };
        session.close();
        self.roster_watchers.remove(session_id);

        let player = match session.take_identity() {
            Identity::Player { player, .. } => Some(player),
            _ => None,
        };
        if let Some(player) = &player {
            self.release_player(session_id, player);
        }
        self.events.publish(SessionEvent::SessionDisconnect {
            session_id: session_id.clone(),
        });
        info!(%session_id, player_id = ?player.as_ref().map(|p| &p.id), "session pruned");
        player.is_some()
    }

    /// Recomputes presence for every bound player, publishes it, and
    /// queues it for roster watchers. Returns the roster size.
    pub fn broadcast_status(&mut self) -> usize {
        let now = Instant::now();
        for (player_id, session_id) in &self.player_sessions {
            if let Some(info) = self.sessions.get(session_id).and_then(|s| s.presence(now)) {
                self.presence.insert(player_id.clone(), info);
            }
        }

        self.events.publish(SessionEvent::PlayerList(self.presence.clone()));
        for watcher in &self.roster_watchers {
            if let Some(session) = self.sessions.get_mut(watcher) {
                session.append(OutputEvent::PlayerList(self.presence.clone()));
            }
        }
        trace!(players = self.presence.len(), watchers = self.roster_watchers.len(), "presence broadcast");
        self.presence.len()
    }

    /// Flushes queued output to every session waiting on the pulse that
    /// has a request pending. Returns how many batches went out.
    pub fn pulse(&mut self) -> usize {
        let waiting = self.pulse.subscribers();
        let mut delivered = 0;
        for id in &waiting {
            if let Some(session) = self.sessions.get_mut(id) {
                if session.try_deliver() {
                    delivered += 1;
                }
            }
        }
        trace!(waiting = waiting.len(), delivered, "pulse");
        delivered
    }

    // ---- Internals ----

    fn mint_id(&self) -> SessionId {
        loop {
            let id = SessionId::new(generate_token());
            if !self.sessions.contains_key(&id) {
                return id;
            }
            warn!("session id collision, retrying");
        }
    }

    fn store(&mut self, session: Session) -> &mut Session {
        match self.sessions.entry(session.id().clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(session);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(session),
        }
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("players", &self.player_sessions.len())
            .field("roster_watchers", &self.roster_watchers.len())
            .field("pulse", &self.pulse)
            .field("config", &self.config)
            .finish()
    }
}

/// Runs the connect hooks for a login payload.
fn connect_data(
    hooks: &[Arc<dyn ConnectHook>],
    user: &UserRecord,
    player: Option<&PlayerRecord>,
) -> ClientData {
    let mut data = ClientData::new();
    for hook in hooks {
        hook.user_connect(user, &mut data);
        if let Some(player) = player {
            hook.player_connect(player, &mut data);
        }
    }
    data
}

/// Generates a random 32-character hex string (128 bits of entropy).
///
/// The session id is the client's only credential for its session, so it
/// has to be unguessable.
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
