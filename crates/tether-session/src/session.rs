//! The per-session state machine: one client's link, output queue, and
//! identity.
//!
//! A session outlives any single HTTP request. It tracks:
//! - WHO is on the other end ([`Identity`])
//! - WHAT they haven't read yet (the output queue)
//! - HOW to reach them (at most one pending [`LinkRequest`])
//! - WHEN the link last looked healthy (attach, activity, link-dead times)
//!
//! # Transport sub-states
//!
//! ```text
//!                 attach_request()
//!   NoRequest ─────────────────────→ RequestPending
//!       │  ↑                              │
//!       │  └──── delivered / superseded ──┘
//!       │                                 │ client gone
//!       │ no request for too long         ▼
//!       └──────────────────────────→ LinkDead ──(attach_request)──→ RequestPending
//! ```
//!
//! # Delivery cycle
//!
//! Output accumulates between deliveries. Within one cycle all display
//! lines share a single `display` event and all status patches merge into
//! a single `status` event, each at the position where the first one was
//! queued. A delivery (to a pending request) or a pull (by a plain
//! request/response endpoint) drains the queue and starts a new cycle.

use std::fmt;
use std::mem;

use tether_events::{Pulse, PulseSubscription};
use tether_protocol::{
    DisplayBatch, DisplayLine, LinkStatus, OutputEvent, PlayerId, PresenceInfo, SessionId,
    StatusPatch,
};
use tether_transport::{LinkRequest, RequestId};
use tokio::time::Instant;
use tracing::debug;

use crate::presence::presence_status;
use crate::{PlayerRecord, UserRecord};

// ---------------------------------------------------------------------------
// Kind and identity
// ---------------------------------------------------------------------------

/// What a session is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// A player client: can log in and be bound to a player.
    Game,
    /// A tool client (editor, admin console): transport only, never bound.
    Client,
}

/// Who is logged in on a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    Unbound,
    /// Authenticated, no player selected yet.
    User(UserRecord),
    /// Playing.
    Player { user: UserRecord, player: PlayerRecord },
}

/// A slot in the output queue.
///
/// Display and status events are placeholders until the queue is
/// drained, so lines and patches added later in the same cycle still land
/// in the event that was queued first.
#[derive(Debug)]
enum Queued {
    Event(OutputEvent),
    Display,
    Status,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One client's session.
///
/// Sessions are created and owned by the
/// [`SessionRegistry`](crate::SessionRegistry); callers get `&mut Session`
/// for the duration of one operation. No method here fails: anything the
/// client should know about is queued as output.
pub struct Session {
    id: SessionId,
    kind: SessionKind,

    request: Option<LinkRequest>,
    attached_at: Instant,
    last_activity: Instant,
    link_dead_at: Option<Instant>,

    queue: Vec<Queued>,
    lines: Vec<DisplayLine>,
    status: Option<StatusPatch>,

    pulse: Pulse<SessionId>,
    pulse_sub: Option<PulseSubscription<SessionId>>,

    identity: Identity,
}

impl Session {
    pub(crate) fn new(id: SessionId, kind: SessionKind, pulse: Pulse<SessionId>) -> Self {
        let now = Instant::now();
        Self {
            id,
            kind,
            request: None,
            attached_at: now,
            last_activity: now,
            link_dead_at: None,
            queue: Vec::new(),
            lines: Vec::new(),
            status: None,
            pulse,
            pulse_sub: None,
            identity: Identity::Unbound,
        }
    }

    // ---- Transport ----

    /// Installs a new long-poll request.
    ///
    /// A request that is already pending is resolved with
    /// `[link_status: cancel]` first, so at most one is ever held. The
    /// link is considered healthy again from now on. If output is already
    /// queued it is delivered right away.
    pub fn attach_request(&mut self, request: LinkRequest) {
        self.attached_at = Instant::now();
        self.link_dead_at = None;
        if let Some(previous) = self.request.take() {
            debug!(session_id = %self.id, superseded = %previous.id(), by = %request.id(), "request superseded");
            // A superseded client that already left has nothing to lose.
            let _ = previous.resolve(vec![OutputEvent::LinkStatus(LinkStatus::Cancel)]);
        }
        self.request = Some(request);
        if !self.queue.is_empty() {
            self.try_deliver();
        }
    }

    /// Marks the link dead now and drops any pending request.
    ///
    /// The dropped request's receiver sees
    /// [`LinkOutcome::Abandoned`](tether_transport::LinkOutcome::Abandoned).
    pub fn link_failed(&mut self, reason: &str) {
        debug!(session_id = %self.id, reason, "link failed");
        self.link_dead_at = Some(Instant::now());
        self.request = None;
    }

    /// Delivers the queue to the pending request, if there is one.
    ///
    /// The batch gets a trailing `link_status: good`. If the client turns
    /// out to be gone, the batch goes back to the front of the queue and
    /// the link is marked dead: output is never dropped here.
    ///
    /// Returns `true` if a batch was delivered.
    pub(crate) fn try_deliver(&mut self) -> bool {
        let Some(request) = self.request.take() else {
            return false;
        };
        let request_id = request.id();
        let mut batch = self.drain();
        batch.push(OutputEvent::LinkStatus(LinkStatus::Good));
        self.pulse_sub = None;

        match request.resolve(batch) {
            Ok(()) => {
                debug!(session_id = %self.id, request = %request_id, "output delivered");
                true
            }
            Err(mut batch) => {
                batch.pop();
                self.requeue(batch);
                self.link_failed("client gone before delivery");
                false
            }
        }
    }

    // ---- Output ----

    /// Queues an event. `None` queues nothing but still makes sure the
    /// session is flushed on the next pulse.
    pub fn append(&mut self, event: impl Into<Option<OutputEvent>>) {
        if let Some(event) = event.into() {
            self.queue.push(Queued::Event(event));
        }
        self.subscribe_pulse();
    }

    /// Queues several events in order.
    pub fn append_batch(&mut self, events: impl IntoIterator<Item = OutputEvent>) {
        self.queue.extend(events.into_iter().map(Queued::Event));
        self.subscribe_pulse();
    }

    /// Queues a `keep_alive` unless one is already waiting in this
    /// cycle. Returns `true` if one was queued.
    pub fn keep_alive(&mut self) -> bool {
        let queued = self
            .queue
            .iter()
            .any(|slot| matches!(slot, Queued::Event(OutputEvent::KeepAlive(_))));
        if queued {
            return false;
        }
        self.append(OutputEvent::KeepAlive(true));
        true
    }

    /// Queues a line of text. All lines of one delivery cycle go out as a
    /// single `display` event.
    pub fn display_line(&mut self, line: DisplayLine) {
        if self.lines.is_empty() {
            self.queue.push(Queued::Display);
            self.subscribe_pulse();
        }
        self.lines.push(line);
    }

    /// Merges a status patch into this cycle's `status` event, creating
    /// it on first use. Later values win per field.
    pub fn update_status(&mut self, patch: StatusPatch) {
        match &mut self.status {
            Some(status) => status.extend(patch),
            None => {
                self.status = Some(patch);
                self.queue.push(Queued::Status);
                self.subscribe_pulse();
            }
        }
    }

    /// Takes everything queued, for a request/response endpoint.
    ///
    /// Counts as client activity for presence purposes.
    pub fn pull_output(&mut self) -> Vec<OutputEvent> {
        self.last_activity = Instant::now();
        self.pulse_sub = None;
        self.drain()
    }

    fn drain(&mut self) -> Vec<OutputEvent> {
        let mut lines = mem::take(&mut self.lines);
        let mut status = self.status.take();
        mem::take(&mut self.queue)
            .into_iter()
            .filter_map(|slot| match slot {
                Queued::Event(event) => Some(event),
                Queued::Display => Some(OutputEvent::Display(DisplayBatch {
                    lines: mem::take(&mut lines),
                })),
                Queued::Status => status.take().map(OutputEvent::Status),
            })
            .collect()
    }

    /// Puts an undelivered batch back in front of the queue.
    ///
    /// The batch's display and status events become this cycle's slots
    /// again, so output queued afterwards still joins them.
    fn requeue(&mut self, batch: Vec<OutputEvent>) {
        let stale = mem::take(&mut self.queue);
        for event in batch {
            match event {
                OutputEvent::Display(DisplayBatch { lines }) => {
                    if self.lines.is_empty() {
                        self.queue.push(Queued::Display);
                    }
                    self.lines.extend(lines);
                }
                OutputEvent::Status(patch) => match &mut self.status {
                    Some(status) => status.extend(patch),
                    None => {
                        self.status = Some(patch);
                        self.queue.push(Queued::Status);
                    }
                },
                event => self.queue.push(Queued::Event(event)),
            }
        }
        self.queue.extend(stale);
    }

    fn subscribe_pulse(&mut self) {
        if self.pulse_sub.is_none() {
            self.pulse_sub = Some(self.pulse.subscribe(self.id.clone()));
        }
    }

    // ---- Identity ----

    pub(crate) fn connect_user(&mut self, user: UserRecord) {
        self.identity = Identity::User(user);
        self.last_activity = Instant::now();
    }

    pub(crate) fn connect_player(&mut self, user: UserRecord, player: PlayerRecord) {
        self.identity = Identity::Player { user, player };
        self.last_activity = Instant::now();
    }

    pub(crate) fn take_identity(&mut self) -> Identity {
        mem::take(&mut self.identity)
    }

    /// Clears the link-dead state for a resumed session.
    pub(crate) fn revive(&mut self) {
        self.attached_at = Instant::now();
        self.link_dead_at = None;
    }

    /// Drops the pending request and pulse subscription. Used on prune.
    pub(crate) fn close(&mut self) {
        self.request = None;
        self.pulse_sub = None;
    }

    // ---- Accessors ----

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user(&self) -> Option<&UserRecord> {
        match &self.identity {
            Identity::Unbound => None,
            Identity::User(user) | Identity::Player { user, .. } => Some(user),
        }
    }

    pub fn player(&self) -> Option<&PlayerRecord> {
        match &self.identity {
            Identity::Player { player, .. } => Some(player),
            _ => None,
        }
    }

    /// Mutable access to the bound player, e.g. to move it.
    pub fn player_mut(&mut self) -> Option<&mut PlayerRecord> {
        match &mut self.identity {
            Identity::Player { player, .. } => Some(player),
            _ => None,
        }
    }

    pub fn player_id(&self) -> Option<&PlayerId> {
        self.player().map(|p| &p.id)
    }

    pub fn has_request(&self) -> bool {
        self.request.is_some()
    }

    /// Id of the pending request, if any.
    pub fn pending_request_id(&self) -> Option<RequestId> {
        self.request.as_ref().map(LinkRequest::id)
    }

    /// `true` if a request is pending but its client already hung up.
    pub fn request_closed(&self) -> bool {
        self.request.as_ref().is_some_and(LinkRequest::is_closed)
    }

    pub fn is_link_dead(&self) -> bool {
        self.link_dead_at.is_some()
    }

    pub fn link_dead_at(&self) -> Option<Instant> {
        self.link_dead_at
    }

    pub fn attached_at(&self) -> Instant {
        self.attached_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Number of queued events (a display or status slot counts once).
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending_output(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn is_pulse_subscribed(&self) -> bool {
        self.pulse_sub.is_some()
    }

    /// The roster entry for the bound player, or `None` if no player is
    /// bound.
    pub fn presence(&self, now: Instant) -> Option<PresenceInfo> {
        let player = self.player()?;
        Some(PresenceInfo {
            status: presence_status(now, self.link_dead_at, self.last_activity),
            name: player.name.clone(),
            location: player.location.clone(),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id.to_string())
            .field("kind", &self.kind)
            .field("has_request", &self.has_request())
            .field("link_dead", &self.is_link_dead())
            .field("pending", &self.queue.len())
            .field("player", &self.player_id())
            .finish()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_protocol::{PresenceStatus, UserId};
    use tether_transport::{LinkOutcome, link_channel};

    // -- Helpers ----------------------------------------------------------

    fn session() -> (Session, Pulse<SessionId>) {
        let pulse = Pulse::new();
        let session = Session::new(SessionId::new("s1"), SessionKind::Game, pulse.clone());
        (session, pulse)
    }

    fn patch(value: serde_json::Value) -> StatusPatch {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("status patch must be an object"),
        }
    }

    fn records() -> (UserRecord, PlayerRecord) {
        let user = UserRecord {
            id: UserId(1),
            user_name: "ayla".into(),
            player_ids: vec![PlayerId::new("ayla")],
        };
        let player = PlayerRecord {
            id: PlayerId::new("ayla"),
            user_id: UserId(1),
            name: "Ayla".into(),
            location: "the docks".into(),
        };
        (user, player)
    }

    async fn delivered(receiver: tether_transport::LinkReceiver) -> Vec<OutputEvent> {
        match receiver.wait().await {
            LinkOutcome::Delivered(batch) => batch,
            LinkOutcome::Abandoned => panic!("request was abandoned"),
        }
    }

    // =====================================================================
    // append() / pull_output()
    // =====================================================================

    #[test]
    fn test_pull_output_preserves_append_order() {
        let (mut s, _pulse) = session();
        s.append(OutputEvent::KeepAlive(true));
        s.append(OutputEvent::LoginFailure("a".into()));
        s.append(OutputEvent::LoginFailure("b".into()));

        assert_eq!(
            s.pull_output(),
            vec![
                OutputEvent::KeepAlive(true),
                OutputEvent::LoginFailure("a".into()),
                OutputEvent::LoginFailure("b".into()),
            ]
        );
        assert!(s.pull_output().is_empty(), "queue is empty after a pull");
    }

    #[test]
    fn test_append_subscribes_to_pulse_once() {
        let (mut s, pulse) = session();
        s.append(OutputEvent::KeepAlive(true));
        s.append(OutputEvent::KeepAlive(true));
        assert_eq!(pulse.subscribers(), vec![SessionId::new("s1")]);
    }

    #[test]
    fn test_append_none_subscribes_without_queueing() {
        let (mut s, pulse) = session();
        s.append(None);
        assert!(!s.has_pending_output());
        assert!(pulse.is_subscribed(&SessionId::new("s1")));
    }

    #[test]
    fn test_pull_output_drops_pulse_subscription() {
        let (mut s, pulse) = session();
        s.append(OutputEvent::KeepAlive(true));
        s.pull_output();
        assert!(pulse.is_empty());
        assert!(!s.is_pulse_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_output_stamps_activity() {
        let (mut s, _pulse) = session();
        tokio::time::advance(std::time::Duration::from_secs(30)).await;
        s.pull_output();
        assert_eq!(s.last_activity(), Instant::now());
    }

    // =====================================================================
    // display_line() / update_status()
    // =====================================================================

    #[test]
    fn test_display_lines_coalesce_into_one_event() {
        let (mut s, _pulse) = session();
        s.display_line(DisplayLine::plain("one"));
        s.display_line(DisplayLine::system("two"));

        assert_eq!(
            s.pull_output(),
            vec![OutputEvent::Display(DisplayBatch {
                lines: vec![DisplayLine::plain("one"), DisplayLine::system("two")],
            })]
        );
    }

    #[test]
    fn test_display_event_keeps_position_of_first_line() {
        let (mut s, _pulse) = session();
        s.display_line(DisplayLine::plain("one"));
        s.append(OutputEvent::KeepAlive(true));
        s.display_line(DisplayLine::plain("two"));

        let out = s.pull_output();
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], OutputEvent::Display(b) if b.lines.len() == 2));
        assert_eq!(out[1], OutputEvent::KeepAlive(true));
    }

    #[test]
    fn test_display_lines_start_new_event_after_pull() {
        let (mut s, _pulse) = session();
        s.display_line(DisplayLine::plain("one"));
        s.pull_output();
        s.display_line(DisplayLine::plain("two"));

        assert_eq!(
            s.pull_output(),
            vec![OutputEvent::Display(DisplayBatch {
                lines: vec![DisplayLine::plain("two")],
            })]
        );
    }

    #[test]
    fn test_update_status_merges_within_cycle() {
        let (mut s, _pulse) = session();
        s.update_status(patch(json!({"hp": 10, "mp": 3})));
        s.update_status(patch(json!({"hp": 7})));

        assert_eq!(
            s.pull_output(),
            vec![OutputEvent::Status(patch(json!({"hp": 7, "mp": 3})))]
        );
    }

    #[test]
    fn test_update_status_new_event_next_cycle() {
        let (mut s, _pulse) = session();
        s.update_status(patch(json!({"hp": 10})));
        s.pull_output();
        s.update_status(patch(json!({"hp": 9})));
        assert_eq!(s.pull_output(), vec![OutputEvent::Status(patch(json!({"hp": 9})))]);
    }

    // =====================================================================
    // attach_request() / try_deliver()
    // =====================================================================

    #[tokio::test]
    async fn test_attach_with_queued_output_delivers_immediately() {
        let (mut s, pulse) = session();
        s.append(OutputEvent::KeepAlive(true));

        let (request, receiver) = link_channel();
        s.attach_request(request);

        assert_eq!(
            delivered(receiver).await,
            vec![OutputEvent::KeepAlive(true), OutputEvent::LinkStatus(LinkStatus::Good)]
        );
        assert!(!s.has_request());
        assert!(pulse.is_empty());
    }

    #[tokio::test]
    async fn test_attach_with_empty_queue_waits() {
        let (mut s, _pulse) = session();
        let (request, _receiver) = link_channel();
        s.attach_request(request);
        assert!(s.has_request());
    }

    #[tokio::test]
    async fn test_second_attach_cancels_first() {
        let (mut s, _pulse) = session();
        let (first, first_rx) = link_channel();
        let (second, _second_rx) = link_channel();

        s.attach_request(first);
        s.attach_request(second);

        assert_eq!(
            delivered(first_rx).await,
            vec![OutputEvent::LinkStatus(LinkStatus::Cancel)]
        );
        assert!(s.has_request(), "the second request is now pending");
    }

    #[tokio::test]
    async fn test_try_deliver_appends_link_good() {
        let (mut s, _pulse) = session();
        let (request, receiver) = link_channel();
        s.attach_request(request);
        s.display_line(DisplayLine::plain("hi"));

        assert!(s.try_deliver());
        let batch = delivered(receiver).await;
        assert_eq!(batch.last(), Some(&OutputEvent::LinkStatus(LinkStatus::Good)));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_try_deliver_without_request_keeps_queue() {
        let (mut s, _pulse) = session();
        s.append(OutputEvent::KeepAlive(true));
        assert!(!s.try_deliver());
        assert_eq!(s.pending_len(), 1);
    }

    #[test]
    fn test_try_deliver_to_gone_client_requeues_and_marks_dead() {
        let (mut s, _pulse) = session();
        let (request, receiver) = link_channel();
        s.attach_request(request);
        drop(receiver);

        s.append(OutputEvent::LoginFailure("first".into()));
        s.display_line(DisplayLine::plain("second"));
        assert!(!s.try_deliver());

        assert!(s.is_link_dead());
        assert!(!s.has_request());
        s.append(OutputEvent::LoginFailure("third".into()));
        assert_eq!(
            s.pull_output(),
            vec![
                OutputEvent::LoginFailure("first".into()),
                OutputEvent::Display(DisplayBatch {
                    lines: vec![DisplayLine::plain("second")],
                }),
                OutputEvent::LoginFailure("third".into()),
            ]
        );
    }

    #[test]
    fn test_try_deliver_to_gone_client_keeps_one_display_and_status() {
        let (mut s, _pulse) = session();
        let (request, receiver) = link_channel();
        s.attach_request(request);
        drop(receiver);

        s.update_status(patch(json!({"hp": 1, "mp": 4})));
        s.display_line(DisplayLine::plain("a"));
        assert!(!s.try_deliver());

        s.update_status(patch(json!({"hp": 2})));
        s.display_line(DisplayLine::plain("b"));
        assert_eq!(
            s.pull_output(),
            vec![
                OutputEvent::Status(patch(json!({"hp": 2, "mp": 4}))),
                OutputEvent::Display(DisplayBatch {
                    lines: vec![DisplayLine::plain("a"), DisplayLine::plain("b")],
                }),
            ]
        );
    }

    #[test]
    fn test_keep_alive_queued_once_per_cycle() {
        let (mut s, _pulse) = session();
        assert!(s.keep_alive());
        assert!(!s.keep_alive());
        assert_eq!(s.pull_output(), vec![OutputEvent::KeepAlive(true)]);

        assert!(s.keep_alive());
        assert_eq!(s.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_clears_link_dead() {
        let (mut s, _pulse) = session();
        s.link_failed("test");
        assert!(s.is_link_dead());

        let (request, _receiver) = link_channel();
        s.attach_request(request);
        assert!(!s.is_link_dead());
        assert_eq!(s.attached_at(), Instant::now());
    }

    #[tokio::test]
    async fn test_link_failed_abandons_request() {
        let (mut s, _pulse) = session();
        let (request, receiver) = link_channel();
        s.attach_request(request);

        s.link_failed("closed");
        assert_eq!(receiver.wait().await, LinkOutcome::Abandoned);
        assert!(s.is_link_dead());
    }

    #[test]
    fn test_request_closed_detects_hangup() {
        let (mut s, _pulse) = session();
        let (request, receiver) = link_channel();
        s.attach_request(request);
        assert!(!s.request_closed());
        drop(receiver);
        assert!(s.request_closed());
    }

    // =====================================================================
    // identity / presence()
    // =====================================================================

    #[test]
    fn test_presence_none_without_player() {
        let (mut s, _pulse) = session();
        assert!(s.presence(Instant::now()).is_none());
        let (user, _) = records();
        s.connect_user(user);
        assert!(s.presence(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_reports_player_and_status() {
        let (mut s, _pulse) = session();
        let (user, player) = records();
        s.connect_player(user, player);

        tokio::time::advance(std::time::Duration::from_secs(125)).await;
        let info = s.presence(Instant::now()).unwrap();
        assert_eq!(info.status, PresenceStatus::Idle(2));
        assert_eq!(info.name, "Ayla");
        assert_eq!(info.location, "the docks");
    }

    #[test]
    fn test_take_identity_unbinds() {
        let (mut s, _pulse) = session();
        let (user, player) = records();
        s.connect_player(user, player);
        assert_eq!(s.player_id(), Some(&PlayerId::new("ayla")));

        assert!(matches!(s.take_identity(), Identity::Player { .. }));
        assert_eq!(s.identity(), &Identity::Unbound);
        assert!(s.user().is_none());
    }
}
