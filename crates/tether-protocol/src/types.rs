//! Core protocol types for Tether's wire format.
//!
//! Everything a long-polling client reads comes out of this module: the
//! identity newtypes, the [`OutputEvent`] batch entries, and the request
//! bodies the transport boundary decodes.
//!
//! A response body is always a JSON array of output events, in the order
//! the server queued them:
//!
//! ```text
//! [
//!   {"connect": "5f0c..."},
//!   {"display": {"lines": [{"text": "Welcome Ayla", "display": "system"}]}},
//!   {"link_status": "good"}
//! ]
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Extra fields contributed by connect hooks to `login`/`user_login` events.
pub type ClientData = serde_json::Map<String, serde_json::Value>;

/// A partial status update. Later patches overwrite earlier fields.
pub type StatusPatch = serde_json::Map<String, serde_json::Value>;

/// Header carrying the session token on every request.
pub const SESSION_HEADER: &str = "x-tether-session";

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// An opaque session token.
///
/// The token doubles as the client's credential for its session, so the
/// `Display` impl only shows a short prefix. Use [`SessionId::as_str`]
/// when the full value is needed (responses, map keys).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The full token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        write!(f, "S-{}", &self.0[..end])
    }
}

/// A user account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// A player (character) identifier: the player's lowercase name.
///
/// Deserialization goes through [`PlayerId::new`], so ids typed by a
/// user in any case compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PlayerId(String);

impl PlayerId {
    /// Creates a player id, normalizing to lowercase.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PlayerId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<PlayerId> for String {
    fn from(value: PlayerId) -> Self {
        value.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Link status
// ---------------------------------------------------------------------------

/// Health of the long-poll link, reported in `link_status` events.
///
/// Serialized as a bare string: `"good"`, `"cancel"`, or an error code
/// such as `"session_not_found"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LinkStatus {
    /// The batch was delivered normally.
    Good,
    /// The request was superseded by a newer one.
    Cancel,
    /// The request could not be served.
    Error(String),
}

impl From<String> for LinkStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "good" => Self::Good,
            "cancel" => Self::Cancel,
            _ => Self::Error(value),
        }
    }
}

impl From<LinkStatus> for String {
    fn from(value: LinkStatus) -> Self {
        match value {
            LinkStatus::Good => "good".to_string(),
            LinkStatus::Cancel => "cancel".to_string(),
            LinkStatus::Error(code) => code,
        }
    }
}

/// Why a session lost its player binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// The player logged out.
    Logout,
    /// The same player logged in from another session.
    OtherLocation,
}

// ---------------------------------------------------------------------------
// Display lines
// ---------------------------------------------------------------------------

/// One line of text for the client's output pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayLine {
    pub text: String,
    /// Client-side style class (`"system"`, `"say"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl DisplayLine {
    /// A plain line with no style class.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            display: None,
        }
    }

    /// A line styled as a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            display: Some("system".to_string()),
        }
    }
}

/// The payload of a `display` event: every line queued in one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBatch {
    pub lines: Vec<DisplayLine>,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// How present a connected player currently is.
///
/// Serialized as the roster label the client shows verbatim:
/// `"Active"`, `"Idle: 3m"`, `"Link Dead"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Active,
    /// Whole minutes since the last client activity.
    Idle(u64),
    LinkDead,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("Active"),
            Self::Idle(minutes) => write!(f, "Idle: {minutes}m"),
            Self::LinkDead => f.write_str("Link Dead"),
        }
    }
}

impl Serialize for PresenceStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A roster entry, recomputed on every presence broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceInfo {
    pub status: PresenceStatus,
    pub name: String,
    #[serde(rename = "loc")]
    pub location: String,
}

/// The full roster, keyed by player id.
pub type PresenceSnapshot = BTreeMap<PlayerId, PresenceInfo>;

// ---------------------------------------------------------------------------
// OutputEvent
// ---------------------------------------------------------------------------

/// A single entry in an output batch.
///
/// Serde's default "externally tagged" representation gives exactly the
/// one-key objects the client dispatches on: `{"connect": "..."}`,
/// `{"keep_alive": true}`, and so on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputEvent {
    /// A session was created (or resumed); carries the full token.
    Connect(SessionId),
    /// A player is now bound to the session.
    Login(ClientData),
    /// The player binding was removed.
    Logout(LogoutReason),
    /// Link health marker.
    LinkStatus(LinkStatus),
    /// Display lines accumulated during one delivery cycle.
    Display(DisplayBatch),
    /// Merged status patch for one delivery cycle.
    Status(StatusPatch),
    /// Forces the client to re-poll before intermediaries drop the request.
    KeepAlive(bool),
    /// The user authenticated but has not selected a player yet.
    UserLogin(ClientData),
    /// Live roster.
    PlayerList(PresenceSnapshot),
    /// A soft login failure, shown to the user.
    LoginFailure(String),
}

impl OutputEvent {
    /// Shorthand for a `link_status` error code event.
    pub fn link_error(code: impl Into<String>) -> Self {
        Self::LinkStatus(LinkStatus::Error(code.into()))
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body of the connect endpoint. `player_id` is only meaningful together
/// with a session header (reconnect).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub player_id: Option<PlayerId>,
}

/// Body of the login endpoint: either credentials or a player selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub player_id: Option<PlayerId>,
}

/// Body of the action endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionRequest {
    pub action: String,
}

/// Body of the register/unregister endpoints: a client service by name,
/// plus whatever that service takes on registration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceRequest {
    pub service_id: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The client dispatches on the exact JSON shapes below, so these
    //! tests pin the serde attributes rather than round-tripping.

    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_id_display_hides_full_token() {
        let id = SessionId::new("0123456789abcdef0123456789abcdef");
        assert_eq!(id.to_string(), "S-01234567");
        assert_eq!(id.as_str().len(), 32);
    }

    #[test]
    fn test_session_id_display_short_token() {
        assert_eq!(SessionId::new("abc").to_string(), "S-abc");
    }

    #[test]
    fn test_player_id_is_lowercased() {
        assert_eq!(PlayerId::new("Ayla").as_str(), "ayla");
        let pid: PlayerId = serde_json::from_str("\"AYLA\"").unwrap();
        assert_eq!(pid, PlayerId::new("ayla"));
    }

    #[test]
    fn test_link_status_serializes_as_bare_string() {
        assert_eq!(serde_json::to_value(LinkStatus::Good).unwrap(), json!("good"));
        assert_eq!(serde_json::to_value(LinkStatus::Cancel).unwrap(), json!("cancel"));
        assert_eq!(
            serde_json::to_value(LinkStatus::Error("no_login".into())).unwrap(),
            json!("no_login")
        );
    }

    #[test]
    fn test_link_status_parses_error_codes() {
        let status: LinkStatus = serde_json::from_str("\"session_not_found\"").unwrap();
        assert_eq!(status, LinkStatus::Error("session_not_found".into()));
    }

    #[test]
    fn test_output_event_connect_json_format() {
        let event = OutputEvent::Connect(SessionId::new("abc"));
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({"connect": "abc"}));
    }

    #[test]
    fn test_output_event_keep_alive_json_format() {
        let event = OutputEvent::KeepAlive(true);
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({"keep_alive": true}));
    }

    #[test]
    fn test_output_event_logout_reason_is_snake_case() {
        let event = OutputEvent::Logout(LogoutReason::OtherLocation);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"logout": "other_location"})
        );
    }

    #[test]
    fn test_output_event_display_json_format() {
        let event = OutputEvent::Display(DisplayBatch {
            lines: vec![DisplayLine::system("hi"), DisplayLine::plain("there")],
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"display": {"lines": [
                {"text": "hi", "display": "system"},
                {"text": "there"}
            ]}})
        );
    }

    #[test]
    fn test_presence_status_labels() {
        assert_eq!(PresenceStatus::Active.to_string(), "Active");
        assert_eq!(PresenceStatus::Idle(3).to_string(), "Idle: 3m");
        assert_eq!(PresenceStatus::LinkDead.to_string(), "Link Dead");
    }

    #[test]
    fn test_player_list_json_format() {
        let mut roster = PresenceSnapshot::new();
        roster.insert(
            PlayerId::new("ayla"),
            PresenceInfo {
                status: PresenceStatus::Idle(2),
                name: "Ayla".into(),
                location: "Harbor".into(),
            },
        );
        let value = serde_json::to_value(OutputEvent::PlayerList(roster)).unwrap();
        assert_eq!(
            value,
            json!({"player_list": {"ayla": {"status": "Idle: 2m", "name": "Ayla", "loc": "Harbor"}}})
        );
    }

    #[test]
    fn test_login_request_accepts_partial_bodies() {
        let req: LoginRequest = serde_json::from_str(r#"{"player_id": "Ayla"}"#).unwrap();
        assert_eq!(req.player_id, Some(PlayerId::new("ayla")));
        assert!(req.user_id.is_none());

        let req: LoginRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, LoginRequest::default());
    }
}
