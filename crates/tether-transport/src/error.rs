//! Error types for the transport boundary.

use tether_protocol::OutputEvent;

use crate::RequestId;

/// Errors raised while serving a request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session dropped a long-poll without answering it (link marked
    /// dead, session pruned). The HTTP layer should just close.
    #[error("long-poll {0} abandoned without a reply")]
    Abandoned(RequestId),

    /// Encoding the reply failed.
    #[error(transparent)]
    Protocol(#[from] tether_protocol::ProtocolError),
}

/// A request that cannot be served by the session layer.
///
/// These are reported to the client in-band as a `link_status` error code
/// rather than as an HTTP error, so the client's link loop can react
/// (start a new session, show the login screen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The session header is missing or names no live session.
    #[error("session not found")]
    SessionNotFound,

    /// The endpoint needs a logged-in player.
    #[error("no player logged in")]
    NoLogin,
}

impl LinkError {
    /// The wire code sent as `link_status`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound => "session_not_found",
            Self::NoLogin => "no_login",
        }
    }

    /// The single-event batch reported to the client.
    pub fn into_batch(self) -> Vec<OutputEvent> {
        vec![OutputEvent::link_error(self.code())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::LinkStatus;

    #[test]
    fn test_link_error_codes() {
        assert_eq!(LinkError::SessionNotFound.code(), "session_not_found");
        assert_eq!(LinkError::NoLogin.code(), "no_login");
    }

    #[test]
    fn test_link_error_batch_is_single_link_status() {
        let batch = LinkError::NoLogin.into_batch();
        assert_eq!(
            batch,
            vec![OutputEvent::LinkStatus(LinkStatus::Error("no_login".into()))]
        );
    }
}
