//! Unified error type for Tether.

use tether_protocol::ProtocolError;
use tether_session::SessionError;
use tether_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `tether` crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so the `?`
/// operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// A transport-level error (abandoned long-poll, reply encoding).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (malformed request body).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (unknown session, identity mismatch, bad config).
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl TetherError {
    /// The HTTP status an adapter should answer with.
    ///
    /// Malformed requests are the client's fault (400). An abandoned
    /// long-poll has nobody left to answer (the adapter just closes; 410
    /// is only for logs). Everything else is a server fault.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Protocol(ProtocolError::Decode(_) | ProtocolError::InvalidMessage(_)) => 400,
            Self::Transport(TransportError::Abandoned(_)) => 410,
            Self::Session(SessionError::NotFound(_)) => 404,
            _ => 500,
        }
    }
}
