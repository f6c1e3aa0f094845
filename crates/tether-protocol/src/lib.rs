//! Wire protocol for Tether.
//!
//! This crate defines what travels between the long-polling browser
//! client and the server:
//!
//! - **Types** ([`OutputEvent`], [`SessionId`], [`PresenceInfo`], request
//!   bodies): the JSON shapes on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those are turned
//!   into bytes and back.
//! - **Errors** ([`ProtocolError`]).
//!
//! It knows nothing about sessions or timers; it only describes messages.

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ActionRequest, ClientData, ConnectRequest, DisplayBatch, DisplayLine, LinkStatus,
    LoginRequest, LogoutReason, OutputEvent, PlayerId, PresenceInfo, PresenceSnapshot,
    PresenceStatus, SESSION_HEADER, ServiceRequest, SessionId, StatusPatch, UserId,
};
