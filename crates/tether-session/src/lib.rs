//! Session lifecycle for Tether's long-polling clients.
//!
//! This crate owns everything that happens between a client's first
//! connect and the moment its session is pruned:
//!
//! 1. **Delivery**: buffering output and handing it to at most one
//!    pending long-poll per session ([`Session`])
//! 2. **Identity**: logging users in and binding players, one session
//!    per player ([`SessionRegistry`], [`IdentityDirectory`] trait)
//! 3. **Link health**: keep-alives, link-dead detection, reconnect, and
//!    pruning ([`SessionRegistry::refresh_link_status`])
//! 4. **Presence**: the roster of who is active, idle, or link-dead
//! 5. **Client services**: named subscriptions such as the live roster
//!    ([`ServiceTable`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Server runtime (above)  ← schedules maintenance, maps HTTP to registry calls
//!     ↕
//! Session Layer (this crate)  ← sessions, bindings, output queues
//!     ↕
//! Transport / Events / Protocol (below)  ← long-poll handles, pulse, wire types
//! ```

mod config;
mod error;
mod events;
mod identity;
mod presence;
mod registry;
mod service;
mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use events::{ConnectHook, SessionEvent};
pub use identity::{IdentityDirectory, IdentityError, InMemoryDirectory, PlayerRecord, UserRecord};
pub use presence::{IDLE_AFTER, presence_status};
pub use registry::{LinkReport, RECONNECT_BANNER, SessionRegistry, TAKEOVER_BANNER};
pub use service::{ClientService, ROSTER_SERVICE, RosterService, ServiceTable};
pub use session::{Identity, Session, SessionKind};
