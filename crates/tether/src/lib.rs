//! # Tether
//!
//! Session lifecycle server for real-time clients on HTTP long-polling.
//!
//! Tether keeps one session per browser tab across any number of short
//! HTTP requests: it buffers output, answers at most one pending long-poll
//! per session, notices dead links, lets clients reconnect, keeps one
//! session per logged-in player, and broadcasts who is online. You bring
//! the HTTP router, the account store ([`IdentityDirectory`]) and the
//! command parser ([`CommandSink`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::prelude::*;
//!
//! # async fn run() -> Result<(), TetherError> {
//! let mut directory = InMemoryDirectory::new();
//! let user = directory.add_user("ayla", "hunter2");
//! directory.add_player(user, "Ayla", "the docks");
//!
//! let mut server = TetherServer::builder().build(directory);
//! server.start();
//!
//! let handler = server.handler();
//! let reply = handler.connect(None, b"").await?;
//! assert_eq!(reply.status(), 200);
//! # Ok(())
//! # }
//! ```
//!
//! [`IdentityDirectory`]: tether_session::IdentityDirectory
//! [`CommandSink`]: handler::CommandSink

mod error;
pub mod handler;
pub mod logging;
mod server;

pub use error::TetherError;
pub use server::{TetherServer, TetherServerBuilder};

pub mod prelude {
    //! Everything needed to run a server and write an HTTP adapter.

    pub use crate::handler::{CommandSink, EchoCommands, SessionHandler};
    pub use crate::{TetherError, TetherServer, TetherServerBuilder};
    pub use tether_events::EventBus;
    pub use tether_protocol::{
        ClientData, DisplayLine, OutputEvent, PlayerId, SESSION_HEADER, SessionId, StatusPatch,
        UserId,
    };
    pub use tether_session::{
        ClientService, ConnectHook, IdentityDirectory, IdentityError, InMemoryDirectory,
        PlayerRecord, ROSTER_SERVICE, Session, SessionConfig, SessionError, SessionEvent,
        SessionRegistry, UserRecord,
    };
    pub use tether_transport::{LinkOutcome, LinkReceiver, Reply};
}
