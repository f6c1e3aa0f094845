//! Transport boundary for Tether.
//!
//! A long-poll is modeled as a one-shot channel: the HTTP task keeps the
//! [`LinkReceiver`] and awaits it, the session keeps the [`LinkRequest`]
//! and resolves it exactly once, when output is delivered or when a newer
//! request supersedes it. No thread ever blocks on a poll.
//!
//! ```text
//! HTTP task                       Session
//!   link_channel() ──────────────→ attach_request(LinkRequest)
//!   receiver.wait().await               │ (queued output / pulse)
//!        ↑                              ▼
//!        └──────── batch ─────── LinkRequest::resolve(batch)
//! ```
//!
//! [`Reply`] is the router-agnostic response for every other endpoint.

mod error;

pub use error::{LinkError, TransportError};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tether_protocol::{Codec, OutputEvent};
use tokio::sync::oneshot;

/// Counter for generating unique request IDs.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for one long-poll request, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates a new `RequestId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Creates a linked request/receiver pair for one long-poll.
pub fn link_channel() -> (LinkRequest, LinkReceiver) {
    let id = RequestId::new(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed));
    let (tx, rx) = oneshot::channel();
    tracing::trace!(%id, "long-poll request opened");
    (LinkRequest { id, tx }, LinkReceiver { id, rx })
}

/// The session's half of a long-poll: resolves it exactly once.
///
/// Consuming `self` in [`resolve`](Self::resolve) makes a second
/// resolution a compile error rather than a runtime check.
#[derive(Debug)]
pub struct LinkRequest {
    id: RequestId,
    tx: oneshot::Sender<Vec<OutputEvent>>,
}

impl LinkRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns `true` if the HTTP side already dropped its receiver
    /// (client disconnected, request timed out at an intermediary).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes the request with a batch.
    ///
    /// # Errors
    /// If the client is gone, the batch is handed back so the caller can
    /// re-queue it instead of losing output.
    pub fn resolve(self, batch: Vec<OutputEvent>) -> Result<(), Vec<OutputEvent>> {
        tracing::debug!(id = %self.id, events = batch.len(), "resolving long-poll");
        self.tx.send(batch)
    }
}

/// How a long-poll ended, from the HTTP task's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    /// The session resolved the request with this batch.
    Delivered(Vec<OutputEvent>),
    /// The session dropped the request without resolving it (link marked
    /// dead, session pruned). Nothing should be written.
    Abandoned,
}

/// The HTTP task's half of a long-poll.
#[derive(Debug)]
pub struct LinkReceiver {
    id: RequestId,
    rx: oneshot::Receiver<Vec<OutputEvent>>,
}

impl LinkReceiver {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Waits until the session resolves or abandons the request.
    pub async fn wait(self) -> LinkOutcome {
        match self.rx.await {
            Ok(batch) => LinkOutcome::Delivered(batch),
            Err(_) => LinkOutcome::Abandoned,
        }
    }

    /// Waits for the batch and encodes it as the response body.
    ///
    /// A long-poll always answers with a body, even `[]`.
    ///
    /// # Errors
    /// [`TransportError::Abandoned`] if the session dropped the request.
    pub async fn reply(self, codec: &impl Codec) -> Result<Reply, TransportError> {
        let id = self.id;
        match self.wait().await {
            LinkOutcome::Delivered(batch) => Reply::always(codec, &batch),
            LinkOutcome::Abandoned => Err(TransportError::Abandoned(id)),
        }
    }

    /// Builds a receiver that is already resolved with `batch`.
    ///
    /// Used when a request can be answered without touching a session,
    /// e.g. an unknown session header.
    pub fn ready(batch: Vec<OutputEvent>) -> Self {
        let (request, receiver) = link_channel();
        // The receiver is alive in this scope, so the send cannot fail.
        let _ = request.resolve(batch);
        receiver
    }
}

/// Router-agnostic response for request/response endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `200` with a JSON body.
    Json(Vec<u8>),
    /// `204 No Content`: nothing was queued.
    NoContent,
}

impl Reply {
    /// Encodes a batch, using `NoContent` for an empty one.
    pub fn from_batch(codec: &impl Codec, batch: &[OutputEvent]) -> Result<Self, TransportError> {
        if batch.is_empty() {
            return Ok(Self::NoContent);
        }
        Ok(Self::Json(codec.encode(&batch)?))
    }

    /// Encodes a batch and always produces a body, even `[]`.
    pub fn always(codec: &impl Codec, batch: &[OutputEvent]) -> Result<Self, TransportError> {
        Ok(Self::Json(codec.encode(&batch)?))
    }

    /// HTTP status code for this reply.
    pub fn status(&self) -> u16 {
        match self {
            Self::Json(_) => 200,
            Self::NoContent => 204,
        }
    }

    /// The response body (empty for `NoContent`).
    pub fn body(&self) -> &[u8] {
        match self {
            Self::Json(bytes) => bytes,
            Self::NoContent => &[],
        }
    }
}
