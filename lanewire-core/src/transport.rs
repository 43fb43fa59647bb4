//! Transport endpoint capability.
//!
//! A lane is backed by a [`TransportEndpoint`]: one hardware connection that
//! can be flushed, queue retries when it runs out of resources, and be
//! destroyed. The endpoint layer never calls back into itself from inside a
//! transport. Completions and pending retries are reported as [`LaneEvent`]s
//! over a channel and handled by the worker's progress loop.

use flume::Sender;

use crate::error::{LanewireError, Result};
use crate::lane::LaneIndex;
use crate::pool::RequestId;

/// Outcome of starting a flush on one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Nothing was outstanding, the lane is flushed.
    Complete,
    /// The transport will fire the completion later.
    InProgress,
}

/// Event reported by a transport to the worker.
#[derive(Debug)]
pub enum LaneEvent {
    /// A flush started with [`FlushStatus::InProgress`] finished.
    Completed {
        req: RequestId,
        result: Result<()>,
    },
    /// A queued flush retry ran on `lane`.
    PendingFlushed {
        req: RequestId,
        lane: LaneIndex,
        result: Result<FlushStatus>,
    },
}

impl LaneEvent {
    #[must_use]
    pub const fn request(&self) -> RequestId {
        match self {
            Self::Completed { req, .. } | Self::PendingFlushed { req, .. } => *req,
        }
    }
}

/// Completion handle shared by every lane of one request.
///
/// Firing it never touches worker state directly; it posts a
/// [`LaneEvent::Completed`] that the next progress call consumes.
#[derive(Debug, Clone)]
pub struct Completion {
    req: RequestId,
    events: Sender<LaneEvent>,
}

impl Completion {
    #[must_use]
    pub const fn new(req: RequestId, events: Sender<LaneEvent>) -> Self {
        Self { req, events }
    }

    #[inline]
    #[must_use]
    pub const fn request(&self) -> RequestId {
        self.req
    }

    /// Report that the flush this handle was passed to has finished.
    pub fn complete(&self, result: Result<()>) {
        // The worker is gone after shutdown; nobody is left to care.
        let _ = self.events.send(LaneEvent::Completed {
            req: self.req,
            result,
        });
    }

    fn pending_flushed(&self, lane: LaneIndex, result: Result<FlushStatus>) {
        let _ = self.events.send(LaneEvent::PendingFlushed {
            req: self.req,
            lane,
            result,
        });
    }
}

/// Work queued on a transport until it has resources again.
pub enum PendingRequest {
    /// Retry a flush of `lane` on behalf of a flush request.
    FlushRetry { completion: Completion, lane: LaneIndex },
    /// Any other operation queued by the layer above.
    Custom(Box<dyn FnMut(&mut dyn TransportEndpoint) -> Result<()> + Send>),
}

impl PendingRequest {
    /// Run the request against the transport it is queued on.
    ///
    /// `Err(NoResource)` means the request must stay queued. Any other result
    /// removes it from the queue.
    pub fn progress(&mut self, transport: &mut dyn TransportEndpoint) -> Result<()> {
        match self {
            Self::FlushRetry { completion, lane } => {
                let result = transport.flush(completion);
                let stays_queued = matches!(result, Err(LanewireError::NoResource));
                completion.pending_flushed(*lane, result);
                if stays_queued {
                    Err(LanewireError::NoResource)
                } else {
                    Ok(())
                }
            }
            Self::Custom(op) => op(transport),
        }
    }

    /// Request this retry belongs to, if it is a flush retry.
    #[must_use]
    pub const fn flush_request(&self) -> Option<RequestId> {
        match self {
            Self::FlushRetry { completion, .. } => Some(completion.request()),
            Self::Custom(_) => None,
        }
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FlushRetry { completion, lane } => f
                .debug_struct("FlushRetry")
                .field("req", &completion.request())
                .field("lane", lane)
                .finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// One lane's connection to the remote peer.
///
/// Implementations post hardware work; the endpoint layer only drives the
/// lifecycle through this trait.
pub trait TransportEndpoint: Send {
    /// Start flushing everything posted so far.
    ///
    /// Returns `Err(NoResource)` when the send queue is full; the caller then
    /// queues a [`PendingRequest`] with [`TransportEndpoint::pending_add`].
    fn flush(&mut self, completion: &Completion) -> Result<FlushStatus>;

    /// Queue `req` until resources free up.
    ///
    /// `Err(Busy)` means the queue cannot take it right now; the caller may
    /// retry later.
    fn pending_add(&mut self, req: PendingRequest) -> Result<()>;

    /// Remove every queued request, handing each to `purge`.
    fn pending_purge(&mut self, purge: &mut dyn FnMut(PendingRequest));

    /// Service hardware completions and run queued requests.
    ///
    /// Returns the number of events processed.
    fn progress(&mut self) -> usize {
        0
    }

    /// Release the connection.
    fn destroy(self: Box<Self>) {}
}
