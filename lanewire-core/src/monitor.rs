//! Endpoint event monitoring.
//!
//! Lifecycle and flush events are published to an optional observer instead
//! of being counted in global state.

use std::fmt;

use crate::config::ConfigIndex;
use crate::lane::{LaneIndex, LaneMap};
use crate::pool::RequestId;
use crate::PeerId;

/// Endpoint lifecycle and flush events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Endpoint allocated and inserted into the identity map.
    Created { peer_id: PeerId },

    /// Stub endpoint created for an unknown peer.
    StubCreated { peer_id: PeerId },

    /// Endpoint lanes bound and its configuration assigned.
    Wired { peer_id: PeerId, config: ConfigIndex },

    /// Flush or disconnect started over `lanes`.
    FlushStarted {
        peer_id: PeerId,
        req: RequestId,
        lanes: LaneMap,
    },

    /// One lane finished flushing; `remaining` lanes are left.
    LaneFlushed { req: RequestId, remaining: usize },

    /// The request queued a retry on `lane`.
    PendingRegistered { req: RequestId, lane: LaneIndex },

    /// Deferred work registered for the request.
    DeferredScheduled { req: RequestId },

    /// All lanes flushed and the flushed handler ran.
    Flushed { req: RequestId, deferred: bool },

    /// Disconnect finished but the peer is connected back, the endpoint stays.
    Retained { peer_id: PeerId },

    /// Endpoint removed and its lanes destroyed.
    Destroyed { peer_id: PeerId },
}

impl fmt::Display for EndpointEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { peer_id } => write!(f, "Created endpoint to {peer_id:#x}"),
            Self::StubCreated { peer_id } => write!(f, "Created stub endpoint to {peer_id:#x}"),
            Self::Wired { peer_id, config } => {
                write!(f, "Wired endpoint to {peer_id:#x} with config {config}")
            }
            Self::FlushStarted { peer_id, req, lanes } => {
                write!(f, "Flush {req} started on {peer_id:#x} lanes {lanes}")
            }
            Self::LaneFlushed { req, remaining } => {
                write!(f, "Flush {req} lane done, {remaining} remaining")
            }
            Self::PendingRegistered { req, lane } => {
                write!(f, "Flush {req} pending on lane[{lane}]")
            }
            Self::DeferredScheduled { req } => write!(f, "Flush {req} deferred"),
            Self::Flushed { req, deferred } => {
                write!(f, "Flush {req} complete ({})", if *deferred { "deferred" } else { "immediate" })
            }
            Self::Retained { peer_id } => write!(f, "Retained endpoint to {peer_id:#x}"),
            Self::Destroyed { peer_id } => write!(f, "Destroyed endpoint to {peer_id:#x}"),
        }
    }
}

/// Handle for receiving endpoint events.
pub type EndpointMonitor = flume::Receiver<EndpointEvent>;

/// Sender side, held by the worker.
pub type EndpointEventSender = flume::Sender<EndpointEvent>;

/// Creates a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (EndpointEventSender, EndpointMonitor) {
    flume::unbounded()
}

/// Optional destination for endpoint events.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<EndpointEventSender>);

impl EventSink {
    #[must_use]
    pub const fn new(sender: EndpointEventSender) -> Self {
        Self(Some(sender))
    }

    /// A sink that drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self(None)
    }

    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    /// Publish `event`. A disconnected observer is ignored.
    pub fn emit(&self, event: EndpointEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}
