//! Flush/disconnect request state machine.
//!
//! A flush request drains every lane of an endpoint. Two sets drive it:
//!
//! - `lanes`: lanes on which a flush still has to be *started*
//! - `remaining`: lanes not yet *finished*
//!
//! Lanes are started in ascending order. A lane that reports no resources is
//! queued on its transport's pending queue, but only one lane per request may
//! hold such a retry at a time; later lanes wait until the slot is free.
//! `remaining` is decremented exactly once per lane, whatever the outcome.
//!
//! The state machine itself never frees anything. When `remaining` reaches
//! zero inside a completion or retry handler, the worker schedules deferred
//! work that runs the flushed handler outside that context.

use flume::Sender;
use lanewire_core::error::{LanewireError, Result};
use lanewire_core::lane::{LaneIndex, LaneMap};
use lanewire_core::monitor::{EndpointEvent, EventSink};
use lanewire_core::pool::RequestId;
use lanewire_core::transport::{Completion, FlushStatus, LaneEvent, PendingRequest};
use tracing::{error, trace};

use crate::deferred::DeferredId;
use crate::endpoint::{EpHandle, Endpoint};

/// What runs once every lane of a request is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushedHandler {
    /// Tear the endpoint down unless the peer connected back.
    Disconnect,
    /// Nothing; the caller only wanted the lanes drained.
    FlushOnly,
}

/// Result of one pass over the lanes still to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    /// Stopped because every lane was started, or the pending slot is taken,
    /// or a terminal error was recorded.
    Stopped,
    /// A pending queue refused the retry; the pass must be resumed later.
    Blocked,
}

#[derive(Debug)]
pub struct FlushRequest {
    ep: EpHandle,
    lanes: LaneMap,
    remaining: usize,
    pending_lane: Option<LaneIndex>,
    handler: FlushedHandler,
    status: Result<()>,
    deferred: Option<DeferredId>,
    done: bool,
    released: bool,
}

impl FlushRequest {
    pub(crate) fn new(ep: EpHandle, num_lanes: usize, handler: FlushedHandler) -> Self {
        Self {
            ep,
            lanes: LaneMap::first_n(num_lanes),
            remaining: num_lanes,
            pending_lane: None,
            handler,
            status: Ok(()),
            deferred: None,
            done: false,
            released: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn endpoint(&self) -> EpHandle {
        self.ep
    }

    /// Lanes on which a flush has not been started yet.
    #[inline]
    #[must_use]
    pub const fn lanes(&self) -> LaneMap {
        self.lanes
    }

    /// Lanes not finished yet.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }

    /// Lane holding this request's pending retry, if any.
    #[inline]
    #[must_use]
    pub const fn pending_lane(&self) -> Option<LaneIndex> {
        self.pending_lane
    }

    #[inline]
    #[must_use]
    pub const fn handler(&self) -> FlushedHandler {
        self.handler
    }

    #[inline]
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// First terminal error, or `Ok` so far.
    #[must_use]
    pub fn status(&self) -> Result<()> {
        self.status.clone()
    }

    pub(crate) const fn deferred(&self) -> Option<DeferredId> {
        self.deferred
    }

    pub(crate) fn set_deferred(&mut self, id: Option<DeferredId>) {
        self.deferred = id;
    }

    pub(crate) const fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }

    /// Record the final status. An earlier error is kept.
    pub(crate) fn finish(&mut self, status: Result<()>) {
        if self.status.is_ok() {
            self.status = status;
        }
        self.done = true;
    }

    fn record(&mut self, err: LanewireError) {
        if self.status.is_ok() {
            self.status = Err(err);
        }
    }

    fn lane_done(&mut self, id: RequestId, sink: &EventSink) {
        debug_assert!(self.remaining > 0, "{id}: lane finished twice");
        self.remaining = self.remaining.saturating_sub(1);
        sink.emit(EndpointEvent::LaneFlushed {
            req: id,
            remaining: self.remaining,
        });
    }

    /// The retry queued on `lane` was lost before it ran; start the lane
    /// over. Returns `false` if this request holds no retry there.
    pub(crate) fn requeue_pending(&mut self, lane: LaneIndex) -> bool {
        if self.done || self.pending_lane != Some(lane) {
            return false;
        }
        self.pending_lane = None;
        self.lanes.insert(lane);
        true
    }

    /// Give up on every lane not started yet.
    pub(crate) fn abandon_unstarted(&mut self, id: RequestId, sink: &EventSink) {
        let abandoned = self.lanes;
        self.lanes = LaneMap::empty();
        for _ in abandoned.iter() {
            self.lane_done(id, sink);
        }
    }

    fn fail(&mut self, id: RequestId, lane: LaneIndex, err: LanewireError, sink: &EventSink) {
        error!("[FLUSH] error during flush of lane[{}]: {}", lane, err);
        self.record(err);
        self.lanes.remove(lane);
        self.lane_done(id, sink);
        self.abandon_unstarted(id, sink);
    }

    /// Start flushes on the lanes still to start, in ascending order.
    pub(crate) fn progress(
        &mut self,
        id: RequestId,
        ep: &mut Endpoint,
        events: &Sender<LaneEvent>,
        sink: &EventSink,
    ) -> Scan {
        let handle = ep.handle();
        trace!(
            "[FLUSH] {}: progress flush {}, lanes {} count {}",
            handle,
            id,
            self.lanes,
            self.remaining
        );

        let completion = Completion::new(id, events.clone());
        while let Some(lane) = self.lanes.first() {
            let Some(transport) = ep.lane_mut(lane) else {
                self.lanes.remove(lane);
                self.lane_done(id, sink);
                continue;
            };

            let status = transport.flush(&completion);
            trace!("[FLUSH] {}: flushing lane[{}]: {:?}", handle, lane, status);
            match status {
                Ok(FlushStatus::Complete) => {
                    self.lanes.remove(lane);
                    self.lane_done(id, sink);
                }
                Ok(FlushStatus::InProgress) => {
                    self.lanes.remove(lane);
                }
                Err(LanewireError::NoResource) => {
                    if let Some(pending) = self.pending_lane {
                        trace!(
                            "[FLUSH] {}: not adding pending flush {} on lane[{}], \
                             already pending on lane[{}]",
                            handle,
                            id,
                            lane,
                            pending
                        );
                        break;
                    }

                    let retry = PendingRequest::FlushRetry {
                        completion: completion.clone(),
                        lane,
                    };
                    match transport.pending_add(retry) {
                        Ok(()) => {
                            trace!("[FLUSH] {}: added pending flush {} on lane[{}]", handle, id, lane);
                            self.pending_lane = Some(lane);
                            self.lanes.remove(lane);
                            sink.emit(EndpointEvent::PendingRegistered { req: id, lane });
                        }
                        Err(LanewireError::Busy) => {
                            trace!("[FLUSH] {}: pending queue of lane[{}] is busy", handle, lane);
                            return Scan::Blocked;
                        }
                        Err(e) => {
                            self.fail(id, lane, e, sink);
                            break;
                        }
                    }
                }
                Err(e) => {
                    self.fail(id, lane, e, sink);
                    break;
                }
            }
        }

        Scan::Stopped
    }

    /// A flush started earlier finished.
    pub(crate) fn on_completion(
        &mut self,
        id: RequestId,
        result: Result<()>,
        ep: &mut Endpoint,
        events: &Sender<LaneEvent>,
        sink: &EventSink,
    ) -> Scan {
        if let Err(e) = result {
            error!("[FLUSH] {}: flush completed with error: {}", ep.handle(), e);
            self.record(e);
        }
        self.lane_done(id, sink);
        self.progress(id, ep, events, sink)
    }

    /// The queued retry on `lane` ran.
    ///
    /// The scan runs while the slot is still held, so it never queues a second
    /// retry; the slot is released afterwards unless the retry stays queued.
    pub(crate) fn on_pending(
        &mut self,
        id: RequestId,
        lane: LaneIndex,
        result: Result<FlushStatus>,
        ep: &mut Endpoint,
        events: &Sender<LaneEvent>,
        sink: &EventSink,
    ) -> Scan {
        debug_assert_eq!(self.pending_lane, Some(lane));

        let still_queued = match result {
            Ok(FlushStatus::Complete) => {
                self.lane_done(id, sink);
                false
            }
            Ok(FlushStatus::InProgress) => false,
            Err(LanewireError::NoResource) => true,
            Err(e) => {
                error!("[FLUSH] {}: pending flush of lane[{}] failed: {}", ep.handle(), lane, e);
                self.record(e);
                self.lane_done(id, sink);
                false
            }
        };

        let scan = self.progress(id, ep, events, sink);
        if !still_queued {
            self.pending_lane = None;
        }
        scan
    }
}
