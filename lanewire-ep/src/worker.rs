//! The worker: owner of endpoints, lane configurations and flush requests.
//!
//! All state changes happen on the caller's thread inside worker methods.
//! Transports never call back into the worker; they post [`LaneEvent`]s that
//! [`Worker::progress`] consumes in three phases:
//!
//! 1. drive every bound transport
//! 2. handle completion and pending-retry events (callback context)
//! 3. run deferred work registered before this phase started
//!
//! Nothing is freed in phase 2. Requests that finish there register a deferred
//! entry, and the flushed handler runs from phase 3.

use std::task::Poll;

use flume::{Receiver, Sender};
use lanewire_core::config::{ConfigIndex, ConfigRegistry, LaneConfig, LaneConfigKey};
use lanewire_core::error::{LanewireError, Result};
use lanewire_core::lane::{LaneIndex, LaneMap};
use lanewire_core::monitor::{create_monitor, EndpointEvent, EndpointMonitor, EventSink};
use lanewire_core::options::WorkerOptions;
use lanewire_core::pool::{RequestId, RequestPool};
use lanewire_core::resource::ResourceTable;
use lanewire_core::transport::{LaneEvent, PendingRequest, TransportEndpoint};
use lanewire_core::PeerId;
use tracing::{debug, error, trace, warn};

use crate::deferred::{DeferredQueue, DeferredWork};
use crate::endpoint::{EpHandle, Endpoint};
use crate::flush::{FlushRequest, FlushedHandler, Scan};
use crate::registry::EndpointRegistry;
use crate::stub::{forward_pending, Refused};
use crate::wireup::{AddressEntry, EndpointParams, Wireup};

/// How pending queues are emptied when a lane is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purge {
    /// Every request should have been flushed; finding one is a bug.
    Strict,
    /// Queued requests are canceled.
    Cancel,
}

pub struct Worker {
    configs: ConfigRegistry,
    empty_config: ConfigIndex,
    stub_config: ConfigIndex,
    endpoints: EndpointRegistry,
    requests: RequestPool<FlushRequest>,
    deferred: DeferredQueue,
    events_tx: Sender<LaneEvent>,
    events_rx: Receiver<LaneEvent>,
    wireup: Box<dyn Wireup>,
    sink: EventSink,
}

impl Worker {
    /// Create a worker over the given local resources.
    ///
    /// The empty and stub lane configurations are interned up front, so every
    /// endpoint has a valid configuration from the moment it exists.
    pub fn new(
        options: WorkerOptions,
        resources: ResourceTable,
        wireup: impl Wireup + 'static,
    ) -> Result<Self> {
        let endpoints = EndpointRegistry::with_capacity(options.max_endpoints, options.est_num_eps);
        let requests = RequestPool::new(options.max_requests);

        let mut configs = ConfigRegistry::new(options, resources);
        let empty_config = configs.intern(&LaneConfigKey::empty())?;
        let stub_config = configs.intern(&LaneConfigKey::stub())?;

        let (events_tx, events_rx) = flume::unbounded();
        debug!(
            "[WORKER] created with {} resources, up to {} endpoints",
            configs.resources().len(),
            configs.options().max_endpoints
        );

        Ok(Self {
            configs,
            empty_config,
            stub_config,
            endpoints,
            requests,
            deferred: DeferredQueue::new(),
            events_tx,
            events_rx,
            wireup: Box::new(wireup),
            sink: EventSink::disabled(),
        })
    }

    /// Start publishing endpoint events. A previous monitor stops receiving.
    pub fn monitor(&mut self) -> EndpointMonitor {
        let (tx, rx) = create_monitor();
        self.sink = EventSink::new(tx);
        rx
    }

    #[must_use]
    pub const fn options(&self) -> &WorkerOptions {
        self.configs.options()
    }

    #[must_use]
    pub const fn configs(&self) -> &ConfigRegistry {
        &self.configs
    }

    #[must_use]
    pub fn endpoint(&self, handle: EpHandle) -> Option<&Endpoint> {
        self.endpoints.get(handle)
    }

    pub fn endpoint_mut(&mut self, handle: EpHandle) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(handle)
    }

    #[must_use]
    pub fn find_endpoint(&self, peer_id: PeerId) -> Option<&Endpoint> {
        self.endpoints.find(peer_id)
    }

    #[must_use]
    pub fn num_endpoints(&self) -> usize {
        self.endpoints.len()
    }

    /// Lane configuration of an endpoint.
    #[must_use]
    pub fn config(&self, handle: EpHandle) -> Option<&LaneConfig> {
        self.endpoints.get(handle).map(|ep| self.configs.get(ep.config()))
    }

    /// Lane 0 of the endpoint has no resource yet.
    #[must_use]
    pub fn is_stub(&self, handle: EpHandle) -> bool {
        self.config(handle).is_some_and(|config| config.key.is_stub())
    }

    #[must_use]
    pub fn request(&self, id: RequestId) -> Option<&FlushRequest> {
        self.requests.get(id)
    }

    /// Requests allocated and not yet freed.
    #[must_use]
    pub fn num_requests(&self) -> usize {
        self.requests.len()
    }

    // ========================================================================
    // Endpoint creation
    // ========================================================================

    /// Connect to the worker whose packed address is in `params`.
    ///
    /// If an endpoint to that peer exists it is returned as-is, even when its
    /// wireup has not finished.
    pub fn create_endpoint(&mut self, params: &EndpointParams) -> Result<EpHandle> {
        let Some(address) = params.address.as_ref() else {
            error!("[EP] remote address is missing");
            return Err(LanewireError::invalid_param("remote address is missing"));
        };

        let remote = self.wireup.unpack_address(address).map_err(|e| {
            error!("[EP] failed to unpack remote address: {}", e);
            e
        })?;

        if let Some(ep) = self.endpoints.find(remote.peer_id) {
            debug!("[EP] returning existing endpoint {}", ep.handle());
            return Ok(ep.handle());
        }

        let (ep, _) = self.endpoints.create_or_get(
            remote.peer_id,
            Some(&remote.peer_name),
            self.empty_config,
        )?;
        let handle = ep.handle();
        self.sink.emit(EndpointEvent::Created {
            peer_id: remote.peer_id,
        });

        if let Err(e) = self.wire(handle, &remote.entries) {
            error!("[EP] failed to wire up {}: {}", handle, e);
            self.destroy_endpoint(handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Endpoint for a peer that connected to us before we knew its address.
    ///
    /// Work posted before [`Worker::wireup_endpoint`] is buffered on lane 0.
    pub fn create_stub_endpoint(&mut self, peer_id: PeerId, peer_name: Option<&str>) -> Result<EpHandle> {
        let (ep, created) = self.endpoints.create_stub(peer_id, peer_name, self.stub_config)?;
        let handle = ep.handle();
        if created {
            self.sink.emit(EndpointEvent::StubCreated { peer_id });
        }
        Ok(handle)
    }

    /// Bind real lanes to an endpoint, replacing its stub lane if it has one.
    ///
    /// Work buffered on the stub moves to the new lane 0. Flush retries it
    /// refuses go back to their request. Any other refused request is lost,
    /// and its error is returned even though the endpoint is wired.
    pub fn wireup_endpoint(&mut self, handle: EpHandle, entries: &[AddressEntry]) -> Result<()> {
        let ep = self
            .endpoints
            .get_mut(handle)
            .ok_or(LanewireError::NoSuchPeer(handle.peer_id()))?;
        if !ep.flags().stub {
            return self.wire(handle, entries);
        }

        let stub = ep.take_lane(0);
        if let Err(e) = self.wire(handle, entries) {
            error!("[EP] failed to wire up stub endpoint {}: {}", handle, e);
            self.restore_stub(handle, stub);
            return Err(e);
        }

        let Some(ep) = self.endpoints.get_mut(handle) else {
            return Err(LanewireError::NoSuchPeer(handle.peer_id()));
        };
        ep.flags_mut().stub = false;
        let mut refused = Refused::default();
        if let Some(mut stub) = stub {
            match ep.lane_mut(0) {
                Some(lane) => refused = forward_pending(stub.as_mut(), lane),
                None => stub.pending_purge(&mut |req| match req {
                    PendingRequest::FlushRetry { completion, lane } => {
                        refused.retries.push((completion, lane));
                    }
                    PendingRequest::Custom(_) => {
                        refused.dropped += 1;
                        refused.error.get_or_insert(LanewireError::InvalidLane(0));
                    }
                }),
            }
            stub.destroy();
        }
        debug!("[EP] stub endpoint {} wired up", handle);
        self.reclaim_refused(handle, refused)
    }

    /// Hand flush retries the wired lane refused back to their requests, and
    /// report other buffered work that was lost.
    fn reclaim_refused(&mut self, handle: EpHandle, refused: Refused) -> Result<()> {
        for (completion, lane) in refused.retries {
            let id = completion.request();
            let Some(req) = self.requests.get_mut(id) else {
                continue;
            };
            if !req.requeue_pending(lane) {
                continue;
            }
            debug!("[FLUSH] {}: retry of {} on lane[{}] was refused, rescanning", handle, id, lane);
            if req.deferred().is_none() {
                self.schedule(DeferredWork::Resume(id));
            }
        }

        match refused.error {
            Some(e) => {
                error!(
                    "[EP] {}: {} buffered requests refused by the wired lane: {}",
                    handle, refused.dropped, e
                );
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn wire(&mut self, handle: EpHandle, entries: &[AddressEntry]) -> Result<()> {
        let ep = self
            .endpoints
            .get_mut(handle)
            .ok_or(LanewireError::NoSuchPeer(handle.peer_id()))?;

        let key = self.wireup.init_lanes(ep, entries)?;
        let config = self.configs.intern(&key)?;
        ep.set_config(config);
        debug!("[EP] {} uses config {} ({} lanes)", handle, config, key.num_lanes());
        self.sink.emit(EndpointEvent::Wired {
            peer_id: handle.peer_id(),
            config,
        });

        if !ep.flags().local_connected {
            self.wireup.send_request(ep)?;
        }
        Ok(())
    }

    fn restore_stub(&mut self, handle: EpHandle, stub: Option<Box<dyn TransportEndpoint>>) {
        let Some(ep) = self.endpoints.get_mut(handle) else {
            return;
        };
        for lane in ep.bound_lanes().iter() {
            if let Some(transport) = ep.take_lane(lane) {
                transport.destroy();
            }
        }
        if let Some(stub) = stub {
            if let Err(e) = ep.bind_lane(0, stub) {
                error!("[EP] {}: failed to restore the stub lane: {}", handle, e);
            }
        }
        ep.set_config(self.stub_config);
    }

    // ========================================================================
    // Flush and disconnect
    // ========================================================================

    /// Flush every lane, then tear the endpoint down.
    ///
    /// Returns `Ok(None)` when everything finished right away, otherwise a
    /// request to poll with [`Worker::request_test`]. The endpoint stays alive
    /// after the flush if the peer has connected back to us.
    pub fn disconnect_nb(&mut self, handle: EpHandle) -> Result<Option<RequestId>> {
        self.start_flush(handle, FlushedHandler::Disconnect)
    }

    /// Flush every lane of the endpoint and keep it.
    pub fn flush_nb(&mut self, handle: EpHandle) -> Result<Option<RequestId>> {
        self.start_flush(handle, FlushedHandler::FlushOnly)
    }

    /// Disconnect and wait for the disconnect to finish.
    ///
    /// Failures are logged; the endpoint is gone afterwards unless the peer
    /// has connected back.
    pub fn destroy_endpoint(&mut self, handle: EpHandle) {
        debug!("[EP] destroy {}", handle);
        match self.disconnect_nb(handle) {
            Ok(None) => {}
            Ok(Some(req)) => {
                let status = loop {
                    self.progress();
                    if let Poll::Ready(status) = self.request_test(req) {
                        break status;
                    }
                };
                self.request_release(req);
                if let Err(e) = status {
                    warn!("[EP] disconnect of {} failed: {}", handle, e);
                }
            }
            Err(e) => warn!("[EP] failed to disconnect {}: {}", handle, e),
        }
    }

    fn start_flush(&mut self, handle: EpHandle, handler: FlushedHandler) -> Result<Option<RequestId>> {
        let ep = self
            .endpoints
            .get(handle)
            .ok_or(LanewireError::NoSuchPeer(handle.peer_id()))?;
        if let Some(req) = ep.flush_request() {
            debug!("[FLUSH] {}: {} is still outstanding", handle, req);
            return Err(LanewireError::Busy);
        }

        let num_lanes = self.flush_lane_count(ep);
        let id = self.requests.alloc(FlushRequest::new(handle, num_lanes, handler))?;
        if let Some(ep) = self.endpoints.get_mut(handle) {
            ep.set_flush_request(Some(id));
        }
        debug!("[FLUSH] {}: {:?} {} over {} lanes", handle, handler, id, num_lanes);
        self.sink.emit(EndpointEvent::FlushStarted {
            peer_id: handle.peer_id(),
            req: id,
            lanes: LaneMap::first_n(num_lanes),
        });

        match self.drive(id, |req, ep, events, sink| req.progress(id, ep, events, sink)) {
            Some((_, 0)) => {
                let status = self.requests.release(id).map_or(Ok(()), |req| req.status());
                if let Some(ep) = self.endpoints.get_mut(handle) {
                    ep.set_flush_request(None);
                }
                self.run_flushed_handler(handle, handler);
                self.sink.emit(EndpointEvent::Flushed { req: id, deferred: false });
                trace!("[FLUSH] {}: {} finished immediately: {:?}", handle, id, status);
                status.map(|()| None)
            }
            Some((Scan::Blocked, _)) => {
                self.schedule(DeferredWork::Resume(id));
                Ok(Some(id))
            }
            _ => {
                trace!("[FLUSH] {}: {} in progress", handle, id);
                Ok(Some(id))
            }
        }
    }

    /// Lanes a flush has to cover: every configured lane, plus any lane bound
    /// beyond them by a wireup that failed half way.
    fn flush_lane_count(&self, ep: &Endpoint) -> usize {
        let configured = self.configs.get(ep.config()).num_lanes();
        let bound = ep.bound_lanes().iter().last().map_or(0, |lane| lane as usize + 1);
        configured.max(bound)
    }

    /// Run one step of a request against its endpoint. Returns the scan
    /// result and the lanes left, or `None` for a stale or finished request.
    fn drive<F>(&mut self, id: RequestId, step: F) -> Option<(Scan, usize)>
    where
        F: FnOnce(&mut FlushRequest, &mut Endpoint, &Sender<LaneEvent>, &EventSink) -> Scan,
    {
        let req = self.requests.get_mut(id).filter(|req| !req.is_done())?;
        let handle = req.endpoint();
        let Some(ep) = self.endpoints.get_mut(handle) else {
            warn!("[FLUSH] {}: endpoint {} is gone", id, handle);
            req.abandon_unstarted(id, &self.sink);
            return Some((Scan::Stopped, req.remaining()));
        };

        let scan = step(req, ep, &self.events_tx, &self.sink);
        Some((scan, req.remaining()))
    }

    /// Register `work` as the request's single deferred entry.
    fn schedule(&mut self, work: DeferredWork) {
        let id = work.request();
        let Some(req) = self.requests.get_mut(id) else {
            return;
        };
        if let Some(old) = req.deferred() {
            self.deferred.unregister(old);
        }
        req.set_deferred(Some(self.deferred.register(work)));
        self.sink.emit(EndpointEvent::DeferredScheduled { req: id });
    }

    /// Decide what a request needs after a completion, retry or resume.
    fn reschedule(&mut self, id: RequestId, scan: Scan, from_pending: bool) {
        let Some(req) = self.requests.get(id) else {
            return;
        };

        if req.remaining() == 0 {
            trace!("[FLUSH] {}: all lanes flushed, deferring completion", id);
            self.schedule(DeferredWork::Flushed(id));
            return;
        }

        let lanes_left = !req.lanes().is_empty();
        if req.deferred().is_none() && (scan == Scan::Blocked || (from_pending && lanes_left)) {
            trace!("[FLUSH] {}: lanes {} left, resuming later", id, req.lanes());
            self.schedule(DeferredWork::Resume(id));
        }
    }

    fn handle_event(&mut self, event: LaneEvent) {
        let id = event.request();
        let (scan, from_pending) = match event {
            LaneEvent::Completed { req, result } => (
                self.drive(req, |r, ep, events, sink| r.on_completion(req, result, ep, events, sink)),
                false,
            ),
            LaneEvent::PendingFlushed { req, lane, result } => (
                self.drive(req, |r, ep, events, sink| r.on_pending(req, lane, result, ep, events, sink)),
                true,
            ),
        };

        match scan {
            Some((scan, _)) => self.reschedule(id, scan, from_pending),
            None => trace!("[FLUSH] dropping event for stale request {}", id),
        }
    }

    fn run_deferred(&mut self, work: DeferredWork) {
        match work {
            DeferredWork::Resume(id) => {
                if let Some(req) = self.requests.get_mut(id) {
                    req.set_deferred(None);
                }
                trace!("[FLUSH] resuming {}", id);
                if let Some((scan, _)) = self.drive(id, |req, ep, events, sink| req.progress(id, ep, events, sink)) {
                    self.reschedule(id, scan, false);
                }
            }
            DeferredWork::Flushed(id) => self.complete_flushed(id),
        }
    }

    /// Every lane of `id` is flushed: run its handler, then complete it.
    fn complete_flushed(&mut self, id: RequestId) {
        let Some(req) = self.requests.get_mut(id) else {
            return;
        };
        req.set_deferred(None);
        let handle = req.endpoint();
        let handler = req.handler();

        if let Some(ep) = self.endpoints.get_mut(handle) {
            ep.set_flush_request(None);
        }
        self.run_flushed_handler(handle, handler);

        let Some(req) = self.requests.get_mut(id) else {
            return;
        };
        req.finish(Ok(()));
        trace!("[FLUSH] {}: {} complete: {:?}", handle, id, req.status());
        let released = req.is_released();
        self.sink.emit(EndpointEvent::Flushed { req: id, deferred: true });
        if released {
            self.requests.release(id);
        }
    }

    fn run_flushed_handler(&mut self, handle: EpHandle, handler: FlushedHandler) {
        match handler {
            FlushedHandler::Disconnect => self.disconnected(handle),
            FlushedHandler::FlushOnly => trace!("[FLUSH] {}: flushed", handle),
        }
    }

    fn disconnected(&mut self, handle: EpHandle) {
        let Some(ep) = self.endpoints.get(handle) else {
            return;
        };

        if ep.flags().remote_connected {
            trace!("[EP] not destroying {} because of connection from remote", handle);
            self.sink.emit(EndpointEvent::Retained {
                peer_id: handle.peer_id(),
            });
            return;
        }

        if let Some(ep) = self.endpoints.remove(handle.peer_id()) {
            self.release_endpoint(ep, Purge::Strict);
        }
    }

    fn release_endpoint(&self, mut ep: Endpoint, purge: Purge) {
        let handle = ep.handle();
        for lane in ep.bound_lanes().iter() {
            let Some(mut transport) = ep.take_lane(lane) else {
                continue;
            };
            match purge {
                Purge::Strict => transport.pending_purge(&mut |req| strict_purge(handle, lane, &req)),
                Purge::Cancel => transport.pending_purge(&mut |req| {
                    debug!("[WORKER] canceling {:?} on {} lane[{}]", req, handle, lane);
                }),
            }
            trace!("[EP] destroy {} lane[{}]", handle, lane);
            transport.destroy();
        }

        debug!("[EP] destroyed endpoint {}", handle);
        self.sink.emit(EndpointEvent::Destroyed {
            peer_id: handle.peer_id(),
        });
    }

    // ========================================================================
    // Progress and requests
    // ========================================================================

    /// Drive transports, handle their events, then run deferred work.
    ///
    /// Returns the number of things that happened.
    pub fn progress(&mut self) -> usize {
        let mut count: usize = self.endpoints.iter_mut().map(Endpoint::progress_lanes).sum();

        while let Ok(event) = self.events_rx.try_recv() {
            count += 1;
            self.handle_event(event);
        }

        for entry in self.deferred.snapshot() {
            if let Some(work) = self.deferred.take(entry) {
                count += 1;
                self.run_deferred(work);
            }
        }

        count
    }

    /// Status of a request: pending, or its final result.
    pub fn request_test(&self, id: RequestId) -> Poll<Result<()>> {
        match self.requests.get(id) {
            Some(req) if req.is_done() => Poll::Ready(req.status()),
            Some(_) => Poll::Pending,
            None => Poll::Ready(Err(LanewireError::invalid_param(format!("unknown request {id}")))),
        }
    }

    /// Give a request back. An unfinished request is freed when it completes.
    pub fn request_release(&mut self, id: RequestId) {
        let Some(req) = self.requests.get_mut(id) else {
            return;
        };
        if req.is_done() {
            self.requests.release(id);
        } else {
            req.mark_released();
        }
    }

    /// Tear everything down without waiting for hardware.
    ///
    /// Deferred work is dropped, unfinished requests complete with
    /// [`LanewireError::Canceled`], queued retries are canceled and every
    /// endpoint is destroyed, including ones kept for a remote connection.
    pub fn shutdown(&mut self) {
        debug!(
            "[WORKER] shutdown: {} endpoints, {} requests",
            self.endpoints.len(),
            self.requests.len()
        );

        let dropped = self.deferred.clear();
        if !dropped.is_empty() {
            trace!("[WORKER] dropped deferred work {:?}", dropped);
        }

        for id in self.requests.ids() {
            let Some(req) = self.requests.get_mut(id) else {
                continue;
            };
            req.set_deferred(None);
            if !req.is_done() {
                req.finish(Err(LanewireError::Canceled));
            }
            if req.is_released() {
                self.requests.release(id);
            }
        }

        for ep in self.endpoints.drain() {
            self.release_endpoint(ep, Purge::Cancel);
        }

        for event in self.events_rx.drain() {
            trace!("[WORKER] dropping {:?} after shutdown", event);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn strict_purge(handle: EpHandle, lane: LaneIndex, req: &PendingRequest) {
    panic!("pending request {req:?} on {handle} lane[{lane}] should have been flushed");
}
