//! Shared test harness: scriptable transports and a wireup that binds them.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use lanewire_core::config::{LaneConfigKey, LaneKey};
use lanewire_core::error::{LanewireError, Result};
use lanewire_core::lane::{LaneIndex, MAX_LANES};
use lanewire_core::monitor::{EndpointEvent, EndpointMonitor};
use lanewire_core::options::WorkerOptions;
use lanewire_core::resource::{IfaceAttr, MdAttr, ResourceTable, TlResource};
use lanewire_core::transport::{Completion, FlushStatus, PendingRequest, TransportEndpoint};
use lanewire_core::PeerId;
use lanewire_ep::{AddressEntry, Endpoint, UnpackedAddress, Wireup, Worker};
use parking_lot::{Mutex, MutexGuard};

pub const OK: Result<FlushStatus> = Ok(FlushStatus::Complete);
pub const IN_PROGRESS: Result<FlushStatus> = Ok(FlushStatus::InProgress);
pub const NO_RESOURCE: Result<FlushStatus> = Err(LanewireError::NoResource);

#[derive(Default)]
pub struct LaneState {
    /// Results of successive `flush` calls; `Complete` once exhausted
    pub flush_script: VecDeque<Result<FlushStatus>>,
    /// Results of successive `pending_add` calls; `Ok` once exhausted
    pub add_script: VecDeque<Result<()>>,
    pub queued: VecDeque<PendingRequest>,
    /// Completions of flushes that returned `InProgress`
    pub inflight: Vec<Completion>,
    /// Keep queued requests from running on progress
    pub hold_pending: bool,
    /// Fire in-flight completions on progress
    pub auto_complete: bool,
    pub flushes: usize,
    pub destroyed: bool,
}

/// Test-side handle of a mock lane; the worker owns the transport half.
#[derive(Clone, Default)]
pub struct MockLane(Arc<Mutex<LaneState>>);

impl MockLane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(flush: &[Result<FlushStatus>]) -> Self {
        let lane = Self::new();
        lane.state().flush_script.extend(flush.iter().cloned());
        lane
    }

    pub fn state(&self) -> MutexGuard<'_, LaneState> {
        self.0.lock()
    }

    pub fn script_add(&self, results: &[Result<()>]) {
        self.state().add_script.extend(results.iter().cloned());
    }

    pub fn hold_pending(&self, hold: bool) {
        self.state().hold_pending = hold;
    }

    pub fn auto_complete(&self, auto: bool) {
        self.state().auto_complete = auto;
    }

    /// Fire every in-flight completion with `result`.
    pub fn complete_inflight(&self, result: Result<()>) -> usize {
        let inflight = std::mem::take(&mut self.state().inflight);
        for completion in &inflight {
            completion.complete(result.clone());
        }
        inflight.len()
    }

    pub fn queued_len(&self) -> usize {
        self.state().queued.len()
    }

    pub fn flushes(&self) -> usize {
        self.state().flushes
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    pub fn transport(&self) -> Box<dyn TransportEndpoint> {
        Box::new(MockTransport(self.clone()))
    }
}

struct MockTransport(MockLane);

impl TransportEndpoint for MockTransport {
    fn flush(&mut self, completion: &Completion) -> Result<FlushStatus> {
        let mut state = self.0.state();
        state.flushes += 1;
        let result = state.flush_script.pop_front().unwrap_or(OK);
        if result == IN_PROGRESS {
            state.inflight.push(completion.clone());
        }
        result
    }

    fn pending_add(&mut self, req: PendingRequest) -> Result<()> {
        let mut state = self.0.state();
        let result = state.add_script.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            state.queued.push_back(req);
        }
        result
    }

    fn pending_purge(&mut self, purge: &mut dyn FnMut(PendingRequest)) {
        let queued = std::mem::take(&mut self.0.state().queued);
        queued.into_iter().for_each(purge);
    }

    fn progress(&mut self) -> usize {
        let (queued, auto_complete) = {
            let mut state = self.0.state();
            if state.hold_pending {
                (VecDeque::new(), state.auto_complete)
            } else {
                (std::mem::take(&mut state.queued), state.auto_complete)
            }
        };

        let mut count = 0;
        let mut still_queued = VecDeque::new();
        for mut req in queued {
            count += 1;
            if req.progress(self).is_err() {
                still_queued.push_back(req);
            }
        }
        if auto_complete {
            count += self.0.complete_inflight(Ok(()));
        }

        let mut state = self.0.state();
        still_queued.extend(state.queued.drain(..));
        state.queued = still_queued;
        count
    }

    fn destroy(self: Box<Self>) {
        self.0.state().destroyed = true;
    }
}

#[derive(Default)]
pub struct WireupState {
    pub lanes: HashMap<PeerId, Vec<MockLane>>,
    pub handshakes: usize,
    /// Fail `init_lanes` after binding the first lane
    pub fail_init: bool,
    /// Bind a transport past the last lane slot
    pub bind_out_of_range: bool,
}

/// Binds the lanes registered for a peer, in order; lane 0 carries active
/// messages and wireup, every lane is an RMA lane.
#[derive(Clone, Default)]
pub struct MockWireup(Arc<Mutex<WireupState>>);

impl MockWireup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lanes(self, peer_id: PeerId, lanes: &[MockLane]) -> Self {
        self.0.lock().lanes.insert(peer_id, lanes.to_vec());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, WireupState> {
        self.0.lock()
    }

    pub fn handshakes(&self) -> usize {
        self.0.lock().handshakes
    }
}

/// Packed address of a peer as understood by [`MockWireup`].
pub fn address(peer_id: PeerId) -> Bytes {
    Bytes::copy_from_slice(&peer_id.to_le_bytes())
}

pub fn entries(num_lanes: usize) -> Vec<AddressEntry> {
    (0..num_lanes)
        .map(|i| AddressEntry::new("rc", 0, Bytes::from(vec![i as u8])))
        .collect()
}

impl Wireup for MockWireup {
    fn unpack_address(&self, address: &Bytes) -> Result<UnpackedAddress> {
        let bytes: [u8; 8] = address
            .as_ref()
            .try_into()
            .map_err(|_| LanewireError::invalid_param("bad address length"))?;
        let peer_id = PeerId::from_le_bytes(bytes);
        let num_lanes = self.0.lock().lanes.get(&peer_id).map_or(1, Vec::len);
        Ok(UnpackedAddress {
            peer_id,
            peer_name: format!("peer-{peer_id:x}"),
            entries: entries(num_lanes),
        })
    }

    fn init_lanes(&mut self, ep: &mut Endpoint, entries: &[AddressEntry]) -> Result<LaneConfigKey> {
        let mut state = self.0.lock();
        let lanes = state
            .lanes
            .entry(ep.peer_id())
            .or_insert_with(|| vec![MockLane::new()])
            .clone();

        if state.bind_out_of_range {
            ep.bind_lane(MAX_LANES as LaneIndex, MockLane::new().transport())?;
        }

        let mut key = LaneConfigKey::empty();
        for (i, (lane, entry)) in lanes.iter().zip(entries).enumerate() {
            ep.bind_lane(i as LaneIndex, lane.transport())?;
            key.lanes.push(LaneKey::new(0, entry.md_index));
            key.rma_lanes[i] = Some(i as LaneIndex);
            if state.fail_init {
                return Err(LanewireError::io("no route to peer"));
            }
        }
        key.am_lane = Some(0);
        key.wireup_lane = Some(0);
        Ok(key)
    }

    fn send_request(&mut self, _ep: &mut Endpoint) -> Result<()> {
        self.0.lock().handshakes += 1;
        Ok(())
    }
}

pub fn resources() -> ResourceTable {
    let mut table = ResourceTable::new();
    let md = table.add_md(MdAttr::default());
    table.add_resource(TlResource {
        dev_name: "mlx5_0:1".into(),
        tl_name: "rc".into(),
        md_index: md,
        p2p: true,
        iface: IfaceAttr::default(),
    });
    table
}

pub fn worker(wireup: MockWireup) -> Worker {
    Worker::new(WorkerOptions::default(), resources(), wireup).unwrap()
}

pub fn drain(monitor: &EndpointMonitor) -> Vec<EndpointEvent> {
    monitor.try_iter().collect()
}
