//! Endpoints.
//!
//! An endpoint is the worker's connection to one remote peer. It owns up to
//! [`MAX_LANES`] transport endpoints and refers to its shared lane
//! configuration by index.

use std::fmt;

use lanewire_core::config::ConfigIndex;
use lanewire_core::error::{LanewireError, Result};
use lanewire_core::lane::{LaneIndex, LaneMap, MAX_LANES};
use lanewire_core::pool::RequestId;
use lanewire_core::transport::TransportEndpoint;
use lanewire_core::PeerId;

/// Connection state of an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpFlags {
    /// Our side of the handshake is done.
    pub local_connected: bool,
    /// The peer has connected back to us.
    pub remote_connected: bool,
    /// Lane 0 is a placeholder until wireup completes.
    pub stub: bool,
}

/// Stable handle of an endpoint.
///
/// The serial distinguishes successive endpoints for the same peer, so a
/// handle kept past a destroy never resolves to a newer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpHandle {
    peer_id: PeerId,
    serial: u64,
}

impl EpHandle {
    pub(crate) const fn new(peer_id: PeerId, serial: u64) -> Self {
        Self { peer_id, serial }
    }

    #[inline]
    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    #[inline]
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for EpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep#{}({:#x})", self.serial, self.peer_id)
    }
}

type Lane = Option<Box<dyn TransportEndpoint>>;

pub struct Endpoint {
    handle: EpHandle,
    peer_name: Option<String>,
    config: ConfigIndex,
    lanes: [Lane; MAX_LANES],
    flags: EpFlags,
    /// Outstanding flush or disconnect on this endpoint
    flush: Option<RequestId>,
}

impl Endpoint {
    pub(crate) fn new(handle: EpHandle, peer_name: Option<String>, config: ConfigIndex) -> Self {
        Self {
            handle,
            peer_name,
            config,
            lanes: std::array::from_fn(|_| None),
            flags: EpFlags::default(),
            flush: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn handle(&self) -> EpHandle {
        self.handle
    }

    #[inline]
    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.handle.peer_id
    }

    #[must_use]
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> ConfigIndex {
        self.config
    }

    pub(crate) fn set_config(&mut self, config: ConfigIndex) {
        self.config = config;
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> EpFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut EpFlags {
        &mut self.flags
    }

    #[inline]
    #[must_use]
    pub const fn flush_request(&self) -> Option<RequestId> {
        self.flush
    }

    pub(crate) fn set_flush_request(&mut self, req: Option<RequestId>) {
        self.flush = req;
    }

    /// Transport bound to `lane`.
    #[must_use]
    pub fn lane(&self, lane: LaneIndex) -> Option<&dyn TransportEndpoint> {
        self.lanes.get(lane as usize)?.as_deref()
    }

    pub fn lane_mut(&mut self, lane: LaneIndex) -> Option<&mut (dyn TransportEndpoint + 'static)> {
        self.lanes.get_mut(lane as usize)?.as_deref_mut()
    }

    /// Bind `transport` to `lane`, returning the transport it replaces.
    ///
    /// A lane at or above [`MAX_LANES`] is rejected with
    /// [`LanewireError::InvalidLane`] and `transport` is destroyed.
    pub fn bind_lane(
        &mut self,
        lane: LaneIndex,
        transport: Box<dyn TransportEndpoint>,
    ) -> Result<Option<Box<dyn TransportEndpoint>>> {
        let Some(slot) = self.lanes.get_mut(lane as usize) else {
            transport.destroy();
            return Err(LanewireError::InvalidLane(lane));
        };
        Ok(slot.replace(transport))
    }

    /// Unbind the transport of `lane`.
    pub fn take_lane(&mut self, lane: LaneIndex) -> Option<Box<dyn TransportEndpoint>> {
        self.lanes.get_mut(lane as usize)?.take()
    }

    /// Lanes that currently have a transport.
    #[must_use]
    pub fn bound_lanes(&self) -> LaneMap {
        self.lanes
            .iter()
            .enumerate()
            .filter(|(_, lane)| lane.is_some())
            .map(|(i, _)| i as LaneIndex)
            .collect()
    }

    /// Drive every bound transport once.
    pub(crate) fn progress_lanes(&mut self) -> usize {
        self.lanes.iter_mut().flatten().map(|t| t.progress()).sum()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("handle", &self.handle)
            .field("peer_name", &self.peer_name)
            .field("config", &self.config)
            .field("lanes", &self.bound_lanes())
            .field("flags", &self.flags)
            .field("flush", &self.flush)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanewire_core::transport::{Completion, FlushStatus, PendingRequest};

    struct Nop;

    impl TransportEndpoint for Nop {
        fn flush(&mut self, _completion: &Completion) -> Result<FlushStatus> {
            Ok(FlushStatus::Complete)
        }

        fn pending_add(&mut self, _req: PendingRequest) -> Result<()> {
            Ok(())
        }

        fn pending_purge(&mut self, _purge: &mut dyn FnMut(PendingRequest)) {}
    }

    #[test]
    fn lane_binding() {
        let mut ep = Endpoint::new(EpHandle::new(0x42, 1), Some("peer".into()), 0);
        assert!(ep.bound_lanes().is_empty());

        assert!(ep.bind_lane(0, Box::new(Nop)).unwrap().is_none());
        assert!(ep.bind_lane(3, Box::new(Nop)).unwrap().is_none());
        assert!(ep.bind_lane(3, Box::new(Nop)).unwrap().is_some());
        assert_eq!(ep.bound_lanes().bits(), 0b1001);
        assert!(ep.lane(1).is_none());
        assert!(ep.lane(9).is_none());

        assert!(ep.take_lane(0).is_some());
        assert_eq!(ep.bound_lanes().bits(), 0b1000);
        assert_eq!(ep.peer_name(), Some("peer"));
    }

    #[test]
    fn lane_out_of_range_is_rejected() {
        let mut ep = Endpoint::new(EpHandle::new(0x42, 1), None, 0);
        let lane = MAX_LANES as LaneIndex;
        assert!(matches!(
            ep.bind_lane(lane, Box::new(Nop)),
            Err(LanewireError::InvalidLane(l)) if l == lane
        ));
        assert!(ep.bound_lanes().is_empty());
    }

    #[test]
    fn handle_display() {
        let handle = EpHandle::new(0xab, 7);
        assert_eq!(handle.to_string(), "ep#7(0xab)");
        assert_ne!(handle, EpHandle::new(0xab, 8));
    }
}
