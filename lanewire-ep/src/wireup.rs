//! Address negotiation hooks.
//!
//! The endpoint layer does not decide which transports back an endpoint. A
//! [`Wireup`] implementation unpacks peer addresses, binds transport endpoints
//! into lane slots and sends the handshake; the worker only records the lane
//! configuration it reports.

use bytes::Bytes;
use lanewire_core::config::LaneConfigKey;
use lanewire_core::error::Result;
use lanewire_core::lane::MdIndex;
use lanewire_core::PeerId;

use crate::endpoint::Endpoint;

/// One transport address published by the remote worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    /// Transport name, e.g. `rc` or `ud`
    pub tl_name: String,
    /// Memory domain of the remote side
    pub md_index: MdIndex,
    /// Opaque device and interface address
    pub address: Bytes,
}

impl AddressEntry {
    #[must_use]
    pub fn new(tl_name: impl Into<String>, md_index: MdIndex, address: Bytes) -> Self {
        Self {
            tl_name: tl_name.into(),
            md_index,
            address,
        }
    }
}

/// A remote worker address after unpacking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedAddress {
    pub peer_id: PeerId,
    pub peer_name: String,
    pub entries: Vec<AddressEntry>,
}

/// Parameters of [`Worker::create_endpoint`](crate::worker::Worker::create_endpoint).
#[derive(Debug, Clone, Default)]
pub struct EndpointParams {
    /// Packed worker address of the peer
    pub address: Option<Bytes>,
}

impl EndpointParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<Bytes>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Address negotiation collaborator.
pub trait Wireup: Send {
    /// Decode a packed worker address.
    fn unpack_address(&self, address: &Bytes) -> Result<UnpackedAddress>;

    /// Bind transport endpoints into the lane slots of `ep` for the given
    /// remote addresses and return the resulting lane configuration key.
    ///
    /// Lanes bound before an error are torn down by the caller.
    fn init_lanes(&mut self, ep: &mut Endpoint, entries: &[AddressEntry]) -> Result<LaneConfigKey>;

    /// Send the initial handshake on the wireup lane of `ep`.
    fn send_request(&mut self, ep: &mut Endpoint) -> Result<()>;
}
