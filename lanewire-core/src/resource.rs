//! Hardware resource attributes.
//!
//! The worker discovers a set of transport resources (device + transport
//! pairs) and memory domains at startup. Each resource reports its operation
//! limits and a performance model; the threshold calculator only reads them.
//!
//! Units: times are seconds, bandwidths bytes/second, growth seconds/byte.

use crate::lane::{MdIndex, ResourceIndex};

/// `overhead + growth * x`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinearGrowth {
    pub overhead: f64,
    pub growth: f64,
}

impl LinearGrowth {
    #[must_use]
    pub const fn new(overhead: f64, growth: f64) -> Self {
        Self { overhead, growth }
    }

    #[inline]
    #[must_use]
    pub fn at(&self, x: f64) -> f64 {
        self.overhead + self.growth * x
    }
}

/// Size limits of one operation family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpLimits {
    pub max_short: usize,
    pub max_bcopy: usize,
    pub min_zcopy: usize,
    pub max_zcopy: usize,
    pub max_iov: usize,
}

/// Operations supported by an interface, and their limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IfaceCaps {
    pub am_short: bool,
    pub am_bcopy: bool,
    pub am_zcopy: bool,
    pub put_short: bool,
    pub put_bcopy: bool,
    pub put_zcopy: bool,
    pub get_bcopy: bool,
    pub get_zcopy: bool,
    pub am: OpLimits,
    pub put: OpLimits,
    pub get: OpLimits,
}

/// Interface attributes of one transport resource.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IfaceAttr {
    pub cap: IfaceCaps,
    /// One-way latency; growth is per connected endpoint
    pub latency: LinearGrowth,
    /// Host overhead of posting one operation
    pub overhead: f64,
    pub bandwidth: f64,
}

impl IfaceAttr {
    /// Latency estimate for `num_eps` connected endpoints.
    #[inline]
    #[must_use]
    pub fn latency_for(&self, num_eps: usize) -> f64 {
        self.latency.at(num_eps as f64)
    }
}

/// Memory domain attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MdAttr {
    /// Memory registration cost: fixed overhead plus per-byte growth
    pub reg_cost: LinearGrowth,
    /// Whether the domain can register user memory
    pub can_register: bool,
}

/// A transport resource: one transport on one device.
#[derive(Debug, Clone, PartialEq)]
pub struct TlResource {
    pub dev_name: String,
    pub tl_name: String,
    pub md_index: MdIndex,
    /// Point-to-point (connected) transport
    pub p2p: bool,
    pub iface: IfaceAttr,
}

/// Resources and memory domains known to a worker.
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    resources: Vec<TlResource>,
    mds: Vec<MdAttr>,
}

impl ResourceTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            resources: Vec::new(),
            mds: Vec::new(),
        }
    }

    /// Register a memory domain, returning its index.
    pub fn add_md(&mut self, md: MdAttr) -> MdIndex {
        self.mds.push(md);
        (self.mds.len() - 1) as MdIndex
    }

    /// Register a transport resource, returning its index.
    pub fn add_resource(&mut self, rsc: TlResource) -> ResourceIndex {
        debug_assert!((rsc.md_index as usize) < self.mds.len(), "unknown md");
        self.resources.push(rsc);
        (self.resources.len() - 1) as ResourceIndex
    }

    #[must_use]
    pub fn resource(&self, index: ResourceIndex) -> Option<&TlResource> {
        self.resources.get(index as usize)
    }

    #[must_use]
    pub fn md(&self, index: MdIndex) -> Option<&MdAttr> {
        self.mds.get(index as usize)
    }

    /// Interface and memory-domain attributes backing a resource.
    #[must_use]
    pub fn attrs(&self, index: ResourceIndex) -> Option<(&IfaceAttr, &MdAttr)> {
        let rsc = self.resource(index)?;
        let md = self.md(rsc.md_index)?;
        Some((&rsc.iface, md))
    }

    #[must_use]
    pub fn is_p2p(&self, index: ResourceIndex) -> bool {
        self.resource(index).is_some_and(|r| r.p2p)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
