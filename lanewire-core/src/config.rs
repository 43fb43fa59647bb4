//! Lane configurations.
//!
//! A [`LaneConfigKey`] describes the shape of an endpoint: which resource backs
//! each lane and which lanes carry which traffic. Endpoints with equal keys
//! share one [`LaneConfig`], whose thresholds are computed once when the key is
//! first interned in the [`ConfigRegistry`].

use smallvec::SmallVec;
use tracing::debug;

use crate::error::{LanewireError, Result};
use crate::lane::{LaneIndex, LaneMap, MdIndex, ResourceIndex, MAX_IOV, MAX_LANES};
use crate::options::{ThresholdSetting, WorkerOptions};
use crate::resource::ResourceTable;
use crate::threshold;

/// Minimal bcopy size, used when the lane is a stub.
pub const MIN_BCOPY: usize = 64;

/// Header bytes taken from the short payload by eager sends.
pub const EAGER_HDR_LEN: usize = 8;

/// Header bytes taken from the short payload by plain active messages.
pub const AM_HDR_LEN: usize = 8;

/// Index of an interned configuration.
pub type ConfigIndex = usize;

/// Priority list of lanes for one-sided operations.
pub type LanePriorities = [Option<LaneIndex>; MAX_LANES];

/// Resource binding of one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LaneKey {
    /// `None` for a stub placeholder lane
    pub rsc_index: Option<ResourceIndex>,
    /// Memory domain of the remote side
    pub dst_md_index: Option<MdIndex>,
}

impl LaneKey {
    #[must_use]
    pub const fn new(rsc_index: ResourceIndex, dst_md_index: MdIndex) -> Self {
        Self {
            rsc_index: Some(rsc_index),
            dst_md_index: Some(dst_md_index),
        }
    }

    #[must_use]
    pub const fn null() -> Self {
        Self {
            rsc_index: None,
            dst_md_index: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.rsc_index.is_none()
    }
}

/// Endpoint shape. Two keys are equal iff every field is equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LaneConfigKey {
    pub lanes: SmallVec<[LaneKey; MAX_LANES]>,
    pub am_lane: Option<LaneIndex>,
    pub rndv_lane: Option<LaneIndex>,
    pub wireup_lane: Option<LaneIndex>,
    pub reachable_md_map: u64,
    /// Lanes for remote memory access, highest priority first
    pub rma_lanes: LanePriorities,
    /// Lanes for atomics, highest priority first
    pub amo_lanes: LanePriorities,
}

impl LaneConfigKey {
    /// Key of an endpoint with no lanes.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Key of a stub endpoint: every operation goes through lane 0, which has
    /// no resource yet.
    #[must_use]
    pub fn stub() -> Self {
        let mut lanes = SmallVec::new();
        lanes.push(LaneKey::null());
        Self {
            lanes,
            am_lane: Some(0),
            rndv_lane: Some(0),
            wireup_lane: Some(0),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Lane 0 has no resource.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.lanes.first().is_some_and(LaneKey::is_null)
    }

    /// Resource of a lane, `None` for a stub lane or an out-of-range index.
    #[must_use]
    pub fn rsc_index(&self, lane: LaneIndex) -> Option<ResourceIndex> {
        self.lanes.get(lane as usize).and_then(|l| l.rsc_index)
    }

    /// Check structural invariants.
    ///
    /// - at most [`MAX_LANES`] lanes
    /// - every designated or prioritised lane exists
    /// - at most one null lane, and only in the single-lane stub shape
    pub fn validate(&self) -> Result<()> {
        let num_lanes = self.num_lanes();
        if num_lanes > MAX_LANES {
            return Err(LanewireError::invalid_param(format!(
                "{num_lanes} lanes exceed the maximum of {MAX_LANES}"
            )));
        }

        let in_range = |lane: &LaneIndex| (*lane as usize) < num_lanes;
        let designated = [self.am_lane, self.rndv_lane, self.wireup_lane];
        if let Some(lane) = designated
            .iter()
            .chain(self.rma_lanes.iter())
            .chain(self.amo_lanes.iter())
            .flatten()
            .find(|l| !in_range(*l))
        {
            return Err(LanewireError::InvalidLane(*lane));
        }

        let null_lanes = self.lanes.iter().filter(|l| l.is_null()).count();
        if null_lanes > 1 || (null_lanes == 1 && num_lanes != 1) {
            return Err(LanewireError::invalid_param(
                "null resource lane is only legal on a stub endpoint",
            ));
        }

        Ok(())
    }
}

/// Priority of `lane` in a priority list, `None` if absent.
#[must_use]
pub fn rma_prio(lanes: &LanePriorities, lane: LaneIndex) -> Option<usize> {
    lanes.iter().position(|l| *l == Some(lane))
}

/// Active message limits and thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmConfig {
    /// `None` when the AM lane has no short messages
    pub max_eager_short: Option<usize>,
    pub max_short: Option<usize>,
    pub max_bcopy: usize,
    pub max_zcopy: usize,
    pub max_iovcnt: usize,
    /// Zero-copy threshold per fragment count (index 0 = one fragment)
    pub zcopy_thresh: [usize; MAX_IOV],
    /// Same, without the hardware minimum clamp (synchronous sends)
    pub sync_zcopy_thresh: [usize; MAX_IOV],
    pub zcopy_auto_thresh: bool,
}

impl Default for AmConfig {
    fn default() -> Self {
        Self {
            max_eager_short: None,
            max_short: None,
            max_bcopy: 0,
            max_zcopy: 0,
            max_iovcnt: 0,
            zcopy_thresh: [usize::MAX; MAX_IOV],
            sync_zcopy_thresh: [usize::MAX; MAX_IOV],
            zcopy_auto_thresh: false,
        }
    }
}

/// Per-lane remote memory access limits and thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RmaConfig {
    pub max_put_short: Option<usize>,
    pub max_put_bcopy: usize,
    pub max_put_zcopy: usize,
    pub max_get_bcopy: usize,
    pub max_get_zcopy: usize,
    pub put_zcopy_thresh: usize,
    pub get_zcopy_thresh: usize,
}

impl Default for RmaConfig {
    fn default() -> Self {
        Self {
            max_put_short: None,
            max_put_bcopy: 0,
            max_put_zcopy: 0,
            max_get_bcopy: 0,
            max_get_zcopy: 0,
            put_zcopy_thresh: usize::MAX,
            get_zcopy_thresh: usize::MAX,
        }
    }
}

/// Rendezvous thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RndvConfig {
    /// Active-message rendezvous threshold
    pub am_thresh: usize,
    /// Get-zcopy rendezvous threshold
    pub rma_thresh: usize,
    pub max_get_zcopy: usize,
}

impl Default for RndvConfig {
    fn default() -> Self {
        Self {
            am_thresh: usize::MAX,
            rma_thresh: usize::MAX,
            max_get_zcopy: usize::MAX,
        }
    }
}

/// Configuration derived from a [`LaneConfigKey`]. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneConfig {
    pub key: LaneConfigKey,
    /// Lanes backed by point-to-point transports
    pub p2p_lanes: LaneMap,
    pub bcopy_thresh: usize,
    pub am: AmConfig,
    pub rma: [RmaConfig; MAX_LANES],
    pub rndv: RndvConfig,
}

impl LaneConfig {
    /// Compute thresholds for `key`.
    pub fn init(key: LaneConfigKey, opts: &WorkerOptions, resources: &ResourceTable) -> Self {
        let mut config = Self {
            p2p_lanes: LaneMap::empty(),
            bcopy_thresh: opts.bcopy_thresh,
            am: AmConfig::default(),
            rma: [RmaConfig::default(); MAX_LANES],
            rndv: RndvConfig::default(),
            key,
        };

        for (lane, lane_key) in config.key.lanes.iter().enumerate() {
            if lane_key.rsc_index.is_some_and(|rsc| resources.is_p2p(rsc)) {
                config.p2p_lanes.insert(lane as LaneIndex);
            }
        }

        config.init_am(opts, resources);
        config.init_rma(opts, resources);
        config.init_rndv(opts, resources);
        config
    }

    fn init_am(&mut self, opts: &WorkerOptions, resources: &ResourceTable) {
        let Some(lane) = self.key.am_lane else {
            return;
        };

        let Some((iface, md)) = self.key.rsc_index(lane).and_then(|rsc| resources.attrs(rsc)) else {
            // Stub endpoint
            self.am.max_bcopy = MIN_BCOPY;
            return;
        };

        let cap = &iface.cap;
        if cap.am_short {
            self.am.max_eager_short = cap.am.max_short.checked_sub(EAGER_HDR_LEN);
            self.am.max_short = cap.am.max_short.checked_sub(AM_HDR_LEN);
        }

        if cap.am_bcopy {
            self.am.max_bcopy = cap.am.max_bcopy;
        }

        if cap.am_zcopy && md.can_register {
            self.am.max_zcopy = cap.am.max_zcopy;
            self.am.max_iovcnt = MAX_IOV.min(cap.am.max_iov);

            match opts.zcopy_thresh {
                ThresholdSetting::Auto => {
                    self.am.zcopy_auto_thresh = true;
                    for it in 0..MAX_IOV {
                        let thresh = threshold::zcopy_auto_thresh(
                            it + 1,
                            &md.reg_cost,
                            opts.bcopy_bw,
                            iface.bandwidth,
                        );
                        self.am.sync_zcopy_thresh[it] = thresh;
                        self.am.zcopy_thresh[it] = thresh.max(cap.am.min_zcopy);
                    }
                }
                ThresholdSetting::Fixed(thresh) => {
                    self.am.sync_zcopy_thresh[0] = thresh;
                    self.am.zcopy_thresh[0] = thresh.max(cap.am.min_zcopy);
                }
            }
        }

        self.rndv.am_thresh = threshold::am_rndv_thresh(opts, iface, md);
    }

    fn init_rma(&mut self, opts: &WorkerOptions, resources: &ResourceTable) {
        for lane in 0..self.key.num_lanes() as LaneIndex {
            if rma_prio(&self.key.rma_lanes, lane).is_none() {
                continue;
            }

            let rma = &mut self.rma[lane as usize];
            *rma = RmaConfig::default();

            let Some((iface, _)) = self.key.rsc_index(lane).and_then(|rsc| resources.attrs(rsc)) else {
                // Stub endpoint
                rma.max_put_bcopy = MIN_BCOPY;
                continue;
            };

            let cap = &iface.cap;
            if cap.put_short {
                rma.max_put_short = Some(cap.put.max_short);
            }
            if cap.put_bcopy {
                rma.max_put_bcopy = cap.put.max_bcopy;
            }
            if cap.put_zcopy {
                rma.max_put_zcopy = cap.put.max_zcopy;
                rma.put_zcopy_thresh = threshold::rma_zcopy_thresh(opts, cap.put.min_zcopy);
            }
            if cap.get_bcopy {
                rma.max_get_bcopy = cap.get.max_bcopy;
            }
            if cap.get_zcopy {
                rma.max_get_zcopy = cap.get.max_zcopy;
                rma.get_zcopy_thresh = threshold::rma_zcopy_thresh(opts, cap.get.min_zcopy);
            }
        }
    }

    fn init_rndv(&mut self, opts: &WorkerOptions, resources: &ResourceTable) {
        let Some(lane) = self.key.rndv_lane else {
            return;
        };

        let Some((iface, md)) = self.key.rsc_index(lane).and_then(|rsc| resources.attrs(rsc)) else {
            debug!("[CONFIG] rendezvous (get_zcopy) protocol is not supported on a stub lane");
            return;
        };

        if !iface.cap.get_zcopy {
            debug!("[CONFIG] rendezvous lane {} has no get_zcopy", lane);
            return;
        }

        self.rndv.max_get_zcopy = iface.cap.get.max_zcopy;
        self.rndv.rma_thresh = threshold::rma_rndv_thresh(opts, iface, md);
    }

    #[inline]
    #[must_use]
    pub fn num_lanes(&self) -> usize {
        self.key.num_lanes()
    }
}

/// Cache of lane configurations, indexed by [`ConfigIndex`].
///
/// Entries are never removed: the number of distinct endpoint shapes is
/// bounded by the topologies a worker encounters.
#[derive(Debug)]
pub struct ConfigRegistry {
    configs: Vec<LaneConfig>,
    options: WorkerOptions,
    resources: ResourceTable,
}

impl ConfigRegistry {
    #[must_use]
    pub fn new(options: WorkerOptions, resources: ResourceTable) -> Self {
        Self {
            configs: Vec::new(),
            options,
            resources,
        }
    }

    /// Return the index of the configuration for `key`, computing it on first
    /// use.
    ///
    /// Complexity: O(N) scan over interned keys; N is small.
    pub fn intern(&mut self, key: &LaneConfigKey) -> Result<ConfigIndex> {
        if let Some(index) = self.configs.iter().position(|c| c.key == *key) {
            return Ok(index);
        }

        key.validate()?;
        if let Some(rsc) = key
            .lanes
            .iter()
            .filter_map(|l| l.rsc_index)
            .find(|rsc| self.resources.attrs(*rsc).is_none())
        {
            return Err(LanewireError::invalid_param(format!("unknown resource {rsc}")));
        }

        let config = LaneConfig::init(key.clone(), &self.options, &self.resources);
        self.configs.push(config);
        let index = self.configs.len() - 1;
        debug!(
            "[CONFIG] Interned configuration {} ({} lanes, am_thresh {}, rma_thresh {})",
            index,
            key.num_lanes(),
            self.configs[index].rndv.am_thresh,
            self.configs[index].rndv.rma_thresh
        );
        Ok(index)
    }

    /// Configuration at `index`.
    ///
    /// # Panics
    ///
    /// If `index` was not returned by [`ConfigRegistry::intern`].
    #[must_use]
    pub fn get(&self, index: ConfigIndex) -> &LaneConfig {
        &self.configs[index]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    #[must_use]
    pub const fn options(&self) -> &WorkerOptions {
        &self.options
    }

    #[must_use]
    pub const fn resources(&self) -> &ResourceTable {
        &self.resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{IfaceAttr, IfaceCaps, LinearGrowth, MdAttr, OpLimits, TlResource};

    fn table() -> ResourceTable {
        let mut table = ResourceTable::new();
        let md = table.add_md(MdAttr {
            reg_cost: LinearGrowth::new(1e-6, 0.0),
            can_register: true,
        });
        let limits = OpLimits {
            max_short: 124,
            max_bcopy: 8192,
            min_zcopy: 0,
            max_zcopy: 1 << 30,
            max_iov: 4,
        };
        table.add_resource(TlResource {
            dev_name: "mlx5_0:1".into(),
            tl_name: "rc".into(),
            md_index: md,
            p2p: true,
            iface: IfaceAttr {
                cap: IfaceCaps {
                    am_short: true,
                    am_bcopy: true,
                    am_zcopy: true,
                    put_short: true,
                    put_zcopy: true,
                    get_zcopy: true,
                    am: limits,
                    put: limits,
                    get: limits,
                    ..IfaceCaps::default()
                },
                latency: LinearGrowth::new(700e-9, 0.0),
                overhead: 75e-9,
                bandwidth: 12.0 * 1024.0 * 1024.0 * 1024.0,
            },
        });
        table
    }

    fn rc_key() -> LaneConfigKey {
        let mut key = LaneConfigKey::empty();
        key.lanes.push(LaneKey::new(0, 0));
        key.am_lane = Some(0);
        key.rndv_lane = Some(0);
        key.wireup_lane = Some(0);
        key.rma_lanes[0] = Some(0);
        key
    }

    #[test]
    fn stub_key_shape() {
        let key = LaneConfigKey::stub();
        assert!(key.is_stub());
        assert_eq!(key.num_lanes(), 1);
        assert!(key.validate().is_ok());
        assert!(!LaneConfigKey::empty().is_stub());
    }

    #[test]
    fn validate_rejects_out_of_range_lanes() {
        let mut key = rc_key();
        key.amo_lanes[0] = Some(3);
        assert_eq!(key.validate(), Err(LanewireError::InvalidLane(3)));
    }

    #[test]
    fn validate_rejects_null_lane_outside_stub() {
        let mut key = rc_key();
        key.lanes.push(LaneKey::null());
        assert!(key.validate().is_err());
    }

    #[test]
    fn rma_priority_lookup() {
        let mut prio = [None; MAX_LANES];
        prio[0] = Some(2);
        prio[1] = Some(0);
        assert_eq!(rma_prio(&prio, 0), Some(1));
        assert_eq!(rma_prio(&prio, 2), Some(0));
        assert_eq!(rma_prio(&prio, 1), None);
    }

    #[test]
    fn rc_config_thresholds() {
        let config = LaneConfig::init(rc_key(), &WorkerOptions::default(), &table());

        assert_eq!(config.p2p_lanes.bits(), 0b1);
        assert_eq!(config.am.max_eager_short, Some(124 - EAGER_HDR_LEN));
        assert_eq!(config.am.max_bcopy, 8192);
        assert_eq!(config.am.max_iovcnt, 4);
        assert!(config.am.zcopy_auto_thresh);
        assert!(config.am.zcopy_thresh[0] < config.am.zcopy_thresh[1]);
        assert_eq!(config.rma[0].max_put_short, Some(124));
        assert_eq!(config.rma[0].put_zcopy_thresh, threshold::RMA_ZCOPY_AUTO_THRESH);
        assert_eq!(config.rma[0].get_zcopy_thresh, threshold::RMA_ZCOPY_AUTO_THRESH);
        assert_eq!(config.rndv.max_get_zcopy, 1 << 30);
    }

    #[test]
    fn stub_config_is_minimal() {
        let config = LaneConfig::init(LaneConfigKey::stub(), &WorkerOptions::default(), &table());
        assert_eq!(config.am.max_bcopy, MIN_BCOPY);
        assert_eq!(config.am.max_short, None);
        assert_eq!(config.am.zcopy_thresh, [usize::MAX; MAX_IOV]);
        assert_eq!(config.rndv, RndvConfig::default());
        assert!(config.p2p_lanes.is_empty());
    }

    #[test]
    fn intern_dedups_equal_keys() {
        let mut registry = ConfigRegistry::new(WorkerOptions::default(), table());
        let a = registry.intern(&rc_key()).unwrap();
        let b = registry.intern(&rc_key()).unwrap();
        let stub = registry.intern(&LaneConfigKey::stub()).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, stub);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn intern_rejects_unknown_resource() {
        let mut registry = ConfigRegistry::new(WorkerOptions::default(), table());
        let mut key = rc_key();
        key.lanes[0].rsc_index = Some(9);
        assert!(matches!(registry.intern(&key), Err(LanewireError::InvalidParam(_))));
        assert!(registry.is_empty());
    }
}
