//! Human-readable endpoint dump.
//!
//! Lists the lanes of an endpoint and, per protocol, which message sizes go
//! through short, bcopy, zcopy and rendezvous. For diagnostics only; the
//! format is not stable.

use std::fmt::{self, Write};

use lanewire_core::config::{rma_prio, LaneConfig, LaneConfigKey};
use lanewire_core::error::{LanewireError, Result};
use lanewire_core::lane::LaneIndex;
use lanewire_core::options::Features;
use lanewire_core::resource::ResourceTable;

use crate::endpoint::{EpHandle, Endpoint};
use crate::worker::Worker;

impl Worker {
    /// Dump the lanes and protocol thresholds of an endpoint.
    pub fn print_info(&self, handle: EpHandle) -> Result<String> {
        let ep = self
            .endpoint(handle)
            .ok_or(LanewireError::NoSuchPeer(handle.peer_id()))?;
        let config = self.configs().get(ep.config());

        let mut out = String::new();
        write_info(&mut out, ep, config, self.configs().resources(), self.options().features)
            .map_err(|e| LanewireError::io(e.to_string()))?;
        Ok(out)
    }
}

pub fn write_info(
    out: &mut impl Write,
    ep: &Endpoint,
    config: &LaneConfig,
    resources: &ResourceTable,
    features: Features,
) -> fmt::Result {
    writeln!(out, "#")?;
    writeln!(out, "# lanewire endpoint")?;
    writeln!(out, "#")?;
    match ep.peer_name() {
        Some(name) => writeln!(out, "#               peer: {}, uuid {:#x}", name, ep.peer_id())?,
        None => writeln!(out, "#               peer: uuid {:#x}", ep.peer_id())?,
    }

    for lane in 0..config.num_lanes() as LaneIndex {
        write!(out, "#                 ")?;
        write_lane_info(out, &config.key, lane, resources)?;
        writeln!(out)?;
    }
    writeln!(out, "#")?;

    if features.tag {
        tag_proto(
            out,
            "tag_send",
            config.am.max_eager_short,
            config.am.zcopy_thresh[0],
            config.rndv.rma_thresh,
            config.rndv.am_thresh,
        )?;
        tag_proto(
            out,
            "tag_send_sync",
            config.am.max_eager_short,
            config.am.sync_zcopy_thresh[0],
            config.rndv.rma_thresh,
            config.rndv.am_thresh,
        )?;
    }

    if features.rma {
        for lane in 0..config.num_lanes() as LaneIndex {
            if rma_prio(&config.key.rma_lanes, lane).is_none() {
                continue;
            }
            let rma = &config.rma[lane as usize];
            let put_bcopy = rma
                .max_put_short
                .map_or(0, |short| short + 1)
                .max(config.bcopy_thresh);
            rma_proto(out, "put", lane, put_bcopy, rma.put_zcopy_thresh)?;
            rma_proto(out, "get", lane, 0, rma.get_zcopy_thresh)?;
        }
    }

    writeln!(out, "#")
}

/// One line describing `lane`: resource, remote memory domain and roles.
#[must_use]
pub fn lane_info(key: &LaneConfigKey, lane: LaneIndex, resources: &ResourceTable) -> String {
    let mut line = String::new();
    // a String never refuses a write
    write_lane_info(&mut line, key, lane, resources).map_or_else(|_| String::new(), |()| line)
}

/// Write the [`lane_info`] line of `lane` to `out`.
pub fn write_lane_info(
    out: &mut impl Write,
    key: &LaneConfigKey,
    lane: LaneIndex,
    resources: &ResourceTable,
) -> fmt::Result {
    write!(out, "lane[{lane}]: ")?;
    let resource = key
        .rsc_index(lane)
        .and_then(|rsc| resources.resource(rsc).map(|r| (rsc, r)));
    let name_len = match resource {
        Some((rsc, r)) => {
            write!(out, "{}:{}/{}", rsc, r.dev_name, r.tl_name)?;
            r.dev_name.len() + r.tl_name.len()
        }
        None => {
            out.write_str("stub")?;
            0
        }
    };
    let pad = 20usize.saturating_sub(name_len).max(1);
    write!(out, "{:pad$}-> ", "")?;

    match key.lanes.get(lane as usize).and_then(|l| l.dst_md_index) {
        Some(md) => write!(out, "md[{md}]")?,
        None => out.write_str("md[-]")?,
    }
    if let Some(prio) = rma_prio(&key.rma_lanes, lane) {
        write!(out, " rma#{prio}")?;
    }
    if let Some(prio) = rma_prio(&key.amo_lanes, lane) {
        write!(out, " amo#{prio}")?;
    }
    if key.am_lane == Some(lane) {
        out.write_str(" am")?;
    }
    if key.rndv_lane == Some(lane) {
        out.write_str(" zcopy_rndv")?;
    }
    if key.wireup_lane == Some(lane) {
        out.write_str(" wireup")?;
    }
    Ok(())
}

fn tag_proto(
    out: &mut impl Write,
    name: &str,
    max_eager_short: Option<usize>,
    zcopy_thresh: usize,
    rndv_rma_thresh: usize,
    rndv_am_thresh: usize,
) -> fmt::Result {
    let max_short = max_eager_short.unwrap_or(0);
    write!(out, "# {name:>23}: 0")?;
    if max_short > 0 {
        write!(out, "..<egr/short>..{}", max_short + 1)?;
    }

    let min_rndv = rndv_rma_thresh.min(rndv_am_thresh);
    let max_bcopy = zcopy_thresh.min(min_rndv);
    if max_short < max_bcopy {
        write!(out, "..<egr/bcopy>..")?;
        if max_bcopy < usize::MAX {
            write!(out, "{max_bcopy}")?;
        }
    }
    if zcopy_thresh < min_rndv {
        write!(out, "..<egr/zcopy>..")?;
        if min_rndv < usize::MAX {
            write!(out, "{min_rndv}")?;
        }
    }
    if min_rndv < usize::MAX {
        write!(out, "..<rndv>..")?;
    }
    writeln!(out, "(inf)")
}

fn rma_proto(
    out: &mut impl Write,
    name: &str,
    lane: LaneIndex,
    bcopy_thresh: usize,
    zcopy_thresh: usize,
) -> fmt::Result {
    write!(out, "# {name:>20}[{lane}]: 0")?;
    if bcopy_thresh > 0 {
        write!(out, "..<short>")?;
    }
    if bcopy_thresh < zcopy_thresh {
        if bcopy_thresh > 0 {
            write!(out, "..{bcopy_thresh}")?;
        }
        write!(out, "..<bcopy>")?;
    }
    if zcopy_thresh < usize::MAX {
        write!(out, "..{zcopy_thresh}..<zcopy>")?;
    }
    writeln!(out, "..(inf)")
}
