//! Threshold calculator.
//!
//! Pure functions turning interface and memory-domain attributes into the
//! message sizes at which the endpoint switches protocol:
//!
//! ```text
//! 0 ..<short>.. max_short ..<bcopy>.. zcopy_thresh ..<zcopy>.. rndv_thresh ..<rndv>.. inf
//! ```
//!
//! # Rendezvous model
//!
//! Latency of eager zero-copy:
//!
//! ```text
//! reg.overhead + size * reg.growth + max(size/bw, size/bcopy_bw) + overhead
//! ```
//!
//! Latency of AM-mediated rendezvous (RTS, RTR/data, ATS):
//!
//! ```text
//! 4 * latency + 3 * overhead + reg.overhead + size * reg.growth
//!     + max(size/bw, size/bcopy_bw)
//! ```
//!
//! Latency of get-zcopy rendezvous adds a second registration on the receiver
//! and has no bcopy term. The threshold is the size at which rendezvous is
//! within `rndv_perf_diff` percent of eager, solved as one linear equation.

use tracing::trace;

use crate::options::{ThresholdSetting, WorkerOptions};
use crate::resource::{IfaceAttr, LinearGrowth, MdAttr};

/// Put/get zero-copy threshold used when `zcopy_thresh` is `auto`.
pub const RMA_ZCOPY_AUTO_THRESH: usize = 16384;

/// Which rendezvous flavour a threshold is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RndvScheme {
    /// Data moved by active messages; one registration.
    ActiveMessage,
    /// Receiver pulls with get-zcopy; registration on both sides.
    Get,
}

impl RndvScheme {
    const fn recv_reg_cost(self) -> f64 {
        match self {
            Self::ActiveMessage => 0.0,
            Self::Get => 1.0,
        }
    }
}

/// Solve the rendezvous crossover point.
///
/// `bcopy_bw` is the effective copy bandwidth on the eager side of the
/// rendezvous path; `f64::INFINITY` removes the copy term entirely.
///
/// Returns `opts.rndv_thresh_fallback` when the numerator or denominator is
/// not positive, i.e. rendezvous never catches up with eager in this regime.
#[must_use]
pub fn calc_rndv_thresh(
    opts: &WorkerOptions,
    iface: &IfaceAttr,
    md: &MdAttr,
    bcopy_bw: f64,
    scheme: RndvScheme,
) -> usize {
    let diff = opts.rndv_diff_factor();
    let latency = iface.latency_for(opts.est_num_eps);
    let reg = md.reg_cost;
    let recv_reg = scheme.recv_reg_cost();

    let numerator = diff
        * (4.0 * latency + 3.0 * iface.overhead + reg.overhead * (1.0 + recv_reg))
        - reg.overhead
        - iface.overhead;

    let denominator = reg.growth + (1.0 / iface.bandwidth).max(1.0 / opts.bcopy_bw)
        - diff * ((1.0 / iface.bandwidth).max(1.0 / bcopy_bw) + reg.growth * (1.0 + recv_reg));

    if numerator > 0.0 && denominator > 0.0 {
        // float -> int saturates, so an enormous quotient maps to usize::MAX
        (numerator / denominator) as usize
    } else {
        opts.rndv_thresh_fallback
    }
}

/// Automatic zero-copy threshold for a transfer of `iovcnt` fragments.
///
/// Returns `usize::MAX` (never zero-copy) when the registration growth per
/// fragment outweighs the copy savings.
#[must_use]
pub fn zcopy_auto_thresh(
    iovcnt: usize,
    reg_cost: &LinearGrowth,
    bcopy_bw: f64,
    bandwidth: f64,
) -> usize {
    let n = iovcnt as f64;
    let thresh = (n * reg_cost.overhead) / ((1.0 / bcopy_bw) - (1.0 / bandwidth) - (n * reg_cost.growth));

    if !thresh.is_finite() || thresh < 0.0 || thresh > usize::MAX as f64 {
        return usize::MAX;
    }

    thresh as usize
}

/// Rendezvous threshold for active-message rendezvous on the AM lane.
///
/// Never below the interface's minimal AM zero-copy size.
#[must_use]
pub fn am_rndv_thresh(opts: &WorkerOptions, iface: &IfaceAttr, md: &MdAttr) -> usize {
    let thresh = match opts.rndv_thresh {
        ThresholdSetting::Auto => {
            let t = calc_rndv_thresh(opts, iface, md, opts.bcopy_bw, RndvScheme::ActiveMessage);
            trace!("[CONFIG] Active message rendezvous threshold is {}", t);
            t
        }
        ThresholdSetting::Fixed(n) => n,
    };

    debug_assert!(iface.cap.am.min_zcopy <= iface.cap.am.max_zcopy);
    thresh.max(iface.cap.am.min_zcopy)
}

/// Rendezvous threshold for get-zcopy rendezvous on the rendezvous lane.
///
/// Never below the interface's minimal get zero-copy size.
#[must_use]
pub fn rma_rndv_thresh(opts: &WorkerOptions, iface: &IfaceAttr, md: &MdAttr) -> usize {
    let thresh = match opts.rndv_thresh {
        ThresholdSetting::Auto => {
            let t = calc_rndv_thresh(opts, iface, md, f64::INFINITY, RndvScheme::Get);
            trace!("[CONFIG] Get-zcopy rendezvous threshold is {}", t);
            t
        }
        ThresholdSetting::Fixed(n) => n,
    };

    debug_assert!(iface.cap.get.min_zcopy <= iface.cap.get.max_zcopy);
    thresh.max(iface.cap.get.min_zcopy)
}

/// Put/get zero-copy threshold, clamped to the hardware minimum.
#[must_use]
pub fn rma_zcopy_thresh(opts: &WorkerOptions, min_zcopy: usize) -> usize {
    let thresh = match opts.zcopy_thresh {
        ThresholdSetting::Auto => RMA_ZCOPY_AUTO_THRESH,
        ThresholdSetting::Fixed(n) => n,
    };
    thresh.max(min_zcopy)
}
