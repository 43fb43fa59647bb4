//! Properties of the protocol threshold calculator over randomized hardware.

use lanewire_core::options::{ThresholdSetting, WorkerOptions};
use lanewire_core::resource::{IfaceAttr, IfaceCaps, LinearGrowth, MdAttr, OpLimits};
use lanewire_core::threshold::{am_rndv_thresh, calc_rndv_thresh, rma_rndv_thresh, RndvScheme};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * MB;

fn iface(bandwidth: f64, min_zcopy: usize) -> IfaceAttr {
    let limits = OpLimits {
        max_short: 92,
        max_bcopy: 8192,
        min_zcopy,
        max_zcopy: 1 << 30,
        max_iov: 8,
    };
    IfaceAttr {
        cap: IfaceCaps {
            am_zcopy: true,
            get_zcopy: true,
            am: limits,
            get: limits,
            ..IfaceCaps::default()
        },
        latency: LinearGrowth::new(700e-9, 0.0),
        overhead: 75e-9,
        bandwidth,
    }
}

fn md(overhead: f64) -> MdAttr {
    MdAttr {
        reg_cost: LinearGrowth::new(overhead, 0.0),
        can_register: true,
    }
}

fn sorted_samples(rng: &mut StdRng, lo: f64, hi: f64, n: usize) -> Vec<f64> {
    let mut v: Vec<f64> = (0..n).map(|_| rng.gen_range(lo..hi)).collect();
    v.sort_by(f64::total_cmp);
    v
}

#[test]
fn test_get_rndv_thresh_grows_with_registration_overhead() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let opts = WorkerOptions::default();
    // below the copy bandwidth, so the model stays in its positive regime
    let attr = iface(4.0 * GB, 0);

    let mut last = 0;
    for reg in sorted_samples(&mut rng, 100e-9, 50e-6, 64) {
        let t = calc_rndv_thresh(&opts, &attr, &md(reg), f64::INFINITY, RndvScheme::Get);
        assert!(t < usize::MAX, "unexpected fallback at reg overhead {reg}");
        assert!(t >= last, "threshold dropped from {last} to {t} at reg overhead {reg}");
        last = t;
    }
}

#[test]
fn test_am_rndv_thresh_grows_with_bandwidth() {
    let mut rng = StdRng::seed_from_u64(42);
    let opts = WorkerOptions::default();

    let mut last = 0;
    for bw in sorted_samples(&mut rng, 512.0 * MB, 24.0 * GB, 64) {
        let t = calc_rndv_thresh(&opts, &iface(bw, 0), &md(1e-6), opts.bcopy_bw, RndvScheme::ActiveMessage);
        assert!(t < usize::MAX, "unexpected fallback at bandwidth {bw}");
        assert!(t >= last, "threshold dropped from {last} to {t} at bandwidth {bw}");
        last = t;
    }
}

#[test]
fn test_get_rndv_thresh_grows_with_bandwidth_below_copy_bandwidth() {
    let mut rng = StdRng::seed_from_u64(7);
    let opts = WorkerOptions::default();

    let mut last = 0;
    for bw in sorted_samples(&mut rng, 256.0 * MB, opts.bcopy_bw, 64) {
        let t = calc_rndv_thresh(&opts, &iface(bw, 0), &md(10e-6), f64::INFINITY, RndvScheme::Get);
        assert!(t >= last, "threshold dropped from {last} to {t} at bandwidth {bw}");
        last = t;
    }
}

#[test]
fn test_thresholds_never_below_hardware_minimum() {
    let mut rng = StdRng::seed_from_u64(1234);

    for _ in 0..256 {
        let opts = WorkerOptions::default()
            .with_rndv_perf_diff(rng.gen_range(-20.0..120.0))
            .with_rndv_thresh_fallback(rng.gen_range(0..1 << 20));
        let min_zcopy = rng.gen_range(0..1 << 16);
        let attr = iface(rng.gen_range(256.0 * MB..32.0 * GB), min_zcopy);
        let md = md(rng.gen_range(0.0..100e-6));

        assert!(am_rndv_thresh(&opts, &attr, &md) >= min_zcopy);
        assert!(rma_rndv_thresh(&opts, &attr, &md) >= min_zcopy);
    }
}

#[test]
fn test_fixed_threshold_floor() {
    let opts = WorkerOptions::default().with_rndv_thresh(ThresholdSetting::Fixed(0));
    let attr = iface(8.0 * GB, 2048);
    assert_eq!(am_rndv_thresh(&opts, &attr, &md(1e-6)), 2048);
    assert_eq!(rma_rndv_thresh(&opts, &attr, &md(1e-6)), 2048);
}

#[test]
fn test_non_positive_denominator_returns_fallback() {
    // zero tolerance and zero growth on a transport exactly as fast as memcpy:
    // the get-zcopy model has nothing left in the denominator
    let opts = WorkerOptions::default()
        .with_rndv_perf_diff(0.0)
        .with_rndv_thresh_fallback(4242);
    let attr = iface(opts.bcopy_bw, 0);
    let t = calc_rndv_thresh(&opts, &attr, &md(1e-6), f64::INFINITY, RndvScheme::Get);
    assert_eq!(t, 4242);
}
