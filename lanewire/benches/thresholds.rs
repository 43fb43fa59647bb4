//! Threshold and configuration benchmarks
//!
//! Measures: how long does it take to compute the protocol thresholds of a
//! lane configuration, and to look up an already-interned one?
//!
//! Interning runs on every endpoint creation, so the cached lookup is the
//! number that matters for connection setup rate.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lanewire::lanewire_core::config::{ConfigRegistry, LaneConfig, LaneConfigKey, LaneKey};
use lanewire::lanewire_core::lane::{LaneIndex, MAX_LANES};
use lanewire::lanewire_core::resource::{
    IfaceAttr, IfaceCaps, LinearGrowth, MdAttr, OpLimits, ResourceTable, TlResource,
};
use lanewire::lanewire_core::threshold::{am_rndv_thresh, rma_rndv_thresh, zcopy_auto_thresh};
use lanewire::WorkerOptions;

const LANE_COUNTS: &[usize] = &[1, 4, MAX_LANES];

/// One RC-like resource per lane, each on its own memory domain.
fn resources(count: usize) -> ResourceTable {
    let limits = OpLimits {
        max_short: 220,
        max_bcopy: 8192,
        min_zcopy: 0,
        max_zcopy: 1 << 30,
        max_iov: 8,
    };
    let mut table = ResourceTable::new();
    for i in 0..count {
        let md = table.add_md(MdAttr {
            reg_cost: LinearGrowth::new(16e-6, 0.06e-9),
            can_register: true,
        });
        table.add_resource(TlResource {
            dev_name: format!("mlx5_{i}:1"),
            tl_name: "rc".into(),
            md_index: md,
            p2p: true,
            iface: IfaceAttr {
                cap: IfaceCaps {
                    am_short: true,
                    am_bcopy: true,
                    am_zcopy: true,
                    put_short: true,
                    put_bcopy: true,
                    put_zcopy: true,
                    get_bcopy: true,
                    get_zcopy: true,
                    am: limits,
                    put: limits,
                    get: limits,
                },
                latency: LinearGrowth::new(600e-9, 1e-9),
                overhead: 75e-9,
                bandwidth: 11_000e6,
            },
        });
    }
    table
}

fn key(lanes: usize) -> LaneConfigKey {
    let mut key = LaneConfigKey::empty();
    for i in 0..lanes {
        key.lanes.push(LaneKey::new(i as _, i as _));
        key.rma_lanes[i] = Some(i as LaneIndex);
    }
    key.am_lane = Some(0);
    key.rndv_lane = Some(0);
    key.wireup_lane = Some(0);
    key
}

/// Benchmark the raw threshold formulas on a single resource
fn threshold_formulas(c: &mut Criterion) {
    lanewire::dev_tracing::init_tracing();

    let mut group = c.benchmark_group("thresholds/formulas");
    group.measurement_time(Duration::from_secs(3));

    let opts = WorkerOptions::default();
    let table = resources(1);
    let Some((iface, md)) = table.attrs(0) else {
        return;
    };

    group.bench_function("am_rndv", |b| {
        b.iter(|| am_rndv_thresh(black_box(&opts), black_box(iface), black_box(md)));
    });
    group.bench_function("rma_rndv", |b| {
        b.iter(|| rma_rndv_thresh(black_box(&opts), black_box(iface), black_box(md)));
    });
    group.bench_function("zcopy_auto", |b| {
        b.iter(|| {
            zcopy_auto_thresh(
                black_box(4),
                black_box(&md.reg_cost),
                black_box(opts.bcopy_bw),
                black_box(iface.bandwidth),
            )
        });
    });

    group.finish();
}

/// Benchmark full configuration init vs. a registry hit
fn config_interning(c: &mut Criterion) {
    lanewire::dev_tracing::init_tracing();

    let mut group = c.benchmark_group("thresholds/config");
    group.measurement_time(Duration::from_secs(3));

    for &lanes in LANE_COUNTS {
        let opts = WorkerOptions::default();
        let table = resources(lanes);
        let key = key(lanes);

        group.bench_with_input(BenchmarkId::new("init", lanes), &lanes, |b, _| {
            b.iter(|| LaneConfig::init(black_box(key.clone()), &opts, &table));
        });

        let mut registry = ConfigRegistry::new(opts.clone(), table.clone());
        registry.intern(&key).expect("valid key");
        group.bench_with_input(BenchmarkId::new("intern_hit", lanes), &lanes, |b, _| {
            b.iter(|| registry.intern(black_box(&key)).expect("valid key"));
        });
    }

    group.finish();
}

criterion_group!(benches, threshold_formulas, config_interning);
criterion_main!(benches);
