//! Benchmarks for procedure evaluation.
//!
//! Measures:
//!   1. Per-point evaluation cost for procedures of increasing complexity
//!   2. Grid rendering on the worker pool at various resolutions and sizes
//!   3. Batch sampling through rayon
//!   4. Persistence: binary encode/decode and JSON descriptions
//!
//! Run with:
//!   cargo bench --bench eval_bench
//!
//! Results are written to `target/criterion/` with HTML reports.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use texgraph::eval::graph::Procedure;
use texgraph::eval::grid::{duplicate_lanes, render_grid, sample_points, GridSettings};
use texgraph::eval::node::Axis;
use texgraph::eval::nodes::{
    CoordinateNode, OutputNode, ScaleShiftNode, SineNode, SphericalNode, TurbulenceNode,
    TurbulenceParams, WoodNode,
};
use texgraph::eval::point::PointInfo;
use texgraph::eval::registry::NodeRegistry;
use texgraph::pool::WorkerPool;

// ── Procedure factories ────────────────────────────────────────────

/// Coordinate passed straight through.
fn proc_coordinate() -> Procedure {
    let mut proc = Procedure::new();
    let x = proc.add_node(CoordinateNode::new(Axis::X));
    let o = proc.add_output(OutputNode::numeric("x", 0.0));
    proc.link(x, 0, o, 0).unwrap();
    proc
}

/// Eight-octave turbulence.
fn proc_turbulence() -> Procedure {
    let mut proc = Procedure::new();
    let t = proc.add_node(TurbulenceNode::new(TurbulenceParams {
        octaves: 8,
        ..TurbulenceParams::default()
    }));
    let o = proc.add_output(OutputNode::numeric("n", 0.0));
    proc.link(t, 0, o, 0).unwrap();
    proc
}

/// Spherical -> sine -> scale_shift -> turbulence, plus wood.
fn proc_marble() -> Procedure {
    let mut proc = Procedure::new();
    let sph = proc.add_node(SphericalNode::new());
    let sine = proc.add_node(SineNode::new());
    let scale = proc.add_node(ScaleShiftNode::new(3.0, 0.5));
    let turb = proc.add_node(TurbulenceNode::default());
    let wood = proc.add_node(WoodNode::default());
    let marble = proc.add_output(OutputNode::numeric("marble", 0.0));
    let wood_out = proc.add_output(OutputNode::numeric("wood", 0.0));
    proc.link(sph, SphericalNode::PHI, sine, 0).unwrap();
    proc.link(sine, 0, scale, 0).unwrap();
    proc.link(scale, 0, turb, 0).unwrap();
    proc.link(turb, 0, marble, 0).unwrap();
    proc.link(wood, 0, wood_out, 0).unwrap();
    proc
}

fn procedures() -> Vec<(&'static str, Procedure)> {
    vec![
        ("coordinate", proc_coordinate()),
        ("turbulence", proc_turbulence()),
        ("marble", proc_marble()),
    ]
}

// ── Benchmarks ─────────────────────────────────────────────────────

fn bench_point_eval(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_eval");
    for (label, mut proc) in procedures() {
        for size in [0.0005, 0.05] {
            let p = PointInfo::at(0.37, -1.21, 2.9).with_footprint(size, size, size);
            group.bench_function(BenchmarkId::new(label, size), |b| {
                b.iter(|| {
                    proc.init_for_point(black_box(&p));
                    black_box(proc.output_value(0))
                });
            });
        }
    }
    group.finish();
}

fn bench_grid_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_resolution");
    group.sample_size(20);
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    for (label, proc) in procedures() {
        let mut pool = WorkerPool::new(duplicate_lanes(&proc, threads)).unwrap();
        for res in [32u32, 64, 128] {
            let settings = GridSettings {
                width: res,
                height: res,
                x_min: -2.0,
                x_max: 2.0,
                y_min: -2.0,
                y_max: 2.0,
                ..GridSettings::default()
            };
            group.throughput(Throughput::Elements(u64::from(res) * u64::from(res)));
            group.bench_with_input(BenchmarkId::new(label, res), &settings, |b, s| {
                b.iter(|| black_box(render_grid(&mut pool, s).unwrap()));
            });
        }
    }
    group.finish();
}

fn bench_pool_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_size");
    group.sample_size(20);
    let proc = proc_marble();
    let settings = GridSettings {
        width: 96,
        height: 96,
        x_min: -2.0,
        x_max: 2.0,
        y_min: -2.0,
        y_max: 2.0,
        ..GridSettings::default()
    };
    for threads in [1usize, 2, 4, 8] {
        let mut pool = WorkerPool::new(duplicate_lanes(&proc, threads)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(threads), &settings, |b, s| {
            b.iter(|| black_box(render_grid(&mut pool, s).unwrap()));
        });
    }
    group.finish();
}

fn bench_sample_points(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_points");
    let registry = NodeRegistry::builtin();
    let desc = proc_marble().describe().unwrap();
    for n in [1_000usize, 10_000] {
        let points: Vec<PointInfo> = (0..n)
            .map(|i| {
                let t = i as f64 * 0.001;
                PointInfo::at(t.sin(), t.cos(), t).with_footprint(0.001, 0.001, 0.001)
            })
            .collect();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &points, |b, pts| {
            b.iter(|| black_box(sample_points(&desc, &registry, pts, 0).unwrap()));
        });
    }
    group.finish();
}

fn bench_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence");
    let registry = NodeRegistry::builtin();
    let proc = proc_marble();
    let bytes = proc.to_bytes().unwrap();
    let json = proc.describe().unwrap().to_json().unwrap();

    group.bench_function("write_binary", |b| {
        b.iter(|| black_box(proc.to_bytes().unwrap()))
    });
    group.bench_function("read_binary", |b| {
        b.iter(|| black_box(Procedure::read_from(&mut bytes.as_slice(), &registry).unwrap()))
    });
    group.bench_function("describe_json", |b| {
        b.iter(|| black_box(proc.describe().unwrap().to_json().unwrap()))
    });
    group.bench_function("from_json", |b| {
        b.iter(|| {
            let desc = texgraph::eval::graph::ProcedureDescription::from_json(&json).unwrap();
            black_box(Procedure::from_description(&desc, &registry).unwrap())
        })
    });
    group.bench_function("duplicate", |b| b.iter(|| black_box(proc.duplicate(1))));
    group.finish();
}

criterion_group!(
    benches,
    bench_point_eval,
    bench_grid_resolution,
    bench_pool_size,
    bench_sample_points,
    bench_persistence,
);
criterion_main!(benches);
