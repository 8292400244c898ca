//! Integration tests for procedure evaluation.
//!
//! These tests verify:
//!   1. Independent duplicates evaluated on different threads agree with a
//!      fresh single-threaded duplicate
//!   2. Pool rendering matches point-by-point evaluation
//!   3. Binary persistence round-trips and rejects unknown versions
//!   4. JSON descriptions build the same procedure
//!   5. Octave cutoff behaviour seen through a whole procedure
//!   6. Cancellation from inside a render task

use std::sync::Arc;
use std::thread;
use texgraph::eval::graph::{Link, Procedure, ProcedureDescription};
use texgraph::eval::grid::{duplicate_lanes, render_grid, sample_points, GridSettings};
use texgraph::eval::node::Axis;
use texgraph::eval::nodes::{
    BlendNode, ColorNode, CoordinateNode, OutputNode, ScaleShiftNode, SineNode, SphericalNode,
    TurbulenceNode, ViewAngleNode, WoodNode,
};
use texgraph::eval::point::{PointInfo, RgbColor};
use texgraph::eval::registry::NodeRegistry;
use texgraph::pool::WorkerPool;
use texgraph::{PoolError, ProcError};

// ── Helpers ────────────────────────────────────────────────────────

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A procedure touching every numeric node kind:
///
///   spherical.Phi -> sine -> scale_shift -> turbulence.X
///   wood -> output "wood"
///   turbulence -> output "marble"
///   view_angle -> output "facing"
///   coordinate(X) -> blend.Fraction, color -> blend.A, blend -> output "tint"
fn marble() -> Procedure {
    let mut proc = Procedure::new();
    let sph = proc.add_node(SphericalNode::new());
    let sine = proc.add_node(SineNode::new());
    let scale = proc.add_node(ScaleShiftNode::new(3.0, 0.5));
    let turb = proc.add_node(TurbulenceNode::default());
    let wood = proc.add_node(WoodNode::default());
    let view = proc.add_node(ViewAngleNode::new(true));
    let x = proc.add_node(CoordinateNode::new(Axis::X));
    let red = proc.add_node(ColorNode::new(RgbColor::new(1.0, 0.0, 0.0)));
    let blend = proc.add_node(BlendNode::new(0.5));

    let marble = proc.add_output(OutputNode::numeric("marble", 0.0));
    let wood_out = proc.add_output(OutputNode::numeric("wood", 0.0));
    let facing = proc.add_output(OutputNode::numeric("facing", 0.0));
    let tint = proc.add_output(OutputNode::color("tint", RgbColor::BLACK));

    proc.link(sph, SphericalNode::PHI, sine, 0).unwrap();
    proc.link(sine, 0, scale, 0).unwrap();
    proc.link(scale, 0, turb, 0).unwrap();
    proc.link(turb, 0, marble, 0).unwrap();
    proc.link(wood, 0, wood_out, 0).unwrap();
    proc.link(view, 0, facing, 0).unwrap();
    proc.link(x, 0, blend, BlendNode::FRACTION).unwrap();
    proc.link(red, 0, blend, BlendNode::COLOR_A).unwrap();
    proc.link(blend, 0, tint, 0).unwrap();
    proc
}

fn points() -> Vec<PointInfo> {
    (0..64)
        .map(|i| {
            let t = i as f64 * 0.137;
            PointInfo::at(t.sin() * 2.0, t.cos() * 1.5, t * 0.2 - 1.0)
                .with_footprint(0.01, 0.01, 0.01)
                .with_view_angle(t.cos())
        })
        .collect()
}

/// Every output of `proc` at `p`, as bits so comparisons are exact.
fn snapshot(proc: &mut Procedure, p: &PointInfo) -> Vec<u64> {
    proc.init_for_point(p);
    let mut bits = Vec::new();
    for o in 0..proc.output_count() {
        let s = proc.output_sample(o, 0.0);
        bits.extend([s.value.to_bits(), s.error.to_bits()]);
        bits.extend([s.gradient.x.to_bits(), s.gradient.y.to_bits(), s.gradient.z.to_bits()]);
        let c = proc.output_color(o);
        bits.extend([c.r, c.g, c.b].map(|v| u64::from(v.to_bits())));
    }
    bits
}

// ── Cross-thread isolation ─────────────────────────────────────────

#[test]
fn duplicates_on_threads_match_single_thread() {
    init_logging();
    let proc = marble();
    let pts = Arc::new(points());

    let handles: Vec<_> = (0..4)
        .map(|lane| {
            let mut copy = proc.duplicate(lane + 1);
            let pts = Arc::clone(&pts);
            thread::spawn(move || {
                assert_eq!(copy.lane(), lane + 1);
                // Different threads walk the points in different orders.
                let mut order: Vec<usize> = (0..pts.len()).collect();
                order.rotate_left(lane * 7);
                let mut out = vec![Vec::new(); pts.len()];
                for i in order {
                    out[i] = snapshot(&mut copy, &pts[i]);
                }
                out
            })
        })
        .collect();

    let mut fresh = proc.duplicate(0);
    let expected: Vec<_> = pts.iter().map(|p| snapshot(&mut fresh, p)).collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

// ── Pool rendering ─────────────────────────────────────────────────

#[test]
fn pool_grid_matches_point_evaluation() {
    init_logging();
    let mut proc = marble();
    let mut pool = WorkerPool::new(duplicate_lanes(&proc, 3)).unwrap();

    for output in 0..2 {
        let settings = GridSettings {
            width: 24,
            height: 17,
            x_min: -2.0,
            x_max: 2.0,
            y_min: -1.0,
            y_max: 1.5,
            z: 0.25,
            output,
            ..GridSettings::default()
        };
        let grid = render_grid(&mut pool, &settings).unwrap();
        assert!(grid.min_value <= grid.max_value);
        for row in 0..settings.height {
            for col in 0..settings.width {
                proc.init_for_point(&settings.pixel(col, row));
                let expected = proc.output_value(output) as f32;
                assert_eq!(grid.get(col, row), Some(expected), "output {output} at {col},{row}");
            }
        }
    }
}

#[test]
fn render_task_can_cancel_the_run() {
    let proc = marble();
    let mut pool = WorkerPool::new(duplicate_lanes(&proc, 2)).unwrap();
    let handle = pool.cancel_handle();
    let report = pool
        .run(500, move |lane: &mut Procedure, i| {
            lane.init_for_point(&PointInfo::at(i as f64, 0.0, 0.0));
            if lane.output_value(0).is_finite() && i == 3 {
                handle.cancel();
            }
            Ok(())
        })
        .unwrap();
    assert!(report.cancelled);
    assert!(report.started < 500);
}

#[test]
fn finished_pool_reports_finished() {
    let proc = marble();
    let mut pool = WorkerPool::new(duplicate_lanes(&proc, 1)).unwrap();
    pool.finish().unwrap();
    let err = render_grid(&mut pool, &GridSettings::default()).unwrap_err();
    assert!(matches!(err, PoolError::Finished));
}

// ── Persistence ────────────────────────────────────────────────────

#[test]
fn binary_round_trip_preserves_every_output() {
    let mut proc = marble();
    let bytes = proc.to_bytes().unwrap();
    let mut back = Procedure::read_from(&mut bytes.as_slice(), &NodeRegistry::builtin()).unwrap();
    assert_eq!(back.links(), proc.links());
    for p in points() {
        assert_eq!(snapshot(&mut back, &p), snapshot(&mut proc, &p));
    }
}

#[test]
fn corrupt_node_version_fails_closed() {
    let mut proc = Procedure::new();
    proc.add_node(SineNode::new());
    let mut bytes = proc.to_bytes().unwrap();
    // u16 version, u32 count, u64 length + "sine", then the node's version byte.
    let node_version_at = 2 + 4 + 8 + 4;
    assert_eq!(bytes[node_version_at], 1);
    bytes[node_version_at] = 200;
    let err = Procedure::read_from(&mut bytes.as_slice(), &NodeRegistry::builtin()).unwrap_err();
    assert!(matches!(err, ProcError::UnsupportedVersion { found: 200, .. }));
}

#[test]
fn truncated_stream_is_an_error() {
    let proc = marble();
    let bytes = proc.to_bytes().unwrap();
    let cut = &bytes[..bytes.len() / 2];
    assert!(Procedure::read_from(&mut &cut[..], &NodeRegistry::builtin()).is_err());
}

#[test]
fn unknown_kind_in_stream_is_rejected() {
    let mut registry = NodeRegistry::empty();
    registry.register::<OutputNode>();
    let bytes = marble().to_bytes().unwrap();
    let err = Procedure::read_from(&mut bytes.as_slice(), &registry).unwrap_err();
    assert!(matches!(err, ProcError::UnknownNodeKind(k) if k == "spherical"));
}

// ── Descriptions ───────────────────────────────────────────────────

#[test]
fn json_description_round_trip() {
    let mut proc = marble();
    let text = proc.describe().unwrap().to_json().unwrap();
    let desc = ProcedureDescription::from_json(&text).unwrap();
    assert_eq!(desc.outputs.len(), 4);
    let mut back = Procedure::from_description(&desc, &NodeRegistry::builtin()).unwrap();
    for p in points() {
        assert_eq!(snapshot(&mut back, &p), snapshot(&mut proc, &p));
    }
}

#[test]
fn handwritten_description() {
    let text = r#"{
        "nodes": [
            { "kind": "coordinate", "params": { "axis": "Y" } },
            { "kind": "scale_shift", "params": { "scale": -2.0, "shift": 1.0 } },
            { "kind": "output", "params": { "name": "height" } }
        ],
        "links": [
            { "from_node": 0, "from_output": 0, "to_node": 1, "to_input": 0 },
            { "from_node": 1, "from_output": 0, "to_node": 2, "to_input": 0 }
        ],
        "outputs": [2]
    }"#;
    let desc = ProcedureDescription::from_json(text).unwrap();
    let mut proc = Procedure::from_description(&desc, &NodeRegistry::builtin()).unwrap();
    proc.init_for_point(&PointInfo::at(9.0, 3.0, 0.0).with_footprint(0.0, 0.25, 0.0));
    assert_eq!(proc.output_named("height"), Some(0));
    assert_eq!(proc.output_value(0), -5.0);
    assert_eq!(proc.output_error(0), 0.5);
    assert_eq!(proc.output_gradient(0).y, -2.0);
}

#[test]
fn description_cycle_is_rejected() {
    let desc = ProcedureDescription {
        nodes: vec![
            serde_json::from_str(r#"{ "kind": "sine" }"#).unwrap(),
            serde_json::from_str(r#"{ "kind": "sine" }"#).unwrap(),
        ],
        links: vec![Link::new(0, 0, 1, 0), Link::new(1, 0, 0, 0)],
        outputs: vec![],
    };
    let err = Procedure::from_description(&desc, &NodeRegistry::builtin()).unwrap_err();
    assert!(matches!(err, ProcError::CycleDetected { from: 1, to: 0 }));
}

// ── Antialiasing through a whole procedure ─────────────────────────

#[test]
fn wide_pixels_flatten_turbulence() {
    let mut proc = Procedure::new();
    let turb = proc.add_node(TurbulenceNode::default());
    let o = proc.add_output(OutputNode::numeric("n", 0.0));
    proc.link(turb, 0, o, 0).unwrap();

    // 4 pixels over 16 units: half-widths of 2.0 drop every octave.
    let settings = GridSettings {
        width: 4,
        height: 4,
        x_max: 16.0,
        y_max: 16.0,
        ..GridSettings::default()
    };
    let desc = proc.describe().unwrap();
    let pts: Vec<_> = (0..4).map(|i| settings.pixel(i, i)).collect();
    let samples = sample_points(&desc, &NodeRegistry::builtin(), &pts, 0).unwrap();
    assert!(samples.iter().all(|s| s.value == 0.0 && s.error == 0.0));
}

#[test]
fn footprint_growth_never_adds_detail() {
    let mut proc = Procedure::new();
    let turb = proc.add_node(TurbulenceNode::default());
    let o = proc.add_output(OutputNode::numeric("n", 0.0));
    proc.link(turb, 0, o, 0).unwrap();

    let base = PointInfo::at(0.71, -0.33, 1.9);
    let mut last_error = f64::INFINITY;
    for step in 0..40 {
        let size = 2.0 * 0.85f64.powi(step);
        proc.init_for_point(&base.with_footprint(size, size, size));
        let s = proc.output_sample(0, 0.0);
        assert!(s.value.is_finite() && s.error >= 0.0);
        if size >= 2.0 {
            assert_eq!(s.value, 0.0);
        }
        last_error = last_error.min(s.error);
    }
    assert!(last_error.is_finite());
}
