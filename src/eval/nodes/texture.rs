// eval/nodes/texture.rs - Band-limited noise generators
//
// Both nodes read their position from the X/Y/Z inputs and treat each
// input's error plus the query blur as the footprint half-width along that
// axis. Octaves the footprint cannot resolve fade out, then vanish.

use crate::eval::node::{node_kind_plumbing, Axis, NodeCore, NodeKind, ProcNode, Sample, Upstream};
use crate::eval::noise::{build_perm_table, octave_sum, OctaveParams, OctaveSum, PermTable};
use crate::eval::point::{Vec3, ZERO_VEC3};
use crate::eval::port::Port;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn xyz_inputs() -> [Port; 3] {
    [
        Port::numeric_input("X", "(X)"),
        Port::numeric_input("Y", "(Y)"),
        Port::numeric_input("Z", "(Z)"),
    ]
}

fn resolve_position(up: &Upstream<'_>, core: &NodeCore, blur: f64) -> [Sample; 3] {
    [
        up.coordinate(core, 0, Axis::X, blur),
        up.coordinate(core, 1, Axis::Y, blur),
        up.coordinate(core, 2, Axis::Z, blur),
    ]
}

/// Octave sum at the resolved position, with partials still in input space.
fn noise_at(perm: &PermTable, inputs: &[Sample; 3], blur: f64, params: OctaveParams) -> OctaveSum {
    let [x, y, z] = inputs;
    octave_sum(
        perm,
        Vec3::new(x.value, y.value, z.value),
        Vec3::new(x.error + blur, y.error + blur, z.error + blur),
        params,
    )
}

fn chain_gradient(partials: Vec3, inputs: &[Sample; 3]) -> Vec3 {
    inputs[0].gradient * partials.x + inputs[1].gradient * partials.y + inputs[2].gradient * partials.z
}

// ── Turbulence ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurbulenceParams {
    pub seed: i32,
    pub octaves: u32,
    pub amplitude: f64,
    pub persistence: f64,
}

impl Default for TurbulenceParams {
    fn default() -> Self {
        TurbulenceParams {
            seed: 0,
            octaves: 4,
            amplitude: 1.0,
            persistence: 0.5,
        }
    }
}

/// Multi-octave gradient noise with footprint-aware octave cutoff.
#[derive(Debug, Clone)]
pub struct TurbulenceNode {
    core: NodeCore,
    params: TurbulenceParams,
    perm: Arc<PermTable>,
}

impl TurbulenceNode {
    pub fn new(params: TurbulenceParams) -> Self {
        TurbulenceNode {
            core: NodeCore::new(xyz_inputs(), [Port::numeric_output("Value")]),
            perm: Arc::new(build_perm_table(params.seed)),
            params,
        }
    }

    pub fn settings(&self) -> &TurbulenceParams {
        &self.params
    }

    pub fn set_seed(&mut self, seed: i32) {
        if seed != self.params.seed {
            self.params.seed = seed;
            self.perm = Arc::new(build_perm_table(seed));
        }
    }

    pub fn set_octaves(&mut self, octaves: u32) {
        self.params.octaves = octaves;
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.params.amplitude = amplitude;
    }

    pub fn set_persistence(&mut self, persistence: f64) {
        self.params.persistence = persistence;
    }

    pub fn perm_table(&self) -> &Arc<PermTable> {
        &self.perm
    }

    fn octave_params(&self) -> OctaveParams {
        OctaveParams {
            octaves: self.params.octaves,
            amplitude: self.params.amplitude,
            persistence: self.params.persistence,
        }
    }
}

impl Default for TurbulenceNode {
    fn default() -> Self {
        TurbulenceNode::new(TurbulenceParams::default())
    }
}

impl NodeKind for TurbulenceNode {
    const KIND: &'static str = "turbulence";
    const VERSION: u8 = 1;
    type Params = TurbulenceParams;

    fn from_params(params: TurbulenceParams) -> Self {
        TurbulenceNode::new(params)
    }

    fn to_params(&self) -> TurbulenceParams {
        self.params.clone()
    }

    fn apply_params(&mut self, params: TurbulenceParams) {
        self.set_seed(params.seed);
        self.params = params;
    }
}

impl ProcNode for TurbulenceNode {
    node_kind_plumbing!();

    fn evaluate(&self, up: &Upstream<'_>, _output: usize, blur: f64) -> Sample {
        let inputs = resolve_position(up, &self.core, blur);
        let sum = noise_at(&self.perm, &inputs, blur, self.octave_params());
        Sample {
            value: sum.value,
            error: sum.error,
            gradient: chain_gradient(sum.partials, &inputs),
        }
    }
}

// ── Wood ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WoodParams {
    pub seed: i32,
    /// Rings per unit distance from the Z axis.
    pub spacing: f64,
    pub octaves: u32,
    /// Amplitude of the ring distortion.
    pub amplitude: f64,
    pub persistence: f64,
}

impl Default for WoodParams {
    fn default() -> Self {
        WoodParams {
            seed: 0,
            spacing: 4.0,
            octaves: 3,
            amplitude: 0.5,
            persistence: 0.5,
        }
    }
}

/// Concentric rings around the Z axis, distorted by turbulence.
///
/// Output is the fractional ring phase in [0, 1). Once the footprint spans
/// half a ring or more the phase is meaningless, and the node reports the
/// saturated sample `{ value: 0.5, error: 0.5, gradient: 0 }`.
#[derive(Debug, Clone)]
pub struct WoodNode {
    core: NodeCore,
    params: WoodParams,
    perm: Arc<PermTable>,
}

impl WoodNode {
    pub const SATURATED: Sample = Sample {
        value: 0.5,
        error: 0.5,
        gradient: ZERO_VEC3,
    };

    pub fn new(params: WoodParams) -> Self {
        WoodNode {
            core: NodeCore::new(xyz_inputs(), [Port::numeric_output("Value")]),
            perm: Arc::new(build_perm_table(params.seed)),
            params,
        }
    }

    pub fn settings(&self) -> &WoodParams {
        &self.params
    }

    pub fn set_seed(&mut self, seed: i32) {
        if seed != self.params.seed {
            self.params.seed = seed;
            self.perm = Arc::new(build_perm_table(seed));
        }
    }

    pub fn set_spacing(&mut self, spacing: f64) {
        self.params.spacing = spacing;
    }

    pub fn perm_table(&self) -> &Arc<PermTable> {
        &self.perm
    }
}

impl Default for WoodNode {
    fn default() -> Self {
        WoodNode::new(WoodParams::default())
    }
}

impl NodeKind for WoodNode {
    const KIND: &'static str = "wood";
    const VERSION: u8 = 1;
    type Params = WoodParams;

    fn from_params(params: WoodParams) -> Self {
        WoodNode::new(params)
    }

    fn to_params(&self) -> WoodParams {
        self.params.clone()
    }

    fn apply_params(&mut self, params: WoodParams) {
        self.set_seed(params.seed);
        self.params = params;
    }
}

impl ProcNode for WoodNode {
    node_kind_plumbing!();

    fn evaluate(&self, up: &Upstream<'_>, _output: usize, blur: f64) -> Sample {
        let inputs = resolve_position(up, &self.core, blur);
        let turb = noise_at(
            &self.perm,
            &inputs,
            blur,
            OctaveParams {
                octaves: self.params.octaves,
                amplitude: self.params.amplitude,
                persistence: self.params.persistence,
            },
        );

        let (x, y) = (inputs[0].value, inputs[1].value);
        let rho = (x * x + y * y).sqrt();
        let spacing = self.params.spacing;
        let ring_partials = if rho > 0.0 {
            Vec3::new(spacing * x / rho, spacing * y / rho, 0.0)
        } else {
            ZERO_VEC3
        };

        let error = ring_partials.x.abs() * (inputs[0].error + blur)
            + ring_partials.y.abs() * (inputs[1].error + blur)
            + turb.error;
        if error >= 0.5 {
            return Self::SATURATED;
        }

        let phase = spacing * rho + turb.value;
        Sample {
            value: phase - phase.floor(),
            error,
            gradient: chain_gradient(ring_partials + turb.partials, &inputs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::graph::Procedure;
    use crate::eval::noise::fbm_3d;
    use crate::eval::point::PointInfo;

    fn turbulence_at(proc: &mut Procedure, node: usize, p: PointInfo) -> Sample {
        proc.init_for_point(&p);
        proc.node_sample(node, 0, 0.0)
    }

    #[test]
    fn huge_footprint_is_exactly_zero() {
        let mut proc = Procedure::new();
        let t = proc.add_node(TurbulenceNode::default());
        for (x, y, z) in [(0.3, 1.7, -2.2), (10.0, 0.5, 4.4)] {
            let p = PointInfo::at(x, y, z).with_footprint(2.0, 2.0, 2.0);
            let s = turbulence_at(&mut proc, t, p);
            assert_eq!(s.value, 0.0);
            assert_eq!(s.error, 0.0);
            assert_eq!(s.gradient, ZERO_VEC3);
        }
    }

    #[test]
    fn tiny_footprint_matches_unfiltered_noise() {
        let mut proc = Procedure::new();
        let t = proc.add_node(TurbulenceNode::default());
        let perm = build_perm_table(0);
        let p = PointInfo::at(0.37, -1.21, 2.9).with_footprint(0.001, 0.001, 0.001);
        let s = turbulence_at(&mut proc, t, p);
        let plain = fbm_3d(&perm, p.x, p.y, p.z, 1.0, 4, 2.0, 0.5);
        assert!((s.value - plain).abs() < 1e-12);
    }

    #[test]
    fn blur_widens_the_footprint() {
        let mut proc = Procedure::new();
        let t = proc.add_node(TurbulenceNode::default());
        proc.init_for_point(&PointInfo::at(0.37, -1.21, 2.9));
        assert_ne!(proc.node_sample(t, 0, 0.0).value, 0.0);
        assert_eq!(proc.node_sample(t, 0, 2.0).value, 0.0);
    }

    #[test]
    fn seed_changes_the_pattern() {
        let mut proc = Procedure::new();
        let a = proc.add_node(TurbulenceNode::default());
        let b = proc.add_node(TurbulenceNode::new(TurbulenceParams {
            seed: 99,
            ..TurbulenceParams::default()
        }));
        proc.init_for_point(&PointInfo::at(0.37, -1.21, 2.9));
        assert_ne!(proc.node_sample(a, 0, 0.0).value, proc.node_sample(b, 0, 0.0).value);
    }

    #[test]
    fn duplicate_shares_the_table() {
        let node = TurbulenceNode::default();
        let copy = node.duplicate();
        let copy = copy.as_any().downcast_ref::<TurbulenceNode>().unwrap();
        assert!(Arc::ptr_eq(node.perm_table(), copy.perm_table()));
    }

    #[test]
    fn wood_saturates_on_wide_footprint() {
        let mut proc = Procedure::new();
        let w = proc.add_node(WoodNode::default());
        let p = PointInfo::at(1.0, 1.0, 0.0).with_footprint(0.2, 0.2, 0.2);
        proc.init_for_point(&p);
        assert_eq!(proc.node_sample(w, 0, 0.0), WoodNode::SATURATED);
    }

    #[test]
    fn wood_saturates_from_half_a_ring() {
        let mut proc = Procedure::new();
        let w = proc.add_node(WoodNode::new(WoodParams {
            amplitude: 0.0,
            ..WoodParams::default()
        }));
        // On the +X axis the ring error is spacing * xsize = 4 * xsize.
        proc.init_for_point(&PointInfo::at(1.0, 0.0, 0.0).with_footprint(0.125, 0.0, 0.0));
        assert_eq!(proc.node_sample(w, 0, 0.0), WoodNode::SATURATED);

        proc.init_for_point(&PointInfo::at(1.0, 0.0, 0.0).with_footprint(0.124, 0.0, 0.0));
        let s = proc.node_sample(w, 0, 0.0);
        assert_ne!(s, WoodNode::SATURATED);
        assert!((s.error - 0.496).abs() < 1e-12);
        assert!(s.value.abs() < 1e-9 || (s.value - 1.0).abs() < 1e-9);
        assert!((s.gradient.x - 4.0).abs() < 1e-12);
    }

    #[test]
    fn wood_rings_without_distortion() {
        let mut proc = Procedure::new();
        let w = proc.add_node(WoodNode::new(WoodParams {
            amplitude: 0.0,
            ..WoodParams::default()
        }));
        proc.init_for_point(&PointInfo::at(0.3, 0.4, 0.0).with_footprint(0.01, 0.0, 0.0));
        let s = proc.node_sample(w, 0, 0.0);
        // 4 rings per unit at radius 0.5 puts the phase at exactly 2.0.
        assert!(s.value.abs() < 1e-9 || (s.value - 1.0).abs() < 1e-9);
        assert!((s.error - 4.0 * 0.6 * 0.01).abs() < 1e-12);
        assert!((s.gradient.x - 4.0 * 0.6).abs() < 1e-12);
    }

    #[test]
    fn wood_phase_is_fractional() {
        let mut proc = Procedure::new();
        let w = proc.add_node(WoodNode::default());
        for i in 0..20 {
            let t = i as f64 * 0.173;
            proc.init_for_point(&PointInfo::at(t, 1.0 - t, t * 0.5));
            let s = proc.node_sample(w, 0, 0.0);
            assert!((0.0..1.0).contains(&s.value), "{s:?}");
            // Exact point sample: no error at all.
            assert_eq!(s.error, 0.0);
        }
    }
}
