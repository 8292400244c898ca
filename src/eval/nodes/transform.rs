// eval/nodes/transform.rs - Pointwise transforms and coordinate changes
//
// Each transform propagates error and gradient to first order: the upstream
// error is scaled by the magnitude of the local derivative, the upstream
// gradient by the derivative itself.

use crate::eval::node::{
    node_kind_plumbing, Axis, Memo, NodeCore, NodeKind, ProcNode, Sample, Upstream,
};
use crate::eval::point::{PointInfo, Vec3, ZERO_VEC3};
use crate::eval::port::Port;
use serde::{Deserialize, Serialize};

/// Chain rule over three inputs with the given partial derivatives.
fn combine(value: f64, partials: Vec3, inputs: [Sample; 3]) -> Sample {
    let [x, y, z] = inputs;
    Sample {
        value,
        error: partials.x.abs() * x.error + partials.y.abs() * y.error + partials.z.abs() * z.error,
        gradient: x.gradient * partials.x + y.gradient * partials.y + z.gradient * partials.z,
    }
}

// ── Sine ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SineParams {}

/// `sin(v)`; an unconnected input reads the X coordinate.
#[derive(Debug, Clone)]
pub struct SineNode {
    core: NodeCore,
}

impl SineNode {
    pub fn new() -> Self {
        SineNode {
            core: NodeCore::new(
                [Port::numeric_input("Angle", "(X)")],
                [Port::numeric_output("Value")],
            ),
        }
    }
}

impl Default for SineNode {
    fn default() -> Self {
        SineNode::new()
    }
}

impl NodeKind for SineNode {
    const KIND: &'static str = "sine";
    const VERSION: u8 = 1;
    type Params = SineParams;

    fn from_params(_params: SineParams) -> Self {
        SineNode::new()
    }

    fn to_params(&self) -> SineParams {
        SineParams {}
    }

    fn apply_params(&mut self, _params: SineParams) {}
}

impl ProcNode for SineNode {
    node_kind_plumbing!();

    fn evaluate(&self, up: &Upstream<'_>, _output: usize, blur: f64) -> Sample {
        let v = up.coordinate(&self.core, 0, Axis::X, blur);
        let d = v.value.cos();
        Sample {
            value: v.value.sin(),
            error: d.abs() * v.error,
            gradient: v.gradient * d,
        }
    }
}

// ── ScaleShift ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleShiftParams {
    pub scale: f64,
    pub shift: f64,
}

impl Default for ScaleShiftParams {
    fn default() -> Self {
        ScaleShiftParams {
            scale: 1.0,
            shift: 0.0,
        }
    }
}

/// `v * scale + shift`; an unconnected input reads the X coordinate.
#[derive(Debug, Clone)]
pub struct ScaleShiftNode {
    core: NodeCore,
    scale: f64,
    shift: f64,
}

impl ScaleShiftNode {
    pub fn new(scale: f64, shift: f64) -> Self {
        ScaleShiftNode {
            core: NodeCore::new(
                [Port::numeric_input("Value", "(X)")],
                [Port::numeric_output("Value")],
            ),
            scale,
            shift,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn shift(&self) -> f64 {
        self.shift
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    pub fn set_shift(&mut self, shift: f64) {
        self.shift = shift;
    }
}

impl NodeKind for ScaleShiftNode {
    const KIND: &'static str = "scale_shift";
    const VERSION: u8 = 1;
    type Params = ScaleShiftParams;

    fn from_params(params: ScaleShiftParams) -> Self {
        ScaleShiftNode::new(params.scale, params.shift)
    }

    fn to_params(&self) -> ScaleShiftParams {
        ScaleShiftParams {
            scale: self.scale,
            shift: self.shift,
        }
    }

    fn apply_params(&mut self, params: ScaleShiftParams) {
        self.scale = params.scale;
        self.shift = params.shift;
    }
}

impl ProcNode for ScaleShiftNode {
    node_kind_plumbing!();

    fn evaluate(&self, up: &Upstream<'_>, _output: usize, blur: f64) -> Sample {
        let v = up.coordinate(&self.core, 0, Axis::X, blur);
        Sample {
            value: v.value * self.scale + self.shift,
            error: self.scale.abs() * v.error,
            gradient: v.gradient * self.scale,
        }
    }
}

// ── ViewAngle ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewAngleParams {
    /// Report `|cos|` so back faces read like front faces.
    pub two_sided: bool,
}

/// Cosine between view ray and surface normal, 0 when the caller has none.
/// Treated as exact: zero error, zero gradient.
#[derive(Debug, Clone)]
pub struct ViewAngleNode {
    core: NodeCore,
    two_sided: bool,
}

impl ViewAngleNode {
    pub fn new(two_sided: bool) -> Self {
        ViewAngleNode {
            core: NodeCore::new([], [Port::numeric_output("Angle")]),
            two_sided,
        }
    }

    pub fn two_sided(&self) -> bool {
        self.two_sided
    }

    pub fn set_two_sided(&mut self, two_sided: bool) {
        self.two_sided = two_sided;
    }
}

impl NodeKind for ViewAngleNode {
    const KIND: &'static str = "view_angle";
    const VERSION: u8 = 1;
    type Params = ViewAngleParams;

    fn from_params(params: ViewAngleParams) -> Self {
        ViewAngleNode::new(params.two_sided)
    }

    fn to_params(&self) -> ViewAngleParams {
        ViewAngleParams {
            two_sided: self.two_sided,
        }
    }

    fn apply_params(&mut self, params: ViewAngleParams) {
        self.two_sided = params.two_sided;
    }
}

impl ProcNode for ViewAngleNode {
    node_kind_plumbing!();

    fn evaluate(&self, _up: &Upstream<'_>, _output: usize, _blur: f64) -> Sample {
        let angle = self.core.point().view_angle.unwrap_or(0.0);
        Sample::exact(if self.two_sided { angle.abs() } else { angle })
    }
}

// ── Spherical ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SphericalParams {}

/// Resolved inputs plus `r1 = x² + y²` and `r2 = r1 + z²`.
#[derive(Debug, Clone, Copy)]
struct Radii {
    inputs: [Sample; 3],
    r1: f64,
    r2: f64,
}

/// Cartesian to spherical: R, Theta (polar angle from +Z) and Phi
/// (azimuth from +X), all in radians.
#[derive(Debug, Clone)]
pub struct SphericalNode {
    core: NodeCore,
    radii: Memo<Radii>,
}

impl SphericalNode {
    pub const R: usize = 0;
    pub const THETA: usize = 1;
    pub const PHI: usize = 2;

    pub fn new() -> Self {
        SphericalNode {
            core: NodeCore::new(
                [
                    Port::numeric_input("X", "(X)"),
                    Port::numeric_input("Y", "(Y)"),
                    Port::numeric_input("Z", "(Z)"),
                ],
                [
                    Port::numeric_output("R"),
                    Port::numeric_output("Theta"),
                    Port::numeric_output("Phi"),
                ],
            ),
            radii: Memo::new(),
        }
    }

    fn radii(&self, up: &Upstream<'_>, blur: f64) -> Radii {
        self.radii.get_or_compute(blur, || {
            let x = up.coordinate(&self.core, 0, Axis::X, blur);
            let y = up.coordinate(&self.core, 1, Axis::Y, blur);
            let z = up.coordinate(&self.core, 2, Axis::Z, blur);
            let r1 = x.value * x.value + y.value * y.value;
            Radii {
                inputs: [x, y, z],
                r1,
                r2: r1 + z.value * z.value,
            }
        })
    }
}

impl Default for SphericalNode {
    fn default() -> Self {
        SphericalNode::new()
    }
}

impl NodeKind for SphericalNode {
    const KIND: &'static str = "spherical";
    const VERSION: u8 = 1;
    type Params = SphericalParams;

    fn from_params(_params: SphericalParams) -> Self {
        SphericalNode::new()
    }

    fn to_params(&self) -> SphericalParams {
        SphericalParams {}
    }

    fn apply_params(&mut self, _params: SphericalParams) {}
}

impl ProcNode for SphericalNode {
    node_kind_plumbing!();

    fn init(&mut self, point: &PointInfo) {
        self.core.init(point);
        self.radii.clear();
    }

    fn evaluate(&self, up: &Upstream<'_>, output: usize, blur: f64) -> Sample {
        let Radii { inputs, r1, r2 } = self.radii(up, blur);
        let [x, y, z] = inputs.map(|s| s.value);
        match output {
            Self::R => {
                let r = r2.sqrt();
                let partials = if r2 > 0.0 {
                    Vec3::new(x / r, y / r, z / r)
                } else {
                    ZERO_VEC3
                };
                combine(r, partials, inputs)
            }
            Self::THETA => {
                let rho = r1.sqrt();
                let partials = if r1 > 0.0 && r2 > 0.0 {
                    let k = z / (rho * r2);
                    Vec3::new(x * k, y * k, -rho / r2)
                } else {
                    ZERO_VEC3
                };
                combine(rho.atan2(z), partials, inputs)
            }
            Self::PHI => {
                let partials = if r1 > 0.0 {
                    Vec3::new(-y / r1, x / r1, 0.0)
                } else {
                    ZERO_VEC3
                };
                combine(y.atan2(x), partials, inputs)
            }
            _ => Sample::ZERO,
        }
    }
}
