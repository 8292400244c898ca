// eval/nodes/basic.rs - Constants, coordinates, colors and graph outputs

use crate::eval::node::{node_kind_plumbing, Axis, NodeCore, NodeKind, ProcNode, Sample, Upstream};
use crate::eval::point::RgbColor;
use crate::eval::port::{Port, ValueKind};
use log::debug;
use serde::{Deserialize, Serialize};

// ── Constant ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantParams {
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct ConstantNode {
    core: NodeCore,
    value: f64,
}

impl ConstantNode {
    pub fn new(value: f64) -> Self {
        ConstantNode {
            core: NodeCore::new([], [Port::numeric_output("Value")]),
            value,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }
}

impl NodeKind for ConstantNode {
    const KIND: &'static str = "constant";
    const VERSION: u8 = 1;
    type Params = ConstantParams;

    fn from_params(params: ConstantParams) -> Self {
        ConstantNode::new(params.value)
    }

    fn to_params(&self) -> ConstantParams {
        ConstantParams { value: self.value }
    }

    fn apply_params(&mut self, params: ConstantParams) {
        self.value = params.value;
    }
}

impl ProcNode for ConstantNode {
    node_kind_plumbing!();

    fn evaluate(&self, _up: &Upstream<'_>, _output: usize, _blur: f64) -> Sample {
        Sample::exact(self.value)
    }
}

// ── Coordinate ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinateParams {
    pub axis: Axis,
}

/// Exposes one component of the sample point, footprint included.
#[derive(Debug, Clone)]
pub struct CoordinateNode {
    core: NodeCore,
    axis: Axis,
}

impl CoordinateNode {
    pub fn new(axis: Axis) -> Self {
        CoordinateNode {
            core: NodeCore::new([], [Port::numeric_output("Value")]),
            axis,
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn set_axis(&mut self, axis: Axis) {
        self.axis = axis;
    }
}

impl NodeKind for CoordinateNode {
    const KIND: &'static str = "coordinate";
    const VERSION: u8 = 1;
    type Params = CoordinateParams;

    fn from_params(params: CoordinateParams) -> Self {
        CoordinateNode::new(params.axis)
    }

    fn to_params(&self) -> CoordinateParams {
        CoordinateParams { axis: self.axis }
    }

    fn apply_params(&mut self, params: CoordinateParams) {
        self.axis = params.axis;
    }
}

impl ProcNode for CoordinateNode {
    node_kind_plumbing!();

    fn evaluate(&self, _up: &Upstream<'_>, _output: usize, _blur: f64) -> Sample {
        self.axis.sample(self.core.point())
    }
}

// ── Color ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorParams {
    pub color: RgbColor,
}

impl Default for ColorParams {
    fn default() -> Self {
        ColorParams {
            color: RgbColor::WHITE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColorNode {
    core: NodeCore,
    color: RgbColor,
}

impl ColorNode {
    pub fn new(color: RgbColor) -> Self {
        ColorNode {
            core: NodeCore::new([], [Port::color_output("Color")]),
            color,
        }
    }

    pub fn color_value(&self) -> RgbColor {
        self.color
    }

    pub fn set_color(&mut self, color: RgbColor) {
        self.color = color;
    }
}

impl NodeKind for ColorNode {
    const KIND: &'static str = "color";
    const VERSION: u8 = 1;
    type Params = ColorParams;

    fn from_params(params: ColorParams) -> Self {
        ColorNode::new(params.color)
    }

    fn to_params(&self) -> ColorParams {
        ColorParams { color: self.color }
    }

    fn apply_params(&mut self, params: ColorParams) {
        self.color = params.color;
    }
}

impl ProcNode for ColorNode {
    node_kind_plumbing!();

    fn evaluate(&self, _up: &Upstream<'_>, _output: usize, _blur: f64) -> Sample {
        Sample::ZERO
    }

    fn evaluate_color(&self, _up: &Upstream<'_>, _output: usize, _blur: f64) -> RgbColor {
        self.color
    }
}

// ── Blend ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendParams {
    /// Used while the Fraction input is unconnected.
    pub fraction: f64,
}

impl Default for BlendParams {
    fn default() -> Self {
        BlendParams { fraction: 0.5 }
    }
}

/// `A * (1 - f) + B * f`, with `f` clamped to [0, 1].
#[derive(Debug, Clone)]
pub struct BlendNode {
    core: NodeCore,
    fraction: f64,
}

impl BlendNode {
    pub const COLOR_A: usize = 0;
    pub const COLOR_B: usize = 1;
    pub const FRACTION: usize = 2;

    pub fn new(fraction: f64) -> Self {
        BlendNode {
            core: NodeCore::new(
                [
                    Port::color_input("Color A", "(black)"),
                    Port::color_input("Color B", "(white)"),
                    Port::numeric_input("Fraction", "(0.5)"),
                ],
                [Port::color_output("Color")],
            ),
            fraction,
        }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn set_fraction(&mut self, fraction: f64) {
        self.fraction = fraction;
    }
}

impl NodeKind for BlendNode {
    const KIND: &'static str = "blend";
    const VERSION: u8 = 1;
    type Params = BlendParams;

    fn from_params(params: BlendParams) -> Self {
        BlendNode::new(params.fraction)
    }

    fn to_params(&self) -> BlendParams {
        BlendParams {
            fraction: self.fraction,
        }
    }

    fn apply_params(&mut self, params: BlendParams) {
        self.fraction = params.fraction;
    }
}

impl ProcNode for BlendNode {
    node_kind_plumbing!();

    fn evaluate(&self, _up: &Upstream<'_>, _output: usize, _blur: f64) -> Sample {
        Sample::ZERO
    }

    fn evaluate_color(&self, up: &Upstream<'_>, _output: usize, blur: f64) -> RgbColor {
        let a = up
            .input_color(&self.core, Self::COLOR_A, blur)
            .unwrap_or(RgbColor::BLACK);
        let b = up
            .input_color(&self.core, Self::COLOR_B, blur)
            .unwrap_or(RgbColor::WHITE);
        let f = up
            .input_value(&self.core, Self::FRACTION, blur)
            .unwrap_or(self.fraction)
            .clamp(0.0, 1.0);
        a.lerp(b, f as f32)
    }
}

// ── Output ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputParams {
    pub name: String,
    pub kind: ValueKind,
    pub default_value: f64,
    pub default_color: RgbColor,
}

impl Default for OutputParams {
    fn default() -> Self {
        OutputParams {
            name: "Output".to_string(),
            kind: ValueKind::Numeric,
            default_value: 0.0,
            default_color: RgbColor::BLACK,
        }
    }
}

/// A named result of the procedure. Passes its input through, or reports
/// its default while unconnected.
#[derive(Debug, Clone)]
pub struct OutputNode {
    core: NodeCore,
    name: String,
    kind: ValueKind,
    default_value: f64,
    default_color: RgbColor,
}

impl OutputNode {
    pub fn numeric(name: impl Into<String>, default_value: f64) -> Self {
        OutputNode::from_params(OutputParams {
            name: name.into(),
            kind: ValueKind::Numeric,
            default_value,
            ..OutputParams::default()
        })
    }

    pub fn color(name: impl Into<String>, default_color: RgbColor) -> Self {
        OutputNode::from_params(OutputParams {
            name: name.into(),
            kind: ValueKind::Color,
            default_color,
            ..OutputParams::default()
        })
    }

    fn ports(kind: ValueKind) -> NodeCore {
        NodeCore::new(
            [Port::input(kind, "Value").with_default_label("(default)")],
            [Port::output(kind, "Result")],
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_kind(&self) -> ValueKind {
        self.kind
    }

    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    pub fn default_color(&self) -> RgbColor {
        self.default_color
    }
}

impl NodeKind for OutputNode {
    const KIND: &'static str = "output";
    const VERSION: u8 = 1;
    type Params = OutputParams;

    fn from_params(params: OutputParams) -> Self {
        OutputNode {
            core: OutputNode::ports(params.kind),
            name: params.name,
            kind: params.kind,
            default_value: params.default_value,
            default_color: params.default_color,
        }
    }

    fn to_params(&self) -> OutputParams {
        OutputParams {
            name: self.name.clone(),
            kind: self.kind,
            default_value: self.default_value,
            default_color: self.default_color,
        }
    }

    fn apply_params(&mut self, params: OutputParams) {
        if params.kind != self.kind {
            debug!(
                "output '{}' changed kind {} -> {}; its input is now disconnected",
                params.name, self.kind, params.kind
            );
            let id = self.core.id;
            self.core = OutputNode::ports(params.kind);
            self.core.id = id;
        }
        self.name = params.name;
        self.kind = params.kind;
        self.default_value = params.default_value;
        self.default_color = params.default_color;
    }
}

impl ProcNode for OutputNode {
    node_kind_plumbing!();

    fn evaluate(&self, up: &Upstream<'_>, _output: usize, blur: f64) -> Sample {
        up.input_or(&self.core, 0, blur, Sample::exact(self.default_value))
    }

    fn evaluate_color(&self, up: &Upstream<'_>, _output: usize, blur: f64) -> RgbColor {
        up.input_color(&self.core, 0, blur)
            .unwrap_or(self.default_color)
    }
}
