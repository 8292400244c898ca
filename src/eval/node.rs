// eval/node.rs - The node capability set and its per-point caches
//
// Every node kind implements `ProcNode`. A node only has to know how to
// compute one output from its inputs (`evaluate`); caching, cycle guarding
// and input resolution are shared here.
//
// Caches live in `Cell`s so that evaluation only needs `&self`. That makes
// every node (and therefore every `Procedure`) `Send` but not `Sync`: a graph
// can be handed to a worker thread, but never evaluated from two threads at
// once. Parallel callers duplicate the graph instead.

use crate::error::ProcError;
use crate::eval::point::{PointInfo, RgbColor, Vec3, UNIT_X, UNIT_Y, UNIT_Z, ZERO_VEC3};
use crate::eval::port::{LinkSource, Port};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::any::Any;
use std::cell::Cell;
use std::io::Write;

/// Identity of a node within its procedure. Assigned by the procedure when
/// the node is added and carried over unchanged by `duplicate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

// ── Sample ──────────────────────────────────────────────────────────

/// Value of one numeric output over the current footprint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    /// Average over the footprint.
    pub value: f64,
    /// First-order bound on how much the value varies across the footprint.
    pub error: f64,
    /// Spatial derivative at the sample point.
    pub gradient: Vec3,
}

impl Sample {
    pub const ZERO: Sample = Sample {
        value: 0.0,
        error: 0.0,
        gradient: ZERO_VEC3,
    };

    /// A value with no spatial variation.
    pub const fn exact(value: f64) -> Sample {
        Sample {
            value,
            error: 0.0,
            gradient: ZERO_VEC3,
        }
    }
}

// ── Axis ────────────────────────────────────────────────────────────

/// A component of the sample context usable as a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Axis {
    #[default]
    X,
    Y,
    Z,
    /// Time. Carries no footprint and no spatial gradient.
    T,
}

impl Axis {
    /// The sample an unconnected coordinate input takes at `point`.
    pub fn sample(self, point: &PointInfo) -> Sample {
        match self {
            Axis::X => Sample {
                value: point.x,
                error: point.xsize,
                gradient: UNIT_X,
            },
            Axis::Y => Sample {
                value: point.y,
                error: point.ysize,
                gradient: UNIT_Y,
            },
            Axis::Z => Sample {
                value: point.z,
                error: point.zsize,
                gradient: UNIT_Z,
            },
            Axis::T => Sample::exact(point.time),
        }
    }
}

// ── OutputCache ─────────────────────────────────────────────────────

/// Per-output cache. Valid entries are `Some`; everything is keyed by the
/// blur it was computed with.
#[derive(Debug, Default)]
pub struct OutputCache {
    blur: Cell<f64>,
    value: Cell<Option<f64>>,
    error: Cell<Option<f64>>,
    gradient: Cell<Option<Vec3>>,
    color: Cell<Option<RgbColor>>,
}

impl OutputCache {
    pub fn invalidate(&self) {
        self.value.set(None);
        self.error.set(None);
        self.gradient.set(None);
        self.color.set(None);
    }

    /// Switch the cache to `blur`, dropping entries computed with another.
    #[inline]
    fn select_blur(&self, blur: f64) {
        if self.blur.get().to_bits() != blur.to_bits() {
            self.invalidate();
            self.blur.set(blur);
        }
    }

    pub fn value(&self, blur: f64) -> Option<f64> {
        self.select_blur(blur);
        self.value.get()
    }

    pub fn sample(&self, blur: f64) -> Option<Sample> {
        self.select_blur(blur);
        Some(Sample {
            value: self.value.get()?,
            error: self.error.get()?,
            gradient: self.gradient.get()?,
        })
    }

    pub fn store(&self, blur: f64, sample: Sample) {
        self.select_blur(blur);
        self.value.set(Some(sample.value));
        self.error.set(Some(sample.error));
        self.gradient.set(Some(sample.gradient));
    }

    pub fn color(&self, blur: f64) -> Option<RgbColor> {
        self.select_blur(blur);
        self.color.get()
    }

    pub fn store_color(&self, blur: f64, color: RgbColor) {
        self.select_blur(blur);
        self.color.set(Some(color));
    }

    pub fn is_valid(&self) -> bool {
        self.value.get().is_some() || self.color.get().is_some()
    }
}

/// A single intermediate shared by several outputs of one node, keyed by
/// blur and cleared on `init`. Duplicates start empty.
#[derive(Debug, Default)]
pub struct Memo<T: Copy>(Cell<Option<(u64, T)>>);

impl<T: Copy> Memo<T> {
    pub fn new() -> Self {
        Memo(Cell::new(None))
    }

    pub fn clear(&self) {
        self.0.set(None);
    }

    pub fn get_or_compute(&self, blur: f64, compute: impl FnOnce() -> T) -> T {
        let key = blur.to_bits();
        if let Some((k, v)) = self.0.get() {
            if k == key {
                return v;
            }
        }
        let v = compute();
        self.0.set(Some((key, v)));
        v
    }
}

impl<T: Copy> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Memo::new()
    }
}

// ── NodeCore ────────────────────────────────────────────────────────

/// State every node kind carries: ports, caches and the current point.
#[derive(Debug)]
pub struct NodeCore {
    pub id: NodeId,
    pub inputs: SmallVec<[Port; 4]>,
    pub outputs: SmallVec<[Port; 3]>,
    caches: SmallVec<[OutputCache; 3]>,
    point: PointInfo,
    visiting: Cell<bool>,
    cycle_reported: Cell<bool>,
}

impl NodeCore {
    pub fn new(
        inputs: impl IntoIterator<Item = Port>,
        outputs: impl IntoIterator<Item = Port>,
    ) -> Self {
        let outputs: SmallVec<[Port; 3]> = outputs.into_iter().collect();
        let caches = outputs.iter().map(|_| OutputCache::default()).collect();
        NodeCore {
            id: NodeId::default(),
            inputs: inputs.into_iter().collect(),
            outputs,
            caches,
            point: PointInfo::default(),
            visiting: Cell::new(false),
            cycle_reported: Cell::new(false),
        }
    }

    /// The point passed to the most recent `init`.
    #[inline]
    pub fn point(&self) -> &PointInfo {
        &self.point
    }

    pub fn init(&mut self, point: &PointInfo) {
        self.point = *point;
        self.visiting.set(false);
        for cache in &self.caches {
            cache.invalidate();
        }
    }

    #[inline]
    pub fn cache(&self, output: usize) -> Option<&OutputCache> {
        self.caches.get(output)
    }

    #[inline]
    pub fn input_source(&self, input: usize) -> Option<LinkSource> {
        self.inputs.get(input).and_then(|p| p.source)
    }
}

impl Clone for NodeCore {
    /// Same ports and links, fresh caches.
    fn clone(&self) -> Self {
        NodeCore {
            id: self.id,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            caches: self.outputs.iter().map(|_| OutputCache::default()).collect(),
            point: self.point,
            visiting: Cell::new(false),
            cycle_reported: Cell::new(false),
        }
    }
}

// ── ProcNode ────────────────────────────────────────────────────────

/// Capability set shared by every node kind.
pub trait ProcNode: Send + Any {
    /// Kind identifier used by the registry and the persisted format.
    fn kind(&self) -> &'static str;

    fn core(&self) -> &NodeCore;

    fn core_mut(&mut self) -> &mut NodeCore;

    /// Compute the numeric sample of `output`. Only called on a cache miss.
    fn evaluate(&self, up: &Upstream<'_>, output: usize, blur: f64) -> Sample;

    /// Compute the color of `output`. Only called on a cache miss.
    fn evaluate_color(&self, _up: &Upstream<'_>, _output: usize, _blur: f64) -> RgbColor {
        RgbColor::BLACK
    }

    /// Prepare for a new sample point. Clears every cached output.
    fn init(&mut self, point: &PointInfo) {
        self.core_mut().init(point);
    }

    /// Write the tunable parameters (never cached state), version-tagged.
    fn write_params(&self, sink: &mut dyn Write) -> Result<(), ProcError>;

    /// Tunable parameters as JSON, for editors and descriptions.
    fn params(&self) -> Result<Value, ProcError>;

    fn set_params(&mut self, params: Value) -> Result<(), ProcError>;

    /// Deep copy with the same parameters and links and empty caches.
    fn duplicate(&self) -> Box<dyn ProcNode>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    // ── Cached queries ──

    fn sample(&self, up: &Upstream<'_>, output: usize, blur: f64) -> Sample {
        let Some(cache) = self.core().cache(output) else {
            return Sample::ZERO;
        };
        if let Some(sample) = cache.sample(blur) {
            return sample;
        }
        let sample = self.evaluate(up, output, blur);
        cache.store(blur, sample);
        sample
    }

    fn average_value(&self, up: &Upstream<'_>, output: usize, blur: f64) -> f64 {
        if let Some(v) = self.core().cache(output).and_then(|c| c.value(blur)) {
            return v;
        }
        self.sample(up, output, blur).value
    }

    fn value_error(&self, up: &Upstream<'_>, output: usize, blur: f64) -> f64 {
        self.sample(up, output, blur).error
    }

    fn value_gradient(&self, up: &Upstream<'_>, output: usize, blur: f64) -> Vec3 {
        self.sample(up, output, blur).gradient
    }

    fn color(&self, up: &Upstream<'_>, output: usize, blur: f64) -> RgbColor {
        let Some(cache) = self.core().cache(output) else {
            return RgbColor::BLACK;
        };
        if let Some(color) = cache.color(blur) {
            return color;
        }
        let color = self.evaluate_color(up, output, blur);
        cache.store_color(blur, color);
        color
    }
}

/// Static description of a node kind: its parameters and how to build it.
///
/// The registry and the serialization helpers are generic over this, so a
/// new kind only has to describe its parameters.
pub trait NodeKind: ProcNode + Sized {
    const KIND: &'static str;
    /// Version tag written in front of the parameter block.
    const VERSION: u8;
    type Params: Serialize + DeserializeOwned + Default;

    fn from_params(params: Self::Params) -> Self;

    fn to_params(&self) -> Self::Params;

    fn apply_params(&mut self, params: Self::Params);
}

/// Implements the parameter plumbing of `ProcNode` for a `NodeKind + Clone`.
macro_rules! node_kind_plumbing {
    () => {
        fn kind(&self) -> &'static str {
            <Self as $crate::eval::node::NodeKind>::KIND
        }

        fn core(&self) -> &$crate::eval::node::NodeCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut $crate::eval::node::NodeCore {
            &mut self.core
        }

        fn write_params(&self, sink: &mut dyn std::io::Write) -> Result<(), $crate::error::ProcError> {
            $crate::eval::serial::write_versioned(
                sink,
                <Self as $crate::eval::node::NodeKind>::VERSION,
                &<Self as $crate::eval::node::NodeKind>::to_params(self),
            )
        }

        fn params(&self) -> Result<serde_json::Value, $crate::error::ProcError> {
            Ok(serde_json::to_value(
                <Self as $crate::eval::node::NodeKind>::to_params(self),
            )?)
        }

        fn set_params(&mut self, params: serde_json::Value) -> Result<(), $crate::error::ProcError> {
            let parsed = $crate::eval::serial::params_from_json::<
                <Self as $crate::eval::node::NodeKind>::Params,
            >(<Self as $crate::eval::node::NodeKind>::KIND, params)?;
            <Self as $crate::eval::node::NodeKind>::apply_params(self, parsed);
            Ok(())
        }

        fn duplicate(&self) -> Box<dyn $crate::eval::node::ProcNode> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    };
}

pub(crate) use node_kind_plumbing;

// ── Upstream ────────────────────────────────────────────────────────

/// Clears a node's `visiting` flag on drop, including during unwinding.
struct VisitGuard<'a>(&'a Cell<bool>);

impl Drop for VisitGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Read access to the other nodes of a procedure during evaluation.
#[derive(Clone, Copy)]
pub struct Upstream<'a> {
    nodes: &'a [Box<dyn ProcNode>],
}

impl<'a> Upstream<'a> {
    pub fn new(nodes: &'a [Box<dyn ProcNode>]) -> Self {
        Upstream { nodes }
    }

    /// Run `f` on the node feeding `source`, unless that node is already
    /// being evaluated further up the stack.
    fn enter<T>(&self, source: LinkSource, f: impl FnOnce(&dyn ProcNode) -> T) -> Option<T> {
        let node = self.nodes.get(source.node)?;
        let core = node.core();
        if core.visiting.replace(true) {
            if !core.cycle_reported.replace(true) {
                warn!(
                    "cycle through node {} ({}); treating the link as disconnected",
                    source.node,
                    node.kind()
                );
            }
            return None;
        }
        let _guard = VisitGuard(&core.visiting);
        Some(f(node.as_ref()))
    }

    /// Sample of an arbitrary node output. `None` for a missing node or a
    /// node already on the evaluation stack.
    pub fn sample_of(&self, source: LinkSource, blur: f64) -> Option<Sample> {
        self.enter(source, |node| node.sample(self, source.output, blur))
    }

    pub fn color_of(&self, source: LinkSource, blur: f64) -> Option<RgbColor> {
        self.enter(source, |node| node.color(self, source.output, blur))
    }

    /// Sample feeding input `input` of `core`, or `None` if unconnected.
    pub fn input(&self, core: &NodeCore, input: usize, blur: f64) -> Option<Sample> {
        let source = core.input_source(input)?;
        self.enter(source, |node| node.sample(self, source.output, blur))
    }

    pub fn input_or(&self, core: &NodeCore, input: usize, blur: f64, default: Sample) -> Sample {
        self.input(core, input, blur).unwrap_or(default)
    }

    /// Coordinate input: an unconnected port reads `axis` from the point.
    pub fn coordinate(&self, core: &NodeCore, input: usize, axis: Axis, blur: f64) -> Sample {
        self.input(core, input, blur)
            .unwrap_or_else(|| axis.sample(core.point()))
    }

    pub fn input_value(&self, core: &NodeCore, input: usize, blur: f64) -> Option<f64> {
        let source = core.input_source(input)?;
        self.enter(source, |node| node.average_value(self, source.output, blur))
    }

    pub fn input_color(&self, core: &NodeCore, input: usize, blur: f64) -> Option<RgbColor> {
        let source = core.input_source(input)?;
        self.enter(source, |node| node.color(self, source.output, blur))
    }
}
