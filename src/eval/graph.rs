// eval/graph.rs - The procedure: nodes, links and designated outputs
//
// A `Procedure` owns its nodes as trait objects in a flat, index-addressed
// list. Links are stored on the destination input ports, so evaluation
// walks upstream by index with no lookups. Output nodes are tracked in a
// separate ordered list; their position in that list is the public handle
// callers use to read results.
//
// Binary layout written by `write_to` (bincode, little-endian):
//
//   version: u16
//   node_count: u32
//   node_count × { kind: String, version: u8, params }
//   links: Vec<Link>
//   outputs: Vec<usize>

use crate::error::ProcError;
use crate::eval::node::{NodeId, ProcNode, Sample, Upstream};
use crate::eval::nodes::OutputNode;
use crate::eval::point::{PointInfo, RgbColor, Vec3};
use crate::eval::port::LinkSource;
use crate::eval::registry::NodeRegistry;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};

/// Version tag of the binary procedure format.
pub const PROCEDURE_VERSION: u16 = 1;

/// A directed edge `from_node.outputs[from_output] -> to_node.inputs[to_input]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub from_node: usize,
    pub from_output: usize,
    pub to_node: usize,
    pub to_input: usize,
}

impl Link {
    pub fn new(from_node: usize, from_output: usize, to_node: usize, to_input: usize) -> Self {
        Link {
            from_node,
            from_output,
            to_node,
            to_input,
        }
    }
}

// ── Description (JSON interchange) ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

/// Plain-data form of a procedure. Unlike `Procedure` it is `Sync`, so it
/// can be shared by threads that each build their own graph from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureDescription {
    pub nodes: Vec<NodeDescription>,
    pub links: Vec<Link>,
    /// Node indices of the designated outputs, in output order.
    pub outputs: Vec<usize>,
}

impl ProcedureDescription {
    pub fn from_json(text: &str) -> Result<Self, ProcError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProcError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ── Change notification ────────────────────────────────────────────

/// What an editor changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureChange {
    /// Parameters of one node were replaced.
    NodeParams(usize),
    /// Something else changed; the whole procedure should be re-rendered.
    Edited,
}

type ChangeListener = Box<dyn FnMut(ProcedureChange) + Send>;

// ── Procedure ──────────────────────────────────────────────────────

pub struct Procedure {
    nodes: Vec<Box<dyn ProcNode>>,
    outputs: Vec<usize>,
    lane: usize,
    next_id: u32,
    listeners: Vec<ChangeListener>,
}

impl Default for Procedure {
    fn default() -> Self {
        Procedure::new()
    }
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure")
            .field("nodes", &self.nodes.iter().map(|n| n.kind()).collect::<Vec<_>>())
            .field("outputs", &self.outputs)
            .field("lane", &self.lane)
            .finish()
    }
}

impl Procedure {
    pub fn new() -> Self {
        Procedure {
            nodes: Vec::new(),
            outputs: Vec::new(),
            lane: 0,
            next_id: 0,
            listeners: Vec::new(),
        }
    }

    /// Which worker lane this copy belongs to. 0 for the original.
    #[inline]
    pub fn lane(&self) -> usize {
        self.lane
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn node(&self, index: usize) -> Option<&dyn ProcNode> {
        self.nodes.get(index).map(|n| n.as_ref())
    }

    /// Direct mutable access. Cached values are stale until the next
    /// `init_for_point` or `notify_changed`.
    pub fn node_mut(&mut self, index: usize) -> Option<&mut (dyn ProcNode + 'static)> {
        self.nodes.get_mut(index).map(|n| n.as_mut())
    }

    pub fn node_as<T: ProcNode>(&self, index: usize) -> Option<&T> {
        self.nodes.get(index)?.as_any().downcast_ref::<T>()
    }

    pub fn node_as_mut<T: ProcNode>(&mut self, index: usize) -> Option<&mut T> {
        self.nodes.get_mut(index)?.as_any_mut().downcast_mut::<T>()
    }

    // ── Construction ──

    pub fn add_node<N: ProcNode>(&mut self, node: N) -> usize {
        self.add_boxed(Box::new(node))
    }

    /// Add a node, assigning it a fresh `NodeId`. Any links the node
    /// carried are dropped; use `connect`.
    pub fn add_boxed(&mut self, mut node: Box<dyn ProcNode>) -> usize {
        let core = node.core_mut();
        core.id = NodeId(self.next_id);
        for port in core.inputs.iter_mut() {
            port.source = None;
        }
        self.next_id += 1;
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Add an Output node and designate it. Returns its node index.
    pub fn add_output(&mut self, node: OutputNode) -> usize {
        let index = self.add_node(node);
        self.outputs.push(index);
        index
    }

    /// Designate an existing Output node. Returns its output position.
    pub fn designate_output(&mut self, node: usize) -> Result<usize, ProcError> {
        if let Some(position) = self.output_position(node) {
            return Ok(position);
        }
        if self.node_as::<OutputNode>(node).is_none() {
            return Err(ProcError::NotAnOutput(node));
        }
        self.outputs.push(node);
        Ok(self.outputs.len() - 1)
    }

    /// Validate and install `link`, replacing whatever fed that input.
    pub fn connect(&mut self, link: Link) -> Result<(), ProcError> {
        let from = self
            .nodes
            .get(link.from_node)
            .ok_or(ProcError::DanglingLink {
                what: "node",
                index: link.from_node,
            })?;
        let to = self.nodes.get(link.to_node).ok_or(ProcError::DanglingLink {
            what: "node",
            index: link.to_node,
        })?;
        let out_port = from
            .core()
            .outputs
            .get(link.from_output)
            .ok_or(ProcError::DanglingLink {
                what: "output port",
                index: link.from_output,
            })?;
        let in_port = to
            .core()
            .inputs
            .get(link.to_input)
            .ok_or(ProcError::DanglingLink {
                what: "input port",
                index: link.to_input,
            })?;
        if out_port.kind != in_port.kind {
            return Err(ProcError::PortKindMismatch {
                from: out_port.kind,
                to: in_port.kind,
            });
        }
        if link.from_node == link.to_node || self.depends_on(link.from_node, link.to_node) {
            return Err(ProcError::CycleDetected {
                from: link.from_node,
                to: link.to_node,
            });
        }

        debug!(
            "link {}[{}] -> {}[{}]",
            link.from_node, link.from_output, link.to_node, link.to_input
        );
        self.nodes[link.to_node].core_mut().inputs[link.to_input].source = Some(LinkSource {
            node: link.from_node,
            output: link.from_output,
        });
        Ok(())
    }

    pub fn link(
        &mut self,
        from_node: usize,
        from_output: usize,
        to_node: usize,
        to_input: usize,
    ) -> Result<(), ProcError> {
        self.connect(Link::new(from_node, from_output, to_node, to_input))
    }

    /// Remove the link feeding `node.inputs[input]`, returning its source.
    pub fn disconnect(&mut self, node: usize, input: usize) -> Option<LinkSource> {
        let port = self.nodes.get_mut(node)?.core_mut().inputs.get_mut(input)?;
        port.source.take()
    }

    /// Every link, ordered by destination node then input.
    pub fn links(&self) -> Vec<Link> {
        let mut links = Vec::new();
        for (to_node, node) in self.nodes.iter().enumerate() {
            for (to_input, port) in node.core().inputs.iter().enumerate() {
                if let Some(src) = port.source {
                    links.push(Link::new(src.node, src.output, to_node, to_input));
                }
            }
        }
        links
    }

    /// Whether `node` reads, directly or transitively, from `target`.
    fn depends_on(&self, node: usize, target: usize) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if std::mem::replace(&mut visited[current], true) {
                continue;
            }
            for port in self.nodes[current].core().inputs.iter() {
                if let Some(src) = port.source {
                    if src.node < self.nodes.len() {
                        stack.push(src.node);
                    }
                }
            }
        }
        false
    }

    // ── Lookups ──

    /// Index of `node` in this procedure, by identity.
    pub fn node_index(&self, node: &dyn ProcNode) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| std::ptr::eq(n.core(), node.core()))
    }

    pub fn node_by_id(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.core().id == id)
    }

    /// Position of node `node_index` in the output list.
    pub fn output_position(&self, node_index: usize) -> Option<usize> {
        self.outputs.iter().position(|&n| n == node_index)
    }

    pub fn output_node(&self, position: usize) -> Option<&OutputNode> {
        self.node_as::<OutputNode>(*self.outputs.get(position)?)
    }

    /// Position of the first output called `name`.
    pub fn output_named(&self, name: &str) -> Option<usize> {
        (0..self.outputs.len()).find(|&i| self.output_node(i).is_some_and(|o| o.name() == name))
    }

    // ── Evaluation ──

    /// Start a new query point. Must precede any query for that point.
    pub fn init_for_point(&mut self, point: &PointInfo) {
        for node in self.nodes.iter_mut() {
            node.init(point);
        }
    }

    fn upstream(&self) -> Upstream<'_> {
        Upstream::new(&self.nodes)
    }

    /// Sample of any node output. Zero for indices that do not exist.
    pub fn node_sample(&self, node: usize, output: usize, blur: f64) -> Sample {
        self.upstream()
            .sample_of(LinkSource { node, output }, blur)
            .unwrap_or_default()
    }

    pub fn node_color(&self, node: usize, output: usize, blur: f64) -> RgbColor {
        self.upstream()
            .color_of(LinkSource { node, output }, blur)
            .unwrap_or_default()
    }

    /// Sample of the output at `position`, with extra `blur`.
    pub fn output_sample(&self, position: usize, blur: f64) -> Sample {
        match self.outputs.get(position) {
            Some(&node) => self.node_sample(node, 0, blur),
            None => Sample::ZERO,
        }
    }

    pub fn output_color_blurred(&self, position: usize, blur: f64) -> RgbColor {
        match self.outputs.get(position) {
            Some(&node) => self.node_color(node, 0, blur),
            None => RgbColor::BLACK,
        }
    }

    pub fn output_value(&self, position: usize) -> f64 {
        self.output_sample(position, 0.0).value
    }

    pub fn output_error(&self, position: usize) -> f64 {
        self.output_sample(position, 0.0).error
    }

    pub fn output_gradient(&self, position: usize) -> Vec3 {
        self.output_sample(position, 0.0).gradient
    }

    pub fn output_color(&self, position: usize) -> RgbColor {
        self.output_color_blurred(position, 0.0)
    }

    // ── Copies ──

    /// Deep copy for worker `lane`: same parameters and links, fresh
    /// caches, no change listeners.
    pub fn duplicate(&self, lane: usize) -> Procedure {
        Procedure {
            nodes: self.nodes.iter().map(|n| n.duplicate()).collect(),
            outputs: self.outputs.clone(),
            lane,
            next_id: self.next_id,
            listeners: Vec::new(),
        }
    }

    // ── Editing ──

    pub fn on_change(&mut self, listener: impl FnMut(ProcedureChange) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Replace the parameters of `node` and notify listeners.
    pub fn set_node_params(&mut self, node: usize, params: Value) -> Result<(), ProcError> {
        let target = self.nodes.get_mut(node).ok_or(ProcError::DanglingLink {
            what: "node",
            index: node,
        })?;
        target.set_params(params)?;
        self.invalidate();
        self.emit(ProcedureChange::NodeParams(node));
        Ok(())
    }

    /// Report an edit made through `node_mut` or a typed setter.
    pub fn notify_changed(&mut self) {
        self.invalidate();
        self.emit(ProcedureChange::Edited);
    }

    /// Drop every cached value, keeping each node's current point.
    fn invalidate(&mut self) {
        for node in self.nodes.iter_mut() {
            let point = *node.core().point();
            node.init(&point);
        }
    }

    fn emit(&mut self, change: ProcedureChange) {
        for listener in self.listeners.iter_mut() {
            listener(change);
        }
    }

    // ── Persistence ──

    pub fn describe(&self) -> Result<ProcedureDescription, ProcError> {
        let nodes = self
            .nodes
            .iter()
            .map(|n| -> Result<NodeDescription, ProcError> {
                Ok(NodeDescription {
                    kind: n.kind().to_string(),
                    params: n.params()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ProcedureDescription {
            nodes,
            links: self.links(),
            outputs: self.outputs.clone(),
        })
    }

    pub fn from_description(
        desc: &ProcedureDescription,
        registry: &NodeRegistry,
    ) -> Result<Procedure, ProcError> {
        let mut proc = Procedure::new();
        for node in &desc.nodes {
            proc.add_boxed(registry.create(&node.kind, node.params.clone())?);
        }
        proc.finish_loading(&desc.links, &desc.outputs)?;
        Ok(proc)
    }

    pub fn write_to(&self, sink: &mut dyn Write) -> Result<(), ProcError> {
        bincode::serialize_into(&mut *sink, &PROCEDURE_VERSION)?;
        bincode::serialize_into(&mut *sink, &(self.nodes.len() as u32))?;
        for node in &self.nodes {
            bincode::serialize_into(&mut *sink, node.kind())?;
            node.write_params(sink)?;
        }
        bincode::serialize_into(&mut *sink, &self.links())?;
        bincode::serialize_into(&mut *sink, &self.outputs)?;
        Ok(())
    }

    /// Bytes of `write_to`, in memory.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProcError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn read_from(source: &mut dyn Read, registry: &NodeRegistry) -> Result<Procedure, ProcError> {
        let version: u16 = bincode::deserialize_from(&mut *source)?;
        if version != PROCEDURE_VERSION {
            warn!("rejecting procedure format version {version} (expected {PROCEDURE_VERSION})");
            return Err(ProcError::UnsupportedVersion {
                what: "procedure".to_string(),
                found: u32::from(version),
            });
        }
        let count: u32 = bincode::deserialize_from(&mut *source)?;
        let mut proc = Procedure::new();
        for _ in 0..count {
            let kind: String = bincode::deserialize_from(&mut *source)?;
            proc.add_boxed(registry.read(&kind, source)?);
        }
        let links: Vec<Link> = bincode::deserialize_from(&mut *source)?;
        let outputs: Vec<usize> = bincode::deserialize_from(&mut *source)?;
        proc.finish_loading(&links, &outputs)?;
        debug!(
            "read procedure: {} nodes, {} links, {} outputs",
            proc.nodes.len(),
            links.len(),
            outputs.len()
        );
        Ok(proc)
    }

    /// Resolve links and outputs once every node exists.
    fn finish_loading(&mut self, links: &[Link], outputs: &[usize]) -> Result<(), ProcError> {
        for &link in links {
            self.connect(link)?;
        }
        for &node in outputs {
            if node >= self.nodes.len() {
                return Err(ProcError::DanglingLink {
                    what: "output node",
                    index: node,
                });
            }
            self.designate_output(node)?;
        }
        Ok(())
    }
}
