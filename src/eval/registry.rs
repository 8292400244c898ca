// eval/registry.rs - Node kind lookup for loaders
//
// Persisted graphs and JSON descriptions name nodes by kind string. The
// registry maps that string to constructors for both formats.

use crate::error::ProcError;
use crate::eval::node::{NodeKind, ProcNode};
use crate::eval::nodes::{
    BlendNode, ColorNode, ConstantNode, CoordinateNode, OutputNode, ScaleShiftNode, SineNode,
    SphericalNode, TurbulenceNode, ViewAngleNode, WoodNode,
};
use crate::eval::serial::{params_from_json, read_versioned};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::io::Read;

type FromJson = fn(Value) -> Result<Box<dyn ProcNode>, ProcError>;
type ReadParams = fn(&mut dyn Read) -> Result<Box<dyn ProcNode>, ProcError>;

#[derive(Clone, Copy)]
struct NodeFactory {
    from_json: FromJson,
    read: ReadParams,
}

fn create_from_json<K: NodeKind>(params: Value) -> Result<Box<dyn ProcNode>, ProcError> {
    let params = params_from_json::<K::Params>(K::KIND, params)?;
    Ok(Box::new(K::from_params(params)))
}

fn create_from_reader<K: NodeKind>(source: &mut dyn Read) -> Result<Box<dyn ProcNode>, ProcError> {
    let params = read_versioned::<K::Params>(source, K::KIND, K::VERSION)?;
    Ok(Box::new(K::from_params(params)))
}

/// Kind string -> constructors.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: FxHashMap<&'static str, NodeFactory>,
}

impl NodeRegistry {
    pub fn empty() -> Self {
        NodeRegistry::default()
    }

    /// Every node kind this crate ships.
    pub fn builtin() -> Self {
        let mut registry = NodeRegistry::empty();
        registry.register::<ConstantNode>();
        registry.register::<CoordinateNode>();
        registry.register::<ColorNode>();
        registry.register::<BlendNode>();
        registry.register::<OutputNode>();
        registry.register::<SineNode>();
        registry.register::<ScaleShiftNode>();
        registry.register::<ViewAngleNode>();
        registry.register::<SphericalNode>();
        registry.register::<TurbulenceNode>();
        registry.register::<WoodNode>();
        registry
    }

    /// Register `K`, replacing any kind with the same identifier.
    pub fn register<K: NodeKind>(&mut self) {
        self.factories.insert(
            K::KIND,
            NodeFactory {
                from_json: create_from_json::<K>,
                read: create_from_reader::<K>,
            },
        );
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    fn factory(&self, kind: &str) -> Result<NodeFactory, ProcError> {
        self.factories
            .get(kind)
            .copied()
            .ok_or_else(|| ProcError::UnknownNodeKind(kind.to_string()))
    }

    /// Build a node from editor or description parameters.
    pub fn create(&self, kind: &str, params: Value) -> Result<Box<dyn ProcNode>, ProcError> {
        (self.factory(kind)?.from_json)(params)
    }

    /// Build a node from its versioned binary parameter block.
    pub fn read(&self, kind: &str, source: &mut dyn Read) -> Result<Box<dyn ProcNode>, ProcError> {
        (self.factory(kind)?.read)(source)
    }
}
