// eval/port.rs - Typed connection points on a node
//
// Ports carry no behavior. An input port remembers which upstream output
// feeds it; an unconnected input falls back to the owning node's default.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// What flows through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Numeric,
    Color,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Numeric => f.write_str("numeric"),
            ValueKind::Color => f.write_str("color"),
        }
    }
}

/// Which edge of the node box the port is drawn on. Diagramming only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortSide {
    Top,
    Bottom,
    Left,
    Right,
}

/// The upstream end of a link, as recorded on the input port it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkSource {
    pub node: usize,
    pub output: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub direction: PortDirection,
    pub kind: ValueKind,
    pub side: PortSide,
    pub name: &'static str,
    /// Shown by an editor in place of an unconnected input, e.g. `"(X)"`.
    pub default_label: Option<&'static str>,
    /// Set on connected input ports only.
    pub source: Option<LinkSource>,
}

impl Port {
    pub fn input(kind: ValueKind, name: &'static str) -> Self {
        Port {
            direction: PortDirection::Input,
            kind,
            side: PortSide::Left,
            name,
            default_label: None,
            source: None,
        }
    }

    pub fn output(kind: ValueKind, name: &'static str) -> Self {
        Port {
            direction: PortDirection::Output,
            kind,
            side: PortSide::Right,
            name,
            default_label: None,
            source: None,
        }
    }

    pub fn numeric_input(name: &'static str, default_label: &'static str) -> Self {
        Port::input(ValueKind::Numeric, name).with_default_label(default_label)
    }

    pub fn numeric_output(name: &'static str) -> Self {
        Port::output(ValueKind::Numeric, name)
    }

    pub fn color_input(name: &'static str, default_label: &'static str) -> Self {
        Port::input(ValueKind::Color, name).with_default_label(default_label)
    }

    pub fn color_output(name: &'static str) -> Self {
        Port::output(ValueKind::Color, name)
    }

    pub fn with_default_label(mut self, label: &'static str) -> Self {
        self.default_label = Some(label);
        self
    }

    pub fn on_side(mut self, side: PortSide) -> Self {
        self.side = side;
        self
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }
}
