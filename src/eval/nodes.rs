// eval/nodes.rs - Built-in node kinds
//
//   basic      constant, coordinate, color, blend, output
//   transform  sine, scale_shift, view_angle, spherical
//   texture    turbulence, wood (band-limited noise)

pub mod basic;
pub mod texture;
pub mod transform;

pub use basic::{BlendNode, ColorNode, ConstantNode, CoordinateNode, OutputNode};
pub use texture::{TurbulenceNode, TurbulenceParams, WoodNode, WoodParams};
pub use transform::{ScaleShiftNode, SineNode, SphericalNode, ViewAngleNode};
