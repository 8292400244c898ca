pub mod cache;
pub mod graph;
pub mod grid;
pub mod node;
pub mod nodes;
pub mod noise;
pub mod point;
pub mod port;
pub mod registry;
pub mod serial;
