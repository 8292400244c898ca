//! Procedural texture graphs evaluated with footprint-aware antialiasing.
//!
//! A [`eval::graph::Procedure`] is a DAG of nodes that report, for every
//! output, an average value over the sampling footprint, an estimate of how
//! much that value varies across the footprint, and its spatial gradient.
//! Generator nodes use the propagated variation to fade out noise octaves the
//! footprint cannot resolve.
//!
//! Procedures carry per-point caches and are therefore `Send` but not `Sync`.
//! Parallel evaluation goes through [`pool::WorkerPool`], where every worker
//! owns its own duplicate of the graph.

pub mod error;
pub mod eval;
pub mod pool;

pub use error::{PoolError, ProcError, TaskError};
