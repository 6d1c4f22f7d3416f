//! Cap routing for capns.
//!
//! Three layers, smallest first:
//!
//! - [`CapMatrix`]: a single registry's index of cap definitions and the
//!   providers that implement them, queried by graded specificity
//! - [`CapCube`]: an ordered composite of named matrices; the best match
//!   across all of them wins, earlier matrices win ties
//! - [`CapGraph`]: the conversion graph derived from a cube, where nodes
//!   are media URNs and edges are caps; path discovery lives here
//!
//! Routing is deterministic: specificity first, then insertion order.

mod cube;
mod error;
mod graph;
mod matrix;

pub use cube::{BestMatch, CapCube, CapHandle};
pub use error::RouterError;
pub use graph::{CapGraph, GraphEdge, GraphStats};
pub use matrix::{CapMatrix, CapProvider, MatrixMatch};
