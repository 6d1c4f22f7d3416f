//! capns: a capability-graph runtime.
//!
//! Caps are typed, versioned data transformations labelled with media
//! URNs; this crate family routes them, composes them into DAG plans,
//! and executes those plans against in-process providers or packet
//! plugins. The root crate re-exports the subsystem crates and adds the
//! engine glue that binds the router to the executor.

/// Returns the capns version string.
#[must_use]
pub fn capns_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub mod cli;
pub mod engine;
pub mod exit_codes;
pub mod logging;

// Subsystem crates, re-exported under stable names.
pub use capns_def as def;
pub use capns_exec as exec;
pub use capns_plan as plan;
pub use capns_registry as registry;
pub use capns_resolver as resolver;
pub use capns_router as router;
pub use capns_transport as transport;
pub use capns_urn as urn;

// The types most consumers start from.
pub use capns_def::{Cap, CapBuilder, Manifest};
pub use capns_exec::{CancelToken, CapExecutor, PlanExecutor};
pub use capns_plan::{CapInputFile, ExecutionPlan, PlanBuilder};
pub use capns_router::{CapCube, CapMatrix};
pub use capns_urn::{CapUrn, MediaUrn, TaggedUrn};
pub use engine::{CubeBackend, PluginBackend, UnboundProvider};
