//! Plan execution for capns.
//!
//! The executor walks a validated [`capns_plan::ExecutionPlan`] in
//! deterministic topological order and dispatches every cap invocation
//! through the [`CapExecutor`] backend trait, the sole way the engine
//! invokes work. Argument bindings resolve to raw bytes here; edge
//! transforms (`json_field`, `json_path`) apply when a successor reads a
//! predecessor's output.

mod backend;
mod error;
mod executor;
mod json_path;
mod resolve;

pub use backend::{CancelToken, CapExecutor, CapSettingsProvider};
pub use error::ExecError;
pub use executor::{ChainExecutionResult, NodeExecutionResult, PlanExecutor};
pub use json_path::extract_json_path;
pub use resolve::{encode_value, resolve_binding, ArgumentResolutionContext};
