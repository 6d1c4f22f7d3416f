use thiserror::Error;

/// Errors raised while executing a plan.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("input slot {slot} has no value")]
    MissingSlot { slot: String },

    #[error("slot {name} was not provided")]
    SlotNotProvided { name: String },

    #[error("cap {cap_urn}: required argument {arg} has no value and no default")]
    RequiredMissing { cap_urn: String, arg: String },

    #[error("plan metadata key {key} not present")]
    PlanMetadataMissing { key: String },

    #[error("input file index {index} out of range ({count} files)")]
    InputFileOutOfRange { index: usize, count: usize },

    #[error("node {node}: output is not JSON: {reason}")]
    NotJson { node: String, reason: String },

    #[error("node {node}: expected a list-shaped output")]
    NotAList { node: String },

    #[error("JSON field {field} missing")]
    FieldMissing { field: String },

    #[error("JSON path {path} invalid: {reason}")]
    InvalidJsonPath { path: String, reason: String },

    #[error("merge length mismatch: {left} vs {right}")]
    MergeLengthMismatch { left: usize, right: usize },

    #[error("no cap available for {urn}")]
    CapUnavailable { urn: String },

    #[error("node {node} failed: {reason}")]
    ExecutionFailed { node: String, reason: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("deadline exceeded after {elapsed_ms} ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    #[error("plan error: {0}")]
    Plan(#[from] capns_plan::PlanError),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
