use thiserror::Error;

/// Errors from plan construction and validation.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("no conversion path from {from} to {target}")]
    NotFound { from: String, target: String },

    #[error("plan {plan} contains a cycle")]
    CycleDetected { plan: String },

    #[error("plan {plan}: edge references unknown node {id}")]
    OrphanEdge { plan: String, id: String },

    #[error("plan {plan}: node {id} referenced but not present")]
    UnknownNode { plan: String, id: String },

    #[error("plan {plan}: duplicate node id {id}")]
    DuplicateNode { plan: String, id: String },

    #[error("plan {plan}: cap node {node} is missing a binding for required argument {arg}")]
    MissingBinding {
        plan: String,
        node: String,
        arg: String,
    },

    #[error("plan {plan}: input slot {id} must have no incoming edges")]
    SlotHasIncomingEdges { plan: String, id: String },

    #[error("plan {plan}: for-each node {id} invalid: {reason}")]
    InvalidForEachBody {
        plan: String,
        id: String,
        reason: String,
    },

    #[error("plan {plan}: cardinality mismatch on edge {from} -> {to} ({source_cardinality:?} into {target_cardinality:?})")]
    CardinalityMismatch {
        plan: String,
        from: String,
        to: String,
        source_cardinality: crate::cardinality::Cardinality,
        target_cardinality: crate::cardinality::Cardinality,
    },

    #[error("plan {plan}: media mismatch on edge {from} -> {to} ({produced} does not conform to {expected})")]
    MediaMismatch {
        plan: String,
        from: String,
        to: String,
        produced: String,
        expected: String,
    },

    #[error("plan {plan} is invalid: {reason}")]
    Invalid { plan: String, reason: String },

    #[error("invalid URN: {0}")]
    Urn(#[from] capns_urn::UrnError),
}
