//! Execution plans for capns.
//!
//! A plan is a frozen DAG of typed nodes (cap invocations, fan-out and
//! fan-in adapters, input slots and outputs) produced by [`PlanBuilder`]
//! from a conversion path through the cap graph and consumed by the plan
//! executor. Cardinality analysis decides where the builder has to insert
//! `ForEach`/`Collect` adapters; argument bindings describe declaratively
//! where each cap argument's bytes come from.

mod binding;
mod builder;
mod cardinality;
mod error;
mod plan;

pub use binding::{
    ArgumentBinding, ArgumentSource, CapFileMetadata, CapInputFile, ResolvedArgument,
    SourceEntityType,
};
pub use builder::{
    ArgumentInfo, PathArgumentRequirements, PlanBuilder, ReachableTarget,
    StepArgumentRequirements,
};
pub use cardinality::{
    CapCardinalityInfo, Cardinality, CardinalityPattern, ChainAnalysis, Compatibility,
};
pub use error::PlanError;
pub use plan::{
    EdgeTransform, ExecutionPlan, MergeStrategy, NodeId, NodeKind, PlanEdge, PlanNode,
};
