use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use capns_plan::{
    CapInputFile, EdgeTransform, ExecutionPlan, MergeStrategy, NodeId, NodeKind, PlanNode,
    ResolvedArgument,
};
use capns_urn::CapUrn;

use crate::backend::{CancelToken, CapExecutor, CapSettingsProvider};
use crate::error::ExecError;
use crate::json_path::extract_json_path;
use crate::resolve::{encode_value, resolve_binding, ArgumentResolutionContext};

/// Result of executing a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: NodeId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Aggregated result of executing a whole plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainExecutionResult {
    pub success: bool,
    pub node_results: Vec<NodeExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_duration_ms: u64,
}

/// Executes a validated plan against a [`CapExecutor`] backend.
///
/// Nodes run one at a time in deterministic topological order, so a fixed
/// plan with fixed slot values and a deterministic backend yields
/// byte-identical outputs across runs. `ForEach` iterations execute in
/// index order and their collection preserves that order.
pub struct PlanExecutor<'a> {
    backend: &'a dyn CapExecutor,
    plan: &'a ExecutionPlan,
    input_files: Vec<CapInputFile>,
    slot_values: BTreeMap<String, Vec<u8>>,
    settings: Option<&'a dyn CapSettingsProvider>,
    deadline: Option<std::time::Duration>,
}

impl<'a> PlanExecutor<'a> {
    #[must_use]
    pub fn new(
        backend: &'a dyn CapExecutor,
        plan: &'a ExecutionPlan,
        input_files: Vec<CapInputFile>,
    ) -> Self {
        Self {
            backend,
            plan,
            input_files,
            slot_values: BTreeMap::new(),
            settings: None,
            deadline: None,
        }
    }

    /// Seed input slots with user-provided raw bytes, keyed by slot name.
    #[must_use]
    pub fn with_slot_values(mut self, slot_values: BTreeMap<String, Vec<u8>>) -> Self {
        self.slot_values = slot_values;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: &'a dyn CapSettingsProvider) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Overall wall-clock budget for the plan.
    #[must_use]
    pub fn with_deadline(mut self, deadline: std::time::Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run the plan to completion, cancellation, or first unabsorbed
    /// failure. Structural problems (cycles, orphan edges) error out
    /// before any node runs.
    pub async fn execute(&self, cancel: &CancelToken) -> Result<ChainExecutionResult, ExecError> {
        self.plan.validate()?;
        let order: Vec<&PlanNode> = self.plan.topological_order()?;
        let started = Instant::now();

        let mut state = ExecState::default();
        let body_nodes = self.collect_body_nodes();

        for node in order {
            if cancel.is_cancelled() {
                return Ok(self.finish(state, started, Some(ExecError::Cancelled.to_string())));
            }
            if let Some(deadline) = self.deadline {
                if started.elapsed() > deadline {
                    let err = ExecError::DeadlineExceeded {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    return Ok(self.finish(state, started, Some(err.to_string())));
                }
            }
            if body_nodes.contains(&node.id) {
                // Executed by its owning ForEach.
                continue;
            }

            let node_started = Instant::now();
            let outcome = self.execute_node(node, &mut state, cancel).await;
            let duration_ms = node_started.elapsed().as_millis() as u64;

            match outcome {
                Ok(detail) => {
                    state.node_results.push(NodeExecutionResult {
                        node_id: node.id.clone(),
                        success: true,
                        output: state.outputs.get(&node.id).cloned(),
                        error: detail,
                        duration_ms,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    state.node_results.push(NodeExecutionResult {
                        node_id: node.id.clone(),
                        success: false,
                        output: None,
                        error: Some(message.clone()),
                        duration_ms,
                    });
                    if self.failure_absorbed(&node.id) {
                        debug!(node = %node.id, error = %message, "failure absorbed by merge");
                        state.failed.insert(node.id.clone(), message);
                        continue;
                    }
                    return Ok(self.finish(state, started, Some(message)));
                }
            }
        }

        Ok(self.finish(state, started, None))
    }

    fn finish(
        &self,
        state: ExecState,
        started: Instant,
        error: Option<String>,
    ) -> ChainExecutionResult {
        let final_output = self.plan.output_nodes.first().and_then(|id| {
            self.plan.node(id).and_then(|node| match &node.kind {
                NodeKind::Output { source_node, .. } => state.outputs.get(source_node).cloned(),
                _ => None,
            })
        });
        ChainExecutionResult {
            success: error.is_none(),
            node_results: state.node_results,
            final_output,
            error,
            total_duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Nodes that live inside some ForEach body: reachable from the
    /// body entry without passing the body exit's collection edge.
    fn collect_body_nodes(&self) -> BTreeSet<NodeId> {
        let mut body = BTreeSet::new();
        for node in &self.plan.nodes {
            if let NodeKind::ForEach {
                body_entry,
                body_exit,
                ..
            } = &node.kind
            {
                for id in self.body_of(body_entry, body_exit) {
                    body.insert(id);
                }
            }
        }
        body
    }

    fn body_of(&self, entry: &str, exit: &str) -> Vec<NodeId> {
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        seen.insert(entry.to_string());
        let mut frontier = vec![entry.to_string()];
        while let Some(id) = frontier.pop() {
            if id == exit {
                continue;
            }
            for edge in self.plan.outgoing_edges(&id) {
                if edge.transform == EdgeTransform::Collection {
                    continue;
                }
                if seen.insert(edge.to.clone()) {
                    frontier.push(edge.to.clone());
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Whether every consumer of a failed node is a failure-tolerant
    /// merge, so the failure stays local.
    fn failure_absorbed(&self, id: &str) -> bool {
        let consumers: Vec<&PlanNode> = self
            .plan
            .outgoing_edges(id)
            .iter()
            .filter_map(|e| self.plan.node(&e.to))
            .collect();
        !consumers.is_empty()
            && consumers.iter().all(|n| {
                matches!(
                    n.kind,
                    NodeKind::Merge {
                        strategy: MergeStrategy::FirstSuccess | MergeStrategy::AllSuccessful,
                    }
                )
            })
    }

    /// Execute one node. `Ok(Some(text))` carries non-fatal detail (for
    /// example the failures a first-success merge absorbed).
    async fn execute_node(
        &self,
        node: &PlanNode,
        state: &mut ExecState,
        cancel: &CancelToken,
    ) -> Result<Option<String>, ExecError> {
        match &node.kind {
            NodeKind::InputSlot { slot_name, .. } => {
                let bytes = self.seed_slot(&node.id, slot_name)?;
                state.outputs.insert(node.id.clone(), bytes);
                Ok(None)
            }
            NodeKind::Cap {
                cap_urn,
                arg_bindings,
                preferred_cap,
            } => {
                let effective = self.transformed_view(&node.id, &state.outputs)?;
                let bytes = self
                    .invoke_cap(cap_urn, arg_bindings, preferred_cap.as_deref(), &effective, 0)
                    .await?;
                state.outputs.insert(node.id.clone(), bytes);
                Ok(None)
            }
            NodeKind::ForEach {
                input_node,
                body_entry,
                body_exit,
            } => {
                self.run_for_each(node, input_node, body_entry, body_exit, state, cancel)
                    .await?;
                Ok(None)
            }
            NodeKind::Collect { input_nodes, .. } => {
                let mut elements = Vec::new();
                for id in input_nodes {
                    let bytes = state.outputs.get(id).ok_or_else(|| {
                        ExecError::ExecutionFailed {
                            node: node.id.clone(),
                            reason: format!("collect input {id} has no output"),
                        }
                    })?;
                    if state.fanned.contains(id) {
                        let list: Value = serde_json::from_slice(bytes).map_err(|e| {
                            ExecError::NotJson {
                                node: id.clone(),
                                reason: e.to_string(),
                            }
                        })?;
                        match list {
                            Value::Array(items) => elements.extend(items),
                            other => elements.push(other),
                        }
                    } else {
                        elements.push(parse_or_string(bytes));
                    }
                }
                let bytes = serde_json::to_vec(&Value::Array(elements))
                    .expect("JSON array serializes");
                state.outputs.insert(node.id.clone(), bytes);
                state.fanned.insert(node.id.clone());
                Ok(None)
            }
            NodeKind::Merge { strategy } => self.run_merge(node, *strategy, state),
            NodeKind::Split { output_count } => {
                let incoming = self.plan.incoming_edges(&node.id);
                let from = incoming
                    .first()
                    .map(|e| e.from.clone())
                    .ok_or_else(|| ExecError::ExecutionFailed {
                        node: node.id.clone(),
                        reason: "split node has no input".to_string(),
                    })?;
                let bytes = state
                    .outputs
                    .get(&from)
                    .ok_or_else(|| ExecError::ExecutionFailed {
                        node: node.id.clone(),
                        reason: format!("split input {from} has no output"),
                    })?;
                let list: Value =
                    serde_json::from_slice(bytes).map_err(|e| ExecError::NotJson {
                        node: from.clone(),
                        reason: e.to_string(),
                    })?;
                let Value::Array(items) = list else {
                    return Err(ExecError::NotAList { node: from });
                };
                let count = (*output_count).max(1);
                let mut buckets: Vec<Vec<Value>> = vec![Vec::new(); count];
                for (index, item) in items.into_iter().enumerate() {
                    buckets[index % count].push(item);
                }
                let bytes = serde_json::to_vec(&buckets).expect("JSON array serializes");
                state.outputs.insert(node.id.clone(), bytes);
                Ok(None)
            }
            NodeKind::Output { source_node, .. } => {
                // Do not re-execute; just surface the source's bytes.
                if let Some(bytes) = state.outputs.get(source_node).cloned() {
                    state.outputs.insert(node.id.clone(), bytes);
                }
                Ok(None)
            }
        }
    }

    /// An input slot takes its bytes from the user-supplied slot values,
    /// falling back to the input file matching its entry position.
    fn seed_slot(&self, node_id: &str, slot_name: &str) -> Result<Vec<u8>, ExecError> {
        if let Some(bytes) = self.slot_values.get(slot_name) {
            return Ok(bytes.clone());
        }
        let entry_index = self
            .plan
            .entry_nodes
            .iter()
            .position(|id| id == node_id)
            .unwrap_or(0);
        if let Some(file) = self.input_files.get(entry_index) {
            return std::fs::read(&file.file_path).map_err(|source| ExecError::Io {
                path: file.file_path.display().to_string(),
                source,
            });
        }
        Err(ExecError::MissingSlot {
            slot: slot_name.to_string(),
        })
    }

    /// Predecessor outputs with this consumer's incoming edge transforms
    /// applied: the view binding resolution sees.
    fn transformed_view(
        &self,
        node_id: &str,
        outputs: &BTreeMap<NodeId, Vec<u8>>,
    ) -> Result<BTreeMap<NodeId, Vec<u8>>, ExecError> {
        let mut view = outputs.clone();
        for edge in self.plan.incoming_edges(node_id) {
            let Some(raw) = outputs.get(&edge.from) else {
                continue;
            };
            let transformed = match &edge.transform {
                EdgeTransform::Direct
                | EdgeTransform::Iteration
                | EdgeTransform::Collection => continue,
                EdgeTransform::JsonField { field } => {
                    let json: Value =
                        serde_json::from_slice(raw).map_err(|e| ExecError::NotJson {
                            node: edge.from.clone(),
                            reason: e.to_string(),
                        })?;
                    let value = json.get(field).ok_or_else(|| ExecError::FieldMissing {
                        field: field.clone(),
                    })?;
                    encode_value(value)
                }
                EdgeTransform::JsonPath { path } => {
                    let json: Value =
                        serde_json::from_slice(raw).map_err(|e| ExecError::NotJson {
                            node: edge.from.clone(),
                            reason: e.to_string(),
                        })?;
                    encode_value(&extract_json_path(&json, path)?)
                }
            };
            view.insert(edge.from.clone(), transformed);
        }
        Ok(view)
    }

    async fn invoke_cap(
        &self,
        cap_urn: &CapUrn,
        bindings: &BTreeMap<String, capns_plan::ArgumentBinding>,
        preferred_cap: Option<&str>,
        previous_outputs: &BTreeMap<NodeId, Vec<u8>>,
        current_file_index: usize,
    ) -> Result<Vec<u8>, ExecError> {
        let cap_def = self.backend.get_cap(cap_urn).await.ok();
        let settings = match self.settings {
            Some(provider) => provider.settings_for(cap_urn).await.ok(),
            None => None,
        };

        let context = ArgumentResolutionContext {
            input_files: &self.input_files,
            current_file_index,
            previous_outputs,
            plan_metadata: self.plan.metadata.as_ref(),
            cap_settings: settings.as_ref(),
            slot_values: Some(&self.slot_values),
        };

        let urn_string = cap_urn.to_string();
        let mut arguments: Vec<ResolvedArgument> = Vec::with_capacity(bindings.len());
        for (name, binding) in bindings {
            let arg_def = cap_def.as_ref().and_then(|c| c.arg(name));
            let resolved = resolve_binding(
                binding,
                &context,
                &urn_string,
                name,
                arg_def.and_then(|a| a.default.as_ref()),
                arg_def.map(|a| a.required).unwrap_or(false),
            )?;
            arguments.push(resolved);
        }

        debug!(cap = %urn_string, args = arguments.len(), "dispatching cap");
        self.backend
            .execute_cap(cap_urn, &arguments, preferred_cap)
            .await
    }

    async fn run_for_each(
        &self,
        node: &PlanNode,
        input_node: &str,
        body_entry: &str,
        body_exit: &str,
        state: &mut ExecState,
        cancel: &CancelToken,
    ) -> Result<(), ExecError> {
        let input = state
            .outputs
            .get(input_node)
            .ok_or_else(|| ExecError::ExecutionFailed {
                node: node.id.clone(),
                reason: format!("fan-out input {input_node} has no output"),
            })?;
        let parsed: Value = serde_json::from_slice(input).map_err(|e| ExecError::NotJson {
            node: input_node.to_string(),
            reason: e.to_string(),
        })?;
        let Value::Array(elements) = parsed else {
            return Err(ExecError::NotAList {
                node: input_node.to_string(),
            });
        };

        // Body nodes in deterministic order, restricted to the body set.
        let body_set: BTreeSet<NodeId> = self.body_of(body_entry, body_exit).into_iter().collect();
        let body_order: Vec<&PlanNode> = self
            .plan
            .topological_order()?
            .into_iter()
            .filter(|n| body_set.contains(&n.id))
            .collect();

        let mut collected: Vec<Value> = Vec::with_capacity(elements.len());
        let mut body_durations: BTreeMap<NodeId, u64> = BTreeMap::new();

        for (index, element) in elements.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            let mut effective = state.outputs.clone();
            effective.insert(node.id.clone(), encode_value(element));

            for body_node in &body_order {
                let NodeKind::Cap {
                    cap_urn,
                    arg_bindings,
                    preferred_cap,
                } = &body_node.kind
                else {
                    return Err(ExecError::ExecutionFailed {
                        node: body_node.id.clone(),
                        reason: "fan-out bodies may only contain cap nodes".to_string(),
                    });
                };
                let iteration_started = Instant::now();
                // Apply this body node's transforming edges against the
                // per-iteration view.
                let view = self.transformed_view(&body_node.id, &effective)?;
                let bytes = self
                    .invoke_cap(cap_urn, arg_bindings, preferred_cap.as_deref(), &view, index)
                    .await?;
                *body_durations.entry(body_node.id.clone()).or_insert(0) +=
                    iteration_started.elapsed().as_millis() as u64;
                effective.insert(body_node.id.clone(), bytes);
            }

            let exit_bytes =
                effective
                    .get(body_exit)
                    .ok_or_else(|| ExecError::ExecutionFailed {
                        node: node.id.clone(),
                        reason: format!("body exit {body_exit} produced no output"),
                    })?;
            collected.push(parse_or_string(exit_bytes));
        }

        for (id, duration_ms) in body_durations {
            state.node_results.push(NodeExecutionResult {
                node_id: id,
                success: true,
                output: None,
                error: None,
                duration_ms,
            });
        }

        let bytes = serde_json::to_vec(&Value::Array(collected)).expect("JSON array serializes");
        state.outputs.insert(body_exit.to_string(), bytes);
        state.fanned.insert(body_exit.to_string());
        Ok(())
    }

    fn run_merge(
        &self,
        node: &PlanNode,
        strategy: MergeStrategy,
        state: &mut ExecState,
    ) -> Result<Option<String>, ExecError> {
        let sources: Vec<NodeId> = self
            .plan
            .incoming_edges(&node.id)
            .iter()
            .map(|e| e.from.clone())
            .collect();

        let mut absorbed: Vec<String> = Vec::new();
        let mut values: Vec<(NodeId, Vec<u8>)> = Vec::new();
        for id in &sources {
            if let Some(reason) = state.failed.get(id) {
                absorbed.push(format!("{id}: {reason}"));
            } else if let Some(bytes) = state.outputs.get(id) {
                values.push((id.clone(), bytes.clone()));
            }
        }

        let output = match strategy {
            MergeStrategy::Concat => {
                let mut merged = Vec::new();
                for (_, bytes) in &values {
                    match parse_or_string(bytes) {
                        Value::Array(items) => merged.extend(items),
                        other => merged.push(other),
                    }
                }
                serde_json::to_vec(&Value::Array(merged)).expect("JSON array serializes")
            }
            MergeStrategy::ZipWith => {
                let mut lists: Vec<Vec<Value>> = Vec::with_capacity(values.len());
                for (id, bytes) in &values {
                    match parse_or_string(bytes) {
                        Value::Array(items) => lists.push(items),
                        _ => {
                            return Err(ExecError::NotAList { node: id.clone() });
                        }
                    }
                }
                if let Some(first) = lists.first() {
                    for other in &lists[1..] {
                        if other.len() != first.len() {
                            // Fail fast, produce no output.
                            return Err(ExecError::MergeLengthMismatch {
                                left: first.len(),
                                right: other.len(),
                            });
                        }
                    }
                }
                let length = lists.first().map(Vec::len).unwrap_or(0);
                let mut zipped = Vec::with_capacity(length);
                for i in 0..length {
                    zipped.push(Value::Array(
                        lists.iter().map(|l| l[i].clone()).collect(),
                    ));
                }
                serde_json::to_vec(&Value::Array(zipped)).expect("JSON array serializes")
            }
            MergeStrategy::FirstSuccess => match values.first() {
                Some((_, bytes)) => bytes.clone(),
                None => {
                    return Err(ExecError::ExecutionFailed {
                        node: node.id.clone(),
                        reason: format!("no branch succeeded: {}", absorbed.join("; ")),
                    });
                }
            },
            MergeStrategy::AllSuccessful => {
                let merged: Vec<Value> = values
                    .iter()
                    .map(|(_, bytes)| parse_or_string(bytes))
                    .collect();
                serde_json::to_vec(&Value::Array(merged)).expect("JSON array serializes")
            }
        };

        state.outputs.insert(node.id.clone(), output);
        if absorbed.is_empty() {
            Ok(None)
        } else {
            warn!(node = %node.id, absorbed = absorbed.len(), "merge absorbed branch failures");
            // Retained for debugging: which branches were ignored.
            Ok(Some(format!("absorbed failures: {}", absorbed.join("; "))))
        }
    }
}

#[derive(Default)]
struct ExecState {
    outputs: BTreeMap<NodeId, Vec<u8>>,
    failed: BTreeMap<NodeId, String>,
    fanned: BTreeSet<NodeId>,
    node_results: Vec<NodeExecutionResult>,
}

/// Parse bytes as JSON, falling back to a string value for raw text.
fn parse_or_string(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
