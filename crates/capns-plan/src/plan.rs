use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use capns_def::Cap;
use capns_urn::{CapUrn, MediaUrn};

use crate::binding::ArgumentBinding;
use crate::cardinality::Cardinality;
use crate::error::PlanError;

/// Unique identifier of a node within a plan.
pub type NodeId = String;

/// Strategy for merging outputs from parallel branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Concatenate all outputs into one sequence.
    Concat,
    /// Pair outputs element-wise; all inputs must have equal length.
    ZipWith,
    /// First branch that succeeded wins.
    FirstSuccess,
    /// Keep every successful branch, dropping failures.
    AllSuccessful,
}

/// The transformation applied when a successor reads a predecessor's
/// output across an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "edge_type", rename_all = "snake_case")]
pub enum EdgeTransform {
    /// Bytes pass through untouched.
    Direct,
    /// Select one top-level field of a JSON object.
    JsonField { field: String },
    /// Select via a minimal JSON path (`.a.b`, `.a[0]`, `.a[*]`).
    JsonPath { path: String },
    /// ForEach → body: the body sees one element per iteration.
    Iteration,
    /// Body → Collect: per-iteration outputs gathered in index order.
    Collection,
}

/// A data-flow edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEdge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(flatten)]
    pub transform: EdgeTransform,
}

impl PlanEdge {
    #[must_use]
    pub fn direct(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            transform: EdgeTransform::Direct,
        }
    }

    #[must_use]
    pub fn iteration(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            transform: EdgeTransform::Iteration,
        }
    }

    #[must_use]
    pub fn collection(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            transform: EdgeTransform::Collection,
        }
    }

    #[must_use]
    pub fn json_field(from: impl Into<NodeId>, to: impl Into<NodeId>, field: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            transform: EdgeTransform::JsonField {
                field: field.into(),
            },
        }
    }

    #[must_use]
    pub fn json_path(from: impl Into<NodeId>, to: impl Into<NodeId>, path: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            transform: EdgeTransform::JsonPath { path: path.into() },
        }
    }
}

/// The typed payload of a plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Invoke a cap with declaratively bound arguments.
    Cap {
        cap_urn: CapUrn,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        arg_bindings: BTreeMap<String, ArgumentBinding>,
        /// Routing preference: the provider-qualified cap to use when
        /// several providers match.
        #[serde(skip_serializing_if = "Option::is_none")]
        preferred_cap: Option<String>,
    },
    /// Fan-out: run the body once per element of the input node's output.
    ForEach {
        input_node: NodeId,
        body_entry: NodeId,
        body_exit: NodeId,
    },
    /// Fan-in: gather inputs into a list of the given media type.
    Collect {
        input_nodes: Vec<NodeId>,
        output_media_urn: MediaUrn,
    },
    /// Merge parallel branches under a strategy.
    Merge { strategy: MergeStrategy },
    /// Partition a list output into `output_count` sub-outputs by index.
    Split { output_count: usize },
    /// A user-provided entry value.
    InputSlot {
        slot_name: String,
        expected_media_urn: MediaUrn,
        cardinality: Cardinality,
    },
    /// A named terminal output referencing an executed node.
    Output {
        output_name: String,
        source_node: NodeId,
    },
}

/// One node of the execution DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl PlanNode {
    #[must_use]
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            description: None,
            kind,
        }
    }

    #[must_use]
    pub fn is_cap(&self) -> bool {
        matches!(self.kind, NodeKind::Cap { .. })
    }

    #[must_use]
    pub fn is_fan_out(&self) -> bool {
        matches!(self.kind, NodeKind::ForEach { .. })
    }

    #[must_use]
    pub fn is_fan_in(&self) -> bool {
        matches!(self.kind, NodeKind::Collect { .. })
    }

    /// The media type this node produces, where one is declared.
    #[must_use]
    pub fn output_media(&self) -> Option<MediaUrn> {
        match &self.kind {
            NodeKind::InputSlot {
                expected_media_urn, ..
            } => Some(expected_media_urn.clone()),
            NodeKind::Collect {
                output_media_urn, ..
            } => Some(output_media_urn.clone()),
            NodeKind::Cap { cap_urn, .. } => cap_urn.out_spec().as_media().cloned(),
            _ => None,
        }
    }

    /// The media type this node consumes, where one is declared.
    #[must_use]
    pub fn input_media(&self) -> Option<MediaUrn> {
        match &self.kind {
            NodeKind::Cap { cap_urn, .. } => cap_urn.in_spec().as_media().cloned(),
            _ => None,
        }
    }
}

/// The structured execution plan for a cap chain: a validated DAG of
/// typed nodes and edges. Frozen once built; all construction goes
/// through [`crate::PlanBuilder`] or the convenience constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub name: String,
    pub nodes: Vec<PlanNode>,
    pub edges: Vec<PlanEdge>,
    /// Entry points; always `InputSlot` nodes.
    pub entry_nodes: Vec<NodeId>,
    /// Terminal `Output` nodes.
    pub output_nodes: Vec<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ExecutionPlan {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            entry_nodes: Vec::new(),
            output_nodes: Vec::new(),
            metadata: None,
        }
    }

    pub fn add_node(&mut self, node: PlanNode) {
        match &node.kind {
            NodeKind::InputSlot { .. } => self.entry_nodes.push(node.id.clone()),
            NodeKind::Output { .. } => self.output_nodes.push(node.id.clone()),
            _ => {}
        }
        self.nodes.push(node);
    }

    pub fn add_edge(&mut self, edge: PlanEdge) {
        self.edges.push(edge);
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges whose target is `id`.
    #[must_use]
    pub fn incoming_edges(&self, id: &str) -> Vec<&PlanEdge> {
        self.edges.iter().filter(|e| e.to == id).collect()
    }

    /// Edges whose source is `id`.
    #[must_use]
    pub fn outgoing_edges(&self, id: &str) -> Vec<&PlanEdge> {
        self.edges.iter().filter(|e| e.from == id).collect()
    }

    /// Structural validation: unique node ids, edge endpoints exist, no
    /// cycles, input slots have in-degree zero, outputs reference real
    /// nodes, for-each bodies are wired through iteration/collection
    /// edges.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut ids = BTreeSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(PlanError::DuplicateNode {
                    plan: self.name.clone(),
                    id: node.id.clone(),
                });
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(PlanError::OrphanEdge {
                        plan: self.name.clone(),
                        id: endpoint.clone(),
                    });
                }
            }
        }

        for node in &self.nodes {
            match &node.kind {
                NodeKind::InputSlot { .. } => {
                    if !self.incoming_edges(&node.id).is_empty() {
                        return Err(PlanError::SlotHasIncomingEdges {
                            plan: self.name.clone(),
                            id: node.id.clone(),
                        });
                    }
                }
                NodeKind::Output { source_node, .. } => {
                    if !ids.contains(source_node.as_str()) {
                        return Err(PlanError::UnknownNode {
                            plan: self.name.clone(),
                            id: source_node.clone(),
                        });
                    }
                }
                NodeKind::ForEach {
                    input_node,
                    body_entry,
                    body_exit,
                } => {
                    for referenced in [input_node, body_entry, body_exit] {
                        if !ids.contains(referenced.as_str()) {
                            return Err(PlanError::UnknownNode {
                                plan: self.name.clone(),
                                id: referenced.clone(),
                            });
                        }
                    }
                    self.validate_for_each(&node.id, body_entry, body_exit)?;
                }
                NodeKind::Collect { input_nodes, .. } => {
                    for referenced in input_nodes {
                        if !ids.contains(referenced.as_str()) {
                            return Err(PlanError::UnknownNode {
                                plan: self.name.clone(),
                                id: referenced.clone(),
                            });
                        }
                    }
                }
                NodeKind::Cap { .. } | NodeKind::Merge { .. } | NodeKind::Split { .. } => {}
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Validation including per-cap required-argument coverage and media
    /// compatibility along direct edges, given a way to look up cap
    /// definitions.
    pub fn validate_with_caps(
        &self,
        lookup: &dyn Fn(&CapUrn) -> Option<Cap>,
    ) -> Result<(), PlanError> {
        self.validate()?;
        for node in &self.nodes {
            if let NodeKind::Cap {
                cap_urn,
                arg_bindings,
                ..
            } = &node.kind
            {
                let Some(cap) = lookup(cap_urn) else {
                    continue;
                };
                for arg in cap.required_args() {
                    if arg.default.is_none() && !arg_bindings.contains_key(&arg.name) {
                        return Err(PlanError::MissingBinding {
                            plan: self.name.clone(),
                            node: node.id.clone(),
                            arg: arg.name.clone(),
                        });
                    }
                }
            }
        }
        self.validate_edge_media()
    }

    /// Media URNs on direct-edge boundaries must be compatible via
    /// `accepts`, and their cardinalities must need no adapter.
    fn validate_edge_media(&self) -> Result<(), PlanError> {
        for edge in &self.edges {
            if edge.transform != EdgeTransform::Direct {
                continue;
            }
            let Some(produced) = self.node(&edge.from).and_then(|n| n.output_media()) else {
                continue;
            };
            let Some(expected) = self.node(&edge.to).and_then(|n| n.input_media()) else {
                continue;
            };
            if !expected.accepts(&produced) {
                return Err(PlanError::MediaMismatch {
                    plan: self.name.clone(),
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    produced: produced.to_string(),
                    expected: expected.to_string(),
                });
            }
            let source_cardinality = Cardinality::from_media_urn(&produced);
            let target_cardinality = Cardinality::from_media_urn(&expected);
            if target_cardinality.is_compatible_with(source_cardinality)
                != crate::cardinality::Compatibility::Direct
            {
                return Err(PlanError::CardinalityMismatch {
                    plan: self.name.clone(),
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    source_cardinality,
                    target_cardinality,
                });
            }
        }
        Ok(())
    }

    fn validate_for_each(
        &self,
        id: &str,
        body_entry: &str,
        body_exit: &str,
    ) -> Result<(), PlanError> {
        let has_iteration_edge = self.edges.iter().any(|e| {
            e.from == id && e.to == body_entry && e.transform == EdgeTransform::Iteration
        });
        if !has_iteration_edge {
            return Err(PlanError::InvalidForEachBody {
                plan: self.name.clone(),
                id: id.to_string(),
                reason: format!("no iteration edge to body entry {body_entry}"),
            });
        }
        let has_collection_edge = self
            .edges
            .iter()
            .any(|e| e.from == body_exit && e.transform == EdgeTransform::Collection);
        if !has_collection_edge {
            return Err(PlanError::InvalidForEachBody {
                plan: self.name.clone(),
                id: id.to_string(),
                reason: format!("body exit {body_exit} has no collection edge"),
            });
        }
        // The body must be internally connected from entry to exit.
        if body_entry != body_exit {
            let mut frontier = vec![body_entry.to_string()];
            let mut seen: BTreeSet<String> = frontier.iter().cloned().collect();
            let mut reached = false;
            while let Some(node) = frontier.pop() {
                if node == body_exit {
                    reached = true;
                    break;
                }
                for edge in self.outgoing_edges(&node) {
                    if seen.insert(edge.to.clone()) {
                        frontier.push(edge.to.clone());
                    }
                }
            }
            if !reached {
                return Err(PlanError::InvalidForEachBody {
                    plan: self.name.clone(),
                    id: id.to_string(),
                    reason: format!("body exit {body_exit} unreachable from entry {body_entry}"),
                });
            }
        }
        Ok(())
    }

    /// Kahn's algorithm with lexicographic tie-breaking on node ids, so
    /// the order, and therefore execution, is deterministic.
    pub fn topological_order(&self) -> Result<Vec<&PlanNode>, PlanError> {
        let mut in_degree: BTreeMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                *d += 1;
            }
        }
        // Output nodes depend on their source even without an explicit edge.
        for node in &self.nodes {
            if let NodeKind::Output { source_node, .. } = &node.kind {
                if !self
                    .edges
                    .iter()
                    .any(|e| e.from == *source_node && e.to == node.id)
                {
                    if let Some(d) = in_degree.get_mut(node.id.as_str()) {
                        *d += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.iter().next().copied() {
            ready.remove(id);
            order.push(id);
            for edge in self.outgoing_edges(id) {
                if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(edge.to.as_str());
                    }
                }
            }
            for node in &self.nodes {
                if let NodeKind::Output { source_node, .. } = &node.kind {
                    if source_node == id
                        && !self
                            .edges
                            .iter()
                            .any(|e| e.from == *source_node && e.to == node.id)
                    {
                        if let Some(d) = in_degree.get_mut(node.id.as_str()) {
                            *d -= 1;
                            if *d == 0 {
                                ready.insert(node.id.as_str());
                            }
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(PlanError::CycleDetected {
                plan: self.name.clone(),
            });
        }
        Ok(order
            .into_iter()
            .map(|id| self.node(id).expect("ordered ids come from nodes"))
            .collect())
    }

    /// Convenience: a plan invoking one cap on one input slot.
    #[must_use]
    pub fn single_cap(
        name: impl Into<String>,
        cap_urn: CapUrn,
        input_media: MediaUrn,
        bindings: BTreeMap<String, ArgumentBinding>,
    ) -> Self {
        let mut plan = Self::new(name);
        let cardinality = Cardinality::from_media_urn(&input_media);
        plan.add_node(PlanNode::new(
            "input-0",
            NodeKind::InputSlot {
                slot_name: "input".to_string(),
                expected_media_urn: input_media,
                cardinality,
            },
        ));
        plan.add_node(PlanNode::new(
            "cap-0",
            NodeKind::Cap {
                cap_urn,
                arg_bindings: bindings,
                preferred_cap: None,
            },
        ));
        plan.add_node(PlanNode::new(
            "output",
            NodeKind::Output {
                output_name: "result".to_string(),
                source_node: "cap-0".to_string(),
            },
        ));
        plan.add_edge(PlanEdge::direct("input-0", "cap-0"));
        plan
    }

    /// Convenience: a linear chain of caps over one input slot. Bindings
    /// are threaded so each cap consumes its predecessor's output.
    #[must_use]
    pub fn linear_chain(
        name: impl Into<String>,
        caps: &[(CapUrn, String)],
        input_media: MediaUrn,
    ) -> Self {
        let mut plan = Self::new(name);
        let cardinality = Cardinality::from_media_urn(&input_media);
        plan.add_node(PlanNode::new(
            "input-0",
            NodeKind::InputSlot {
                slot_name: "input".to_string(),
                expected_media_urn: input_media,
                cardinality,
            },
        ));
        let mut previous = "input-0".to_string();
        for (index, (cap_urn, input_arg)) in caps.iter().enumerate() {
            let id = format!("cap-{index}");
            let mut bindings = BTreeMap::new();
            bindings.insert(
                input_arg.clone(),
                ArgumentBinding::PreviousOutput {
                    node: previous.clone(),
                    field: None,
                },
            );
            plan.add_node(PlanNode::new(
                id.clone(),
                NodeKind::Cap {
                    cap_urn: cap_urn.clone(),
                    arg_bindings: bindings,
                    preferred_cap: None,
                },
            ));
            plan.add_edge(PlanEdge::direct(previous.clone(), id.clone()));
            previous = id;
        }
        plan.add_node(PlanNode::new(
            "output",
            NodeKind::Output {
                output_name: "result".to_string(),
                source_node: previous,
            },
        ));
        plan
    }
}
