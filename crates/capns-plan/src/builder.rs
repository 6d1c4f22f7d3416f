use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use capns_def::{Cap, CapArg};
use capns_router::CapGraph;
use capns_urn::{CapUrn, MediaUrn};

use crate::binding::{ArgumentBinding, CapInputFile};
use crate::cardinality::{CapCardinalityInfo, Cardinality, ChainAnalysis, Compatibility};
use crate::error::PlanError;
use crate::plan::{ExecutionPlan, NodeKind, PlanEdge, PlanNode};

/// Default search depth for conversion paths.
const DEFAULT_MAX_DEPTH: usize = 8;

/// A media type reachable from a source, with the shortest and longest
/// simple-path depths found within the search bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachableTarget {
    pub media_urn: String,
    pub min_depth: usize,
    pub max_depth: usize,
}

/// One argument a UI would need to know about before running a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentInfo {
    pub name: String,
    pub media_urn: MediaUrn,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

/// Per-step argument requirements along a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepArgumentRequirements {
    pub cap_urn: String,
    pub arguments: Vec<ArgumentInfo>,
}

/// Aggregated argument requirements for a whole path: each step's
/// arguments plus the union of slot-requiring ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathArgumentRequirements {
    pub steps: Vec<StepArgumentRequirements>,
    pub all_slots: Vec<ArgumentInfo>,
}

/// Builds execution plans from conversion paths through a [`CapGraph`].
///
/// The builder owns a graph snapshot; derive one from a cube with
/// `cube.graph()`. An `available_caps` filter restricts pathing to a
/// subset of cap URNs.
pub struct PlanBuilder {
    graph: CapGraph,
    max_depth: usize,
}

impl PlanBuilder {
    #[must_use]
    pub fn new(graph: CapGraph) -> Self {
        Self {
            graph,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Restrict pathing to the given cap URNs by rebuilding the graph
    /// without the others.
    #[must_use]
    pub fn with_available_caps(self, available: &BTreeSet<String>) -> Self {
        let mut filtered = CapGraph::new();
        for edge in self.graph.edges() {
            if available.contains(&edge.cap.urn_string()) {
                filtered.add_cap(edge.cap.clone(), edge.registry_name.clone());
            }
        }
        Self {
            graph: filtered,
            max_depth: self.max_depth,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn graph(&self) -> &CapGraph {
        &self.graph
    }

    /// The best conversion path from source to target as cap URN strings.
    pub fn find_path(&self, source: &str, target: &str) -> Result<Vec<String>, PlanError> {
        Ok(self
            .best_path_caps(source, target)?
            .iter()
            .map(Cap::urn_string)
            .collect())
    }

    /// All conversion paths up to `max_depth`, as cap URN strings.
    #[must_use]
    pub fn find_all_paths(&self, source: &str, target: &str, max_depth: usize) -> Vec<Vec<String>> {
        self.graph
            .find_all_paths(source, target, max_depth)
            .into_iter()
            .map(|p| p.iter().map(|e| e.cap.urn_string()).collect())
            .collect()
    }

    /// Cardinality analysis for the best path from source to target.
    pub fn analyze_path_cardinality(
        &self,
        source: &str,
        target: &str,
    ) -> Result<ChainAnalysis, PlanError> {
        let source_media = MediaUrn::parse(source)?;
        let initial = Cardinality::from_media_urn(&source_media);
        let caps = self.best_path_caps(source, target)?;
        let infos: Vec<CapCardinalityInfo> = caps
            .iter()
            .map(|c| CapCardinalityInfo::from_cap_urn(&c.cap_urn))
            .collect();
        Ok(ChainAnalysis::analyze(initial, &infos))
    }

    /// Media types reachable from `source` within `max_depth` steps.
    #[must_use]
    pub fn reachable_targets(&self, source: &str, max_depth: usize) -> Vec<ReachableTarget> {
        let source_key = match MediaUrn::parse(source) {
            Ok(urn) => urn.to_string(),
            Err(_) => source.to_string(),
        };
        let mut targets = Vec::new();
        for node in self.graph.nodes() {
            if node == source_key || node == "*" {
                continue;
            }
            let paths = self.graph.find_all_paths(&source_key, node, max_depth);
            if paths.is_empty() {
                continue;
            }
            let lengths: Vec<usize> = paths.iter().map(Vec::len).collect();
            targets.push(ReachableTarget {
                media_urn: node.to_string(),
                min_depth: *lengths.iter().min().expect("non-empty"),
                max_depth: *lengths.iter().max().expect("non-empty"),
            });
        }
        targets
    }

    /// Aggregate argument requirements for a path of cap URNs, so a UI
    /// can prompt for the slot-requiring ones up front.
    pub fn analyze_path_arguments(
        &self,
        path: &[String],
    ) -> Result<PathArgumentRequirements, PlanError> {
        let mut steps = Vec::new();
        let mut all_slots: Vec<ArgumentInfo> = Vec::new();
        for urn in path {
            let cap = self.cap_by_urn(urn).ok_or_else(|| PlanError::Invalid {
                plan: "path".to_string(),
                reason: format!("cap {urn} is not in the graph"),
            })?;
            let primary = primary_arg(cap).map(|a| a.name.clone());
            let mut arguments = Vec::new();
            for arg in &cap.args {
                let info = ArgumentInfo {
                    name: arg.name.clone(),
                    media_urn: arg.media_urn.clone(),
                    required: arg.required,
                    default: arg.default.clone(),
                    schema: cap
                        .resolve_media_spec(&arg.media_urn)
                        .and_then(|s| s.schema.clone()),
                };
                let needs_slot = arg.required
                    && arg.default.is_none()
                    && Some(&arg.name) != primary.as_ref();
                if needs_slot && !all_slots.iter().any(|s| s.name == info.name) {
                    all_slots.push(info.clone());
                }
                arguments.push(info);
            }
            steps.push(StepArgumentRequirements {
                cap_urn: cap.urn_string(),
                arguments,
            });
        }
        Ok(PathArgumentRequirements { steps, all_slots })
    }

    /// Build an execution plan converting `source` into `target` over the
    /// given input files.
    ///
    /// Finds the best path, threads cardinality along it, and inserts
    /// `ForEach`/`Collect` fan-out adapters and wrap-in-array collects
    /// where the shapes disagree.
    pub fn build_plan(
        &self,
        source: &str,
        target: &str,
        input_files: &[CapInputFile],
    ) -> Result<ExecutionPlan, PlanError> {
        let caps = self.best_path_caps(source, target)?;
        let name = format!("{source} -> {target}");
        self.materialize(&name, source, target, &caps, input_files)
    }

    /// Build a plan from an explicit path of cap URNs.
    pub fn build_plan_from_path(
        &self,
        name: &str,
        path: &[String],
        source: &str,
        target: &str,
        input_files: &[CapInputFile],
    ) -> Result<ExecutionPlan, PlanError> {
        let mut caps = Vec::with_capacity(path.len());
        for urn in path {
            caps.push(
                self.cap_by_urn(urn)
                    .cloned()
                    .ok_or_else(|| PlanError::Invalid {
                        plan: name.to_string(),
                        reason: format!("cap {urn} is not in the graph"),
                    })?,
            );
        }
        self.materialize(name, source, target, &caps, input_files)
    }

    /// Resolve the best path, trying list-marker variants of the
    /// endpoints when the literal ones are not graph nodes: a `pdf;list`
    /// source still routes through the scalar `pdf` conversions, with
    /// cardinality adapters doing the lifting at materialization time.
    fn best_path_caps(&self, source: &str, target: &str) -> Result<Vec<Cap>, PlanError> {
        for (s, t) in endpoint_candidates(source, target) {
            if let Some(path) = self.graph.find_best_path(&s, &t, self.max_depth) {
                return Ok(path.iter().map(|e| e.cap.clone()).collect());
            }
        }
        Err(PlanError::NotFound {
            from: source.to_string(),
            target: target.to_string(),
        })
    }

    fn cap_by_urn(&self, urn: &str) -> Option<&Cap> {
        self.graph
            .edges()
            .iter()
            .find(|e| e.cap.urn_string() == urn)
            .map(|e| &e.cap)
    }

    fn materialize(
        &self,
        name: &str,
        source: &str,
        target: &str,
        caps: &[Cap],
        input_files: &[CapInputFile],
    ) -> Result<ExecutionPlan, PlanError> {
        if caps.is_empty() {
            return Err(PlanError::Invalid {
                plan: name.to_string(),
                reason: "empty cap path".to_string(),
            });
        }
        let source_media = MediaUrn::parse(source)?;

        let mut plan = ExecutionPlan::new(name);
        plan.metadata = Some(serde_json::json!({
            "source": source,
            "target": target,
        }));

        // Entry: one slot per input file; no files means one empty slot
        // carrying the source media type.
        let mut current: String;
        let mut current_cardinality;
        if input_files.len() > 1 {
            for (index, file) in input_files.iter().enumerate() {
                plan.add_node(PlanNode::new(
                    format!("input-{index}"),
                    NodeKind::InputSlot {
                        slot_name: format!("input-{index}"),
                        expected_media_urn: file.media_urn.clone(),
                        cardinality: Cardinality::from_media_urn(&file.media_urn),
                    },
                ));
            }
            // Multiple inputs always enter the chain as a sequence.
            let gather_media = source_media.with_list_marker();
            plan.add_node(PlanNode::new(
                "gather-inputs",
                NodeKind::Collect {
                    input_nodes: (0..input_files.len()).map(|i| format!("input-{i}")).collect(),
                    output_media_urn: gather_media,
                },
            ));
            for index in 0..input_files.len() {
                plan.add_edge(PlanEdge::collection(format!("input-{index}"), "gather-inputs"));
            }
            current = "gather-inputs".to_string();
            current_cardinality = Cardinality::Sequence;
        } else {
            let media = input_files
                .first()
                .map(|f| f.media_urn.clone())
                .unwrap_or_else(|| source_media.clone());
            current_cardinality = Cardinality::from_media_urn(&media);
            plan.add_node(PlanNode::new(
                "input-0",
                NodeKind::InputSlot {
                    slot_name: "input".to_string(),
                    expected_media_urn: media,
                    cardinality: current_cardinality,
                },
            ));
            current = "input-0".to_string();
        }

        for (index, cap) in caps.iter().enumerate() {
            let info = CapCardinalityInfo::from_cap_urn(&cap.cap_urn);
            let cap_id = format!("cap-{index}");
            match info.input.is_compatible_with(current_cardinality) {
                Compatibility::Direct => {
                    plan.add_node(cap_node(&cap_id, cap, &current));
                    plan.add_edge(PlanEdge::direct(current.clone(), cap_id.clone()));
                    current = cap_id;
                    current_cardinality = info.output;
                }
                Compatibility::WrapInArray => {
                    let wrap_id = format!("wrap-{index}");
                    let wrapped_media = cap
                        .cap_urn
                        .in_spec()
                        .as_media()
                        .cloned()
                        .unwrap_or_else(MediaUrn::any)
                        .with_list_marker();
                    plan.add_node(PlanNode::new(
                        wrap_id.clone(),
                        NodeKind::Collect {
                            input_nodes: vec![current.clone()],
                            output_media_urn: wrapped_media,
                        },
                    ));
                    plan.add_edge(PlanEdge::collection(current.clone(), wrap_id.clone()));
                    plan.add_node(cap_node(&cap_id, cap, &wrap_id));
                    plan.add_edge(PlanEdge::direct(wrap_id, cap_id.clone()));
                    current = cap_id;
                    current_cardinality = info.output;
                }
                Compatibility::RequiresFanOut => {
                    debug!(cap = %cap.urn_string(), index, "inserting fan-out");
                    let foreach_id = format!("foreach-{index}");
                    let collect_id = format!("collect-{index}");
                    plan.add_node(PlanNode::new(
                        foreach_id.clone(),
                        NodeKind::ForEach {
                            input_node: current.clone(),
                            body_entry: cap_id.clone(),
                            body_exit: cap_id.clone(),
                        },
                    ));
                    plan.add_edge(PlanEdge::direct(current.clone(), foreach_id.clone()));
                    plan.add_node(cap_node(&cap_id, cap, &foreach_id));
                    plan.add_edge(PlanEdge::iteration(foreach_id, cap_id.clone()));
                    let collected_media = cap
                        .cap_urn
                        .out_spec()
                        .as_media()
                        .cloned()
                        .unwrap_or_else(MediaUrn::any)
                        .with_list_marker();
                    plan.add_node(PlanNode::new(
                        collect_id.clone(),
                        NodeKind::Collect {
                            input_nodes: vec![cap_id.clone()],
                            output_media_urn: collected_media,
                        },
                    ));
                    plan.add_edge(PlanEdge::collection(cap_id, collect_id.clone()));
                    current = collect_id;
                    current_cardinality = Cardinality::Sequence;
                }
            }
        }

        plan.add_node(PlanNode::new(
            "output",
            NodeKind::Output {
                output_name: "result".to_string(),
                source_node: current.clone(),
            },
        ));
        plan.add_edge(PlanEdge::direct(current, "output"));

        let lookup = |urn: &CapUrn| {
            caps.iter()
                .find(|c| c.cap_urn == *urn)
                .cloned()
        };
        plan.validate_with_caps(&lookup)?;
        Ok(plan)
    }
}

/// Build a cap node with its argument bindings: the primary data argument
/// reads the predecessor's output, defaults cover what they can, and
/// anything still required becomes a user slot.
fn cap_node(id: &str, cap: &Cap, previous: &str) -> PlanNode {
    let mut bindings = BTreeMap::new();
    let primary = primary_arg(cap);
    if let Some(primary) = primary {
        bindings.insert(
            primary.name.clone(),
            ArgumentBinding::PreviousOutput {
                node: previous.to_string(),
                field: None,
            },
        );
    }
    for arg in &cap.args {
        if Some(arg.name.as_str()) == primary.map(|a| a.name.as_str()) {
            continue;
        }
        if arg.default.is_some() {
            bindings.insert(arg.name.clone(), ArgumentBinding::CapDefault);
        } else if arg.required {
            bindings.insert(
                arg.name.clone(),
                ArgumentBinding::Slot {
                    name: arg.name.clone(),
                    schema: cap
                        .resolve_media_spec(&arg.media_urn)
                        .and_then(|s| s.schema.clone()),
                },
            );
        }
    }
    PlanNode::new(
        id,
        NodeKind::Cap {
            cap_urn: cap.cap_urn.clone(),
            arg_bindings: bindings,
            preferred_cap: None,
        },
    )
}

/// Endpoint pairs to try during path resolution, most literal first.
fn endpoint_candidates(source: &str, target: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for s in marker_variants(source) {
        for t in marker_variants(target) {
            if !pairs.contains(&(s.clone(), t.clone())) {
                pairs.push((s.clone(), t));
            }
        }
    }
    pairs
}

/// The spec itself, then its scalar form, then its list form.
fn marker_variants(spec: &str) -> Vec<String> {
    let Ok(urn) = MediaUrn::parse(spec) else {
        return vec![spec.to_string()];
    };
    let mut variants = vec![urn.to_string()];
    for candidate in [
        urn.without_list_marker().to_string(),
        urn.with_list_marker().to_string(),
    ] {
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

/// The argument that receives the flowing data: a stdin-sourced argument
/// if one exists, otherwise the first required one, otherwise the first.
fn primary_arg(cap: &Cap) -> Option<&CapArg> {
    cap.args
        .iter()
        .find(|a| a.accepts_stdin())
        .or_else(|| cap.args.iter().find(|a| a.required))
        .or_else(|| cap.args.first())
}
