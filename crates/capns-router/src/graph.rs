use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use capns_def::Cap;
use capns_urn::{DirectionSpec, MediaUrn};

/// An edge in the conversion graph: one cap converting `from` to `to`.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    /// Canonical media-URN string of the input node.
    pub from: String,
    /// Canonical media-URN string of the output node.
    pub to: String,
    pub cap: Cap,
    pub registry_name: String,
    pub specificity: u32,
}

/// Counts describing a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub input_spec_count: usize,
    pub output_spec_count: usize,
}

/// A directed multigraph over media URNs where edges are caps.
///
/// Node identity is media-URN *equivalence*: keys are canonical URN
/// strings, so differently-ordered tag serializations land on the same
/// node. Derived from a [`crate::CapCube`]; rebuild after any cube
/// mutation.
#[derive(Default)]
pub struct CapGraph {
    edges: Vec<GraphEdge>,
    outgoing: BTreeMap<String, Vec<usize>>,
    incoming: BTreeMap<String, Vec<usize>>,
}

/// Canonicalize a node key so equivalent URNs collide.
fn node_key(spec: &DirectionSpec) -> String {
    match spec {
        DirectionSpec::Wildcard => "*".to_string(),
        DirectionSpec::Media(urn) => urn.to_string(),
    }
}

/// Canonicalize a caller-supplied media URN string into a node key.
/// Unparseable strings are used verbatim so lookups simply miss.
fn canonical_key(spec: &str) -> String {
    if spec == "*" {
        return spec.to_string();
    }
    match MediaUrn::parse(spec) {
        Ok(urn) => urn.to_string(),
        Err(_) => spec.to_string(),
    }
}

impl CapGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cap as an edge from its `in` spec to its `out` spec.
    pub fn add_cap(&mut self, cap: Cap, registry_name: impl Into<String>) {
        let from = node_key(cap.cap_urn.in_spec());
        let to = node_key(cap.cap_urn.out_spec());
        let specificity = cap.specificity();
        let index = self.edges.len();
        debug!(cap = %cap.urn_string(), %from, %to, "adding graph edge");
        self.edges.push(GraphEdge {
            from: from.clone(),
            to: to.clone(),
            cap,
            registry_name: registry_name.into(),
            specificity,
        });
        self.outgoing.entry(from).or_default().push(index);
        self.incoming.entry(to).or_default().push(index);
    }

    /// All unique node keys.
    #[must_use]
    pub fn nodes(&self) -> BTreeSet<&str> {
        self.edges
            .iter()
            .flat_map(|e| [e.from.as_str(), e.to.as_str()])
            .collect()
    }

    #[must_use]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Edges leaving a spec (caps taking it as input).
    #[must_use]
    pub fn outgoing(&self, spec: &str) -> Vec<&GraphEdge> {
        let key = canonical_key(spec);
        self.outgoing
            .get(&key)
            .map(|indices| indices.iter().map(|i| &self.edges[*i]).collect())
            .unwrap_or_default()
    }

    /// Edges entering a spec (caps producing it as output).
    #[must_use]
    pub fn incoming(&self, spec: &str) -> Vec<&GraphEdge> {
        let key = canonical_key(spec);
        self.incoming
            .get(&key)
            .map(|indices| indices.iter().map(|i| &self.edges[*i]).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_direct_edge(&self, from: &str, to: &str) -> bool {
        let to_key = canonical_key(to);
        self.outgoing(from).iter().any(|e| e.to == to_key)
    }

    /// Direct edges between two specs, most specific first.
    #[must_use]
    pub fn direct_edges(&self, from: &str, to: &str) -> Vec<&GraphEdge> {
        let to_key = canonical_key(to);
        let mut edges: Vec<&GraphEdge> = self
            .outgoing(from)
            .into_iter()
            .filter(|e| e.to == to_key)
            .collect();
        edges.sort_by(|a, b| b.specificity.cmp(&a.specificity));
        edges
    }

    /// Whether any conversion path exists, by BFS.
    #[must_use]
    pub fn can_convert(&self, from: &str, to: &str) -> bool {
        self.find_path(from, to).is_some()
    }

    /// Shortest conversion path by BFS.
    ///
    /// Among equal-length paths the one taking the most specific edge at
    /// the first point of divergence wins: outgoing edges are explored in
    /// decreasing specificity (cap URN string as the final tie-break), and
    /// the first path to reach the target is kept.
    #[must_use]
    pub fn find_path(&self, from: &str, to: &str) -> Option<Vec<&GraphEdge>> {
        let from = canonical_key(from);
        let to = canonical_key(to);
        if from == to {
            return Some(Vec::new());
        }

        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(from.clone());
        // Queue holds (node, path-so-far as edge indices).
        let mut queue: VecDeque<(String, Vec<usize>)> = VecDeque::new();
        queue.push_back((from, Vec::new()));

        while let Some((node, path)) = queue.pop_front() {
            for index in self.ranked_outgoing(&node) {
                let edge = &self.edges[index];
                if edge.to == to {
                    let mut full = path.clone();
                    full.push(index);
                    return Some(full.into_iter().map(|i| &self.edges[i]).collect());
                }
                if visited.insert(edge.to.clone()) {
                    let mut next = path.clone();
                    next.push(index);
                    queue.push_back((edge.to.clone(), next));
                }
            }
        }
        None
    }

    /// All paths up to `max_depth` edges, sorted by length ascending.
    #[must_use]
    pub fn find_all_paths(&self, from: &str, to: &str, max_depth: usize) -> Vec<Vec<&GraphEdge>> {
        let from = canonical_key(from);
        let to = canonical_key(to);
        let mut paths: Vec<Vec<usize>> = Vec::new();
        let mut on_path: BTreeSet<String> = BTreeSet::new();
        on_path.insert(from.clone());
        let mut current: Vec<usize> = Vec::new();
        self.dfs_paths(&from, &to, max_depth, &mut on_path, &mut current, &mut paths);
        paths.sort_by_key(Vec::len);
        paths
            .into_iter()
            .map(|p| p.into_iter().map(|i| &self.edges[i]).collect())
            .collect()
    }

    fn dfs_paths(
        &self,
        node: &str,
        target: &str,
        remaining: usize,
        on_path: &mut BTreeSet<String>,
        current: &mut Vec<usize>,
        paths: &mut Vec<Vec<usize>>,
    ) {
        if remaining == 0 {
            return;
        }
        for index in self.ranked_outgoing(node) {
            let edge = &self.edges[index];
            if edge.to == target {
                let mut found = current.clone();
                found.push(index);
                paths.push(found);
                continue;
            }
            if on_path.contains(&edge.to) {
                continue;
            }
            on_path.insert(edge.to.clone());
            current.push(index);
            self.dfs_paths(&edge.to, target, remaining - 1, on_path, current, paths);
            current.pop();
            on_path.remove(&edge.to);
        }
    }

    /// The path with the maximum total specificity among all paths up to
    /// `max_depth`; ties go to the shorter path, then to URN order.
    #[must_use]
    pub fn find_best_path(&self, from: &str, to: &str, max_depth: usize) -> Option<Vec<&GraphEdge>> {
        let paths = self.find_all_paths(from, to, max_depth);
        paths.into_iter().max_by(|a, b| {
            let spec_a: u32 = a.iter().map(|e| e.specificity).sum();
            let spec_b: u32 = b.iter().map(|e| e.specificity).sum();
            spec_a
                .cmp(&spec_b)
                .then_with(|| b.len().cmp(&a.len()))
                .then_with(|| {
                    let urns_b: Vec<String> = b.iter().map(|e| e.cap.urn_string()).collect();
                    let urns_a: Vec<String> = a.iter().map(|e| e.cap.urn_string()).collect();
                    urns_b.cmp(&urns_a)
                })
        })
    }

    /// Specs with at least one outgoing edge.
    #[must_use]
    pub fn input_specs(&self) -> Vec<&str> {
        self.outgoing.keys().map(String::as_str).collect()
    }

    /// Specs with at least one incoming edge.
    #[must_use]
    pub fn output_specs(&self) -> Vec<&str> {
        self.incoming.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.nodes().len(),
            edge_count: self.edges.len(),
            input_spec_count: self.outgoing.len(),
            output_spec_count: self.incoming.len(),
        }
    }

    /// Outgoing edge indices ordered by decreasing specificity, with the
    /// cap URN string as the deterministic final tie-break.
    fn ranked_outgoing(&self, node: &str) -> Vec<usize> {
        let mut indices = self
            .outgoing
            .get(node)
            .cloned()
            .unwrap_or_default();
        indices.sort_by(|a, b| {
            let ea = &self.edges[*a];
            let eb = &self.edges[*b];
            eb.specificity
                .cmp(&ea.specificity)
                .then_with(|| ea.cap.urn_string().cmp(&eb.cap.urn_string()))
        });
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capns_def::CapBuilder;
    use capns_urn::CapUrn;

    fn cap(urn: &str) -> Cap {
        CapBuilder::new(CapUrn::parse(urn).unwrap(), urn.to_string(), "test")
            .build()
            .unwrap()
    }

    fn graph_of(urns: &[&str]) -> CapGraph {
        let mut g = CapGraph::new();
        for urn in urns {
            g.add_cap(cap(urn), "test-registry");
        }
        g
    }

    #[test]
    fn test_edges_and_nodes() {
        let g = graph_of(&[
            r#"cap:in=media:pdf;out="media:image;png""#,
            r#"cap:in="media:image;png";out="media:textable;txt""#,
        ]);
        assert_eq!(g.stats().edge_count, 2);
        assert_eq!(g.stats().node_count, 3);
        assert_eq!(g.outgoing("media:pdf").len(), 1);
        assert_eq!(g.incoming("media:textable;txt").len(), 1);
    }

    #[test]
    fn test_node_identity_by_equivalence() {
        // Same media type, different tag order: one node.
        let g = graph_of(&[
            r#"cap:in=media:pdf;out="media:png;image""#,
            r#"cap:in="media:image;png";out="media:textable;txt""#,
        ]);
        assert_eq!(g.stats().node_count, 3);
        // Lookups with any equivalent serialization hit the same node.
        assert_eq!(g.outgoing("media:png;image").len(), 1);
        assert_eq!(g.outgoing("media:image;png").len(), 1);
    }

    #[test]
    fn test_direct_edges_sorted_by_specificity() {
        let g = graph_of(&[
            r#"cap:in=media:pdf;out="media:image;png""#,
            r#"cap:in=media:pdf;out="media:image;png";op=thumbnail"#,
        ]);
        let edges = g.direct_edges("media:pdf", "media:image;png");
        assert_eq!(edges.len(), 2);
        assert!(edges[0].specificity > edges[1].specificity);
    }

    #[test]
    fn test_shortest_path_beats_longer() {
        // S3: pdf→png→txt exists, but pdf→txt direct wins on length.
        let g = graph_of(&[
            r#"cap:in=media:pdf;out="media:image;png""#,
            r#"cap:in="media:image;png";out="media:textable;txt""#,
            r#"cap:in=media:pdf;out="media:textable;txt""#,
        ]);
        let path = g.find_path("media:pdf", "media:textable;txt").unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].from, "media:pdf");
        assert_eq!(path[0].to, "media:textable;txt");
    }

    #[test]
    fn test_path_soundness() {
        let g = graph_of(&[
            r#"cap:in=media:pdf;out="media:image;png""#,
            r#"cap:in="media:image;png";out="media:textable;txt""#,
        ]);
        let path = g.find_path("media:pdf", "media:textable;txt").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].from, "media:pdf");
        assert_eq!(path[path.len() - 1].to, "media:textable;txt");
        for pair in path.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
    }

    #[test]
    fn test_no_path() {
        let g = graph_of(&[r#"cap:in=media:pdf;out="media:image;png""#]);
        assert!(g.find_path("media:image;png", "media:pdf").is_none());
        assert!(!g.can_convert("media:image;png", "media:pdf"));
        assert!(g.can_convert("media:pdf", "media:image;png"));
    }

    #[test]
    fn test_find_all_paths_sorted_by_length() {
        let g = graph_of(&[
            r#"cap:in=media:pdf;out="media:image;png""#,
            r#"cap:in="media:image;png";out="media:textable;txt""#,
            r#"cap:in=media:pdf;out="media:textable;txt""#,
        ]);
        let paths = g.find_all_paths("media:pdf", "media:textable;txt", 4);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].len(), 1);
        assert_eq!(paths[1].len(), 2);
    }

    #[test]
    fn test_find_all_paths_respects_depth() {
        let g = graph_of(&[
            r#"cap:in=media:pdf;out="media:image;png""#,
            r#"cap:in="media:image;png";out="media:textable;txt""#,
        ]);
        assert!(g.find_all_paths("media:pdf", "media:textable;txt", 1).is_empty());
        assert_eq!(
            g.find_all_paths("media:pdf", "media:textable;txt", 2).len(),
            1
        );
    }

    #[test]
    fn test_find_best_path_prefers_specificity() {
        // A longer but more specific chain beats the bland direct edge.
        let g = graph_of(&[
            r#"cap:in=media:pdf;out="media:textable;txt""#,
            r#"cap:in=media:pdf;out="media:image;png";op=render;quality=high"#,
            r#"cap:in="media:image;png";out="media:textable;txt";op=ocr;engine=best"#,
        ]);
        let best = g.find_best_path("media:pdf", "media:textable;txt", 4).unwrap();
        assert_eq!(best.len(), 2);

        // With equal total specificity, the shorter path wins: the direct
        // edge carries two extra exact tags (12) matching the bland
        // two-hop chain's 6 + 6.
        let g = graph_of(&[
            r#"cap:in=media:pdf;out="media:textable;txt";op=extract;mode=fast"#,
            r#"cap:in=media:pdf;out="media:image;png""#,
            r#"cap:in="media:image;png";out="media:textable;txt""#,
        ]);
        let best = g.find_best_path("media:pdf", "media:textable;txt", 4).unwrap();
        assert_eq!(best.len(), 1);
    }

    #[test]
    fn test_cycle_handling() {
        let g = graph_of(&[
            r#"cap:in=media:a-form;out=media:b-form"#,
            r#"cap:in=media:b-form;out=media:a-form"#,
            r#"cap:in=media:b-form;out=media:c-form"#,
        ]);
        let path = g.find_path("media:a-form", "media:c-form").unwrap();
        assert_eq!(path.len(), 2);
        // DFS enumeration terminates despite the a↔b cycle.
        let paths = g.find_all_paths("media:a-form", "media:c-form", 8);
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn test_wildcard_direction_becomes_star_node() {
        let g = graph_of(&["cap:in=*;out=media:void"]);
        assert!(g.nodes().contains("*"));
        assert_eq!(g.outgoing("*").len(), 1);
    }

    #[test]
    fn test_graph_consistency() {
        // P4: every cap appears as exactly one edge labelled with it.
        let urns = [
            r#"cap:in=media:pdf;out="media:image;png""#,
            r#"cap:in="media:image;png";out="media:textable;txt""#,
        ];
        let g = graph_of(&urns);
        for urn in urns {
            let expected = cap(urn);
            let labelled: Vec<&GraphEdge> = g
                .edges()
                .iter()
                .filter(|e| e.cap.urn_string() == expected.urn_string())
                .collect();
            assert_eq!(labelled.len(), 1);
            assert_eq!(labelled[0].from, node_key(expected.cap_urn.in_spec()));
            assert_eq!(labelled[0].to, node_key(expected.cap_urn.out_spec()));
        }
    }
}
