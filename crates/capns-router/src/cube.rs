use std::sync::Arc;

use tracing::debug;

use capns_def::Cap;
use capns_urn::CapUrn;

use crate::error::RouterError;
use crate::graph::CapGraph;
use crate::matrix::{CapMatrix, CapProvider};

/// The winning match across a cube query.
#[derive(Clone)]
pub struct BestMatch {
    pub cap: Cap,
    pub specificity: u32,
    pub registry_name: String,
}

/// An executable handle: the winning cap definition bundled with its
/// provider, ready for invocation.
#[derive(Clone)]
pub struct CapHandle {
    pub cap: Cap,
    pub registry_name: String,
    provider: Arc<dyn CapProvider>,
}

impl std::fmt::Debug for CapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapHandle")
            .field("cap", &self.cap)
            .field("registry_name", &self.registry_name)
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl CapHandle {
    /// Invoke the underlying provider.
    pub async fn invoke(
        &self,
        request: &CapUrn,
        payload: serde_json::Value,
    ) -> Result<Vec<u8>, RouterError> {
        self.provider.invoke(request, payload).await
    }

    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}

/// Composite router: an ordered list of named matrices.
///
/// The best match across all matrices wins by specificity; on a tie the
/// matrix added earlier wins. The cube never caches; every query re-polls
/// the matrices, which are expected to stay small.
#[derive(Default)]
pub struct CapCube {
    registries: Vec<(String, CapMatrix)>,
}

impl CapCube {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named matrix at the end of the priority order.
    pub fn add(&mut self, name: impl Into<String>, matrix: CapMatrix) {
        self.registries.push((name.into(), matrix));
    }

    /// Remove a matrix by name, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<CapMatrix> {
        let index = self.registries.iter().position(|(n, _)| n == name)?;
        Some(self.registries.remove(index).1)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CapMatrix> {
        self.registries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    #[must_use]
    pub fn get_mut(&mut self, name: &str) -> Option<&mut CapMatrix> {
        self.registries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m)
    }

    /// Registry names in priority order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.registries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Find the best match across all matrices.
    ///
    /// Polls each matrix for its own best and keeps the maximum
    /// specificity; a strict improvement is required to displace an
    /// earlier matrix's match, which gives earlier matrices the tie.
    #[must_use]
    pub fn best(&self, request: &CapUrn) -> Option<BestMatch> {
        let mut winner: Option<BestMatch> = None;
        for (name, matrix) in &self.registries {
            if let Some(m) = matrix.best(request) {
                let better = match &winner {
                    None => true,
                    Some(current) => m.specificity > current.specificity,
                };
                if better {
                    winner = Some(BestMatch {
                        cap: m.cap.clone(),
                        specificity: m.specificity,
                        registry_name: name.clone(),
                    });
                }
            }
        }
        if let Some(w) = &winner {
            debug!(
                request = %request,
                winner = %w.cap.urn_string(),
                registry = %w.registry_name,
                specificity = w.specificity,
                "routed request"
            );
        }
        winner
    }

    /// Resolve a request to an executable handle.
    pub fn can(&self, request: &CapUrn) -> Result<CapHandle, RouterError> {
        let mut winner: Option<(u32, &str, &Cap, &Arc<dyn CapProvider>)> = None;
        for (name, matrix) in &self.registries {
            if let Some(m) = matrix.best(request) {
                let better = match &winner {
                    None => true,
                    Some((spec, _, _, _)) => m.specificity > *spec,
                };
                if better {
                    winner = Some((m.specificity, name, m.cap, m.provider));
                }
            }
        }
        match winner {
            Some((_, name, cap, provider)) => Ok(CapHandle {
                cap: cap.clone(),
                registry_name: name.to_string(),
                provider: Arc::clone(provider),
            }),
            None => Err(RouterError::NotFound {
                urn: request.to_string(),
            }),
        }
    }

    /// Whether any matrix accepts the request.
    #[must_use]
    pub fn accepts(&self, request: &CapUrn) -> bool {
        self.registries.iter().any(|(_, m)| m.accepts(request))
    }

    /// All caps across all matrices, with their registry names, in
    /// priority then insertion order.
    #[must_use]
    pub fn all_caps(&self) -> Vec<(&str, &Cap)> {
        self.registries
            .iter()
            .flat_map(|(name, matrix)| {
                matrix.caps().into_iter().map(move |c| (name.as_str(), c))
            })
            .collect()
    }

    /// Derive the conversion graph from every cap in every matrix.
    ///
    /// The graph is a snapshot: rebuild it after mutating the cube.
    #[must_use]
    pub fn graph(&self) -> CapGraph {
        let mut graph = CapGraph::new();
        for (name, cap) in self.all_caps() {
            graph.add_cap(cap.clone(), name);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::tests::{cap, EchoProvider};

    fn matrix_with(urns: &[&str]) -> CapMatrix {
        let mut m = CapMatrix::new();
        for urn in urns {
            m.register(cap(urn), Arc::new(EchoProvider("echo")));
        }
        m
    }

    #[test]
    fn test_best_across_matrices_prefers_specificity() {
        let mut cube = CapCube::new();
        cube.add(
            "general",
            matrix_with(&[r#"cap:in=media:pdf;out="media:textable;txt""#]),
        );
        cube.add(
            "special",
            matrix_with(&[r#"cap:in=media:pdf;out="media:textable;txt";op=extract"#]),
        );
        let request =
            CapUrn::parse(r#"cap:in=media:pdf;out="media:textable;txt";op=extract"#).unwrap();
        let best = cube.best(&request).unwrap();
        assert_eq!(best.registry_name, "special");
    }

    #[test]
    fn test_specificity_tie_goes_to_earlier_matrix() {
        // S2: two caps with equal specificity in two registries; the
        // earlier registry wins.
        let urn = r#"cap:in=media:pdf;out="media:textable;txt""#;
        let mut cube = CapCube::new();
        cube.add("first", matrix_with(&[urn]));
        cube.add("second", matrix_with(&[urn]));
        let request = CapUrn::parse(urn).unwrap();
        let best = cube.best(&request).unwrap();
        assert_eq!(best.registry_name, "first");
    }

    #[test]
    fn test_can_returns_handle_or_not_found() {
        let mut cube = CapCube::new();
        cube.add(
            "only",
            matrix_with(&[r#"cap:in=media:pdf;out="media:textable;txt""#]),
        );
        let hit = CapUrn::parse(r#"cap:in=media:pdf;out="media:textable;txt""#).unwrap();
        let handle = cube.can(&hit).unwrap();
        assert_eq!(handle.registry_name, "only");
        assert_eq!(handle.provider_name(), "echo");

        let miss = CapUrn::parse("cap:in=media:docx;out=media:pdf").unwrap();
        assert!(matches!(
            cube.can(&miss).unwrap_err(),
            RouterError::NotFound { .. }
        ));
    }

    #[test]
    fn test_add_remove_names() {
        let mut cube = CapCube::new();
        cube.add("a", CapMatrix::new());
        cube.add("b", CapMatrix::new());
        assert_eq!(cube.names(), vec!["a", "b"]);
        assert!(cube.remove("a").is_some());
        assert_eq!(cube.names(), vec!["b"]);
        assert!(cube.remove("a").is_none());
        assert!(cube.get("b").is_some());
    }

    #[tokio::test]
    async fn test_handle_invoke() {
        let mut cube = CapCube::new();
        cube.add(
            "only",
            matrix_with(&[r#"cap:in=media:pdf;out="media:textable;txt""#]),
        );
        let request = CapUrn::parse(r#"cap:in=media:pdf;out="media:textable;txt""#).unwrap();
        let handle = cube.can(&request).unwrap();
        let out = handle.invoke(&request, serde_json::json!(null)).await.unwrap();
        assert_eq!(out, b"null");
    }
}
