use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use capns_def::Cap;
use capns_urn::CapUrn;

use crate::error::RouterError;

/// An executable provider behind a registered cap.
///
/// The matrix routes to providers; how a provider actually runs the work
/// (in-process, subprocess plugin, remote) is its own business.
#[async_trait]
pub trait CapProvider: Send + Sync {
    /// Provider name, for diagnostics and error attribution.
    fn name(&self) -> &str;

    /// Invoke the cap with a JSON payload, returning raw output bytes.
    async fn invoke(
        &self,
        request: &CapUrn,
        payload: serde_json::Value,
    ) -> Result<Vec<u8>, RouterError>;
}

struct MatrixEntry {
    cap: Cap,
    provider: Arc<dyn CapProvider>,
}

/// A single-registry router: cap definitions with their providers, matched
/// by the `accepts` relation and ranked by specificity.
///
/// Insertion order is preserved and serves as the deterministic tie-break
/// between equally specific matches.
#[derive(Default)]
pub struct CapMatrix {
    entries: Vec<MatrixEntry>,
}

/// One match from a matrix query.
pub struct MatrixMatch<'a> {
    pub cap: &'a Cap,
    pub provider: &'a Arc<dyn CapProvider>,
    pub specificity: u32,
}

impl CapMatrix {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cap with its provider.
    pub fn register(&mut self, cap: Cap, provider: Arc<dyn CapProvider>) {
        debug!(cap = %cap.urn_string(), provider = provider.name(), "registering cap");
        self.entries.push(MatrixEntry { cap, provider });
    }

    /// Remove all entries whose cap URN equals `urn`. Returns how many were
    /// removed.
    pub fn unregister(&mut self, urn: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.cap.urn_string() != urn);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered cap definitions in insertion order.
    #[must_use]
    pub fn caps(&self) -> Vec<&Cap> {
        self.entries.iter().map(|e| &e.cap).collect()
    }

    /// All entries whose cap accepts the request, sorted by decreasing
    /// specificity. The sort is stable, so insertion order breaks ties.
    #[must_use]
    pub fn find_matches(&self, request: &CapUrn) -> Vec<MatrixMatch<'_>> {
        let mut matches: Vec<MatrixMatch<'_>> = self
            .entries
            .iter()
            .filter(|e| e.cap.accepts(request))
            .map(|e| MatrixMatch {
                cap: &e.cap,
                provider: &e.provider,
                specificity: e.cap.specificity(),
            })
            .collect();
        matches.sort_by(|a, b| b.specificity.cmp(&a.specificity));
        matches
    }

    /// The most specific match, if any.
    #[must_use]
    pub fn best(&self, request: &CapUrn) -> Option<MatrixMatch<'_>> {
        self.find_matches(request).into_iter().next()
    }

    /// Whether any registered cap accepts the request.
    #[must_use]
    pub fn accepts(&self, request: &CapUrn) -> bool {
        self.entries.iter().any(|e| e.cap.accepts(request))
    }
}
