use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, warn};

use capns_def::Cap;

use crate::error::RegistryError;

/// Default registry endpoint when `CAPNS_REGISTRY_URL` is unset.
pub const DEFAULT_REGISTRY_URL: &str = "https://capns.org";

/// Resolve the registry base URL from the environment.
#[must_use]
pub fn registry_url() -> String {
    match std::env::var("CAPNS_REGISTRY_URL") {
        Ok(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
        _ => DEFAULT_REGISTRY_URL.to_string(),
    }
}

/// Client for canonical cap definitions.
///
/// The cache is in-memory and lives for the process; there is no on-disk
/// persistence here. A cached cap is always served without a network
/// round trip.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    cache: RwLock<HashMap<String, Cap>>,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(registry_url())
    }

    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a cap, serving from cache when possible.
    pub async fn get_cap(&self, urn: &str) -> Result<Cap, RegistryError> {
        if let Some(cap) = self.cached(urn) {
            debug!(%urn, "registry cache hit");
            return Ok(cap);
        }

        let url = format!("{}/caps", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("urn", urn)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound {
                urn: urn.to_string(),
            });
        }
        let response = response.error_for_status()?;
        let value: serde_json::Value = response.json().await?;
        let cap = Cap::from_json(value).map_err(|e| RegistryError::Decode {
            urn: urn.to_string(),
            reason: e.to_string(),
        })?;

        self.cache
            .write()
            .expect("registry cache lock poisoned")
            .insert(urn.to_string(), cap.clone());
        Ok(cap)
    }

    /// Fetch several caps; fails if any one is unavailable.
    pub async fn get_caps(&self, urns: &[String]) -> Result<Vec<Cap>, RegistryError> {
        let mut caps = Vec::with_capacity(urns.len());
        for urn in urns {
            caps.push(self.get_cap(urn).await?);
        }
        Ok(caps)
    }

    /// Validate a local cap against its canonical registry definition.
    pub async fn validate_cap(&self, cap: &Cap) -> Result<(), RegistryError> {
        let urn = cap.urn_string();
        let canonical = self.get_cap(&urn).await?;

        if canonical.args.len() != cap.args.len() {
            return Err(RegistryError::CanonicalMismatch {
                urn,
                issue: format!(
                    "argument count differs (canonical {}, local {})",
                    canonical.args.len(),
                    cap.args.len()
                ),
            });
        }
        for (canonical_arg, local_arg) in canonical.args.iter().zip(&cap.args) {
            if canonical_arg.name != local_arg.name {
                return Err(RegistryError::CanonicalMismatch {
                    urn,
                    issue: format!(
                        "argument {} differs from canonical {}",
                        local_arg.name, canonical_arg.name
                    ),
                });
            }
            if canonical_arg.media_urn != local_arg.media_urn {
                return Err(RegistryError::CanonicalMismatch {
                    urn,
                    issue: format!("argument {} media URN differs", local_arg.name),
                });
            }
        }
        let canonical_output = canonical.output.as_ref().map(|o| &o.media_urn);
        let local_output = cap.output.as_ref().map(|o| &o.media_urn);
        if canonical_output != local_output {
            return Err(RegistryError::CanonicalMismatch {
                urn,
                issue: "output media URN differs".to_string(),
            });
        }
        Ok(())
    }

    /// Cache-only lookup; never touches the network.
    fn cached(&self, urn: &str) -> Option<Cap> {
        self.cache
            .read()
            .expect("registry cache lock poisoned")
            .get(urn)
            .cloned()
    }

    /// Cache-only existence check; never touches the network.
    #[must_use]
    pub fn cap_exists(&self, urn: &str) -> bool {
        self.cache
            .read()
            .expect("registry cache lock poisoned")
            .contains_key(urn)
    }

    /// All currently cached caps.
    #[must_use]
    pub fn cached_caps(&self) -> Vec<Cap> {
        self.cache
            .read()
            .expect("registry cache lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .expect("registry cache lock poisoned")
            .clear();
    }

    /// Seed the cache directly, e.g. from bundled definitions when
    /// operating offline.
    pub fn prime_cache(&self, cap: Cap) {
        if self.cap_exists(&cap.urn_string()) {
            warn!(urn = %cap.urn_string(), "priming over an existing cache entry");
        }
        self.cache
            .write()
            .expect("registry cache lock poisoned")
            .insert(cap.urn_string(), cap);
    }

    /// An existence probe for the inline-media-spec redefinition rule:
    /// `Some(true)` for cached URNs, `None` (lookup unavailable) for
    /// everything else, so the rule degrades gracefully offline.
    #[must_use]
    pub fn existence_probe(&self) -> impl Fn(&str) -> Option<bool> + '_ {
        move |urn: &str| {
            if self.cap_exists(urn) {
                Some(true)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capns_def::identity_cap;

    fn offline_client() -> RegistryClient {
        // A base URL nothing listens on; cache-only paths never touch it.
        RegistryClient::with_base_url("http://127.0.0.1:9")
    }

    #[test]
    fn test_cache_roundtrip() {
        let client = offline_client();
        let identity = identity_cap();
        let urn = identity.urn_string();

        assert!(!client.cap_exists(&urn));
        client.prime_cache(identity.clone());
        assert!(client.cap_exists(&urn));
        assert_eq!(client.cached_caps().len(), 1);

        client.clear_cache();
        assert!(!client.cap_exists(&urn));
        assert!(client.cached_caps().is_empty());
    }

    #[tokio::test]
    async fn test_get_cap_serves_from_cache() {
        let client = offline_client();
        let identity = identity_cap();
        client.prime_cache(identity.clone());
        // No server is running; a cache miss would error.
        let fetched = client.get_cap(&identity.urn_string()).await.unwrap();
        assert_eq!(fetched, identity);
    }

    #[tokio::test]
    async fn test_get_caps_all_or_error() {
        let client = offline_client();
        let identity = identity_cap();
        client.prime_cache(identity.clone());
        let ok = client.get_caps(&[identity.urn_string()]).await.unwrap();
        assert_eq!(ok.len(), 1);

        let err = client
            .get_caps(&[identity.urn_string(), "cap:in=media:;out=media:void".to_string()])
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_validate_cap_against_cached_canonical() {
        let client = offline_client();
        let identity = identity_cap();
        client.prime_cache(identity.clone());
        assert!(client.validate_cap(&identity).await.is_ok());

        // A local variant with a different output fails.
        let mut altered = identity.clone();
        altered.output = None;
        let err = client.validate_cap(&altered).await.unwrap_err();
        assert!(matches!(err, RegistryError::CanonicalMismatch { .. }));
    }

    #[test]
    fn test_existence_probe() {
        let client = offline_client();
        let identity = identity_cap();
        let urn = identity.urn_string();
        client.prime_cache(identity);

        let probe = client.existence_probe();
        assert_eq!(probe(&urn), Some(true));
        assert_eq!(probe("media:unknown"), None);
    }

    #[test]
    fn test_registry_url_default() {
        if std::env::var("CAPNS_REGISTRY_URL").is_err() {
            assert_eq!(registry_url(), DEFAULT_REGISTRY_URL);
        }
    }
}
