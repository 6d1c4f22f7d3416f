use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cap::Cap;
use crate::error::{DefError, ValidationError};
use crate::standard::{identity_cap, IDENTITY_CAP_URN};
use crate::validate::{validate_cap, validate_no_inline_redefinition, RegistryProbe};

/// A provider's declaration of the caps it implements.
///
/// Every valid manifest carries the identity cap; [`Manifest::validate`]
/// enforces that and [`Manifest::ensure_identity`] repairs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub caps: Vec<Cap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
}

impl Manifest {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            caps: Vec::new(),
            author: None,
            page_url: None,
        }
    }

    /// Whether the mandatory identity cap is declared.
    #[must_use]
    pub fn has_identity(&self) -> bool {
        self.caps.iter().any(|c| c.urn_string() == IDENTITY_CAP_URN)
    }

    /// Add the identity cap if it is missing. Returns whether it was added.
    pub fn ensure_identity(&mut self) -> bool {
        if self.has_identity() {
            return false;
        }
        debug!(manifest = %self.name, "adding missing identity cap");
        self.caps.push(identity_cap());
        true
    }

    /// Look up a declared cap by its canonical URN string.
    #[must_use]
    pub fn cap(&self, urn: &str) -> Option<&Cap> {
        self.caps.iter().find(|c| c.urn_string() == urn)
    }

    /// Validate the manifest structure.
    ///
    /// Fails when the identity cap is missing, when a cap URN is declared
    /// twice, or when any cap definition is itself invalid. The optional
    /// registry probe feeds the inline-media-spec redefinition rule; pass
    /// `None` when offline.
    pub fn validate(&self, probe: Option<RegistryProbe<'_>>) -> Result<(), DefError> {
        if !self.has_identity() {
            return Err(DefError::MissingIdentityCap {
                name: self.name.clone(),
            });
        }
        let mut seen = BTreeSet::new();
        for cap in &self.caps {
            let urn = cap.urn_string();
            if !seen.insert(urn.clone()) {
                return Err(DefError::DuplicateCap {
                    name: self.name.clone(),
                    urn,
                });
            }
            validate_cap(cap).map_err(|e| DefError::InvalidCap {
                cap_urn: cap.urn_string(),
                issue: e.to_string(),
            })?;
            validate_no_inline_redefinition(cap, probe).map_err(|e| match e {
                ValidationError::InlineMediaSpecRedefinesRegistry { redefines } => {
                    DefError::InvalidCap {
                        cap_urn: cap.urn_string(),
                        issue: format!(
                            "inline media specs redefine registry URNs: {}",
                            redefines.join(", ")
                        ),
                    }
                }
                other => DefError::InvalidCap {
                    cap_urn: cap.urn_string(),
                    issue: other.to_string(),
                },
            })?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<serde_json::Value, DefError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, DefError> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::discard_cap;

    fn base_manifest() -> Manifest {
        Manifest::new("test-plugin", "1.2.0", "Plugin used by the manifest tests")
    }

    #[test]
    fn test_validate_requires_identity() {
        let manifest = base_manifest();
        let err = manifest.validate(None).unwrap_err();
        assert!(matches!(err, DefError::MissingIdentityCap { .. }));
    }

    #[test]
    fn test_ensure_identity_adds_exactly_once() {
        let mut manifest = base_manifest();
        assert!(manifest.ensure_identity());
        assert!(!manifest.ensure_identity());
        let identity_count = manifest
            .caps
            .iter()
            .filter(|c| c.urn_string() == IDENTITY_CAP_URN)
            .count();
        assert_eq!(identity_count, 1);
        assert!(manifest.validate(None).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_caps() {
        let mut manifest = base_manifest();
        manifest.ensure_identity();
        manifest.caps.push(discard_cap());
        manifest.caps.push(discard_cap());
        let err = manifest.validate(None).unwrap_err();
        assert!(matches!(err, DefError::DuplicateCap { .. }));
    }

    #[test]
    fn test_json_round_trip() {
        let mut manifest = base_manifest();
        manifest.ensure_identity();
        manifest.author = Some("capns developers".to_string());
        let json = manifest.to_json().unwrap();
        assert_eq!(json["name"], "test-plugin");
        let back = Manifest::from_json(json).unwrap();
        assert_eq!(back, manifest);
    }
}
