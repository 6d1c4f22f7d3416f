use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use capns_urn::{CapUrn, MediaUrn};

use crate::error::DefError;
use crate::media_spec::{builtin_spec, MediaSpec, MediaSpecEntry};

/// Where an argument's value may come from when a cap is invoked as a
/// command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArgSource {
    /// Piped to the process on standard input with the given media type.
    Stdin { media_urn: MediaUrn },
    /// Passed as the positional argument at `position` (0-based).
    Position { position: usize },
    /// Passed behind a CLI flag, e.g. `--width`.
    CliFlag { flag: String },
}

/// Value constraints carried on an argument beyond its media type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgValidation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

/// One declared argument of a cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapArg {
    pub name: String,
    pub media_urn: MediaUrn,
    pub required: bool,
    /// Non-empty set of ways the value can be delivered.
    pub sources: Vec<ArgSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ArgValidation>,
}

impl CapArg {
    /// Positional index if one of the sources is positional.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        self.sources.iter().find_map(|s| match s {
            ArgSource::Position { position } => Some(*position),
            _ => None,
        })
    }

    /// CLI flag name if one of the sources is a flag.
    #[must_use]
    pub fn cli_flag(&self) -> Option<&str> {
        self.sources.iter().find_map(|s| match s {
            ArgSource::CliFlag { flag } => Some(flag.as_str()),
            _ => None,
        })
    }

    #[must_use]
    pub fn accepts_stdin(&self) -> bool {
        self.sources
            .iter()
            .any(|s| matches!(s, ArgSource::Stdin { .. }))
    }
}

/// A cap's declared output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapOutput {
    pub media_urn: MediaUrn,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Registration attribution: who registered a cap and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredBy {
    pub username: String,
    pub registered_at: DateTime<Utc>,
}

/// A formal cap definition.
///
/// The `media_specs` table extends, but may never redefine, the built-in
/// media-spec table; the XV5 validation rule enforces that against the
/// registry. Frozen after construction: build one with [`CapBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cap {
    pub cap_urn: CapUrn,
    pub title: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_specs: Vec<MediaSpecEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<CapArg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CapOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_by: Option<RegisteredBy>,
}

impl Cap {
    /// The cap URN as a canonical string.
    #[must_use]
    pub fn urn_string(&self) -> String {
        self.cap_urn.to_string()
    }

    /// Whether this cap, as a handler, accepts the request URN.
    #[must_use]
    pub fn accepts(&self, request: &CapUrn) -> bool {
        self.cap_urn.accepts(request)
    }

    #[must_use]
    pub fn specificity(&self) -> u32 {
        self.cap_urn.specificity()
    }

    #[must_use]
    pub fn is_more_specific_than(&self, other: &Self) -> bool {
        self.cap_urn.is_more_specific_than(&other.cap_urn)
    }

    /// Look up an argument by name.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&CapArg> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Arguments that carry a positional source, sorted by position.
    #[must_use]
    pub fn positional_args(&self) -> Vec<&CapArg> {
        let mut positional: Vec<&CapArg> =
            self.args.iter().filter(|a| a.position().is_some()).collect();
        positional.sort_by_key(|a| a.position());
        positional
    }

    /// Arguments that carry a CLI-flag source.
    #[must_use]
    pub fn flag_args(&self) -> Vec<&CapArg> {
        self.args.iter().filter(|a| a.cli_flag().is_some()).collect()
    }

    /// Required arguments in declaration order.
    #[must_use]
    pub fn required_args(&self) -> Vec<&CapArg> {
        self.args.iter().filter(|a| a.required).collect()
    }

    /// Resolve a media URN to its spec, consulting this cap's inline table
    /// first and falling back to the built-ins.
    #[must_use]
    pub fn resolve_media_spec(&self, urn: &MediaUrn) -> Option<&MediaSpec> {
        self.media_specs
            .iter()
            .find(|entry| entry.urn == *urn)
            .map(|entry| &entry.spec)
            .or_else(|| builtin_spec(&urn.to_string()))
    }

    /// Metadata value by key.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, DefError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, DefError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Builder producing an immutable [`Cap`].
#[derive(Debug, Clone)]
pub struct CapBuilder {
    cap_urn: CapUrn,
    title: String,
    command: String,
    description: Option<String>,
    metadata: BTreeMap<String, String>,
    media_specs: Vec<MediaSpecEntry>,
    args: Vec<CapArg>,
    output: Option<CapOutput>,
    metadata_json: Option<serde_json::Value>,
    registered_by: Option<RegisteredBy>,
}

impl CapBuilder {
    #[must_use]
    pub fn new(cap_urn: CapUrn, title: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            cap_urn,
            title: title.into(),
            command: command.into(),
            description: None,
            metadata: BTreeMap::new(),
            media_specs: Vec::new(),
            args: Vec::new(),
            output: None,
            metadata_json: None,
            registered_by: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add an inline media spec. Fails on a duplicate URN within this cap.
    pub fn media_spec(mut self, urn: MediaUrn, spec: MediaSpec) -> Result<Self, DefError> {
        if self.media_specs.iter().any(|e| e.urn == urn) {
            return Err(DefError::DuplicateMediaSpec {
                cap_urn: self.cap_urn.to_string(),
                urn: urn.to_string(),
            });
        }
        self.media_specs.push(MediaSpecEntry { urn, spec });
        Ok(self)
    }

    #[must_use]
    pub fn arg(mut self, arg: CapArg) -> Self {
        self.args.push(arg);
        self
    }

    #[must_use]
    pub fn output(mut self, media_urn: MediaUrn, description: Option<String>) -> Self {
        self.output = Some(CapOutput {
            media_urn,
            description,
        });
        self
    }

    #[must_use]
    pub fn metadata_json(mut self, value: serde_json::Value) -> Self {
        self.metadata_json = Some(value);
        self
    }

    #[must_use]
    pub fn registered_by(mut self, username: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.registered_by = Some(RegisteredBy {
            username: username.into(),
            registered_at: at,
        });
        self
    }

    pub fn build(self) -> Result<Cap, DefError> {
        let cap = Cap {
            cap_urn: self.cap_urn,
            title: self.title,
            command: self.command,
            description: self.description,
            metadata: self.metadata,
            media_specs: self.media_specs,
            args: self.args,
            output: self.output,
            metadata_json: self.metadata_json,
            registered_by: self.registered_by,
        };
        crate::validate::validate_cap(&cap).map_err(|e| DefError::InvalidCap {
            cap_urn: cap.urn_string(),
            issue: e.to_string(),
        })?;
        Ok(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thumbnail_cap() -> Cap {
        let urn = CapUrn::parse(r#"cap:in="media:pdf";out="media:image;png";op=thumbnail"#).unwrap();
        CapBuilder::new(urn, "PDF thumbnail", "pdf-thumbnail")
            .description("Render the first page of a PDF as a PNG thumbnail")
            .arg(CapArg {
                name: "input".to_string(),
                media_urn: MediaUrn::parse("media:pdf").unwrap(),
                required: true,
                sources: vec![ArgSource::Stdin {
                    media_urn: MediaUrn::parse("media:pdf").unwrap(),
                }],
                description: None,
                default: None,
                validation: None,
            })
            .arg(CapArg {
                name: "width".to_string(),
                media_urn: MediaUrn::parse("media:integer;numeric;textable").unwrap(),
                required: false,
                sources: vec![ArgSource::CliFlag {
                    flag: "--width".to_string(),
                }],
                description: Some("Thumbnail width in pixels".to_string()),
                default: Some(serde_json::json!(256)),
                validation: Some(ArgValidation {
                    min: Some(16.0),
                    max: Some(4096.0),
                    ..ArgValidation::default()
                }),
            })
            .output(MediaUrn::parse("media:image;png").unwrap(), None)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_produces_frozen_cap() {
        let cap = thumbnail_cap();
        assert_eq!(cap.title, "PDF thumbnail");
        assert_eq!(cap.args.len(), 2);
        assert_eq!(cap.specificity(), 9);
    }

    #[test]
    fn test_arg_accessors() {
        let cap = thumbnail_cap();
        assert!(cap.arg("input").unwrap().accepts_stdin());
        assert_eq!(cap.arg("width").unwrap().cli_flag(), Some("--width"));
        assert_eq!(cap.required_args().len(), 1);
        assert!(cap.positional_args().is_empty());
        assert_eq!(cap.flag_args().len(), 1);
    }

    #[test]
    fn test_accepts_request() {
        let cap = thumbnail_cap();
        let request =
            CapUrn::parse(r#"cap:in="media:pdf";out="media:image;png";op=thumbnail;target=x"#)
                .unwrap();
        assert!(cap.accepts(&request));
    }

    #[test]
    fn test_resolve_media_spec_prefers_inline() {
        let urn = CapUrn::parse("cap:in=media:pdf;out=media:custom-report").unwrap();
        let custom = MediaUrn::parse("media:custom-report").unwrap();
        let cap = CapBuilder::new(urn, "Report", "report")
            .media_spec(custom.clone(), MediaSpec::new("application/json"))
            .unwrap()
            .arg(CapArg {
                name: "input".to_string(),
                media_urn: MediaUrn::parse("media:pdf").unwrap(),
                required: true,
                sources: vec![ArgSource::Position { position: 0 }],
                description: None,
                default: None,
                validation: None,
            })
            .build()
            .unwrap();
        assert_eq!(
            cap.resolve_media_spec(&custom).unwrap().content_type,
            "application/json"
        );
        // Built-ins still resolve.
        assert!(cap
            .resolve_media_spec(&MediaUrn::parse("media:pdf").unwrap())
            .is_some());
    }

    #[test]
    fn test_duplicate_inline_media_spec_rejected() {
        let urn = CapUrn::parse("cap:in=media:pdf;out=media:x").unwrap();
        let custom = MediaUrn::parse("media:x").unwrap();
        let err = CapBuilder::new(urn, "X", "x")
            .media_spec(custom.clone(), MediaSpec::new("application/json"))
            .unwrap()
            .media_spec(custom, MediaSpec::new("text/plain"))
            .unwrap_err();
        assert!(matches!(err, DefError::DuplicateMediaSpec { .. }));
    }

    #[test]
    fn test_json_round_trip() {
        let cap = thumbnail_cap();
        let json = cap.to_json().unwrap();
        assert_eq!(json["cap_urn"], cap.urn_string());
        assert_eq!(json["args"][0]["sources"][0]["type"], "stdin");
        assert_eq!(json["args"][1]["sources"][0]["type"], "cli_flag");
        let back = Cap::from_json(json).unwrap();
        assert_eq!(back, cap);
    }

    #[test]
    fn test_unknown_json_keys_ignored() {
        let mut json = thumbnail_cap().to_json().unwrap();
        json["future_field"] = serde_json::json!({"x": 1});
        assert!(Cap::from_json(json).is_ok());
    }
}
