use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use capns_urn::MediaUrn;

use crate::cap::Cap;
use crate::error::ValidationError;
use crate::media_spec::{builtin_spec, MediaSpec};

/// Registry-existence predicate for the inline-redefinition rule.
///
/// Returns `Some(true)` when the media URN is known to the registry,
/// `Some(false)` when it is known to be absent, and `None` when the lookup
/// could not be performed (offline), which makes the rule pass for that
/// URN so offline operation keeps working.
pub type RegistryProbe<'a> = &'a dyn Fn(&str) -> Option<bool>;

/// Resolves external schema references found in media specs.
pub trait SchemaResolver {
    /// Resolve a schema reference to a JSON Schema document, or `None` if
    /// the reference is unknown.
    fn resolve_schema(&self, reference: &str) -> Result<Option<serde_json::Value>, ValidationError>;
}

/// Loads `<base>/<reference>.json` from disk.
pub struct FileSchemaResolver {
    base_path: PathBuf,
}

impl FileSchemaResolver {
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

impl SchemaResolver for FileSchemaResolver {
    fn resolve_schema(&self, reference: &str) -> Result<Option<serde_json::Value>, ValidationError> {
        // Schema references are bare names; reject anything path-like.
        if reference.contains('/') || reference.contains('\\') || reference.contains("..") {
            return Ok(None);
        }
        let path = self.base_path.join(format!("{reference}.json"));
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!(reference, error = %e, "schema reference read failed");
                return Ok(None);
            }
        };
        let schema = serde_json::from_str(&raw).map_err(|e| ValidationError::JsonParse {
            cap_urn: String::new(),
            reason: format!("schema {reference}: {e}"),
        })?;
        Ok(Some(schema))
    }
}

/// Validate a cap definition itself: argument names unique, every argument
/// has at least one source, positional indices dense from zero.
///
/// Unresolvable media URNs are logged rather than rejected: custom URNs
/// may resolve later through the registry.
pub fn validate_cap(cap: &Cap) -> Result<(), ValidationError> {
    let cap_urn = cap.urn_string();

    let mut names = std::collections::BTreeSet::new();
    for arg in &cap.args {
        if !names.insert(arg.name.as_str()) {
            return Err(ValidationError::UnknownArg {
                cap_urn,
                arg: format!("duplicate argument name {}", arg.name),
            });
        }
        if arg.sources.is_empty() {
            return Err(ValidationError::MissingRequired {
                cap_urn,
                arg: format!("{} has no sources", arg.name),
            });
        }
    }

    let mut positions: Vec<usize> = cap.args.iter().filter_map(|a| a.position()).collect();
    positions.sort_unstable();
    for (expected, actual) in positions.iter().enumerate() {
        if *actual != expected {
            return Err(ValidationError::UnknownArg {
                cap_urn,
                arg: format!("positional indices must be dense from 0, found {actual}"),
            });
        }
    }

    for arg in &cap.args {
        if cap.resolve_media_spec(&arg.media_urn).is_none() {
            debug!(cap = %cap_urn, arg = %arg.name, urn = %arg.media_urn,
                   "argument media URN has no local or built-in spec");
        }
    }
    if let Some(output) = &cap.output {
        if cap.resolve_media_spec(&output.media_urn).is_none() {
            debug!(cap = %cap_urn, urn = %output.media_urn,
                   "output media URN has no local or built-in spec");
        }
    }
    Ok(())
}

/// The XV5 rule: a cap's inline media specs must not redefine a URN the
/// registry already defines (built-in or canonical).
pub fn validate_no_inline_redefinition(
    cap: &Cap,
    probe: Option<RegistryProbe<'_>>,
) -> Result<(), ValidationError> {
    let mut redefines = Vec::new();
    for entry in &cap.media_specs {
        let urn = entry.urn.to_string();
        if builtin_spec(&urn).is_some() {
            redefines.push(urn);
            continue;
        }
        if let Some(probe) = probe {
            // None means the lookup could not be performed; the rule passes
            // for that URN to preserve offline operation.
            if probe(&urn) == Some(true) {
                redefines.push(urn);
            }
        }
    }
    if redefines.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::InlineMediaSpecRedefinesRegistry { redefines })
    }
}

/// Validate positional and named argument values against a cap definition.
///
/// Runs the structural layer (JSON shape vs media-URN class) and then the
/// schema layer (Draft-7) for every value that resolves to a spec with a
/// schema.
pub fn validate_args(
    cap: &Cap,
    positional: &[serde_json::Value],
    named: &BTreeMap<String, serde_json::Value>,
) -> Result<(), ValidationError> {
    validate_args_with_resolver(cap, positional, named, None)
}

/// [`validate_args`] with an external schema resolver for string-valued
/// schema references.
pub fn validate_args_with_resolver(
    cap: &Cap,
    positional: &[serde_json::Value],
    named: &BTreeMap<String, serde_json::Value>,
    resolver: Option<&dyn SchemaResolver>,
) -> Result<(), ValidationError> {
    let cap_urn = cap.urn_string();
    let positional_args = cap.positional_args();
    if positional.len() > positional_args.len() {
        return Err(ValidationError::TooManyArgs {
            cap_urn,
            max: positional_args.len(),
            actual: positional.len(),
        });
    }

    let mut provided: BTreeMap<&str, &serde_json::Value> = BTreeMap::new();
    for (arg, value) in positional_args.iter().zip(positional.iter()) {
        provided.insert(arg.name.as_str(), value);
    }
    for (name, value) in named {
        let Some(arg) = cap.arg(name) else {
            return Err(ValidationError::UnknownArg {
                cap_urn,
                arg: name.clone(),
            });
        };
        provided.insert(arg.name.as_str(), value);
    }

    for arg in &cap.args {
        match provided.get(arg.name.as_str()) {
            Some(value) => {
                check_shape(&cap_urn, &arg.name, &arg.media_urn, value)?;
                check_schema(cap, &arg.name, &arg.media_urn, value, resolver)?;
            }
            None => {
                if arg.required && arg.default.is_none() {
                    return Err(ValidationError::MissingRequired {
                        cap_urn,
                        arg: arg.name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Validate a cap's raw output bytes against its declared output media URN.
pub fn validate_output(cap: &Cap, output: &[u8]) -> Result<(), ValidationError> {
    let cap_urn = cap.urn_string();
    let Some(declared) = &cap.output else {
        return Ok(());
    };
    let media = &declared.media_urn;

    if media.is_text() && std::str::from_utf8(output).is_err() {
        return Err(ValidationError::WrongType {
            cap_urn,
            arg: "output".to_string(),
            expected: "UTF-8 text".to_string(),
            actual: "non-UTF-8 bytes".to_string(),
            value: serde_json::Value::Null,
        });
    }

    if media.is_json() || media.is_record() || media.is_list() {
        let value: serde_json::Value =
            serde_json::from_slice(output).map_err(|e| ValidationError::JsonParse {
                cap_urn: cap.urn_string(),
                reason: e.to_string(),
            })?;
        check_shape(&cap.urn_string(), "output", media, &value)?;
        check_schema(cap, "output", media, &value, None)?;
    }
    Ok(())
}

/// Structural layer: the runtime JSON shape must match the media URN class.
fn check_shape(
    cap_urn: &str,
    arg: &str,
    media: &MediaUrn,
    value: &serde_json::Value,
) -> Result<(), ValidationError> {
    use serde_json::Value;

    let mismatch = |expected: &str| ValidationError::WrongType {
        cap_urn: cap_urn.to_string(),
        arg: arg.to_string(),
        expected: expected.to_string(),
        actual: json_type_name(value).to_string(),
        value: value.clone(),
    };

    if media.is_list() {
        if !value.is_array() {
            return Err(mismatch("array"));
        }
        if media.is_record() {
            if let Some(bad) = value
                .as_array()
                .expect("checked is_array")
                .iter()
                .find(|item| !item.is_object())
            {
                return Err(ValidationError::WrongType {
                    cap_urn: cap_urn.to_string(),
                    arg: arg.to_string(),
                    expected: "array of objects".to_string(),
                    actual: format!("array containing {}", json_type_name(bad)),
                    value: value.clone(),
                });
            }
        }
        return Ok(());
    }
    if media.is_record() {
        if !value.is_object() {
            return Err(mismatch("object"));
        }
        return Ok(());
    }
    if media.is_numeric() {
        if !value.is_number() {
            return Err(mismatch("number"));
        }
        return Ok(());
    }
    if media.is_bool() {
        if !value.is_boolean() {
            return Err(mismatch("boolean"));
        }
        return Ok(());
    }
    match value {
        Value::Object(_) | Value::Array(_) if media.is_opaque() && !media.is_json() => {
            Err(mismatch("scalar"))
        }
        _ => Ok(()),
    }
}

/// Schema layer: Draft-7 validation when the resolved spec carries one.
fn check_schema(
    cap: &Cap,
    arg: &str,
    media: &MediaUrn,
    value: &serde_json::Value,
    resolver: Option<&dyn SchemaResolver>,
) -> Result<(), ValidationError> {
    let Some(spec) = cap.resolve_media_spec(media) else {
        return Ok(());
    };
    let schema = match resolve_schema_value(spec, resolver)? {
        Some(schema) => schema,
        None => return Ok(()),
    };

    let validator = jsonschema::options()
        .with_draft(jsonschema::Draft::Draft7)
        .build(&schema)
        .map_err(|e| ValidationError::SchemaCompilation {
            cap_urn: cap.urn_string(),
            context: arg.to_string(),
            reason: e.to_string(),
        })?;

    let messages: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::FailedSchema {
            cap_urn: cap.urn_string(),
            context: arg.to_string(),
            messages,
            value: value.clone(),
        })
    }
}

fn resolve_schema_value(
    spec: &MediaSpec,
    resolver: Option<&dyn SchemaResolver>,
) -> Result<Option<serde_json::Value>, ValidationError> {
    match &spec.schema {
        None => Ok(None),
        Some(serde_json::Value::String(reference)) => match resolver {
            Some(resolver) => resolver.resolve_schema(reference),
            None => Ok(None),
        },
        Some(inline) => Ok(Some(inline.clone())),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::{ArgSource, CapArg, CapBuilder};
    use capns_urn::CapUrn;
    use serde_json::json;

    fn outline_cap() -> Cap {
        let urn = CapUrn::parse(
            r#"cap:in="media:pdf";out="media:document-outline;json;record;textable";op=outline"#,
        )
        .unwrap();
        CapBuilder::new(urn, "Extract outline", "pdf-outline")
            .arg(CapArg {
                name: "input".to_string(),
                media_urn: MediaUrn::parse("media:pdf").unwrap(),
                required: true,
                sources: vec![ArgSource::Position { position: 0 }],
                description: None,
                default: None,
                validation: None,
            })
            .arg(CapArg {
                name: "depth".to_string(),
                media_urn: MediaUrn::parse("media:integer;numeric;textable").unwrap(),
                required: false,
                sources: vec![ArgSource::CliFlag {
                    flag: "--depth".to_string(),
                }],
                description: None,
                default: Some(json!(3)),
                validation: None,
            })
            .output(
                MediaUrn::parse("media:document-outline;json;record;textable").unwrap(),
                None,
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_required() {
        let cap = outline_cap();
        let err = validate_args(&cap, &[], &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingRequired { arg, .. } if arg == "input"));
    }

    #[test]
    fn test_unknown_arg() {
        let cap = outline_cap();
        let mut named = BTreeMap::new();
        named.insert("bogus".to_string(), json!(1));
        let err = validate_args(&cap, &[json!("file.pdf")], &named).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownArg { arg, .. } if arg == "bogus"));
    }

    #[test]
    fn test_too_many_positional() {
        let cap = outline_cap();
        let err = validate_args(&cap, &[json!("a"), json!("b")], &BTreeMap::new()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::TooManyArgs { max: 1, actual: 2, .. }
        ));
    }

    #[test]
    fn test_wrong_type_for_numeric() {
        let cap = outline_cap();
        let mut named = BTreeMap::new();
        named.insert("depth".to_string(), json!("three"));
        let err = validate_args(&cap, &[json!("file.pdf")], &named).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::WrongType { expected, .. } if expected == "number"
        ));
    }

    #[test]
    fn test_valid_args_pass() {
        let cap = outline_cap();
        let mut named = BTreeMap::new();
        named.insert("depth".to_string(), json!(2));
        assert!(validate_args(&cap, &[json!("file.pdf")], &named).is_ok());
    }

    #[test]
    fn test_output_schema_enforced() {
        let cap = outline_cap();
        // The built-in document-outline spec requires an `entries` array.
        let bad = br#"{"wrong": true}"#;
        let err = validate_output(&cap, bad).unwrap_err();
        assert!(matches!(err, ValidationError::FailedSchema { .. }));

        let good = br#"{"entries": [{"title": "Intro", "level": 0}]}"#;
        assert!(validate_output(&cap, good).is_ok());
    }

    #[test]
    fn test_output_must_be_json_when_declared_record() {
        let cap = outline_cap();
        let err = validate_output(&cap, b"not json").unwrap_err();
        assert!(matches!(err, ValidationError::JsonParse { .. }));
    }

    #[test]
    fn test_xv5_rejects_builtin_redefinition() {
        let urn = CapUrn::parse("cap:in=media:pdf;out=media:x").unwrap();
        let cap = CapBuilder::new(urn, "X", "x")
            .media_spec(
                MediaUrn::parse("media:pdf").unwrap(),
                MediaSpec::new("application/x-fake"),
            )
            .unwrap()
            .build()
            .unwrap();
        let err = validate_no_inline_redefinition(&cap, None).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InlineMediaSpecRedefinesRegistry { redefines }
                if redefines == vec!["media:pdf".to_string()]
        ));
    }

    #[test]
    fn test_xv5_probe_collision_and_offline() {
        let urn = CapUrn::parse("cap:in=media:pdf;out=media:custom-x").unwrap();
        let cap = CapBuilder::new(urn, "X", "x")
            .media_spec(
                MediaUrn::parse("media:custom-x").unwrap(),
                MediaSpec::new("application/json"),
            )
            .unwrap()
            .build()
            .unwrap();

        // Registry knows the URN: redefinition fails.
        let knows = |_: &str| Some(true);
        assert!(validate_no_inline_redefinition(&cap, Some(&knows)).is_err());

        // Registry lookup unavailable: rule passes (offline operation).
        let offline = |_: &str| None;
        assert!(validate_no_inline_redefinition(&cap, Some(&offline)).is_ok());

        // Registry resolved and does not know the URN: passes.
        let absent = |_: &str| Some(false);
        assert!(validate_no_inline_redefinition(&cap, Some(&absent)).is_ok());
    }

    #[test]
    fn test_validate_cap_rejects_sparse_positions() {
        let urn = CapUrn::parse("cap:in=media:pdf;out=media:textable;txt").unwrap();
        let cap = Cap {
            cap_urn: urn,
            title: "Broken".to_string(),
            command: "broken".to_string(),
            description: None,
            metadata: BTreeMap::new(),
            media_specs: Vec::new(),
            args: vec![CapArg {
                name: "a".to_string(),
                media_urn: MediaUrn::parse("media:pdf").unwrap(),
                required: true,
                sources: vec![ArgSource::Position { position: 1 }],
                description: None,
                default: None,
                validation: None,
            }],
            output: None,
            metadata_json: None,
            registered_by: None,
        };
        assert!(validate_cap(&cap).is_err());
    }

    #[test]
    fn test_file_schema_resolver() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("thing.json"),
            r#"{"type": "object", "required": ["id"]}"#,
        )
        .unwrap();
        let resolver = FileSchemaResolver::new(dir.path());
        let schema = resolver.resolve_schema("thing").unwrap().unwrap();
        assert_eq!(schema["required"][0], "id");
        assert!(resolver.resolve_schema("missing").unwrap().is_none());
        assert!(resolver.resolve_schema("../escape").unwrap().is_none());
    }
}
