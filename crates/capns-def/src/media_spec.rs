use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::DefError;

/// Default base for profile and schema URLs when no environment override
/// is present.
pub const DEFAULT_SCHEMA_BASE_URL: &str = "https://capns.org/schema";

/// Resolve the base URL under which media-spec profiles and schemas live.
///
/// Precedence: `CAPNS_SCHEMA_BASE_URL`, then `CAPNS_REGISTRY_URL` with
/// `/schema` appended, then the capns.org default.
#[must_use]
pub fn schema_base_url() -> String {
    if let Ok(base) = std::env::var("CAPNS_SCHEMA_BASE_URL") {
        if !base.is_empty() {
            return base.trim_end_matches('/').to_string();
        }
    }
    if let Ok(registry) = std::env::var("CAPNS_REGISTRY_URL") {
        if !registry.is_empty() {
            return format!("{}/schema", registry.trim_end_matches('/'));
        }
    }
    DEFAULT_SCHEMA_BASE_URL.to_string()
}

/// The resolved descriptor for a media URN.
///
/// A spec names the wire representation (`content_type`), an optional
/// profile URL pinning the exact dialect, an optional JSON Schema for
/// record-shaped payloads, and the file extensions the input resolver maps
/// to this URN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSpec {
    /// MIME content type, e.g. `application/json` or `image/png`.
    pub content_type: String,
    /// Optional profile URL identifying the dialect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Optional JSON Schema (Draft-7) for the decoded payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form validation hints carried through to validators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// File extensions (lowercase, no dot) conventionally carrying this type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

impl MediaSpec {
    /// Minimal spec with just a content type.
    #[must_use]
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            profile: None,
            schema: None,
            title: None,
            description: None,
            validation: None,
            metadata: None,
            extensions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Parse the canonical string form:
    /// `content-type: <mime>; profile=<url>`.
    ///
    /// The `content-type:` label is optional; the profile value may be
    /// double-quoted.
    pub fn parse(input: &str) -> Result<Self, DefError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DefError::MissingContentType);
        }
        let rest = trimmed
            .strip_prefix("content-type:")
            .map(str::trim_start)
            .unwrap_or(trimmed);

        let mut parts = rest.splitn(2, ';');
        let content_type = parts.next().unwrap_or("").trim();
        if content_type.is_empty() {
            return Err(DefError::EmptyContentType);
        }

        let mut spec = Self::new(content_type);
        if let Some(params) = parts.next() {
            for param in params.split(';') {
                let param = param.trim();
                if param.is_empty() {
                    continue;
                }
                let Some((key, value)) = param.split_once('=') else {
                    continue;
                };
                if key.trim() != "profile" {
                    continue;
                }
                let value = value.trim();
                let value = if let Some(stripped) = value.strip_prefix('"') {
                    stripped
                        .strip_suffix('"')
                        .ok_or(DefError::UnterminatedQuote)?
                } else {
                    value
                };
                spec.profile = Some(value.to_string());
            }
        }
        Ok(spec)
    }

    /// Primary MIME type, e.g. `image` from `image/png`.
    #[must_use]
    pub fn primary_type(&self) -> &str {
        self.content_type
            .split('/')
            .next()
            .unwrap_or(&self.content_type)
    }

    /// MIME subtype, e.g. `png` from `image/png`.
    #[must_use]
    pub fn subtype(&self) -> Option<&str> {
        self.content_type.split('/').nth(1)
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        self.content_type == "application/json" || self.content_type.ends_with("+json")
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        self.primary_type() == "text" || self.is_json()
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        !self.is_text()
    }
}

impl fmt::Display for MediaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.profile {
            Some(profile) => write!(f, "{}; profile=\"{}\"", self.content_type, profile),
            None => write!(f, "{}", self.content_type),
        }
    }
}

/// A media spec paired with the URN it describes: the element shape of a
/// cap's inline `media_specs` table on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSpecEntry {
    pub urn: capns_urn::MediaUrn,
    #[serde(flatten)]
    pub spec: MediaSpec,
}

fn profiled(content_type: &str, slug: &str) -> MediaSpec {
    MediaSpec::new(content_type).with_profile(format!("{}/{slug}", schema_base_url()))
}

/// The compile-time table of built-in media specs, keyed by canonical
/// media-URN string.
///
/// Covers the primitive value types (and their list forms), raw binary and
/// void, the common document / image / audio / video / text formats, and
/// the semantic output types produced by the standard caps.
#[must_use]
pub fn builtin_media_specs() -> &'static BTreeMap<&'static str, MediaSpec> {
    static TABLE: Lazy<BTreeMap<&'static str, MediaSpec>> = Lazy::new(|| {
        let mut t = BTreeMap::new();

        // Primitive value types.
        t.insert("media:string;textable", profiled("text/plain", "utf8-text"));
        t.insert(
            "media:integer;numeric;textable",
            profiled("text/plain", "integer"),
        );
        t.insert(
            "media:number;numeric;textable",
            profiled("text/plain", "number"),
        );
        t.insert("media:bool;textable", profiled("text/plain", "boolean"));
        t.insert(
            "media:json;object;record;textable",
            profiled("application/json", "json-object"),
        );

        // List forms of the primitives.
        t.insert(
            "media:list;string;textable",
            profiled("application/json", "string-list"),
        );
        t.insert(
            "media:integer;list;numeric;textable",
            profiled("application/json", "integer-list"),
        );
        t.insert(
            "media:list;number;numeric;textable",
            profiled("application/json", "number-list"),
        );
        t.insert(
            "media:bool;list;textable",
            profiled("application/json", "boolean-list"),
        );
        t.insert(
            "media:json;list;object;record;textable",
            profiled("application/json", "json-object-list"),
        );

        // Ground types.
        t.insert("media:void", MediaSpec::new("application/x-empty"));
        t.insert(
            "media:binary",
            MediaSpec::new("application/octet-stream").with_extensions(["bin"]),
        );
        t.insert(
            "media:file-path;textable",
            profiled("text/plain", "file-path"),
        );

        // Documents.
        t.insert(
            "media:pdf",
            MediaSpec::new("application/pdf").with_extensions(["pdf"]),
        );
        t.insert(
            "media:epub",
            MediaSpec::new("application/epub+zip").with_extensions(["epub"]),
        );
        t.insert(
            "media:docx",
            MediaSpec::new(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            )
            .with_extensions(["docx"]),
        );

        // Images.
        t.insert(
            "media:image;png",
            MediaSpec::new("image/png").with_extensions(["png"]),
        );
        t.insert(
            "media:image;jpeg",
            MediaSpec::new("image/jpeg").with_extensions(["jpg", "jpeg"]),
        );
        t.insert(
            "media:gif;image",
            MediaSpec::new("image/gif").with_extensions(["gif"]),
        );
        t.insert(
            "media:image;webp",
            MediaSpec::new("image/webp").with_extensions(["webp"]),
        );
        t.insert(
            "media:image;svg;textable",
            MediaSpec::new("image/svg+xml").with_extensions(["svg"]),
        );
        t.insert(
            "media:image;tiff",
            MediaSpec::new("image/tiff").with_extensions(["tif", "tiff"]),
        );

        // Audio.
        t.insert(
            "media:audio;wav",
            MediaSpec::new("audio/wav").with_extensions(["wav"]),
        );
        t.insert(
            "media:audio;mp3",
            MediaSpec::new("audio/mpeg").with_extensions(["mp3"]),
        );
        t.insert(
            "media:audio;flac",
            MediaSpec::new("audio/flac").with_extensions(["flac"]),
        );

        // Video.
        t.insert(
            "media:mp4;video",
            MediaSpec::new("video/mp4").with_extensions(["mp4", "m4v"]),
        );
        t.insert(
            "media:video;webm",
            MediaSpec::new("video/webm").with_extensions(["webm"]),
        );
        t.insert(
            "media:mkv;video",
            MediaSpec::new("video/x-matroska").with_extensions(["mkv"]),
        );

        // Text formats.
        t.insert(
            "media:textable;txt",
            MediaSpec::new("text/plain").with_extensions(["txt", "text"]),
        );
        t.insert(
            "media:markdown;textable",
            MediaSpec::new("text/markdown").with_extensions(["md", "markdown"]),
        );
        t.insert(
            "media:html;textable",
            MediaSpec::new("text/html").with_extensions(["html", "htm"]),
        );
        t.insert(
            "media:csv;list;record;textable",
            MediaSpec::new("text/csv").with_extensions(["csv"]),
        );
        t.insert(
            "media:json;record;textable",
            MediaSpec::new("application/json").with_extensions(["json"]),
        );
        t.insert(
            "media:json;list;ndjson;record;textable",
            MediaSpec::new("application/x-ndjson").with_extensions(["ndjson", "jsonl"]),
        );
        t.insert(
            "media:textable;xml",
            MediaSpec::new("application/xml").with_extensions(["xml"]),
        );
        t.insert(
            "media:textable;yaml",
            MediaSpec::new("application/yaml").with_extensions(["yaml", "yml"]),
        );

        // Semantic output types.
        t.insert(
            "media:image;png;thumbnail",
            profiled("image/png", "thumbnail-image"),
        );
        t.insert(
            "media:document-outline;json;record;textable",
            profiled("application/json", "document-outline").with_schema(serde_json::json!({
                "type": "object",
                "required": ["entries"],
                "properties": {
                    "entries": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["title", "level"],
                            "properties": {
                                "title": {"type": "string"},
                                "level": {"type": "integer", "minimum": 0},
                                "page": {"type": "integer", "minimum": 1}
                            }
                        }
                    }
                }
            })),
        );
        t.insert(
            "media:extracted-text;textable",
            profiled("text/plain", "extracted-text"),
        );
        t.insert(
            "media:file-metadata;json;record;textable",
            profiled("application/json", "file-metadata").with_schema(serde_json::json!({
                "type": "object",
                "properties": {
                    "size_bytes": {"type": "integer", "minimum": 0},
                    "mime_type": {"type": "string"},
                    "created_at": {"type": "string"},
                    "modified_at": {"type": "string"}
                }
            })),
        );
        t.insert(
            "media:json;numeric;page-count;record;textable",
            profiled("application/json", "page-count"),
        );
        t.insert(
            "media:json;record;textable;transcript",
            profiled("application/json", "transcript"),
        );
        t.insert(
            "media:embedding;json;list;numeric;textable",
            profiled("application/json", "embedding-vector"),
        );
        t.insert(
            "media:color-palette;json;list;record;textable",
            profiled("application/json", "color-palette"),
        );
        t.insert(
            "media:json;list;record;search-result;textable",
            profiled("application/json", "search-result"),
        );
        t.insert(
            "media:json;record;textable;waveform",
            profiled("application/json", "waveform"),
        );

        t
    });
    &TABLE
}

/// Look up a built-in spec by canonical URN string.
#[must_use]
pub(crate) fn builtin_spec(urn: &str) -> Option<&'static MediaSpec> {
    builtin_media_specs().get(urn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use capns_urn::MediaUrn;

    #[test]
    fn test_parse_full_form() {
        let spec = MediaSpec::parse(
            r#"content-type: application/json; profile="https://capns.org/schema/document-outline""#,
        )
        .unwrap();
        assert_eq!(spec.content_type, "application/json");
        assert_eq!(
            spec.profile.as_deref(),
            Some("https://capns.org/schema/document-outline")
        );
    }

    #[test]
    fn test_parse_bare_mime() {
        let spec = MediaSpec::parse("image/png").unwrap();
        assert_eq!(spec.content_type, "image/png");
        assert!(spec.profile.is_none());
    }

    #[test]
    fn test_parse_unquoted_profile() {
        let spec =
            MediaSpec::parse("content-type: text/plain; profile=https://capns.org/schema/utf8-text")
                .unwrap();
        assert_eq!(spec.profile.as_deref(), Some("https://capns.org/schema/utf8-text"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(MediaSpec::parse(""), Err(DefError::MissingContentType)));
        assert!(matches!(
            MediaSpec::parse("content-type: ; profile=x"),
            Err(DefError::EmptyContentType)
        ));
        assert!(matches!(
            MediaSpec::parse(r#"text/plain; profile="unterminated"#),
            Err(DefError::UnterminatedQuote)
        ));
    }

    #[test]
    fn test_type_predicates() {
        assert!(MediaSpec::new("application/json").is_json());
        assert!(MediaSpec::new("application/ld+json").is_json());
        assert!(MediaSpec::new("text/plain").is_text());
        assert!(MediaSpec::new("image/png").is_binary());
        assert_eq!(MediaSpec::new("image/png").primary_type(), "image");
        assert_eq!(MediaSpec::new("image/png").subtype(), Some("png"));
    }

    #[test]
    fn test_display_round_trip() {
        let spec = MediaSpec::new("text/plain").with_profile("https://capns.org/schema/utf8-text");
        let reparsed = MediaSpec::parse(&spec.to_string()).unwrap();
        assert_eq!(reparsed.content_type, spec.content_type);
        assert_eq!(reparsed.profile, spec.profile);
    }

    #[test]
    fn test_builtin_table_keys_are_canonical() {
        for key in builtin_media_specs().keys() {
            let urn = MediaUrn::parse(key).unwrap();
            assert_eq!(&urn.to_string(), key, "table key must be canonical");
        }
    }

    #[test]
    fn test_builtin_table_has_ground_types() {
        let table = builtin_media_specs();
        assert!(table.contains_key("media:void"));
        assert!(table.contains_key("media:binary"));
        assert!(table.contains_key("media:pdf"));
        assert!(table.contains_key("media:image;png"));
        assert!(table.contains_key("media:string;textable"));
    }

    #[test]
    fn test_builtin_extensions_unique() {
        let mut seen = std::collections::BTreeMap::new();
        for (urn, spec) in builtin_media_specs() {
            for ext in &spec.extensions {
                if let Some(previous) = seen.insert(ext.clone(), *urn) {
                    panic!("extension {ext} mapped by both {previous} and {urn}");
                }
            }
        }
    }

    #[test]
    fn test_schema_base_url_default() {
        // Only meaningful when the env overrides are unset, which is the
        // common test environment.
        if std::env::var("CAPNS_SCHEMA_BASE_URL").is_err()
            && std::env::var("CAPNS_REGISTRY_URL").is_err()
        {
            assert_eq!(schema_base_url(), DEFAULT_SCHEMA_BASE_URL);
        }
    }

    #[test]
    fn test_media_spec_entry_serde() {
        let entry = MediaSpecEntry {
            urn: MediaUrn::parse("media:pdf").unwrap(),
            spec: MediaSpec::new("application/pdf").with_extensions(["pdf"]),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["urn"], "media:pdf");
        assert_eq!(json["content_type"], "application/pdf");
        let back: MediaSpecEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
