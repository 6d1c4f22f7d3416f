use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use capns_urn::MediaUrn;

use crate::error::ResolveError;

/// Content structure classification of a resolved file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStructure {
    /// Single value without internal structure (PDF, PNG, a bare string).
    ScalarOpaque,
    /// Single value with key-value structure (JSON object, TOML).
    ScalarRecord,
    /// Multiple values without per-item structure (array of primitives).
    ListOpaque,
    /// Multiple values each with key-value structure (CSV rows, NDJSON
    /// of objects).
    ListRecord,
}

impl ContentStructure {
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self, Self::ListOpaque | Self::ListRecord)
    }

    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Self::ScalarRecord | Self::ListRecord)
    }
}

/// Result of a content inspection: possibly upgraded structure.
type InspectFn = fn(&[u8]) -> Result<ContentStructure, String>;

/// One row of the adapter table.
///
/// A row covers a family of files by extension and (optionally) magic
/// bytes, mapping them to a base media URN. Rows needing content
/// inspection carry a named function that upgrades the structure marker
/// from the actual bytes.
pub struct AdapterSpec {
    pub name: &'static str,
    /// Extensions handled, lowercase without the dot.
    pub extensions: &'static [&'static str],
    /// Magic byte prefixes recognized, if any.
    pub magic_prefixes: &'static [&'static [u8]],
    /// Media URN without structure markers.
    pub base_urn: &'static str,
    pub default_structure: ContentStructure,
    pub inspect: Option<InspectFn>,
}

impl AdapterSpec {
    #[must_use]
    pub fn matches_extension(&self, extension: &str) -> bool {
        let folded = extension.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == folded)
    }

    #[must_use]
    pub fn matches_magic(&self, bytes: &[u8]) -> bool {
        self.magic_prefixes
            .iter()
            .any(|prefix| bytes.starts_with(prefix))
    }

    /// The media URN for this adapter with the given structure's markers
    /// applied.
    #[must_use]
    pub fn media_urn(&self, structure: ContentStructure) -> MediaUrn {
        let mut urn = MediaUrn::parse(self.base_urn).expect("adapter base URNs are valid");
        if structure.is_list() {
            urn = urn.with_marker("list");
        }
        if structure.is_record() {
            urn = urn.with_marker("record");
        }
        urn
    }
}

fn inspect_json(bytes: &[u8]) -> Result<ContentStructure, String> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {e}"))?;
    Ok(match value {
        serde_json::Value::Object(_) => ContentStructure::ScalarRecord,
        serde_json::Value::Array(items) => {
            if !items.is_empty() && items.iter().all(serde_json::Value::is_object) {
                ContentStructure::ListRecord
            } else {
                ContentStructure::ListOpaque
            }
        }
        _ => ContentStructure::ScalarOpaque,
    })
}

fn inspect_ndjson(bytes: &[u8]) -> Result<ContentStructure, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8: {e}"))?;
    let mut any = false;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        any = true;
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| format!("invalid NDJSON line: {e}"))?;
        if !value.is_object() {
            return Ok(ContentStructure::ListOpaque);
        }
    }
    Ok(if any {
        ContentStructure::ListRecord
    } else {
        ContentStructure::ListOpaque
    })
}

fn inspect_csv(bytes: &[u8]) -> Result<ContentStructure, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("not UTF-8: {e}"))?;
    let lines = text.lines().filter(|l| !l.trim().is_empty()).count();
    // A header plus at least one row reads as structured rows.
    Ok(if lines >= 2 {
        ContentStructure::ListRecord
    } else {
        ContentStructure::ListOpaque
    })
}

/// The adapter table. Order matters: the first extension or magic match
/// wins, and the fallback row sits last.
#[must_use]
pub fn media_adapters() -> &'static [AdapterSpec] {
    static TABLE: Lazy<Vec<AdapterSpec>> = Lazy::new(|| {
        vec![
            // Documents.
            AdapterSpec {
                name: "pdf",
                extensions: &["pdf"],
                magic_prefixes: &[b"%PDF"],
                base_urn: "media:pdf",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "epub",
                extensions: &["epub"],
                magic_prefixes: &[],
                base_urn: "media:epub",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "docx",
                extensions: &["docx"],
                magic_prefixes: &[],
                base_urn: "media:docx",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "xlsx",
                extensions: &["xlsx"],
                magic_prefixes: &[],
                base_urn: "media:spreadsheet;xlsx",
                default_structure: ContentStructure::ListRecord,
                inspect: None,
            },
            AdapterSpec {
                name: "pptx",
                extensions: &["pptx"],
                magic_prefixes: &[],
                base_urn: "media:presentation;pptx",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "rtf",
                extensions: &["rtf"],
                magic_prefixes: &[b"{\\rtf"],
                base_urn: "media:rtf;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            // Images.
            AdapterSpec {
                name: "png",
                extensions: &["png"],
                magic_prefixes: &[b"\x89PNG\r\n\x1a\n"],
                base_urn: "media:image;png",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "jpeg",
                extensions: &["jpg", "jpeg"],
                magic_prefixes: &[b"\xFF\xD8\xFF"],
                base_urn: "media:image;jpeg",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "gif",
                extensions: &["gif"],
                magic_prefixes: &[b"GIF87a", b"GIF89a"],
                base_urn: "media:gif;image",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "webp",
                extensions: &["webp"],
                magic_prefixes: &[],
                base_urn: "media:image;webp",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "svg",
                extensions: &["svg"],
                magic_prefixes: &[],
                base_urn: "media:image;svg;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "tiff",
                extensions: &["tif", "tiff"],
                magic_prefixes: &[b"II*\x00", b"MM\x00*"],
                base_urn: "media:image;tiff",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "bmp",
                extensions: &["bmp"],
                magic_prefixes: &[b"BM"],
                base_urn: "media:bmp;image",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "heic",
                extensions: &["heic", "heif"],
                magic_prefixes: &[],
                base_urn: "media:heic;image",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "ico",
                extensions: &["ico"],
                magic_prefixes: &[],
                base_urn: "media:ico;image",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            // Audio.
            AdapterSpec {
                name: "wav",
                extensions: &["wav"],
                magic_prefixes: &[b"RIFF"],
                base_urn: "media:audio;wav",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "mp3",
                extensions: &["mp3"],
                magic_prefixes: &[b"ID3"],
                base_urn: "media:audio;mp3",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "flac",
                extensions: &["flac"],
                magic_prefixes: &[b"fLaC"],
                base_urn: "media:audio;flac",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "aac",
                extensions: &["aac", "m4a"],
                magic_prefixes: &[],
                base_urn: "media:aac;audio",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "ogg",
                extensions: &["ogg", "oga", "opus"],
                magic_prefixes: &[b"OggS"],
                base_urn: "media:audio;ogg",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "midi",
                extensions: &["mid", "midi"],
                magic_prefixes: &[b"MThd"],
                base_urn: "media:audio;midi",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            // Video.
            AdapterSpec {
                name: "mp4",
                extensions: &["mp4", "m4v"],
                magic_prefixes: &[],
                base_urn: "media:mp4;video",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "webm",
                extensions: &["webm"],
                magic_prefixes: &[],
                base_urn: "media:video;webm",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "mkv",
                extensions: &["mkv"],
                magic_prefixes: &[],
                base_urn: "media:mkv;video",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "mov",
                extensions: &["mov"],
                magic_prefixes: &[],
                base_urn: "media:mov;video",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "avi",
                extensions: &["avi"],
                magic_prefixes: &[],
                base_urn: "media:avi;video",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "mpeg",
                extensions: &["mpg", "mpeg"],
                magic_prefixes: &[],
                base_urn: "media:mpeg;video",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            // Data interchange. These need content inspection.
            AdapterSpec {
                name: "json",
                extensions: &["json"],
                magic_prefixes: &[],
                base_urn: "media:json;textable",
                default_structure: ContentStructure::ScalarRecord,
                inspect: Some(inspect_json),
            },
            AdapterSpec {
                name: "ndjson",
                extensions: &["ndjson", "jsonl"],
                magic_prefixes: &[],
                base_urn: "media:json;ndjson;textable",
                default_structure: ContentStructure::ListRecord,
                inspect: Some(inspect_ndjson),
            },
            AdapterSpec {
                name: "csv",
                extensions: &["csv"],
                magic_prefixes: &[],
                base_urn: "media:csv;textable",
                default_structure: ContentStructure::ListRecord,
                inspect: Some(inspect_csv),
            },
            AdapterSpec {
                name: "tsv",
                extensions: &["tsv"],
                magic_prefixes: &[],
                base_urn: "media:textable;tsv",
                default_structure: ContentStructure::ListRecord,
                inspect: Some(inspect_csv),
            },
            AdapterSpec {
                name: "yaml",
                extensions: &["yaml", "yml"],
                magic_prefixes: &[],
                base_urn: "media:textable;yaml",
                default_structure: ContentStructure::ScalarRecord,
                inspect: None,
            },
            AdapterSpec {
                name: "toml",
                extensions: &["toml"],
                magic_prefixes: &[],
                base_urn: "media:textable;toml",
                default_structure: ContentStructure::ScalarRecord,
                inspect: None,
            },
            AdapterSpec {
                name: "ini",
                extensions: &["ini", "cfg", "conf"],
                magic_prefixes: &[],
                base_urn: "media:ini;textable",
                default_structure: ContentStructure::ScalarRecord,
                inspect: None,
            },
            AdapterSpec {
                name: "xml",
                extensions: &["xml", "plist"],
                magic_prefixes: &[b"<?xml"],
                base_urn: "media:textable;xml",
                default_structure: ContentStructure::ScalarRecord,
                inspect: None,
            },
            // Plain text.
            AdapterSpec {
                name: "text",
                extensions: &["txt", "text", "log"],
                magic_prefixes: &[],
                base_urn: "media:textable;txt",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "markdown",
                extensions: &["md", "markdown"],
                magic_prefixes: &[],
                base_urn: "media:markdown;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "html",
                extensions: &["html", "htm"],
                magic_prefixes: &[b"<!DOCTYPE html", b"<html"],
                base_urn: "media:html;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "css",
                extensions: &["css"],
                magic_prefixes: &[],
                base_urn: "media:css;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "rst",
                extensions: &["rst"],
                magic_prefixes: &[],
                base_urn: "media:rst;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "latex",
                extensions: &["tex"],
                magic_prefixes: &[],
                base_urn: "media:latex;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            // Source code: one row for the whole family.
            AdapterSpec {
                name: "source-code",
                extensions: &[
                    "rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "c", "h", "cpp",
                    "hpp", "cc", "swift", "m", "rb", "php", "sh", "bash", "zsh", "sql",
                    "kt", "scala", "cs", "hs", "ex", "exs", "lua", "pl", "r", "jl",
                    "zig", "nim", "dart", "vue", "svelte",
                ],
                magic_prefixes: &[],
                base_urn: "media:source-code;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            // Archives.
            AdapterSpec {
                name: "zip",
                extensions: &["zip", "jar"],
                magic_prefixes: &[b"PK\x03\x04"],
                base_urn: "media:archive;zip",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "tar",
                extensions: &["tar"],
                magic_prefixes: &[],
                base_urn: "media:archive;tar",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "gzip",
                extensions: &["gz", "tgz"],
                magic_prefixes: &[b"\x1f\x8b"],
                base_urn: "media:archive;gzip",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "bzip2",
                extensions: &["bz2"],
                magic_prefixes: &[b"BZh"],
                base_urn: "media:archive;bzip2",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "xz",
                extensions: &["xz"],
                magic_prefixes: &[b"\xfd7zXZ\x00"],
                base_urn: "media:archive;xz",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "zstd",
                extensions: &["zst"],
                magic_prefixes: &[],
                base_urn: "media:archive;zstd",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "7z",
                extensions: &["7z"],
                magic_prefixes: &[b"7z\xbc\xaf\x27\x1c"],
                base_urn: "media:archive;sevenz",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            // Other.
            AdapterSpec {
                name: "font",
                extensions: &["ttf", "otf", "woff", "woff2"],
                magic_prefixes: &[],
                base_urn: "media:font",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "wasm",
                extensions: &["wasm"],
                magic_prefixes: &[b"\x00asm"],
                base_urn: "media:wasm",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "jupyter",
                extensions: &["ipynb"],
                magic_prefixes: &[],
                base_urn: "media:jupyter;textable",
                default_structure: ContentStructure::ScalarRecord,
                inspect: Some(inspect_json),
            },
            AdapterSpec {
                name: "email",
                extensions: &["eml"],
                magic_prefixes: &[],
                base_urn: "media:email;textable",
                default_structure: ContentStructure::ScalarRecord,
                inspect: None,
            },
            AdapterSpec {
                name: "graphviz",
                extensions: &["dot", "gv"],
                magic_prefixes: &[],
                base_urn: "media:graphviz;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
            AdapterSpec {
                name: "subtitle",
                extensions: &["srt", "vtt"],
                magic_prefixes: &[],
                base_urn: "media:subtitle;textable",
                default_structure: ContentStructure::ScalarOpaque,
                inspect: None,
            },
        ]
    });
    &TABLE
}

/// Extension → media URN mapping derived from the adapter table.
pub struct ExtensionRegistry {
    by_extension: BTreeMap<&'static str, Vec<&'static AdapterSpec>>,
}

impl ExtensionRegistry {
    fn build() -> Self {
        let mut by_extension: BTreeMap<&'static str, Vec<&'static AdapterSpec>> = BTreeMap::new();
        for adapter in media_adapters() {
            for extension in adapter.extensions {
                by_extension.entry(extension).or_default().push(adapter);
            }
        }
        Self { by_extension }
    }

    /// All media URNs registered for an extension.
    #[must_use]
    pub fn media_urns_for_extension(&self, extension: &str) -> Vec<MediaUrn> {
        self.by_extension
            .get(extension.to_ascii_lowercase().as_str())
            .map(|adapters| {
                adapters
                    .iter()
                    .map(|a| a.media_urn(a.default_structure))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The first (most specific) URN for an extension.
    #[must_use]
    pub fn primary_media_urn_for_extension(&self, extension: &str) -> Option<MediaUrn> {
        self.media_urns_for_extension(extension).into_iter().next()
    }

    #[must_use]
    pub fn has_extension(&self, extension: &str) -> bool {
        self.by_extension
            .contains_key(extension.to_ascii_lowercase().as_str())
    }

    #[must_use]
    pub fn all_extensions(&self) -> Vec<&'static str> {
        self.by_extension.keys().copied().collect()
    }
}

/// The process-wide extension registry.
#[must_use]
pub fn extension_registry() -> &'static ExtensionRegistry {
    static REGISTRY: Lazy<ExtensionRegistry> = Lazy::new(ExtensionRegistry::build);
    &REGISTRY
}

/// Detect a file's media URN and structure from its extension and
/// content.
///
/// Extension lookup first, then a magic-byte sniff; an adapter with an
/// inspect function upgrades the structure from the bytes. Unmatched
/// files fall back to plain text when valid UTF-8, raw binary otherwise.
pub fn detect_media(
    path: &str,
    extension: Option<&str>,
    content: &[u8],
) -> Result<(MediaUrn, ContentStructure), ResolveError> {
    let adapter = extension
        .and_then(|ext| {
            media_adapters()
                .iter()
                .find(|a| a.matches_extension(ext))
        })
        .or_else(|| media_adapters().iter().find(|a| a.matches_magic(content)));

    match adapter {
        Some(adapter) => {
            let structure = match adapter.inspect {
                Some(inspect) => {
                    inspect(content).map_err(|reason| ResolveError::InspectionFailed {
                        path: path.to_string(),
                        reason,
                    })?
                }
                None => adapter.default_structure,
            };
            Ok((adapter.media_urn(structure), structure))
        }
        None => {
            if std::str::from_utf8(content).is_ok() {
                Ok((
                    MediaUrn::parse("media:textable;txt").expect("static URN"),
                    ContentStructure::ScalarOpaque,
                ))
            } else {
                Ok((
                    MediaUrn::parse("media:binary").expect("static URN"),
                    ContentStructure::ScalarOpaque,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_base_urns_are_canonical() {
        for adapter in media_adapters() {
            let urn = MediaUrn::parse(adapter.base_urn).unwrap();
            assert_eq!(
                urn.to_string(),
                adapter.base_urn,
                "adapter {} base URN must be canonical",
                adapter.name
            );
        }
    }

    #[test]
    fn test_table_extensions_unique() {
        let mut seen = BTreeMap::new();
        for adapter in media_adapters() {
            for ext in adapter.extensions {
                if let Some(previous) = seen.insert(*ext, adapter.name) {
                    panic!("extension {ext} claimed by both {previous} and {}", adapter.name);
                }
            }
        }
    }

    #[test]
    fn test_extension_detection() {
        let (urn, structure) = detect_media("doc.pdf", Some("pdf"), b"%PDF-1.7").unwrap();
        assert_eq!(urn.to_string(), "media:pdf");
        assert_eq!(structure, ContentStructure::ScalarOpaque);
    }

    #[test]
    fn test_magic_detection_without_extension() {
        let (urn, _) = detect_media("mystery", None, b"\x89PNG\r\n\x1a\nrest").unwrap();
        assert_eq!(urn.to_string(), "media:image;png");
    }

    #[test]
    fn test_json_inspection_upgrades_structure() {
        let (urn, structure) =
            detect_media("data.json", Some("json"), br#"{"a": 1}"#).unwrap();
        assert_eq!(structure, ContentStructure::ScalarRecord);
        assert!(urn.is_record());
        assert!(!urn.is_list());

        let (urn, structure) =
            detect_media("rows.json", Some("json"), br#"[{"a": 1}, {"a": 2}]"#).unwrap();
        assert_eq!(structure, ContentStructure::ListRecord);
        assert!(urn.is_record());
        assert!(urn.is_list());

        let (_, structure) = detect_media("nums.json", Some("json"), b"[1, 2, 3]").unwrap();
        assert_eq!(structure, ContentStructure::ListOpaque);

        let (_, structure) = detect_media("prim.json", Some("json"), b"42").unwrap();
        assert_eq!(structure, ContentStructure::ScalarOpaque);
    }

    #[test]
    fn test_invalid_json_is_inspection_failure() {
        let err = detect_media("bad.json", Some("json"), b"{nope").unwrap_err();
        assert!(matches!(err, ResolveError::InspectionFailed { .. }));
    }

    #[test]
    fn test_ndjson_inspection() {
        let (_, structure) = detect_media(
            "rows.ndjson",
            Some("ndjson"),
            b"{\"a\": 1}\n{\"a\": 2}\n",
        )
        .unwrap();
        assert_eq!(structure, ContentStructure::ListRecord);

        let (_, structure) =
            detect_media("nums.ndjson", Some("ndjson"), b"1\n2\n3\n").unwrap();
        assert_eq!(structure, ContentStructure::ListOpaque);
    }

    #[test]
    fn test_fallback_text_and_binary() {
        let (urn, _) = detect_media("notes", None, b"plain text content").unwrap();
        assert_eq!(urn.to_string(), "media:textable;txt");

        let (urn, _) = detect_media("blob", None, &[0xFF, 0xFE, 0x00, 0x01]).unwrap();
        assert_eq!(urn.to_string(), "media:binary");
    }

    #[test]
    fn test_extension_registry() {
        let registry = extension_registry();
        assert!(registry.has_extension("pdf"));
        assert!(registry.has_extension("PDF"));
        assert!(!registry.has_extension("nope"));
        assert_eq!(
            registry
                .primary_media_urn_for_extension("png")
                .unwrap()
                .to_string(),
            "media:image;png"
        );
        assert!(registry.all_extensions().len() > 50);
    }

    #[test]
    fn test_csv_inspection() {
        let (urn, structure) = detect_media(
            "data.csv",
            Some("csv"),
            b"name,age\nalice,30\nbob,25\n",
        )
        .unwrap();
        assert_eq!(structure, ContentStructure::ListRecord);
        assert!(urn.is_list());
        assert!(urn.is_record());
    }
}
