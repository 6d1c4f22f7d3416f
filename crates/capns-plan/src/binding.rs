// Plain std paths here: input files may originate from cap output temp
// directories whose names are not guaranteed UTF-8.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use capns_urn::MediaUrn;

/// Internal provenance of an input file. Caps never see this; the runtime
/// uses it for lifecycle and traceability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceEntityType {
    Listing,
    Chip,
    Block,
    CapOutput,
    Temporary,
}

/// Metadata about a cap input file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapFileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// A file presented to a cap for processing: the uniform view regardless
/// of where the file came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapInputFile {
    /// Actual filesystem path.
    pub file_path: PathBuf,
    /// Media URN describing the file type.
    pub media_urn: MediaUrn,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CapFileMetadata>,
    /// Source entity ID, for traceability only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub source_type: SourceEntityType,
    /// File lifecycle tracking handle used with plugins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracked_file_id: Option<String>,
    /// Opaque sandbox bookmark granting the plugin access to the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_bookmark: Option<Vec<u8>>,
    /// Path before container resolution, when it differs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_path: Option<PathBuf>,
}

impl CapInputFile {
    #[must_use]
    pub fn new(file_path: impl Into<PathBuf>, media_urn: MediaUrn) -> Self {
        Self {
            file_path: file_path.into(),
            media_urn,
            metadata: None,
            source_id: None,
            source_type: SourceEntityType::Temporary,
            tracked_file_id: None,
            security_bookmark: None,
            original_path: None,
        }
    }

    #[must_use]
    pub fn from_listing(
        listing_id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        media_urn: MediaUrn,
    ) -> Self {
        let mut file = Self::new(file_path, media_urn);
        file.source_id = Some(listing_id.into());
        file.source_type = SourceEntityType::Listing;
        file
    }

    #[must_use]
    pub fn from_chip(
        chip_id: impl Into<String>,
        cache_path: impl Into<PathBuf>,
        media_urn: MediaUrn,
    ) -> Self {
        let mut file = Self::new(cache_path, media_urn);
        file.source_id = Some(chip_id.into());
        file.source_type = SourceEntityType::Chip;
        file
    }

    #[must_use]
    pub fn from_cap_output(output_path: impl Into<PathBuf>, media_urn: MediaUrn) -> Self {
        let mut file = Self::new(output_path, media_urn);
        file.source_type = SourceEntityType::CapOutput;
        file
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: CapFileMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_file_reference(
        mut self,
        tracked_file_id: impl Into<String>,
        security_bookmark: Vec<u8>,
        original_path: impl Into<PathBuf>,
    ) -> Self {
        self.tracked_file_id = Some(tracked_file_id.into());
        self.security_bookmark = Some(security_bookmark);
        self.original_path = Some(original_path.into());
        self
    }

    /// File name component of the path.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    #[must_use]
    pub fn has_file_reference(&self) -> bool {
        self.tracked_file_id.is_some()
    }
}

/// How to resolve an argument value at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum ArgumentBinding {
    /// Bytes of the input file at `index`.
    InputFile { index: usize },
    /// Path of the current input file, as text.
    InputFilePath,
    /// Media URN of the current input file, as text.
    InputMediaUrn,
    /// Output of an earlier node, optionally narrowed to one top-level
    /// JSON field.
    PreviousOutput {
        node: crate::plan::NodeId,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    /// The default declared on the cap definition.
    CapDefault,
    /// A configured setting, keyed by media URN.
    CapSetting { urn: MediaUrn },
    /// An inline literal.
    Literal { value: serde_json::Value },
    /// A user-supplied slot value.
    Slot {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        schema: Option<serde_json::Value>,
    },
    /// A value from the plan's metadata map.
    PlanMetadata { key: String },
}

impl ArgumentBinding {
    /// Whether resolving this binding needs a user-supplied value.
    #[must_use]
    pub fn requires_input(&self) -> bool {
        matches!(self, Self::Slot { .. })
    }

    /// Whether this binding references another node's output.
    #[must_use]
    pub fn references_previous(&self) -> bool {
        matches!(self, Self::PreviousOutput { .. })
    }
}

/// Where a resolved argument's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentSource {
    InputFile,
    PreviousOutput,
    CapDefault,
    CapSetting,
    Literal,
    Slot,
    PlanMetadata,
}

/// An argument resolved to raw bytes, ready for cap execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArgument {
    pub name: String,
    pub value: Vec<u8>,
    pub source: ArgumentSource,
}

impl ResolvedArgument {
    #[must_use]
    pub fn new(name: impl Into<String>, value: Vec<u8>, source: ArgumentSource) -> Self {
        Self {
            name: name.into(),
            value,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media(s: &str) -> MediaUrn {
        MediaUrn::parse(s).unwrap()
    }

    #[test]
    fn test_input_file_constructors() {
        let listing = CapInputFile::from_listing("l-1", "/tmp/a.pdf", media("media:pdf"));
        assert_eq!(listing.source_type, SourceEntityType::Listing);
        assert_eq!(listing.source_id.as_deref(), Some("l-1"));
        assert_eq!(listing.filename().as_deref(), Some("a.pdf"));

        let output = CapInputFile::from_cap_output("/tmp/out.png", media("media:image;png"));
        assert_eq!(output.source_type, SourceEntityType::CapOutput);
        assert!(!output.has_file_reference());
    }

    #[test]
    fn test_file_reference() {
        let file = CapInputFile::new("/tmp/a.pdf", media("media:pdf")).with_file_reference(
            "tracked-9",
            vec![1, 2, 3],
            "/originals/a.pdf",
        );
        assert!(file.has_file_reference());
        assert_eq!(file.security_bookmark.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_binding_predicates() {
        let slot = ArgumentBinding::Slot {
            name: "width".to_string(),
            schema: None,
        };
        assert!(slot.requires_input());
        assert!(!slot.references_previous());

        let prev = ArgumentBinding::PreviousOutput {
            node: "cap-0".to_string(),
            field: Some("text".to_string()),
        };
        assert!(prev.references_previous());
        assert!(!prev.requires_input());
    }

    #[test]
    fn test_binding_serde_tags() {
        let binding = ArgumentBinding::InputFile { index: 2 };
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["binding"], "input_file");
        assert_eq!(json["index"], 2);

        let lit = ArgumentBinding::Literal {
            value: serde_json::json!({"x": 1}),
        };
        let json = serde_json::to_value(&lit).unwrap();
        assert_eq!(json["binding"], "literal");
        let back: ArgumentBinding = serde_json::from_value(json).unwrap();
        assert_eq!(back, lit);
    }
}
