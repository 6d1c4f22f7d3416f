use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::UrnError;
use crate::tagged::{TagValue, TaggedUrn};

/// A tagged URN with the required `media` prefix, naming a data type.
///
/// The semantic class of a media URN is carried entirely by marker tags:
/// `media:json;record;textable` is a textual JSON record,
/// `media:png;image` a binary image, `media:pdf;list` a sequence of PDFs.
/// All predicates are pure tag lookups; no registry resolution happens here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediaUrn(TaggedUrn);

impl MediaUrn {
    /// The required prefix for all media URNs.
    pub const PREFIX: &'static str = "media";

    /// The empty media URN `media:`, the pattern that accepts every
    /// media type.
    #[must_use]
    pub fn any() -> Self {
        Self(TaggedUrn::new(Self::PREFIX).expect("static prefix is valid"))
    }

    /// Parse a media URN from its string form.
    pub fn parse(input: &str) -> Result<Self, UrnError> {
        TaggedUrn::parse(input)?.try_into()
    }

    /// The underlying tagged URN.
    #[must_use]
    pub fn inner(&self) -> &TaggedUrn {
        &self.0
    }

    /// Look up a tag by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.0.get(key)
    }

    #[must_use]
    pub fn accepts(&self, instance: &Self) -> bool {
        self.0.accepts(&instance.0)
    }

    #[must_use]
    pub fn conforms_to(&self, pattern: &Self) -> bool {
        self.0.conforms_to(&pattern.0)
    }

    #[must_use]
    pub fn specificity(&self) -> u32 {
        self.0.specificity()
    }

    #[must_use]
    pub fn is_equivalent_to(&self, other: &Self) -> bool {
        self == other
    }

    /// Return a copy with a marker tag added.
    #[must_use]
    pub fn with_marker(&self, key: &str) -> Self {
        Self(self.0.with_tag(key, TagValue::Any))
    }

    /// Return a copy without the given tag.
    #[must_use]
    pub fn without_tag(&self, key: &str) -> Self {
        Self(self.0.without_tag(key))
    }

    /// Return a copy carrying the `list` marker.
    #[must_use]
    pub fn with_list_marker(&self) -> Self {
        self.with_marker("list")
    }

    /// Return a copy with the `list` marker removed.
    #[must_use]
    pub fn without_list_marker(&self) -> Self {
        self.without_tag("list")
    }

    // Semantic predicates, all pure marker lookups.

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.0.has_marker("list")
    }

    #[must_use]
    pub fn is_scalar(&self) -> bool {
        !self.is_list()
    }

    #[must_use]
    pub fn is_record(&self) -> bool {
        self.0.has_marker("record")
    }

    #[must_use]
    pub fn is_opaque(&self) -> bool {
        !self.is_record()
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        self.0.has_marker("textable")
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        !self.is_text()
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        self.0.has_marker("json")
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        self.0.has_marker("image")
    }

    #[must_use]
    pub fn is_audio(&self) -> bool {
        self.0.has_marker("audio")
    }

    #[must_use]
    pub fn is_video(&self) -> bool {
        self.0.has_marker("video")
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.0.has_marker("numeric")
    }

    #[must_use]
    pub fn is_bool(&self) -> bool {
        self.0.has_marker("bool")
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        self.0.has_marker("void")
    }

    #[must_use]
    pub fn is_file_path(&self) -> bool {
        self.0.has_marker("file-path")
    }
}

impl TryFrom<TaggedUrn> for MediaUrn {
    type Error = UrnError;

    fn try_from(urn: TaggedUrn) -> Result<Self, Self::Error> {
        if urn.prefix() != Self::PREFIX {
            return Err(UrnError::InvalidPrefix {
                expected: Self::PREFIX.to_string(),
                found: urn.prefix().to_string(),
            });
        }
        Ok(Self(urn))
    }
}

impl fmt::Display for MediaUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MediaUrn {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MediaUrn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MediaUrn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requires_media_prefix() {
        assert!(MediaUrn::parse("media:pdf").is_ok());
        let err = MediaUrn::parse("cap:pdf").unwrap_err();
        assert!(matches!(err, UrnError::InvalidPrefix { .. }));
    }

    #[test]
    fn test_any_is_empty() {
        let any = MediaUrn::any();
        assert_eq!(any.to_string(), "media:");
        assert!(any.accepts(&MediaUrn::parse("media:png;image").unwrap()));
    }

    #[test]
    fn test_list_and_scalar() {
        let list = MediaUrn::parse("media:pdf;list").unwrap();
        assert!(list.is_list());
        assert!(!list.is_scalar());

        let scalar = MediaUrn::parse("media:pdf").unwrap();
        assert!(scalar.is_scalar());
        assert!(!scalar.is_list());
    }

    #[test]
    fn test_record_and_text_predicates() {
        let json = MediaUrn::parse("media:json;record;textable").unwrap();
        assert!(json.is_record());
        assert!(json.is_text());
        assert!(json.is_json());
        assert!(!json.is_binary());
        assert!(!json.is_opaque());

        let png = MediaUrn::parse("media:png;image").unwrap();
        assert!(png.is_binary());
        assert!(png.is_opaque());
        assert!(png.is_image());
    }

    #[test]
    fn test_void_and_file_path() {
        assert!(MediaUrn::parse("media:void").unwrap().is_void());
        assert!(MediaUrn::parse("media:file-path;textable").unwrap().is_file_path());
    }

    #[test]
    fn test_list_marker_helpers() {
        let scalar = MediaUrn::parse("media:pdf").unwrap();
        let list = scalar.with_list_marker();
        assert!(list.is_list());
        assert_eq!(list.without_list_marker(), scalar);
    }

    #[test]
    fn test_node_equivalence_across_tag_order() {
        let a = MediaUrn::parse("media:txt;textable").unwrap();
        let b = MediaUrn::parse("media:textable;txt").unwrap();
        assert!(a.is_equivalent_to(&b));
        assert_eq!(a.to_string(), b.to_string());
    }
}
