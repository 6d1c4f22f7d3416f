use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::UrnError;
use crate::media::MediaUrn;
use crate::tagged::{emit_value, TagValue, TaggedUrn};

/// One side of a cap's direction: a concrete media URN or the wildcard `*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirectionSpec {
    /// Matches any media type in this position.
    Wildcard,
    /// A concrete media URN pattern.
    Media(MediaUrn),
}

impl DirectionSpec {
    /// Parse from the raw tag value of an `in`/`out` tag.
    fn from_tag(value: &TagValue, invalid: fn(Box<UrnError>) -> UrnError) -> Result<Self, UrnError> {
        match value {
            TagValue::Any => Ok(Self::Wildcard),
            TagValue::Value(raw) => MediaUrn::parse(raw)
                .map(Self::Media)
                .map_err(|e| invalid(Box::new(e))),
            TagValue::Absent | TagValue::Unconstrained => {
                Err(invalid(Box::new(UrnError::InvalidFormat {
                    reason: "direction spec must be a media URN or '*'".to_string(),
                })))
            }
        }
    }

    /// Specificity grade: a concrete media URN counts as an exact tag,
    /// the wildcard as a must-have.
    #[must_use]
    pub fn grade(&self) -> u32 {
        match self {
            Self::Media(_) => 3,
            Self::Wildcard => 2,
        }
    }

    /// Whether `instance` satisfies this direction used as a pattern.
    /// The wildcard matches anything in either position.
    #[must_use]
    pub fn accepts(&self, instance: &Self) -> bool {
        match (self, instance) {
            (Self::Wildcard, _) | (_, Self::Wildcard) => true,
            (Self::Media(pattern), Self::Media(urn)) => pattern.accepts(urn),
        }
    }

    /// The concrete media URN, if this is not the wildcard.
    #[must_use]
    pub fn as_media(&self) -> Option<&MediaUrn> {
        match self {
            Self::Media(urn) => Some(urn),
            Self::Wildcard => None,
        }
    }
}

impl fmt::Display for DirectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => write!(f, "*"),
            Self::Media(urn) => write!(f, "{urn}"),
        }
    }
}

/// A tagged URN with prefix `cap`, identifying a transformation.
///
/// Direction is integral to a cap's identity: every cap URN carries an
/// `in` spec and an `out` spec, each either a media URN or `*`. All other
/// tags are free-form and participate in pattern matching with the usual
/// tag rules.
///
/// Handler matching is contravariant on inputs and covariant on outputs:
/// a cap accepts a request when the request's `in` conforms to the cap's
/// `in` and the cap's `out` conforms to the request's `out`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapUrn {
    in_spec: DirectionSpec,
    out_spec: DirectionSpec,
    tags: BTreeMap<String, TagValue>,
}

impl CapUrn {
    /// The required prefix for all cap URNs.
    pub const PREFIX: &'static str = "cap";

    /// Parse a cap URN from its string form.
    ///
    /// Fails if the `in` or `out` tag is missing, or if either is neither
    /// `*` nor a parseable media URN.
    pub fn parse(input: &str) -> Result<Self, UrnError> {
        TaggedUrn::parse(input)?.try_into()
    }

    /// Construct from explicit direction specs and free-form tags.
    #[must_use]
    pub fn from_parts(
        in_spec: DirectionSpec,
        out_spec: DirectionSpec,
        tags: BTreeMap<String, TagValue>,
    ) -> Self {
        Self {
            in_spec,
            out_spec,
            tags,
        }
    }

    #[must_use]
    pub fn in_spec(&self) -> &DirectionSpec {
        &self.in_spec
    }

    #[must_use]
    pub fn out_spec(&self) -> &DirectionSpec {
        &self.out_spec
    }

    /// Free-form tags, excluding `in` and `out`.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, TagValue> {
        &self.tags
    }

    /// Look up a tag; `in` and `out` answer with their direction strings.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        match key.to_ascii_lowercase().as_str() {
            "in" => Some(self.in_spec.to_string()),
            "out" => Some(self.out_spec.to_string()),
            folded => match self.tags.get(folded) {
                Some(TagValue::Value(v)) => Some(v.clone()),
                Some(TagValue::Any) => Some("*".to_string()),
                Some(TagValue::Absent) => Some("!".to_string()),
                Some(TagValue::Unconstrained) | None => None,
            },
        }
    }

    /// Return a copy with a tag added or replaced.
    ///
    /// The direction keys `in`/`out` are left untouched; use
    /// [`with_in_spec`](Self::with_in_spec) / [`with_out_spec`](Self::with_out_spec).
    #[must_use]
    pub fn with_tag(&self, key: &str, value: TagValue) -> Self {
        let folded = key.to_ascii_lowercase();
        if folded == "in" || folded == "out" {
            return self.clone();
        }
        let mut next = self.clone();
        if value == TagValue::Unconstrained {
            next.tags.remove(&folded);
        } else {
            next.tags.insert(folded, value);
        }
        next
    }

    /// Return a copy with a tag removed. Direction keys cannot be removed.
    #[must_use]
    pub fn without_tag(&self, key: &str) -> Self {
        let folded = key.to_ascii_lowercase();
        if folded == "in" || folded == "out" {
            return self.clone();
        }
        let mut next = self.clone();
        next.tags.remove(&folded);
        next
    }

    /// Return a copy with a changed input spec.
    #[must_use]
    pub fn with_in_spec(&self, in_spec: DirectionSpec) -> Self {
        let mut next = self.clone();
        next.in_spec = in_spec;
        next
    }

    /// Return a copy with a changed output spec.
    #[must_use]
    pub fn with_out_spec(&self, out_spec: DirectionSpec) -> Self {
        let mut next = self.clone();
        next.out_spec = out_spec;
        next
    }

    /// Whether this cap, used as a handler, accepts `request`.
    ///
    /// Direction is checked first (contravariant on `in`, covariant on
    /// `out`), then the free-form tags follow the usual pattern rules with
    /// this cap as the pattern.
    #[must_use]
    pub fn accepts(&self, request: &Self) -> bool {
        if !self.in_spec.accepts(request.in_spec()) {
            return false;
        }
        if !request.out_spec().accepts(&self.out_spec) {
            return false;
        }
        for (key, constraint) in &self.tags {
            let got = request.tags.get(key);
            let ok = match constraint {
                TagValue::Value(v) => matches!(got, Some(TagValue::Value(rv)) if rv == v),
                TagValue::Any => matches!(got, Some(TagValue::Value(_)) | Some(TagValue::Any)),
                TagValue::Absent => !matches!(got, Some(TagValue::Value(_)) | Some(TagValue::Any)),
                TagValue::Unconstrained => true,
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Dual of [`accepts`](Self::accepts).
    #[must_use]
    pub fn conforms_to(&self, pattern: &Self) -> bool {
        pattern.accepts(self)
    }

    /// Graded specificity including both direction specs.
    #[must_use]
    pub fn specificity(&self) -> u32 {
        self.in_spec.grade()
            + self.out_spec.grade()
            + self.tags.values().map(TagValue::grade).sum::<u32>()
    }

    #[must_use]
    pub fn is_more_specific_than(&self, other: &Self) -> bool {
        self.specificity() > other.specificity()
    }

    #[must_use]
    pub fn is_equivalent_to(&self, other: &Self) -> bool {
        self == other
    }
}

impl TryFrom<TaggedUrn> for CapUrn {
    type Error = UrnError;

    fn try_from(urn: TaggedUrn) -> Result<Self, Self::Error> {
        if urn.prefix() != Self::PREFIX {
            return Err(UrnError::InvalidPrefix {
                expected: Self::PREFIX.to_string(),
                found: urn.prefix().to_string(),
            });
        }
        let in_spec = match urn.get("in") {
            None => return Err(UrnError::MissingInSpec),
            Some(value) => DirectionSpec::from_tag(value, UrnError::InvalidInSpec)?,
        };
        let out_spec = match urn.get("out") {
            None => return Err(UrnError::MissingOutSpec),
            Some(value) => DirectionSpec::from_tag(value, UrnError::InvalidOutSpec)?,
        };
        let tags = urn
            .tags()
            .iter()
            .filter(|(k, _)| k.as_str() != "in" && k.as_str() != "out")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            in_spec,
            out_spec,
            tags,
        })
    }
}

impl fmt::Display for CapUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Canonical emission: direction specs join the other tags and the
        // whole set comes out sorted by key.
        let mut rendered: Vec<(String, String)> = Vec::with_capacity(self.tags.len() + 2);
        rendered.push(("in".to_string(), direction_entry("in", &self.in_spec)));
        rendered.push(("out".to_string(), direction_entry("out", &self.out_spec)));
        for (key, value) in &self.tags {
            let entry = match value {
                TagValue::Value(v) => format!("{key}={}", emit_value(v)),
                TagValue::Any => key.clone(),
                TagValue::Absent => format!("{key}=!"),
                TagValue::Unconstrained => format!("{key}=?"),
            };
            rendered.push((key.clone(), entry));
        }
        rendered.sort();
        write!(f, "{}:", Self::PREFIX)?;
        for (i, (_, entry)) in rendered.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

fn direction_entry(key: &str, spec: &DirectionSpec) -> String {
    match spec {
        DirectionSpec::Wildcard => format!("{key}=*"),
        DirectionSpec::Media(urn) => format!("{key}={}", emit_value(&urn.to_string())),
    }
}

impl FromStr for CapUrn {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CapUrn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CapUrn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Fluent builder for cap URNs. Both direction specs must be set before
/// [`build`](Self::build) succeeds.
#[derive(Debug, Default, Clone)]
pub struct CapUrnBuilder {
    in_spec: Option<DirectionSpec>,
    out_spec: Option<DirectionSpec>,
    tags: BTreeMap<String, TagValue>,
}

impl CapUrnBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the input spec from a media URN string or `*`.
    pub fn in_spec(mut self, spec: &str) -> Result<Self, UrnError> {
        self.in_spec = Some(parse_direction(spec, UrnError::InvalidInSpec)?);
        Ok(self)
    }

    /// Set the output spec from a media URN string or `*`.
    pub fn out_spec(mut self, spec: &str) -> Result<Self, UrnError> {
        self.out_spec = Some(parse_direction(spec, UrnError::InvalidOutSpec)?);
        Ok(self)
    }

    /// Add an exact-valued tag. Direction keys are ignored; use
    /// [`in_spec`](Self::in_spec) / [`out_spec`](Self::out_spec).
    #[must_use]
    pub fn tag(mut self, key: &str, value: &str) -> Self {
        let folded = key.to_ascii_lowercase();
        if folded != "in" && folded != "out" {
            self.tags.insert(folded, TagValue::Value(value.to_string()));
        }
        self
    }

    /// Add a marker tag.
    #[must_use]
    pub fn marker(mut self, key: &str) -> Self {
        let folded = key.to_ascii_lowercase();
        if folded != "in" && folded != "out" {
            self.tags.insert(folded, TagValue::Any);
        }
        self
    }

    pub fn build(self) -> Result<CapUrn, UrnError> {
        let in_spec = self.in_spec.ok_or(UrnError::MissingInSpec)?;
        let out_spec = self.out_spec.ok_or(UrnError::MissingOutSpec)?;
        Ok(CapUrn {
            in_spec,
            out_spec,
            tags: self.tags,
        })
    }
}

fn parse_direction(spec: &str, invalid: fn(Box<UrnError>) -> UrnError) -> Result<DirectionSpec, UrnError> {
    if spec == "*" {
        Ok(DirectionSpec::Wildcard)
    } else {
        MediaUrn::parse(spec)
            .map(DirectionSpec::Media)
            .map_err(|e| invalid(Box::new(e)))
    }
}
