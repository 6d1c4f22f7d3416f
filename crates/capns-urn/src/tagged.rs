use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::UrnError;

/// The value side of a tag.
///
/// `Unconstrained` (`k=?`) never survives parsing: it is normalized away
/// because it is equivalent to the key being absent. It exists so callers
/// can still express "no constraint" when building patterns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagValue {
    /// Exact value (`k=v`).
    Value(String),
    /// Must be present with any value (`k=*`, or the bare marker `k`).
    Any,
    /// Must be absent (`k=!`).
    Absent,
    /// No constraint (`k=?`); normalized to key removal on insert.
    Unconstrained,
}

impl TagValue {
    /// Specificity grade of this constraint.
    #[must_use]
    pub fn grade(&self) -> u32 {
        match self {
            Self::Value(_) => 3,
            Self::Any => 2,
            Self::Absent => 1,
            Self::Unconstrained => 0,
        }
    }
}

/// An immutable tagged URN: `prefix:k1=v1;k2=v2;…`.
///
/// Keys are lowercase and unique; the tag set is held in a `BTreeMap` so
/// canonical emission and equality come out sorted and order-independent.
/// A URN with zero tags (`media:`) is valid and acts as the unconstrained
/// pattern that accepts every instance with the same prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaggedUrn {
    prefix: String,
    tags: BTreeMap<String, TagValue>,
}

impl TaggedUrn {
    /// Create a URN with the given prefix and no tags.
    pub fn new(prefix: impl Into<String>) -> Result<Self, UrnError> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        Ok(Self {
            prefix,
            tags: BTreeMap::new(),
        })
    }

    /// Parse a URN from its string form.
    pub fn parse(input: &str) -> Result<Self, UrnError> {
        let colon = input.find(':').ok_or_else(|| UrnError::InvalidFormat {
            reason: format!("missing ':' separator in {input:?}"),
        })?;
        let prefix = &input[..colon];
        validate_prefix(prefix)?;

        let mut urn = Self {
            prefix: prefix.to_string(),
            tags: BTreeMap::new(),
        };
        for (key, value) in parse_tag_list(&input[colon + 1..])? {
            if urn.tags.contains_key(&key) {
                return Err(UrnError::DuplicateKey { key });
            }
            if value != TagValue::Unconstrained {
                urn.tags.insert(key, value);
            }
        }
        Ok(urn)
    }

    /// The URN prefix (`media`, `cap`, …).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// All tags, sorted by key.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, TagValue> {
        &self.tags
    }

    /// Look up a tag by key (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(&key.to_ascii_lowercase())
    }

    /// Exact value of a tag, if it has one.
    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(TagValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Whether the tag is present as a marker or exact value.
    #[must_use]
    pub fn has_marker(&self, key: &str) -> bool {
        matches!(self.get(key), Some(TagValue::Any) | Some(TagValue::Value(_)))
    }

    /// Return a copy with the tag added or replaced.
    ///
    /// Inserting `Unconstrained` removes the key, keeping the equivalence
    /// between `k=?` and an absent key.
    #[must_use]
    pub fn with_tag(&self, key: &str, value: TagValue) -> Self {
        let mut next = self.clone();
        let key = key.to_ascii_lowercase();
        if value == TagValue::Unconstrained {
            next.tags.remove(&key);
        } else {
            next.tags.insert(key, value);
        }
        next
    }

    /// Return a copy with the tag removed.
    #[must_use]
    pub fn without_tag(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.tags.remove(&key.to_ascii_lowercase());
        next
    }

    /// Pattern-match an instance against this URN as a pattern.
    ///
    /// For every key mentioned by either side: an exact tag requires the
    /// same exact tag, `Any` requires presence, `Absent` requires absence,
    /// and an unmentioned key constrains nothing. Prefixes must match.
    #[must_use]
    pub fn accepts(&self, instance: &Self) -> bool {
        if self.prefix != instance.prefix {
            return false;
        }
        for (key, constraint) in &self.tags {
            let got = instance.tags.get(key);
            let ok = match constraint {
                TagValue::Value(v) => matches!(got, Some(TagValue::Value(iv)) if iv == v),
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

    /// Graded specificity: exact 3, must-have 2, must-not 1.
    #[must_use]
    pub fn specificity(&self) -> u32 {
        self.tags.values().map(TagValue::grade).sum()
    }

    /// Tag-set equality, independent of serialization order.
    #[must_use]
    pub fn is_equivalent_to(&self, other: &Self) -> bool {
        self == other
    }
}

impl fmt::Display for TaggedUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.prefix)?;
        let mut first = true;
        for (key, value) in &self.tags {
            if !first {
                write!(f, ";")?;
            }
            first = false;
            match value {
                TagValue::Value(v) => write!(f, "{key}={}", emit_value(v))?,
                TagValue::Any => write!(f, "{key}")?,
                TagValue::Absent => write!(f, "{key}=!")?,
                TagValue::Unconstrained => write!(f, "{key}=?")?,
            }
        }
        Ok(())
    }
}

impl FromStr for TaggedUrn {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TaggedUrn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TaggedUrn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn validate_prefix(prefix: &str) -> Result<(), UrnError> {
    if prefix.is_empty() {
        return Err(UrnError::InvalidFormat {
            reason: "empty prefix".to_string(),
        });
    }
    let mut chars = prefix.chars();
    let first = chars.next().expect("non-empty");
    if !first.is_ascii_lowercase() {
        return Err(UrnError::InvalidFormat {
            reason: format!("prefix must start with a lowercase letter: {prefix:?}"),
        });
    }
    for c in chars {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
            return Err(UrnError::InvalidFormat {
                reason: format!("invalid character {c:?} in prefix {prefix:?}"),
            });
        }
    }
    Ok(())
}

fn is_bare_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/')
}

/// Quote a value on emission only when the bare form would be ambiguous.
pub(crate) fn emit_value(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || !value.chars().all(is_bare_value_char)
        || matches!(value, "*" | "!" | "?");
    if !needs_quoting {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Scan `k1=v1;k2=v2;…` into key/value pairs, honoring quoted values.
fn parse_tag_list(input: &str) -> Result<Vec<(String, TagValue)>, UrnError> {
    let mut pairs = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    if chars.is_empty() {
        return Ok(pairs);
    }

    loop {
        // Key.
        let key_start = i;
        while i < chars.len() && chars[i] != '=' && chars[i] != ';' {
            i += 1;
        }
        let raw_key: String = chars[key_start..i].iter().collect();
        if raw_key.is_empty() {
            return Err(UrnError::EmptyTag {
                position: key_start,
            });
        }
        let key = parse_key(&raw_key)?;

        if i >= chars.len() || chars[i] == ';' {
            // Bare marker tag: `k` is sugar for `k=*`.
            pairs.push((key, TagValue::Any));
        } else {
            // chars[i] == '='. Consume it and read the value.
            i += 1;
            if i < chars.len() && chars[i] == '"' {
                i += 1;
                let mut value = String::new();
                let mut closed = false;
                while i < chars.len() {
                    match chars[i] {
                        '\\' => {
                            i += 1;
                            match chars.get(i) {
                                Some(&c @ ('\\' | '"' | ';' | '=')) => {
                                    value.push(c);
                                    i += 1;
                                }
                                Some(&c) => {
                                    return Err(UrnError::InvalidEscape { key, character: c });
                                }
                                None => {
                                    return Err(UrnError::UnterminatedQuote { key });
                                }
                            }
                        }
                        '"' => {
                            i += 1;
                            closed = true;
                            break;
                        }
                        c => {
                            value.push(c);
                            i += 1;
                        }
                    }
                }
                if !closed {
                    return Err(UrnError::UnterminatedQuote { key });
                }
                if i < chars.len() && chars[i] != ';' {
                    return Err(UrnError::InvalidFormat {
                        reason: format!("unexpected character {:?} after quoted value", chars[i]),
                    });
                }
                pairs.push((key, TagValue::Value(value)));
            } else {
                let value_start = i;
                while i < chars.len() && chars[i] != ';' {
                    i += 1;
                }
                let value: String = chars[value_start..i].iter().collect();
                let parsed = match value.as_str() {
                    "" => {
                        return Err(UrnError::EmptyTag {
                            position: value_start,
                        });
                    }
                    "*" => TagValue::Any,
                    "!" => TagValue::Absent,
                    "?" => TagValue::Unconstrained,
                    _ => {
                        if let Some(c) = value.chars().find(|c| !is_bare_value_char(*c)) {
                            return Err(UrnError::InvalidCharacter {
                                character: c,
                                context: format!("bare value for key {key}"),
                            });
                        }
                        TagValue::Value(value)
                    }
                };
                pairs.push((key, parsed));
            }
        }

        if i >= chars.len() {
            break;
        }
        // chars[i] == ';'. Consume and continue; a trailing ';' is an
        // empty tag, caught on the next iteration.
        i += 1;
        if i >= chars.len() {
            return Err(UrnError::EmptyTag { position: i });
        }
    }

    Ok(pairs)
}

fn parse_key(raw: &str) -> Result<String, UrnError> {
    let key = raw.to_ascii_lowercase();
    let first = key.chars().next().expect("checked non-empty");
    if first.is_ascii_digit() {
        return Err(UrnError::NumericKey { key });
    }
    for c in key.chars() {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
            return Err(UrnError::InvalidCharacter {
                character: c,
                context: format!("key {raw:?}"),
            });
        }
    }
    Ok(key)
}
