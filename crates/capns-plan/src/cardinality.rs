use serde::{Deserialize, Serialize};

use capns_urn::MediaUrn;

/// Shape classification of a media URN: how many values flow through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one item; the default without a `list` marker.
    Single,
    /// An ordered collection; the `list` marker is present.
    Sequence,
    /// One or more items; the consumer accepts either shape.
    AtLeastOne,
}

impl Cardinality {
    /// Derive from a media URN via the `list` marker.
    #[must_use]
    pub fn from_media_urn(urn: &MediaUrn) -> Self {
        if urn.is_list() {
            Self::Sequence
        } else {
            Self::Single
        }
    }

    #[must_use]
    pub fn is_multiple(&self) -> bool {
        matches!(self, Self::Sequence | Self::AtLeastOne)
    }

    #[must_use]
    pub fn accepts_single(&self) -> bool {
        matches!(self, Self::Single | Self::AtLeastOne)
    }

    /// Apply this cardinality to a base URN by adding or removing the
    /// `list` marker.
    #[must_use]
    pub fn apply_to_urn(&self, base: &MediaUrn) -> MediaUrn {
        match self {
            Self::Sequence | Self::AtLeastOne => base.with_list_marker(),
            Self::Single => base.without_list_marker(),
        }
    }

    /// How data of `source` shape flows into an input expecting `self`.
    #[must_use]
    pub fn is_compatible_with(&self, source: Cardinality) -> Compatibility {
        match (self, source) {
            (Self::AtLeastOne, _) => Compatibility::Direct,
            (Self::Single, Self::Single) => Compatibility::Direct,
            (Self::Sequence, Self::Sequence) => Compatibility::Direct,
            (Self::Sequence, Self::Single) => Compatibility::WrapInArray,
            (Self::Single, Self::Sequence) => Compatibility::RequiresFanOut,
            (Self::Sequence, Self::AtLeastOne) => Compatibility::Direct,
            (Self::Single, Self::AtLeastOne) => Compatibility::RequiresFanOut,
        }
    }
}

/// What adapter, if any, an edge between two cardinalities needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compatibility {
    /// Data flows through unchanged.
    Direct,
    /// A scalar must be wrapped into a one-element list.
    WrapInArray,
    /// A sequence must be fanned out: run the consumer once per element.
    RequiresFanOut,
}

/// Whole-cap transformation pattern derived from input and output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityPattern {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl CardinalityPattern {
    #[must_use]
    pub fn produces_vector(&self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    #[must_use]
    pub fn requires_vector(&self) -> bool {
        matches!(self, Self::ManyToOne | Self::ManyToMany)
    }
}

/// Cardinality analysis for one cap in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapCardinalityInfo {
    pub input: Cardinality,
    pub output: Cardinality,
    pub cap_urn: String,
}

impl CapCardinalityInfo {
    /// Build from a cap's direction specs. A wildcard direction accepts
    /// either shape.
    #[must_use]
    pub fn from_cap_urn(cap_urn: &capns_urn::CapUrn) -> Self {
        let input = match cap_urn.in_spec().as_media() {
            Some(urn) => Cardinality::from_media_urn(urn),
            None => Cardinality::AtLeastOne,
        };
        let output = match cap_urn.out_spec().as_media() {
            Some(urn) => Cardinality::from_media_urn(urn),
            None => Cardinality::Single,
        };
        Self {
            input,
            output,
            cap_urn: cap_urn.to_string(),
        }
    }

    #[must_use]
    pub fn pattern(&self) -> CardinalityPattern {
        match (self.input.is_multiple(), self.output.is_multiple()) {
            (false, false) => CardinalityPattern::OneToOne,
            (false, true) => CardinalityPattern::OneToMany,
            (true, false) => CardinalityPattern::ManyToOne,
            (true, true) => CardinalityPattern::ManyToMany,
        }
    }
}

/// Result of threading cardinality through a chain of caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainAnalysis {
    /// Cardinality the chain receives.
    pub initial_input: Cardinality,
    /// Cardinality the chain produces.
    pub final_output: Cardinality,
    /// Indices of caps that must run under a fan-out adapter.
    pub fan_out_points: Vec<usize>,
}

impl ChainAnalysis {
    /// Walk the chain, threading the flowing cardinality and recording
    /// where fan-out is required. A fanned-out cap's per-item outputs are
    /// collected back into a sequence.
    #[must_use]
    pub fn analyze(initial_input: Cardinality, chain: &[CapCardinalityInfo]) -> Self {
        let mut current = initial_input;
        let mut fan_out_points = Vec::new();
        for (index, info) in chain.iter().enumerate() {
            match info.input.is_compatible_with(current) {
                Compatibility::Direct | Compatibility::WrapInArray => {
                    current = info.output;
                }
                Compatibility::RequiresFanOut => {
                    fan_out_points.push(index);
                    // Collect lifts the per-item output back to a sequence.
                    current = Cardinality::Sequence;
                }
            }
        }
        Self {
            initial_input,
            final_output: current,
            fan_out_points,
        }
    }
}
