use thiserror::Error;

/// Errors produced while parsing or constructing URNs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrnError {
    #[error("invalid URN format: {reason}")]
    InvalidFormat { reason: String },

    #[error("empty tag in URN at position {position}")]
    EmptyTag { position: usize },

    #[error("invalid character {character:?} in {context}")]
    InvalidCharacter { character: char, context: String },

    #[error("duplicate tag key: {key}")]
    DuplicateKey { key: String },

    #[error("tag key must not start with a digit: {key}")]
    NumericKey { key: String },

    #[error("unterminated quoted value for key {key}")]
    UnterminatedQuote { key: String },

    #[error("invalid escape sequence \\{character} in value for key {key}")]
    InvalidEscape { key: String, character: char },

    #[error("expected prefix {expected:?}, found {found:?}")]
    InvalidPrefix { expected: String, found: String },

    #[error("cap URN is missing the required 'in' tag")]
    MissingInSpec,

    #[error("cap URN is missing the required 'out' tag")]
    MissingOutSpec,

    #[error("cap URN 'in' tag is not a media URN or '*': {0}")]
    InvalidInSpec(Box<UrnError>),

    #[error("cap URN 'out' tag is not a media URN or '*': {0}")]
    InvalidOutSpec(Box<UrnError>),
}
