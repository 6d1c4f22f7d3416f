use thiserror::Error;

/// Errors building or loading cap definitions and manifests.
#[derive(Error, Debug)]
pub enum DefError {
    #[error("invalid URN: {0}")]
    Urn(#[from] capns_urn::UrnError),

    #[error("invalid media spec: {reason}")]
    MediaSpec { reason: String },

    #[error("media spec string is missing a content type")]
    MissingContentType,

    #[error("media spec string has an empty content type")]
    EmptyContentType,

    #[error("unterminated quote in media spec string")]
    UnterminatedQuote,

    #[error("duplicate media spec for {urn} in cap {cap_urn}")]
    DuplicateMediaSpec { cap_urn: String, urn: String },

    #[error("cap {cap_urn} definition invalid: {issue}")]
    InvalidCap { cap_urn: String, issue: String },

    #[error("manifest {name} is missing the mandatory identity cap")]
    MissingIdentityCap { name: String },

    #[error("manifest {name} declares cap {urn} more than once")]
    DuplicateCap { name: String, urn: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Typed validation failures for arguments, outputs and inline media specs.
///
/// Every variant carries enough to make the failure reproducible: the cap
/// URN, the argument name where one applies, and the offending value or the
/// schema messages.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("unknown cap: {cap_urn}")]
    UnknownCap { cap_urn: String },

    #[error("cap {cap_urn}: missing required argument {arg}")]
    MissingRequired { cap_urn: String, arg: String },

    #[error("cap {cap_urn}: unknown argument {arg}")]
    UnknownArg { cap_urn: String, arg: String },

    #[error("cap {cap_urn}: argument {arg} has wrong type (expected {expected}, got {actual})")]
    WrongType {
        cap_urn: String,
        arg: String,
        expected: String,
        actual: String,
        value: serde_json::Value,
    },

    #[error("cap {cap_urn}: too many positional arguments (max {max}, got {actual})")]
    TooManyArgs {
        cap_urn: String,
        max: usize,
        actual: usize,
    },

    #[error("cap {cap_urn}: argument {arg} media mismatch (expected {expected}, got {actual})")]
    MediaMismatch {
        cap_urn: String,
        arg: String,
        expected: String,
        actual: String,
    },

    #[error("cap {cap_urn}: schema validation failed for {context}: {}", messages.join("; "))]
    FailedSchema {
        cap_urn: String,
        context: String,
        messages: Vec<String>,
        value: serde_json::Value,
    },

    #[error("cap {cap_urn}: schema for {context} did not compile: {reason}")]
    SchemaCompilation {
        cap_urn: String,
        context: String,
        reason: String,
    },

    #[error("cap {cap_urn}: media spec {urn} is not resolvable")]
    UnresolvableMediaSpec { cap_urn: String, urn: String },

    #[error("inline media specs redefine registry URNs: {}", redefines.join(", "))]
    InlineMediaSpecRedefinesRegistry { redefines: Vec<String> },

    #[error("cap {cap_urn}: output is not valid JSON: {reason}")]
    JsonParse { cap_urn: String, reason: String },
}
