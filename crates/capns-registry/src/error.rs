use thiserror::Error;

/// Errors from the registry client.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("cap not found in registry: {urn}")]
    NotFound { urn: String },

    #[error("registry response for {urn} did not decode: {reason}")]
    Decode { urn: String, reason: String },

    #[error("cap {urn} does not match its canonical definition: {issue}")]
    CanonicalMismatch { urn: String, issue: String },

    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
}
