use thiserror::Error;

/// Errors from cap routing.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no cap found matching {urn}")]
    NotFound { urn: String },

    #[error("invalid request URN: {0}")]
    InvalidUrn(#[from] capns_urn::UrnError),

    #[error("provider {provider} failed executing {urn}: {reason}")]
    ProviderFailed {
        provider: String,
        urn: String,
        reason: String,
    },
}
