use thiserror::Error;

/// Errors from input resolution.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("path not found: {path}")]
    NotFound { path: String },

    #[error("not a regular file: {path}")]
    NotAFile { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("invalid glob pattern {pattern}: {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("content inspection failed for {path}: {reason}")]
    InspectionFailed { path: String, reason: String },

    #[error("no input paths provided")]
    EmptyInput,

    #[error("no files resolved from the given paths")]
    NoFilesResolved,

    #[error("symlink cycle detected at {path}")]
    SymlinkCycle { path: String },
}
