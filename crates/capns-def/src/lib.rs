//! Cap definitions and media specs for capns.
//!
//! This crate holds the declarative half of the system: what a cap *is*
//! (its URN, command, arguments and output), what a media URN *resolves to*
//! (content type, profile, schema, extensions), how providers declare their
//! caps ([`Manifest`]), and the validation that gates all of it, including
//! the rule that inline media specs may not redefine registry-known URNs.

mod cap;
mod error;
mod manifest;
mod media_spec;
mod standard;
mod validate;

pub use cap::{
    ArgSource, ArgValidation, Cap, CapArg, CapBuilder, CapOutput, RegisteredBy,
};
pub use error::{DefError, ValidationError};
pub use manifest::Manifest;
pub use media_spec::{builtin_media_specs, schema_base_url, MediaSpec, MediaSpecEntry};
pub use standard::{discard_cap, identity_cap, DISCARD_CAP_URN, IDENTITY_CAP_URN};
pub use validate::{
    validate_args, validate_cap, validate_no_inline_redefinition, validate_output,
    FileSchemaResolver, RegistryProbe, SchemaResolver,
};
