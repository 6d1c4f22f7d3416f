//! Input resolution for capns.
//!
//! Turns mixed file/directory/glob inputs into a flat list of typed
//! files: each resolved file carries a media URN with structure markers
//! detected from its extension, magic bytes, and (for the data formats
//! that need it) content inspection. Adapters are table-driven rows, not
//! a class per extension; OS artifacts are filtered out before they ever
//! reach a plan.

mod adapter;
mod error;
mod os_filter;
mod resolve;

pub use adapter::{
    detect_media, AdapterSpec, ContentStructure, ExtensionRegistry, extension_registry,
    media_adapters,
};
pub use error::ResolveError;
pub use os_filter::{should_exclude_dir, should_exclude_file};
pub use resolve::{
    detect_file, expand_glob, is_glob_pattern, resolve_path, resolve_paths, ResolvedFile,
    ResolvedInputSet,
};
