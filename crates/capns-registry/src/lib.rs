//! Registry client for capns.
//!
//! Fetches canonical cap definitions from the capns registry and keeps
//! them in an in-memory cache for the life of the process. Fetching is
//! best-effort: a cached definition always wins over a network round
//! trip, and network failures fall back to the cache where possible.

mod client;
mod error;

pub use client::{registry_url, RegistryClient, DEFAULT_REGISTRY_URL};
pub use error::RegistryError;
