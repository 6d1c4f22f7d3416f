//! Tagged URN algebra for capns.
//!
//! Everything in capns is addressed by a tagged URN: a prefix plus a flat
//! set of `key=value` tags. Two refinements sit on top of the base type:
//!
//! - [`MediaUrn`]: prefix `media`, names a data type (`media:pdf`,
//!   `media:png;image`, `media:json;record;textable;list`)
//! - [`CapUrn`]: prefix `cap`, names a transformation and must carry
//!   `in` and `out` direction specs
//!
//! Tags support four pattern literals that drive routing:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `k=v` | exact value |
//! | `k=*` (or bare `k`) | key must be present, any value |
//! | `k=!` | key must be absent |
//! | `k=?` | unconstrained (same as omitting the key) |
//!
//! Matching is a pattern relation: `pattern.accepts(instance)` holds when
//! every key mentioned by either side satisfies the pattern's constraint.
//! Specificity grades how constrained a URN is (exact 3, must-have 2,
//! must-not 1, unconstrained 0) and is the tie-breaker everywhere a choice
//! between matching caps has to be made.

mod cap;
mod error;
mod media;
mod tagged;

pub use cap::{CapUrn, CapUrnBuilder, DirectionSpec};
pub use error::UrnError;
pub use media::MediaUrn;
pub use tagged::{TagValue, TaggedUrn};
