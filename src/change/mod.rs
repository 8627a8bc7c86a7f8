//! Change detection
//!
//! Content fingerprints used to decide whether a new configuration actually
//! differs from the one the engine is running.

mod canonical;
mod detector;

pub use canonical::{canonical_bytes, canonicalize, fingerprint, hash_bytes};
pub use detector::ChangeDetector;
