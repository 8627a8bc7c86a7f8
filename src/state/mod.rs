//! Engine state tracking
//!
//! - [`StateTracker`]: tracked inbounds, identity membership, fingerprints
//! - [`FingerprintManifest`]: the control plane's view of the same
//! - [`extract_inbound_users`]: reads inbounds and clients from a config blob

mod inbounds;
mod manifest;
mod tracker;

pub use inbounds::{extract_inbound_users, InboundUsers};
pub use manifest::{FingerprintManifest, InboundFingerprint};
pub use tracker::{StateTracker, USERS_FINGERPRINT_KEY};
