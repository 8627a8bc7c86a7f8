//! Fingerprint manifest supplied by the control plane
//!
//! The manifest is the caller's view of the configuration: a digest of the
//! config with all users stripped, plus one digest per inbound's user list.

use serde::{Deserialize, Serialize};

/// Per-inbound fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFingerprint {
    pub tag: String,
    pub hash: String,
    #[serde(default)]
    pub users_count: u64,
}

/// Desired-state fingerprints for one configuration push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintManifest {
    /// Digest of the configuration with user lists removed
    pub empty_config: String,
    #[serde(default)]
    pub inbounds: Vec<InboundFingerprint>,
}

impl FingerprintManifest {
    /// Create a manifest with no inbounds
    pub fn new(empty_config: impl Into<String>) -> Self {
        Self {
            empty_config: empty_config.into(),
            inbounds: Vec::new(),
        }
    }

    /// Builder-style inbound append
    #[must_use]
    pub fn with_inbound(mut self, tag: impl Into<String>, hash: impl Into<String>) -> Self {
        self.inbounds.push(InboundFingerprint {
            tag: tag.into(),
            hash: hash.into(),
            users_count: 0,
        });
        self
    }

    /// Fingerprint for `tag`, if listed
    pub fn inbound(&self, tag: &str) -> Option<&InboundFingerprint> {
        self.inbounds.iter().find(|i| i.tag == tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.inbound(tag).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let json = r#"{
            "emptyConfig": "abc",
            "inbounds": [{"tag": "vless-in", "hash": "h1", "usersCount": 3}]
        }"#;
        let manifest: FingerprintManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.empty_config, "abc");
        assert_eq!(manifest.inbound("vless-in").unwrap().users_count, 3);
        assert!(!manifest.contains("trojan-in"));

        let out = serde_json::to_string(&manifest).unwrap();
        assert!(out.contains("\"emptyConfig\""));
        assert!(out.contains("\"usersCount\""));
    }
}
