//! Inbound/user extraction from an engine configuration blob
//!
//! Only the fields the node cares about are read: `inbounds[].tag` and
//! `inbounds[].settings.clients[].email`. Everything else is protocol
//! specific and ignored.

use serde::Deserialize;

use crate::error::StateError;

/// Users declared on one inbound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUsers {
    pub tag: String,
    pub users: Vec<String>,
}

// Explicit nulls are accepted wherever a key may be missing
#[derive(Deserialize)]
struct ConfigView {
    #[serde(default)]
    inbounds: Option<Vec<Option<InboundView>>>,
}

#[derive(Deserialize)]
struct InboundView {
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    settings: Option<SettingsView>,
}

#[derive(Deserialize)]
struct SettingsView {
    #[serde(default)]
    clients: Option<Vec<Option<ClientView>>>,
}

#[derive(Deserialize)]
struct ClientView {
    #[serde(default)]
    email: Option<String>,
}

impl InboundView {
    fn into_users(self) -> Option<InboundUsers> {
        let tag = self.tag.filter(|tag| !tag.is_empty())?;
        let users = self
            .settings
            .and_then(|s| s.clients)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .filter_map(|client| client.email)
            .filter(|email| !email.is_empty())
            .collect();
        Some(InboundUsers { tag, users })
    }
}

/// Parse `config` and list every tagged inbound with its client emails
///
/// Inbounds without a tag and clients without an email are skipped; `null`
/// is treated like an absent key.
///
/// # Errors
///
/// Returns `StateError::InvalidConfig` if the blob is not a JSON object of
/// the expected shape.
pub fn extract_inbound_users(config: &[u8]) -> Result<Vec<InboundUsers>, StateError> {
    let view: ConfigView =
        serde_json::from_slice(config).map_err(|e| StateError::InvalidConfig(e.to_string()))?;

    Ok(view
        .inbounds
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .filter_map(InboundView::into_users)
        .collect())
}
