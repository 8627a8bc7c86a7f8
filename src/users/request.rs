//! User mutation requests and responses

use serde::{Deserialize, Serialize};

use crate::engine::{CipherType, Credential, EngineUser, Protocol};
use crate::error::EngineError;

/// One identity to install on one inbound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundUser {
    #[serde(rename_all = "camelCase")]
    Vless {
        tag: String,
        username: String,
        uuid: String,
        #[serde(default)]
        flow: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Trojan {
        tag: String,
        username: String,
        password: String,
    },
    #[serde(rename_all = "camelCase")]
    Shadowsocks {
        tag: String,
        username: String,
        password: String,
        #[serde(default)]
        cipher_type: i32,
        #[serde(default)]
        iv_check: bool,
    },
}

impl InboundUser {
    pub fn tag(&self) -> &str {
        match self {
            Self::Vless { tag, .. } | Self::Trojan { tag, .. } | Self::Shadowsocks { tag, .. } => {
                tag
            }
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Vless { username, .. }
            | Self::Trojan { username, .. }
            | Self::Shadowsocks { username, .. } => username,
        }
    }

    /// Validated engine user for this identity
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidCredential` for malformed credentials.
    pub fn to_engine_user(&self) -> Result<EngineUser, EngineError> {
        let credential = match self {
            Self::Vless { uuid, flow, .. } => Credential::vless(uuid, flow.as_deref())?,
            Self::Trojan { password, .. } => Credential::trojan(password)?,
            Self::Shadowsocks {
                password,
                cipher_type,
                iv_check,
                ..
            } => Credential::shadowsocks(password, CipherType::from_code(*cipher_type), *iv_check)?,
        };
        Ok(EngineUser::new(self.username(), credential))
    }
}

/// Identity keys used for membership tracking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityKeys {
    pub vless_uuid: String,
    /// Key the identity was tracked under before a credential rotation
    #[serde(default)]
    pub prev_vless_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserRequest {
    pub data: Vec<InboundUser>,
    pub hash_data: IdentityKeys,
}

/// Inbound membership of a batch user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInbound {
    #[serde(rename = "type")]
    pub protocol: Protocol,
    pub tag: String,
    #[serde(default)]
    pub flow: Option<String>,
}

/// Credentials shared by every inbound of a batch user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUserData {
    pub user_id: String,
    #[serde(default)]
    pub hash_uuid: String,
    #[serde(default)]
    pub vless_uuid: String,
    #[serde(default)]
    pub trojan_password: String,
    #[serde(default)]
    pub ss_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUser {
    pub inbound_data: Vec<BatchInbound>,
    pub user_data: BatchUserData,
}

impl BatchUser {
    /// Engine user for one of this user's inbounds
    ///
    /// Shadowsocks users get chacha20-poly1305 without IV checking.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidCredential` for malformed credentials.
    pub fn engine_user(&self, inbound: &BatchInbound) -> Result<EngineUser, EngineError> {
        let data = &self.user_data;
        let credential = match inbound.protocol {
            Protocol::Vless => Credential::vless(&data.vless_uuid, inbound.flow.as_deref())?,
            Protocol::Trojan => Credential::trojan(&data.trojan_password)?,
            Protocol::Shadowsocks => {
                Credential::shadowsocks(&data.ss_password, CipherType::Chacha20Poly1305, false)?
            }
        };
        Ok(EngineUser::new(&data.user_id, credential))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUsersRequest {
    #[serde(default)]
    pub affected_inbound_tags: Vec<String>,
    pub users: Vec<BatchUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveKeys {
    pub vless_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveUserRequest {
    pub username: String,
    #[serde(default)]
    pub hash_data: RemoveKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveUserItem {
    pub user_id: String,
    #[serde(default)]
    pub hash_uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveUsersRequest {
    pub users: Vec<RemoveUserItem>,
}

/// Outcome of a user mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub success: bool,
    pub error: Option<String>,
}

impl MutationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}
