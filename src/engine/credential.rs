//! Protocol credentials handed to the engine
//!
//! A credential is validated on construction, so the engine never sees an
//! unparseable UUID or an empty password.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Shadowsocks cipher
///
/// The control plane sends ciphers as numeric codes; see [`CipherType::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherType {
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    Chacha20Poly1305,
    #[serde(rename = "xchacha20-poly1305")]
    XChacha20Poly1305,
    #[serde(rename = "none")]
    None,
}

impl CipherType {
    /// Map a control-plane cipher code; unknown codes fall back to AES-256-GCM
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            5 => Self::Aes128Gcm,
            6 => Self::Aes256Gcm,
            7 => Self::Chacha20Poly1305,
            8 => Self::XChacha20Poly1305,
            9 => Self::None,
            _ => Self::Aes256Gcm,
        }
    }

    /// Control-plane code for this cipher
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Aes128Gcm => 5,
            Self::Aes256Gcm => 6,
            Self::Chacha20Poly1305 => 7,
            Self::XChacha20Poly1305 => 8,
            Self::None => 9,
        }
    }

    /// Engine method name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aes128Gcm => "aes-128-gcm",
            Self::Aes256Gcm => "aes-256-gcm",
            Self::Chacha20Poly1305 => "chacha20-poly1305",
            Self::XChacha20Poly1305 => "xchacha20-poly1305",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for CipherType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vless,
    Trojan,
    Shadowsocks,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vless => write!(f, "vless"),
            Self::Trojan => write!(f, "trojan"),
            Self::Shadowsocks => write!(f, "shadowsocks"),
        }
    }
}

/// Protocol-specific authorization material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum Credential {
    Vless {
        id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flow: Option<String>,
    },
    Trojan {
        password: String,
    },
    Shadowsocks {
        password: String,
        cipher: CipherType,
        iv_check: bool,
    },
}

impl Credential {
    /// VLESS credential; an empty flow means none
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidCredential` if `id` is not a UUID.
    pub fn vless(id: &str, flow: Option<&str>) -> Result<Self, EngineError> {
        let id = Uuid::parse_str(id)
            .map_err(|e| EngineError::credential(format!("invalid VLESS id {id:?}: {e}")))?;
        Ok(Self::Vless {
            id,
            flow: flow.filter(|f| !f.is_empty()).map(str::to_string),
        })
    }

    /// Trojan credential
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidCredential` for an empty password.
    pub fn trojan(password: &str) -> Result<Self, EngineError> {
        if password.is_empty() {
            return Err(EngineError::credential("empty Trojan password"));
        }
        Ok(Self::Trojan {
            password: password.to_string(),
        })
    }

    /// Shadowsocks credential
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidCredential` for an empty password.
    pub fn shadowsocks(password: &str, cipher: CipherType, iv_check: bool) -> Result<Self, EngineError> {
        if password.is_empty() {
            return Err(EngineError::credential("empty Shadowsocks password"));
        }
        Ok(Self::Shadowsocks {
            password: password.to_string(),
            cipher,
            iv_check,
        })
    }

    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::Vless { .. } => Protocol::Vless,
            Self::Trojan { .. } => Protocol::Trojan,
            Self::Shadowsocks { .. } => Protocol::Shadowsocks,
        }
    }
}

/// A user as installed on one inbound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineUser {
    /// Engine-side user name; stats counters are keyed by it
    pub email: String,
    #[serde(default)]
    pub level: u32,
    pub credential: Credential,
}

impl EngineUser {
    pub fn new(email: impl Into<String>, credential: Credential) -> Self {
        Self {
            email: email.into(),
            level: 0,
            credential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_codes() {
        assert_eq!(CipherType::from_code(5), CipherType::Aes128Gcm);
        assert_eq!(CipherType::from_code(7), CipherType::Chacha20Poly1305);
        assert_eq!(CipherType::from_code(9), CipherType::None);
        assert_eq!(CipherType::from_code(42), CipherType::Aes256Gcm);
        assert_eq!(CipherType::from_code(8).as_str(), "xchacha20-poly1305");
        assert_eq!(CipherType::XChacha20Poly1305.code(), 8);
    }

    #[test]
    fn test_vless_validation() {
        let cred = Credential::vless("b831381d-6324-4d53-ad4f-8cda48b30811", Some("")).unwrap();
        assert!(matches!(cred, Credential::Vless { flow: None, .. }));
        assert_eq!(cred.protocol(), Protocol::Vless);

        let cred = Credential::vless(
            "b831381d-6324-4d53-ad4f-8cda48b30811",
            Some("xtls-rprx-vision"),
        )
        .unwrap();
        assert!(matches!(cred, Credential::Vless { flow: Some(ref f), .. } if f == "xtls-rprx-vision"));

        assert!(matches!(
            Credential::vless("not-a-uuid", None),
            Err(EngineError::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_password_validation() {
        assert!(Credential::trojan("").is_err());
        assert!(Credential::trojan("secret").is_ok());
        assert!(Credential::shadowsocks("", CipherType::default(), false).is_err());

        let cred = Credential::shadowsocks("pw", CipherType::Chacha20Poly1305, true).unwrap();
        assert_eq!(cred.protocol(), Protocol::Shadowsocks);
    }
}
