//! Media and signaling credentials
//!
//! Credentials are never persisted. A credential pair grants `uid` access to
//! one real-time channel (media) and to the signaling plane for the same
//! lifetime.

use crate::domain::shared::result::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard upper bound of any credential lifetime
pub const MAX_TTL_SECONDS: u64 = 3600;

/// Lifetime used when a request carries no usable ttl
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// Lifetime of a standby signaling credential
pub const STANDBY_TTL_SECONDS: u64 = 3600;

/// Channel role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialRole {
    /// May send and receive media
    Publisher,
    /// Receive-only
    Subscriber,
}

impl CredentialRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialRole::Publisher => "publisher",
            CredentialRole::Subscriber => "subscriber",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "publisher" => Some(CredentialRole::Publisher),
            "subscriber" => Some(CredentialRole::Subscriber),
            _ => None,
        }
    }
}

impl fmt::Display for CredentialRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a requested role was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleResolution {
    Requested(CredentialRole),
    Defaulted(CredentialRole),
    /// The request named a role nobody knows; least privilege applies
    Downgraded(CredentialRole),
}

impl RoleResolution {
    pub fn resolve(requested: Option<&str>, default: CredentialRole) -> Self {
        match requested.map(str::trim).filter(|r| !r.is_empty()) {
            None => RoleResolution::Defaulted(default),
            Some(raw) => match CredentialRole::parse(raw) {
                Some(role) => RoleResolution::Requested(role),
                None => RoleResolution::Downgraded(CredentialRole::Subscriber),
            },
        }
    }

    pub fn role(&self) -> CredentialRole {
        match self {
            RoleResolution::Requested(role)
            | RoleResolution::Defaulted(role)
            | RoleResolution::Downgraded(role) => *role,
        }
    }
}

/// Lifetime policy: `(0, max]`, with a fallback for absent or unusable input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub default_seconds: u64,
    pub max_seconds: u64,
}

impl TtlPolicy {
    pub fn new(default_seconds: u64) -> Self {
        Self {
            default_seconds: default_seconds.clamp(1, MAX_TTL_SECONDS),
            max_seconds: MAX_TTL_SECONDS,
        }
    }

    pub fn apply(&self, requested: Option<i64>) -> u64 {
        match requested {
            Some(ttl) if ttl > 0 => (ttl as u64).min(self.max_seconds),
            _ => self.default_seconds,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS)
    }
}

/// Which plane a signed token opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Media,
    Signaling,
}

/// Claims carried inside a signed token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<CredentialRole>,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub nonce: String,
}

impl TokenClaims {
    /// Claims with a fresh random nonce
    pub fn new(
        subject: &str,
        channel: Option<&str>,
        role: Option<CredentialRole>,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let mut rng = rand::thread_rng();
        let random_bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
        Self {
            sub: subject.to_string(),
            chn: channel.map(str::to_string),
            role,
            kind,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            nonce: hex::encode(random_bytes),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Signs and checks tokens with the media provider's secret
pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &TokenClaims) -> Result<String>;

    /// Checks signature and application binding, not expiry
    fn verify(&self, token: &str) -> Result<TokenClaims>;
}

/// A media + signaling credential pair for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "channel")]
    pub channel_name: String,
    pub uid: String,
    pub role: CredentialRole,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub media_token: String,
    pub signaling_token: String,
}

/// Signaling-only credential for a callee waiting for invitations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandbyCredential {
    pub uid: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub signaling_token: String,
}

/// One entry of a batch issuance request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantGrant {
    /// Raw value; a non-string uid skips only its own entry
    pub uid: Option<serde_json::Value>,
    pub role: Option<String>,
    #[serde(rename = "ttlSeconds")]
    pub ttl_seconds: Option<i64>,
}

/// Entry left out of a batch, by position in the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedGrant {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchIssuance {
    pub issued: Vec<Credential>,
    pub skipped: Vec<SkippedGrant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_clamped_to_max() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.apply(Some(999_999)), 3600);
        assert_eq!(policy.apply(Some(3600)), 3600);
        assert_eq!(policy.apply(Some(120)), 120);
    }

    #[test]
    fn test_ttl_fallback() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.apply(None), 300);
        assert_eq!(policy.apply(Some(0)), 300);
        assert_eq!(policy.apply(Some(-5)), 300);

        assert_eq!(TtlPolicy::new(10_000).default_seconds, 3600);
        assert_eq!(TtlPolicy::new(0).default_seconds, 1);
    }

    #[test]
    fn test_role_resolution() {
        let default = CredentialRole::Publisher;
        assert_eq!(
            RoleResolution::resolve(Some("Subscriber"), default),
            RoleResolution::Requested(CredentialRole::Subscriber)
        );
        assert_eq!(
            RoleResolution::resolve(None, default),
            RoleResolution::Defaulted(CredentialRole::Publisher)
        );
        assert_eq!(
            RoleResolution::resolve(Some(""), default).role(),
            CredentialRole::Publisher
        );
        assert_eq!(
            RoleResolution::resolve(Some("admin"), default),
            RoleResolution::Downgraded(CredentialRole::Subscriber)
        );
    }

    #[test]
    fn test_credential_wire_names() {
        let now = Utc::now();
        let credential = Credential {
            channel_name: "call-1".into(),
            uid: "u".into(),
            role: CredentialRole::Publisher,
            issued_at: now,
            expires_at: now,
            ttl_seconds: 0,
            media_token: "m".into(),
            signaling_token: "s".into(),
        };
        let json = serde_json::to_value(&credential).unwrap();
        assert_eq!(json["channel"], "call-1");
        assert_eq!(json["role"], "publisher");
    }
}
