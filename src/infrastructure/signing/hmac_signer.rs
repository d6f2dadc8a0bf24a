//! HMAC-SHA256 token signer
//!
//! Token layout: `v1.<base64url(payload)>.<base64url(tag)>` where the tag is
//! computed over `v1.<base64url(payload)>` with the app certificate.

use crate::domain::credential::{TokenClaims, TokenSigner};
use crate::domain::shared::result::Result;
use crate::domain::DomainError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";

#[derive(Serialize, Deserialize)]
struct SignedPayload {
    app: String,
    #[serde(flatten)]
    claims: TokenClaims,
}

/// Signer bound to one media application
pub struct HmacTokenSigner {
    app_id: String,
    certificate: Vec<u8>,
}

impl HmacTokenSigner {
    pub fn new(app_id: impl Into<String>, certificate: impl AsRef<[u8]>) -> Result<Self> {
        let app_id = app_id.into();
        let certificate = certificate.as_ref().to_vec();
        if app_id.trim().is_empty() || certificate.is_empty() {
            return Err(DomainError::Configuration(
                "media app id and certificate are required".to_string(),
            ));
        }
        Ok(Self {
            app_id,
            certificate,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn mac(&self, signed_part: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.certificate)
            .map_err(|e| DomainError::Internal(format!("HMAC key: {}", e)))?;
        mac.update(signed_part.as_bytes());
        Ok(mac)
    }
}

impl TokenSigner for HmacTokenSigner {
    fn sign(&self, claims: &TokenClaims) -> Result<String> {
        let payload = SignedPayload {
            app: self.app_id.clone(),
            claims: claims.clone(),
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| DomainError::Internal(format!("token payload: {}", e)))?;

        let signed_part = format!("{}.{}", TOKEN_VERSION, URL_SAFE_NO_PAD.encode(json));
        let tag = self.mac(&signed_part)?.finalize().into_bytes();

        Ok(format!("{}.{}", signed_part, URL_SAFE_NO_PAD.encode(tag)))
    }

    fn verify(&self, token: &str) -> Result<TokenClaims> {
        let malformed = || DomainError::Unauthenticated("malformed token".to_string());

        let (signed_part, tag) = token.trim().rsplit_once('.').ok_or_else(malformed)?;
        let (version, payload) = signed_part.split_once('.').ok_or_else(malformed)?;
        if version != TOKEN_VERSION {
            return Err(DomainError::Unauthenticated(format!(
                "unsupported token version {}",
                version
            )));
        }

        let tag = URL_SAFE_NO_PAD.decode(tag).map_err(|_| malformed())?;
        self.mac(signed_part)?
            .verify_slice(&tag)
            .map_err(|_| DomainError::Unauthenticated("signature mismatch".to_string()))?;

        let json = URL_SAFE_NO_PAD.decode(payload).map_err(|_| malformed())?;
        let payload: SignedPayload = serde_json::from_slice(&json).map_err(|_| malformed())?;
        if payload.app != self.app_id {
            return Err(DomainError::Unauthenticated(
                "token issued for another application".to_string(),
            ));
        }

        Ok(payload.claims)
    }
}
