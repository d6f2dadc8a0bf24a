//! Credential issuance use cases

use crate::domain::call::{CallRepository, CallStatus};
use crate::domain::credential::{
    BatchIssuance, Credential, CredentialRole, ParticipantGrant, RoleResolution, SkippedGrant,
    StandbyCredential, TokenClaims, TokenKind, TokenSigner, TtlPolicy, DEFAULT_TTL_SECONDS,
    STANDBY_TTL_SECONDS,
};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CallId;
use crate::domain::DomainError;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest channel name the media provider accepts
const MAX_CHANNEL_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialSettings {
    pub ttl: TtlPolicy,
    pub standby_ttl: TtlPolicy,
    pub default_role: CredentialRole,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            ttl: TtlPolicy::new(DEFAULT_TTL_SECONDS),
            standby_ttl: TtlPolicy::new(STANDBY_TTL_SECONDS),
            default_role: CredentialRole::Publisher,
        }
    }
}

/// Outcome of checking a media token presented by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TokenValidation {
    fn rejected(reason: &str) -> Self {
        Self {
            valid: false,
            uid: None,
            channel: None,
            expires_at: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// Issues media/signaling credential pairs
pub struct CredentialIssuer {
    signer: Option<Arc<dyn TokenSigner>>,
    calls: Arc<dyn CallRepository>,
    settings: CredentialSettings,
}

impl CredentialIssuer {
    /// `signer` is `None` when the media certificate is not configured;
    /// every issuance then fails with a configuration error
    pub fn new(
        signer: Option<Arc<dyn TokenSigner>>,
        calls: Arc<dyn CallRepository>,
        settings: CredentialSettings,
    ) -> Self {
        if signer.is_none() {
            warn!("Media signing is not configured; credential issuance is disabled");
        }
        Self {
            signer,
            calls,
            settings,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.signer.is_some()
    }

    fn signer(&self) -> Result<&dyn TokenSigner> {
        self.signer.as_deref().ok_or_else(|| {
            DomainError::Configuration("media signing credentials are not configured".to_string())
        })
    }

    /// Credential pair scoped to `channel`
    pub fn issue_for_channel(
        &self,
        channel: &str,
        uid: &str,
        role: Option<&str>,
        ttl_seconds: Option<i64>,
    ) -> Result<Credential> {
        let signer = self.signer()?;
        let channel = validate_channel(channel)?;
        let uid = validate_uid(uid)?;

        let resolution = RoleResolution::resolve(role, self.settings.default_role);
        if let RoleResolution::Downgraded(granted) = resolution {
            warn!(
                "Unrecognized role {:?} for uid {} on {}; granting {}",
                role.unwrap_or_default(),
                uid,
                channel,
                granted
            );
        }
        let role = resolution.role();

        let ttl = self.settings.ttl.apply(ttl_seconds);
        let issued_at = Utc::now().trunc_subsecs(0);
        let expires_at = issued_at + Duration::seconds(ttl as i64);

        let media_token = signer.sign(&TokenClaims::new(
            uid,
            Some(channel),
            Some(role),
            TokenKind::Media,
            issued_at,
            expires_at,
        ))?;
        let signaling_token = signer.sign(&TokenClaims::new(
            uid,
            Some(channel),
            None,
            TokenKind::Signaling,
            issued_at,
            expires_at,
        ))?;

        counter!("intercom_credentials_issued_total", "kind" => "channel").increment(1);
        debug!("Issued {} credential for {} on {} ({}s)", role, uid, channel, ttl);

        Ok(Credential {
            channel_name: channel.to_string(),
            uid: uid.to_string(),
            role,
            issued_at,
            expires_at,
            ttl_seconds: ttl,
            media_token,
            signaling_token,
        })
    }

    /// Credential pair for a member of a call that is still live
    pub async fn issue_for_call(
        &self,
        call_id: &CallId,
        uid: &str,
        role: Option<&str>,
    ) -> Result<Credential> {
        let uid = validate_uid(uid)?;
        let call = self
            .calls
            .find_by_id(call_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("call {}", call_id)))?;

        match call.status {
            CallStatus::Calling | CallStatus::Answered => {}
            CallStatus::Declined | CallStatus::Missed | CallStatus::Ended => {
                return Err(DomainError::Validation(format!(
                    "call {} is {}",
                    call_id, call.status
                )));
            }
        }

        let participants = self.calls.participants(call_id).await?;
        if !call.admits(uid, &participants) {
            warn!("Rejected credential request for call {} from non-member", call_id);
            return Err(DomainError::Forbidden(
                "uid is not a member of this call".to_string(),
            ));
        }

        info!("Issuing call credential for {} on call {}", uid, call_id);
        self.issue_for_channel(&call.channel_name, uid, role, None)
    }

    /// Signaling-only credential for a callee waiting for invitations
    pub fn issue_for_standby(&self, uid: &str, ttl_seconds: Option<i64>) -> Result<StandbyCredential> {
        let signer = self.signer()?;
        let uid = validate_uid(uid)?;

        let ttl = self.settings.standby_ttl.apply(ttl_seconds);
        let issued_at = Utc::now().trunc_subsecs(0);
        let expires_at = issued_at + Duration::seconds(ttl as i64);

        let signaling_token = signer.sign(&TokenClaims::new(
            uid,
            None,
            None,
            TokenKind::Signaling,
            issued_at,
            expires_at,
        ))?;

        counter!("intercom_credentials_issued_total", "kind" => "standby").increment(1);

        Ok(StandbyCredential {
            uid: uid.to_string(),
            issued_at,
            expires_at,
            ttl_seconds: ttl,
            signaling_token,
        })
    }

    /// Batch issuance; malformed entries are skipped, not fatal
    pub fn issue_for_participants(
        &self,
        channel: &str,
        grants: &[ParticipantGrant],
        ttl_seconds: Option<i64>,
    ) -> Result<BatchIssuance> {
        self.signer()?;
        let channel = validate_channel(channel)?;

        let mut batch = BatchIssuance::default();
        for (index, grant) in grants.iter().enumerate() {
            let uid = match &grant.uid {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(u)) if !u.trim().is_empty() => Some(u.as_str()),
                Some(serde_json::Value::String(_)) => None,
                Some(_) => {
                    batch.skipped.push(SkippedGrant {
                        index,
                        reason: "uid must be a non-empty string".to_string(),
                    });
                    continue;
                }
            };
            let Some(uid) = uid else {
                batch.skipped.push(SkippedGrant {
                    index,
                    reason: "missing uid".to_string(),
                });
                continue;
            };

            match self.issue_for_channel(
                channel,
                uid,
                grant.role.as_deref(),
                grant.ttl_seconds.or(ttl_seconds),
            ) {
                Ok(credential) => batch.issued.push(credential),
                Err(DomainError::Validation(reason)) => {
                    batch.skipped.push(SkippedGrant { index, reason });
                }
                Err(e) => return Err(e),
            }
        }

        if !batch.skipped.is_empty() {
            debug!(
                "Batch for {}: {} issued, {} skipped",
                channel,
                batch.issued.len(),
                batch.skipped.len()
            );
        }
        Ok(batch)
    }

    /// Check a media token, optionally against an expected channel and uid
    pub fn validate(
        &self,
        token: &str,
        channel: Option<&str>,
        uid: Option<&str>,
    ) -> Result<TokenValidation> {
        let signer = self.signer()?;

        let claims = match signer.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("Token rejected: {}", e);
                return Ok(TokenValidation::rejected("invalid token"));
            }
        };

        if claims.kind != TokenKind::Media {
            return Ok(TokenValidation::rejected("not a media token"));
        }
        if claims.is_expired_at(Utc::now()) {
            return Ok(TokenValidation::rejected("expired"));
        }
        if let Some(expected) = channel {
            if claims.chn.as_deref() != Some(expected) {
                return Ok(TokenValidation::rejected("channel mismatch"));
            }
        }
        if let Some(expected) = uid {
            if claims.sub != expected {
                return Ok(TokenValidation::rejected("uid mismatch"));
            }
        }

        Ok(TokenValidation {
            valid: true,
            expires_at: DateTime::from_timestamp(claims.exp, 0),
            uid: Some(claims.sub),
            channel: claims.chn,
            reason: None,
        })
    }
}

fn validate_channel(channel: &str) -> Result<&str> {
    let channel = channel.trim();
    if channel.is_empty() {
        return Err(DomainError::Validation("channel is required".to_string()));
    }
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(DomainError::Validation(format!(
            "channel exceeds {} bytes",
            MAX_CHANNEL_LEN
        )));
    }
    Ok(channel)
}

fn validate_uid(uid: &str) -> Result<&str> {
    let uid = uid.trim();
    if uid.is_empty() {
        return Err(DomainError::Validation("uid is required".to_string()));
    }
    Ok(uid)
}
