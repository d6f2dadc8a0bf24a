//! Credential API handlers
//!
//! Mounted behind the access gate; every handler sees a verified identity.

use super::dto::{ApiError, ApiResponse};
use super::extract::ApiJson;
use super::state::AppState;
use crate::application::TokenValidation;
use crate::domain::access::VerifiedIdentity;
use crate::domain::credential::{BatchIssuance, Credential, ParticipantGrant, StandbyCredential};
use crate::domain::shared::value_objects::CallId;
use crate::domain::DomainError;
use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use tracing::info;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, DomainError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DomainError::Validation(format!("{} is required", field)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(alias = "channelName")]
    pub channel: Option<String>,
    pub uid: Option<String>,
    pub role: Option<String>,
    #[serde(alias = "ttl_seconds")]
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateMultipleRequest {
    #[serde(alias = "channelName")]
    pub channel: Option<String>,
    #[serde(default)]
    pub participants: Vec<ParticipantGrant>,
    #[serde(alias = "ttl_seconds")]
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForCallRequest {
    pub call_id: Option<String>,
    pub uid: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandbyRequest {
    pub uid: Option<String>,
    #[serde(alias = "ttl_seconds")]
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub token: Option<String>,
    #[serde(alias = "channelName")]
    pub channel: Option<String>,
    pub uid: Option<String>,
}

pub async fn generate_token(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
    ApiJson(req): ApiJson<GenerateRequest>,
) -> ApiResult<Credential> {
    let issue = || -> Result<Credential, DomainError> {
        let channel = required(&req.channel, "channel")?;
        let uid = required(&req.uid, "uid")?;
        info!("API: {} requesting credential for {} on {}", identity.subject, uid, channel);
        state
            .credentials
            .issue_for_channel(channel, uid, req.role.as_deref(), req.ttl_seconds)
    };
    let credential = issue().map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(credential)))
}

pub async fn generate_multiple_tokens(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
    ApiJson(req): ApiJson<GenerateMultipleRequest>,
) -> ApiResult<BatchIssuance> {
    let issue = || -> Result<BatchIssuance, DomainError> {
        let channel = required(&req.channel, "channel")?;
        if req.participants.is_empty() {
            return Err(DomainError::Validation(
                "participants must not be empty".to_string(),
            ));
        }
        info!(
            "API: {} requesting {} credentials on {}",
            identity.subject,
            req.participants.len(),
            channel
        );
        state
            .credentials
            .issue_for_participants(channel, &req.participants, req.ttl_seconds)
    };
    let batch = issue().map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(batch)))
}

fn parse_for_call(req: &ForCallRequest) -> Result<(CallId, &str), DomainError> {
    let call_id = required(&req.call_id, "callId")?
        .parse()
        .map_err(|_| DomainError::Validation("callId must be a UUID".to_string()))?;
    Ok((call_id, required(&req.uid, "uid")?))
}

pub async fn token_for_call(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
    ApiJson(req): ApiJson<ForCallRequest>,
) -> ApiResult<Credential> {
    let (call_id, uid) = parse_for_call(&req).map_err(|e| state.reject(e))?;
    info!("API: {} requesting credential for {} on call {}", identity.subject, uid, call_id);

    let credential = state
        .credentials
        .issue_for_call(&call_id, uid, req.role.as_deref())
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(credential)))
}

pub async fn standby_token(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
    ApiJson(req): ApiJson<StandbyRequest>,
) -> ApiResult<StandbyCredential> {
    let issue = || -> Result<StandbyCredential, DomainError> {
        let uid = required(&req.uid, "uid")?;
        info!("API: {} requesting standby credential for {}", identity.subject, uid);
        state.credentials.issue_for_standby(uid, req.ttl_seconds)
    };
    let credential = issue().map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(credential)))
}

pub async fn validate_token(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ValidateRequest>,
) -> ApiResult<TokenValidation> {
    let check = || -> Result<TokenValidation, DomainError> {
        let token = required(&req.token, "token")?;
        state
            .credentials
            .validate(token, req.channel.as_deref(), req.uid.as_deref())
    };
    let validation = check().map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(validation)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_trims() {
        assert_eq!(required(&Some(" call-1 ".to_string()), "channel").unwrap(), "call-1");
        assert!(matches!(
            required(&Some("  ".to_string()), "uid"),
            Err(DomainError::Validation(m)) if m == "uid is required"
        ));
        assert!(required(&None, "uid").is_err());
    }

    #[test]
    fn test_request_accepts_both_ttl_spellings() {
        let camel: GenerateRequest =
            serde_json::from_str(r#"{"channel":"c","uid":"u","ttlSeconds":60}"#).unwrap();
        let snake: GenerateRequest =
            serde_json::from_str(r#"{"channelName":"c","uid":"u","ttl_seconds":60}"#).unwrap();
        assert_eq!(camel.ttl_seconds, Some(60));
        assert_eq!(snake.ttl_seconds, Some(60));
        assert_eq!(snake.channel.as_deref(), Some("c"));
    }
}
