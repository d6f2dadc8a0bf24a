//! Call API handlers

use super::dto::{ApiError, ApiResponse};
use super::extract::ApiJson;
use super::state::AppState;
use crate::application::{
    AnsweredCall, CallHistory, CallSnapshot, DeclinedCall, StartCall, StartedCall,
};
use crate::domain::call::{Call, CallFilters, CallStatus, Participant};
use crate::domain::directory::ApartmentRef;
use crate::domain::shared::value_objects::{BuildingId, CallId, PartyId, PartyKind};
use crate::domain::DomainError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tracing::info;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Parse a required UUID field
fn required_id<T: FromStr>(raw: Option<&str>, field: &str) -> Result<T, DomainError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DomainError::Validation(format!("{} is required", field)))?;
    raw.parse()
        .map_err(|_| DomainError::Validation(format!("{} must be a UUID", field)))
}

fn optional_id<T: FromStr>(raw: Option<&str>, field: &str) -> Result<Option<T>, DomainError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => required_id(Some(value), field).map(Some),
        None => Ok(None),
    }
}

fn party_kind(raw: Option<&str>, field: &str) -> Result<PartyKind, DomainError> {
    let raw = raw.ok_or_else(|| DomainError::Validation(format!("{} is required", field)))?;
    PartyKind::parse(raw).ok_or_else(|| {
        DomainError::Validation(format!("{} must be 'doorman' or 'resident'", field))
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCallRequest {
    pub apartment_id: Option<String>,
    pub apartment_number: Option<String>,
    pub building_id: Option<String>,
    #[serde(alias = "doormanId")]
    pub initiator_id: Option<String>,
    pub initiator_type: Option<String>,
    /// Resident calls: ring only this doorman
    pub target_doorman_id: Option<String>,
    pub schema_version: Option<u32>,
    pub client_version: Option<String>,
    pub context: Option<Value>,
}

impl StartCallRequest {
    fn into_command(self) -> Result<StartCall, DomainError> {
        let initiator_id: PartyId = required_id(self.initiator_id.as_deref(), "initiatorId")?;
        let initiator_type = match self.initiator_type.as_deref() {
            Some(raw) => party_kind(Some(raw), "initiatorType")?,
            None => PartyKind::Doorman,
        };
        let building_id: Option<BuildingId> =
            optional_id(self.building_id.as_deref(), "buildingId")?;

        let apartment = match (
            optional_id(self.apartment_id.as_deref(), "apartmentId")?,
            self.apartment_number
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty()),
        ) {
            (Some(id), _) => Some(ApartmentRef::Id(id)),
            (None, Some(number)) => {
                let building_id = building_id.ok_or_else(|| {
                    DomainError::Validation(
                        "buildingId is required with apartmentNumber".to_string(),
                    )
                })?;
                Some(ApartmentRef::Number {
                    number: number.to_string(),
                    building_id,
                })
            }
            (None, None) => None,
        };

        let mut command = StartCall::new(initiator_id, initiator_type);
        command.apartment = apartment;
        command.building_id = building_id;
        command.doorman_id = optional_id(self.target_doorman_id.as_deref(), "doormanId")?;
        command.schema_version = self.schema_version;
        command.client_version = self.client_version;
        command.context = self.context;
        Ok(command)
    }
}

/// Body of the resident → front desk alias
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDoormanRequest {
    pub resident_id: Option<String>,
    pub building_id: Option<String>,
    pub apartment_id: Option<String>,
    pub doorman_id: Option<String>,
    pub schema_version: Option<u32>,
    pub client_version: Option<String>,
    pub context: Option<Value>,
}

impl From<CallDoormanRequest> for StartCallRequest {
    fn from(req: CallDoormanRequest) -> Self {
        Self {
            apartment_id: req.apartment_id,
            apartment_number: None,
            building_id: req.building_id,
            initiator_id: req.resident_id,
            initiator_type: Some(PartyKind::Resident.as_str().to_string()),
            target_doorman_id: req.doorman_id,
            schema_version: req.schema_version,
            client_version: req.client_version,
            context: req.context,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRequest {
    pub participant_id: Option<String>,
    pub participant_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallRequest {
    pub actor_id: Option<String>,
    pub actor_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EndCallResponse {
    pub call: Call,
    pub participants: Vec<Participant>,
    /// Seconds
    pub duration: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub building_id: Option<String>,
    pub apartment_id: Option<String>,
    pub initiator_id: Option<String>,
    pub initiator_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveQuery {
    pub building_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuery {
    pub resident_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallList<T> {
    pub calls: Vec<T>,
    pub count: usize,
}

impl<T> From<Vec<T>> for CallList<T> {
    fn from(calls: Vec<T>) -> Self {
        Self {
            count: calls.len(),
            calls,
        }
    }
}

fn call_id(raw: &str) -> Result<CallId, DomainError> {
    required_id(Some(raw), "callId")
}

/// Open a call
pub async fn start_call(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StartCallRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StartedCall>>), ApiError> {
    let command = req.into_command().map_err(|e| state.reject(e))?;
    info!(
        "API: {} {} starting a call",
        command.initiator_type, command.initiator_id
    );

    let started = state
        .calls
        .start(command)
        .await
        .map_err(|e| state.reject(e))?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(started))))
}

/// Resident calls the front desk
pub async fn call_doorman(
    state: State<AppState>,
    ApiJson(req): ApiJson<CallDoormanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StartedCall>>), ApiError> {
    start_call(state, ApiJson(req.into())).await
}

pub async fn answer_call(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    ApiJson(req): ApiJson<ParticipantRequest>,
) -> ApiResult<AnsweredCall> {
    let (id, participant, kind) = parse_participant(&raw_id, &req).map_err(|e| state.reject(e))?;
    info!("API: {} {} answering call {}", kind, participant, id);

    let answered = state
        .calls
        .answer(&id, &participant, kind)
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(answered)))
}

pub async fn decline_call(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    ApiJson(req): ApiJson<ParticipantRequest>,
) -> ApiResult<DeclinedCall> {
    let (id, participant, kind) = parse_participant(&raw_id, &req).map_err(|e| state.reject(e))?;
    info!("API: {} {} declining call {}", kind, participant, id);

    let declined = state
        .calls
        .decline(&id, &participant, kind)
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(declined)))
}

fn parse_participant(
    raw_id: &str,
    req: &ParticipantRequest,
) -> Result<(CallId, PartyId, PartyKind), DomainError> {
    Ok((
        call_id(raw_id)?,
        required_id(req.participant_id.as_deref(), "participantId")?,
        party_kind(req.participant_type.as_deref(), "participantType")?,
    ))
}

pub async fn end_call(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    ApiJson(req): ApiJson<EndCallRequest>,
) -> ApiResult<EndCallResponse> {
    let parsed = (|| -> Result<_, DomainError> {
        Ok((
            call_id(&raw_id)?,
            required_id::<PartyId>(req.actor_id.as_deref(), "actorId")?,
            party_kind(req.actor_type.as_deref(), "actorType")?,
        ))
    })();
    let (id, actor, kind) = parsed.map_err(|e| state.reject(e))?;
    info!("API: {} {} ending call {}", kind, actor, id);

    let CallSnapshot { call, participants } = state
        .calls
        .end(&id, &actor, kind)
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(EndCallResponse {
        duration: call.duration_seconds,
        call,
        participants,
    })))
}

pub async fn get_call_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<CallSnapshot> {
    let id = call_id(&raw_id).map_err(|e| state.reject(e))?;
    let snapshot = state
        .calls
        .get_status(&id)
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(snapshot)))
}

pub async fn get_call_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<CallHistory> {
    let filters = (|| -> Result<_, DomainError> {
        Ok(CallFilters {
            building_id: optional_id(query.building_id.as_deref(), "buildingId")?,
            apartment_id: optional_id(query.apartment_id.as_deref(), "apartmentId")?,
            initiator_id: optional_id(query.initiator_id.as_deref(), "initiatorId")?,
            initiator_type: query
                .initiator_type
                .as_deref()
                .map(|raw| party_kind(Some(raw), "initiatorType"))
                .transpose()?,
            statuses: match query.status.as_deref() {
                Some(raw) => raw
                    .split(',')
                    .map(|s| {
                        CallStatus::from_str(s.trim()).ok_or_else(|| {
                            DomainError::Validation(format!("unknown call status '{}'", s.trim()))
                        })
                    })
                    .collect::<Result<_, _>>()?,
                None => Vec::new(),
            },
        })
    })()
    .map_err(|e| state.reject(e))?;

    let history = state
        .calls
        .get_history(&filters, query.limit, query.offset)
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(history)))
}

pub async fn get_active_calls(
    State(state): State<AppState>,
    Query(query): Query<ActiveQuery>,
) -> ApiResult<CallList<CallSnapshot>> {
    let building_id = optional_id(query.building_id.as_deref(), "buildingId")
        .map_err(|e| state.reject(e))?;
    let active = state
        .calls
        .get_active(building_id)
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(active.into())))
}

pub async fn get_pending_calls(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<CallList<Call>> {
    let resident_id: PartyId = required_id(query.resident_id.as_deref(), "residentId")
        .map_err(|e| state.reject(e))?;
    let pending = state
        .calls
        .pending_for_resident(&resident_id)
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(ApiResponse::success(pending.into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_by_number_requires_building() {
        let req = StartCallRequest {
            apartment_number: Some("101".to_string()),
            initiator_id: Some(PartyId::new().to_string()),
            ..Default::default()
        };
        assert!(matches!(
            req.into_command(),
            Err(DomainError::Validation(m)) if m.contains("buildingId")
        ));
    }

    #[test]
    fn test_start_request_defaults_to_doorman() {
        let building = BuildingId::new();
        let req = StartCallRequest {
            apartment_number: Some(" 101 ".to_string()),
            building_id: Some(building.to_string()),
            initiator_id: Some(PartyId::new().to_string()),
            ..Default::default()
        };
        let command = req.into_command().unwrap();
        assert_eq!(command.initiator_type, PartyKind::Doorman);
        assert_eq!(
            command.apartment,
            Some(ApartmentRef::Number {
                number: "101".to_string(),
                building_id: building
            })
        );
    }

    #[test]
    fn test_ids_must_be_uuids() {
        assert!(matches!(
            required_id::<CallId>(Some("abc"), "callId"),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            required_id::<CallId>(None, "callId"),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(optional_id::<CallId>(Some(" "), "callId").unwrap(), None);
        assert!(matches!(
            party_kind(Some("janitor"), "actorType"),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_call_doorman_maps_to_resident_call() {
        let resident = PartyId::new();
        let req: StartCallRequest = CallDoormanRequest {
            resident_id: Some(resident.to_string()),
            ..Default::default()
        }
        .into();
        let command = req.into_command().unwrap();
        assert_eq!(command.initiator_type, PartyKind::Resident);
        assert_eq!(command.initiator_id, resident);
        assert_eq!(command.apartment, None);
    }
}
