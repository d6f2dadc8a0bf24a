//! Call lifecycle use cases
//!
//! Every state change goes through a conditional update on the store; the
//! manager never decides a race from a prior read. Every path that leaves
//! `calling` ends in `NotificationFanoutLoop::stop`.

use crate::application::credentials::CredentialIssuer;
use crate::application::fanout::{IncomingCall, NotificationFanoutLoop, RingTarget};
use crate::domain::call::{
    Call, CallFilters, CallRepository, CallStatus, CallTransition, Participant, ParticipantScope,
    ParticipantStatus, ParticipantTransition,
};
use crate::domain::credential::{Credential, CredentialRole};
use crate::domain::directory::{Apartment, ApartmentRef, Callee, ParticipantDirectory, Party};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{BuildingId, CallId, PartyId, PartyKind};
use crate::domain::DomainError;
use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Most calls a resident's app is shown as still ringing
const PENDING_LIMIT: i64 = 5;
const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;
const ACTIVE_LIMIT: i64 = 100;

/// Request to open a call
#[derive(Debug, Clone, PartialEq)]
pub struct StartCall {
    pub initiator_id: PartyId,
    pub initiator_type: PartyKind,
    /// Required for doormen; residents default to their own apartment
    pub apartment: Option<ApartmentRef>,
    pub building_id: Option<BuildingId>,
    /// Resident calls only: ring this doorman instead of everyone on duty
    pub doorman_id: Option<PartyId>,
    pub schema_version: Option<u32>,
    pub client_version: Option<String>,
    pub context: Option<Value>,
}

impl StartCall {
    pub fn new(initiator_id: PartyId, initiator_type: PartyKind) -> Self {
        Self {
            initiator_id,
            initiator_type,
            apartment: None,
            building_id: None,
            doorman_id: None,
            schema_version: None,
            client_version: None,
            context: None,
        }
    }
}

/// Signaling invite a client with an open session can ring on directly
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInvite {
    pub t: &'static str,
    pub v: u32,
    pub call_id: CallId,
    pub from: PartyId,
    pub channel: String,
    /// Milliseconds since the epoch
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Public view of a callee; device addresses stay private
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalleeSummary {
    pub id: PartyId,
    pub kind: PartyKind,
    pub name: Option<String>,
    pub push_eligible: bool,
}

impl From<&Callee> for CalleeSummary {
    fn from(callee: &Callee) -> Self {
        Self {
            id: callee.id,
            kind: callee.kind,
            name: callee.name.clone(),
            push_eligible: callee.is_reachable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedCall {
    pub call: Call,
    pub participants: Vec<Participant>,
    pub apartment: Apartment,
    pub initiator: Party,
    pub callees: Vec<CalleeSummary>,
    pub invite: CallInvite,
    pub invite_targets: Vec<PartyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsweredCall {
    pub call: Call,
    pub participants: Vec<Participant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclinedCall {
    pub call: Call,
    pub all_declined: bool,
}

/// A call with its membership records
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub call: Call,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistory {
    pub calls: Vec<Call>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Owner of the Call/Participant state machine
pub struct CallLifecycleManager {
    calls: Arc<dyn CallRepository>,
    directory: Arc<dyn ParticipantDirectory>,
    fanout: Arc<NotificationFanoutLoop>,
    credentials: Arc<CredentialIssuer>,
}

impl CallLifecycleManager {
    pub fn new(
        calls: Arc<dyn CallRepository>,
        directory: Arc<dyn ParticipantDirectory>,
        fanout: Arc<NotificationFanoutLoop>,
        credentials: Arc<CredentialIssuer>,
    ) -> Self {
        Self {
            calls,
            directory,
            fanout,
            credentials,
        }
    }

    pub fn fanout(&self) -> &NotificationFanoutLoop {
        &self.fanout
    }

    /// Open a call and start ringing its callees
    pub async fn start(&self, request: StartCall) -> Result<StartedCall> {
        let apartment = self.resolve_apartment(&request).await?;

        let initiator = self
            .directory
            .find_party(&request.initiator_id, request.initiator_type)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound(format!(
                    "{} {}",
                    request.initiator_type, request.initiator_id
                ))
            })?;

        let mut callees = self.resolve_callees(&request, &apartment).await?;
        callees.retain(|c| c.id != request.initiator_id);
        if callees.is_empty() {
            return Err(DomainError::Validation(format!(
                "no {} available to receive this call",
                match request.initiator_type.callee_kind() {
                    PartyKind::Doorman => "doormen",
                    PartyKind::Resident => "residents",
                }
            )));
        }

        let call = Call::new(
            apartment.id,
            apartment.building_id,
            request.initiator_id,
            request.initiator_type,
        );
        let mut participants = Vec::with_capacity(callees.len() + 1);
        participants.push(Participant::initiator(
            call.id,
            call.initiator_id,
            call.initiator_type,
            call.started_at,
        ));
        participants.extend(
            callees
                .iter()
                .map(|c| Participant::callee(call.id, c.id, c.kind)),
        );

        self.calls.create(&call, &participants).await?;
        counter!("intercom_calls_started_total", "initiator" => call.initiator_type.as_str())
            .increment(1);
        info!(
            "Call {} started by {} {} for apartment {} ({} callees)",
            call.id,
            call.initiator_type,
            call.initiator_id,
            apartment.number,
            callees.len()
        );

        let targets: Vec<RingTarget> = callees
            .iter()
            .filter(|c| c.is_reachable())
            .filter_map(|c| {
                c.device_address.as_ref().map(|address| RingTarget {
                    callee_id: c.id,
                    device_address: address.clone(),
                })
            })
            .collect();
        if targets.is_empty() {
            warn!(
                "Call {}: no callee can receive push; ringing relies on open signaling sessions",
                call.id
            );
        }
        self.fanout.start(
            IncomingCall {
                call_id: call.id,
                building_id: call.building_id,
                channel_name: call.channel_name.clone(),
                caller_id: call.initiator_id,
                caller_kind: call.initiator_type,
                caller_name: initiator.display_name().to_string(),
                apartment_number: apartment.number.clone(),
            },
            targets,
        );

        let credential = self.bundle_credential(&call, &call.initiator_id);
        let invite = CallInvite {
            t: "INVITE",
            v: request.schema_version.unwrap_or(1),
            call_id: call.id,
            from: call.initiator_id,
            channel: call.channel_name.clone(),
            ts: Utc::now().timestamp_millis(),
            client_version: request.client_version,
            context: request.context,
        };

        Ok(StartedCall {
            invite_targets: callees.iter().map(|c| c.id).collect(),
            callees: callees.iter().map(CalleeSummary::from).collect(),
            call,
            participants,
            apartment,
            initiator,
            invite,
            credential,
        })
    }

    async fn resolve_apartment(&self, request: &StartCall) -> Result<Apartment> {
        let reference = match (&request.apartment, request.initiator_type) {
            (Some(reference), _) => reference.clone(),
            (None, PartyKind::Resident) => {
                let apartment_id = self
                    .directory
                    .resolve_apartment_for_resident(&request.initiator_id)
                    .await?
                    .ok_or_else(|| {
                        DomainError::NotFound(format!(
                            "apartment of resident {}",
                            request.initiator_id
                        ))
                    })?;
                ApartmentRef::Id(apartment_id)
            }
            (None, PartyKind::Doorman) => {
                return Err(DomainError::Validation(
                    "apartmentId or apartmentNumber is required".to_string(),
                ));
            }
        };

        let apartment = self
            .directory
            .find_apartment(&reference)
            .await?
            .ok_or_else(|| DomainError::NotFound("apartment".to_string()))?;

        if let Some(building_id) = request.building_id {
            if apartment.building_id != building_id {
                return Err(DomainError::Validation(format!(
                    "apartment {} does not belong to building {}",
                    apartment.number, building_id
                )));
            }
        }
        Ok(apartment)
    }

    /// Doormen ring the apartment's residents; residents ring the front desk
    async fn resolve_callees(&self, request: &StartCall, apartment: &Apartment) -> Result<Vec<Callee>> {
        match request.initiator_type {
            PartyKind::Doorman => {
                self.directory
                    .resolve_callees_for_apartment(&apartment.id)
                    .await
            }
            PartyKind::Resident => {
                let mut doormen = self
                    .directory
                    .resolve_on_duty_doormen(&apartment.building_id)
                    .await?;
                if let Some(doorman_id) = request.doorman_id {
                    doormen.retain(|d| d.id == doorman_id);
                    if doormen.is_empty() {
                        return Err(DomainError::NotFound(format!(
                            "doorman {} on duty",
                            doorman_id
                        )));
                    }
                }
                Ok(doormen)
            }
        }
    }

    fn bundle_credential(&self, call: &Call, uid: &PartyId) -> Option<Credential> {
        if !self.credentials.is_configured() {
            warn!("Call {}: media signing not configured, no credential bundled", call.id);
            return None;
        }
        match self.credentials.issue_for_channel(
            &call.channel_name,
            &uid.to_string(),
            Some(CredentialRole::Publisher.as_str()),
            None,
        ) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Call {}: credential bundle failed: {}", call.id, e);
                None
            }
        }
    }

    /// First conditional answer wins; everyone else still ringing is missed
    pub async fn answer(
        &self,
        call_id: &CallId,
        participant_id: &PartyId,
        participant_type: PartyKind,
    ) -> Result<AnsweredCall> {
        let call = self.load(call_id).await?;
        let participants = self.calls.participants(call_id).await?;
        let member = find_member(&participants, participant_id, participant_type)?;

        if call.initiator_id == *participant_id {
            return Err(DomainError::Validation(
                "the initiator cannot answer their own call".to_string(),
            ));
        }
        if !member.status.is_eligible() {
            return Err(DomainError::Conflict(format!(
                "participant already {}",
                member.status
            )));
        }

        let now = Utc::now();
        let call = self
            .calls
            .transition(call_id, CallTransition::Answer { at: now })
            .await?
            .ok_or_else(|| DomainError::Conflict("call no longer available".to_string()))?;

        // The winner is durable from here on
        let connected = self
            .calls
            .transition_participants(
                call_id,
                &ParticipantTransition::new(
                    ParticipantScope::Only(*participant_id),
                    ParticipantStatus::Connected,
                )
                .when_in(&ParticipantStatus::ELIGIBLE)
                .joined(now),
            )
            .await?;
        if connected == 0 {
            // A concurrent end already settled the participants
            let current = self.load(call_id).await?;
            warn!(
                "Call {} was {} before {} {} could connect",
                call_id, current.status, participant_type, participant_id
            );
            self.fanout.stop(call_id);
            return Ok(AnsweredCall {
                participants: self.calls.participants(call_id).await?,
                call: current,
                credential: None,
            });
        }

        let losers = match participant_type {
            PartyKind::Resident => "other residents",
            PartyKind::Doorman => "other doormen",
        };
        let missed = self
            .calls
            .transition_participants(
                call_id,
                &ParticipantTransition::new(
                    ParticipantScope::AllExcept(*participant_id),
                    ParticipantStatus::Missed,
                )
                .when_in(&ParticipantStatus::ELIGIBLE),
            )
            .await?;

        self.fanout.stop(call_id);
        counter!("intercom_calls_answered_total").increment(1);
        info!(
            "Call {} answered by {} {} ({} {} marked missed)",
            call_id, participant_type, participant_id, missed, losers
        );

        let credential = self.bundle_credential(&call, participant_id);
        Ok(AnsweredCall {
            participants: self.calls.participants(call_id).await?,
            call,
            credential,
        })
    }

    /// Decline for one callee; the call is declined once every callee has
    pub async fn decline(
        &self,
        call_id: &CallId,
        participant_id: &PartyId,
        participant_type: PartyKind,
    ) -> Result<DeclinedCall> {
        let call = self.load(call_id).await?;
        if call.status != CallStatus::Calling {
            return Err(DomainError::Conflict(format!("call is {}", call.status)));
        }

        let participants = self.calls.participants(call_id).await?;
        find_member(&participants, participant_id, participant_type)?;
        if call.initiator_id == *participant_id {
            return Err(DomainError::Forbidden(
                "the initiator ends a call instead of declining it".to_string(),
            ));
        }

        let now = Utc::now();
        let declined = self
            .calls
            .transition_participants(
                call_id,
                &ParticipantTransition::new(
                    ParticipantScope::Only(*participant_id),
                    ParticipantStatus::Declined,
                )
                .when_in(&ParticipantStatus::ELIGIBLE)
                .left(now),
            )
            .await?;
        if declined == 0 {
            return Err(DomainError::Conflict(
                "participant can no longer decline".to_string(),
            ));
        }

        let participants = self.calls.participants(call_id).await?;
        let all_declined = participants
            .iter()
            .filter(|p| !p.is(&call.initiator_id))
            .all(|p| p.status == ParticipantStatus::Declined);

        if !all_declined {
            self.fanout.withdraw(call_id, participant_id).await;
            debug!("Call {}: {} declined, others still ringing", call_id, participant_id);
            return Ok(DeclinedCall {
                call,
                all_declined,
            });
        }

        let call = match self
            .calls
            .transition(call_id, CallTransition::Decline { at: now })
            .await?
        {
            Some(call) => {
                counter!("intercom_calls_declined_total").increment(1);
                info!("Call {} declined by every callee", call_id);
                call
            }
            None => self.load(call_id).await?,
        };
        self.fanout.stop(call_id);

        Ok(DeclinedCall {
            call,
            all_declined,
        })
    }

    /// Idempotent: a call that is already terminal is returned unchanged
    pub async fn end(
        &self,
        call_id: &CallId,
        actor_id: &PartyId,
        actor_type: PartyKind,
    ) -> Result<CallSnapshot> {
        let call = self.load(call_id).await?;
        if call.is_terminal() {
            self.fanout.stop(call_id);
            return Ok(CallSnapshot {
                participants: self.calls.participants(call_id).await?,
                call,
            });
        }

        let participants = self.calls.participants(call_id).await?;
        find_member(&participants, actor_id, actor_type)?;

        let now = Utc::now();
        let call = match self
            .calls
            .transition(call_id, CallTransition::End { at: now })
            .await?
        {
            Some(call) => call,
            None => {
                // Lost to a concurrent terminal transition
                let current = self.load(call_id).await?;
                if !current.is_terminal() {
                    return Err(DomainError::Conflict(format!(
                        "call is {}",
                        current.status
                    )));
                }
                self.fanout.stop(call_id);
                return Ok(CallSnapshot {
                    participants: self.calls.participants(call_id).await?,
                    call: current,
                });
            }
        };

        self.calls
            .transition_participants(
                call_id,
                &ParticipantTransition::new(
                    ParticipantScope::Only(*actor_id),
                    ParticipantStatus::Disconnected,
                )
                .left(now),
            )
            .await?;
        self.calls
            .transition_participants(
                call_id,
                &ParticipantTransition::new(
                    ParticipantScope::AllExcept(*actor_id),
                    ParticipantStatus::Disconnected,
                )
                .when_in(&ParticipantStatus::LIVE_ON_END)
                .left(now),
            )
            .await?;
        // Invited or notified callees never picked up
        self.calls
            .transition_participants(
                call_id,
                &ParticipantTransition::new(
                    ParticipantScope::AllExcept(*actor_id),
                    ParticipantStatus::Missed,
                )
                .when_in(&ParticipantStatus::ELIGIBLE),
            )
            .await?;

        self.fanout.stop(call_id);
        counter!("intercom_calls_ended_total").increment(1);
        info!(
            "Call {} ended by {} {} after {}s",
            call_id,
            actor_type,
            actor_id,
            call.duration_seconds.unwrap_or_default()
        );

        Ok(CallSnapshot {
            participants: self.calls.participants(call_id).await?,
            call,
        })
    }

    /// Ring deadline elapsed; `None` when another transition got there first
    pub async fn mark_missed(&self, call_id: &CallId) -> Result<Option<Call>> {
        let now = Utc::now();
        let outcome = self
            .calls
            .transition(call_id, CallTransition::Miss { at: now })
            .await?;
        self.fanout.stop(call_id);

        let Some(call) = outcome else {
            debug!("Call {} already resolved before its ring deadline", call_id);
            return Ok(None);
        };

        self.calls
            .transition_participants(
                call_id,
                &ParticipantTransition::new(ParticipantScope::All, ParticipantStatus::Missed)
                    .when_in(&ParticipantStatus::ELIGIBLE),
            )
            .await?;

        counter!("intercom_calls_missed_total").increment(1);
        info!("Call {} missed: nobody answered", call_id);
        Ok(Some(call))
    }

    pub async fn get_status(&self, call_id: &CallId) -> Result<CallSnapshot> {
        let call = self.load(call_id).await?;
        Ok(CallSnapshot {
            participants: self.calls.participants(call_id).await?,
            call,
        })
    }

    pub async fn get_history(
        &self,
        filters: &CallFilters,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<CallHistory> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.unwrap_or(0).max(0);

        let calls = self.calls.list(filters, limit, offset).await?;
        let total = self.calls.count(filters).await?;
        Ok(CallHistory {
            calls,
            total,
            limit,
            offset,
        })
    }

    /// Calls still ringing or in conversation
    pub async fn get_active(&self, building_id: Option<BuildingId>) -> Result<Vec<CallSnapshot>> {
        let filters = CallFilters {
            building_id,
            statuses: vec![CallStatus::Calling, CallStatus::Answered],
            ..Default::default()
        };
        let calls = self.calls.list(&filters, ACTIVE_LIMIT, 0).await?;

        let mut active = Vec::with_capacity(calls.len());
        for call in calls {
            active.push(CallSnapshot {
                participants: self.calls.participants(&call.id).await?,
                call,
            });
        }
        Ok(active)
    }

    /// Calls still ringing for the resident's apartment, newest first
    pub async fn pending_for_resident(&self, resident_id: &PartyId) -> Result<Vec<Call>> {
        let apartment_id = self
            .directory
            .resolve_apartment_for_resident(resident_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("apartment of resident {}", resident_id)))?;

        let filters = CallFilters {
            apartment_id: Some(apartment_id),
            statuses: vec![CallStatus::Calling],
            ..Default::default()
        };
        self.calls.list(&filters, PENDING_LIMIT, 0).await
    }

    /// Mark missed the calls whose ring deadline passed without a live loop,
    /// e.g. after a restart
    pub async fn reconcile_stale(&self) -> Result<usize> {
        let ring_timeout = self.fanout.settings().ring_timeout;
        let cutoff = Utc::now()
            - ChronoDuration::from_std(ring_timeout)
                .map_err(|e| DomainError::Internal(format!("ring timeout: {}", e)))?;

        let mut reconciled = 0;
        for call_id in self.calls.ringing_since_before(cutoff).await? {
            if self.fanout.is_active(&call_id) {
                continue;
            }
            if self.mark_missed(&call_id).await?.is_some() {
                reconciled += 1;
            }
        }
        if reconciled > 0 {
            info!("Reconciled {} stale ringing calls as missed", reconciled);
        }
        Ok(reconciled)
    }

    /// Consume ring-deadline notifications from the fan-out loop
    pub fn spawn_timeout_worker(
        self: Arc<Self>,
        mut timeouts: mpsc::UnboundedReceiver<CallId>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(call_id) = timeouts.recv().await {
                if let Err(e) = self.mark_missed(&call_id).await {
                    error!("Failed to mark call {} missed: {}", call_id, e);
                }
            }
            debug!("Ring deadline channel closed");
        })
    }

    async fn load(&self, call_id: &CallId) -> Result<Call> {
        self.calls
            .find_by_id(call_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("call {}", call_id)))
    }
}

fn find_member<'a>(
    participants: &'a [Participant],
    party: &PartyId,
    kind: PartyKind,
) -> Result<&'a Participant> {
    participants
        .iter()
        .find(|p| p.is(party) && p.participant_type == kind)
        .ok_or_else(|| DomainError::Forbidden("not a participant of this call".to_string()))
}
