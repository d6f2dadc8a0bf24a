//! Call aggregate root

use crate::domain::call::entity::Participant;
use crate::domain::call::value_object::CallStatus;
use crate::domain::shared::value_objects::{ApartmentId, BuildingId, CallId, PartyId, PartyKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One intercom session between an initiator and its callees.
///
/// The row is only ever mutated through the repository's conditional
/// updates; this type carries no mutating methods of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub apartment_id: ApartmentId,
    pub building_id: BuildingId,
    pub initiator_id: PartyId,
    pub initiator_type: PartyKind,
    pub status: CallStatus,
    /// Real-time channel shared by the members of this call
    pub channel_name: String,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

impl Call {
    /// Create a call in its only initial state
    pub fn new(
        apartment_id: ApartmentId,
        building_id: BuildingId,
        initiator_id: PartyId,
        initiator_type: PartyKind,
    ) -> Self {
        let id = CallId::new();
        Self {
            id,
            apartment_id,
            building_id,
            initiator_id,
            initiator_type,
            status: CallStatus::Calling,
            channel_name: Self::channel_for(&id),
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_seconds: None,
        }
    }

    /// Channel names derive from the call id, which is globally unique
    pub fn channel_for(id: &CallId) -> String {
        format!("call-{}", id)
    }

    /// Talk time if answered, ring time otherwise
    pub fn duration_until(&self, now: DateTime<Utc>) -> i64 {
        let from = self.answered_at.unwrap_or(self.started_at);
        (now - from).num_seconds().max(0)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `uid` may join this call's channel
    pub fn admits(&self, uid: &str, participants: &[Participant]) -> bool {
        let uid = uid.trim();
        if self.initiator_id.to_string().eq_ignore_ascii_case(uid) {
            return true;
        }
        participants
            .iter()
            .any(|p| p.participant_id.to_string().eq_ignore_ascii_case(uid))
    }
}
