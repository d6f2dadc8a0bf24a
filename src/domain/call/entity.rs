//! Call entities

use crate::domain::call::value_object::ParticipantStatus;
use crate::domain::shared::value_objects::{CallId, MembershipId, PartyId, PartyKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call-membership record with its own status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: MembershipId,
    pub call_id: CallId,
    pub participant_id: PartyId,
    pub participant_type: PartyKind,
    pub status: ParticipantStatus,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Participant {
    /// The initiator is connected from the moment the call exists
    pub fn initiator(call_id: CallId, party: PartyId, kind: PartyKind, at: DateTime<Utc>) -> Self {
        Self {
            id: MembershipId::new(),
            call_id,
            participant_id: party,
            participant_type: kind,
            status: ParticipantStatus::Connected,
            joined_at: Some(at),
            left_at: None,
        }
    }

    pub fn callee(call_id: CallId, party: PartyId, kind: PartyKind) -> Self {
        Self {
            id: MembershipId::new(),
            call_id,
            participant_id: party,
            participant_type: kind,
            status: ParticipantStatus::Invited,
            joined_at: None,
            left_at: None,
        }
    }

    pub fn is(&self, party: &PartyId) -> bool {
        &self.participant_id == party
    }
}
