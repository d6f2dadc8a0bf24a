//! Call repository interface
//!
//! Every mutation is a conditional update: the caller names the states it
//! expects the row(s) to be in, and the store applies the change only where
//! that guard still holds. Zero rows affected is the signal that another
//! transition won; callers never decide by a separate prior read.

use crate::domain::call::aggregate::Call;
use crate::domain::call::entity::Participant;
use crate::domain::call::value_object::{CallStatus, ParticipantStatus};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ApartmentId, BuildingId, CallId, PartyId, PartyKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A guarded call-level transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    /// calling → answered, stamps `answered_at`
    Answer { at: DateTime<Utc> },
    /// calling → declined, stamps `ended_at`
    Decline { at: DateTime<Utc> },
    /// calling → missed, stamps `ended_at`
    Miss { at: DateTime<Utc> },
    /// calling|answered → ended, stamps `ended_at` and
    /// `duration_seconds = at - coalesce(answered_at, started_at)`
    End { at: DateTime<Utc> },
}

impl CallTransition {
    pub fn target(&self) -> CallStatus {
        match self {
            CallTransition::Answer { .. } => CallStatus::Answered,
            CallTransition::Decline { .. } => CallStatus::Declined,
            CallTransition::Miss { .. } => CallStatus::Missed,
            CallTransition::End { .. } => CallStatus::Ended,
        }
    }

    /// Statuses the row must currently hold for the update to apply
    pub fn expected(&self) -> &'static [CallStatus] {
        CallStatus::predecessors_of(self.target())
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            CallTransition::Answer { at }
            | CallTransition::Decline { at }
            | CallTransition::Miss { at }
            | CallTransition::End { at } => *at,
        }
    }

    /// Apply to an in-memory row; returns false when the guard fails
    pub fn apply(&self, call: &mut Call) -> bool {
        if !self.expected().contains(&call.status) {
            return false;
        }
        let at = self.at();
        match self {
            CallTransition::Answer { .. } => call.answered_at = Some(at),
            CallTransition::Decline { .. } | CallTransition::Miss { .. } => {
                call.ended_at = Some(at)
            }
            CallTransition::End { .. } => {
                call.duration_seconds = Some(call.duration_until(at));
                call.ended_at = Some(at);
            }
        }
        call.status = self.target();
        true
    }
}

/// Which participant rows a participant transition targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantScope {
    Only(PartyId),
    AllExcept(PartyId),
    All,
}

/// A guarded participant-level transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantTransition {
    pub scope: ParticipantScope,
    /// `None` matches any current status
    pub from: Option<&'static [ParticipantStatus]>,
    pub to: ParticipantStatus,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
}

impl ParticipantTransition {
    pub fn new(scope: ParticipantScope, to: ParticipantStatus) -> Self {
        Self {
            scope,
            from: None,
            to,
            joined_at: None,
            left_at: None,
        }
    }

    pub fn when_in(mut self, statuses: &'static [ParticipantStatus]) -> Self {
        self.from = Some(statuses);
        self
    }

    pub fn joined(mut self, at: DateTime<Utc>) -> Self {
        self.joined_at = Some(at);
        self
    }

    pub fn left(mut self, at: DateTime<Utc>) -> Self {
        self.left_at = Some(at);
        self
    }

    /// Whether this transition applies to `p`
    pub fn matches(&self, p: &Participant) -> bool {
        let in_scope = match self.scope {
            ParticipantScope::Only(party) => p.is(&party),
            ParticipantScope::AllExcept(party) => !p.is(&party),
            ParticipantScope::All => true,
        };
        in_scope && self.from.map_or(true, |from| from.contains(&p.status))
    }

    /// Apply to an in-memory row; returns false when it does not match
    pub fn apply(&self, p: &mut Participant) -> bool {
        if !self.matches(p) {
            return false;
        }
        p.status = self.to;
        if let Some(at) = self.joined_at {
            p.joined_at = Some(at);
        }
        if let Some(at) = self.left_at {
            p.left_at = Some(at);
        }
        true
    }
}

/// Filters for call history queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallFilters {
    pub building_id: Option<BuildingId>,
    pub apartment_id: Option<ApartmentId>,
    pub initiator_id: Option<PartyId>,
    pub initiator_type: Option<PartyKind>,
    pub statuses: Vec<CallStatus>,
}

impl CallFilters {
    pub fn matches(&self, call: &Call) -> bool {
        self.building_id.map_or(true, |b| call.building_id == b)
            && self.apartment_id.map_or(true, |a| call.apartment_id == a)
            && self.initiator_id.map_or(true, |i| call.initiator_id == i)
            && self.initiator_type.map_or(true, |t| call.initiator_type == t)
            && (self.statuses.is_empty() || self.statuses.contains(&call.status))
    }
}

/// Repository interface for the Call aggregate and its participants
#[async_trait]
pub trait CallRepository: Send + Sync {
    /// Persist a new call together with all of its participants atomically
    async fn create(&self, call: &Call, participants: &[Participant]) -> Result<()>;

    async fn find_by_id(&self, id: &CallId) -> Result<Option<Call>>;

    async fn participants(&self, call_id: &CallId) -> Result<Vec<Participant>>;

    /// Conditionally transition a call; `None` when the guard did not hold
    async fn transition(&self, id: &CallId, transition: CallTransition) -> Result<Option<Call>>;

    /// Conditionally transition participants; returns rows affected
    async fn transition_participants(
        &self,
        call_id: &CallId,
        transition: &ParticipantTransition,
    ) -> Result<u64>;

    /// Newest first
    async fn list(&self, filters: &CallFilters, limit: i64, offset: i64) -> Result<Vec<Call>>;

    async fn count(&self, filters: &CallFilters) -> Result<i64>;

    /// Calls still `calling` that started before `cutoff`
    async fn ringing_since_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CallId>>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<()>;
}
