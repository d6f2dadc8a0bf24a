//! In-memory stores
//!
//! Used by tests and by the `memory` feature. Every conditional update runs
//! under one write lock, which gives the same single-winner semantics as a
//! guarded `UPDATE ... WHERE status = ANY(...)`.

use crate::domain::call::{
    Call, CallFilters, CallRepository, CallStatus, CallTransition, Participant,
    ParticipantTransition,
};
use crate::domain::directory::{Apartment, ApartmentRef, Callee, ParticipantDirectory, Party};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ApartmentId, BuildingId, CallId, PartyId, PartyKind};
use crate::domain::DomainError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

struct StoredCall {
    call: Call,
    participants: Vec<Participant>,
}

/// Call store backed by a map
#[derive(Default)]
pub struct InMemoryCallRepository {
    calls: RwLock<HashMap<CallId, StoredCall>>,
}

impl InMemoryCallRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallRepository for InMemoryCallRepository {
    async fn create(&self, call: &Call, participants: &[Participant]) -> Result<()> {
        let mut calls = self.calls.write().await;
        if calls.contains_key(&call.id) {
            return Err(DomainError::Conflict(format!("call {} already exists", call.id)));
        }
        calls.insert(
            call.id,
            StoredCall {
                call: call.clone(),
                participants: participants.to_vec(),
            },
        );
        Ok(())
    }

    async fn find_by_id(&self, id: &CallId) -> Result<Option<Call>> {
        Ok(self.calls.read().await.get(id).map(|s| s.call.clone()))
    }

    async fn participants(&self, call_id: &CallId) -> Result<Vec<Participant>> {
        Ok(self
            .calls
            .read()
            .await
            .get(call_id)
            .map(|s| s.participants.clone())
            .unwrap_or_default())
    }

    async fn transition(&self, id: &CallId, transition: CallTransition) -> Result<Option<Call>> {
        let mut calls = self.calls.write().await;
        Ok(calls.get_mut(id).and_then(|stored| {
            transition
                .apply(&mut stored.call)
                .then(|| stored.call.clone())
        }))
    }

    async fn transition_participants(
        &self,
        call_id: &CallId,
        transition: &ParticipantTransition,
    ) -> Result<u64> {
        let mut calls = self.calls.write().await;
        let Some(stored) = calls.get_mut(call_id) else {
            return Ok(0);
        };
        Ok(stored
            .participants
            .iter_mut()
            .map(|p| transition.apply(p))
            .filter(|applied| *applied)
            .count() as u64)
    }

    async fn list(&self, filters: &CallFilters, limit: i64, offset: i64) -> Result<Vec<Call>> {
        let calls = self.calls.read().await;
        let mut matching: Vec<Call> = calls
            .values()
            .map(|s| &s.call)
            .filter(|c| filters.matches(c))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, filters: &CallFilters) -> Result<i64> {
        let calls = self.calls.read().await;
        Ok(calls.values().filter(|s| filters.matches(&s.call)).count() as i64)
    }

    async fn ringing_since_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CallId>> {
        let calls = self.calls.read().await;
        Ok(calls
            .values()
            .filter(|s| s.call.status == CallStatus::Calling && s.call.started_at < cutoff)
            .map(|s| s.call.id)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct Member {
    callee: Callee,
    active: bool,
}

#[derive(Default)]
struct DirectoryData {
    apartments: HashMap<ApartmentId, Apartment>,
    parties: HashMap<(PartyId, PartyKind), Party>,
    residents: HashMap<ApartmentId, Vec<Member>>,
    doormen: HashMap<BuildingId, Vec<Member>>,
}

/// Directory seeded programmatically
#[derive(Default)]
pub struct InMemoryDirectory {
    data: RwLock<DirectoryData>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_apartment(&self, apartment: Apartment) {
        self.data
            .write()
            .await
            .apartments
            .insert(apartment.id, apartment);
    }

    pub async fn add_party(&self, party: Party) {
        self.data
            .write()
            .await
            .parties
            .insert((party.id, party.kind), party);
    }

    /// Link a resident to an apartment; inactive residents are never dialed
    pub async fn add_resident(&self, apartment_id: ApartmentId, callee: Callee, active: bool) {
        self.data
            .write()
            .await
            .residents
            .entry(apartment_id)
            .or_default()
            .push(Member { callee, active });
    }

    pub async fn add_doorman(&self, building_id: BuildingId, callee: Callee, on_duty: bool) {
        self.data
            .write()
            .await
            .doormen
            .entry(building_id)
            .or_default()
            .push(Member {
                callee,
                active: on_duty,
            });
    }
}

#[async_trait]
impl ParticipantDirectory for InMemoryDirectory {
    async fn find_apartment(&self, apartment: &ApartmentRef) -> Result<Option<Apartment>> {
        let data = self.data.read().await;
        Ok(match apartment {
            ApartmentRef::Id(id) => data.apartments.get(id).cloned(),
            ApartmentRef::Number {
                number,
                building_id,
            } => data
                .apartments
                .values()
                .find(|a| &a.building_id == building_id && a.number.eq_ignore_ascii_case(number))
                .cloned(),
        })
    }

    async fn find_party(&self, id: &PartyId, kind: PartyKind) -> Result<Option<Party>> {
        Ok(self.data.read().await.parties.get(&(*id, kind)).cloned())
    }

    async fn resolve_callees_for_apartment(
        &self,
        apartment_id: &ApartmentId,
    ) -> Result<Vec<Callee>> {
        let data = self.data.read().await;
        Ok(active_callees(data.residents.get(apartment_id)))
    }

    async fn resolve_on_duty_doormen(&self, building_id: &BuildingId) -> Result<Vec<Callee>> {
        let data = self.data.read().await;
        Ok(active_callees(data.doormen.get(building_id)))
    }

    async fn resolve_apartment_for_resident(
        &self,
        resident_id: &PartyId,
    ) -> Result<Option<ApartmentId>> {
        let data = self.data.read().await;
        Ok(data
            .residents
            .iter()
            .find(|(_, members)| {
                members
                    .iter()
                    .any(|m| m.active && &m.callee.id == resident_id)
            })
            .map(|(apartment_id, _)| *apartment_id))
    }
}

fn active_callees(members: Option<&Vec<Member>>) -> Vec<Callee> {
    members
        .map(|members| {
            members
                .iter()
                .filter(|m| m.active)
                .map(|m| m.callee.clone())
                .collect()
        })
        .unwrap_or_default()
}
