//! Read-only directory of apartments, residents and doormen
//!
//! The directory is owned by the building-management side of the system;
//! this service only resolves who may be dialed and never writes to it.

use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ApartmentId, BuildingId, PartyId, PartyKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Apartment as seen by the intercom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apartment {
    pub id: ApartmentId,
    pub number: String,
    pub block: Option<String>,
    pub building_id: BuildingId,
    pub building_name: Option<String>,
}

/// How a caller designates an apartment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApartmentRef {
    Id(ApartmentId),
    Number {
        number: String,
        building_id: BuildingId,
    },
}

/// A doorman or resident profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub kind: PartyKind,
    pub full_name: Option<String>,
    pub building_id: Option<BuildingId>,
}

impl Party {
    pub fn display_name(&self) -> &str {
        match (self.full_name.as_deref(), self.kind) {
            (Some(name), _) if !name.trim().is_empty() => name,
            (_, PartyKind::Doorman) => "Doorman",
            (_, PartyKind::Resident) => "Resident",
        }
    }
}

/// Someone who can be dialed, with the push routing data the fan-out needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callee {
    pub id: PartyId,
    pub kind: PartyKind,
    pub name: Option<String>,
    /// Registered push address; `None` when the device never registered
    pub device_address: Option<String>,
    pub notifications_enabled: bool,
}

impl Callee {
    /// Push is attempted only for callees who opted in and registered a device
    pub fn is_reachable(&self) -> bool {
        self.notifications_enabled
            && self
                .device_address
                .as_deref()
                .map_or(false, |addr| !addr.trim().is_empty())
    }
}

/// Directory lookups; failures surface as `NotFound` or `Internal`
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn find_apartment(&self, apartment: &ApartmentRef) -> Result<Option<Apartment>>;

    async fn find_party(&self, id: &PartyId, kind: PartyKind) -> Result<Option<Party>>;

    /// Active residents of an apartment
    async fn resolve_callees_for_apartment(&self, apartment_id: &ApartmentId)
        -> Result<Vec<Callee>>;

    /// Doormen currently on shift in a building
    async fn resolve_on_duty_doormen(&self, building_id: &BuildingId) -> Result<Vec<Callee>>;

    async fn resolve_apartment_for_resident(
        &self,
        resident_id: &PartyId,
    ) -> Result<Option<ApartmentId>>;
}
