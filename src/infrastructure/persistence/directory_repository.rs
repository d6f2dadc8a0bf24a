//! PostgreSQL implementation of ParticipantDirectory
//!
//! Reads the building-management tables; nothing here writes.

use crate::domain::directory::{Apartment, ApartmentRef, Callee, ParticipantDirectory, Party};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ApartmentId, BuildingId, PartyId, PartyKind};
use crate::infrastructure::persistence::call_repository::db_error;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

/// Stored labels for each kind, canonical first
fn user_types(kind: PartyKind) -> Vec<String> {
    let labels: &[&str] = match kind {
        PartyKind::Doorman => &["doorman", "porteiro"],
        PartyKind::Resident => &["resident", "morador"],
    };
    labels.iter().map(|l| l.to_string()).collect()
}

fn apartment_from_row(row: &PgRow) -> std::result::Result<Apartment, sqlx::Error> {
    Ok(Apartment {
        id: ApartmentId::from_uuid(row.try_get("id")?),
        number: row.try_get("number")?,
        block: row.try_get("block")?,
        building_id: BuildingId::from_uuid(row.try_get("building_id")?),
        building_name: row.try_get("building_name")?,
    })
}

fn callee_from_row(row: &PgRow, kind: PartyKind) -> std::result::Result<Callee, sqlx::Error> {
    Ok(Callee {
        id: PartyId::from_uuid(row.try_get("id")?),
        kind,
        name: row.try_get("full_name")?,
        device_address: row.try_get("push_token")?,
        notifications_enabled: row.try_get("notification_enabled")?,
    })
}

pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantDirectory for PgDirectory {
    async fn find_apartment(&self, apartment: &ApartmentRef) -> Result<Option<Apartment>> {
        let select = r#"
            SELECT a.id, a.number, a.block, a.building_id, b.name AS building_name
            FROM apartments a
            LEFT JOIN buildings b ON b.id = a.building_id
        "#;

        let row = match apartment {
            ApartmentRef::Id(id) => {
                sqlx::query(&format!("{} WHERE a.id = $1", select))
                    .bind(id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
            }
            ApartmentRef::Number {
                number,
                building_id,
            } => {
                sqlx::query(&format!(
                    "{} WHERE a.building_id = $1 AND LOWER(a.number) = LOWER($2)",
                    select
                ))
                .bind(building_id.as_uuid())
                .bind(number.trim())
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(|e| db_error("get apartment", e))?;

        row.as_ref()
            .map(apartment_from_row)
            .transpose()
            .map_err(|e| db_error("decode apartment", e))
    }

    async fn find_party(&self, id: &PartyId, kind: PartyKind) -> Result<Option<Party>> {
        let row = sqlx::query(
            r#"
            SELECT id, full_name, building_id
            FROM profiles
            WHERE id = $1 AND LOWER(user_type) = ANY($2)
            "#,
        )
        .bind(id.as_uuid())
        .bind(user_types(kind))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get profile", e))?;

        row.map(|row| -> std::result::Result<Party, sqlx::Error> {
            Ok(Party {
                id: PartyId::from_uuid(row.try_get("id")?),
                kind,
                full_name: row.try_get("full_name")?,
                building_id: row
                    .try_get::<Option<Uuid>, _>("building_id")?
                    .map(BuildingId::from_uuid),
            })
        })
        .transpose()
        .map_err(|e| db_error("decode profile", e))
    }

    async fn resolve_callees_for_apartment(
        &self,
        apartment_id: &ApartmentId,
    ) -> Result<Vec<Callee>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.full_name, p.push_token, p.notification_enabled
            FROM apartment_residents ar
            JOIN profiles p ON p.id = ar.profile_id
            WHERE ar.apartment_id = $1
              AND ar.is_active
              AND LOWER(p.user_type) = ANY($2)
            "#,
        )
        .bind(apartment_id.as_uuid())
        .bind(user_types(PartyKind::Resident))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list residents", e))?;

        debug!("Apartment {} has {} active residents", apartment_id, rows.len());
        rows.iter()
            .map(|row| callee_from_row(row, PartyKind::Resident))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| db_error("decode resident", e))
    }

    async fn resolve_on_duty_doormen(&self, building_id: &BuildingId) -> Result<Vec<Callee>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT p.id, p.full_name, p.push_token, p.notification_enabled
            FROM doorman_shifts s
            JOIN profiles p ON p.id = s.doorman_id
            WHERE s.building_id = $1
              AND s.status = 'active'
              AND s.shift_end IS NULL
              AND LOWER(p.user_type) = ANY($2)
            "#,
        )
        .bind(building_id.as_uuid())
        .bind(user_types(PartyKind::Doorman))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list on-duty doormen", e))?;

        rows.iter()
            .map(|row| callee_from_row(row, PartyKind::Doorman))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| db_error("decode doorman", e))
    }

    async fn resolve_apartment_for_resident(
        &self,
        resident_id: &PartyId,
    ) -> Result<Option<ApartmentId>> {
        let row = sqlx::query(
            r#"
            SELECT apartment_id
            FROM apartment_residents
            WHERE profile_id = $1 AND is_active
            LIMIT 1
            "#,
        )
        .bind(resident_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get resident apartment", e))?;

        row.map(|row| row.try_get::<Uuid, _>("apartment_id").map(ApartmentId::from_uuid))
            .transpose()
            .map_err(|e| db_error("decode apartment id", e))
    }
}
