//! PostgreSQL implementation of CallRepository
//!
//! Transitions are single `UPDATE ... WHERE status = ANY($n)` statements, so
//! the row lock taken by PostgreSQL decides every race.

use crate::domain::call::{
    Call, CallFilters, CallRepository, CallStatus, CallTransition, Participant, ParticipantScope,
    ParticipantStatus, ParticipantTransition,
};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{
    ApartmentId, BuildingId, CallId, MembershipId, PartyId, PartyKind,
};
use crate::domain::DomainError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error};
use uuid::Uuid;

const CALL_COLUMNS: &str = "id, apartment_id, building_id, initiator_id, initiator_type, status, \
     channel_name, started_at, answered_at, ended_at, duration_seconds";

const PARTICIPANT_COLUMNS: &str =
    "id, call_id, participant_id, participant_type, status, joined_at, left_at";

/// Filter predicate shared by `list` and `count`; unset filters bind NULL
const FILTERS: &str = "($1::uuid IS NULL OR building_id = $1) \
     AND ($2::uuid IS NULL OR apartment_id = $2) \
     AND ($3::uuid IS NULL OR initiator_id = $3) \
     AND ($4::text IS NULL OR initiator_type = $4) \
     AND (cardinality($5::text[]) = 0 OR status = ANY($5))";

pub(crate) fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    error!("Failed to {}: {}", context, e);
    DomainError::Internal(format!("Database error: {}", e))
}

fn call_from_row(row: &PgRow) -> std::result::Result<Call, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let initiator_type: String = row.try_get("initiator_type")?;

    Ok(Call {
        id: CallId::from_uuid(row.try_get("id")?),
        apartment_id: ApartmentId::from_uuid(row.try_get("apartment_id")?),
        building_id: BuildingId::from_uuid(row.try_get("building_id")?),
        initiator_id: PartyId::from_uuid(row.try_get("initiator_id")?),
        initiator_type: PartyKind::parse(&initiator_type)
            .ok_or_else(|| decode_error("initiator_type", &initiator_type))?,
        status: CallStatus::from_str(&status).ok_or_else(|| decode_error("status", &status))?,
        channel_name: row.try_get("channel_name")?,
        started_at: row.try_get("started_at")?,
        answered_at: row.try_get("answered_at")?,
        ended_at: row.try_get("ended_at")?,
        duration_seconds: row.try_get("duration_seconds")?,
    })
}

fn participant_from_row(row: &PgRow) -> std::result::Result<Participant, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let participant_type: String = row.try_get("participant_type")?;

    Ok(Participant {
        id: MembershipId::from_uuid(row.try_get("id")?),
        call_id: CallId::from_uuid(row.try_get("call_id")?),
        participant_id: PartyId::from_uuid(row.try_get("participant_id")?),
        participant_type: PartyKind::parse(&participant_type)
            .ok_or_else(|| decode_error("participant_type", &participant_type))?,
        status: ParticipantStatus::from_str(&status)
            .ok_or_else(|| decode_error("status", &status))?,
        joined_at: row.try_get("joined_at")?,
        left_at: row.try_get("left_at")?,
    })
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value '{}'", value).into(),
    }
}

fn status_names<'a>(statuses: impl IntoIterator<Item = &'a CallStatus>) -> Vec<String> {
    statuses.into_iter().map(|s| s.as_str().to_string()).collect()
}

pub struct PgCallRepository {
    pool: PgPool,
}

impl PgCallRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn bind_filters<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        filters: &CallFilters,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        query
            .bind(filters.building_id.map(|id| id.as_uuid()))
            .bind(filters.apartment_id.map(|id| id.as_uuid()))
            .bind(filters.initiator_id.map(|id| id.as_uuid()))
            .bind(filters.initiator_type.map(|t| t.as_str().to_string()))
            .bind(status_names(&filters.statuses))
    }
}

#[async_trait]
impl CallRepository for PgCallRepository {
    async fn create(&self, call: &Call, participants: &[Participant]) -> Result<()> {
        debug!("Creating call {} with {} participants", call.id, participants.len());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO intercom_calls
            (id, apartment_id, building_id, initiator_id, initiator_type, status,
             channel_name, started_at, answered_at, ended_at, duration_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(call.id.as_uuid())
        .bind(call.apartment_id.as_uuid())
        .bind(call.building_id.as_uuid())
        .bind(call.initiator_id.as_uuid())
        .bind(call.initiator_type.as_str())
        .bind(call.status.as_str())
        .bind(&call.channel_name)
        .bind(call.started_at)
        .bind(call.answered_at)
        .bind(call.ended_at)
        .bind(call.duration_seconds)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("create call", e))?;

        for p in participants {
            sqlx::query(
                r#"
                INSERT INTO call_participants
                (id, call_id, participant_id, participant_type, status, joined_at, left_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(p.id.as_uuid())
            .bind(p.call_id.as_uuid())
            .bind(p.participant_id.as_uuid())
            .bind(p.participant_type.as_str())
            .bind(p.status.as_str())
            .bind(p.joined_at)
            .bind(p.left_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("create participant", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("commit call", e))?;
        Ok(())
    }

    async fn find_by_id(&self, id: &CallId) -> Result<Option<Call>> {
        let sql = format!("SELECT {} FROM intercom_calls WHERE id = $1", CALL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get call", e))?;

        row.as_ref()
            .map(call_from_row)
            .transpose()
            .map_err(|e| db_error("decode call", e))
    }

    async fn participants(&self, call_id: &CallId) -> Result<Vec<Participant>> {
        let sql = format!(
            "SELECT {} FROM call_participants WHERE call_id = $1 ORDER BY joined_at NULLS LAST, id",
            PARTICIPANT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(call_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list participants", e))?;

        rows.iter()
            .map(participant_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| db_error("decode participant", e))
    }

    async fn transition(&self, id: &CallId, transition: CallTransition) -> Result<Option<Call>> {
        let assignments = match transition {
            CallTransition::Answer { .. } => "answered_at = $3",
            CallTransition::Decline { .. } | CallTransition::Miss { .. } => "ended_at = $3",
            CallTransition::End { .. } => {
                "ended_at = $3, duration_seconds = GREATEST(0, FLOOR(EXTRACT(EPOCH FROM \
                 ($3 - COALESCE(answered_at, started_at)))))::BIGINT"
            }
        };
        let sql = format!(
            "UPDATE intercom_calls SET status = $2, {} WHERE id = $1 AND status = ANY($4) RETURNING {}",
            assignments, CALL_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(transition.target().as_str())
            .bind(transition.at())
            .bind(status_names(transition.expected()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("transition call", e))?;

        match row {
            Some(row) => {
                debug!("Call {} -> {}", id, transition.target());
                call_from_row(&row)
                    .map(Some)
                    .map_err(|e| db_error("decode call", e))
            }
            None => Ok(None),
        }
    }

    async fn transition_participants(
        &self,
        call_id: &CallId,
        transition: &ParticipantTransition,
    ) -> Result<u64> {
        let (scope, party): (&str, Option<Uuid>) = match transition.scope {
            ParticipantScope::Only(party) => ("participant_id = $6", Some(party.as_uuid())),
            ParticipantScope::AllExcept(party) => ("participant_id <> $6", Some(party.as_uuid())),
            ParticipantScope::All => ("$6::uuid IS NULL", None),
        };
        let sql = format!(
            r#"
            UPDATE call_participants
            SET status = $2,
                joined_at = COALESCE($3, joined_at),
                left_at = COALESCE($4, left_at)
            WHERE call_id = $1
              AND ($5::text[] IS NULL OR status = ANY($5))
              AND {}
            "#,
            scope
        );

        let from: Option<Vec<String>> = transition
            .from
            .map(|statuses| statuses.iter().map(|s| s.as_str().to_string()).collect());

        let result = sqlx::query(&sql)
            .bind(call_id.as_uuid())
            .bind(transition.to.as_str())
            .bind(transition.joined_at)
            .bind(transition.left_at)
            .bind(from)
            .bind(party)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("transition participants", e))?;

        Ok(result.rows_affected())
    }

    async fn list(&self, filters: &CallFilters, limit: i64, offset: i64) -> Result<Vec<Call>> {
        let sql = format!(
            "SELECT {} FROM intercom_calls WHERE {} ORDER BY started_at DESC LIMIT $6 OFFSET $7",
            CALL_COLUMNS, FILTERS
        );
        let rows = Self::bind_filters(sqlx::query(&sql), filters)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list calls", e))?;

        rows.iter()
            .map(call_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| db_error("decode call", e))
    }

    async fn count(&self, filters: &CallFilters) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS total FROM intercom_calls WHERE {}", FILTERS);
        let row = Self::bind_filters(sqlx::query(&sql), filters)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count calls", e))?;

        row.try_get("total").map_err(|e| db_error("decode count", e))
    }

    async fn ringing_since_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CallId>> {
        let rows = sqlx::query(
            "SELECT id FROM intercom_calls WHERE status = 'calling' AND started_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list stale calls", e))?;

        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map(CallId::from_uuid))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| db_error("decode call id", e))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("ping database", e))?;
        Ok(())
    }
}
