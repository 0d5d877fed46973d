use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use rollout_core::hardware::{HardwareKind, HardwareUnit};
use rollout_core::types::ArchiveState;

use crate::{
    constraint_code, parse_uuid, to_rfc3339, truncate_to_millis, RowDecodeError,
    SQLITE_CONSTRAINT_FOREIGNKEY,
};

/// Repository covering the five hardware tables. All kinds share the same
/// column shape, so the table name is the only thing that varies; it always
/// comes from [`HardwareKind::table`], never from request input.
#[derive(Clone)]
pub struct HardwareRepository {
    pool: SqlitePool,
}

/// Data required to register a hardware unit.
#[derive(Debug, Clone)]
pub struct NewHardwareUnit {
    pub id: Uuid,
    pub kind: HardwareKind,
    pub site_id: Uuid,
    pub model: String,
    pub serial_number: String,
    pub detail: Option<String>,
    pub commissioned_at: Option<DateTime<Utc>>,
}

impl HardwareRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        record: NewHardwareUnit,
        now: DateTime<Utc>,
    ) -> Result<HardwareUnit, HardwareError> {
        let now = truncate_to_millis(now);
        let commissioned_at = record.commissioned_at.map(truncate_to_millis);
        let sql = format!(
            "INSERT INTO {} \
             (id, site_id, model, serial_number, detail, commissioned_at, archive_state, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            record.kind.table()
        );
        sqlx::query(&sql)
            .bind(record.id.to_string())
            .bind(record.site_id.to_string())
            .bind(&record.model)
            .bind(&record.serial_number)
            .bind(&record.detail)
            .bind(commissioned_at.map(to_rfc3339))
            .bind(ArchiveState::Active.as_str())
            .bind(to_rfc3339(now))
            .bind(to_rfc3339(now))
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;

        Ok(HardwareUnit {
            id: record.id,
            kind: record.kind,
            site_id: record.site_id,
            model: record.model,
            serial_number: record.serial_number,
            detail: record.detail,
            commissioned_at,
            archive_state: ArchiveState::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn fetch(
        &self,
        kind: HardwareKind,
        id: Uuid,
    ) -> Result<Option<HardwareUnit>, HardwareError> {
        let sql = format!(
            "SELECT id, site_id, model, serial_number, detail, commissioned_at, archive_state, \
                    created_at, updated_at \
               FROM {} WHERE id = ?",
            kind.table()
        );
        let row = sqlx::query_as::<_, HardwareRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row.into_domain(kind)).transpose().map_err(Into::into)
    }

    /// Lists units of one kind, optionally narrowed to a site.
    pub async fn list(
        &self,
        kind: HardwareKind,
        site_id: Option<Uuid>,
        include_archived: bool,
    ) -> Result<Vec<HardwareUnit>, HardwareError> {
        let mut sql = format!(
            "SELECT id, site_id, model, serial_number, detail, commissioned_at, archive_state, \
                    created_at, updated_at \
               FROM {} WHERE 1 = 1",
            kind.table()
        );
        if !include_archived {
            sql.push_str(" AND archive_state = 'ACTIVE'");
        }
        if site_id.is_some() {
            sql.push_str(" AND site_id = ?");
        }
        sql.push_str(" ORDER BY model, serial_number");

        let mut query = sqlx::query_as::<_, HardwareRow>(&sql);
        if let Some(site_id) = site_id {
            query = query.bind(site_id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| row.into_domain(kind).map_err(Into::into))
            .collect()
    }

    pub async fn update(&self, unit: &HardwareUnit) -> Result<bool, HardwareError> {
        let sql = format!(
            "UPDATE {} \
                SET site_id = ?, model = ?, serial_number = ?, detail = ?, commissioned_at = ?, \
                    archive_state = ?, updated_at = ? \
              WHERE id = ?",
            unit.kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(unit.site_id.to_string())
            .bind(&unit.model)
            .bind(&unit.serial_number)
            .bind(&unit.detail)
            .bind(unit.commissioned_at.map(to_rfc3339))
            .bind(unit.archive_state.as_str())
            .bind(to_rfc3339(unit.updated_at))
            .bind(unit.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_archive_state(
        &self,
        kind: HardwareKind,
        id: Uuid,
        state: ArchiveState,
        now: DateTime<Utc>,
    ) -> Result<bool, HardwareError> {
        let sql = format!(
            "UPDATE {} SET archive_state = ?, updated_at = ? WHERE id = ?",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(to_rfc3339(now))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_write_error(err: sqlx::Error) -> HardwareError {
    match constraint_code(&err).as_deref() {
        Some(SQLITE_CONSTRAINT_FOREIGNKEY) => HardwareError::MissingSite,
        _ => HardwareError::Database(err),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HardwareRow {
    id: String,
    site_id: String,
    model: String,
    serial_number: String,
    detail: Option<String>,
    commissioned_at: Option<DateTime<Utc>>,
    archive_state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl HardwareRow {
    fn into_domain(self, kind: HardwareKind) -> Result<HardwareUnit, RowDecodeError> {
        Ok(HardwareUnit {
            id: parse_uuid("id", &self.id)?,
            kind,
            site_id: parse_uuid("site_id", &self.site_id)?,
            model: self.model,
            serial_number: self.serial_number,
            detail: self.detail,
            commissioned_at: self.commissioned_at,
            archive_state: ArchiveState::from_db(&self.archive_state),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while operating on hardware units.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("referenced site does not exist")]
    MissingSite,
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
