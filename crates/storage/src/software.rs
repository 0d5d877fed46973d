use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use rollout_core::types::{InstalledSoftware, InstalledSoftwareStatus, Software, UpgradePlan};

use crate::{
    constraint_code, parse_uuid, to_rfc3339, truncate_to_millis, RowDecodeError,
    SQLITE_CONSTRAINT_FOREIGNKEY,
};

/// Repository for the software catalog.
#[derive(Clone)]
pub struct SoftwareRepository {
    pool: SqlitePool,
}

/// Data required to create a catalog entry.
#[derive(Debug, Clone)]
pub struct NewSoftware {
    pub id: Uuid,
    pub name: String,
    pub vendor: String,
    pub version: String,
}

impl SoftwareRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        record: NewSoftware,
        now: DateTime<Utc>,
    ) -> Result<Software, SoftwareError> {
        let now = truncate_to_millis(now);
        sqlx::query(
            "INSERT INTO software (id, name, vendor, version, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(&record.vendor)
        .bind(&record.version)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await?;

        Ok(Software {
            id: record.id,
            name: record.name,
            vendor: record.vendor,
            version: record.version,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<Software>, SoftwareError> {
        let row = sqlx::query_as::<_, SoftwareRow>(
            "SELECT id, name, vendor, version, created_at, updated_at FROM software WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SoftwareRow::into_domain).transpose().map_err(Into::into)
    }

    pub async fn list(&self) -> Result<Vec<Software>, SoftwareError> {
        let rows = sqlx::query_as::<_, SoftwareRow>(
            "SELECT id, name, vendor, version, created_at, updated_at \
               FROM software ORDER BY name, version",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    pub async fn update(&self, software: &Software) -> Result<bool, SoftwareError> {
        let result = sqlx::query(
            "UPDATE software SET name = ?, vendor = ?, version = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&software.name)
        .bind(&software.vendor)
        .bind(&software.version)
        .bind(to_rfc3339(software.updated_at))
        .bind(software.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, SoftwareError> {
        let result = sqlx::query("DELETE FROM software WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|err| match constraint_code(&err).as_deref() {
                Some(SQLITE_CONSTRAINT_FOREIGNKEY) => SoftwareError::InUse,
                _ => SoftwareError::Database(err),
            })?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SoftwareRow {
    id: String,
    name: String,
    vendor: String,
    version: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SoftwareRow {
    fn into_domain(self) -> Result<Software, RowDecodeError> {
        Ok(Software {
            id: parse_uuid("id", &self.id)?,
            name: self.name,
            vendor: self.vendor,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while operating on the software catalog.
#[derive(Debug, Error)]
pub enum SoftwareError {
    #[error("software is still referenced by installations or upgrade plans")]
    InUse,
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for per-site software installations.
#[derive(Clone)]
pub struct InstalledSoftwareRepository {
    pool: SqlitePool,
}

/// Data required to create an installation record.
#[derive(Debug, Clone)]
pub struct NewInstalledSoftware {
    pub id: Uuid,
    pub software_id: Uuid,
    pub site_id: Uuid,
    pub status: InstalledSoftwareStatus,
    pub installed_at: Option<DateTime<Utc>>,
}

impl InstalledSoftwareRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        record: NewInstalledSoftware,
        now: DateTime<Utc>,
    ) -> Result<InstalledSoftware, InstalledSoftwareError> {
        let now = truncate_to_millis(now);
        let installed_at = record.installed_at.map(truncate_to_millis);
        sqlx::query(
            "INSERT INTO installed_software \
             (id, software_id, site_id, status, installed_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.software_id.to_string())
        .bind(record.site_id.to_string())
        .bind(record.status.as_str())
        .bind(installed_at.map(to_rfc3339))
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await
        .map_err(|err| match constraint_code(&err).as_deref() {
            Some(SQLITE_CONSTRAINT_FOREIGNKEY) => InstalledSoftwareError::MissingParent,
            _ => InstalledSoftwareError::Database(err),
        })?;

        Ok(InstalledSoftware {
            id: record.id,
            software_id: record.software_id,
            site_id: record.site_id,
            status: record.status,
            installed_at,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<InstalledSoftware>, InstalledSoftwareError> {
        let row = sqlx::query_as::<_, InstalledSoftwareRow>(
            "SELECT id, software_id, site_id, status, installed_at, created_at, updated_at \
               FROM installed_software WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(InstalledSoftwareRow::into_domain)
            .transpose()
            .map_err(Into::into)
    }

    /// Lists installation records, optionally narrowed to a site.
    pub async fn list(
        &self,
        site_id: Option<Uuid>,
    ) -> Result<Vec<InstalledSoftware>, InstalledSoftwareError> {
        let rows = if let Some(site_id) = site_id {
            sqlx::query_as::<_, InstalledSoftwareRow>(
                "SELECT id, software_id, site_id, status, installed_at, created_at, updated_at \
                   FROM installed_software WHERE site_id = ? ORDER BY created_at",
            )
            .bind(site_id.to_string())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, InstalledSoftwareRow>(
                "SELECT id, software_id, site_id, status, installed_at, created_at, updated_at \
                   FROM installed_software ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    pub async fn update(
        &self,
        record: &InstalledSoftware,
    ) -> Result<bool, InstalledSoftwareError> {
        let result = sqlx::query(
            "UPDATE installed_software \
                SET software_id = ?, site_id = ?, status = ?, installed_at = ?, updated_at = ? \
              WHERE id = ?",
        )
        .bind(record.software_id.to_string())
        .bind(record.site_id.to_string())
        .bind(record.status.as_str())
        .bind(record.installed_at.map(to_rfc3339))
        .bind(to_rfc3339(record.updated_at))
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|err| match constraint_code(&err).as_deref() {
            Some(SQLITE_CONSTRAINT_FOREIGNKEY) => InstalledSoftwareError::MissingParent,
            _ => InstalledSoftwareError::Database(err),
        })?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, InstalledSoftwareError> {
        let result = sqlx::query("DELETE FROM installed_software WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InstalledSoftwareRow {
    id: String,
    software_id: String,
    site_id: String,
    status: String,
    installed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InstalledSoftwareRow {
    fn into_domain(self) -> Result<InstalledSoftware, RowDecodeError> {
        Ok(InstalledSoftware {
            id: parse_uuid("id", &self.id)?,
            software_id: parse_uuid("software_id", &self.software_id)?,
            site_id: parse_uuid("site_id", &self.site_id)?,
            status: InstalledSoftwareStatus::from_db(&self.status),
            installed_at: self.installed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while operating on installation records.
#[derive(Debug, Error)]
pub enum InstalledSoftwareError {
    #[error("referenced software or site does not exist")]
    MissingParent,
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for upgrade plans.
#[derive(Clone)]
pub struct UpgradePlanRepository {
    pool: SqlitePool,
}

/// Data required to create an upgrade plan.
#[derive(Debug, Clone)]
pub struct NewUpgradePlan {
    pub id: Uuid,
    pub project_id: Uuid,
    pub software_id: Uuid,
    pub target_version: String,
    pub scheduled_for: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl UpgradePlanRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        record: NewUpgradePlan,
        now: DateTime<Utc>,
    ) -> Result<UpgradePlan, UpgradePlanError> {
        let now = truncate_to_millis(now);
        sqlx::query(
            "INSERT INTO upgrade_plans \
             (id, project_id, software_id, target_version, scheduled_for, notes, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.project_id.to_string())
        .bind(record.software_id.to_string())
        .bind(&record.target_version)
        .bind(record.scheduled_for)
        .bind(&record.notes)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await
        .map_err(|err| match constraint_code(&err).as_deref() {
            Some(SQLITE_CONSTRAINT_FOREIGNKEY) => UpgradePlanError::MissingParent,
            _ => UpgradePlanError::Database(err),
        })?;

        Ok(UpgradePlan {
            id: record.id,
            project_id: record.project_id,
            software_id: record.software_id,
            target_version: record.target_version,
            scheduled_for: record.scheduled_for,
            notes: record.notes,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<UpgradePlan>, UpgradePlanError> {
        let row = sqlx::query_as::<_, UpgradePlanRow>(
            "SELECT id, project_id, software_id, target_version, scheduled_for, notes, \
                    created_at, updated_at \
               FROM upgrade_plans WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UpgradePlanRow::into_domain).transpose().map_err(Into::into)
    }

    /// Lists plans, optionally narrowed to a project.
    pub async fn list(&self, project_id: Option<Uuid>) -> Result<Vec<UpgradePlan>, UpgradePlanError> {
        let rows = if let Some(project_id) = project_id {
            sqlx::query_as::<_, UpgradePlanRow>(
                "SELECT id, project_id, software_id, target_version, scheduled_for, notes, \
                        created_at, updated_at \
                   FROM upgrade_plans WHERE project_id = ? ORDER BY scheduled_for",
            )
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, UpgradePlanRow>(
                "SELECT id, project_id, software_id, target_version, scheduled_for, notes, \
                        created_at, updated_at \
                   FROM upgrade_plans ORDER BY scheduled_for",
            )
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    pub async fn update(&self, plan: &UpgradePlan) -> Result<bool, UpgradePlanError> {
        let result = sqlx::query(
            "UPDATE upgrade_plans \
                SET project_id = ?, software_id = ?, target_version = ?, scheduled_for = ?, \
                    notes = ?, updated_at = ? \
              WHERE id = ?",
        )
        .bind(plan.project_id.to_string())
        .bind(plan.software_id.to_string())
        .bind(&plan.target_version)
        .bind(plan.scheduled_for)
        .bind(&plan.notes)
        .bind(to_rfc3339(plan.updated_at))
        .bind(plan.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|err| match constraint_code(&err).as_deref() {
            Some(SQLITE_CONSTRAINT_FOREIGNKEY) => UpgradePlanError::MissingParent,
            _ => UpgradePlanError::Database(err),
        })?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, UpgradePlanError> {
        let result = sqlx::query("DELETE FROM upgrade_plans WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UpgradePlanRow {
    id: String,
    project_id: String,
    software_id: String,
    target_version: String,
    scheduled_for: Option<NaiveDate>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UpgradePlanRow {
    fn into_domain(self) -> Result<UpgradePlan, RowDecodeError> {
        Ok(UpgradePlan {
            id: parse_uuid("id", &self.id)?,
            project_id: parse_uuid("project_id", &self.project_id)?,
            software_id: parse_uuid("software_id", &self.software_id)?,
            target_version: self.target_version,
            scheduled_for: self.scheduled_for,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while operating on upgrade plans.
#[derive(Debug, Error)]
pub enum UpgradePlanError {
    #[error("referenced project or software does not exist")]
    MissingParent,
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
