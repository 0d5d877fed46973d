use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use rollout_core::types::{
    ArchiveState, DeploymentVariant, Project, ProjectLifecycleStatus, ProjectSiteLink, Site,
};

use crate::sites::SiteRow;
use crate::{
    constraint_code, parse_uuid, parse_uuid_opt, to_rfc3339, truncate_to_millis, RowDecodeError,
    SQLITE_CONSTRAINT_FOREIGNKEY, SQLITE_CONSTRAINT_UNIQUE,
};

/// Repository for deployment projects and their site links.
#[derive(Clone)]
pub struct ProjectRepository {
    pool: SqlitePool,
}

/// Data required to create a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub code: String,
    pub deployment_variant_id: Option<Uuid>,
    pub lifecycle_status: ProjectLifecycleStatus,
    pub planned_start: Option<NaiveDate>,
    pub planned_end: Option<NaiveDate>,
}

/// Summary of a site-link reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SiteLinkChange {
    pub linked: usize,
    pub unarchived: usize,
    pub archived: usize,
}

impl ProjectRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        record: NewProject,
        now: DateTime<Utc>,
    ) -> Result<Project, ProjectError> {
        let now = truncate_to_millis(now);
        sqlx::query(
            "INSERT INTO projects \
             (id, account_id, name, code, deployment_variant_id, lifecycle_status, \
              planned_start, planned_end, archive_state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.account_id.to_string())
        .bind(&record.name)
        .bind(&record.code)
        .bind(record.deployment_variant_id.map(|id| id.to_string()))
        .bind(record.lifecycle_status.as_str())
        .bind(record.planned_start)
        .bind(record.planned_end)
        .bind(ArchiveState::Active.as_str())
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await
        .map_err(map_project_write_error)?;

        Ok(Project {
            id: record.id,
            account_id: record.account_id,
            name: record.name,
            code: record.code,
            deployment_variant_id: record.deployment_variant_id,
            lifecycle_status: record.lifecycle_status,
            planned_start: record.planned_start,
            planned_end: record.planned_end,
            archive_state: ArchiveState::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<Project>, ProjectError> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, account_id, name, code, deployment_variant_id, lifecycle_status, \
                    planned_start, planned_end, archive_state, created_at, updated_at \
               FROM projects WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProjectRow::into_domain).transpose().map_err(Into::into)
    }

    pub async fn list(&self, include_archived: bool) -> Result<Vec<Project>, ProjectError> {
        let sql = if include_archived {
            "SELECT id, account_id, name, code, deployment_variant_id, lifecycle_status, \
                    planned_start, planned_end, archive_state, created_at, updated_at \
               FROM projects ORDER BY name"
        } else {
            "SELECT id, account_id, name, code, deployment_variant_id, lifecycle_status, \
                    planned_start, planned_end, archive_state, created_at, updated_at \
               FROM projects WHERE archive_state = 'ACTIVE' ORDER BY name"
        };
        let rows = sqlx::query_as::<_, ProjectRow>(sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    pub async fn update(&self, project: &Project) -> Result<bool, ProjectError> {
        let result = sqlx::query(
            "UPDATE projects \
                SET account_id = ?, name = ?, code = ?, deployment_variant_id = ?, \
                    lifecycle_status = ?, planned_start = ?, planned_end = ?, \
                    archive_state = ?, updated_at = ? \
              WHERE id = ?",
        )
        .bind(project.account_id.to_string())
        .bind(&project.name)
        .bind(&project.code)
        .bind(project.deployment_variant_id.map(|id| id.to_string()))
        .bind(project.lifecycle_status.as_str())
        .bind(project.planned_start)
        .bind(project.planned_end)
        .bind(project.archive_state.as_str())
        .bind(to_rfc3339(project.updated_at))
        .bind(project.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_project_write_error)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_archive_state(
        &self,
        id: Uuid,
        state: ArchiveState,
        now: DateTime<Utc>,
    ) -> Result<bool, ProjectError> {
        let result = sqlx::query("UPDATE projects SET archive_state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(to_rfc3339(now))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Reconciles the project's site links against the supplied set in one
    /// transaction. New sites are linked, missing ones are soft-archived and
    /// re-supplied archived links are revived.
    pub async fn replace_site_links(
        &self,
        project_id: Uuid,
        site_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<SiteLinkChange, ProjectError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM projects WHERE id = ?")
            .bind(project_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(ProjectError::NotFound);
        }

        let existing = sqlx::query_as::<_, LinkRow>(
            "SELECT project_id, site_id, is_archived, linked_at \
               FROM project_sites WHERE project_id = ?",
        )
        .bind(project_id.to_string())
        .fetch_all(&mut *tx)
        .await?;

        let wanted: HashSet<Uuid> = site_ids.iter().copied().collect();
        let mut change = SiteLinkChange::default();
        let mut known = HashSet::new();

        for row in &existing {
            let site_id = parse_uuid("site_id", &row.site_id)?;
            known.insert(site_id);
            if wanted.contains(&site_id) {
                if row.is_archived != 0 {
                    sqlx::query(
                        "UPDATE project_sites SET is_archived = 0, linked_at = ? \
                          WHERE project_id = ? AND site_id = ?",
                    )
                    .bind(to_rfc3339(now))
                    .bind(project_id.to_string())
                    .bind(site_id.to_string())
                    .execute(&mut *tx)
                    .await?;
                    change.unarchived += 1;
                }
            } else if row.is_archived == 0 {
                sqlx::query(
                    "UPDATE project_sites SET is_archived = 1 \
                      WHERE project_id = ? AND site_id = ?",
                )
                .bind(project_id.to_string())
                .bind(site_id.to_string())
                .execute(&mut *tx)
                .await?;
                change.archived += 1;
            }
        }

        for site_id in &wanted {
            if known.contains(site_id) {
                continue;
            }
            sqlx::query(
                "INSERT INTO project_sites (project_id, site_id, is_archived, linked_at) \
                 VALUES (?, ?, 0, ?)",
            )
            .bind(project_id.to_string())
            .bind(site_id.to_string())
            .bind(to_rfc3339(now))
            .execute(&mut *tx)
            .await
            .map_err(|err| match constraint_code(&err).as_deref() {
                Some(SQLITE_CONSTRAINT_FOREIGNKEY) => ProjectError::MissingSite(*site_id),
                _ => ProjectError::Database(err),
            })?;
            change.linked += 1;
        }

        tx.commit().await?;
        Ok(change)
    }

    /// Lists the sites attached to a project through active links.
    pub async fn list_sites(&self, project_id: Uuid) -> Result<Vec<Site>, ProjectError> {
        let rows = sqlx::query_as::<_, SiteRow>(
            "SELECT s.id, s.name, s.site_code, s.address_id, s.timezone, s.archive_state, \
                    s.created_at, s.updated_at \
               FROM sites AS s \
               JOIN project_sites AS ps ON ps.site_id = s.id \
              WHERE ps.project_id = ? AND ps.is_archived = 0 \
              ORDER BY s.name",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    /// Lists all link rows for a project including archived ones.
    pub async fn list_links(&self, project_id: Uuid) -> Result<Vec<ProjectSiteLink>, ProjectError> {
        let rows = sqlx::query_as::<_, LinkRow>(
            "SELECT project_id, site_id, is_archived, linked_at \
               FROM project_sites WHERE project_id = ? ORDER BY site_id",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }
}

fn map_project_write_error(err: sqlx::Error) -> ProjectError {
    match constraint_code(&err).as_deref() {
        Some(SQLITE_CONSTRAINT_FOREIGNKEY) => ProjectError::MissingParent,
        _ => ProjectError::Database(err),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: String,
    account_id: String,
    name: String,
    code: String,
    deployment_variant_id: Option<String>,
    lifecycle_status: String,
    planned_start: Option<NaiveDate>,
    planned_end: Option<NaiveDate>,
    archive_state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProjectRow {
    fn into_domain(self) -> Result<Project, RowDecodeError> {
        Ok(Project {
            id: parse_uuid("id", &self.id)?,
            account_id: parse_uuid("account_id", &self.account_id)?,
            name: self.name,
            code: self.code,
            deployment_variant_id: parse_uuid_opt(
                "deployment_variant_id",
                self.deployment_variant_id.as_deref(),
            )?,
            lifecycle_status: ProjectLifecycleStatus::from_db(&self.lifecycle_status),
            planned_start: self.planned_start,
            planned_end: self.planned_end,
            archive_state: ArchiveState::from_db(&self.archive_state),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LinkRow {
    project_id: String,
    site_id: String,
    is_archived: i64,
    linked_at: DateTime<Utc>,
}

impl LinkRow {
    fn into_domain(self) -> Result<ProjectSiteLink, RowDecodeError> {
        Ok(ProjectSiteLink {
            project_id: parse_uuid("project_id", &self.project_id)?,
            site_id: parse_uuid("site_id", &self.site_id)?,
            is_archived: self.is_archived != 0,
            linked_at: self.linked_at,
        })
    }
}

/// Errors that can occur while operating on projects.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("project does not exist")]
    NotFound,
    #[error("referenced account or deployment variant does not exist")]
    MissingParent,
    #[error("referenced site {0} does not exist")]
    MissingSite(Uuid),
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for deployment variant blueprints.
#[derive(Clone)]
pub struct DeploymentVariantRepository {
    pool: SqlitePool,
}

/// Data required to create a deployment variant.
#[derive(Debug, Clone)]
pub struct NewDeploymentVariant {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
}

impl DeploymentVariantRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        record: NewDeploymentVariant,
        now: DateTime<Utc>,
    ) -> Result<DeploymentVariant, VariantError> {
        let now = truncate_to_millis(now);
        sqlx::query(
            "INSERT INTO deployment_variants (id, code, name, description, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.code)
        .bind(&record.name)
        .bind(&record.description)
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await
        .map_err(|err| match constraint_code(&err).as_deref() {
            Some(SQLITE_CONSTRAINT_UNIQUE) => VariantError::DuplicateCode,
            _ => VariantError::Database(err),
        })?;

        Ok(DeploymentVariant {
            id: record.id,
            code: record.code,
            name: record.name,
            description: record.description,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<DeploymentVariant>, VariantError> {
        let row = sqlx::query_as::<_, VariantRow>(
            "SELECT id, code, name, description, created_at, updated_at \
               FROM deployment_variants WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(VariantRow::into_domain).transpose().map_err(Into::into)
    }

    pub async fn list(&self) -> Result<Vec<DeploymentVariant>, VariantError> {
        let rows = sqlx::query_as::<_, VariantRow>(
            "SELECT id, code, name, description, created_at, updated_at \
               FROM deployment_variants ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    pub async fn update(&self, variant: &DeploymentVariant) -> Result<bool, VariantError> {
        let result = sqlx::query(
            "UPDATE deployment_variants \
                SET code = ?, name = ?, description = ?, updated_at = ? \
              WHERE id = ?",
        )
        .bind(&variant.code)
        .bind(&variant.name)
        .bind(&variant.description)
        .bind(to_rfc3339(variant.updated_at))
        .bind(variant.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|err| match constraint_code(&err).as_deref() {
            Some(SQLITE_CONSTRAINT_UNIQUE) => VariantError::DuplicateCode,
            _ => VariantError::Database(err),
        })?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, VariantError> {
        let result = sqlx::query("DELETE FROM deployment_variants WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|err| match constraint_code(&err).as_deref() {
                Some(SQLITE_CONSTRAINT_FOREIGNKEY) => VariantError::InUse,
                _ => VariantError::Database(err),
            })?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VariantRow {
    id: String,
    code: String,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VariantRow {
    fn into_domain(self) -> Result<DeploymentVariant, RowDecodeError> {
        Ok(DeploymentVariant {
            id: parse_uuid("id", &self.id)?,
            code: self.code,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while operating on deployment variants.
#[derive(Debug, Error)]
pub enum VariantError {
    #[error("a deployment variant with the same code already exists")]
    DuplicateCode,
    #[error("deployment variant is still referenced by projects")]
    InUse,
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
