use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use rollout_core::types::{ArchiveState, Site};

use crate::{
    constraint_code, parse_uuid, parse_uuid_opt, to_rfc3339, truncate_to_millis, RowDecodeError,
    SQLITE_CONSTRAINT_FOREIGNKEY,
};

/// Repository for physical deployment sites.
#[derive(Clone)]
pub struct SiteRepository {
    pool: SqlitePool,
}

/// Data required to create a site.
#[derive(Debug, Clone)]
pub struct NewSite {
    pub id: Uuid,
    pub name: String,
    pub site_code: String,
    pub address_id: Option<Uuid>,
    pub timezone: String,
}

impl SiteRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: NewSite, now: DateTime<Utc>) -> Result<Site, SiteError> {
        let now = truncate_to_millis(now);
        sqlx::query(
            "INSERT INTO sites \
             (id, name, site_code, address_id, timezone, archive_state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(&record.site_code)
        .bind(record.address_id.map(|id| id.to_string()))
        .bind(&record.timezone)
        .bind(ArchiveState::Active.as_str())
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(Site {
            id: record.id,
            name: record.name,
            site_code: record.site_code,
            address_id: record.address_id,
            timezone: record.timezone,
            archive_state: ArchiveState::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<Site>, SiteError> {
        let row = sqlx::query_as::<_, SiteRow>(
            "SELECT id, name, site_code, address_id, timezone, archive_state, \
                    created_at, updated_at \
               FROM sites WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SiteRow::into_domain).transpose().map_err(Into::into)
    }

    pub async fn list(&self, include_archived: bool) -> Result<Vec<Site>, SiteError> {
        let sql = if include_archived {
            "SELECT id, name, site_code, address_id, timezone, archive_state, \
                    created_at, updated_at \
               FROM sites ORDER BY name"
        } else {
            "SELECT id, name, site_code, address_id, timezone, archive_state, \
                    created_at, updated_at \
               FROM sites WHERE archive_state = 'ACTIVE' ORDER BY name"
        };
        let rows = sqlx::query_as::<_, SiteRow>(sql).fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    pub async fn update(&self, site: &Site) -> Result<bool, SiteError> {
        let result = sqlx::query(
            "UPDATE sites \
                SET name = ?, site_code = ?, address_id = ?, timezone = ?, \
                    archive_state = ?, updated_at = ? \
              WHERE id = ?",
        )
        .bind(&site.name)
        .bind(&site.site_code)
        .bind(site.address_id.map(|id| id.to_string()))
        .bind(&site.timezone)
        .bind(site.archive_state.as_str())
        .bind(to_rfc3339(site.updated_at))
        .bind(site.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_archive_state(
        &self,
        id: Uuid,
        state: ArchiveState,
        now: DateTime<Utc>,
    ) -> Result<bool, SiteError> {
        let result = sqlx::query("UPDATE sites SET archive_state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(to_rfc3339(now))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_write_error(err: sqlx::Error) -> SiteError {
    match constraint_code(&err).as_deref() {
        Some(SQLITE_CONSTRAINT_FOREIGNKEY) => SiteError::MissingAddress,
        _ => SiteError::Database(err),
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SiteRow {
    id: String,
    name: String,
    site_code: String,
    address_id: Option<String>,
    timezone: String,
    archive_state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SiteRow {
    pub(crate) fn into_domain(self) -> Result<Site, RowDecodeError> {
        Ok(Site {
            id: parse_uuid("id", &self.id)?,
            name: self.name,
            site_code: self.site_code,
            address_id: parse_uuid_opt("address_id", self.address_id.as_deref())?,
            timezone: self.timezone,
            archive_state: ArchiveState::from_db(&self.archive_state),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while operating on sites.
#[derive(Debug, Error)]
pub enum SiteError {
    #[error("referenced address does not exist")]
    MissingAddress,
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;

    fn sample() -> NewSite {
        NewSite {
            id: Uuid::new_v4(),
            name: "Harbour Yard".to_string(),
            site_code: format!("SITE-{}", Uuid::new_v4()),
            address_id: None,
            timezone: "Europe/Oslo".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_then_fetch_round_trips() {
        let db = setup_db().await;
        let repo = db.sites();

        let created = repo.insert(sample(), Utc::now()).await.expect("insert");
        let fetched = repo.fetch(created.id).await.expect("fetch").expect("present");
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn update_persists_changed_fields() {
        let db = setup_db().await;
        let repo = db.sites();

        let mut site = repo.insert(sample(), Utc::now()).await.expect("insert");
        site.name = "Harbour Yard North".to_string();
        site.timezone = "UTC".to_string();
        site.updated_at = Utc::now();

        assert!(repo.update(&site).await.expect("update"));
        let fetched = repo.fetch(site.id).await.expect("fetch").expect("present");
        assert_eq!(fetched.name, "Harbour Yard North");
        assert_eq!(fetched.timezone, "UTC");
    }

    #[tokio::test]
    async fn archive_hides_site_from_default_listing() {
        let db = setup_db().await;
        let repo = db.sites();

        let created = repo.insert(sample(), Utc::now()).await.expect("insert");
        repo.set_archive_state(created.id, ArchiveState::Archived, Utc::now())
            .await
            .expect("archive");

        let active = repo.list(false).await.expect("list");
        assert!(active.iter().all(|site| site.id != created.id));
    }
}
