mod accounts;
mod contracts;
mod hardware;
mod lookup;
mod projects;
mod reports;
mod search;
mod sites;
mod software;

use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

pub use accounts::{AccountError, AccountRepository, NewAccount};
pub use contracts::{ContractError, NewServiceContract, ServiceContractRepository};
pub use hardware::{HardwareError, HardwareRepository, NewHardwareUnit};
pub use lookup::{LookupError, LookupRepository, LookupRow, LookupTable};
pub use projects::{
    DeploymentVariantRepository, NewDeploymentVariant, NewProject, ProjectError, ProjectRepository,
    SiteLinkChange, VariantError,
};
pub use reports::{
    ContractExpiryRow, InstalledSoftwareBreakdownRow, ProjectActivityRow, ReportError,
    ReportRepository,
};
pub use search::{SearchIndexError, SearchRepository};
pub use sites::{NewSite, SiteError, SiteRepository};
pub use software::{
    InstalledSoftwareError, InstalledSoftwareRepository, NewInstalledSoftware, NewSoftware,
    NewUpgradePlan, SoftwareError, SoftwareRepository, UpgradePlanError, UpgradePlanRepository,
};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    pub fn accounts(&self) -> AccountRepository {
        AccountRepository::new(self.pool.clone())
    }

    pub fn projects(&self) -> ProjectRepository {
        ProjectRepository::new(self.pool.clone())
    }

    pub fn deployment_variants(&self) -> DeploymentVariantRepository {
        DeploymentVariantRepository::new(self.pool.clone())
    }

    pub fn sites(&self) -> SiteRepository {
        SiteRepository::new(self.pool.clone())
    }

    pub fn hardware(&self) -> HardwareRepository {
        HardwareRepository::new(self.pool.clone())
    }

    pub fn software(&self) -> SoftwareRepository {
        SoftwareRepository::new(self.pool.clone())
    }

    pub fn installed_software(&self) -> InstalledSoftwareRepository {
        InstalledSoftwareRepository::new(self.pool.clone())
    }

    pub fn upgrade_plans(&self) -> UpgradePlanRepository {
        UpgradePlanRepository::new(self.pool.clone())
    }

    pub fn service_contracts(&self) -> ServiceContractRepository {
        ServiceContractRepository::new(self.pool.clone())
    }

    pub fn lookup(&self) -> LookupRepository {
        LookupRepository::new(self.pool.clone())
    }

    pub fn search(&self) -> SearchRepository {
        SearchRepository::new(self.pool.clone())
    }

    pub fn reports(&self) -> ReportRepository {
        ReportRepository::new(self.pool.clone())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A stored column failed to decode into its domain representation.
#[derive(Debug, Error)]
pub enum RowDecodeError {
    #[error("invalid uuid in column {column}: {source}")]
    InvalidUuid {
        column: &'static str,
        source: uuid::Error,
    },
}

pub(crate) fn parse_uuid(column: &'static str, value: &str) -> Result<Uuid, RowDecodeError> {
    Uuid::parse_str(value).map_err(|source| RowDecodeError::InvalidUuid { column, source })
}

pub(crate) fn parse_uuid_opt(
    column: &'static str,
    value: Option<&str>,
) -> Result<Option<Uuid>, RowDecodeError> {
    value.map(|raw| parse_uuid(column, raw)).transpose()
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Normalizes a timestamp to the millisecond precision the database stores,
/// so records returned from writes compare equal to what a later fetch
/// decodes.
pub fn truncate_to_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    value
        .duration_trunc(Duration::milliseconds(1))
        .unwrap_or(value)
}

// SQLite extended result codes surfaced through sqlx.
pub(crate) const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
pub(crate) const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";

pub(crate) fn constraint_code(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err {
        db_err.code().map(|code| code.into_owned())
    } else {
        None
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::setup_db;
    use super::{to_rfc3339, truncate_to_millis, Database};
    use crate::accounts::NewAccount;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    #[test]
    fn truncated_timestamps_survive_the_text_encoding() {
        let now = Utc::now();
        let truncated = truncate_to_millis(now);
        let parsed: DateTime<Utc> = to_rfc3339(truncated).parse().expect("rfc3339");
        assert_eq!(parsed, truncated);
    }

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;

        let tables: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(db.pool())
                .await
                .expect("fetch tables");
        assert!(tables.0 >= 15, "expected inventory tables to be created");
    }

    #[tokio::test]
    async fn file_backed_database_persists_between_connections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("rollout.db").display()
        );
        let account_id = Uuid::new_v4();

        {
            let db = Database::connect(&url).await.expect("connect");
            db.run_migrations().await.expect("migrations");
            db.accounts()
                .insert(
                    NewAccount {
                        id: account_id,
                        name: "Persisted Account".to_string(),
                        sap_id: Uuid::new_v4().to_string(),
                        crm_id: None,
                        contact_email: None,
                        address_id: None,
                    },
                    Utc::now(),
                )
                .await
                .expect("insert");
        }

        let db = Database::connect(&url).await.expect("reconnect");
        let account = db
            .accounts()
            .fetch(account_id)
            .await
            .expect("fetch")
            .expect("row survives reconnect");
        assert_eq!(account.name, "Persisted Account");
    }

    #[tokio::test]
    async fn inserted_record_matches_a_later_fetch_exactly() {
        let db = setup_db().await;
        let repo = db.accounts();

        let created = repo
            .insert(
                NewAccount {
                    id: Uuid::new_v4(),
                    name: "Precision Check".to_string(),
                    sap_id: Uuid::new_v4().to_string(),
                    crm_id: None,
                    contact_email: None,
                    address_id: None,
                },
                Utc::now(),
            )
            .await
            .expect("insert");
        let fetched = repo
            .fetch(created.id)
            .await
            .expect("fetch")
            .expect("present");

        assert_eq!(fetched.created_at, created.created_at);
        assert_eq!(fetched.updated_at, created.updated_at);
    }
}
