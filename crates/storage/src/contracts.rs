use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use rollout_core::types::{ArchiveState, ServiceContract};

use crate::{
    constraint_code, parse_uuid, parse_uuid_opt, to_rfc3339, truncate_to_millis, RowDecodeError,
    SQLITE_CONSTRAINT_FOREIGNKEY, SQLITE_CONSTRAINT_UNIQUE,
};

/// Repository for service contracts.
#[derive(Clone)]
pub struct ServiceContractRepository {
    pool: SqlitePool,
}

/// Data required to create a service contract.
#[derive(Debug, Clone)]
pub struct NewServiceContract {
    pub id: Uuid,
    pub account_id: Uuid,
    pub project_id: Option<Uuid>,
    pub site_id: Option<Uuid>,
    pub contract_number: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub support_level: String,
}

impl ServiceContractRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        record: NewServiceContract,
        now: DateTime<Utc>,
    ) -> Result<ServiceContract, ContractError> {
        let now = truncate_to_millis(now);
        sqlx::query(
            "INSERT INTO service_contracts \
             (id, account_id, project_id, site_id, contract_number, starts_on, ends_on, \
              support_level, archive_state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.account_id.to_string())
        .bind(record.project_id.map(|id| id.to_string()))
        .bind(record.site_id.map(|id| id.to_string()))
        .bind(&record.contract_number)
        .bind(record.starts_on)
        .bind(record.ends_on)
        .bind(&record.support_level)
        .bind(ArchiveState::Active.as_str())
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(ServiceContract {
            id: record.id,
            account_id: record.account_id,
            project_id: record.project_id,
            site_id: record.site_id,
            contract_number: record.contract_number,
            starts_on: record.starts_on,
            ends_on: record.ends_on,
            support_level: record.support_level,
            archive_state: ArchiveState::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<ServiceContract>, ContractError> {
        let row = sqlx::query_as::<_, ContractRow>(
            "SELECT id, account_id, project_id, site_id, contract_number, starts_on, ends_on, \
                    support_level, archive_state, created_at, updated_at \
               FROM service_contracts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ContractRow::into_domain).transpose().map_err(Into::into)
    }

    pub async fn list(&self, include_archived: bool) -> Result<Vec<ServiceContract>, ContractError> {
        let sql = if include_archived {
            "SELECT id, account_id, project_id, site_id, contract_number, starts_on, ends_on, \
                    support_level, archive_state, created_at, updated_at \
               FROM service_contracts ORDER BY contract_number"
        } else {
            "SELECT id, account_id, project_id, site_id, contract_number, starts_on, ends_on, \
                    support_level, archive_state, created_at, updated_at \
               FROM service_contracts WHERE archive_state = 'ACTIVE' ORDER BY contract_number"
        };
        let rows = sqlx::query_as::<_, ContractRow>(sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    pub async fn update(&self, contract: &ServiceContract) -> Result<bool, ContractError> {
        let result = sqlx::query(
            "UPDATE service_contracts \
                SET account_id = ?, project_id = ?, site_id = ?, contract_number = ?, \
                    starts_on = ?, ends_on = ?, support_level = ?, archive_state = ?, \
                    updated_at = ? \
              WHERE id = ?",
        )
        .bind(contract.account_id.to_string())
        .bind(contract.project_id.map(|id| id.to_string()))
        .bind(contract.site_id.map(|id| id.to_string()))
        .bind(&contract.contract_number)
        .bind(contract.starts_on)
        .bind(contract.ends_on)
        .bind(&contract.support_level)
        .bind(contract.archive_state.as_str())
        .bind(to_rfc3339(contract.updated_at))
        .bind(contract.id.to_string())
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
    ) -> Result<bool, ContractError> {
        let result =
            sqlx::query("UPDATE service_contracts SET archive_state = ?, updated_at = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(to_rfc3339(now))
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_write_error(err: sqlx::Error) -> ContractError {
    match constraint_code(&err).as_deref() {
        Some(SQLITE_CONSTRAINT_UNIQUE) => ContractError::DuplicateContractNumber,
        Some(SQLITE_CONSTRAINT_FOREIGNKEY) => ContractError::MissingParent,
        _ => ContractError::Database(err),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ContractRow {
    id: String,
    account_id: String,
    project_id: Option<String>,
    site_id: Option<String>,
    contract_number: String,
    starts_on: NaiveDate,
    ends_on: NaiveDate,
    support_level: String,
    archive_state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ContractRow {
    fn into_domain(self) -> Result<ServiceContract, RowDecodeError> {
        Ok(ServiceContract {
            id: parse_uuid("id", &self.id)?,
            account_id: parse_uuid("account_id", &self.account_id)?,
            project_id: parse_uuid_opt("project_id", self.project_id.as_deref())?,
            site_id: parse_uuid_opt("site_id", self.site_id.as_deref())?,
            contract_number: self.contract_number,
            starts_on: self.starts_on,
            ends_on: self.ends_on,
            support_level: self.support_level,
            archive_state: ArchiveState::from_db(&self.archive_state),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while operating on service contracts.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("a contract with the same contract number already exists")]
    DuplicateContractNumber,
    #[error("referenced account, project or site does not exist")]
    MissingParent,
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
