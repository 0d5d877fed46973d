use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use rollout_core::types::{Account, ArchiveState};

use crate::{
    constraint_code, parse_uuid, parse_uuid_opt, to_rfc3339, truncate_to_millis, RowDecodeError,
    SQLITE_CONSTRAINT_FOREIGNKEY, SQLITE_CONSTRAINT_UNIQUE,
};

/// Repository for customer accounts.
#[derive(Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

/// Data required to create an account. Timestamps and the archive flag are
/// filled in by the repository.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: Uuid,
    pub name: String,
    pub sap_id: String,
    pub crm_id: Option<String>,
    pub contact_email: Option<String>,
    pub address_id: Option<Uuid>,
}

impl AccountRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new account, enforcing the unique SAP id.
    pub async fn insert(
        &self,
        record: NewAccount,
        now: DateTime<Utc>,
    ) -> Result<Account, AccountError> {
        let now = truncate_to_millis(now);
        sqlx::query(
            "INSERT INTO accounts \
             (id, name, sap_id, crm_id, contact_email, address_id, archive_state, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(&record.sap_id)
        .bind(&record.crm_id)
        .bind(&record.contact_email)
        .bind(record.address_id.map(|id| id.to_string()))
        .bind(ArchiveState::Active.as_str())
        .bind(to_rfc3339(now))
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(Account {
            id: record.id,
            name: record.name,
            sap_id: record.sap_id,
            crm_id: record.crm_id,
            contact_email: record.contact_email,
            address_id: record.address_id,
            archive_state: ArchiveState::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Loads a single account by id.
    pub async fn fetch(&self, id: Uuid) -> Result<Option<Account>, AccountError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, name, sap_id, crm_id, contact_email, address_id, archive_state, \
                    created_at, updated_at \
               FROM accounts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccountRow::into_domain).transpose().map_err(Into::into)
    }

    /// Lists accounts ordered by name. Archived rows are excluded unless
    /// requested.
    pub async fn list(&self, include_archived: bool) -> Result<Vec<Account>, AccountError> {
        let sql = if include_archived {
            "SELECT id, name, sap_id, crm_id, contact_email, address_id, archive_state, \
                    created_at, updated_at \
               FROM accounts ORDER BY name"
        } else {
            "SELECT id, name, sap_id, crm_id, contact_email, address_id, archive_state, \
                    created_at, updated_at \
               FROM accounts WHERE archive_state = 'ACTIVE' ORDER BY name"
        };
        let rows = sqlx::query_as::<_, AccountRow>(sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    /// Writes the full row back. Returns `false` when the account does not
    /// exist.
    pub async fn update(&self, account: &Account) -> Result<bool, AccountError> {
        let result = sqlx::query(
            "UPDATE accounts \
                SET name = ?, sap_id = ?, crm_id = ?, contact_email = ?, address_id = ?, \
                    archive_state = ?, updated_at = ? \
              WHERE id = ?",
        )
        .bind(&account.name)
        .bind(&account.sap_id)
        .bind(&account.crm_id)
        .bind(&account.contact_email)
        .bind(account.address_id.map(|id| id.to_string()))
        .bind(account.archive_state.as_str())
        .bind(to_rfc3339(account.updated_at))
        .bind(account.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Flips the archive flag. Returns `false` when the account does not
    /// exist.
    pub async fn set_archive_state(
        &self,
        id: Uuid,
        state: ArchiveState,
        now: DateTime<Utc>,
    ) -> Result<bool, AccountError> {
        let result = sqlx::query("UPDATE accounts SET archive_state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(to_rfc3339(now))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_write_error(err: sqlx::Error) -> AccountError {
    match constraint_code(&err).as_deref() {
        Some(SQLITE_CONSTRAINT_UNIQUE) => AccountError::DuplicateSapId,
        Some(SQLITE_CONSTRAINT_FOREIGNKEY) => AccountError::MissingAddress,
        _ => AccountError::Database(err),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: String,
    name: String,
    sap_id: String,
    crm_id: Option<String>,
    contact_email: Option<String>,
    address_id: Option<String>,
    archive_state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_domain(self) -> Result<Account, RowDecodeError> {
        Ok(Account {
            id: parse_uuid("id", &self.id)?,
            name: self.name,
            sap_id: self.sap_id,
            crm_id: self.crm_id,
            contact_email: self.contact_email,
            address_id: parse_uuid_opt("address_id", self.address_id.as_deref())?,
            archive_state: ArchiveState::from_db(&self.archive_state),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors that can occur while operating on accounts.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("an account with the same sap id already exists")]
    DuplicateSapId,
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

    fn sample(sap_id: &str) -> NewAccount {
        NewAccount {
            id: Uuid::new_v4(),
            name: "Nordic Rail Ops".to_string(),
            sap_id: sap_id.to_string(),
            crm_id: Some("CRM-17".to_string()),
            contact_email: Some("ops@nordicrail.example".to_string()),
            address_id: None,
        }
    }

    #[tokio::test]
    async fn insert_then_fetch_round_trips() {
        let db = setup_db().await;
        let repo = db.accounts();
        let sap_id = Uuid::new_v4().to_string();

        let created = repo.insert(sample(&sap_id), Utc::now()).await.expect("insert");
        let fetched = repo.fetch(created.id).await.expect("fetch").expect("present");
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn duplicate_sap_id_is_rejected() {
        let db = setup_db().await;
        let repo = db.accounts();
        let sap_id = Uuid::new_v4().to_string();

        repo.insert(sample(&sap_id), Utc::now()).await.expect("first insert");
        let err = repo.insert(sample(&sap_id), Utc::now()).await.unwrap_err();
        assert!(matches!(err, AccountError::DuplicateSapId));
    }

    #[tokio::test]
    async fn archived_accounts_are_hidden_from_default_listing() {
        let db = setup_db().await;
        let repo = db.accounts();
        let sap_id = Uuid::new_v4().to_string();

        let created = repo.insert(sample(&sap_id), Utc::now()).await.expect("insert");
        let archived = repo
            .set_archive_state(created.id, ArchiveState::Archived, Utc::now())
            .await
            .expect("archive");
        assert!(archived);

        let active = repo.list(false).await.expect("list");
        assert!(active.iter().all(|account| account.id != created.id));

        let all = repo.list(true).await.expect("list all");
        assert!(all.iter().any(|account| account.id == created.id));
    }

    #[tokio::test]
    async fn missing_address_is_a_foreign_key_error() {
        let db = setup_db().await;
        let repo = db.accounts();
        let mut record = sample(&Uuid::new_v4().to_string());
        record.address_id = Some(Uuid::new_v4());

        let err = repo.insert(record, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AccountError::MissingAddress));
    }
}
