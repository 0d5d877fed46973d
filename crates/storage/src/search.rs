use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use rollout_core::search::{SearchDocument, SearchDomain, SearchHit};

use crate::{parse_uuid, RowDecodeError};

/// Repository maintaining the FTS5 side index. Writes here are best-effort
/// from the caller's point of view: a failed index update must never roll
/// back the owning row.
#[derive(Clone)]
pub struct SearchRepository {
    pool: SqlitePool,
}

impl SearchRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replaces the index entry for a document.
    pub async fn upsert(&self, document: &SearchDocument) -> Result<(), SearchIndexError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM search_index WHERE entity_id = ? AND domain = ?")
            .bind(document.entity_id.to_string())
            .bind(document.domain.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO search_index (entity_id, domain, title, body) VALUES (?, ?, ?, ?)")
            .bind(document.entity_id.to_string())
            .bind(document.domain.as_str())
            .bind(&document.title)
            .bind(&document.body)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drops the index entry for an entity.
    pub async fn remove(
        &self,
        domain: SearchDomain,
        entity_id: Uuid,
    ) -> Result<(), SearchIndexError> {
        sqlx::query("DELETE FROM search_index WHERE entity_id = ? AND domain = ?")
            .bind(entity_id.to_string())
            .bind(domain.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Runs a ranked full-text query. Returns an empty result for queries
    /// with no usable tokens.
    pub async fn query(
        &self,
        raw_query: &str,
        domain: Option<SearchDomain>,
        limit: u32,
    ) -> Result<Vec<SearchHit>, SearchIndexError> {
        let Some(match_expr) = build_match_expression(raw_query) else {
            return Ok(Vec::new());
        };

        let rows = if let Some(domain) = domain {
            sqlx::query_as::<_, HitRow>(
                "SELECT entity_id, domain, title, \
                        snippet(search_index, 3, '[', ']', '…', 12) AS snippet \
                   FROM search_index \
                  WHERE search_index MATCH ? AND domain = ? \
                  ORDER BY rank LIMIT ?",
            )
            .bind(&match_expr)
            .bind(domain.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, HitRow>(
                "SELECT entity_id, domain, title, \
                        snippet(search_index, 3, '[', ']', '…', 12) AS snippet \
                   FROM search_index \
                  WHERE search_index MATCH ? \
                  ORDER BY rank LIMIT ?",
            )
            .bind(&match_expr)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(HitRow::into_domain).collect()
    }

    /// Rebuilds the whole index from the base tables in one transaction.
    /// Returns the number of indexed documents.
    pub async fn rebuild(&self) -> Result<u64, SearchIndexError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM search_index")
            .execute(&mut *tx)
            .await?;

        let mut indexed = 0;
        let account_rows = sqlx::query_as::<_, (String, String, String, Option<String>, Option<String>)>(
            "SELECT id, name, sap_id, crm_id, contact_email FROM accounts",
        )
        .fetch_all(&mut *tx)
        .await?;
        for (id, name, sap_id, crm_id, contact_email) in account_rows {
            let mut body = sap_id;
            if let Some(crm_id) = crm_id {
                body.push(' ');
                body.push_str(&crm_id);
            }
            if let Some(email) = contact_email {
                body.push(' ');
                body.push_str(&email);
            }
            insert_entry(&mut tx, &id, SearchDomain::Account, &name, &body).await?;
            indexed += 1;
        }

        let project_rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, name, code FROM projects",
        )
        .fetch_all(&mut *tx)
        .await?;
        for (id, name, code) in project_rows {
            insert_entry(&mut tx, &id, SearchDomain::Project, &name, &code).await?;
            indexed += 1;
        }

        let site_rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT id, name, site_code FROM sites",
        )
        .fetch_all(&mut *tx)
        .await?;
        for (id, name, site_code) in site_rows {
            insert_entry(&mut tx, &id, SearchDomain::Site, &name, &site_code).await?;
            indexed += 1;
        }

        let software_rows = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id, name, vendor, version FROM software",
        )
        .fetch_all(&mut *tx)
        .await?;
        for (id, name, vendor, version) in software_rows {
            let body = format!("{vendor} {version}");
            insert_entry(&mut tx, &id, SearchDomain::Software, &name, &body).await?;
            indexed += 1;
        }

        tx.commit().await?;
        Ok(indexed)
    }
}

async fn insert_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entity_id: &str,
    domain: SearchDomain,
    title: &str,
    body: &str,
) -> Result<(), SearchIndexError> {
    sqlx::query("INSERT INTO search_index (entity_id, domain, title, body) VALUES (?, ?, ?, ?)")
        .bind(entity_id)
        .bind(domain.as_str())
        .bind(title)
        .bind(body)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Turns free-form user input into a safe FTS5 match expression: each
/// token is quoted (neutralizing operator syntax) and prefix-matched.
fn build_match_expression(raw: &str) -> Option<String> {
    let mut terms = Vec::new();
    for token in raw.split_whitespace() {
        let cleaned = token.replace('"', "\"\"");
        if cleaned.is_empty() {
            continue;
        }
        terms.push(format!("\"{cleaned}\"*"));
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HitRow {
    entity_id: String,
    domain: String,
    title: String,
    snippet: String,
}

impl HitRow {
    fn into_domain(self) -> Result<SearchHit, SearchIndexError> {
        let domain = SearchDomain::parse(&self.domain)
            .ok_or_else(|| SearchIndexError::UnknownDomain(self.domain.clone()))?;
        Ok(SearchHit {
            entity_id: parse_uuid("entity_id", &self.entity_id)?,
            domain,
            title: self.title,
            snippet: self.snippet,
        })
    }
}

/// Errors that can occur while maintaining or querying the index.
#[derive(Debug, Error)]
pub enum SearchIndexError {
    #[error("index row carries unknown domain: {0}")]
    UnknownDomain(String),
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
