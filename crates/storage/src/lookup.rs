use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    constraint_code, parse_uuid, to_rfc3339, RowDecodeError, SQLITE_CONSTRAINT_FOREIGNKEY,
    SQLITE_CONSTRAINT_UNIQUE,
};

/// Reference tables served by the generic table-driven controller. The
/// registry below is the only source of table and column names that ever
/// reach SQL; request input is matched against it, never interpolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTable {
    Countries,
    Cities,
    Addresses,
}

impl LookupTable {
    pub const ALL: [Self; 3] = [Self::Countries, Self::Cities, Self::Addresses];

    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "countries" => Some(Self::Countries),
            "cities" => Some(Self::Cities),
            "addresses" => Some(Self::Addresses),
            _ => None,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Countries => "countries",
            Self::Cities => "cities",
            Self::Addresses => "addresses",
        }
    }

    /// Writable columns, in declaration order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Countries => &["name", "iso_code"],
            Self::Cities => &["country_id", "name", "postal_code"],
            Self::Addresses => &["city_id", "street", "house_number"],
        }
    }

    /// Columns that must be present and non-null on create.
    pub fn required(self) -> &'static [&'static str] {
        match self {
            Self::Countries => &["name", "iso_code"],
            Self::Cities => &["country_id", "name"],
            Self::Addresses => &["city_id", "street"],
        }
    }
}

/// A generic reference-table row: the id plus the writable columns as a
/// JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRow {
    pub id: Uuid,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repository executing registry-driven CRUD against the reference tables.
#[derive(Clone)]
pub struct LookupRepository {
    pool: SqlitePool,
}

impl LookupRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        table: LookupTable,
        id: Uuid,
        fields: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<LookupRow, LookupError> {
        validate_columns(table, fields)?;
        for column in table.required() {
            match fields.get(*column) {
                Some(Value::String(value)) if !value.trim().is_empty() => {}
                _ => return Err(LookupError::MissingColumn(column)),
            }
        }

        let columns = table.columns();
        let mut sql = format!("INSERT INTO {} (id", table.table());
        for column in columns {
            sql.push_str(", ");
            sql.push_str(column);
        }
        sql.push_str(", created_at, updated_at) VALUES (?");
        for _ in columns {
            sql.push_str(", ?");
        }
        sql.push_str(", ?, ?)");

        let mut query = sqlx::query(&sql).bind(id.to_string());
        for column in columns {
            query = query.bind(string_value(fields.get(*column))?);
        }
        query = query.bind(to_rfc3339(now)).bind(to_rfc3339(now));

        query.execute(&self.pool).await.map_err(map_write_error)?;

        self.fetch(table, id)
            .await?
            .ok_or_else(|| LookupError::Database(sqlx::Error::RowNotFound))
    }

    pub async fn fetch(
        &self,
        table: LookupTable,
        id: Uuid,
    ) -> Result<Option<LookupRow>, LookupError> {
        let sql = select_sql(table, true);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| decode_row(table, &row)).transpose()
    }

    pub async fn list(&self, table: LookupTable) -> Result<Vec<LookupRow>, LookupError> {
        let sql = select_sql(table, false);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(|row| decode_row(table, row)).collect()
    }

    /// Updates the supplied columns only. Returns `false` when the row does
    /// not exist.
    pub async fn update(
        &self,
        table: LookupTable,
        id: Uuid,
        fields: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, LookupError> {
        validate_columns(table, fields)?;
        if fields.is_empty() {
            return Err(LookupError::EmptyUpdate);
        }

        let mut sql = format!("UPDATE {} SET ", table.table());
        let mut first = true;
        for column in table.columns() {
            if fields.contains_key(*column) {
                if !first {
                    sql.push_str(", ");
                }
                sql.push_str(column);
                sql.push_str(" = ?");
                first = false;
            }
        }
        sql.push_str(", updated_at = ? WHERE id = ?");

        let mut query = sqlx::query(&sql);
        for column in table.columns() {
            if let Some(value) = fields.get(*column) {
                query = query.bind(string_value(Some(value))?);
            }
        }
        query = query.bind(to_rfc3339(now)).bind(id.to_string());

        let result = query.execute(&self.pool).await.map_err(map_write_error)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, table: LookupTable, id: Uuid) -> Result<bool, LookupError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table.table());
        let result = sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|err| match constraint_code(&err).as_deref() {
                Some(SQLITE_CONSTRAINT_FOREIGNKEY) => LookupError::InUse,
                _ => LookupError::Database(err),
            })?;

        Ok(result.rows_affected() > 0)
    }
}

fn select_sql(table: LookupTable, by_id: bool) -> String {
    let mut sql = "SELECT id".to_string();
    for column in table.columns() {
        sql.push_str(", ");
        sql.push_str(column);
    }
    sql.push_str(", created_at, updated_at FROM ");
    sql.push_str(table.table());
    if by_id {
        sql.push_str(" WHERE id = ?");
    } else {
        sql.push_str(" ORDER BY created_at");
    }
    sql
}

fn decode_row(table: LookupTable, row: &sqlx::sqlite::SqliteRow) -> Result<LookupRow, LookupError> {
    let id: String = row.try_get("id")?;
    let mut fields = Map::new();
    for column in table.columns() {
        let value: Option<String> = row.try_get(*column)?;
        fields.insert(
            (*column).to_string(),
            value.map(Value::String).unwrap_or(Value::Null),
        );
    }
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(LookupRow {
        id: parse_uuid("id", &id)?,
        fields,
        created_at,
        updated_at,
    })
}

fn validate_columns(table: LookupTable, fields: &Map<String, Value>) -> Result<(), LookupError> {
    for key in fields.keys() {
        if !table.columns().contains(&key.as_str()) {
            return Err(LookupError::UnknownColumn(key.clone()));
        }
    }
    Ok(())
}

fn string_value(value: Option<&Value>) -> Result<Option<String>, LookupError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(LookupError::InvalidValue(other.to_string())),
    }
}

fn map_write_error(err: sqlx::Error) -> LookupError {
    match constraint_code(&err).as_deref() {
        Some(SQLITE_CONSTRAINT_UNIQUE) => LookupError::DuplicateKey,
        Some(SQLITE_CONSTRAINT_FOREIGNKEY) => LookupError::MissingParent,
        _ => LookupError::Database(err),
    }
}

/// Errors that can occur while operating on reference tables.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing required column: {0}")]
    MissingColumn(&'static str),
    #[error("column values must be strings or null, got: {0}")]
    InvalidValue(String),
    #[error("update body contains no columns")]
    EmptyUpdate,
    #[error("a row with the same unique key already exists")]
    DuplicateKey,
    #[error("referenced parent row does not exist")]
    MissingParent,
    #[error("row is still referenced by other records")]
    InUse,
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
