use chrono::NaiveDate;
use sqlx::SqlitePool;
use thiserror::Error;

use rollout_core::report::DateRange;

use crate::{to_rfc3339, RowDecodeError};

/// Repository running the parameterized reporting queries. All queries take
/// a resolved [`DateRange`]; preset handling lives in the core crate.
#[derive(Clone)]
pub struct ReportRepository {
    pool: SqlitePool,
}

/// Installed-software counts per site and status.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, serde::Serialize)]
pub struct InstalledSoftwareBreakdownRow {
    pub site_id: String,
    pub site_name: String,
    pub status: String,
    pub installations: i64,
}

/// A contract ending inside the reporting window.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, serde::Serialize)]
pub struct ContractExpiryRow {
    pub contract_id: String,
    pub contract_number: String,
    pub account_name: String,
    pub support_level: String,
    pub ends_on: NaiveDate,
}

/// A project whose planned window intersects the reporting window.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, serde::Serialize)]
pub struct ProjectActivityRow {
    pub project_id: String,
    pub name: String,
    pub code: String,
    pub lifecycle_status: String,
    pub active_sites: i64,
}

impl ReportRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Counts installation records per site and status inside the range.
    /// Records without an installation timestamp fall back to their
    /// creation time.
    pub async fn installed_software_breakdown(
        &self,
        range: DateRange,
    ) -> Result<Vec<InstalledSoftwareBreakdownRow>, ReportError> {
        let rows = sqlx::query_as::<_, InstalledSoftwareBreakdownRow>(
            "SELECT s.id AS site_id, s.name AS site_name, i.status AS status, \
                    COUNT(*) AS installations \
               FROM installed_software AS i \
               JOIN sites AS s ON s.id = i.site_id \
              WHERE COALESCE(i.installed_at, i.created_at) >= ? \
                AND COALESCE(i.installed_at, i.created_at) < ? \
              GROUP BY s.id, s.name, i.status \
              ORDER BY s.name, i.status",
        )
        .bind(to_rfc3339(range.from))
        .bind(to_rfc3339(range.to))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Lists active contracts whose end date falls inside the range.
    pub async fn expiring_contracts(
        &self,
        range: DateRange,
    ) -> Result<Vec<ContractExpiryRow>, ReportError> {
        let (from, to) = range.date_bounds();
        let rows = sqlx::query_as::<_, ContractExpiryRow>(
            "SELECT c.id AS contract_id, c.contract_number, a.name AS account_name, \
                    c.support_level, c.ends_on \
               FROM service_contracts AS c \
               JOIN accounts AS a ON a.id = c.account_id \
              WHERE c.archive_state = 'ACTIVE' \
                AND c.ends_on >= ? AND c.ends_on <= ? \
              ORDER BY c.ends_on, c.contract_number",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Lists active projects whose planned window intersects the range,
    /// with the number of actively linked sites. Projects without planned
    /// dates are treated as always active.
    pub async fn project_activity(
        &self,
        range: DateRange,
    ) -> Result<Vec<ProjectActivityRow>, ReportError> {
        let (from, to) = range.date_bounds();
        let rows = sqlx::query_as::<_, ProjectActivityRow>(
            "SELECT p.id AS project_id, p.name, p.code, p.lifecycle_status, \
                    (SELECT COUNT(*) FROM project_sites AS ps \
                      WHERE ps.project_id = p.id AND ps.is_archived = 0) AS active_sites \
               FROM projects AS p \
              WHERE p.archive_state = 'ACTIVE' \
                AND COALESCE(p.planned_start, ?) <= ? \
                AND COALESCE(p.planned_end, ?) >= ? \
              ORDER BY p.name",
        )
        .bind(from)
        .bind(to)
        .bind(to)
        .bind(from)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Errors that can occur while running reports.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::NewSite;
    use crate::test_support::setup_db;
    use crate::{NewAccount, NewInstalledSoftware, NewServiceContract, NewSoftware};
    use chrono::{TimeZone, Utc};
    use rollout_core::report::{resolve_range, DatePreset};
    use rollout_core::types::InstalledSoftwareStatus;
    use uuid::Uuid;

    #[tokio::test]
    async fn breakdown_counts_by_site_and_status() {
        let db = setup_db().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).single().expect("now");

        let site = db
            .sites()
            .insert(
                NewSite {
                    id: Uuid::new_v4(),
                    name: format!("Depot {}", Uuid::new_v4().simple()),
                    site_code: format!("SITE-{}", Uuid::new_v4()),
                    address_id: None,
                    timezone: "UTC".to_string(),
                },
                now,
            )
            .await
            .expect("site");
        let software = db
            .software()
            .insert(
                NewSoftware {
                    id: Uuid::new_v4(),
                    name: "RadioFW".to_string(),
                    vendor: "Acme".to_string(),
                    version: "2.0".to_string(),
                },
                now,
            )
            .await
            .expect("software");

        for status in [
            InstalledSoftwareStatus::Installed,
            InstalledSoftwareStatus::Installed,
            InstalledSoftwareStatus::Failed,
        ] {
            db.installed_software()
                .insert(
                    NewInstalledSoftware {
                        id: Uuid::new_v4(),
                        software_id: software.id,
                        site_id: site.id,
                        status,
                        installed_at: Some(now),
                    },
                    now,
                )
                .await
                .expect("installation");
        }

        let range = resolve_range(DatePreset::Today, now, "UTC", None, None).expect("range");
        let rows = db
            .reports()
            .installed_software_breakdown(range)
            .await
            .expect("report");

        let installed = rows
            .iter()
            .find(|row| row.site_id == site.id.to_string() && row.status == "INSTALLED")
            .expect("installed row");
        assert_eq!(installed.installations, 2);
        let failed = rows
            .iter()
            .find(|row| row.site_id == site.id.to_string() && row.status == "FAILED")
            .expect("failed row");
        assert_eq!(failed.installations, 1);
    }

    #[tokio::test]
    async fn expiring_contracts_respects_the_window() {
        let db = setup_db().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).single().expect("now");

        let account = db
            .accounts()
            .insert(
                NewAccount {
                    id: Uuid::new_v4(),
                    name: "Window Test Account".to_string(),
                    sap_id: Uuid::new_v4().to_string(),
                    crm_id: None,
                    contact_email: None,
                    address_id: None,
                },
                now,
            )
            .await
            .expect("account");

        let inside = format!("SC-IN-{}", Uuid::new_v4());
        let outside = format!("SC-OUT-{}", Uuid::new_v4());
        for (number, ends_on) in [
            (&inside, NaiveDate::from_ymd_opt(2024, 5, 20).expect("date")),
            (&outside, NaiveDate::from_ymd_opt(2024, 8, 1).expect("date")),
        ] {
            db.service_contracts()
                .insert(
                    NewServiceContract {
                        id: Uuid::new_v4(),
                        account_id: account.id,
                        project_id: None,
                        site_id: None,
                        contract_number: number.clone(),
                        starts_on: NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
                        ends_on,
                        support_level: "silver".to_string(),
                    },
                    now,
                )
                .await
                .expect("contract");
        }

        let range = resolve_range(DatePreset::CurrentMonth, now, "UTC", None, None).expect("range");
        let rows = db.reports().expiring_contracts(range).await.expect("report");

        assert!(rows.iter().any(|row| row.contract_number == inside));
        assert!(rows.iter().all(|row| row.contract_number != outside));
    }
}
