use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use metrics::counter;
use serde::Deserialize;
use tracing::error;

use rollout_core::report::{resolve_range, DatePreset, DateRange};
use rollout_storage::{
    ContractExpiryRow, InstalledSoftwareBreakdownRow, ProjectActivityRow, ReportError,
};

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Date-range parameters shared by all reports. Without a preset the
/// report defaults to the last 30 days; supplying `from`/`to` alone
/// implies the custom preset.
#[derive(Debug, Deserialize, Default)]
pub struct ReportQuery {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

fn resolve(state: &AppState, query: &ReportQuery) -> Result<DateRange, ProblemResponse> {
    let preset = match query.preset.as_deref() {
        Some(raw) => DatePreset::parse(raw)
            .ok_or_else(|| ProblemResponse::validation(format!("unknown preset: {raw}")))?,
        None if query.from.is_some() || query.to.is_some() => DatePreset::Custom,
        None => DatePreset::Last30Days,
    };

    resolve_range(
        preset,
        state.now(),
        state.report_timezone(),
        query.from,
        query.to,
    )
    .map_err(|err| ProblemResponse::validation(err.to_string()))
}

pub async fn installed_software(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Vec<InstalledSoftwareBreakdownRow>>, ProblemResponse> {
    let range = resolve(&state, &query)?;
    counter!("report_runs_total", "report" => "installed_software").increment(1);

    let rows = state
        .storage()
        .reports()
        .installed_software_breakdown(range)
        .await
        .map_err(map_error)?;
    Ok(Json(rows))
}

pub async fn expiring_contracts(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Vec<ContractExpiryRow>>, ProblemResponse> {
    let range = resolve(&state, &query)?;
    counter!("report_runs_total", "report" => "expiring_contracts").increment(1);

    let rows = state
        .storage()
        .reports()
        .expiring_contracts(range)
        .await
        .map_err(map_error)?;
    Ok(Json(rows))
}

pub async fn project_activity(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Vec<ProjectActivityRow>>, ProblemResponse> {
    let range = resolve(&state, &query)?;
    counter!("report_runs_total", "report" => "project_activity").increment(1);

    let rows = state
        .storage()
        .reports()
        .project_activity(range)
        .await
        .map_err(map_error)?;
    Ok(Json(rows))
}

fn map_error(err: ReportError) -> ProblemResponse {
    error!(stage = "api", error = %err, "report query failed");
    ProblemResponse::internal("report query failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{
        app_router,
        test_support::{get, post_json, read_json, setup_state},
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn unknown_preset_is_rejected() {
        let (state, _worker) = setup_state().await;

        let response = app_router(state)
            .oneshot(get("/reports/project-activity?preset=fortnight"))
            .await
            .expect("response");
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn custom_preset_requires_both_bounds() {
        let (state, _worker) = setup_state().await;

        let response = app_router(state)
            .oneshot(get("/reports/expiring-contracts?from=2024-01-01"))
            .await
            .expect("response");
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn expiring_contracts_report_covers_custom_window() {
        let (state, _worker) = setup_state().await;

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/accounts",
                json!({"name": "Report Holder", "sap_id": Uuid::new_v4().to_string()}),
            ))
            .await
            .expect("response");
        let account_id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        let contract_number = format!("SC-{}", Uuid::new_v4());
        let response = app_router(state.clone())
            .oneshot(post_json(
                "/servicecontracts",
                json!({
                    "account_id": account_id,
                    "contract_number": contract_number.clone(),
                    "starts_on": "2024-01-01",
                    "ends_on": "2024-06-15",
                    "support_level": "gold"
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);

        let response = app_router(state)
            .oneshot(get(
                "/reports/expiring-contracts?preset=custom&from=2024-06-01&to=2024-06-30",
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let rows = read_json(response).await;
        assert!(rows
            .as_array()
            .expect("array")
            .iter()
            .any(|row| row["contract_number"] == contract_number));
    }

    #[tokio::test]
    async fn default_window_is_the_last_thirty_days() {
        let (state, _worker) = setup_state().await;
        // Pin the clock so the rows written below land inside a known
        // default window and rows from concurrent tests land outside it.
        let anchor = Utc
            .with_ymd_and_hms(2024, 7, 1, 12, 0, 0)
            .single()
            .expect("anchor");
        let state = state.with_clock(Arc::new(move || anchor));
        let site_name = format!("Window Site {}", Uuid::new_v4().simple());

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/sites",
                json!({
                    "name": site_name.clone(),
                    "site_code": format!("SITE-{}", Uuid::new_v4()),
                    "timezone": "UTC"
                }),
            ))
            .await
            .expect("response");
        let site_id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/software",
                json!({
                    "name": format!("Agent {}", Uuid::new_v4().simple()),
                    "vendor": "Rollout",
                    "version": "1.0.0"
                }),
            ))
            .await
            .expect("response");
        let software_id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/installedsoftware",
                json!({"software_id": software_id, "site_id": site_id}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);

        let response = app_router(state)
            .oneshot(get("/reports/installed-software"))
            .await
            .expect("response");
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let rows = read_json(response).await;
        let row = rows
            .as_array()
            .expect("array")
            .iter()
            .find(|row| row["site_name"] == site_name)
            .expect("seeded site in the default window");
        assert_eq!(row["status"], "PLANNED");
        assert_eq!(row["installations"], 1);
    }
}
