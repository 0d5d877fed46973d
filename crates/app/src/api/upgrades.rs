use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use rollout_core::types::UpgradePlan;
use rollout_storage::{NewUpgradePlan, UpgradePlanError};

use crate::api::require_text;
use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateUpgradePlan {
    pub project_id: Uuid,
    pub software_id: Uuid,
    pub target_version: String,
    #[serde(default)]
    pub scheduled_for: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial update body. Absent fields keep their current values.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateUpgradePlan {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub software_id: Option<Uuid>,
    #[serde(default)]
    pub target_version: Option<String>,
    #[serde(default)]
    pub scheduled_for: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpgradePlanListQuery {
    #[serde(default)]
    pub project_id: Option<Uuid>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateUpgradePlan>,
) -> Result<(StatusCode, Json<UpgradePlan>), ProblemResponse> {
    let target_version = require_text("target_version", &body.target_version)?;

    let plan = state
        .storage()
        .upgrade_plans()
        .insert(
            NewUpgradePlan {
                id: Uuid::new_v4(),
                project_id: body.project_id,
                software_id: body.software_id,
                target_version,
                scheduled_for: body.scheduled_for,
                notes: body.notes,
            },
            state.now(),
        )
        .await
        .map_err(map_error)?;

    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<UpgradePlanListQuery>,
) -> Result<Json<Vec<UpgradePlan>>, ProblemResponse> {
    let plans = state
        .storage()
        .upgrade_plans()
        .list(query.project_id)
        .await
        .map_err(map_error)?;
    Ok(Json(plans))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UpgradePlan>, ProblemResponse> {
    let plan = state
        .storage()
        .upgrade_plans()
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("upgrade plan does not exist"))?;
    Ok(Json(plan))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateUpgradePlan>,
) -> Result<Json<UpgradePlan>, ProblemResponse> {
    let repo = state.storage().upgrade_plans();
    let mut plan = repo
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("upgrade plan does not exist"))?;

    if let Some(project_id) = body.project_id {
        plan.project_id = project_id;
    }
    if let Some(software_id) = body.software_id {
        plan.software_id = software_id;
    }
    if let Some(target_version) = body.target_version {
        plan.target_version = require_text("target_version", &target_version)?;
    }
    if let Some(scheduled_for) = body.scheduled_for {
        plan.scheduled_for = Some(scheduled_for);
    }
    if let Some(notes) = body.notes {
        plan.notes = Some(notes);
    }
    plan.updated_at = state.now();

    let updated = repo.update(&plan).await.map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found("upgrade plan does not exist"));
    }

    Ok(Json(plan))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemResponse> {
    let deleted = state
        .storage()
        .upgrade_plans()
        .delete(id)
        .await
        .map_err(map_error)?;
    if !deleted {
        return Err(ProblemResponse::not_found("upgrade plan does not exist"));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn map_error(err: UpgradePlanError) -> ProblemResponse {
    match err {
        UpgradePlanError::MissingParent => {
            ProblemResponse::validation("referenced project or software does not exist")
        }
        other => {
            error!(stage = "api", error = %other, "upgrade plan operation failed");
            ProblemResponse::internal("upgrade plan operation failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{
        app_router,
        test_support::{get, post_json, read_json, setup_state},
    };
    use serde_json::json;
    use tower::ServiceExt;

    async fn seed_project_and_software(state: &AppState) -> (String, String) {
        let response = app_router(state.clone())
            .oneshot(post_json(
                "/accounts",
                json!({"name": "Upgrade Owner", "sap_id": Uuid::new_v4().to_string()}),
            ))
            .await
            .expect("response");
        let account_id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/projects",
                json!({
                    "account_id": account_id,
                    "name": "Upgrade Project",
                    "code": format!("PRJ-{}", Uuid::new_v4())
                }),
            ))
            .await
            .expect("response");
        let project_id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/software",
                json!({"name": "RadioFW", "vendor": "Acme", "version": "2.0"}),
            ))
            .await
            .expect("response");
        let software_id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        (project_id, software_id)
    }

    #[tokio::test]
    async fn create_then_list_by_project() {
        let (state, _worker) = setup_state().await;
        let (project_id, software_id) = seed_project_and_software(&state).await;

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/upgradeplans",
                json!({
                    "project_id": project_id,
                    "software_id": software_id,
                    "target_version": "3.0",
                    "scheduled_for": "2024-09-01"
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app_router(state)
            .oneshot(get(&format!("/upgradeplans?project_id={project_id}")))
            .await
            .expect("response");
        let listed = read_json(response).await;
        let listed = listed.as_array().expect("array");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["target_version"], "3.0");
    }

    #[tokio::test]
    async fn blank_target_version_is_rejected() {
        let (state, _worker) = setup_state().await;
        let (project_id, software_id) = seed_project_and_software(&state).await;

        let response = app_router(state)
            .oneshot(post_json(
                "/upgradeplans",
                json!({
                    "project_id": project_id,
                    "software_id": software_id,
                    "target_version": "  "
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
