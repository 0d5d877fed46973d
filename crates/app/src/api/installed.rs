use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use rollout_core::types::{InstalledSoftware, InstalledSoftwareStatus};
use rollout_storage::{InstalledSoftwareError, NewInstalledSoftware};

use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateInstalledSoftware {
    pub software_id: Uuid,
    pub site_id: Uuid,
    #[serde(default)]
    pub status: Option<InstalledSoftwareStatus>,
    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,
}

/// Partial update body. Absent fields keep their current values.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateInstalledSoftware {
    #[serde(default)]
    pub software_id: Option<Uuid>,
    #[serde(default)]
    pub site_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<InstalledSoftwareStatus>,
    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct InstalledListQuery {
    #[serde(default)]
    pub site_id: Option<Uuid>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateInstalledSoftware>,
) -> Result<(StatusCode, Json<InstalledSoftware>), ProblemResponse> {
    let record = state
        .storage()
        .installed_software()
        .insert(
            NewInstalledSoftware {
                id: Uuid::new_v4(),
                software_id: body.software_id,
                site_id: body.site_id,
                status: body.status.unwrap_or_default(),
                installed_at: body.installed_at,
            },
            state.now(),
        )
        .await
        .map_err(map_error)?;

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<InstalledListQuery>,
) -> Result<Json<Vec<InstalledSoftware>>, ProblemResponse> {
    let records = state
        .storage()
        .installed_software()
        .list(query.site_id)
        .await
        .map_err(map_error)?;
    Ok(Json(records))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstalledSoftware>, ProblemResponse> {
    let record = state
        .storage()
        .installed_software()
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("installation record does not exist"))?;
    Ok(Json(record))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateInstalledSoftware>,
) -> Result<Json<InstalledSoftware>, ProblemResponse> {
    let repo = state.storage().installed_software();
    let mut record = repo
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("installation record does not exist"))?;

    if let Some(software_id) = body.software_id {
        record.software_id = software_id;
    }
    if let Some(site_id) = body.site_id {
        record.site_id = site_id;
    }
    if let Some(status) = body.status {
        record.status = status;
    }
    if let Some(installed_at) = body.installed_at {
        record.installed_at = Some(installed_at);
    }
    record.updated_at = state.now();

    let updated = repo.update(&record).await.map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found(
            "installation record does not exist",
        ));
    }

    Ok(Json(record))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemResponse> {
    let deleted = state
        .storage()
        .installed_software()
        .delete(id)
        .await
        .map_err(map_error)?;
    if !deleted {
        return Err(ProblemResponse::not_found(
            "installation record does not exist",
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn map_error(err: InstalledSoftwareError) -> ProblemResponse {
    match err {
        InstalledSoftwareError::MissingParent => {
            ProblemResponse::validation("referenced software or site does not exist")
        }
        other => {
            error!(stage = "api", error = %other, "installation operation failed");
            ProblemResponse::internal("installation operation failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{
        app_router,
        test_support::{get, post_json, put_json, read_json, setup_state},
    };
    use serde_json::json;
    use tower::ServiceExt;

    async fn seed_pair(state: &AppState) -> (String, String) {
        let response = app_router(state.clone())
            .oneshot(post_json(
                "/sites",
                json!({
                    "name": "Install Site",
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
                json!({"name": "DispatchSuite", "vendor": "Acme", "version": "4.2.0"}),
            ))
            .await
            .expect("response");
        let software_id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        (software_id, site_id)
    }

    #[tokio::test]
    async fn create_defaults_status_to_planned() {
        let (state, _worker) = setup_state().await;
        let (software_id, site_id) = seed_pair(&state).await;

        let response = app_router(state)
            .oneshot(post_json(
                "/installedsoftware",
                json!({"software_id": software_id, "site_id": site_id}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = read_json(response).await;
        assert_eq!(created["status"], "PLANNED");
    }

    #[tokio::test]
    async fn status_transitions_through_update() {
        let (state, _worker) = setup_state().await;
        let (software_id, site_id) = seed_pair(&state).await;

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/installedsoftware",
                json!({"software_id": software_id, "site_id": site_id}),
            ))
            .await
            .expect("response");
        let id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        let response = app_router(state.clone())
            .oneshot(put_json(
                &format!("/installedsoftware/{id}"),
                json!({"status": "INSTALLED", "installed_at": "2024-05-15T10:00:00Z"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let updated = read_json(response).await;
        assert_eq!(updated["status"], "INSTALLED");

        let response = app_router(state)
            .oneshot(get(&format!("/installedsoftware?site_id={site_id}")))
            .await
            .expect("response");
        let listed = read_json(response).await;
        assert_eq!(listed.as_array().expect("array").len(), 1);
    }

    #[tokio::test]
    async fn missing_parents_are_a_validation_error() {
        let (state, _worker) = setup_state().await;

        let response = app_router(state)
            .oneshot(post_json(
                "/installedsoftware",
                json!({"software_id": Uuid::new_v4(), "site_id": Uuid::new_v4()}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
