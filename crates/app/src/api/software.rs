use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use rollout_core::search::{SearchDocument, SearchDomain};
use rollout_core::types::Software;
use rollout_storage::{NewSoftware, SoftwareError};

use crate::api::{drop_document, require_text, sync_document};
use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSoftware {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

/// Partial update body. Absent fields keep their current values.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateSoftware {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSoftware>,
) -> Result<(StatusCode, Json<Software>), ProblemResponse> {
    let name = require_text("name", &body.name)?;
    let vendor = require_text("vendor", &body.vendor)?;
    let version = require_text("version", &body.version)?;

    let software = state
        .storage()
        .software()
        .insert(
            NewSoftware {
                id: Uuid::new_v4(),
                name,
                vendor,
                version,
            },
            state.now(),
        )
        .await
        .map_err(map_error)?;

    sync_document(&state, &SearchDocument::software(&software)).await;
    Ok((StatusCode::CREATED, Json(software)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Software>>, ProblemResponse> {
    let entries = state.storage().software().list().await.map_err(map_error)?;
    Ok(Json(entries))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Software>, ProblemResponse> {
    let software = state
        .storage()
        .software()
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("software does not exist"))?;
    Ok(Json(software))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateSoftware>,
) -> Result<Json<Software>, ProblemResponse> {
    let repo = state.storage().software();
    let mut software = repo
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("software does not exist"))?;

    if let Some(name) = body.name {
        software.name = require_text("name", &name)?;
    }
    if let Some(vendor) = body.vendor {
        software.vendor = require_text("vendor", &vendor)?;
    }
    if let Some(version) = body.version {
        software.version = require_text("version", &version)?;
    }
    software.updated_at = state.now();

    let updated = repo.update(&software).await.map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found("software does not exist"));
    }

    sync_document(&state, &SearchDocument::software(&software)).await;
    Ok(Json(software))
}

/// Removes a catalog entry. Entries referenced by installations or upgrade
/// plans cannot be removed.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemResponse> {
    let deleted = state
        .storage()
        .software()
        .delete(id)
        .await
        .map_err(map_error)?;
    if !deleted {
        return Err(ProblemResponse::not_found("software does not exist"));
    }

    drop_document(&state, SearchDomain::Software, id).await;
    Ok(StatusCode::NO_CONTENT)
}

fn map_error(err: SoftwareError) -> ProblemResponse {
    match err {
        SoftwareError::InUse => ProblemResponse::conflict(
            "software is still referenced by installations or upgrade plans",
        ),
        other => {
            error!(stage = "api", error = %other, "software operation failed");
            ProblemResponse::internal("software operation failed")
        }
    }
}
