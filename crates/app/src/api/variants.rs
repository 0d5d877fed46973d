use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use rollout_core::types::DeploymentVariant;
use rollout_storage::{NewDeploymentVariant, VariantError};

use crate::api::require_text;
use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateDeploymentVariant {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update body. Absent fields keep their current values.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateDeploymentVariant {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateDeploymentVariant>,
) -> Result<(StatusCode, Json<DeploymentVariant>), ProblemResponse> {
    let code = require_text("code", &body.code)?;
    let name = require_text("name", &body.name)?;

    let variant = state
        .storage()
        .deployment_variants()
        .insert(
            NewDeploymentVariant {
                id: Uuid::new_v4(),
                code,
                name,
                description: body.description,
            },
            state.now(),
        )
        .await
        .map_err(map_error)?;

    Ok((StatusCode::CREATED, Json(variant)))
}

pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<DeploymentVariant>>, ProblemResponse> {
    let variants = state
        .storage()
        .deployment_variants()
        .list()
        .await
        .map_err(map_error)?;
    Ok(Json(variants))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeploymentVariant>, ProblemResponse> {
    let variant = state
        .storage()
        .deployment_variants()
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("deployment variant does not exist"))?;
    Ok(Json(variant))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateDeploymentVariant>,
) -> Result<Json<DeploymentVariant>, ProblemResponse> {
    let repo = state.storage().deployment_variants();
    let mut variant = repo
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("deployment variant does not exist"))?;

    if let Some(code) = body.code {
        variant.code = require_text("code", &code)?;
    }
    if let Some(name) = body.name {
        variant.name = require_text("name", &name)?;
    }
    if let Some(description) = body.description {
        variant.description = Some(description);
    }
    variant.updated_at = state.now();

    let updated = repo.update(&variant).await.map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found(
            "deployment variant does not exist",
        ));
    }

    Ok(Json(variant))
}

/// Removes a blueprint. Variants referenced by projects cannot be removed.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemResponse> {
    let deleted = state
        .storage()
        .deployment_variants()
        .delete(id)
        .await
        .map_err(map_error)?;
    if !deleted {
        return Err(ProblemResponse::not_found(
            "deployment variant does not exist",
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn map_error(err: VariantError) -> ProblemResponse {
    match err {
        VariantError::DuplicateCode => {
            ProblemResponse::conflict("a deployment variant with the same code already exists")
        }
        VariantError::InUse => {
            ProblemResponse::conflict("deployment variant is still referenced by projects")
        }
        other => {
            error!(stage = "api", error = %other, "deployment variant operation failed");
            ProblemResponse::internal("deployment variant operation failed")
        }
    }
}
