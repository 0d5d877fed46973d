use axum::{
    extract::{MatchedPath, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use rollout_core::hardware::{HardwareKind, HardwareUnit};
use rollout_core::types::ArchiveState;
use rollout_storage::{HardwareError, NewHardwareUnit};

use crate::api::require_text;
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// One handler set serves all five hardware collections. The kind is read
/// back from the matched route, which is registered per collection.
fn kind_from_path(path: &MatchedPath) -> Result<HardwareKind, ProblemResponse> {
    let segment = path
        .as_str()
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default();
    HardwareKind::from_collection(segment).ok_or_else(|| {
        ProblemResponse::internal("hardware route registered under unknown collection")
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateHardwareUnit {
    pub site_id: Uuid,
    pub model: String,
    pub serial_number: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub commissioned_at: Option<DateTime<Utc>>,
}

/// Partial update body. Absent fields keep their current values.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateHardwareUnit {
    #[serde(default)]
    pub site_id: Option<Uuid>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub commissioned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct HardwareListQuery {
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default)]
    pub site_id: Option<Uuid>,
}

pub async fn create(
    State(state): State<AppState>,
    matched: MatchedPath,
    Json(body): Json<CreateHardwareUnit>,
) -> Result<(StatusCode, Json<HardwareUnit>), ProblemResponse> {
    let kind = kind_from_path(&matched)?;
    let model = require_text("model", &body.model)?;
    let serial_number = require_text("serial_number", &body.serial_number)?;

    let unit = state
        .storage()
        .hardware()
        .insert(
            NewHardwareUnit {
                id: Uuid::new_v4(),
                kind,
                site_id: body.site_id,
                model,
                serial_number,
                detail: body.detail,
                commissioned_at: body.commissioned_at,
            },
            state.now(),
        )
        .await
        .map_err(map_error)?;

    Ok((StatusCode::CREATED, Json(unit)))
}

pub async fn list(
    State(state): State<AppState>,
    matched: MatchedPath,
    Query(query): Query<HardwareListQuery>,
) -> Result<Json<Vec<HardwareUnit>>, ProblemResponse> {
    let kind = kind_from_path(&matched)?;
    let units = state
        .storage()
        .hardware()
        .list(kind, query.site_id, query.include_archived)
        .await
        .map_err(map_error)?;
    Ok(Json(units))
}

pub async fn fetch(
    State(state): State<AppState>,
    matched: MatchedPath,
    Path(id): Path<Uuid>,
) -> Result<Json<HardwareUnit>, ProblemResponse> {
    let kind = kind_from_path(&matched)?;
    let unit = state
        .storage()
        .hardware()
        .fetch(kind, id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("hardware unit does not exist"))?;
    Ok(Json(unit))
}

pub async fn update(
    State(state): State<AppState>,
    matched: MatchedPath,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateHardwareUnit>,
) -> Result<Json<HardwareUnit>, ProblemResponse> {
    let kind = kind_from_path(&matched)?;
    let repo = state.storage().hardware();
    let mut unit = repo
        .fetch(kind, id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("hardware unit does not exist"))?;

    if let Some(site_id) = body.site_id {
        unit.site_id = site_id;
    }
    if let Some(model) = body.model {
        unit.model = require_text("model", &model)?;
    }
    if let Some(serial_number) = body.serial_number {
        unit.serial_number = require_text("serial_number", &serial_number)?;
    }
    if let Some(detail) = body.detail {
        unit.detail = Some(detail);
    }
    if let Some(commissioned_at) = body.commissioned_at {
        unit.commissioned_at = Some(commissioned_at);
    }
    unit.updated_at = state.now();

    let updated = repo.update(&unit).await.map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found("hardware unit does not exist"));
    }

    Ok(Json(unit))
}

pub async fn archive(
    State(state): State<AppState>,
    matched: MatchedPath,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemResponse> {
    let kind = kind_from_path(&matched)?;
    let archived = state
        .storage()
        .hardware()
        .set_archive_state(kind, id, ArchiveState::Archived, state.now())
        .await
        .map_err(map_error)?;
    if !archived {
        return Err(ProblemResponse::not_found("hardware unit does not exist"));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn map_error(err: HardwareError) -> ProblemResponse {
    match err {
        HardwareError::MissingSite => ProblemResponse::validation("referenced site does not exist"),
        other => {
            error!(stage = "api", error = %other, "hardware operation failed");
            ProblemResponse::internal("hardware operation failed")
        }
    }
}
