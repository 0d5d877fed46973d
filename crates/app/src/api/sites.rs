use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use rollout_core::search::{SearchDocument, SearchDomain};
use rollout_core::types::{ArchiveState, Site};
use rollout_storage::{NewSite, SiteError};

use crate::api::{drop_document, require_text, sync_document, ListQuery};
use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSite {
    pub name: String,
    pub site_code: String,
    #[serde(default)]
    pub address_id: Option<Uuid>,
    pub timezone: String,
}

/// Partial update body. Absent fields keep their current values.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateSite {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub site_code: Option<String>,
    #[serde(default)]
    pub address_id: Option<Uuid>,
    #[serde(default)]
    pub timezone: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSite>,
) -> Result<(StatusCode, Json<Site>), ProblemResponse> {
    let name = require_text("name", &body.name)?;
    let site_code = require_text("site_code", &body.site_code)?;
    let timezone = require_text("timezone", &body.timezone)?;

    let site = state
        .storage()
        .sites()
        .insert(
            NewSite {
                id: Uuid::new_v4(),
                name,
                site_code,
                address_id: body.address_id,
                timezone,
            },
            state.now(),
        )
        .await
        .map_err(map_error)?;

    sync_document(&state, &SearchDocument::site(&site)).await;
    Ok((StatusCode::CREATED, Json(site)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Site>>, ProblemResponse> {
    let sites = state
        .storage()
        .sites()
        .list(query.include_archived)
        .await
        .map_err(map_error)?;
    Ok(Json(sites))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Site>, ProblemResponse> {
    let site = state
        .storage()
        .sites()
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("site does not exist"))?;
    Ok(Json(site))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateSite>,
) -> Result<Json<Site>, ProblemResponse> {
    let repo = state.storage().sites();
    let mut site = repo
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("site does not exist"))?;

    if let Some(name) = body.name {
        site.name = require_text("name", &name)?;
    }
    if let Some(site_code) = body.site_code {
        site.site_code = require_text("site_code", &site_code)?;
    }
    if let Some(address_id) = body.address_id {
        site.address_id = Some(address_id);
    }
    if let Some(timezone) = body.timezone {
        site.timezone = require_text("timezone", &timezone)?;
    }
    site.updated_at = state.now();

    let updated = repo.update(&site).await.map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found("site does not exist"));
    }

    sync_document(&state, &SearchDocument::site(&site)).await;
    Ok(Json(site))
}

pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemResponse> {
    let archived = state
        .storage()
        .sites()
        .set_archive_state(id, ArchiveState::Archived, state.now())
        .await
        .map_err(map_error)?;
    if !archived {
        return Err(ProblemResponse::not_found("site does not exist"));
    }

    drop_document(&state, SearchDomain::Site, id).await;
    Ok(StatusCode::NO_CONTENT)
}

fn map_error(err: SiteError) -> ProblemResponse {
    match err {
        SiteError::MissingAddress => {
            ProblemResponse::validation("referenced address does not exist")
        }
        other => {
            error!(stage = "api", error = %other, "site operation failed");
            ProblemResponse::internal("site operation failed")
        }
    }
}
