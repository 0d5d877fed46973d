use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use rollout_core::search::{SearchDocument, SearchDomain};
use rollout_core::types::{ArchiveState, Project, ProjectLifecycleStatus, Site};
use rollout_storage::{NewProject, ProjectError};

use crate::api::{drop_document, require_text, sync_document, ListQuery};
use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProject {
    pub account_id: Uuid,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub deployment_variant_id: Option<Uuid>,
    #[serde(default)]
    pub lifecycle_status: Option<ProjectLifecycleStatus>,
    #[serde(default)]
    pub planned_start: Option<NaiveDate>,
    #[serde(default)]
    pub planned_end: Option<NaiveDate>,
}

/// Partial update body. Absent fields keep their current values.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateProject {
    #[serde(default)]
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub deployment_variant_id: Option<Uuid>,
    #[serde(default)]
    pub lifecycle_status: Option<ProjectLifecycleStatus>,
    #[serde(default)]
    pub planned_start: Option<NaiveDate>,
    #[serde(default)]
    pub planned_end: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceSites {
    pub site_ids: Vec<Uuid>,
}

/// Summary of a site-link reconciliation run.
#[derive(Debug, Serialize)]
pub struct SiteLinkSummary {
    pub linked: usize,
    pub unarchived: usize,
    pub archived: usize,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateProject>,
) -> Result<(StatusCode, Json<Project>), ProblemResponse> {
    let name = require_text("name", &body.name)?;
    let code = require_text("code", &body.code)?;
    check_planned_window(body.planned_start, body.planned_end)?;

    let project = state
        .storage()
        .projects()
        .insert(
            NewProject {
                id: Uuid::new_v4(),
                account_id: body.account_id,
                name,
                code,
                deployment_variant_id: body.deployment_variant_id,
                lifecycle_status: body.lifecycle_status.unwrap_or_default(),
                planned_start: body.planned_start,
                planned_end: body.planned_end,
            },
            state.now(),
        )
        .await
        .map_err(map_error)?;

    sync_document(&state, &SearchDocument::project(&project)).await;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Project>>, ProblemResponse> {
    let projects = state
        .storage()
        .projects()
        .list(query.include_archived)
        .await
        .map_err(map_error)?;
    Ok(Json(projects))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, ProblemResponse> {
    let project = state
        .storage()
        .projects()
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("project does not exist"))?;
    Ok(Json(project))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateProject>,
) -> Result<Json<Project>, ProblemResponse> {
    let repo = state.storage().projects();
    let mut project = repo
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("project does not exist"))?;

    if let Some(account_id) = body.account_id {
        project.account_id = account_id;
    }
    if let Some(name) = body.name {
        project.name = require_text("name", &name)?;
    }
    if let Some(code) = body.code {
        project.code = require_text("code", &code)?;
    }
    if let Some(deployment_variant_id) = body.deployment_variant_id {
        project.deployment_variant_id = Some(deployment_variant_id);
    }
    if let Some(lifecycle_status) = body.lifecycle_status {
        project.lifecycle_status = lifecycle_status;
    }
    if let Some(planned_start) = body.planned_start {
        project.planned_start = Some(planned_start);
    }
    if let Some(planned_end) = body.planned_end {
        project.planned_end = Some(planned_end);
    }
    check_planned_window(project.planned_start, project.planned_end)?;
    project.updated_at = state.now();

    let updated = repo.update(&project).await.map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found("project does not exist"));
    }

    sync_document(&state, &SearchDocument::project(&project)).await;
    Ok(Json(project))
}

pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemResponse> {
    let archived = state
        .storage()
        .projects()
        .set_archive_state(id, ArchiveState::Archived, state.now())
        .await
        .map_err(map_error)?;
    if !archived {
        return Err(ProblemResponse::not_found("project does not exist"));
    }

    drop_document(&state, SearchDomain::Project, id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Lists the sites actively linked to the project.
pub async fn list_sites(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Site>>, ProblemResponse> {
    let repo = state.storage().projects();
    repo.fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("project does not exist"))?;

    let sites = repo.list_sites(id).await.map_err(map_error)?;
    Ok(Json(sites))
}

/// Replaces the project's active site set. Sites dropped from the set keep
/// their link rows in archived form.
pub async fn replace_sites(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReplaceSites>,
) -> Result<Json<SiteLinkSummary>, ProblemResponse> {
    let change = state
        .storage()
        .projects()
        .replace_site_links(id, &body.site_ids, state.now())
        .await
        .map_err(map_error)?;

    Ok(Json(SiteLinkSummary {
        linked: change.linked,
        unarchived: change.unarchived,
        archived: change.archived,
    }))
}

fn check_planned_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), ProblemResponse> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(ProblemResponse::validation(
                "'planned_start' must not be after 'planned_end'",
            ));
        }
    }
    Ok(())
}

fn map_error(err: ProjectError) -> ProblemResponse {
    match err {
        ProjectError::NotFound => ProblemResponse::not_found("project does not exist"),
        ProjectError::MissingParent => {
            ProblemResponse::validation("referenced account or deployment variant does not exist")
        }
        ProjectError::MissingSite(site_id) => {
            ProblemResponse::validation(format!("referenced site {site_id} does not exist"))
        }
        other => {
            error!(stage = "api", error = %other, "project operation failed");
            ProblemResponse::internal("project operation failed")
        }
    }
}
