use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use rollout_core::types::{ArchiveState, ServiceContract};
use rollout_storage::{ContractError, NewServiceContract};

use crate::api::{require_text, ListQuery};
use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateServiceContract {
    pub account_id: Uuid,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub site_id: Option<Uuid>,
    pub contract_number: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
    pub support_level: String,
}

/// Partial update body. Absent fields keep their current values.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateServiceContract {
    #[serde(default)]
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub site_id: Option<Uuid>,
    #[serde(default)]
    pub contract_number: Option<String>,
    #[serde(default)]
    pub starts_on: Option<NaiveDate>,
    #[serde(default)]
    pub ends_on: Option<NaiveDate>,
    #[serde(default)]
    pub support_level: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateServiceContract>,
) -> Result<(StatusCode, Json<ServiceContract>), ProblemResponse> {
    let contract_number = require_text("contract_number", &body.contract_number)?;
    let support_level = require_text("support_level", &body.support_level)?;
    check_term(body.starts_on, body.ends_on)?;

    let contract = state
        .storage()
        .service_contracts()
        .insert(
            NewServiceContract {
                id: Uuid::new_v4(),
                account_id: body.account_id,
                project_id: body.project_id,
                site_id: body.site_id,
                contract_number,
                starts_on: body.starts_on,
                ends_on: body.ends_on,
                support_level,
            },
            state.now(),
        )
        .await
        .map_err(map_error)?;

    Ok((StatusCode::CREATED, Json(contract)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServiceContract>>, ProblemResponse> {
    let contracts = state
        .storage()
        .service_contracts()
        .list(query.include_archived)
        .await
        .map_err(map_error)?;
    Ok(Json(contracts))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceContract>, ProblemResponse> {
    let contract = state
        .storage()
        .service_contracts()
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("service contract does not exist"))?;
    Ok(Json(contract))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateServiceContract>,
) -> Result<Json<ServiceContract>, ProblemResponse> {
    let repo = state.storage().service_contracts();
    let mut contract = repo
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("service contract does not exist"))?;

    if let Some(account_id) = body.account_id {
        contract.account_id = account_id;
    }
    if let Some(project_id) = body.project_id {
        contract.project_id = Some(project_id);
    }
    if let Some(site_id) = body.site_id {
        contract.site_id = Some(site_id);
    }
    if let Some(contract_number) = body.contract_number {
        contract.contract_number = require_text("contract_number", &contract_number)?;
    }
    if let Some(starts_on) = body.starts_on {
        contract.starts_on = starts_on;
    }
    if let Some(ends_on) = body.ends_on {
        contract.ends_on = ends_on;
    }
    if let Some(support_level) = body.support_level {
        contract.support_level = require_text("support_level", &support_level)?;
    }
    check_term(contract.starts_on, contract.ends_on)?;
    contract.updated_at = state.now();

    let updated = repo.update(&contract).await.map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found("service contract does not exist"));
    }

    Ok(Json(contract))
}

pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemResponse> {
    let archived = state
        .storage()
        .service_contracts()
        .set_archive_state(id, ArchiveState::Archived, state.now())
        .await
        .map_err(map_error)?;
    if !archived {
        return Err(ProblemResponse::not_found("service contract does not exist"));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn check_term(starts_on: NaiveDate, ends_on: NaiveDate) -> Result<(), ProblemResponse> {
    if starts_on > ends_on {
        return Err(ProblemResponse::validation(
            "'starts_on' must not be after 'ends_on'",
        ));
    }
    Ok(())
}

fn map_error(err: ContractError) -> ProblemResponse {
    match err {
        ContractError::DuplicateContractNumber => {
            ProblemResponse::conflict("a contract with the same contract number already exists")
        }
        ContractError::MissingParent => {
            ProblemResponse::validation("referenced account, project or site does not exist")
        }
        other => {
            error!(stage = "api", error = %other, "service contract operation failed");
            ProblemResponse::internal("service contract operation failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{
        app_router,
        test_support::{post_json, read_json, setup_state},
    };
    use serde_json::json;
    use tower::ServiceExt;

    async fn seed_account(state: &AppState) -> String {
        let response = app_router(state.clone())
            .oneshot(post_json(
                "/accounts",
                json!({"name": "Contract Holder", "sap_id": Uuid::new_v4().to_string()}),
            ))
            .await
            .expect("response");
        read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string()
    }

    #[tokio::test]
    async fn create_round_trips() {
        let (state, _worker) = setup_state().await;
        let account_id = seed_account(&state).await;

        let response = app_router(state)
            .oneshot(post_json(
                "/servicecontracts",
                json!({
                    "account_id": account_id,
                    "contract_number": format!("SC-{}", Uuid::new_v4()),
                    "starts_on": "2024-01-01",
                    "ends_on": "2025-12-31",
                    "support_level": "gold"
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = read_json(response).await;
        assert_eq!(created["support_level"], "gold");
    }

    #[tokio::test]
    async fn duplicate_contract_number_conflicts() {
        let (state, _worker) = setup_state().await;
        let account_id = seed_account(&state).await;
        let body = json!({
            "account_id": account_id,
            "contract_number": format!("SC-{}", Uuid::new_v4()),
            "starts_on": "2024-01-01",
            "ends_on": "2025-12-31",
            "support_level": "silver"
        });

        let response = app_router(state.clone())
            .oneshot(post_json("/servicecontracts", body.clone()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app_router(state)
            .oneshot(post_json("/servicecontracts", body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn inverted_term_is_rejected() {
        let (state, _worker) = setup_state().await;
        let account_id = seed_account(&state).await;

        let response = app_router(state)
            .oneshot(post_json(
                "/servicecontracts",
                json!({
                    "account_id": account_id,
                    "contract_number": format!("SC-{}", Uuid::new_v4()),
                    "starts_on": "2025-01-01",
                    "ends_on": "2024-01-01",
                    "support_level": "gold"
                }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
