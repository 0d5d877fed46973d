use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use rollout_core::search::{SearchDocument, SearchDomain};
use rollout_core::types::{Account, ArchiveState};
use rollout_storage::{AccountError, NewAccount};

use crate::api::{drop_document, require_text, sync_document, ListQuery};
use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAccount {
    pub name: String,
    pub sap_id: String,
    #[serde(default)]
    pub crm_id: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub address_id: Option<Uuid>,
}

/// Partial update body. Absent fields keep their current values.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateAccount {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sap_id: Option<String>,
    #[serde(default)]
    pub crm_id: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub address_id: Option<Uuid>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateAccount>,
) -> Result<(StatusCode, Json<Account>), ProblemResponse> {
    let name = require_text("name", &body.name)?;
    let sap_id = require_text("sap_id", &body.sap_id)?;

    let account = state
        .storage()
        .accounts()
        .insert(
            NewAccount {
                id: Uuid::new_v4(),
                name,
                sap_id,
                crm_id: body.crm_id,
                contact_email: body.contact_email,
                address_id: body.address_id,
            },
            state.now(),
        )
        .await
        .map_err(map_error)?;

    sync_document(&state, &SearchDocument::account(&account)).await;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Account>>, ProblemResponse> {
    let accounts = state
        .storage()
        .accounts()
        .list(query.include_archived)
        .await
        .map_err(map_error)?;
    Ok(Json(accounts))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Account>, ProblemResponse> {
    let account = state
        .storage()
        .accounts()
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("account does not exist"))?;
    Ok(Json(account))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAccount>,
) -> Result<Json<Account>, ProblemResponse> {
    let repo = state.storage().accounts();
    let mut account = repo
        .fetch(id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("account does not exist"))?;

    if let Some(name) = body.name {
        account.name = require_text("name", &name)?;
    }
    if let Some(sap_id) = body.sap_id {
        account.sap_id = require_text("sap_id", &sap_id)?;
    }
    if let Some(crm_id) = body.crm_id {
        account.crm_id = Some(crm_id);
    }
    if let Some(contact_email) = body.contact_email {
        account.contact_email = Some(contact_email);
    }
    if let Some(address_id) = body.address_id {
        account.address_id = Some(address_id);
    }
    account.updated_at = state.now();

    let updated = repo.update(&account).await.map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found("account does not exist"));
    }

    sync_document(&state, &SearchDocument::account(&account)).await;
    Ok(Json(account))
}

pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ProblemResponse> {
    let archived = state
        .storage()
        .accounts()
        .set_archive_state(id, ArchiveState::Archived, state.now())
        .await
        .map_err(map_error)?;
    if !archived {
        return Err(ProblemResponse::not_found("account does not exist"));
    }

    drop_document(&state, SearchDomain::Account, id).await;
    Ok(StatusCode::NO_CONTENT)
}

fn map_error(err: AccountError) -> ProblemResponse {
    match err {
        AccountError::DuplicateSapId => {
            ProblemResponse::conflict("an account with the same sap id already exists")
        }
        AccountError::MissingAddress => {
            ProblemResponse::validation("referenced address does not exist")
        }
        other => {
            error!(stage = "api", error = %other, "account operation failed");
            ProblemResponse::internal("account operation failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{
        app_router,
        test_support::{delete, get, post_json, put_json, read_json, setup_state},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    #[tokio::test]
    async fn create_then_fetch_round_trips() {
        let (state, _worker) = setup_state().await;
        let sap_id = Uuid::new_v4().to_string();

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/accounts",
                json!({"name": "Nordic Rail Ops", "sap_id": sap_id}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = read_json(response).await;
        assert_eq!(created["sap_id"], Value::String(sap_id));

        let id = created["id"].as_str().expect("id").to_string();
        let response = app_router(state)
            .oneshot(get(&format!("/accounts/{id}")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let fetched = read_json(response).await;
        assert_eq!(fetched["name"], "Nordic Rail Ops");
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let (state, _worker) = setup_state().await;

        let response = app_router(state)
            .oneshot(post_json(
                "/accounts",
                json!({"name": "   ", "sap_id": Uuid::new_v4().to_string()}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let problem = read_json(response).await;
        assert_eq!(problem["type"], "validation_error");
    }

    #[tokio::test]
    async fn duplicate_sap_id_conflicts() {
        let (state, _worker) = setup_state().await;
        let sap_id = Uuid::new_v4().to_string();
        let body = json!({"name": "Harbour Freight", "sap_id": sap_id});

        let response = app_router(state.clone())
            .oneshot(post_json("/accounts", body.clone()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app_router(state)
            .oneshot(post_json("/accounts", body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn update_merges_only_supplied_fields() {
        let (state, _worker) = setup_state().await;
        let sap_id = Uuid::new_v4().to_string();

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/accounts",
                json!({"name": "Original Name", "sap_id": sap_id}),
            ))
            .await
            .expect("response");
        let created = read_json(response).await;
        let id = created["id"].as_str().expect("id").to_string();

        let response = app_router(state)
            .oneshot(put_json(
                &format!("/accounts/{id}"),
                json!({"contact_email": "ops@example.com"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let updated = read_json(response).await;
        assert_eq!(updated["name"], "Original Name");
        assert_eq!(updated["contact_email"], "ops@example.com");
    }

    #[tokio::test]
    async fn update_response_matches_a_later_fetch() {
        let (state, _worker) = setup_state().await;

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/accounts",
                json!({"name": "Timestamp Check", "sap_id": Uuid::new_v4().to_string()}),
            ))
            .await
            .expect("response");
        let id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        let response = app_router(state.clone())
            .oneshot(put_json(
                &format!("/accounts/{id}"),
                json!({"crm_id": "CRM-99"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let updated = read_json(response).await;

        let response = app_router(state)
            .oneshot(get(&format!("/accounts/{id}")))
            .await
            .expect("response");
        let fetched = read_json(response).await;
        assert_eq!(fetched, updated);
    }

    #[tokio::test]
    async fn archive_hides_from_default_listing() {
        let (state, _worker) = setup_state().await;
        let sap_id = Uuid::new_v4().to_string();

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/accounts",
                json!({"name": "Soon Archived", "sap_id": sap_id.clone()}),
            ))
            .await
            .expect("response");
        let created = read_json(response).await;
        let id = created["id"].as_str().expect("id").to_string();

        let response = app_router(state.clone())
            .oneshot(delete(&format!("/accounts/{id}")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app_router(state.clone())
            .oneshot(get("/accounts"))
            .await
            .expect("response");
        let listed = read_json(response).await;
        assert!(listed
            .as_array()
            .expect("array")
            .iter()
            .all(|account| account["id"] != Value::String(id.clone())));

        let response = app_router(state)
            .oneshot(get("/accounts?include_archived=true"))
            .await
            .expect("response");
        let listed = read_json(response).await;
        assert!(listed
            .as_array()
            .expect("array")
            .iter()
            .any(|account| account["id"] == Value::String(id.clone())));
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let (state, _worker) = setup_state().await;

        let response = app_router(state)
            .oneshot(get(&format!("/accounts/{}", Uuid::new_v4())))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let problem = read_json(response).await;
        assert_eq!(problem["type"], "not_found");
    }
}
