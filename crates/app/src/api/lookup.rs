use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{Map, Value};
use tracing::error;
use uuid::Uuid;

use rollout_storage::{LookupError, LookupRow, LookupTable};

use crate::problem::ProblemResponse;
use crate::router::AppState;

fn resolve_table(segment: &str) -> Result<LookupTable, ProblemResponse> {
    LookupTable::parse(segment)
        .ok_or_else(|| ProblemResponse::not_found(format!("unknown lookup table: {segment}")))
}

/// Flattens a reference-table row into one JSON object.
fn render_row(row: LookupRow) -> Value {
    let mut object = row.fields;
    object.insert("id".to_string(), Value::String(row.id.to_string()));
    object.insert(
        "created_at".to_string(),
        Value::String(row.created_at.to_rfc3339()),
    );
    object.insert(
        "updated_at".to_string(),
        Value::String(row.updated_at.to_rfc3339()),
    );
    Value::Object(object)
}

pub async fn create(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<Value>), ProblemResponse> {
    let table = resolve_table(&table)?;
    let row = state
        .storage()
        .lookup()
        .insert(table, Uuid::new_v4(), &body, state.now())
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(render_row(row))))
}

pub async fn list(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<Vec<Value>>, ProblemResponse> {
    let table = resolve_table(&table)?;
    let rows = state
        .storage()
        .lookup()
        .list(table)
        .await
        .map_err(map_error)?;
    Ok(Json(rows.into_iter().map(render_row).collect()))
}

pub async fn fetch(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, Uuid)>,
) -> Result<Json<Value>, ProblemResponse> {
    let table = resolve_table(&table)?;
    let row = state
        .storage()
        .lookup()
        .fetch(table, id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("row does not exist"))?;
    Ok(Json(render_row(row)))
}

pub async fn update(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, Uuid)>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<Value>, ProblemResponse> {
    let table = resolve_table(&table)?;
    let repo = state.storage().lookup();

    let updated = repo
        .update(table, id, &body, state.now())
        .await
        .map_err(map_error)?;
    if !updated {
        return Err(ProblemResponse::not_found("row does not exist"));
    }

    let row = repo
        .fetch(table, id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| ProblemResponse::not_found("row does not exist"))?;
    Ok(Json(render_row(row)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ProblemResponse> {
    let table = resolve_table(&table)?;
    let deleted = state
        .storage()
        .lookup()
        .delete(table, id)
        .await
        .map_err(map_error)?;
    if !deleted {
        return Err(ProblemResponse::not_found("row does not exist"));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn map_error(err: LookupError) -> ProblemResponse {
    match err {
        LookupError::UnknownColumn(_)
        | LookupError::MissingColumn(_)
        | LookupError::InvalidValue(_)
        | LookupError::EmptyUpdate => ProblemResponse::validation(err.to_string()),
        LookupError::MissingParent => {
            ProblemResponse::validation("referenced parent row does not exist")
        }
        LookupError::DuplicateKey => {
            ProblemResponse::conflict("a row with the same unique key already exists")
        }
        LookupError::InUse => {
            ProblemResponse::conflict("row is still referenced by other records")
        }
        other => {
            error!(stage = "api", error = %other, "lookup operation failed");
            ProblemResponse::internal("lookup operation failed")
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

    #[tokio::test]
    async fn unknown_table_is_not_found() {
        let (state, _worker) = setup_state().await;

        let response = app_router(state)
            .oneshot(get("/lookup/planets"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn country_rows_round_trip() {
        let (state, _worker) = setup_state().await;
        let iso = Uuid::new_v4().simple().to_string();

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/lookup/countries",
                json!({"name": "Norway", "iso_code": iso}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = read_json(response).await;
        let id = created["id"].as_str().expect("id").to_string();

        let response = app_router(state)
            .oneshot(get(&format!("/lookup/countries/{id}")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let fetched = read_json(response).await;
        assert_eq!(fetched["name"], "Norway");
    }

    #[tokio::test]
    async fn unknown_column_is_a_validation_error() {
        let (state, _worker) = setup_state().await;

        let response = app_router(state)
            .oneshot(post_json(
                "/lookup/countries",
                json!({"name": "Atlantis", "iso_code": Uuid::new_v4().simple().to_string(), "population": "12"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_changes_only_supplied_columns() {
        let (state, _worker) = setup_state().await;
        let iso = Uuid::new_v4().simple().to_string();

        let response = app_router(state.clone())
            .oneshot(post_json(
                "/lookup/countries",
                json!({"name": "Norwya", "iso_code": iso.clone()}),
            ))
            .await
            .expect("response");
        let id = read_json(response).await["id"]
            .as_str()
            .expect("id")
            .to_string();

        let response = app_router(state)
            .oneshot(put_json(
                &format!("/lookup/countries/{id}"),
                json!({"name": "Norway"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let updated = read_json(response).await;
        assert_eq!(updated["name"], "Norway");
        assert_eq!(updated["iso_code"], Value::String(iso));
    }
}
