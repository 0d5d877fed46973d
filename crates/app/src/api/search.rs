use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use metrics::counter;
use serde::Deserialize;
use tracing::error;

use rollout_core::search::{SearchDomain, SearchHit};

use crate::problem::ProblemResponse;
use crate::router::AppState;

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn query(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ProblemResponse> {
    let domain = match query.domain.as_deref() {
        Some(raw) => Some(SearchDomain::parse(raw).ok_or_else(|| {
            ProblemResponse::validation(format!("unknown search domain: {raw}"))
        })?),
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    counter!("search_queries_total").increment(1);
    let hits = state
        .storage()
        .search()
        .query(&query.q, domain, limit)
        .await
        .map_err(|err| {
            error!(stage = "search", error = %err, "search query failed");
            ProblemResponse::internal("search query failed")
        })?;

    Ok(Json(hits))
}

/// Queues an asynchronous full rebuild of the index and returns
/// immediately.
pub async fn rebuild(State(state): State<AppState>) -> Result<StatusCode, ProblemResponse> {
    state.indexer().trigger().await.map_err(|err| {
        error!(stage = "search", error = %err, "failed to queue index rebuild");
        ProblemResponse::internal("index rebuild worker is not running")
    })?;
    Ok(StatusCode::ACCEPTED)
}
