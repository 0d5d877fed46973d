pub mod accounts;
pub mod contracts;
pub mod hardware;
pub mod installed;
pub mod lookup;
pub mod projects;
pub mod reports;
pub mod search;
pub mod sites;
pub mod software;
pub mod upgrades;
pub mod variants;

use metrics::counter;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use rollout_core::search::{SearchDocument, SearchDomain};

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Query parameters shared by the archivable collection listings.
#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    #[serde(default)]
    pub include_archived: bool,
}

/// Validates a required text field, returning the trimmed value.
pub(crate) fn require_text(field: &'static str, value: &str) -> Result<String, ProblemResponse> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ProblemResponse::validation(format!(
            "'{field}' must not be blank"
        )));
    }
    Ok(trimmed.to_string())
}

/// Pushes a document into the search index after a successful write. The
/// index is loosely synced: failures are logged and counted, never
/// surfaced to the caller.
pub(crate) async fn sync_document(state: &AppState, document: &SearchDocument) {
    if let Err(err) = state.storage().search().upsert(document).await {
        counter!("search_index_sync_failures_total").increment(1);
        warn!(stage = "search", entity = %document.entity_id, error = %err, "failed to update search index");
    }
}

/// Best-effort removal of an archived entity from the search index.
pub(crate) async fn drop_document(state: &AppState, domain: SearchDomain, entity_id: Uuid) {
    if let Err(err) = state.storage().search().remove(domain, entity_id).await {
        counter!("search_index_sync_failures_total").increment(1);
        warn!(stage = "search", entity = %entity_id, error = %err, "failed to remove search index entry");
    }
}
