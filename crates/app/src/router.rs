use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;

use rollout_storage::{truncate_to_millis, Database};

use crate::indexer::{RebuildService, RebuildWorker};
use crate::{api, telemetry};

const INDEX_REBUILD_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    indexer: RebuildService,
    report_timezone: String,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        report_timezone: String,
    ) -> (Self, RebuildWorker) {
        // Timestamps flow into TEXT columns truncated to milliseconds, so
        // the clock hands out the stored precision up front and responses
        // match what a later fetch returns.
        let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> =
            Arc::new(|| truncate_to_millis(Utc::now()));
        let (indexer, worker) = RebuildService::new(storage.clone(), INDEX_REBUILD_INTERVAL);
        let state = Self {
            metrics,
            storage,
            clock,
            indexer,
            report_timezone,
        };
        (state, worker)
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn indexer(&self) -> &RebuildService {
        &self.indexer
    }

    pub fn report_timezone(&self) -> &str {
        &self.report_timezone
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/accounts",
            get(api::accounts::list).post(api::accounts::create),
        )
        .route(
            "/accounts/:id",
            get(api::accounts::fetch)
                .put(api::accounts::update)
                .delete(api::accounts::archive),
        )
        .route(
            "/projects",
            get(api::projects::list).post(api::projects::create),
        )
        .route(
            "/projects/:id",
            get(api::projects::fetch)
                .put(api::projects::update)
                .delete(api::projects::archive),
        )
        .route(
            "/projects/:id/sites",
            get(api::projects::list_sites).put(api::projects::replace_sites),
        )
        .route("/sites", get(api::sites::list).post(api::sites::create))
        .route(
            "/sites/:id",
            get(api::sites::fetch)
                .put(api::sites::update)
                .delete(api::sites::archive),
        )
        .route(
            "/software",
            get(api::software::list).post(api::software::create),
        )
        .route(
            "/software/:id",
            get(api::software::fetch)
                .put(api::software::update)
                .delete(api::software::delete),
        )
        .route(
            "/installedsoftware",
            get(api::installed::list).post(api::installed::create),
        )
        .route(
            "/installedsoftware/:id",
            get(api::installed::fetch)
                .put(api::installed::update)
                .delete(api::installed::delete),
        )
        .route(
            "/upgradeplans",
            get(api::upgrades::list).post(api::upgrades::create),
        )
        .route(
            "/upgradeplans/:id",
            get(api::upgrades::fetch)
                .put(api::upgrades::update)
                .delete(api::upgrades::delete),
        )
        .route(
            "/servicecontracts",
            get(api::contracts::list).post(api::contracts::create),
        )
        .route(
            "/servicecontracts/:id",
            get(api::contracts::fetch)
                .put(api::contracts::update)
                .delete(api::contracts::archive),
        )
        .route(
            "/deploymentvariants",
            get(api::variants::list).post(api::variants::create),
        )
        .route(
            "/deploymentvariants/:id",
            get(api::variants::fetch)
                .put(api::variants::update)
                .delete(api::variants::delete),
        )
        .route(
            "/lookup/:table",
            get(api::lookup::list).post(api::lookup::create),
        )
        .route(
            "/lookup/:table/:id",
            get(api::lookup::fetch)
                .put(api::lookup::update)
                .delete(api::lookup::delete),
        )
        .route("/search", get(api::search::query))
        .route("/search/rebuild", post(api::search::rebuild))
        .route(
            "/reports/installed-software",
            get(api::reports::installed_software),
        )
        .route(
            "/reports/expiring-contracts",
            get(api::reports::expiring_contracts),
        )
        .route(
            "/reports/project-activity",
            get(api::reports::project_activity),
        );

    for kind in rollout_core::hardware::HardwareKind::ALL {
        router = router
            .route(
                &format!("/{}", kind.collection()),
                get(api::hardware::list).post(api::hardware::create),
            )
            .route(
                &format!("/{}/:id", kind.collection()),
                get(api::hardware::fetch)
                    .put(api::hardware::update)
                    .delete(api::hardware::archive),
            );
    }

    router
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    counter!(
        "http_requests_total",
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;

    use crate::indexer::RebuildWorker;

    pub(crate) async fn setup_state() -> (AppState, RebuildWorker) {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let database = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");

        AppState::new(metrics, database, "UTC".to_string())
    }

    pub(crate) fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    pub(crate) fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    pub(crate) fn post_json(uri: &str, body: Value) -> Request<Body> {
        json_request("POST", uri, body)
    }

    pub(crate) fn put_json(uri: &str, body: Value) -> Request<Body> {
        json_request("PUT", uri, body)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub(crate) async fn read_json(response: axum::response::Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::setup_state;
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (state, _worker) = setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let (state, _worker) = setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (state, _worker) = setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/invoices")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
