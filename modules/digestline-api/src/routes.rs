use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::AppState;

/// `POST /api/runs`: run one selection pass and return its summary.
///
/// Partial failures still answer 200; the summary's status says
/// `completed_with_errors`. Only a run that aborts answers 500.
pub async fn trigger_run(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !state.secret.authorizes(&headers) {
        warn!("Rejected run trigger with missing or invalid token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response();
    }

    let Ok(_slot) = state.run_slot.try_lock() else {
        info!("Run trigger ignored, a run is already in progress");
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "a run is already in progress" })),
        )
            .into_response();
    };

    let started = Instant::now();
    match state.orchestrator.run().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            error!(error = %e, elapsed_ms, "Triggered run failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string(), "elapsed_ms": elapsed_ms })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::{Duration, Utc};
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use digestline_common::{FileConfig, RawItem};
    use digestline_run::testing::{
        near_axis, raw_item, FixedEmbedder, FlakyStore, MockWriter, TEST_EMBEDDING_DIM,
    };
    use digestline_run::{Orchestrator, RunDeps};

    use crate::auth::TriggerSecret;
    use crate::{build_router, AppState};

    const SECRET: &str = "trigger-me";

    fn live(title: &str, a: usize, b: usize) -> RawItem {
        let mut item = raw_item(title, Some(near_axis(a, b)));
        item.expires_at = Utc::now() + Duration::days(1);
        item
    }

    fn state(store: FlakyStore) -> Arc<AppState> {
        let deps = RunDeps::with_store(
            Arc::new(store),
            Arc::new(FixedEmbedder::new(TEST_EMBEDDING_DIM)),
            Arc::new(MockWriter::new()),
        );
        Arc::new(AppState {
            orchestrator: Orchestrator::new(deps, FileConfig::default()),
            secret: TriggerSecret::new(Some(SECRET)),
            run_slot: Mutex::new(()),
        })
    }

    fn seeded() -> FlakyStore {
        FlakyStore::with_items(vec![
            live("BYD Seal price cut", 0, 1),
            live("BYD Seal gets cheaper", 0, 2),
            live("Tesla Model Y recall", 4, 5),
        ])
    }

    fn trigger(token: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().method("POST").uri("/api/runs");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        req.body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let app = build_router(state(FlakyStore::new()));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_wrong_token_is_unauthorized() {
        let app = build_router(state(seeded()));
        let response = app.clone().oneshot(trigger(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(trigger(Some("guess"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authorized_trigger_returns_the_summary() {
        let app = build_router(state(seeded()));
        let response = app.oneshot(trigger(Some(SECRET))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["raw_items"], 3);
        assert_eq!(body["committed"], 2);
        assert_eq!(body["events"][0]["type"], "items_loaded");
    }

    #[tokio::test]
    async fn partial_failure_still_answers_ok() {
        let store = seeded();
        store.fail_inserts();
        let app = build_router(state(store));

        let response = app.oneshot(trigger(Some(SECRET))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "completed_with_errors");
        assert_eq!(body["failed"], 2);
    }

    #[tokio::test]
    async fn aborted_run_answers_500_with_elapsed_time() {
        let store = seeded();
        store.fail_loads();
        let app = build_router(state(store));

        let response = app.oneshot(trigger(Some(SECRET))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("load"));
        assert!(body["elapsed_ms"].is_u64());
    }

    #[tokio::test]
    async fn concurrent_trigger_is_refused() {
        let state = state(seeded());
        let _held = state.run_slot.lock().await;
        let app = build_router(state.clone());

        let response = app.oneshot(trigger(Some(SECRET))).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
