use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::provider::MetricsProvider;
use crate::query::{self, QueryError};
use crate::store::SampleStore;

#[derive(Clone)]
pub struct HttpAppState {
    pub store: Arc<SampleStore>,
    pub provider: Arc<dyn MetricsProvider>,
}

/// Permissive CORS is deliberate: the agent serves a trusted local or
/// internal deployment and the transport is not a security boundary.
pub fn build_router(store: Arc<SampleStore>, provider: Arc<dyn MetricsProvider>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stats", get(stats_handler))
        .layer(CorsLayer::permissive())
        .with_state(HttpAppState { store, provider })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    time: String,
}

async fn stats_handler(
    State(state): State<HttpAppState>,
    Query(params): Query<StatsParams>,
) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        query::get_stats(&state.store, state.provider.as_ref(), &params.time)
    })
    .await;

    match result {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(err @ QueryError::InvalidTimeFormat(_))) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        Ok(Err(QueryError::Store(err))) => {
            error!(error = %err, "stats query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to read samples".to_string(),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "stats query task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to read samples".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::sample;
    use crate::provider::testing::StaticProvider;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router(provider: StaticProvider) -> (Router, Arc<SampleStore>) {
        let store = Arc::new(SampleStore::open_in_memory().unwrap());
        let app = build_router(store.clone(), Arc::new(provider));
        (app, store)
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (app, _store) = test_router(StaticProvider::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"ok");
    }

    #[tokio::test]
    async fn stats_returns_windowed_series() {
        let provider = StaticProvider::default();
        let snapshot = sample(&provider);
        let (app, store) = test_router(provider);
        store.append(&snapshot).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stats?time=24Hours")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["usage"]["cpu"].as_array().unwrap().len(), 1);
        assert_eq!(value["limits"]["cores"], 8);
    }

    #[tokio::test]
    async fn malformed_window_is_a_client_error() {
        let (app, _store) = test_router(StaticProvider::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stats?time=10Fortnights")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("invalid time format"));
    }

    #[tokio::test]
    async fn corrupt_store_surfaces_as_a_server_error() {
        let mut path = std::env::temp_dir();
        path.push(format!("hoststats-http-500-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let store = Arc::new(SampleStore::open(&path).unwrap());
        let provider = StaticProvider::default();
        store.append(&sample(&provider)).unwrap();

        // Damage the stored process list through a second connection.
        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute("UPDATE stats SET top_ram_processes = 'not json'", [])
            .unwrap();
        drop(raw);

        let app = build_router(store.clone(), Arc::new(provider));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stats?time=1Hours")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"failed to read samples");

        drop(store);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    #[tokio::test]
    async fn missing_time_parameter_is_a_client_error() {
        let (app, _store) = test_router(StaticProvider::default());

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_window_returns_empty_arrays() {
        let (app, _store) = test_router(StaticProvider::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stats?time=1Hours")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["usage"]["cpu"].as_array().unwrap().len(), 0);
    }
}
