// src/api.rs
//! Diagnostics HTTP surface: health probe, last delivery report, and the
//! Prometheus exposition endpoint.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;

use crate::fanout::Orchestrator;
use crate::types::DeliveryReport;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/report", get(last_report))
        .route("/metrics", get(render_metrics))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn last_report(State(state): State<AppState>) -> Json<Option<DeliveryReport>> {
    Json(state.orchestrator.last_report())
}

async fn render_metrics(State(state): State<AppState>) -> String {
    match &state.metrics {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}
