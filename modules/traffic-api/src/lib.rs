//! HTTP/JSON surface of the traffic control network.
//!
//! The router is built over any store implementing all three store traits,
//! so tests drive it against `MemoryStore` and the binary against `PgStore`.

pub mod error;
pub mod rest;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use traffic_common::EngineConfig;
use traffic_engine::{IncidentEngine, ManualControl, PreemptionEngine, SchedulerHandle};
use traffic_store::{EventLog, JunctionStore, RoadStore};

pub struct AppState {
    pub junctions: Arc<dyn JunctionStore>,
    pub roads: Arc<dyn RoadStore>,
    pub log: Arc<dyn EventLog>,
    pub preemption: PreemptionEngine,
    pub incidents: IncidentEngine,
    pub manual: ManualControl,
    pub scheduler: SchedulerHandle,
    pub engine: EngineConfig,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, scheduler: SchedulerHandle, engine: EngineConfig) -> Self
    where
        S: JunctionStore + RoadStore + EventLog + 'static,
    {
        let junctions: Arc<dyn JunctionStore> = store.clone();
        let roads: Arc<dyn RoadStore> = store.clone();
        let log: Arc<dyn EventLog> = store;

        Self {
            preemption: PreemptionEngine::new(junctions.clone(), scheduler.clone()),
            incidents: IncidentEngine::new(roads.clone(), scheduler.clone(), engine.clone()),
            manual: ManualControl::new(junctions.clone()),
            junctions,
            roads,
            log,
            scheduler,
            engine,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(rest::health))
        .route("/api/junctions", get(rest::api_junctions))
        .route("/api/roads", get(rest::api_roads))
        .route("/api/traffic_log", get(rest::api_traffic_log))
        .route("/api/events", get(rest::api_events))
        .route("/api/junction/{id}/signal", post(rest::signal::api_update_signal))
        .route("/api/junction/{id}/export", get(rest::export::api_export_log))
        .route("/api/emergency", post(rest::emergency::api_emergency))
        .route("/api/event", post(rest::event::api_report_event))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // Dashboard polls; never serve cached state.
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}
