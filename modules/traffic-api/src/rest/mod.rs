pub mod emergency;
pub mod event;
pub mod export;
pub mod signal;

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use traffic_common::{
    EventKind, Junction, JunctionId, LogEntry, LogSignal, Road, RoadEvent, RoadId, RoadStatus,
    Signal,
};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const LOG_LIMIT_ALL: i64 = 200;
pub const LOG_LIMIT_JUNCTION: i64 = 100;
pub const EVENT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 10_000;

// --- Wire shapes ---

#[derive(Debug, Serialize)]
pub struct JunctionView {
    id: JunctionId,
    name: String,
    lat: Option<f64>,
    lng: Option<f64>,
    current_cars: i64,
    signal: Signal,
    last_update: Option<DateTime<Utc>>,
}

impl From<Junction> for JunctionView {
    fn from(j: Junction) -> Self {
        Self {
            id: j.id,
            name: j.name,
            lat: j.position.map(|p| p.lat),
            lng: j.position.map(|p| p.lng),
            current_cars: j.current_vehicle_count,
            signal: j.signal,
            last_update: j.last_update,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoadView {
    id: RoadId,
    name: String,
    coords: Vec<[f64; 2]>,
    status: RoadStatus,
    congestion: Option<u8>,
    from_junction: Option<JunctionId>,
    to_junction: Option<JunctionId>,
}

impl From<Road> for RoadView {
    fn from(r: Road) -> Self {
        Self {
            id: r.id,
            name: r.name,
            coords: r.geometry.iter().map(|p| [p.lat, p.lng]).collect(),
            status: r.status,
            congestion: r.congestion,
            from_junction: r.from_junction,
            to_junction: r.to_junction,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogEntryView {
    id: i64,
    junction_id: JunctionId,
    cars: i64,
    signal: LogSignal,
    timestamp: DateTime<Utc>,
}

impl From<LogEntry> for LogEntryView {
    fn from(e: LogEntry) -> Self {
        Self {
            id: e.id,
            junction_id: e.junction_id,
            cars: e.vehicle_count,
            signal: e.signal,
            timestamp: e.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoadEventView {
    id: i64,
    road_id: RoadId,
    #[serde(rename = "type")]
    kind: EventKind,
    description: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl From<RoadEvent> for RoadEventView {
    fn from(e: RoadEvent) -> Self {
        Self {
            id: e.id,
            road_id: e.road_id,
            kind: e.kind,
            description: e.description,
            start_time: e.start_time,
            end_time: e.end_time,
        }
    }
}

// --- Query structs ---

#[derive(Deserialize)]
pub struct TrafficLogQuery {
    junction_id: Option<JunctionId>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    road_id: Option<RoadId>,
    limit: Option<i64>,
}

fn clamp_limit(requested: Option<i64>, default: i64) -> i64 {
    requested.unwrap_or(default).clamp(0, MAX_LIMIT)
}

fn query_error(rejection: QueryRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}

// --- Handlers ---

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "pending_tasks": state.scheduler.pending(),
    }))
}

pub async fn api_junctions(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<JunctionView>>> {
    let junctions = state.junctions.list_junctions().await?;
    Ok(Json(junctions.into_iter().map(JunctionView::from).collect()))
}

pub async fn api_roads(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<RoadView>>> {
    let roads = state.roads.list_roads().await?;
    Ok(Json(roads.into_iter().map(RoadView::from).collect()))
}

pub async fn api_traffic_log(
    State(state): State<Arc<AppState>>,
    query: Result<Query<TrafficLogQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<LogEntryView>>> {
    let Query(params) = query.map_err(query_error)?;
    let default = match params.junction_id {
        Some(_) => LOG_LIMIT_JUNCTION,
        None => LOG_LIMIT_ALL,
    };
    let entries = state
        .log
        .traffic_log(params.junction_id, clamp_limit(params.limit, default))
        .await?;
    Ok(Json(entries.into_iter().map(LogEntryView::from).collect()))
}

pub async fn api_events(
    State(state): State<Arc<AppState>>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<RoadEventView>>> {
    let Query(params) = query.map_err(query_error)?;
    let events = state
        .log
        .road_events(params.road_id, clamp_limit(params.limit, EVENT_LIMIT))
        .await?;
    Ok(Json(events.into_iter().map(RoadEventView::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use traffic_common::GeoPoint;

    #[test]
    fn limits_default_and_clamp() {
        assert_eq!(clamp_limit(None, LOG_LIMIT_ALL), 200);
        assert_eq!(clamp_limit(Some(5), LOG_LIMIT_ALL), 5);
        assert_eq!(clamp_limit(Some(-3), LOG_LIMIT_ALL), 0);
        assert_eq!(clamp_limit(Some(i64::MAX), LOG_LIMIT_ALL), MAX_LIMIT);
    }

    #[test]
    fn road_view_flattens_geometry_to_lat_lng_pairs() {
        let road = Road {
            id: 3,
            name: "Janpath".into(),
            geometry: vec![GeoPoint::new(20.29, 85.82), GeoPoint::new(20.30, 85.83)],
            status: RoadStatus::Closed,
            congestion: None,
            from_junction: Some(7),
            to_junction: None,
        };

        let json = serde_json::to_value(RoadView::from(road)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 3,
                "name": "Janpath",
                "coords": [[20.29, 85.82], [20.30, 85.83]],
                "status": "CLOSED",
                "congestion": null,
                "from_junction": 7,
                "to_junction": null,
            })
        );
    }
}
