use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde::Deserialize;
use traffic_common::{EventKind, RoadId};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

const FIELDS_REQUIRED: &str = "road_id,type required";

#[derive(Deserialize)]
pub struct EventRequest {
    road_id: Option<RoadId>,
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
}

pub async fn api_report_event(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(body) = body.map_err(|_| ApiError::bad_request(FIELDS_REQUIRED))?;
    let (Some(road_id), Some(kind)) = (body.road_id, body.kind) else {
        return Err(ApiError::bad_request(FIELDS_REQUIRED));
    };
    let kind: EventKind = kind
        .parse()
        .map_err(|_| ApiError::bad_request("type must be ACCIDENT, CONSTRUCTION or CLEAR"))?;

    let outcome = state
        .incidents
        .report_event(road_id, kind, body.description.unwrap_or_default())
        .await?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "road_id": outcome.road_id,
        "new_status": outcome.new_status,
    })))
}
