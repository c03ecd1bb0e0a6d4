use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
};
use serde::Deserialize;
use traffic_common::{JunctionId, Signal};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

const SIGNAL_REQUIRED: &str = "signal required (GREEN or RED)";

#[derive(Deserialize)]
pub struct SignalRequest {
    signal: Option<String>,
}

pub async fn api_update_signal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JunctionId>,
    body: Result<Json<SignalRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let raw = body
        .ok()
        .and_then(|Json(b)| b.signal)
        .ok_or_else(|| ApiError::bad_request(SIGNAL_REQUIRED))?;
    let signal: Signal = raw
        .parse()
        .map_err(|_| ApiError::bad_request("signal must be GREEN or RED"))?;

    state.manual.set_signal(id, signal).await?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "id": id,
        "signal": signal,
    })))
}
