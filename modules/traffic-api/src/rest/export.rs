//! CSV download of one junction's signal log.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::SecondsFormat;
use traffic_common::{JunctionId, LogEntry, TrafficError};

use crate::error::ApiResult;
use crate::AppState;

const HEADER: &str = "id,junction_id,cars,signal,timestamp";

pub async fn api_export_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JunctionId>,
) -> ApiResult<Response> {
    if state.junctions.get_junction(id).await?.is_none() {
        return Err(TrafficError::junction_not_found(id).into());
    }
    let entries = state.log.traffic_log(Some(id), i64::MAX).await?;

    let disposition = format!("attachment; filename=\"junction_{id}_log.csv\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        to_csv(&entries),
    )
        .into_response())
}

/// Every field is numeric or a fixed tag, so nothing needs quoting.
fn to_csv(entries: &[LogEntry]) -> String {
    let mut out = String::with_capacity(HEADER.len() + 1 + entries.len() * 64);
    out.push_str(HEADER);
    out.push('\n');
    for e in entries {
        let _ = writeln!(
            out,
            "{},{},{},{},{}",
            e.id,
            e.junction_id,
            e.vehicle_count,
            e.signal,
            e.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        );
    }
    out
}
