use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde::{de, Deserialize, Deserializer};
use traffic_common::GeoPoint;
use traffic_engine::PreemptionRequest;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

const FIELDS_REQUIRED: &str = "lat,lng,type required";

#[derive(Deserialize)]
pub struct EmergencyRequest {
    #[serde(default, deserialize_with = "number_or_numeric_string")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "number_or_numeric_string")]
    lng: Option<f64>,
    /// Vehicle label, e.g. "ambulance" or "vip". Echoed back, never interpreted.
    #[serde(rename = "type")]
    vehicle: Option<String>,
    #[serde(default, deserialize_with = "number_or_numeric_string")]
    radius_km: Option<f64>,
    #[serde(default, deserialize_with = "number_or_numeric_string")]
    affect_count: Option<i64>,
    #[serde(default, deserialize_with = "number_or_numeric_string")]
    duration: Option<i64>,
}

/// Form posts send numbers as strings ("20.28"); accept both.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Number(T),
    Text(String),
    Other(de::IgnoredAny),
}

fn number_or_numeric_string<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match Option::<Lenient<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Lenient::Number(n)) => Ok(Some(n)),
        Some(Lenient::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected a number, got {text:?}"))),
        Some(Lenient::Other(_)) => Err(de::Error::custom("expected a number")),
    }
}

fn body_error(rejection: JsonRejection) -> ApiError {
    match rejection {
        // Present but unusable fields get their own message.
        JsonRejection::JsonDataError(e) => ApiError::bad_request(e.body_text()),
        _ => ApiError::bad_request(FIELDS_REQUIRED),
    }
}

pub async fn api_emergency(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EmergencyRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(body) = body.map_err(body_error)?;
    let (Some(lat), Some(lng), Some(vehicle)) = (body.lat, body.lng, body.vehicle) else {
        return Err(ApiError::bad_request(FIELDS_REQUIRED));
    };

    let defaults = &state.engine;
    let max_count = match body.affect_count {
        Some(n) => usize::try_from(n).unwrap_or(0),
        None => defaults.emergency_affect_count,
    };
    let request = PreemptionRequest {
        origin: GeoPoint::new(lat, lng),
        radius_km: body.radius_km.unwrap_or(defaults.emergency_radius_km),
        max_count,
        hold_seconds: body.duration.unwrap_or(defaults.emergency_hold_seconds),
        vehicle: vehicle.clone(),
    };

    let outcome = state.preemption.preempt(request).await?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "type": vehicle,
        "affected": outcome.affected,
        "duration": outcome.hold_seconds,
    })))
}
