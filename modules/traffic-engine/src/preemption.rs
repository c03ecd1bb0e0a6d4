//! Emergency vehicle preemption.
//!
//! Forces the junctions nearest an emergency to GREEN and schedules their
//! return to whatever signal each showed at the moment it was picked.
//!
//! Overlapping preemptions are not merged. If a second call picks a junction
//! the first one is still holding, it captures GREEN as that junction's
//! "original" signal; the junction ends up on whichever snapshot belongs to
//! the task that fires last.
//!
//! If the revert cannot be scheduled the signals are restored before the
//! error is returned, so a failed call never leaves junctions held GREEN.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use traffic_common::{
    GeoLocator, GeoPoint, JunctionId, Signal, SignalChange, TrafficError, TrafficResult,
};
use traffic_store::JunctionStore;

use crate::scheduler::{DeferredAction, SchedulerHandle};

/// Upper bound on a preemption hold.
pub const MAX_HOLD_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, PartialEq)]
pub struct PreemptionRequest {
    pub origin: GeoPoint,
    pub radius_km: f64,
    pub max_count: usize,
    /// Values ≤ 0 revert on the next scheduler pass.
    pub hold_seconds: i64,
    /// Free-form vehicle label ("ambulance", "vip"); logged only.
    pub vehicle: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreemptionOutcome {
    pub affected: Vec<JunctionId>,
    pub hold_seconds: i64,
    /// `None` when nothing was preempted.
    pub revert_at: Option<DateTime<Utc>>,
}

pub struct PreemptionEngine {
    junctions: Arc<dyn JunctionStore>,
    scheduler: SchedulerHandle,
}

impl PreemptionEngine {
    pub fn new(junctions: Arc<dyn JunctionStore>, scheduler: SchedulerHandle) -> Self {
        Self {
            junctions,
            scheduler,
        }
    }

    pub async fn preempt(&self, request: PreemptionRequest) -> TrafficResult<PreemptionOutcome> {
        validate(&request)?;

        let junctions = self.junctions.list_junctions().await?;
        let picked = GeoLocator::select_nearest(
            request.origin,
            &junctions,
            request.radius_km,
            request.max_count,
        );

        if picked.is_empty() {
            info!(vehicle = %request.vehicle, "No positioned junctions to preempt");
            return Ok(PreemptionOutcome {
                affected: Vec::new(),
                hold_seconds: request.hold_seconds,
                revert_at: None,
            });
        }

        let now = Utc::now();
        let changes: Vec<SignalChange> = picked
            .iter()
            .map(|c| SignalChange::preempt(c.id, now))
            .collect();
        let affected = self.junctions.apply_signal_changes(&changes).await?;

        let restores: Vec<(JunctionId, Signal)> = picked
            .iter()
            .filter(|c| affected.contains(&c.id))
            .map(|c| (c.id, c.signal))
            .collect();
        let hold = Duration::from_secs(request.hold_seconds.max(0) as u64);
        let action = DeferredAction::SignalRevert {
            restores: restores.clone(),
        };
        let receipt = match self.scheduler.schedule(action, hold) {
            Ok(receipt) => receipt,
            Err(e) => {
                // Nothing will revert these later; undo now.
                warn!(error = %e, junctions = ?affected, "Revert could not be scheduled, reverting inline");
                let changes: Vec<SignalChange> = restores
                    .iter()
                    .map(|&(id, signal)| SignalChange::restore(id, signal, Utc::now()))
                    .collect();
                self.junctions.apply_signal_changes(&changes).await?;
                return Err(e.into());
            }
        };

        info!(
            vehicle = %request.vehicle,
            lat = request.origin.lat,
            lng = request.origin.lng,
            affected = ?affected,
            hold_seconds = request.hold_seconds,
            task_id = receipt.id,
            "Emergency preemption applied"
        );

        Ok(PreemptionOutcome {
            affected,
            hold_seconds: request.hold_seconds,
            revert_at: Some(receipt.fire_at),
        })
    }
}

fn validate(request: &PreemptionRequest) -> TrafficResult<()> {
    let GeoPoint { lat, lng } = request.origin;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(TrafficError::validation("lat/lng out of range"));
    }
    if request.max_count == 0 {
        return Err(TrafficError::validation("affect_count must be at least 1"));
    }
    if request.hold_seconds > MAX_HOLD_SECONDS {
        return Err(TrafficError::validation(format!(
            "duration must be at most {MAX_HOLD_SECONDS} seconds"
        )));
    }
    Ok(())
}
