//! Road incidents: accidents, construction, and clearing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;
use traffic_common::{
    CongestionSpill, EngineConfig, EventKind, NewRoadEvent, RoadChange, RoadId, RoadStatus,
    TrafficError, TrafficResult,
};
use traffic_store::RoadStore;

use crate::scheduler::{DeferredAction, SchedulerHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct IncidentOutcome {
    pub road_id: RoadId,
    pub new_status: RoadStatus,
    /// Neighbouring roads whose congestion was raised.
    pub diverted: Vec<RoadId>,
    /// Set when an automatic reopen was scheduled.
    pub reopen_at: Option<DateTime<Utc>>,
}

pub struct IncidentEngine {
    roads: Arc<dyn RoadStore>,
    scheduler: SchedulerHandle,
    config: EngineConfig,
}

impl IncidentEngine {
    pub fn new(roads: Arc<dyn RoadStore>, scheduler: SchedulerHandle, config: EngineConfig) -> Self {
        Self {
            roads,
            scheduler,
            config,
        }
    }

    /// Record an event on a road and apply its effect.
    ///
    /// CLEAR reopens immediately and touches nothing else. ACCIDENT and
    /// CONSTRUCTION raise congestion on every road sharing an endpoint with
    /// this one; an ACCIDENT also schedules an automatic reopen, which fires
    /// even if the road is cleared by hand in the meantime.
    pub async fn report_event(
        &self,
        road_id: RoadId,
        kind: EventKind,
        description: impl Into<String>,
    ) -> TrafficResult<IncidentOutcome> {
        let now = Utc::now();
        let new_status = kind.resulting_status();

        let (event, spill) = match kind {
            EventKind::Clear => (
                NewRoadEvent {
                    kind,
                    description: description.into(),
                    start_time: now,
                    end_time: Some(now),
                },
                None,
            ),
            EventKind::Accident | EventKind::Construction => {
                let neighbours = self.roads.neighbours(road_id).await?;
                (
                    NewRoadEvent {
                        kind,
                        description: description.into(),
                        start_time: now,
                        end_time: None,
                    },
                    Some(CongestionSpill {
                        roads: neighbours.iter().map(|r| r.id).collect(),
                        bump: self.config.congestion_bump,
                        baseline: self.config.congestion_baseline,
                    }),
                )
            }
        };

        let diverted = spill.as_ref().map(|s| s.roads.clone()).unwrap_or_default();
        let change = RoadChange {
            road_id,
            status: new_status,
            event,
            spill,
        };

        if !self.roads.apply_road_change(&change).await? {
            return Err(TrafficError::road_not_found(road_id));
        }

        let reopen_at = if kind == EventKind::Accident {
            let receipt = self.scheduler.schedule(
                DeferredAction::RoadReopen { road_id },
                Duration::from_secs(self.config.accident_reopen_seconds),
            )?;
            Some(receipt.fire_at)
        } else {
            None
        };

        info!(
            road_id,
            kind = %kind,
            new_status = %new_status,
            diverted = ?diverted,
            "Road event recorded"
        );

        Ok(IncidentOutcome {
            road_id,
            new_status,
            diverted,
            reopen_at,
        })
    }
}
