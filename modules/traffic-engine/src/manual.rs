use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use traffic_common::{JunctionId, Signal, SignalChange, TrafficError, TrafficResult};
use traffic_store::JunctionStore;

/// Operator-issued signal changes from the dashboard.
pub struct ManualControl {
    junctions: Arc<dyn JunctionStore>,
}

impl ManualControl {
    pub fn new(junctions: Arc<dyn JunctionStore>) -> Self {
        Self { junctions }
    }

    /// Set one junction's signal. The log row carries the junction's measured
    /// vehicle count. A preemption hold on the junction is not cancelled: its
    /// revert still fires later.
    pub async fn set_signal(&self, junction_id: JunctionId, signal: Signal) -> TrafficResult<()> {
        let change = SignalChange::manual(junction_id, signal, Utc::now());
        let applied = self.junctions.apply_signal_changes(&[change]).await?;
        if applied.is_empty() {
            return Err(TrafficError::junction_not_found(junction_id));
        }
        info!(junction_id, signal = %signal, "Signal set manually");
        Ok(())
    }
}
