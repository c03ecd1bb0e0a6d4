//! Store seams the engines are built against.

use anyhow::Result;
use async_trait::async_trait;
use traffic_common::{
    Junction, JunctionId, LogEntry, Road, RoadChange, RoadEvent, RoadId, SignalChange,
};

/// Persisted junction records.
#[async_trait]
pub trait JunctionStore: Send + Sync {
    /// All junctions, ascending by id.
    async fn list_junctions(&self) -> Result<Vec<Junction>>;

    async fn get_junction(&self, id: JunctionId) -> Result<Option<Junction>>;

    /// Apply every signal write and append its log row as one transaction.
    /// Unknown junction ids are skipped. Returns the ids that were written.
    async fn apply_signal_changes(&self, changes: &[SignalChange]) -> Result<Vec<JunctionId>>;
}

/// Persisted road records plus the junction → road adjacency index.
#[async_trait]
pub trait RoadStore: Send + Sync {
    /// All roads, ascending by id.
    async fn list_roads(&self) -> Result<Vec<Road>>;

    async fn get_road(&self, id: RoadId) -> Result<Option<Road>>;

    /// Roads other than `id` that share an endpoint with it.
    async fn neighbours(&self, id: RoadId) -> Result<Vec<Road>>;

    /// Status change, event append and neighbour congestion updates, all or
    /// nothing. Returns `false` (and writes nothing) if the road is unknown.
    async fn apply_road_change(&self, change: &RoadChange) -> Result<bool>;
}

/// Read side of the append-only audit trail. Rows are appended by the
/// mutating store calls, inside their transactions.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Signal log, newest first.
    async fn traffic_log(&self, junction_id: Option<JunctionId>, limit: i64)
        -> Result<Vec<LogEntry>>;

    /// Road events, newest first.
    async fn road_events(&self, road_id: Option<RoadId>, limit: i64) -> Result<Vec<RoadEvent>>;
}
