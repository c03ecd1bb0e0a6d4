//! In-memory store for tests. No database required.
//!
//! All tables live behind one `RwLock`, so a multi-row write holds the single
//! write guard for its whole duration and readers see either none or all of it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use traffic_common::{
    AdjacencyIndex, Junction, JunctionId, LogEntry, LoggedCount, Road, RoadChange, RoadEvent,
    RoadId, SignalChange,
};

use crate::traits::{EventLog, JunctionStore, RoadStore};

#[derive(Default)]
struct Tables {
    junctions: BTreeMap<JunctionId, Junction>,
    roads: BTreeMap<RoadId, Road>,
    adjacency: AdjacencyIndex,
    traffic_log: Vec<LogEntry>,
    events: Vec<RoadEvent>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn from_network(junctions: Vec<Junction>, roads: Vec<Road>) -> Self {
        let adjacency = AdjacencyIndex::from_roads(&roads);
        Self {
            tables: RwLock::new(Tables {
                junctions: junctions.into_iter().map(|j| (j.id, j)).collect(),
                roads: roads.into_iter().map(|r| (r.id, r)).collect(),
                adjacency,
                ..Tables::default()
            }),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("memory store marked unavailable");
        }
        Ok(())
    }
}

fn newest_first<T: Clone>(rows: &[T], keep: impl Fn(&T) -> bool, limit: i64) -> Vec<T> {
    let limit = usize::try_from(limit).unwrap_or(0);
    rows.iter().rev().filter(|r| keep(r)).take(limit).cloned().collect()
}

#[async_trait]
impl JunctionStore for MemoryStore {
    async fn list_junctions(&self) -> Result<Vec<Junction>> {
        self.check_available()?;
        Ok(self.tables.read().await.junctions.values().cloned().collect())
    }

    async fn get_junction(&self, id: JunctionId) -> Result<Option<Junction>> {
        self.check_available()?;
        Ok(self.tables.read().await.junctions.get(&id).cloned())
    }

    async fn apply_signal_changes(&self, changes: &[SignalChange]) -> Result<Vec<JunctionId>> {
        self.check_available()?;
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let mut applied = Vec::with_capacity(changes.len());

        for change in changes {
            let Some(junction) = tables.junctions.get_mut(&change.junction_id) else {
                continue;
            };
            junction.signal = change.signal;
            junction.last_update = Some(match junction.last_update {
                Some(prev) => prev.max(change.at),
                None => change.at,
            });
            let vehicle_count = match change.logged_count {
                LoggedCount::Measured => junction.current_vehicle_count,
                LoggedCount::Override => 0,
            };
            let id = tables.traffic_log.len() as i64 + 1;
            tables.traffic_log.push(LogEntry {
                id,
                junction_id: change.junction_id,
                vehicle_count,
                signal: change.logged_as,
                timestamp: change.at,
            });
            applied.push(change.junction_id);
        }

        Ok(applied)
    }
}

#[async_trait]
impl RoadStore for MemoryStore {
    async fn list_roads(&self) -> Result<Vec<Road>> {
        self.check_available()?;
        Ok(self.tables.read().await.roads.values().cloned().collect())
    }

    async fn get_road(&self, id: RoadId) -> Result<Option<Road>> {
        self.check_available()?;
        Ok(self.tables.read().await.roads.get(&id).cloned())
    }

    async fn neighbours(&self, id: RoadId) -> Result<Vec<Road>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .adjacency
            .neighbours(id)
            .into_iter()
            .filter_map(|r| tables.roads.get(&r).cloned())
            .collect())
    }

    async fn apply_road_change(&self, change: &RoadChange) -> Result<bool> {
        self.check_available()?;
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        let Some(road) = tables.roads.get_mut(&change.road_id) else {
            return Ok(false);
        };
        road.status = change.status;

        if let Some(spill) = &change.spill {
            for neighbour in &spill.roads {
                if let Some(road) = tables.roads.get_mut(neighbour) {
                    road.congestion = Some(spill.apply(road.congestion));
                }
            }
        }

        let id = tables.events.len() as i64 + 1;
        tables.events.push(RoadEvent {
            id,
            road_id: change.road_id,
            kind: change.event.kind,
            description: change.event.description.clone(),
            start_time: change.event.start_time,
            end_time: change.event.end_time,
        });

        Ok(true)
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn traffic_log(
        &self,
        junction_id: Option<JunctionId>,
        limit: i64,
    ) -> Result<Vec<LogEntry>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(newest_first(
            &tables.traffic_log,
            |e| junction_id.map_or(true, |j| e.junction_id == j),
            limit,
        ))
    }

    async fn road_events(&self, road_id: Option<RoadId>, limit: i64) -> Result<Vec<RoadEvent>> {
        self.check_available()?;
        let tables = self.tables.read().await;
        Ok(newest_first(
            &tables.events,
            |e| road_id.map_or(true, |r| e.road_id == r),
            limit,
        ))
    }
}
