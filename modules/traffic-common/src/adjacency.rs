use std::collections::{BTreeSet, HashMap};

use crate::types::{JunctionId, Road, RoadId};

/// Junction id → ids of the roads that start or end there.
///
/// Roads are undirected for this purpose: a match on either endpoint counts.
/// Endpoints never change after a road is created, so the index only grows.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyIndex {
    incident: HashMap<JunctionId, BTreeSet<RoadId>>,
    endpoints: HashMap<RoadId, Vec<JunctionId>>,
}

impl AdjacencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_roads<'a>(roads: impl IntoIterator<Item = &'a Road>) -> Self {
        let mut index = Self::new();
        for road in roads {
            index.insert(road);
        }
        index
    }

    pub fn insert(&mut self, road: &Road) {
        let ends: Vec<JunctionId> = road.endpoints().collect();
        for &junction in &ends {
            self.incident.entry(junction).or_default().insert(road.id);
        }
        self.endpoints.insert(road.id, ends);
    }

    pub fn roads_at(&self, junction: JunctionId) -> impl Iterator<Item = RoadId> + '_ {
        self.incident.get(&junction).into_iter().flatten().copied()
    }

    /// Every other road sharing an endpoint with `road`, ascending by id.
    pub fn neighbours(&self, road: RoadId) -> Vec<RoadId> {
        let mut out = BTreeSet::new();
        for &junction in self.endpoints.get(&road).into_iter().flatten() {
            out.extend(self.roads_at(junction).filter(|&r| r != road));
        }
        out.into_iter().collect()
    }
}
