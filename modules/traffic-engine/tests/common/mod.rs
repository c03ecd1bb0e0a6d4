//! Shared fixtures: a small Bhubaneswar network on the in-memory store.

#![allow(dead_code)]

use std::sync::Arc;

use tokio::task::JoinHandle;
use traffic_common::{EngineConfig, GeoPoint, Junction, JunctionId, Road, RoadId, RoadStatus, Signal};
use traffic_engine::{
    IncidentEngine, ManualControl, PreemptionEngine, Scheduler, SchedulerHandle, StoreExecutor,
};
use traffic_store::{JunctionStore, MemoryStore, RoadStore};

pub const JUNCTIONS: [(&str, f64, f64); 12] = [
    ("Vani Vihar", 20.2871, 85.8260),
    ("Jaydev Vihar", 20.2698, 85.8265),
    ("Sachivalaya Marg", 20.2961, 85.8245),
    ("Unit 1 Crossing", 20.2715, 85.8317),
    ("Master Canteen", 20.2749, 85.8284),
    ("Khandagiri Road", 20.2542, 85.8099),
    ("Janpath", 20.2985, 85.8269),
    ("Market Building", 20.2989, 85.8240),
    ("Bapuji Nagar", 20.2968, 85.8182),
    ("Sachivalaya Marg North", 20.3011, 85.8286),
    ("Infocity Crossing", 20.2890, 85.8370),
    ("Patia Junction", 20.3450, 85.8200),
];

/// The twelve sample junctions, ids 1..=12, all RED.
pub fn bhubaneswar() -> Vec<Junction> {
    JUNCTIONS
        .iter()
        .enumerate()
        .map(|(i, &(name, lat, lng))| Junction {
            id: i as JunctionId + 1,
            name: name.to_string(),
            position: Some(GeoPoint::new(lat, lng)),
            current_vehicle_count: 10 * (i as i64 + 1),
            signal: Signal::Red,
            last_update: None,
        })
        .collect()
}

pub fn road(id: RoadId, from: JunctionId, to: JunctionId, congestion: Option<u8>) -> Road {
    Road {
        id,
        name: format!("Road {id}"),
        geometry: vec![],
        status: RoadStatus::Open,
        congestion,
        from_junction: Some(from),
        to_junction: Some(to),
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub scheduler: SchedulerHandle,
    pub preemption: PreemptionEngine,
    pub incidents: IncidentEngine,
    pub manual: ManualControl,
    pub worker: JoinHandle<()>,
}

impl Harness {
    /// Must be called inside a tokio runtime: spawns the scheduler worker.
    pub fn new(junctions: Vec<Junction>, roads: Vec<Road>) -> Self {
        let store = Arc::new(MemoryStore::from_network(junctions, roads));
        let junction_store: Arc<dyn JunctionStore> = store.clone();
        let road_store: Arc<dyn RoadStore> = store.clone();

        let (scheduler, worker) =
            Scheduler::spawn(StoreExecutor::new(junction_store.clone(), road_store.clone()));

        Self {
            preemption: PreemptionEngine::new(junction_store.clone(), scheduler.clone()),
            incidents: IncidentEngine::new(road_store, scheduler.clone(), EngineConfig::default()),
            manual: ManualControl::new(junction_store),
            scheduler,
            store,
            worker,
        }
    }

    pub async fn signal(&self, id: JunctionId) -> Signal {
        self.store.get_junction(id).await.unwrap().unwrap().signal
    }

    pub async fn road(&self, id: RoadId) -> Road {
        self.store.get_road(id).await.unwrap().unwrap()
    }
}
