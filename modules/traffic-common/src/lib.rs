//! Domain types shared by the store, engines and HTTP surface of the
//! traffic control network.

pub mod adjacency;
pub mod config;
pub mod error;
pub mod geo;
pub mod types;

pub use adjacency::AdjacencyIndex;
pub use config::{AppConfig, EngineConfig};
pub use error::{TrafficError, TrafficResult};
pub use geo::{haversine_km, GeoLocator, NearestJunction};
pub use types::*;
