//! Persistence for the traffic network: junctions, roads, the signal log and
//! road events.
//!
//! Engines depend only on the traits in [`traits`]. `PgStore` is the
//! production backend; `MemoryStore` stands in for it in tests.

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use traits::{EventLog, JunctionStore, RoadStore};
