use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JunctionId = i64;
pub type RoadId = i64;

// --- Geography ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

// --- Enums ---

/// The two states a junction signal can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Green,
    Red,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Green => "GREEN",
            Signal::Red => "RED",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive: operators type "green" as often as "GREEN".
impl FromStr for Signal {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GREEN" => Ok(Signal::Green),
            "RED" => Ok(Signal::Red),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Signal tag written to the traffic log. Wider than [`Signal`]: the log also
/// records preemption overrides and rows produced by the traffic generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogSignal {
    Green,
    Red,
    GreenPreempt,
    Sim,
}

impl LogSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            LogSignal::Green => "GREEN",
            LogSignal::Red => "RED",
            LogSignal::GreenPreempt => "GREEN_PREEMPT",
            LogSignal::Sim => "SIM",
        }
    }
}

impl From<Signal> for LogSignal {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Green => LogSignal::Green,
            Signal::Red => LogSignal::Red,
        }
    }
}

impl fmt::Display for LogSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogSignal {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GREEN" => Ok(LogSignal::Green),
            "RED" => Ok(LogSignal::Red),
            "GREEN_PREEMPT" => Ok(LogSignal::GreenPreempt),
            "SIM" => Ok(LogSignal::Sim),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoadStatus {
    Open,
    Closed,
    Construction,
}

impl RoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoadStatus::Open => "OPEN",
            RoadStatus::Closed => "CLOSED",
            RoadStatus::Construction => "CONSTRUCTION",
        }
    }
}

impl fmt::Display for RoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoadStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(RoadStatus::Open),
            "CLOSED" => Ok(RoadStatus::Closed),
            "CONSTRUCTION" => Ok(RoadStatus::Construction),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Operator-reported road event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Accident,
    Construction,
    Clear,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Accident => "ACCIDENT",
            EventKind::Construction => "CONSTRUCTION",
            EventKind::Clear => "CLEAR",
        }
    }

    /// Road status the event puts the road into.
    pub fn resulting_status(self) -> RoadStatus {
        match self {
            EventKind::Accident => RoadStatus::Closed,
            EventKind::Construction => RoadStatus::Construction,
            EventKind::Clear => RoadStatus::Open,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCIDENT" => Ok(EventKind::Accident),
            "CONSTRUCTION" => Ok(EventKind::Construction),
            "CLEAR" => Ok(EventKind::Clear),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

// --- Records ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Junction {
    pub id: JunctionId,
    pub name: String,
    pub position: Option<GeoPoint>,
    pub current_vehicle_count: i64,
    pub signal: Signal,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Road {
    pub id: RoadId,
    pub name: String,
    pub geometry: Vec<GeoPoint>,
    pub status: RoadStatus,
    /// 0..=100. `None` until the road has been measured or touched by a diversion.
    pub congestion: Option<u8>,
    pub from_junction: Option<JunctionId>,
    pub to_junction: Option<JunctionId>,
}

impl Road {
    pub fn endpoints(&self) -> impl Iterator<Item = JunctionId> {
        self.from_junction.into_iter().chain(self.to_junction)
    }
}

/// Row of the signal audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub junction_id: JunctionId,
    pub vehicle_count: i64,
    pub signal: LogSignal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadEvent {
    pub id: i64,
    pub road_id: RoadId,
    pub kind: EventKind,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

// --- Write intents ---

/// Which vehicle count goes into the log row written alongside a signal change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggedCount {
    /// The junction's measured `current_vehicle_count`.
    Measured,
    /// Zero: the row records an override, not measured demand.
    Override,
}

/// One junction signal write plus its audit row. Stores apply a batch of
/// these as a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalChange {
    pub junction_id: JunctionId,
    pub signal: Signal,
    pub logged_as: LogSignal,
    pub logged_count: LoggedCount,
    pub at: DateTime<Utc>,
}

impl SignalChange {
    pub fn manual(junction_id: JunctionId, signal: Signal, at: DateTime<Utc>) -> Self {
        Self {
            junction_id,
            signal,
            logged_as: signal.into(),
            logged_count: LoggedCount::Measured,
            at,
        }
    }

    pub fn preempt(junction_id: JunctionId, at: DateTime<Utc>) -> Self {
        Self {
            junction_id,
            signal: Signal::Green,
            logged_as: LogSignal::GreenPreempt,
            logged_count: LoggedCount::Override,
            at,
        }
    }

    pub fn restore(junction_id: JunctionId, signal: Signal, at: DateTime<Utc>) -> Self {
        Self {
            junction_id,
            signal,
            logged_as: signal.into(),
            logged_count: LoggedCount::Override,
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRoadEvent {
    pub kind: EventKind,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Diversion pressure pushed onto the roads around a closed one. Evaluated
/// by the store against each road's congestion at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct CongestionSpill {
    pub roads: Vec<RoadId>,
    pub bump: u8,
    /// Stand-in for roads with no measured congestion yet.
    pub baseline: u8,
}

impl CongestionSpill {
    pub fn apply(&self, current: Option<u8>) -> u8 {
        let base = u16::from(current.unwrap_or(self.baseline));
        (base + u16::from(self.bump)).min(100) as u8
    }
}

/// Status change on one road, the event that caused it, and the congestion
/// spill onto its neighbours. Applied all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadChange {
    pub road_id: RoadId,
    pub status: RoadStatus,
    pub event: NewRoadEvent,
    pub spill: Option<CongestionSpill>,
}
