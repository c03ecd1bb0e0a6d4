//! Postgres-backed store.
//!
//! Every mutating call runs inside one transaction: the row updates and the
//! audit rows that describe them commit together or not at all.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};
use traffic_common::{
    AdjacencyIndex, EventKind, GeoPoint, Junction, JunctionId, LogEntry, LoggedCount, Road,
    RoadChange, RoadEvent, RoadId, SignalChange,
};

use crate::traits::{EventLog, JunctionStore, RoadStore};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct JunctionRow {
    id: i64,
    name: String,
    lat: Option<f64>,
    lng: Option<f64>,
    current_cars: i64,
    signal: String,
    last_update: Option<DateTime<Utc>>,
}

impl TryFrom<JunctionRow> for Junction {
    type Error = anyhow::Error;

    fn try_from(row: JunctionRow) -> Result<Self> {
        Ok(Junction {
            id: row.id,
            name: row.name,
            position: row.lat.zip(row.lng).map(|(lat, lng)| GeoPoint::new(lat, lng)),
            current_vehicle_count: row.current_cars,
            signal: row.signal.parse()?,
            last_update: row.last_update,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoadRow {
    id: i64,
    name: String,
    coords: Json<Vec<[f64; 2]>>,
    status: String,
    congestion: Option<i16>,
    from_junction: Option<i64>,
    to_junction: Option<i64>,
}

impl TryFrom<RoadRow> for Road {
    type Error = anyhow::Error;

    fn try_from(row: RoadRow) -> Result<Self> {
        let congestion = row
            .congestion
            .map(|c| u8::try_from(c.clamp(0, 100)))
            .transpose()?;
        Ok(Road {
            id: row.id,
            name: row.name,
            geometry: row.coords.0.into_iter().map(|[lat, lng]| GeoPoint::new(lat, lng)).collect(),
            status: row.status.parse()?,
            congestion,
            from_junction: row.from_junction,
            to_junction: row.to_junction,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    junction_id: i64,
    cars: i64,
    signal: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = anyhow::Error;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(LogEntry {
            id: row.id,
            junction_id: row.junction_id,
            vehicle_count: row.cars,
            signal: row.signal.parse()?,
            timestamp: row.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    road_id: i64,
    kind: String,
    description: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl TryFrom<EventRow> for RoadEvent {
    type Error = anyhow::Error;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(RoadEvent {
            id: row.id,
            road_id: row.road_id,
            kind: row.kind.parse::<EventKind>()?,
            description: row.description,
            start_time: row.start_time,
            end_time: row.end_time,
        })
    }
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// Row count and highest id of `roads`. Roads are never deleted, so any
/// insert changes one of the two.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RoadsVersion {
    count: i64,
    max_id: Option<i64>,
}

#[derive(Debug, Default)]
struct Adjacency {
    version: RoadsVersion,
    index: AdjacencyIndex,
}

#[derive(Debug)]
pub struct PgStore {
    pool: PgPool,
    adjacency: RwLock<Adjacency>,
}

impl PgStore {
    /// Build the store and load the adjacency index from the roads table.
    pub async fn connect(pool: PgPool) -> Result<Self> {
        let store = Self {
            pool,
            adjacency: RwLock::new(Adjacency::default()),
        };
        store.refresh_adjacency().await?;
        Ok(store)
    }

    /// Run the bundled schema migrations.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Rebuild the junction → road index from the roads table.
    pub async fn refresh_adjacency(&self) -> Result<()> {
        let version = self.roads_version().await?;
        let roads = self.list_roads().await?;
        let index = AdjacencyIndex::from_roads(&roads);
        *self
            .adjacency
            .write()
            .map_err(|_| anyhow!("adjacency index lock poisoned"))? = Adjacency { version, index };
        info!(roads = roads.len(), "Adjacency index loaded");
        Ok(())
    }

    async fn roads_version(&self) -> Result<RoadsVersion> {
        let (count, max_id) =
            sqlx::query_as::<_, (i64, Option<i64>)>("SELECT COUNT(*), MAX(id) FROM roads")
                .fetch_one(&self.pool)
                .await?;
        Ok(RoadsVersion { count, max_id })
    }

    /// Neighbour ids from the index, reloading it first if roads were added
    /// since it was built (seed scripts run after startup).
    async fn neighbour_ids(&self, id: RoadId) -> Result<Vec<RoadId>> {
        let current = self.roads_version().await?;
        let indexed = self
            .adjacency
            .read()
            .map_err(|_| anyhow!("adjacency index lock poisoned"))?
            .version;
        if indexed != current {
            debug!(?indexed, ?current, "Roads changed, reloading adjacency index");
            self.refresh_adjacency().await?;
        }

        let adjacency = self
            .adjacency
            .read()
            .map_err(|_| anyhow!("adjacency index lock poisoned"))?;
        Ok(adjacency.index.neighbours(id))
    }
}

/// Take row locks on `ids` in ascending id order. Every multi-row write locks
/// through here first, so two transactions over overlapping rows always
/// queue instead of deadlocking.
async fn lock_rows(
    conn: &mut sqlx::PgConnection,
    table: LockedTable,
    ids: &[i64],
) -> Result<Vec<i64>> {
    let sql = match table {
        LockedTable::Junctions => "SELECT id FROM junctions WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        LockedTable::Roads => "SELECT id FROM roads WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    };
    let rows = sqlx::query_as::<_, (i64,)>(sql)
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[derive(Clone, Copy)]
enum LockedTable {
    Junctions,
    Roads,
}

#[async_trait]
impl JunctionStore for PgStore {
    async fn list_junctions(&self) -> Result<Vec<Junction>> {
        let rows = sqlx::query_as::<_, JunctionRow>(
            r#"
            SELECT id, name, lat, lng, current_cars, signal, last_update
            FROM junctions
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        convert(rows)
    }

    async fn get_junction(&self, id: JunctionId) -> Result<Option<Junction>> {
        let row = sqlx::query_as::<_, JunctionRow>(
            r#"
            SELECT id, name, lat, lng, current_cars, signal, last_update
            FROM junctions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Junction::try_from).transpose()
    }

    async fn apply_signal_changes(&self, changes: &[SignalChange]) -> Result<Vec<JunctionId>> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<JunctionId> = changes.iter().map(|c| c.junction_id).collect();
        lock_rows(&mut *tx, LockedTable::Junctions, &ids).await?;

        let mut applied = Vec::with_capacity(changes.len());
        for change in changes {
            // GREATEST ignores NULL, so a never-updated junction takes `at`.
            let row = sqlx::query_as::<_, (i64,)>(
                r#"
                UPDATE junctions
                SET signal = $1, last_update = GREATEST(last_update, $2)
                WHERE id = $3
                RETURNING current_cars
                "#,
            )
            .bind(change.signal.as_str())
            .bind(change.at)
            .bind(change.junction_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((current_cars,)) = row else {
                debug!(junction_id = change.junction_id, "Skipping unknown junction");
                continue;
            };

            let cars = match change.logged_count {
                LoggedCount::Measured => current_cars,
                LoggedCount::Override => 0,
            };

            sqlx::query(
                r#"
                INSERT INTO traffic_log (junction_id, cars, signal, timestamp)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(change.junction_id)
            .bind(cars)
            .bind(change.logged_as.as_str())
            .bind(change.at)
            .execute(&mut *tx)
            .await?;

            applied.push(change.junction_id);
        }

        tx.commit().await?;
        Ok(applied)
    }
}

#[async_trait]
impl RoadStore for PgStore {
    async fn list_roads(&self) -> Result<Vec<Road>> {
        let rows = sqlx::query_as::<_, RoadRow>(
            r#"
            SELECT id, name, coords, status, congestion, from_junction, to_junction
            FROM roads
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        convert(rows)
    }

    async fn get_road(&self, id: RoadId) -> Result<Option<Road>> {
        let row = sqlx::query_as::<_, RoadRow>(
            r#"
            SELECT id, name, coords, status, congestion, from_junction, to_junction
            FROM roads
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Road::try_from).transpose()
    }

    async fn neighbours(&self, id: RoadId) -> Result<Vec<Road>> {
        let ids = self.neighbour_ids(id).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, RoadRow>(
            r#"
            SELECT id, name, coords, status, congestion, from_junction, to_junction
            FROM roads
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        convert(rows)
    }

    async fn apply_road_change(&self, change: &RoadChange) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let mut ids = vec![change.road_id];
        if let Some(spill) = &change.spill {
            ids.extend(&spill.roads);
        }
        let locked = lock_rows(&mut *tx, LockedTable::Roads, &ids).await?;
        if !locked.contains(&change.road_id) {
            tx.rollback().await?;
            return Ok(false);
        }

        let updated = sqlx::query("UPDATE roads SET status = $1 WHERE id = $2")
            .bind(change.status.as_str())
            .bind(change.road_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(spill) = change.spill.as_ref().filter(|s| !s.roads.is_empty()) {
            // Evaluated against the locked row value, so concurrent incidents
            // on adjacent roads both land.
            sqlx::query(
                r#"
                UPDATE roads
                SET congestion = LEAST(100, COALESCE(congestion, $1) + $2)
                WHERE id = ANY($3)
                "#,
            )
            .bind(i16::from(spill.baseline))
            .bind(i16::from(spill.bump))
            .bind(&spill.roads)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO events (road_id, kind, description, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(change.road_id)
        .bind(change.event.kind.as_str())
        .bind(&change.event.description)
        .bind(change.event.start_time)
        .bind(change.event.end_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl EventLog for PgStore {
    async fn traffic_log(
        &self,
        junction_id: Option<JunctionId>,
        limit: i64,
    ) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, junction_id, cars, signal, timestamp
            FROM traffic_log
            WHERE $1::BIGINT IS NULL OR junction_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(junction_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        convert(rows)
    }

    async fn road_events(&self, road_id: Option<RoadId>, limit: i64) -> Result<Vec<RoadEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, road_id, kind, description, start_time, end_time
            FROM events
            WHERE $1::BIGINT IS NULL OR road_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(road_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        convert(rows)
    }
}
