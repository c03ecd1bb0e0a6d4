use crate::types::{GeoPoint, Junction, JunctionId, Signal};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two lat/lng points in kilometers.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // Float noise can push h a hair above 1 for antipodal points.
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// A junction picked for preemption, with the signal it had when picked.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestJunction {
    pub id: JunctionId,
    pub distance_km: f64,
    pub signal: Signal,
}

/// Nearest-candidate selection over junctions.
pub struct GeoLocator;

impl GeoLocator {
    /// Junctions within `radius_km` of `origin`, nearest first, at most
    /// `max_count` of them. When nothing lies within the radius the
    /// `max_count` globally nearest are returned instead, so a small radius
    /// never turns a preemption into a no-op.
    ///
    /// Junctions without a position cannot be ranked and are skipped.
    /// Ties keep the order of `candidates`.
    pub fn select_nearest(
        origin: GeoPoint,
        candidates: &[Junction],
        radius_km: f64,
        max_count: usize,
    ) -> Vec<NearestJunction> {
        let radius_km = if radius_km.is_finite() { radius_km.max(0.0) } else { 0.0 };

        let mut ranked: Vec<NearestJunction> = candidates
            .iter()
            .filter_map(|j| {
                let position = j.position?;
                Some(NearestJunction {
                    id: j.id,
                    distance_km: haversine_km(origin, position),
                    signal: j.signal,
                })
            })
            .collect();

        // sort_by is stable
        ranked.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

        let within = ranked
            .iter()
            .take_while(|c| c.distance_km <= radius_km)
            .count();

        if within > 0 {
            ranked.truncate(within.min(max_count));
        } else {
            ranked.truncate(max_count);
        }
        ranked
    }
}
