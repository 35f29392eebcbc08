//! Geospatial index over place coordinates.
//!
//! A fixed-resolution lat/lon grid: each place with a known location lands
//! in one cell, and a radius query scans only the cells its bounding box
//! covers before confirming candidates with the haversine distance. The
//! boundary is inclusive: a place at exactly `meters` distance matches.
//! Places with unknown location are never indexed and never match.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::{Location, PlaceId};

/// Mean Earth radius in meters, as used by the haversine formula.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Great-circle distance between two coordinates, in meters.
pub fn haversine_m(a: Location, b: Location) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[derive(Debug, Default)]
struct GeoCells {
    cells: HashMap<(i32, i32), Vec<PlaceId>>,
    locations: HashMap<PlaceId, Location>,
}

/// Spatial index supporting inclusive radius queries.
#[derive(Debug)]
pub struct GeoIndex {
    cell_degrees: f64,
    inner: RwLock<GeoCells>,
}

impl GeoIndex {
    pub fn new(cell_degrees: f64) -> Self {
        Self {
            cell_degrees,
            inner: RwLock::new(GeoCells::default()),
        }
    }

    fn cell_of(&self, location: Location) -> (i32, i32) {
        (
            (location.latitude / self.cell_degrees).floor() as i32,
            (location.longitude / self.cell_degrees).floor() as i32,
        )
    }

    /// Insert or move a place. A prior location for the same id is replaced.
    pub fn upsert(&self, id: PlaceId, location: Location) {
        let mut inner = self.inner.write();
        if let Some(previous) = inner.locations.insert(id.clone(), location) {
            let old_cell = self.cell_of(previous);
            if let Some(members) = inner.cells.get_mut(&old_cell) {
                members.retain(|member| member != &id);
            }
        }
        let cell = self.cell_of(location);
        inner.cells.entry(cell).or_default().push(id);
    }

    /// Remove a place. Returns `false` if the id had no known location.
    pub fn remove(&self, id: &PlaceId) -> bool {
        let mut inner = self.inner.write();
        match inner.locations.remove(id) {
            Some(location) => {
                let cell = self.cell_of(location);
                if let Some(members) = inner.cells.get_mut(&cell) {
                    members.retain(|member| member != id);
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All places within `meters` of `center`, boundary inclusive, sorted by
    /// ascending id for determinism.
    pub fn within_radius(&self, center: Location, meters: f64) -> Vec<PlaceId> {
        if meters < 0.0 || !meters.is_finite() {
            return Vec::new();
        }
        let inner = self.inner.read();

        let lat_delta = meters / METERS_PER_DEGREE;
        // Longitude degrees shrink with latitude; clamp the cosine so polar
        // centers still get a finite (if generous) scan window.
        let lon_scale = center.latitude.to_radians().cos().abs().max(0.01);
        let lon_delta = meters / (METERS_PER_DEGREE * lon_scale);

        let min_cell = self.cell_of(Location::new(
            (center.latitude - lat_delta).max(-90.0),
            (center.longitude - lon_delta).max(-180.0),
        ));
        let max_cell = self.cell_of(Location::new(
            (center.latitude + lat_delta).min(90.0),
            (center.longitude + lon_delta).min(180.0),
        ));

        let mut matches = Vec::new();
        for lat_cell in min_cell.0..=max_cell.0 {
            for lon_cell in min_cell.1..=max_cell.1 {
                let Some(members) = inner.cells.get(&(lat_cell, lon_cell)) else {
                    continue;
                };
                for id in members {
                    let location = inner.locations[id];
                    if haversine_m(center, location) <= meters {
                        matches.push(id.clone());
                    }
                }
            }
        }
        matches.sort();
        matches
    }
}
