// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Automatic distance-based datacenter ranking ("city-auto-mode").
//!
//! When a map node resolves to [`MapValue::Auto`](crate::dc::MapValue)
//! and the client's location came with usable coordinates, datacenters
//! are ordered by great-circle distance from the client instead of by a
//! hand-written list. Datacenters without declared coordinates are
//! excluded from automatic answers.

use crate::dc::{DcId, DcList, Datacenters};

/// Mean Earth radius, in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A geographic coordinate, in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

/// Per-datacenter coordinates for a map. A subset of the map's declared
/// datacenters may have coordinates; the rest never appear in automatic
/// rankings.
#[derive(Clone, Debug)]
pub struct DcCoords {
    by_id: Vec<Option<Coord>>,
}

impl DcCoords {
    /// Creates an empty coordinate set for a map declaring the given
    /// datacenters.
    pub fn new(datacenters: &Datacenters) -> Self {
        Self {
            by_id: vec![None; datacenters.len()],
        }
    }

    /// Declares the coordinates of a datacenter.
    pub fn set(&mut self, id: DcId, coord: Coord) {
        self.by_id[id.index()] = Some(coord);
    }

    /// Returns the coordinates of a datacenter, if declared.
    pub fn get(&self, id: DcId) -> Option<Coord> {
        self.by_id[id.index()]
    }

    /// Returns whether any datacenter has declared coordinates.
    pub fn any(&self) -> bool {
        self.by_id.iter().any(Option::is_some)
    }
}

/// Ranks the datacenters with declared coordinates by ascending
/// great-circle distance from `client`, truncated to `limit` entries
/// (0 means unlimited). Equidistant datacenters keep their declaration
/// order.
pub fn rank(coords: &DcCoords, client: Coord, limit: usize) -> DcList {
    let mut ranked: Vec<(DcId, f64)> = coords
        .by_id
        .iter()
        .enumerate()
        .filter_map(|(index, coord)| {
            // Reconstruct the one-based ID from the index.
            let id = DcId::from_index(index);
            coord.map(|c| (id, great_circle_km(client, c)))
        })
        .collect();
    // The sort is stable, so ties keep declaration order.
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    if limit != 0 {
        ranked.truncate(limit);
    }
    ranked.into_iter().map(|(id, _)| id).collect()
}

/// Great-circle distance between two coordinates, by the haversine
/// formula.
fn great_circle_km(a: Coord, b: Coord) -> f64 {
    let (lat_a, lat_b) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat_b - lat_a;
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
