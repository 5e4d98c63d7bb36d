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

//! Geographic resolution: hierarchical maps, automatic distance
//! ranking, and the per-map lookup pipeline.
//!
//! The central structure is [`MapRuntime`], one fully built map from a
//! configuration generation. Resolving a client address against a map
//! consults, in order: the explicit network-prefix overrides (see
//! [`crate::nets`]); the external [`GeoDatabase`] and the hierarchical
//! [`GeoMap`]; and, when a node selects automatic mode, coordinate
//! ranking (see [`auto`]). The result is an ordered datacenter list
//! plus the prefix length over which that list is valid, which feeds
//! EDNS Client Subnet scope reporting.

use std::sync::Arc;

pub mod auto;
pub mod db;
pub mod map;

pub use auto::{Coord, DcCoords};
pub use db::{GeoAnswer, GeoDatabase, LocationPath, Unavailable, MAX_LOCATION_DEPTH};
pub use map::GeoMap;

use crate::addr::CanonicalAddr;
use crate::dc::{Datacenters, DcList, MapValue};
use crate::nets::{Lookup, PrefixTable};

////////////////////////////////////////////////////////////////////////
// PER-MAP RUNTIME STATE                                              //
////////////////////////////////////////////////////////////////////////

/// One fully built map: the declared datacenter set, the hierarchical
/// geographic map, the network-override table, automatic-mode
/// coordinates, and a handle to the map's geographic database.
/// Immutable once built; shared by reference across queries.
pub struct MapRuntime {
    pub(crate) name: Box<str>,
    pub(crate) datacenters: Datacenters,
    pub(crate) map: GeoMap,
    pub(crate) nets: PrefixTable,
    pub(crate) coords: DcCoords,
    pub(crate) auto_limit: usize,
    pub(crate) ignore_ecs: bool,
    pub(crate) db: Arc<dyn GeoDatabase>,
}

/// The outcome of resolving an address against one map.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MapResolution {
    /// The ordered datacenter list for the client.
    pub dclist: DcList,

    /// The prefix length (canonical 128-bit terms) bounding the network
    /// over which `dclist` is valid. Zero when the map ignores EDNS
    /// Client Subnet or when the answer did not depend on the client's
    /// location at all.
    pub scope: u8,
}

impl MapRuntime {
    /// Returns the map's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the map's declared datacenter set.
    pub fn datacenters(&self) -> &Datacenters {
        &self.datacenters
    }

    /// Resolves a canonical client address to an ordered datacenter
    /// list.
    ///
    /// The explicit network table is consulted first. On a miss, the
    /// geographic database supplies the client's location path, which
    /// the hierarchical map turns into a list; a node in automatic mode
    /// ranks datacenters by distance when the database supplied usable
    /// coordinates and otherwise falls back to the full declared order
    /// (a normal, non-error path). A client unknown to the database
    /// gets the map's root default.
    pub fn resolve(&self, addr: CanonicalAddr) -> MapResolution {
        match self.nets.lookup(addr) {
            Lookup::Hit(dclist, prefix_len) => MapResolution {
                dclist: (**dclist).clone(),
                scope: self.scope_of(prefix_len),
            },
            Lookup::Miss(miss_depth) => match self.db.lookup(addr) {
                Some(geo) => {
                    let (value, depth) = self.map.resolve(&geo.path);
                    let dclist = self.realize(value, geo.coords);
                    // A decision made at the map root did not depend on
                    // the location data, so only the nets miss bounds
                    // the answer's validity.
                    let geo_scope = if depth > 0 { geo.prefix_len } else { 0 };
                    MapResolution {
                        dclist,
                        scope: self.scope_of(miss_depth.max(geo_scope)),
                    }
                }
                None => {
                    let no_path: [&str; 0] = [];
                    let (value, _) = self.map.resolve(&no_path);
                    MapResolution {
                        dclist: self.realize(value, None),
                        scope: self.scope_of(miss_depth),
                    }
                }
            },
        }
    }

    /// Turns a map value into a concrete list, applying automatic
    /// ranking or its static-order fallback.
    fn realize(&self, value: &MapValue, coords: Option<Coord>) -> DcList {
        match value {
            MapValue::List(list) => list.clone(),
            MapValue::Auto => match coords {
                Some(client) if self.coords.any() => {
                    auto::rank(&self.coords, client, self.auto_limit)
                }
                _ => self.datacenters.full_list(),
            },
        }
    }

    fn scope_of(&self, prefix_len: u8) -> u8 {
        if self.ignore_ecs {
            0
        } else {
            prefix_len
        }
    }
}

impl std::fmt::Debug for MapRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MapRuntime")
            .field("name", &self.name)
            .field("datacenters", &self.datacenters)
            .field("auto_limit", &self.auto_limit)
            .field("ignore_ecs", &self.ignore_ecs)
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
