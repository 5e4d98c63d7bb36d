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

//! The consumed geographic-database capability.
//!
//! The on-disk GeoIP database reader is an external collaborator. This
//! crate only needs one operation from it: given a canonical client
//! address, report the client's location path (and, when known, its
//! coordinates) along with the prefix length of the database block that
//! produced the answer. Lookups are assumed to be synchronous and
//! in-memory from this crate's perspective.

use arrayvec::ArrayVec;

use super::auto::Coord;
use crate::addr::CanonicalAddr;

/// The maximum number of location-path segments a database answer may
/// carry: continent, country, up to five subdivision levels, and city.
pub const MAX_LOCATION_DEPTH: usize = 8;

/// A location path: ordered location codes from broadest (continent) to
/// narrowest (city). Produced per query; never stored. The segments
/// borrow from the database that produced them.
pub type LocationPath<'a> = ArrayVec<&'a str, MAX_LOCATION_DEPTH>;

/// One answer from a [`GeoDatabase`].
#[derive(Clone, Debug)]
pub struct GeoAnswer<'a> {
    /// The client's location path.
    pub path: LocationPath<'a>,

    /// The client's coordinates, when the database knows them with
    /// city-level precision.
    pub coords: Option<Coord>,

    /// The prefix length of the database block covering the queried
    /// address, in canonical 128-bit terms (an IPv4 block's length has
    /// 96 added).
    pub prefix_len: u8,
}

/// The geographic-database capability consumed by map resolution.
pub trait GeoDatabase: Send + Sync {
    /// Looks up the location of `addr`. [`None`] means the database has
    /// no information about the address; resolution then proceeds with
    /// the map's defaults.
    fn lookup(&self, addr: CanonicalAddr) -> Option<GeoAnswer<'_>>;
}

/// A null [`GeoDatabase`] for maps configured without one. Every lookup
/// misses.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unavailable;

impl GeoDatabase for Unavailable {
    fn lookup(&self, _addr: CanonicalAddr) -> Option<GeoAnswer<'_>> {
        None
    }
}
