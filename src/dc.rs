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

//! Datacenter sets and ordered datacenter lists.
//!
//! Each map declares an ordered set of datacenter names (a
//! [`Datacenters`]). Within lookup structures, datacenters are referred
//! to by their compact one-based [`DcId`], and resolution results are
//! ordered, duplicate-free [`DcList`]s of those IDs. A geographic map
//! node may carry either a concrete list or the automatic
//! distance-ranking marker; [`MapValue`] covers both.

use std::fmt;

use arrayvec::ArrayVec;

/// The maximum number of datacenters a map may declare.
pub const MAX_DATACENTERS: usize = 254;

////////////////////////////////////////////////////////////////////////
// DATACENTER IDS AND DECLARED SETS                                   //
////////////////////////////////////////////////////////////////////////

/// A compact identifier for a datacenter within one map's declared set.
///
/// IDs are one-based and assigned in declaration order, so comparing
/// IDs also compares declaration positions.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DcId(u8);

impl DcId {
    /// Returns the zero-based index of this ID, for indexing per-map
    /// vectors.
    pub fn index(self) -> usize {
        usize::from(self.0) - 1
    }

    /// Reconstructs an ID from a zero-based index. The index must be
    /// less than [`MAX_DATACENTERS`].
    pub(crate) fn from_index(index: usize) -> Self {
        assert!(index < MAX_DATACENTERS);
        Self(index as u8 + 1)
    }
}

impl fmt::Debug for DcId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The ordered set of datacenter names declared by a map.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Datacenters {
    names: Vec<Box<str>>,
}

impl Datacenters {
    /// Creates a `Datacenters` set from names in declaration order.
    /// There must be at least one name, at most [`MAX_DATACENTERS`],
    /// and no duplicates.
    pub fn new<I, S>(names: I) -> Result<Self, DatacentersError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Box<str>>,
    {
        let names: Vec<Box<str>> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(DatacentersError::Empty);
        } else if names.len() > MAX_DATACENTERS {
            return Err(DatacentersError::TooMany);
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(DatacentersError::Duplicate(name.clone()));
            }
        }
        Ok(Self { names })
    }

    /// Returns the number of declared datacenters.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns whether the set is empty. (It never is; this exists for
    /// API completeness.)
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the name of the datacenter with the given ID.
    pub fn name(&self, id: DcId) -> &str {
        &self.names[id.index()]
    }

    /// Looks up the ID of the datacenter with the given name.
    pub fn id_of(&self, name: &str) -> Option<DcId> {
        self.names
            .iter()
            .position(|n| &**n == name)
            .map(|i| DcId(i as u8 + 1))
    }

    /// Iterates over the declared IDs in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = DcId> + '_ {
        (1..=self.names.len() as u8).map(DcId)
    }

    /// Returns the full declared set as a [`DcList`] in declaration
    /// order. This is the ultimate fallback value of every map.
    pub fn full_list(&self) -> DcList {
        let mut list = DcList::new();
        for id in self.ids() {
            list.push(id);
        }
        list
    }
}

/// Errors constructing a [`Datacenters`] set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DatacentersError {
    Empty,
    TooMany,
    Duplicate(Box<str>),
}

impl fmt::Display for DatacentersError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("no datacenters were declared"),
            Self::TooMany => write!(f, "more than {MAX_DATACENTERS} datacenters were declared"),
            Self::Duplicate(name) => write!(f, "datacenter {name} was declared more than once"),
        }
    }
}

impl std::error::Error for DatacentersError {}

////////////////////////////////////////////////////////////////////////
// DATACENTER LISTS                                                   //
////////////////////////////////////////////////////////////////////////

/// An ordered, duplicate-free list of datacenter IDs.
///
/// An empty list is a legal terminal value meaning "no answer data for
/// this location." Storage is inline, since a list can never exceed
/// [`MAX_DATACENTERS`] entries.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DcList(ArrayVec<DcId, MAX_DATACENTERS>);

impl DcList {
    /// Creates a new, empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an ID to the list. The caller is responsible for not
    /// introducing duplicates; see [`DcList::contains`].
    pub fn push(&mut self, id: DcId) {
        debug_assert!(!self.contains(id));
        self.0.push(id);
    }

    /// Returns whether `id` is already in the list.
    pub fn contains(&self, id: DcId) -> bool {
        self.0.contains(&id)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the entries as a slice, in order.
    pub fn as_slice(&self) -> &[DcId] {
        &self.0
    }

    /// Iterates over the entries in order.
    pub fn iter(&self) -> impl Iterator<Item = DcId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<DcId> for DcList {
    fn from_iter<I: IntoIterator<Item = DcId>>(iter: I) -> Self {
        let mut list = Self::new();
        for id in iter {
            list.push(id);
        }
        list
    }
}

/// The value carried by a geographic map node: either a concrete
/// ordered datacenter list, or the marker requesting automatic
/// coordinate-distance ranking.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MapValue {
    List(DcList),
    Auto,
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
