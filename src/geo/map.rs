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

//! The hierarchical geographic map.
//!
//! A [`GeoMap`] is a tree keyed by location-code segments (continent,
//! country, zero or more subdivision levels, city). Each node may carry
//! a value—a datacenter list or the auto-ranking marker—that acts as
//! the default for everything beneath it. [`GeoMap::resolve`] walks a
//! client's location path through the tree with deepest-match-wins
//! semantics: the value of the deepest matched node that has one
//! decides the answer, and levels of specificity absent from the tree
//! are transparently skipped rather than ending the search.

use std::collections::HashMap;

use crate::dc::MapValue;

/// A hierarchical location-to-datacenter map. Built once from
/// configuration; immutable thereafter.
#[derive(Debug)]
pub struct GeoMap {
    root: MapNode,
}

#[derive(Debug)]
struct MapNode {
    value: Option<MapValue>,
    children: HashMap<Box<str>, MapNode>,
}

impl MapNode {
    fn empty() -> Self {
        Self {
            value: None,
            children: HashMap::new(),
        }
    }
}

impl GeoMap {
    /// Creates a map whose root carries `default`. The root value is
    /// the answer of last resort, so it is mandatory; configuration
    /// supplies the map's full declared datacenter list when nothing
    /// more specific is given.
    pub fn new(default: MapValue) -> Self {
        Self {
            root: MapNode {
                value: Some(default),
                children: HashMap::new(),
            },
        }
    }

    /// Sets the value at the node addressed by `path`, creating
    /// intermediate nodes as needed. Intermediate nodes carry no value
    /// of their own unless one is set for them explicitly.
    pub fn insert(&mut self, path: &[&str], value: MapValue) {
        let mut node = &mut self.root;
        for segment in path {
            node = node
                .children
                .entry(Box::from(*segment))
                .or_insert_with(MapNode::empty);
        }
        node.value = Some(value);
    }

    /// Resolves a location path to a value and the number of path
    /// segments that contributed to the decision.
    ///
    /// At each step, if the current node has a child keyed by the next
    /// path segment, the walk descends and remembers that node's value
    /// (if any) as the decision so far. If there is no such child, the
    /// segment is skipped and the *next* segment is tried against the
    /// same node's children, so that specificity levels missing from
    /// the configured tree do not end the search. When the path is
    /// exhausted, the most recently remembered value wins; if no node
    /// matched anything, that is the root's value at depth 0.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> (&MapValue, usize) {
        let mut node = &self.root;
        let mut decided = self.root.value.as_ref().unwrap_or(&MapValue::Auto);
        let mut decided_depth = 0;
        let mut matched = 0;
        for segment in path {
            if let Some(child) = node.children.get(segment.as_ref()) {
                node = child;
                matched += 1;
                if let Some(value) = &child.value {
                    decided = value;
                    decided_depth = matched;
                }
            }
        }
        (decided, decided_depth)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dc::{DcList, Datacenters};

    fn list(dcs: &Datacenters, names: &[&str]) -> MapValue {
        MapValue::List(names.iter().map(|n| dcs.id_of(n).unwrap()).collect())
    }

    /// The map used throughout:
    /// `{EU: {default: [dc-a], CH: {Geneve: {Geneva: [dc-b]}}}}`.
    fn sample() -> (Datacenters, GeoMap) {
        let dcs = Datacenters::new(["dc-a", "dc-b"]).unwrap();
        let mut map = GeoMap::new(MapValue::List(dcs.full_list()));
        map.insert(&["EU"], list(&dcs, &["dc-a"]));
        map.insert(&["EU", "CH", "Geneve", "Geneva"], list(&dcs, &["dc-b"]));
        (dcs, map)
    }

    #[test]
    fn exact_match_wins() {
        let (dcs, map) = sample();
        let (value, depth) = map.resolve(&["EU", "CH", "Geneve", "Geneva"]);
        assert_eq!(value, &list(&dcs, &["dc-b"]));
        assert_eq!(depth, 4);
    }

    #[test]
    fn shorter_path_falls_back_to_ancestor_default() {
        let (dcs, map) = sample();
        let (value, depth) = map.resolve(&["EU", "CH"]);
        assert_eq!(value, &list(&dcs, &["dc-a"]));
        assert_eq!(depth, 1);
    }

    #[test]
    fn unmatched_sibling_falls_back_to_ancestor_default() {
        let (dcs, map) = sample();
        let (value, _) = map.resolve(&["EU", "FR"]);
        assert_eq!(value, &list(&dcs, &["dc-a"]));
    }

    #[test]
    fn deeper_miss_falls_back_to_ancestor_default() {
        let (dcs, map) = sample();
        let (value, depth) = map.resolve(&["EU", "CH", "SomeOtherRegion", "SomeCity"]);
        assert_eq!(value, &list(&dcs, &["dc-a"]));
        assert_eq!(depth, 1);
    }

    #[test]
    fn wholly_unmatched_path_returns_root_default_at_depth_zero() {
        let (dcs, map) = sample();
        let (value, depth) = map.resolve(&["NA", "US"]);
        assert_eq!(value, &MapValue::List(dcs.full_list()));
        assert_eq!(depth, 0);
    }

    #[test]
    fn missing_intermediate_levels_are_skipped() {
        let dcs = Datacenters::new(["dc-a", "dc-b"]).unwrap();
        let mut map = GeoMap::new(MapValue::List(dcs.full_list()));
        // No country or subdivision level under EU: cities hang
        // directly off the continent.
        map.insert(&["EU", "Geneva"], list(&dcs, &["dc-b"]));
        let (value, depth) = map.resolve(&["EU", "CH", "Geneve", "Geneva"]);
        assert_eq!(value, &list(&dcs, &["dc-b"]));
        assert_eq!(depth, 2);
    }

    #[test]
    fn empty_path_returns_root_default() {
        let (dcs, map) = sample();
        let path: [&str; 0] = [];
        let (value, depth) = map.resolve(&path);
        assert_eq!(value, &MapValue::List(dcs.full_list()));
        assert_eq!(depth, 0);
    }
}
