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

//! Per-query resolution: the recursive failover walk.
//!
//! A [`Resolution`] drives one query against one snapshot. The
//! resource's attachment produces an ordered datacenter list (a static
//! one, or a geographic one via [`MapRuntime`](crate::geo::MapRuntime)
//! resolution); the failover walk then visits the list in order and
//! returns the first datacenter slot that yields live data. A slot
//! holding a reference to another resource restarts the whole process
//! for that resource—with its own map and failover logic—against the
//! same client address, one level deeper.
//!
//! The reference graph may contain cycles; they are a configuration
//! defect that build-time validation deliberately does not chase. The
//! depth budget here turns a cycle into a failed query instead of a
//! crashed process.

use std::net::IpAddr;

use log::error;
use rand::Rng;

use super::{QueryError, ResolvedAnswer, Snapshot};
use crate::addr::CanonicalAddr;
use crate::dc::DcList;
use crate::health::HealthState;
use crate::resource::{Attachment, Endpoint, Resource, ResultSpec, WeightedMember};

/// The state of one query's resolution. Purely read-only against the
/// snapshot; the only mutation is bookkeeping of the answer's scope.
pub(super) struct Resolution<'a> {
    snapshot: &'a Snapshot,
    health: &'a dyn HealthState,
    addr: CanonicalAddr,
    max_depth: usize,

    /// The narrowest network bound established so far, in canonical
    /// 128-bit terms.
    scope: u8,
}

impl<'a> Resolution<'a> {
    pub(super) fn new(
        snapshot: &'a Snapshot,
        health: &'a dyn HealthState,
        addr: CanonicalAddr,
        max_depth: usize,
    ) -> Self {
        Self {
            snapshot,
            health,
            addr,
            max_depth,
            scope: 0,
        }
    }

    /// Returns the narrowest network bound established by the
    /// resolution, in canonical 128-bit terms.
    pub(super) fn scope(&self) -> u8 {
        self.scope
    }

    /// Resolves one resource at the given reference depth.
    pub(super) fn resolve(
        &mut self,
        resource: &Resource,
        depth: usize,
    ) -> Result<ResolvedAnswer, QueryError> {
        if depth >= self.max_depth {
            error!(
                "resolution of {resource} exceeded {} levels of resource \
                 references; the configuration likely contains a reference \
                 cycle; failing the query",
                self.max_depth,
            );
            return Err(QueryError::Exhausted);
        }

        let dclist = match resource.attachment() {
            Attachment::Static(list) => list.clone(),
            Attachment::Geo(map) => {
                let resolution = map.resolve(self.addr);
                self.scope = self.scope.max(resolution.scope);
                resolution.dclist
            }
        };
        self.failover(resource, &dclist, depth)
    }

    /// Walks the datacenter list in order and returns the first slot
    /// that yields data.
    fn failover(
        &mut self,
        resource: &Resource,
        dclist: &DcList,
        depth: usize,
    ) -> Result<ResolvedAnswer, QueryError> {
        let mut slots = dclist.as_slice();
        if resource.skip_first() && slots.len() > 1 {
            slots = &slots[1..];
        }

        for &id in slots {
            let spec = match resource.spec(id) {
                Some(spec) => spec,
                // Vacant slot (undefined datacenter allowed by the
                // configuration): nothing to yield here.
                None => continue,
            };
            match spec {
                ResultSpec::Addrs(endpoints) => {
                    if endpoints.is_empty() {
                        // A deliberately empty slot is a terminal "no
                        // data" answer, not a health failure.
                        return Ok(ResolvedAnswer::NoData);
                    }
                    let up: Vec<IpAddr> = endpoints
                        .iter()
                        .filter(|endpoint| self.health.is_up(endpoint.id))
                        .map(|endpoint| endpoint.addr)
                        .collect();
                    if !up.is_empty() {
                        return Ok(ResolvedAnswer::Addresses(up));
                    }
                }
                ResultSpec::Cname(target) => {
                    return Ok(ResolvedAnswer::Cname(target.clone()));
                }
                ResultSpec::Weighted(members) => {
                    if let Some(winner) = pick_weighted(members, self.health) {
                        return Ok(ResolvedAnswer::Addresses(vec![winner.addr]));
                    }
                }
                ResultSpec::Ref { family, name } => {
                    let target = match self.snapshot.registry().get(family, name) {
                        Some(target) => target.clone(),
                        // Build-time validation rejects dangling
                        // references, so this cannot occur for a
                        // snapshot built through the configuration
                        // layer.
                        None => continue,
                    };
                    match self.resolve(&target, depth + 1)? {
                        ResolvedAnswer::NoData => {}
                        answer => return Ok(answer),
                    }
                }
            }
        }

        match resource.fallback_cname() {
            Some(target) => Ok(ResolvedAnswer::Cname(target.into())),
            None => Ok(ResolvedAnswer::NoData),
        }
    }
}

/// Selects one currently healthy member of a weighted group, with
/// probability proportional to its weight. Returns [`None`] when no
/// member is healthy.
fn pick_weighted(members: &[WeightedMember], health: &dyn HealthState) -> Option<Endpoint> {
    let healthy: Vec<&WeightedMember> = members
        .iter()
        .filter(|member| health.is_up(member.endpoint.id))
        .collect();
    let total: u32 = healthy.iter().map(|member| u32::from(member.weight)).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rand::thread_rng().gen_range(0..total);
    for member in healthy {
        let weight = u32::from(member.weight);
        if roll < weight {
            return Some(member.endpoint);
        }
        roll -= weight;
    }
    // Weights are at least 1, so the roll always lands on a member.
    None
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
