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

//! The resolution engine: immutable snapshots and per-query
//! resolution.
//!
//! The [`Engine`] structure is the heart of this module. It holds the
//! current configuration generation—an immutable [`Snapshot`] of maps,
//! resources, and endpoint data—and answers
//! [`Engine::resolve_resource`] calls from the DNS-answering layer.
//!
//! Queries are read-only and lock-free: each query clones the
//! [`Arc<Snapshot>`] out of the engine at its start and uses that
//! generation for its whole lifetime. Reloads build a new `Snapshot`
//! off the query path and install it with [`Engine::set_snapshot`];
//! in-flight queries keep the generation they started with, and the
//! old generation is freed when its last reference drops.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use crate::addr::CanonicalAddr;
use crate::geo::MapRuntime;
use crate::health::{EndpointId, HealthState};
use crate::resource::ResourceRegistry;

mod query;

use query::Resolution;

/// The default limit on the depth of recursive resource references.
/// Reference cycles are a configuration defect that is not detected at
/// build time; the limit converts them into a per-query failure instead
/// of stack exhaustion.
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 64;

////////////////////////////////////////////////////////////////////////
// SNAPSHOTS                                                          //
////////////////////////////////////////////////////////////////////////

/// One immutable configuration generation: every map and resource,
/// fully built and cross-checked, plus the roster of endpoints the
/// external monitor should watch. Never mutated in place; replaced
/// wholesale on reload.
#[derive(Debug)]
pub struct Snapshot {
    maps: HashMap<Box<str>, Arc<MapRuntime>>,
    registry: ResourceRegistry,
    endpoints: Vec<EndpointRecord>,
}

/// One entry in a snapshot's endpoint roster.
#[derive(Clone, Debug)]
pub struct EndpointRecord {
    pub id: EndpointId,
    pub addr: IpAddr,
    /// The resource that declared the endpoint.
    pub resource: Box<str>,
    pub service_types: Vec<Box<str>>,
}

impl Snapshot {
    pub(crate) fn new(
        maps: HashMap<Box<str>, Arc<MapRuntime>>,
        registry: ResourceRegistry,
        endpoints: Vec<EndpointRecord>,
    ) -> Self {
        Self {
            maps,
            registry,
            endpoints,
        }
    }

    /// Returns the snapshot's resource registry.
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Looks up a map by name.
    pub fn map(&self, name: &str) -> Option<&Arc<MapRuntime>> {
        self.maps.get(name)
    }

    /// Returns the roster of endpoints the external monitor should
    /// watch for this generation.
    pub fn endpoints(&self) -> &[EndpointRecord] {
        &self.endpoints
    }
}

////////////////////////////////////////////////////////////////////////
// QUERY INPUTS AND OUTPUTS                                           //
////////////////////////////////////////////////////////////////////////

/// The EDNS Client Subnet information accompanying a query, when the
/// client supplied it. The source prefix length is in the terms of the
/// address family of the address passed to
/// [`Engine::resolve_resource`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientSubnet {
    pub source_prefix_len: u8,
}

/// The resolved endpoint data for one query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResolvedAnswer {
    /// Ordered endpoint addresses from the winning datacenter.
    Addresses(Vec<IpAddr>),

    /// A CNAME target (literal slot value or last-resort fallback).
    Cname(Box<str>),

    /// An explicitly empty answer: valid, cacheable "no data". This is
    /// produced both by an empty configured address list and by a
    /// datacenter list that yielded nothing anywhere.
    NoData,
}

/// A complete answer: the resolved data plus the EDNS Client Subnet
/// scope prefix length (in the client's address-family terms) over
/// which it may be reused.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resolved {
    pub answer: ResolvedAnswer,
    pub scope_prefix_len: u8,
}

/// Errors from [`Engine::resolve_resource`].
///
/// Degraded outcomes (empty lists, all datacenters down, missing
/// coordinates, missing ECS) are *not* errors; they produce valid
/// [`Resolved`] values. The only failure paths are a resource name the
/// snapshot does not know and exhaustion of the reference-recursion
/// budget.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QueryError {
    UnknownResource { family: Box<str>, name: Box<str> },
    Exhausted,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownResource { family, name } => {
                write!(f, "no resource {family}/{name} in the current snapshot")
            }
            Self::Exhausted => {
                f.write_str("the resource reference chain exceeded the recursion budget")
            }
        }
    }
}

impl std::error::Error for QueryError {}

////////////////////////////////////////////////////////////////////////
// THE ENGINE                                                         //
////////////////////////////////////////////////////////////////////////

/// The geography- and health-aware resolution engine, abstracted from
/// the DNS wire layer, the GeoIP database reader, and the health
/// monitor.
///
/// The `Engine` answers "give me the ordered endpoint data for resource
/// *X* as seen by client *Y*" through [`Engine::resolve_resource`].
/// Resolution is a pure function of the current [`Snapshot`], the
/// client address, and the (externally updated) health state, so it is
/// safe to call concurrently from any number of threads.
pub struct Engine {
    snapshot: RwLock<Arc<Snapshot>>,
    health: Arc<dyn HealthState>,
    max_reference_depth: usize,
}

impl Engine {
    /// Creates a new `Engine` serving the provided snapshot and
    /// consulting the provided health state.
    pub fn new(snapshot: Arc<Snapshot>, health: Arc<dyn HealthState>) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            health,
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
        }
    }

    /// Returns the current snapshot of the engine.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Sets the snapshot of the `Engine`. Some in-flight queries may
    /// continue to use the old snapshot (depending on how far they have
    /// gotten), but queries started after this call completes will see
    /// the new one.
    pub fn set_snapshot(&self, snapshot: Arc<Snapshot>) {
        *self.snapshot.write().unwrap() = snapshot;
    }

    /// Returns the limit on recursive resource-reference depth.
    pub fn max_reference_depth(&self) -> usize {
        self.max_reference_depth
    }

    /// Sets the limit on recursive resource-reference depth.
    pub fn set_max_reference_depth(&mut self, depth: usize) {
        self.max_reference_depth = depth;
    }

    /// Resolves the named resource for a client.
    ///
    /// `client` is the address resolution should be based on: the EDNS
    /// Client Subnet address when the query carried one, and the
    /// querying resolver's address otherwise. `ecs` carries the
    /// client's source prefix length when ECS was present; without it,
    /// the reported scope is 0.
    ///
    /// The returned scope prefix length is the narrowest network bound
    /// established by any network-table or database consultation the
    /// resolution performed (including those of recursively referenced
    /// resources), capped at the client's source prefix length, and
    /// expressed in the client's address-family terms.
    pub fn resolve_resource(
        &self,
        family: &str,
        name: &str,
        client: IpAddr,
        ecs: Option<ClientSubnet>,
    ) -> Result<Resolved, QueryError> {
        let snapshot = self.snapshot();
        let resource = match snapshot.registry().get(family, name) {
            Some(resource) => resource.clone(),
            None => {
                return Err(QueryError::UnknownResource {
                    family: family.into(),
                    name: name.into(),
                })
            }
        };

        let addr = CanonicalAddr::from(client);
        let mut resolution =
            Resolution::new(&snapshot, &*self.health, addr, self.max_reference_depth);
        let answer = resolution.resolve(&resource, 0)?;

        let scope_prefix_len = match ecs {
            None => 0,
            Some(subnet) => {
                let source = if addr.is_v4() {
                    subnet.source_prefix_len.min(32) + 96
                } else {
                    subnet.source_prefix_len.min(128)
                };
                let scope = resolution.scope().min(source);
                if addr.is_v4() {
                    scope.saturating_sub(96)
                } else {
                    scope
                }
            }
        };

        Ok(Resolved {
            answer,
            scope_prefix_len,
        })
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    use super::*;
    use crate::dc::{Datacenters, DcList, MapValue};
    use crate::geo::{Coord, DcCoords, GeoAnswer, GeoDatabase, GeoMap, LocationPath};
    use crate::nets::PrefixTable;
    use crate::resource::{Attachment, Endpoint, Resource, ResultSpec, WeightedMember};

    /// A scripted database: every lookup yields the same path and
    /// block length.
    struct FakeDb {
        path: Vec<Box<str>>,
        prefix_len: u8,
    }

    impl GeoDatabase for FakeDb {
        fn lookup(&self, _addr: CanonicalAddr) -> Option<GeoAnswer<'_>> {
            let mut path = LocationPath::new();
            for segment in &self.path {
                path.push(segment.as_ref());
            }
            Some(GeoAnswer {
                path,
                coords: None,
                prefix_len: self.prefix_len,
            })
        }
    }

    /// A health state driven by a set of down endpoint IDs.
    struct DownSet(HashSet<u32>);

    impl HealthState for DownSet {
        fn is_up(&self, endpoint: EndpointId) -> bool {
            !self.0.contains(&endpoint.get())
        }
    }

    fn endpoint(id: u32, addr: &str) -> Endpoint {
        Endpoint {
            id: EndpointId::new(id),
            addr: addr.parse().unwrap(),
        }
    }

    fn addrs_of(answer: &ResolvedAnswer) -> Vec<IpAddr> {
        match answer {
            ResolvedAnswer::Addresses(addrs) => addrs.clone(),
            other => panic!("expected addresses, got {other:?}"),
        }
    }

    /// Builds the scenario used by most tests: map datacenters
    /// `[na, eu, ap, sa]`, every location under EU resolving to
    /// `[eu, na]` via a /24 database block, with two endpoints in eu
    /// and one in na.
    fn scenario(down: &[u32]) -> Engine {
        let dcs = Datacenters::new(["na", "eu", "ap", "sa"]).unwrap();
        let eu = dcs.id_of("eu").unwrap();
        let na = dcs.id_of("na").unwrap();

        let mut map = GeoMap::new(MapValue::List(dcs.full_list()));
        let eu_first: DcList = [eu, na].into_iter().collect();
        map.insert(&["EU"], MapValue::List(eu_first));

        let (nets, _) = PrefixTable::build(Vec::new());
        let runtime = Arc::new(MapRuntime {
            name: "world".into(),
            datacenters: dcs.clone(),
            map,
            nets,
            coords: DcCoords::new(&dcs),
            auto_limit: 0,
            ignore_ecs: false,
            db: Arc::new(FakeDb {
                path: vec!["EU".into(), "CH".into()],
                prefix_len: 96 + 24,
            }),
        });

        let mut dcmap = vec![None, None, None, None];
        dcmap[na.index()] = Some(ResultSpec::Addrs(vec![endpoint(1, "198.51.100.1")]));
        dcmap[eu.index()] = Some(ResultSpec::Addrs(vec![
            endpoint(2, "203.0.113.1"),
            endpoint(3, "203.0.113.2"),
        ]));
        let resource = Arc::new(Resource {
            name: "www".into(),
            attachment: Attachment::Geo(runtime.clone()),
            dcmap,
            skip_first: false,
            fallback_cname: None,
            service_types: Vec::new(),
        });

        let mut registry = ResourceRegistry::new();
        registry.insert(resource);
        let mut maps = HashMap::new();
        maps.insert(Box::from("world"), runtime);
        let snapshot = Arc::new(Snapshot::new(maps, registry, Vec::new()));
        Engine::new(
            snapshot,
            Arc::new(DownSet(down.iter().copied().collect())),
        )
    }

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 77));

    #[test]
    fn winning_datacenter_supplies_all_its_endpoints() {
        let engine = scenario(&[]);
        let resolved = engine
            .resolve_resource("geoip", "www", CLIENT, Some(ClientSubnet { source_prefix_len: 24 }))
            .unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["203.0.113.1".parse::<IpAddr>().unwrap(), "203.0.113.2".parse().unwrap()],
        );
        // The scope is the database block length, unaffected by the
        // losing datacenter.
        assert_eq!(resolved.scope_prefix_len, 24);
    }

    #[test]
    fn failover_moves_to_the_next_datacenter_when_all_endpoints_are_down() {
        let engine = scenario(&[2, 3]);
        let resolved = engine.resolve_resource("geoip", "www", CLIENT, None).unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["198.51.100.1".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn partial_health_filters_within_the_winning_datacenter() {
        let engine = scenario(&[2]);
        let resolved = engine.resolve_resource("geoip", "www", CLIENT, None).unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["203.0.113.2".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn everything_down_is_an_empty_answer_not_an_error() {
        let engine = scenario(&[1, 2, 3]);
        let resolved = engine.resolve_resource("geoip", "www", CLIENT, None).unwrap();
        assert_eq!(resolved.answer, ResolvedAnswer::NoData);
    }

    #[test]
    fn missing_ecs_reports_scope_zero() {
        let engine = scenario(&[]);
        let resolved = engine.resolve_resource("geoip", "www", CLIENT, None).unwrap();
        assert_eq!(resolved.scope_prefix_len, 0);
    }

    #[test]
    fn scope_is_capped_at_the_source_prefix_length() {
        let engine = scenario(&[]);
        let resolved = engine
            .resolve_resource("geoip", "www", CLIENT, Some(ClientSubnet { source_prefix_len: 16 }))
            .unwrap();
        assert_eq!(resolved.scope_prefix_len, 16);
    }

    #[test]
    fn unknown_resources_are_reported() {
        let engine = scenario(&[]);
        let err = engine
            .resolve_resource("geoip", "nonexistent", CLIENT, None)
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownResource { .. }));
    }

    #[test]
    fn snapshot_swap_changes_subsequent_answers() {
        let engine = scenario(&[]);
        let empty = Arc::new(Snapshot::new(
            HashMap::new(),
            ResourceRegistry::new(),
            Vec::new(),
        ));
        engine.set_snapshot(empty);
        let err = engine.resolve_resource("geoip", "www", CLIENT, None).unwrap_err();
        assert!(matches!(err, QueryError::UnknownResource { .. }));
    }

    /// Builds a static (metafo-family) resource whose slots are
    /// supplied by the caller.
    fn static_engine(
        dcs: &Datacenters,
        dcmap: Vec<Option<ResultSpec>>,
        skip_first: bool,
        fallback_cname: Option<&str>,
        down: &[u32],
    ) -> Engine {
        let resource = Arc::new(Resource {
            name: "svc".into(),
            attachment: Attachment::Static(dcs.full_list()),
            dcmap,
            skip_first,
            fallback_cname: fallback_cname.map(Box::from),
            service_types: Vec::new(),
        });
        let mut registry = ResourceRegistry::new();
        registry.insert(resource);
        let snapshot = Arc::new(Snapshot::new(HashMap::new(), registry, Vec::new()));
        Engine::new(
            snapshot,
            Arc::new(DownSet(down.iter().copied().collect())),
        )
    }

    #[test]
    fn skip_first_starts_at_the_second_datacenter() {
        let dcs = Datacenters::new(["dc1", "dc2", "dc3"]).unwrap();
        let dcmap = vec![
            Some(ResultSpec::Addrs(vec![endpoint(1, "192.0.2.1")])),
            Some(ResultSpec::Addrs(vec![endpoint(2, "192.0.2.2")])),
            Some(ResultSpec::Addrs(vec![endpoint(3, "192.0.2.3")])),
        ];
        // dc1 is healthy, but skip_first drops it anyway.
        let engine = static_engine(&dcs, dcmap, true, None, &[]);
        let resolved = engine.resolve_resource("metafo", "svc", CLIENT, None).unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["192.0.2.2".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn skip_first_is_ignored_for_single_entry_lists() {
        let dcs = Datacenters::new(["only"]).unwrap();
        let dcmap = vec![Some(ResultSpec::Addrs(vec![endpoint(1, "192.0.2.1")]))];
        let engine = static_engine(&dcs, dcmap, true, None, &[]);
        let resolved = engine.resolve_resource("metafo", "svc", CLIENT, None).unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["192.0.2.1".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn empty_address_list_is_a_terminal_empty_answer() {
        let dcs = Datacenters::new(["dc1", "dc2"]).unwrap();
        let dcmap = vec![
            Some(ResultSpec::Addrs(Vec::new())),
            Some(ResultSpec::Addrs(vec![endpoint(1, "192.0.2.9")])),
        ];
        // dc1's empty list stops the walk; dc2 is never consulted.
        let engine = static_engine(&dcs, dcmap, false, None, &[]);
        let resolved = engine.resolve_resource("metafo", "svc", CLIENT, None).unwrap();
        assert_eq!(resolved.answer, ResolvedAnswer::NoData);
    }

    #[test]
    fn all_down_falls_through_where_empty_list_would_not() {
        let dcs = Datacenters::new(["dc1", "dc2"]).unwrap();
        let dcmap = vec![
            Some(ResultSpec::Addrs(vec![endpoint(1, "192.0.2.1")])),
            Some(ResultSpec::Addrs(vec![endpoint(2, "192.0.2.9")])),
        ];
        let engine = static_engine(&dcs, dcmap, false, None, &[1]);
        let resolved = engine.resolve_resource("metafo", "svc", CLIENT, None).unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["192.0.2.9".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn vacant_slots_are_skipped() {
        let dcs = Datacenters::new(["dc1", "dc2"]).unwrap();
        let dcmap = vec![None, Some(ResultSpec::Addrs(vec![endpoint(1, "192.0.2.9")]))];
        let engine = static_engine(&dcs, dcmap, false, None, &[]);
        let resolved = engine.resolve_resource("metafo", "svc", CLIENT, None).unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["192.0.2.9".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn fallback_cname_is_the_answer_of_last_resort() {
        let dcs = Datacenters::new(["dc1"]).unwrap();
        let dcmap = vec![Some(ResultSpec::Addrs(vec![endpoint(1, "192.0.2.1")]))];
        let engine = static_engine(&dcs, dcmap, false, Some("last.example.net."), &[1]);
        let resolved = engine.resolve_resource("metafo", "svc", CLIENT, None).unwrap();
        assert_eq!(
            resolved.answer,
            ResolvedAnswer::Cname("last.example.net.".into()),
        );
    }

    #[test]
    fn literal_cname_slots_are_terminal() {
        let dcs = Datacenters::new(["dc1", "dc2"]).unwrap();
        let dcmap = vec![
            Some(ResultSpec::Cname("eu.example.net.".into())),
            Some(ResultSpec::Addrs(vec![endpoint(1, "192.0.2.9")])),
        ];
        let engine = static_engine(&dcs, dcmap, false, None, &[]);
        let resolved = engine.resolve_resource("metafo", "svc", CLIENT, None).unwrap();
        assert_eq!(
            resolved.answer,
            ResolvedAnswer::Cname("eu.example.net.".into()),
        );
    }

    #[test]
    fn weighted_groups_select_among_healthy_members_only() {
        let dcs = Datacenters::new(["dc1"]).unwrap();
        let dcmap = vec![Some(ResultSpec::Weighted(vec![
            WeightedMember {
                label: "a".into(),
                endpoint: endpoint(1, "192.0.2.1"),
                weight: 10,
            },
            WeightedMember {
                label: "b".into(),
                endpoint: endpoint(2, "192.0.2.2"),
                weight: 1,
            },
        ]))];
        let engine = static_engine(&dcs, dcmap, false, None, &[1]);
        let resolved = engine.resolve_resource("metafo", "svc", CLIENT, None).unwrap();
        // Only the healthy member can win, regardless of weights.
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["192.0.2.2".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn weighted_group_with_no_healthy_member_falls_through() {
        let dcs = Datacenters::new(["dc1", "dc2"]).unwrap();
        let dcmap = vec![
            Some(ResultSpec::Weighted(vec![WeightedMember {
                label: "a".into(),
                endpoint: endpoint(1, "192.0.2.1"),
                weight: 1,
            }])),
            Some(ResultSpec::Addrs(vec![endpoint(2, "192.0.2.9")])),
        ];
        let engine = static_engine(&dcs, dcmap, false, None, &[1]);
        let resolved = engine.resolve_resource("metafo", "svc", CLIENT, None).unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["192.0.2.9".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn references_delegate_to_other_resources() {
        let dcs = Datacenters::new(["dc1"]).unwrap();
        let inner = Arc::new(Resource {
            name: "inner".into(),
            attachment: Attachment::Static(dcs.full_list()),
            dcmap: vec![Some(ResultSpec::Addrs(vec![endpoint(7, "192.0.2.7")]))],
            skip_first: false,
            fallback_cname: None,
            service_types: Vec::new(),
        });
        let outer = Arc::new(Resource {
            name: "outer".into(),
            attachment: Attachment::Static(dcs.full_list()),
            dcmap: vec![Some(ResultSpec::Ref {
                family: "metafo".into(),
                name: "inner".into(),
            })],
            skip_first: false,
            fallback_cname: None,
            service_types: Vec::new(),
        });
        let mut registry = ResourceRegistry::new();
        registry.insert(inner);
        registry.insert(outer);
        let snapshot = Arc::new(Snapshot::new(HashMap::new(), registry, Vec::new()));
        let engine = Engine::new(snapshot, Arc::new(crate::health::AssumeUp));
        let resolved = engine.resolve_resource("metafo", "outer", CLIENT, None).unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["192.0.2.7".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn empty_referenced_resources_fall_through() {
        let dcs = Datacenters::new(["dc1", "dc2"]).unwrap();
        let one_dc = Datacenters::new(["dc1"]).unwrap();
        let inner = Arc::new(Resource {
            name: "inner".into(),
            attachment: Attachment::Static(one_dc.full_list()),
            dcmap: vec![Some(ResultSpec::Addrs(vec![endpoint(1, "192.0.2.1")]))],
            skip_first: false,
            fallback_cname: None,
            service_types: Vec::new(),
        });
        let outer = Arc::new(Resource {
            name: "outer".into(),
            attachment: Attachment::Static(dcs.full_list()),
            dcmap: vec![
                Some(ResultSpec::Ref {
                    family: "metafo".into(),
                    name: "inner".into(),
                }),
                Some(ResultSpec::Addrs(vec![endpoint(2, "192.0.2.2")])),
            ],
            skip_first: false,
            fallback_cname: None,
            service_types: Vec::new(),
        });
        let mut registry = ResourceRegistry::new();
        registry.insert(inner);
        registry.insert(outer);
        let snapshot = Arc::new(Snapshot::new(HashMap::new(), registry, Vec::new()));
        // Endpoint 1 is down, so the inner resource yields nothing and
        // the outer walk moves on.
        let engine = Engine::new(
            snapshot,
            Arc::new(DownSet([1].into_iter().collect())),
        );
        let resolved = engine.resolve_resource("metafo", "outer", CLIENT, None).unwrap();
        assert_eq!(
            addrs_of(&resolved.answer),
            vec!["192.0.2.2".parse::<IpAddr>().unwrap()],
        );
    }

    #[test]
    fn reference_cycles_exhaust_the_recursion_budget() {
        let dcs = Datacenters::new(["dc1"]).unwrap();
        let make = |name: &str, target: &str| {
            Arc::new(Resource {
                name: name.into(),
                attachment: Attachment::Static(dcs.full_list()),
                dcmap: vec![Some(ResultSpec::Ref {
                    family: "metafo".into(),
                    name: target.into(),
                })],
                skip_first: false,
                fallback_cname: None,
                service_types: Vec::new(),
            })
        };
        let mut registry = ResourceRegistry::new();
        registry.insert(make("a", "b"));
        registry.insert(make("b", "a"));
        let snapshot = Arc::new(Snapshot::new(HashMap::new(), registry, Vec::new()));
        let engine = Engine::new(snapshot, Arc::new(crate::health::AssumeUp));
        let err = engine.resolve_resource("metafo", "a", CLIENT, None).unwrap_err();
        assert_eq!(err, QueryError::Exhausted);
    }
}
