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

//! Configuration and the snapshot builder.
//!
//! A [`Config`] is a passive description of maps and resources; hosts
//! construct one directly, or (with the `toml-config` feature) through
//! [`Config::from_toml_str`]. [`Config::build`] turns it into an
//! immutable [`Snapshot`], performing *every* cross-check up front:
//! once a snapshot exists, no configuration defect can surface at query
//! time. A failed build leaves any previously installed snapshot
//! untouched, so a bad reload never takes a serving host down.
//!
//! The only build-time condition that is reported rather than rejected
//! is a network-override conflict (two entries fighting over the same
//! address space); the prefix table resolves those most-specific-first
//! and logs each losing entry.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use crate::addr::{self, CanonicalAddr};
use crate::dc::{Datacenters, DcList, MapValue};
use crate::engine::{EndpointRecord, Snapshot};
use crate::geo::{Coord, DcCoords, GeoDatabase, GeoMap, MapRuntime, Unavailable};
use crate::health::EndpointId;
use crate::nets::{self, PrefixTable};
use crate::resource::{
    Attachment, Endpoint, Resource, ResourceRegistry, ResultSpec, WeightedMember,
};

mod error;
#[cfg(feature = "toml-config")]
mod toml;

pub use error::ConfigError;
#[cfg(feature = "toml-config")]
pub use self::toml::FromTomlError;

/// The default number of entries an automatically ranked datacenter
/// list is truncated to.
pub const DEFAULT_AUTO_DC_LIMIT: usize = 3;

////////////////////////////////////////////////////////////////////////
// LOOSELY TYPED VALUES                                                //
////////////////////////////////////////////////////////////////////////

/// A loosely typed configuration value, used for the location tree of a
/// map, whose shape (arbitrarily nested location names) cannot be
/// described statically.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    /// A bare string: a single datacenter name, or the automatic
    /// ranking marker `auto`.
    Scalar(String),

    /// A list of values. In a location tree, always a list of scalars
    /// forming an ordered datacenter list.
    List(Vec<Value>),

    /// Key-value pairs, in written order.
    Map(Vec<(String, Value)>),
}

////////////////////////////////////////////////////////////////////////
// TYPED CONFIGURATION                                                 //
////////////////////////////////////////////////////////////////////////

/// A complete configuration: every map and resource of one generation.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub maps: Vec<MapConfig>,
    pub resources: Vec<ResourceConfig>,
}

/// The configuration of one geographic map.
#[derive(Clone, Debug)]
pub struct MapConfig {
    pub name: String,

    /// The key of the geographic database the host provides for this
    /// map. Without one, every lookup behaves as "client unknown."
    pub geoip2_db: Option<String>,

    /// The declared datacenter names, in order. This order is the
    /// ultimate fallback list.
    pub datacenters: Vec<String>,

    /// When set, every answer from this map reports scope 0.
    pub ignore_ecs: bool,

    /// Explicit network-prefix overrides, tried before the database.
    pub nets: Vec<NetConfig>,

    /// The hierarchical location tree. `None` means every client gets
    /// the root default.
    pub map: Option<Value>,

    /// Datacenter coordinates for automatic distance ranking.
    pub auto_dc_coords: Vec<CoordConfig>,

    /// Length limit for automatically ranked lists; 0 means unlimited.
    pub auto_dc_limit: usize,
}

/// One explicit network override: a textual `address/len` network and
/// the datacenter list it forces.
#[derive(Clone, Debug)]
pub struct NetConfig {
    pub net: String,
    pub dclist: Vec<String>,
}

/// The coordinates of one datacenter, in decimal degrees.
#[derive(Clone, Debug)]
pub struct CoordConfig {
    pub datacenter: String,
    pub lat: f64,
    pub lon: f64,
}

/// The configuration of one resource. Exactly one of `map` and
/// `datacenters` must be set; it determines the resource's family.
#[derive(Clone, Debug, Default)]
pub struct ResourceConfig {
    pub name: String,

    /// The map providing per-client datacenter ordering (the `geoip`
    /// family).
    pub map: Option<String>,

    /// A fixed ordered datacenter list (the `metafo` family).
    pub datacenters: Option<Vec<String>>,

    /// What each datacenter yields, keyed by datacenter name.
    pub dcmap: Vec<(String, ResultConfig)>,

    pub skip_first: bool,

    /// Permit `dcmap` to omit declared datacenters; omitted slots are
    /// skipped during failover.
    pub undefined_datacenters_ok: bool,

    /// CNAME of last resort when every datacenter yields nothing.
    pub fallback_cname: Option<String>,

    /// Service types under which the resource's endpoints should be
    /// monitored.
    pub service_types: Vec<String>,
}

/// What one datacenter slot of a resource yields.
#[derive(Clone, Debug)]
pub enum ResultConfig {
    /// Literal endpoint addresses. An empty list is legal and means
    /// "deliberately no data here."
    Addrs(Vec<IpAddr>),

    /// A literal CNAME target.
    Cname(String),

    /// A weighted group of addresses.
    Weighted(Vec<WeightedConfig>),

    /// A reference to another resource.
    Ref { family: String, name: String },
}

/// One member of a weighted group.
#[derive(Clone, Debug)]
pub struct WeightedConfig {
    pub label: String,
    pub addr: IpAddr,
    pub weight: u16,
}

////////////////////////////////////////////////////////////////////////
// THE SNAPSHOT BUILDER                                                //
////////////////////////////////////////////////////////////////////////

impl Config {
    /// Builds an immutable [`Snapshot`] from this configuration.
    ///
    /// `databases` provides the host's open geographic databases, keyed
    /// by the names maps reference through
    /// [`geoip2_db`](MapConfig::geoip2_db).
    pub fn build(
        &self,
        databases: &HashMap<String, Arc<dyn GeoDatabase>>,
    ) -> Result<Snapshot, ConfigError> {
        let mut maps = HashMap::new();
        for mc in &self.maps {
            let runtime = Arc::new(build_map(mc, databases)?);
            if maps.insert(runtime.name().into(), runtime).is_some() {
                return Err(ConfigError::DuplicateMap {
                    map: mc.name.as_str().into(),
                });
            }
        }

        // References are validated against the declared resource set,
        // so a resource may reference one defined later (or itself).
        let mut declared = HashSet::new();
        for rc in &self.resources {
            let family = match (&rc.map, &rc.datacenters) {
                (Some(_), None) => "geoip",
                (None, Some(_)) => "metafo",
                (None, None) => {
                    return Err(ConfigError::MissingAttachment {
                        resource: rc.name.as_str().into(),
                    })
                }
                (Some(_), Some(_)) => {
                    return Err(ConfigError::AmbiguousAttachment {
                        resource: rc.name.as_str().into(),
                    })
                }
            };
            if !declared.insert((family.to_owned(), rc.name.clone())) {
                return Err(ConfigError::DuplicateResource {
                    family: family.into(),
                    resource: rc.name.as_str().into(),
                });
            }
        }

        let mut registry = ResourceRegistry::new();
        let mut endpoints = Vec::new();
        let mut ids = EndpointIds::new();
        for rc in &self.resources {
            let resource = build_resource(rc, &maps, &declared, &mut ids, &mut endpoints)?;
            registry.insert(Arc::new(resource));
        }

        Ok(Snapshot::new(maps, registry, endpoints))
    }
}

/// Dense endpoint-ID assignment for one build.
struct EndpointIds(u32);

impl EndpointIds {
    fn new() -> Self {
        Self(0)
    }

    fn next(&mut self) -> EndpointId {
        let id = EndpointId::new(self.0);
        self.0 += 1;
        id
    }
}

////////////////////////////////////////////////////////////////////////
// MAP CONSTRUCTION                                                    //
////////////////////////////////////////////////////////////////////////

fn build_map(
    mc: &MapConfig,
    databases: &HashMap<String, Arc<dyn GeoDatabase>>,
) -> Result<MapRuntime, ConfigError> {
    let map_name: Box<str> = mc.name.as_str().into();
    let datacenters =
        Datacenters::new(mc.datacenters.iter().cloned()).map_err(|error| {
            ConfigError::Datacenters {
                context: format!("map {map_name}").into(),
                error,
            }
        })?;

    let db: Arc<dyn GeoDatabase> = match &mc.geoip2_db {
        Some(key) => match databases.get(key) {
            Some(db) => db.clone(),
            None => {
                return Err(ConfigError::UnknownDatabase {
                    map: map_name,
                    db: key.as_str().into(),
                })
            }
        },
        None => Arc::new(Unavailable),
    };

    let mut coords = DcCoords::new(&datacenters);
    for cc in &mc.auto_dc_coords {
        let id = match datacenters.id_of(&cc.datacenter) {
            Some(id) => id,
            None => {
                return Err(ConfigError::UnknownDatacenter {
                    context: format!("map {map_name}").into(),
                    datacenter: cc.datacenter.as_str().into(),
                })
            }
        };
        if !(-90.0..=90.0).contains(&cc.lat) || !(-180.0..=180.0).contains(&cc.lon) {
            return Err(ConfigError::BadCoordinates {
                map: map_name,
                datacenter: cc.datacenter.as_str().into(),
            });
        }
        coords.set(
            id,
            Coord {
                lat: cc.lat,
                lon: cc.lon,
            },
        );
    }

    let map = build_location_tree(&map_name, &datacenters, mc.map.as_ref(), &coords)?;
    let nets = build_prefix_table(&map_name, &datacenters, &mc.nets)?;

    Ok(MapRuntime {
        name: map_name,
        datacenters,
        map,
        nets,
        coords,
        auto_limit: mc.auto_dc_limit,
        ignore_ecs: mc.ignore_ecs,
        db,
    })
}

/// Builds the hierarchical location tree of one map.
///
/// The root default is the tree's top-level `default` entry if present;
/// otherwise automatic ranking when the map declares coordinates, and
/// the full declared list when it does not.
fn build_location_tree(
    map_name: &str,
    datacenters: &Datacenters,
    tree: Option<&Value>,
    coords: &DcCoords,
) -> Result<GeoMap, ConfigError> {
    let pairs = match tree {
        Some(Value::Map(pairs)) => pairs.as_slice(),
        Some(_) => {
            return Err(ConfigError::BadMapValue {
                map: map_name.into(),
                reason: "the tree's top level must be a map of locations".into(),
            })
        }
        None => &[],
    };

    let mut uses_auto = false;
    let default = match pairs.iter().find(|(key, _)| key == "default") {
        Some((_, value)) => parse_map_value(map_name, datacenters, value, &mut uses_auto)?,
        None if coords.any() => {
            uses_auto = true;
            MapValue::Auto
        }
        None => MapValue::List(datacenters.full_list()),
    };

    let mut map = GeoMap::new(default);
    let mut path = Vec::new();
    insert_subtree(
        map_name,
        datacenters,
        &mut map,
        &mut path,
        pairs,
        &mut uses_auto,
    )?;

    if uses_auto && !coords.any() {
        return Err(ConfigError::AutoWithoutCoordinates {
            map: map_name.into(),
        });
    }
    Ok(map)
}

fn insert_subtree<'a>(
    map_name: &str,
    datacenters: &Datacenters,
    map: &mut GeoMap,
    path: &mut Vec<&'a str>,
    pairs: &'a [(String, Value)],
    uses_auto: &mut bool,
) -> Result<(), ConfigError> {
    for (key, value) in pairs {
        if key == "default" {
            // The root default was consumed by the caller; a nested
            // default is the value of the enclosing location node.
            if !path.is_empty() {
                let value = parse_map_value(map_name, datacenters, value, uses_auto)?;
                map.insert(path, value);
            }
            continue;
        }
        path.push(key);
        match value {
            Value::Map(children) => {
                insert_subtree(map_name, datacenters, map, path, children, uses_auto)?;
            }
            other => {
                let value = parse_map_value(map_name, datacenters, other, uses_auto)?;
                map.insert(path, value);
            }
        }
        path.pop();
    }
    Ok(())
}

/// Parses a location-tree leaf: the `auto` marker, a single datacenter
/// name, or a list of datacenter names.
fn parse_map_value(
    map_name: &str,
    datacenters: &Datacenters,
    value: &Value,
    uses_auto: &mut bool,
) -> Result<MapValue, ConfigError> {
    let names: Vec<&str> = match value {
        Value::Scalar(name) if name == "auto" => {
            *uses_auto = true;
            return Ok(MapValue::Auto);
        }
        Value::Scalar(name) => vec![name.as_str()],
        Value::List(items) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Scalar(name) => names.push(name.as_str()),
                    _ => {
                        return Err(ConfigError::BadMapValue {
                            map: map_name.into(),
                            reason: "a datacenter list may only contain names".into(),
                        })
                    }
                }
            }
            names
        }
        Value::Map(_) => {
            return Err(ConfigError::BadMapValue {
                map: map_name.into(),
                reason: "expected a datacenter list, not a nested map".into(),
            })
        }
    };
    parse_dclist(&format!("map {map_name}"), map_name, datacenters, &names)
}

/// Parses an ordered list of datacenter names into a [`MapValue`].
fn parse_dclist(
    context: &str,
    map_name: &str,
    datacenters: &Datacenters,
    names: &[&str],
) -> Result<MapValue, ConfigError> {
    let mut list = DcList::new();
    for &name in names {
        let id = match datacenters.id_of(name) {
            Some(id) => id,
            None => {
                return Err(ConfigError::UnknownDatacenter {
                    context: context.into(),
                    datacenter: name.into(),
                })
            }
        };
        if list.contains(id) {
            return Err(ConfigError::BadMapValue {
                map: map_name.into(),
                reason: format!("datacenter {name} appears twice in a list").into(),
            });
        }
        list.push(id);
    }
    Ok(MapValue::List(list))
}

/// Parses and assembles a map's explicit network overrides.
fn build_prefix_table(
    map_name: &str,
    datacenters: &Datacenters,
    nets: &[NetConfig],
) -> Result<PrefixTable, ConfigError> {
    let mut entries = Vec::with_capacity(nets.len());
    for nc in nets {
        let (net, prefix_len) = parse_net(map_name, &nc.net)?;
        let names: Vec<&str> = nc.dclist.iter().map(String::as_str).collect();
        let dclist =
            match parse_dclist(&format!("map {map_name}"), map_name, datacenters, &names)? {
                MapValue::List(list) => list,
                MapValue::Auto => unreachable!(),
            };
        entries.push(nets::Entry {
            net,
            prefix_len,
            dclist: Arc::new(dclist),
        });
    }
    // Conflicts are logged by the table builder and are not fatal.
    let (table, _) = PrefixTable::build(entries);
    Ok(table)
}

/// Parses a textual `address/len` network into canonical form.
fn parse_net(map_name: &str, text: &str) -> Result<(CanonicalAddr, u8), ConfigError> {
    let bad = || ConfigError::BadNetwork {
        map: map_name.into(),
        net: text.into(),
    };
    let (addr_text, len_text) = text.split_once('/').ok_or_else(&bad)?;
    let addr: IpAddr = addr_text.parse().map_err(|_| bad())?;
    let len: u8 = len_text.parse().map_err(|_| bad())?;
    match addr {
        IpAddr::V4(v4) => {
            if len > 32 {
                return Err(bad());
            }
            Ok((v4.into(), len + 96))
        }
        IpAddr::V6(v6) => {
            if len > 128 {
                return Err(bad());
            }
            if let Some(range) = addr::alias_range_of(&v6, len) {
                return Err(ConfigError::ForbiddenNetwork {
                    map: map_name.into(),
                    net: text.into(),
                    range,
                });
            }
            Ok((v6.into(), len))
        }
    }
}

////////////////////////////////////////////////////////////////////////
// RESOURCE CONSTRUCTION                                               //
////////////////////////////////////////////////////////////////////////

fn build_resource(
    rc: &ResourceConfig,
    maps: &HashMap<Box<str>, Arc<MapRuntime>>,
    declared: &HashSet<(String, String)>,
    ids: &mut EndpointIds,
    roster: &mut Vec<EndpointRecord>,
) -> Result<Resource, ConfigError> {
    let name: Box<str> = rc.name.as_str().into();
    let service_types: Vec<Box<str>> = rc
        .service_types
        .iter()
        .map(|s| s.as_str().into())
        .collect();

    // The attachment also determines the datacenter set the dcmap is
    // validated against. Config::build has already rejected resources
    // with zero or two attachments.
    let (attachment, datacenters) = match (&rc.map, &rc.datacenters) {
        (Some(map_name), None) => match maps.get(map_name.as_str()) {
            Some(rt) => (Attachment::Geo(rt.clone()), rt.datacenters().clone()),
            None => {
                return Err(ConfigError::UnknownMap {
                    resource: name,
                    map: map_name.as_str().into(),
                })
            }
        },
        (None, Some(list)) => {
            let datacenters = Datacenters::new(list.iter().cloned()).map_err(|error| {
                ConfigError::Datacenters {
                    context: format!("resource {name}").into(),
                    error,
                }
            })?;
            (Attachment::Static(datacenters.full_list()), datacenters)
        }
        _ => unreachable!(),
    };

    let mut dcmap: Vec<Option<ResultSpec>> = vec![None; datacenters.len()];
    for (dc_name, result) in &rc.dcmap {
        let id = match datacenters.id_of(dc_name) {
            Some(id) => id,
            None => {
                return Err(ConfigError::UnknownDatacenter {
                    context: format!("resource {name}").into(),
                    datacenter: dc_name.as_str().into(),
                })
            }
        };
        let slot = &mut dcmap[id.index()];
        if slot.is_some() {
            return Err(ConfigError::DuplicateDcmapEntry {
                resource: name,
                datacenter: dc_name.as_str().into(),
            });
        }
        *slot = Some(build_result(
            rc,
            dc_name,
            result,
            declared,
            &service_types,
            ids,
            roster,
        )?);
    }

    if !rc.undefined_datacenters_ok {
        for id in datacenters.ids() {
            if dcmap[id.index()].is_none() {
                return Err(ConfigError::MissingDatacenter {
                    resource: name,
                    datacenter: datacenters.name(id).into(),
                });
            }
        }
    }

    Ok(Resource {
        name,
        attachment,
        dcmap,
        skip_first: rc.skip_first,
        fallback_cname: rc.fallback_cname.as_deref().map(Into::into),
        service_types,
    })
}

fn build_result(
    rc: &ResourceConfig,
    dc_name: &str,
    result: &ResultConfig,
    declared: &HashSet<(String, String)>,
    service_types: &[Box<str>],
    ids: &mut EndpointIds,
    roster: &mut Vec<EndpointRecord>,
) -> Result<ResultSpec, ConfigError> {
    let mut register = |addr: IpAddr| {
        let id = ids.next();
        roster.push(EndpointRecord {
            id,
            addr,
            resource: rc.name.as_str().into(),
            service_types: service_types.to_vec(),
        });
        Endpoint { id, addr }
    };

    match result {
        ResultConfig::Addrs(addrs) => {
            let endpoints = addrs.iter().map(|&addr| register(addr)).collect();
            Ok(ResultSpec::Addrs(endpoints))
        }
        ResultConfig::Cname(target) => Ok(ResultSpec::Cname(target.as_str().into())),
        ResultConfig::Weighted(members) => {
            if members.is_empty() || members.iter().any(|m| m.weight == 0) {
                return Err(ConfigError::MalformedWeights {
                    resource: rc.name.as_str().into(),
                    datacenter: dc_name.into(),
                });
            }
            let members = members
                .iter()
                .map(|m| WeightedMember {
                    label: m.label.as_str().into(),
                    endpoint: register(m.addr),
                    weight: m.weight,
                })
                .collect();
            Ok(ResultSpec::Weighted(members))
        }
        ResultConfig::Ref { family, name } => {
            if !declared.contains(&(family.clone(), name.clone())) {
                return Err(ConfigError::UnknownReference {
                    resource: rc.name.as_str().into(),
                    family: family.as_str().into(),
                    name: name.as_str().into(),
                });
            }
            Ok(ResultSpec::Ref {
                family: family.as_str().into(),
                name: name.as_str().into(),
            })
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                               //
////////////////////////////////////////////////////////////////////////
