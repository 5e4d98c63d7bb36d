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

//! TOML ingestion for [`Config`], behind the `toml-config` feature.
//!
//! This layer is purely syntactic: it gets the text into the typed
//! [`Config`] shape and rejects values that cannot possibly be right
//! (unparseable addresses, a result slot with two kinds of data).
//! Cross-checks against datacenter sets, maps, and other resources
//! remain the business of [`Config::build`].
//!
//! Maps live under a `[maps.NAME]` table each. Resources live under
//! `[geoip.resources.NAME]` and `[metafo.resources.NAME]`; since the
//! family is also implied by whether a resource attaches to a map or to
//! a static datacenter list, this layer rejects a resource filed under
//! the wrong family heading.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::Deserialize;

use super::{
    Config, CoordConfig, MapConfig, NetConfig, ResourceConfig, ResultConfig, Value,
    WeightedConfig, DEFAULT_AUTO_DC_LIMIT,
};

/// Errors reading a [`Config`] from TOML text.
#[derive(Debug)]
pub enum FromTomlError {
    /// The text is not valid TOML, or does not fit the expected tables
    /// and types.
    Parse(toml::de::Error),

    /// The TOML was well formed but a value cannot mean anything.
    Shape(String),
}

impl fmt::Display for FromTomlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Parse(error) => error.fmt(f),
            Self::Shape(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for FromTomlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(error) => Some(error),
            Self::Shape(_) => None,
        }
    }
}

impl From<toml::de::Error> for FromTomlError {
    fn from(error: toml::de::Error) -> Self {
        Self::Parse(error)
    }
}

////////////////////////////////////////////////////////////////////////
// RAW (SERDE-FACING) STRUCTURES                                      //
////////////////////////////////////////////////////////////////////////

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    maps: BTreeMap<String, RawMap>,
    #[serde(default)]
    geoip: RawFamily,
    #[serde(default)]
    metafo: RawFamily,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFamily {
    #[serde(default)]
    resources: BTreeMap<String, RawResource>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMap {
    geoip2_db: Option<String>,
    datacenters: Vec<String>,
    #[serde(default)]
    ignore_ecs: bool,
    #[serde(default)]
    nets: BTreeMap<String, Vec<String>>,
    map: Option<toml::Value>,
    #[serde(default)]
    auto_dc_coords: BTreeMap<String, (f64, f64)>,
    #[serde(default = "default_auto_dc_limit")]
    auto_dc_limit: usize,
}

fn default_auto_dc_limit() -> usize {
    DEFAULT_AUTO_DC_LIMIT
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResource {
    map: Option<String>,
    datacenters: Option<Vec<String>>,
    #[serde(default)]
    dcmap: BTreeMap<String, RawResult>,
    #[serde(default)]
    skip_first: bool,
    #[serde(default)]
    undefined_datacenters_ok: bool,
    fallback_cname: Option<String>,
    #[serde(default)]
    service_types: Vec<String>,
}

/// A result slot: a bare string (one address, or a CNAME when it does
/// not parse as an address), a list of addresses, or a detailed table.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawResult {
    Single(String),
    Addrs(Vec<String>),
    Detailed(RawDetailed),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDetailed {
    addrs: Option<Vec<String>>,
    cname: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
    weighted: Option<BTreeMap<String, RawWeighted>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWeighted {
    addr: String,
    weight: u16,
}

////////////////////////////////////////////////////////////////////////
// CONVERSION                                                          //
////////////////////////////////////////////////////////////////////////

impl Config {
    /// Reads a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, FromTomlError> {
        let raw: RawConfig = toml::from_str(text)?;

        let mut maps = Vec::with_capacity(raw.maps.len());
        for (name, rm) in raw.maps {
            maps.push(convert_map(name, rm)?);
        }

        let mut resources = Vec::new();
        for (name, rr) in raw.geoip.resources {
            if rr.map.is_none() || rr.datacenters.is_some() {
                return Err(FromTomlError::Shape(format!(
                    "geoip resource {name} must set map (and not datacenters)",
                )));
            }
            resources.push(convert_resource(name, rr)?);
        }
        for (name, rr) in raw.metafo.resources {
            if rr.datacenters.is_none() || rr.map.is_some() {
                return Err(FromTomlError::Shape(format!(
                    "metafo resource {name} must set datacenters (and not map)",
                )));
            }
            resources.push(convert_resource(name, rr)?);
        }

        Ok(Self { maps, resources })
    }
}

fn convert_map(name: String, rm: RawMap) -> Result<MapConfig, FromTomlError> {
    let map = match rm.map {
        Some(tree) => Some(convert_tree(&name, tree)?),
        None => None,
    };
    Ok(MapConfig {
        geoip2_db: rm.geoip2_db,
        datacenters: rm.datacenters,
        ignore_ecs: rm.ignore_ecs,
        nets: rm
            .nets
            .into_iter()
            .map(|(net, dclist)| NetConfig { net, dclist })
            .collect(),
        map,
        auto_dc_coords: rm
            .auto_dc_coords
            .into_iter()
            .map(|(datacenter, (lat, lon))| CoordConfig {
                datacenter,
                lat,
                lon,
            })
            .collect(),
        auto_dc_limit: rm.auto_dc_limit,
        name,
    })
}

/// Converts a TOML location tree into the loosely typed [`Value`] form.
/// Only strings, arrays, and tables can appear in a location tree.
fn convert_tree(map_name: &str, value: toml::Value) -> Result<Value, FromTomlError> {
    match value {
        toml::Value::String(s) => Ok(Value::Scalar(s)),
        toml::Value::Array(items) => {
            let items = items
                .into_iter()
                .map(|item| convert_tree(map_name, item))
                .collect::<Result<_, _>>()?;
            Ok(Value::List(items))
        }
        toml::Value::Table(table) => {
            let mut pairs = Vec::with_capacity(table.len());
            for (key, value) in table {
                let value = convert_tree(map_name, value)?;
                pairs.push((key, value));
            }
            Ok(Value::Map(pairs))
        }
        other => Err(FromTomlError::Shape(format!(
            "in the location tree of map {map_name}: \
             unexpected {} value (expected a string, array, or table)",
            other.type_str(),
        ))),
    }
}

fn convert_resource(name: String, rr: RawResource) -> Result<ResourceConfig, FromTomlError> {
    let mut dcmap = Vec::with_capacity(rr.dcmap.len());
    for (dc, result) in rr.dcmap {
        let result = convert_result(&name, &dc, result)?;
        dcmap.push((dc, result));
    }
    Ok(ResourceConfig {
        map: rr.map,
        datacenters: rr.datacenters,
        dcmap,
        skip_first: rr.skip_first,
        undefined_datacenters_ok: rr.undefined_datacenters_ok,
        fallback_cname: rr.fallback_cname,
        service_types: rr.service_types,
        name,
    })
}

fn convert_result(
    resource: &str,
    dc: &str,
    result: RawResult,
) -> Result<ResultConfig, FromTomlError> {
    match result {
        // A bare string that parses as an address is one; anything
        // else is a CNAME target.
        RawResult::Single(text) => match text.parse::<IpAddr>() {
            Ok(addr) => Ok(ResultConfig::Addrs(vec![addr])),
            Err(_) => Ok(ResultConfig::Cname(text)),
        },
        RawResult::Addrs(texts) => Ok(ResultConfig::Addrs(parse_addrs(resource, dc, &texts)?)),
        RawResult::Detailed(detailed) => convert_detailed(resource, dc, detailed),
    }
}

fn convert_detailed(
    resource: &str,
    dc: &str,
    detailed: RawDetailed,
) -> Result<ResultConfig, FromTomlError> {
    let RawDetailed {
        addrs,
        cname,
        reference,
        weighted,
    } = detailed;
    match (addrs, cname, reference, weighted) {
        (Some(texts), None, None, None) => {
            Ok(ResultConfig::Addrs(parse_addrs(resource, dc, &texts)?))
        }
        (None, Some(target), None, None) => Ok(ResultConfig::Cname(target)),
        (None, None, Some(reference), None) => match reference.split_once('/') {
            Some((family, name)) if !family.is_empty() && !name.is_empty() => {
                Ok(ResultConfig::Ref {
                    family: family.to_owned(),
                    name: name.to_owned(),
                })
            }
            _ => Err(FromTomlError::Shape(format!(
                "in resource {resource}, datacenter {dc}: a reference must \
                 have the form family/name, not {reference}",
            ))),
        },
        (None, None, None, Some(weighted)) => {
            let members = weighted
                .into_iter()
                .map(|(label, member)| {
                    let addr = parse_addr(resource, dc, &member.addr)?;
                    Ok(WeightedConfig {
                        label,
                        addr,
                        weight: member.weight,
                    })
                })
                .collect::<Result<_, FromTomlError>>()?;
            Ok(ResultConfig::Weighted(members))
        }
        _ => Err(FromTomlError::Shape(format!(
            "in resource {resource}, datacenter {dc}: a result table must \
             have exactly one of addrs, cname, ref, and weighted",
        ))),
    }
}

fn parse_addrs(resource: &str, dc: &str, texts: &[String]) -> Result<Vec<IpAddr>, FromTomlError> {
    texts
        .iter()
        .map(|text| parse_addr(resource, dc, text))
        .collect()
}

fn parse_addr(resource: &str, dc: &str, text: &str) -> Result<IpAddr, FromTomlError> {
    text.parse().map_err(|_| {
        FromTomlError::Shape(format!(
            "in resource {resource}, datacenter {dc}: {text} is not an IP address",
        ))
    })
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                               //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const EXAMPLE: &str = r#"
        [maps.world]
        datacenters = ["na", "eu"]
        ignore_ecs = false

        [maps.world.nets]
        "192.0.2.0/24" = ["eu"]

        [maps.world.map]
        default = ["na", "eu"]

        [maps.world.map.EU]
        default = ["eu", "na"]
        CH = "eu"

        [geoip.resources.www]
        map = "world"

        [geoip.resources.www.dcmap]
        na = ["192.0.2.1", "192.0.2.2"]
        eu = ["198.51.100.1"]

        [metafo.resources.www]
        datacenters = ["live", "backup"]
        fallback_cname = "www.last.example."

        [metafo.resources.www.dcmap]
        live = { ref = "geoip/www" }
        backup = "www.backup.example."
    "#;

    #[test]
    fn the_example_parses_and_builds() {
        let config = Config::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.maps.len(), 1);
        assert_eq!(config.maps[0].name, "world");
        assert_eq!(config.maps[0].auto_dc_limit, DEFAULT_AUTO_DC_LIMIT);
        assert_eq!(config.maps[0].nets.len(), 1);
        assert_eq!(config.resources.len(), 2);

        let snapshot = config.build(&HashMap::new()).unwrap();
        assert!(snapshot.registry().get("geoip", "www").is_some());
        assert!(snapshot.registry().get("metafo", "www").is_some());
        assert_eq!(snapshot.endpoints().len(), 3);
    }

    #[test]
    fn bare_strings_become_addresses_or_cnames() {
        let config = Config::from_toml_str(
            r#"
            [metafo.resources.www]
            datacenters = ["a", "b"]
            [metafo.resources.www.dcmap]
            a = "192.0.2.1"
            b = "www.backup.example."
            "#,
        )
        .unwrap();
        let dcmap = &config.resources[0].dcmap;
        assert!(matches!(&dcmap[0].1, ResultConfig::Addrs(addrs) if addrs.len() == 1));
        assert!(matches!(&dcmap[1].1, ResultConfig::Cname(t) if t == "www.backup.example."));
    }

    #[test]
    fn weighted_groups_parse() {
        let config = Config::from_toml_str(
            r#"
            [metafo.resources.www]
            datacenters = ["a"]
            [metafo.resources.www.dcmap.a.weighted]
            one = { addr = "192.0.2.1", weight = 3 }
            two = { addr = "192.0.2.2", weight = 1 }
            "#,
        )
        .unwrap();
        match &config.resources[0].dcmap[0].1 {
            ResultConfig::Weighted(members) => {
                assert_eq!(members.len(), 2);
                assert_eq!(members[0].label, "one");
                assert_eq!(members[0].weight, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn a_result_table_must_pick_one_kind() {
        let error = Config::from_toml_str(
            r#"
            [metafo.resources.www]
            datacenters = ["a"]
            [metafo.resources.www.dcmap]
            a = { cname = "www.example.", ref = "geoip/www" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(error, FromTomlError::Shape(_)), "{error}");
    }

    #[test]
    fn resources_must_sit_under_their_family() {
        let error = Config::from_toml_str(
            r#"
            [geoip.resources.www]
            datacenters = ["a"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(error, FromTomlError::Shape(_)), "{error}");
    }

    #[test]
    fn bad_addresses_are_rejected_up_front() {
        let error = Config::from_toml_str(
            r#"
            [metafo.resources.www]
            datacenters = ["a"]
            [metafo.resources.www.dcmap]
            a = ["not-an-address"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(error, FromTomlError::Shape(_)), "{error}");
    }

    #[test]
    fn location_trees_reject_non_string_values() {
        let error = Config::from_toml_str(
            r#"
            [maps.world]
            datacenters = ["na"]
            [maps.world.map]
            EU = 3
            "#,
        )
        .unwrap_err();
        assert!(matches!(error, FromTomlError::Shape(_)), "{error}");
    }
}
