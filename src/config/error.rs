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

//! Implementation of the [`ConfigError`] type for build-time
//! configuration errors.

use std::fmt;

use crate::dc::DatacentersError;

/// Errors detected while building a snapshot from configuration.
///
/// Every variant is fatal to the pending configuration generation and
/// only to it: a host that fails to build a new snapshot keeps serving
/// the previous one. None of these conditions can surface at query
/// time; the build performs all cross-checks up front.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// Two maps share a name.
    DuplicateMap { map: Box<str> },

    /// A declared datacenter set (of a map or of a static-list
    /// resource) is invalid.
    Datacenters {
        context: Box<str>,
        error: DatacentersError,
    },

    /// A map names a geographic database the host did not provide.
    UnknownDatabase { map: Box<str>, db: Box<str> },

    /// A datacenter name is not in the relevant declared set.
    UnknownDatacenter { context: Box<str>, datacenter: Box<str> },

    /// A coordinate is outside the valid latitude/longitude ranges.
    BadCoordinates { map: Box<str>, datacenter: Box<str> },

    /// A map uses the automatic-ranking marker but declares no usable
    /// datacenter coordinates.
    AutoWithoutCoordinates { map: Box<str> },

    /// A network override entry could not be parsed.
    BadNetwork { map: Box<str>, net: Box<str> },

    /// A network override entry lies in one of the IPv4-embedding IPv6
    /// ranges, which this engine keeps permanently vacant.
    ForbiddenNetwork {
        map: Box<str>,
        net: Box<str>,
        range: &'static str,
    },

    /// A node of a map's location tree has an unusable shape.
    BadMapValue { map: Box<str>, reason: Box<str> },

    /// A resource has neither a map nor a static datacenter list.
    MissingAttachment { resource: Box<str> },

    /// A resource has both a map and a static datacenter list.
    AmbiguousAttachment { resource: Box<str> },

    /// A resource references a map that does not exist.
    UnknownMap { resource: Box<str>, map: Box<str> },

    /// Two resources share a family and name.
    DuplicateResource { family: Box<str>, resource: Box<str> },

    /// A resource's `dcmap` defines the same datacenter twice.
    DuplicateDcmapEntry { resource: Box<str>, datacenter: Box<str> },

    /// A resource's `dcmap` omits a declared datacenter and the
    /// resource does not allow undefined datacenters.
    MissingDatacenter { resource: Box<str>, datacenter: Box<str> },

    /// A weighted group is empty or contains a zero weight.
    MalformedWeights { resource: Box<str>, datacenter: Box<str> },

    /// A resource references another resource that does not exist.
    UnknownReference {
        resource: Box<str>,
        family: Box<str>,
        name: Box<str>,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DuplicateMap { map } => write!(f, "the map {map} is defined more than once"),
            Self::Datacenters { context, error } => {
                write!(f, "in the datacenters of {context}: {error}")
            }
            Self::UnknownDatabase { map, db } => {
                write!(f, "map {map} uses unknown geographic database {db}")
            }
            Self::UnknownDatacenter {
                context,
                datacenter,
            } => write!(f, "{context} uses undeclared datacenter {datacenter}"),
            Self::BadCoordinates { map, datacenter } => write!(
                f,
                "map {map} declares out-of-range coordinates for datacenter {datacenter}",
            ),
            Self::AutoWithoutCoordinates { map } => write!(
                f,
                "map {map} requests automatic ranking but declares no datacenter coordinates",
            ),
            Self::BadNetwork { map, net } => {
                write!(f, "map {map} has an unparseable network entry: {net}")
            }
            Self::ForbiddenNetwork { map, net, range } => write!(
                f,
                "map {map} has a network entry {net} in the forbidden {range} range",
            ),
            Self::BadMapValue { map, reason } => {
                write!(f, "in the location tree of map {map}: {reason}")
            }
            Self::MissingAttachment { resource } => write!(
                f,
                "resource {resource} has neither a map nor a datacenter list",
            ),
            Self::AmbiguousAttachment { resource } => write!(
                f,
                "resource {resource} has both a map and a datacenter list",
            ),
            Self::UnknownMap { resource, map } => {
                write!(f, "resource {resource} references unknown map {map}")
            }
            Self::DuplicateResource { family, resource } => write!(
                f,
                "the resource {family}/{resource} is defined more than once",
            ),
            Self::DuplicateDcmapEntry {
                resource,
                datacenter,
            } => write!(
                f,
                "resource {resource} defines datacenter {datacenter} more than once",
            ),
            Self::MissingDatacenter {
                resource,
                datacenter,
            } => write!(
                f,
                "resource {resource} does not define datacenter {datacenter} \
                 (and does not set undefined_datacenters_ok)",
            ),
            Self::MalformedWeights {
                resource,
                datacenter,
            } => write!(
                f,
                "resource {resource} has a malformed weighted group for datacenter {datacenter}",
            ),
            Self::UnknownReference {
                resource,
                family,
                name,
            } => write!(
                f,
                "resource {resource} references unknown resource {family}/{name}",
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
