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

//! Named resources and the cross-resource reference graph.
//!
//! A [`Resource`] is one named logical answer source: it attaches to a
//! geographic map (the `geoip` family) or to a static ordered
//! datacenter list (the `metafo` family), and maps each datacenter to a
//! [`ResultSpec`] describing what that datacenter slot yields. A slot
//! may hold literal endpoint addresses, a literal CNAME, a weighted
//! group, or a reference to another named resource, possibly in the
//! other family—references form a directed graph that supports layered
//! configurations. Cycles in that graph are not detected here; the
//! query engine bounds recursion depth instead.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::dc::{DcId, DcList};
use crate::geo::MapRuntime;
use crate::health::EndpointId;

////////////////////////////////////////////////////////////////////////
// RESULT SPECIFICATIONS                                              //
////////////////////////////////////////////////////////////////////////

/// One concrete, monitorable endpoint address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Endpoint {
    pub id: EndpointId,
    pub addr: IpAddr,
}

/// One member of a weighted group.
#[derive(Clone, Debug)]
pub struct WeightedMember {
    /// The member's label, for logging and the endpoint roster.
    pub label: Box<str>,
    pub endpoint: Endpoint,
    /// Selection weight; at least 1 (enforced at build time).
    pub weight: u16,
}

/// What one datacenter slot of a resource yields.
#[derive(Clone, Debug)]
pub enum ResultSpec {
    /// Literal endpoint addresses, in configured order. An *empty* set
    /// is a deliberate "no answer data here" terminal, which is
    /// distinct from a non-empty set whose members are all down.
    Addrs(Vec<Endpoint>),

    /// A literal CNAME target. Not health-checked.
    Cname(Box<str>),

    /// A weighted group: one currently-healthy member is selected with
    /// probability proportional to its weight.
    Weighted(Vec<WeightedMember>),

    /// A reference to another named resource, which is resolved with
    /// its own map and failover logic when this slot is reached.
    Ref { family: Box<str>, name: Box<str> },
}

////////////////////////////////////////////////////////////////////////
// RESOURCES                                                          //
////////////////////////////////////////////////////////////////////////

/// How a resource obtains its ordered datacenter list.
#[derive(Clone, Debug)]
pub enum Attachment {
    /// From a geographic map, per client location (`geoip` family).
    Geo(Arc<MapRuntime>),

    /// From a fixed ordered list (`metafo` family).
    Static(DcList),
}

/// One named resource. Immutable once built.
#[derive(Clone, Debug)]
pub struct Resource {
    pub(crate) name: Box<str>,
    pub(crate) attachment: Attachment,
    /// Result specifications indexed by `DcId`. A slot may be vacant
    /// when the configuration allowed undefined datacenters; vacant
    /// slots are skipped during failover.
    pub(crate) dcmap: Vec<Option<ResultSpec>>,
    pub(crate) skip_first: bool,
    /// Answer of last resort when every datacenter yields nothing.
    pub(crate) fallback_cname: Option<Box<str>>,
    pub(crate) service_types: Vec<Box<str>>,
}

impl Resource {
    /// Returns the resource's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resource's resolution family: `"geoip"` for
    /// map-attached resources and `"metafo"` for static-list ones.
    pub fn family(&self) -> &'static str {
        match self.attachment {
            Attachment::Geo(_) => "geoip",
            Attachment::Static(_) => "metafo",
        }
    }

    /// Returns how the resource obtains its datacenter ordering.
    pub fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    /// Returns the result specification for a datacenter slot, if one
    /// was configured.
    pub fn spec(&self, id: DcId) -> Option<&ResultSpec> {
        self.dcmap.get(id.index()).and_then(Option::as_ref)
    }

    /// Returns whether the first entry of a multi-entry datacenter list
    /// should be dropped before failover.
    pub fn skip_first(&self) -> bool {
        self.skip_first
    }

    /// Returns the configured last-resort CNAME, if any.
    pub fn fallback_cname(&self) -> Option<&str> {
        self.fallback_cname.as_deref()
    }

    /// Returns the service types under which this resource's endpoints
    /// should be monitored.
    pub fn service_types(&self) -> &[Box<str>] {
        &self.service_types
    }
}

////////////////////////////////////////////////////////////////////////
// THE RESOURCE REGISTRY                                              //
////////////////////////////////////////////////////////////////////////

/// All named resources of one configuration generation, looked up by
/// `(family, name)`. Recursive references resolve through this
/// registry at query time.
#[derive(Clone, Debug, Default)]
pub struct ResourceRegistry {
    by_key: HashMap<(Box<str>, Box<str>), Arc<Resource>>,
}

impl ResourceRegistry {
    /// Creates a new, initially empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `resource` to the registry under its own family and name,
    /// replacing and returning any preexisting resource of that key.
    pub fn insert(&mut self, resource: Arc<Resource>) -> Option<Arc<Resource>> {
        let key = (Box::from(resource.family()), resource.name.clone());
        self.by_key.insert(key, resource)
    }

    /// Looks up a resource by family and name.
    pub fn get(&self, family: &str, name: &str) -> Option<&Arc<Resource>> {
        self.by_key.get(&(Box::from(family), Box::from(name)))
    }

    /// Iterates over all registered resources.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.by_key.values()
    }

    /// Returns the number of registered resources.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.family(), self.name)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dc::Datacenters;

    fn static_resource(name: &str) -> Arc<Resource> {
        let dcs = Datacenters::new(["primary", "backup"]).unwrap();
        Arc::new(Resource {
            name: name.into(),
            attachment: Attachment::Static(dcs.full_list()),
            dcmap: vec![None, None],
            skip_first: false,
            fallback_cname: None,
            service_types: Vec::new(),
        })
    }

    #[test]
    fn registry_lookup_is_per_family() {
        let mut registry = ResourceRegistry::new();
        registry.insert(static_resource("www"));
        assert!(registry.get("metafo", "www").is_some());
        assert!(registry.get("geoip", "www").is_none());
        assert!(registry.get("metafo", "mail").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn insert_replaces_same_key() {
        let mut registry = ResourceRegistry::new();
        assert!(registry.insert(static_resource("www")).is_none());
        assert!(registry.insert(static_resource("www")).is_some());
        assert_eq!(registry.len(), 1);
    }
}
