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

//! Meridian, a geography- and health-aware resolution engine for
//! authoritative DNS load balancing.
//!
//! Meridian answers one question: given a named resource and a client
//! address, which endpoint addresses (or CNAME) should the client get,
//! and over what network scope is that answer reusable? A resource
//! obtains an ordered datacenter preference list—from a hierarchical
//! geographic map, from coordinate-distance ranking, or from a fixed
//! list—and failover walks that list past unhealthy endpoints, possibly
//! through references to other resources.
//!
//! The crate is deliberately a library with seams where its
//! collaborators plug in. The DNS server that speaks the wire protocol
//! calls [`engine::Engine::resolve_resource`]; the GeoIP database
//! reader implements [`geo::GeoDatabase`]; the endpoint health monitor
//! implements [`health::HealthState`] and watches the addresses listed
//! in [`engine::Snapshot::endpoints`]. Configuration arrives as a
//! [`config::Config`] (optionally from TOML, with the `toml-config`
//! feature) and is compiled by [`config::Config::build`] into an
//! immutable [`engine::Snapshot`], which the engine swaps in atomically
//! on reload.

pub mod addr;
pub mod config;
pub mod dc;
pub mod engine;
pub mod geo;
pub mod health;
pub mod nets;
pub mod resource;
