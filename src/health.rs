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

//! The consumed endpoint-health capability.
//!
//! Live monitoring of endpoints is an external collaborator. The
//! resolution engine only reads a boolean per endpoint; the monitor
//! updates its state asynchronously, and the state may change between
//! two reads within a single resolution. That is acceptable: health
//! flapping mid-resolution produces a momentarily inconsistent but
//! still valid answer.

use std::fmt;

/// A stable identifier for one monitorable endpoint.
///
/// IDs are assigned densely when a configuration generation is built;
/// the snapshot's endpoint roster tells the external monitor which
/// address and service type each ID stands for.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EndpointId(u32);

impl EndpointId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value of the ID.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The health-state capability consumed during failover resolution.
pub trait HealthState: Send + Sync {
    /// Returns whether the monitor currently considers the endpoint up.
    fn is_up(&self, endpoint: EndpointId) -> bool;
}

/// A [`HealthState`] that reports every endpoint up, for hosts without
/// monitoring.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssumeUp;

impl HealthState for AssumeUp {
    fn is_up(&self, _endpoint: EndpointId) -> bool {
        true
    }
}
