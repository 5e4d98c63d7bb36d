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

//! Canonicalization of client addresses into a single address space.
//!
//! All lookup structures in this crate reason about exactly one address
//! space: the 128-bit IPv6 space, with every representation of an IPv4
//! host folded into the "v4compat" form `::a.b.c.d`. The
//! [`CanonicalAddr`] type is the result of that folding; constructing
//! one from any [`IpAddr`] is total and pure, so downstream code never
//! has to consider the various IPv4-in-IPv6 transition encodings again.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

////////////////////////////////////////////////////////////////////////
// CANONICAL ADDRESSES                                                //
////////////////////////////////////////////////////////////////////////

/// A client address in the canonical 128-bit space.
///
/// Two addresses that represent the same IPv4 host always compare
/// equal as `CanonicalAddr`s, no matter which of the IPv4-in-IPv6
/// encodings they arrived in. The encodings folded are:
///
/// * native IPv4;
/// * v4compat (`::0.0.0.0/96`), which is also the canonical form;
/// * v4mapped (`::ffff:0:0/96`);
/// * SIIT (`::ffff:0:0:0/96`);
/// * the NAT64 well-known prefix (`64:ff9b::/96`);
/// * 6to4 (`2002::/16`, client address in bits 16–47);
/// * Teredo (`2001::/32`, client address bit-inverted in the low 32
///   bits).
///
/// Canonicalization is idempotent: a `CanonicalAddr`'s octets fed back
/// through [`CanonicalAddr::from`] produce the same value.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CanonicalAddr([u8; 16]);

impl CanonicalAddr {
    /// Returns the sixteen octets of the address, most significant
    /// first.
    pub fn octets(&self) -> [u8; 16] {
        self.0
    }

    /// Returns bit `index` of the address, where bit 0 is the most
    /// significant bit of the first octet. This is the traversal order
    /// used by the network-prefix trie.
    ///
    /// # Panics
    ///
    /// Panics if `index` is 128 or greater.
    pub fn bit(&self, index: u8) -> bool {
        assert!(index < 128);
        let octet = self.0[usize::from(index) / 8];
        octet >> (7 - index % 8) & 1 == 1
    }

    /// Returns whether this address lies in the canonical IPv4 region
    /// (upper 96 bits zero).
    pub fn is_v4(&self) -> bool {
        self.0[0..12] == [0; 12]
    }

    /// Converts the address back into an [`IpAddr`], undoing the
    /// v4compat embedding for IPv4 hosts.
    pub fn to_ip_addr(&self) -> IpAddr {
        if self.is_v4() {
            IpAddr::V4(Ipv4Addr::new(self.0[12], self.0[13], self.0[14], self.0[15]))
        } else {
            IpAddr::V6(self.0.into())
        }
    }

    fn from_v4_octets(v4: [u8; 4]) -> Self {
        let mut octets = [0; 16];
        octets[12..16].copy_from_slice(&v4);
        Self(octets)
    }
}

impl From<Ipv4Addr> for CanonicalAddr {
    fn from(addr: Ipv4Addr) -> Self {
        Self::from_v4_octets(addr.octets())
    }
}

impl From<Ipv6Addr> for CanonicalAddr {
    fn from(addr: Ipv6Addr) -> Self {
        let o = addr.octets();
        if o[0..10] == [0; 10] && o[10] == 0xff && o[11] == 0xff {
            // v4mapped.
            Self::from_v4_octets([o[12], o[13], o[14], o[15]])
        } else if o[0..8] == [0; 8] && o[8] == 0xff && o[9] == 0xff && o[10] == 0 && o[11] == 0 {
            // SIIT.
            Self::from_v4_octets([o[12], o[13], o[14], o[15]])
        } else if o[0..4] == [0, 0x64, 0xff, 0x9b] && o[4..12] == [0; 8] {
            // NAT64 well-known prefix.
            Self::from_v4_octets([o[12], o[13], o[14], o[15]])
        } else if o[0] == 0x20 && o[1] == 0x02 {
            // 6to4: the client address follows the prefix.
            Self::from_v4_octets([o[2], o[3], o[4], o[5]])
        } else if o[0] == 0x20 && o[1] == 0x01 && o[2] == 0 && o[3] == 0 {
            // Teredo: the client address is stored bit-inverted in the
            // low 32 bits.
            Self::from_v4_octets([!o[12], !o[13], !o[14], !o[15]])
        } else {
            // Native IPv6. This includes v4compat addresses, which are
            // already in canonical form.
            Self(o)
        }
    }
}

impl From<IpAddr> for CanonicalAddr {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl fmt::Debug for CanonicalAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", Ipv6Addr::from(self.0))
    }
}

impl fmt::Display for CanonicalAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", Ipv6Addr::from(self.0))
    }
}

////////////////////////////////////////////////////////////////////////
// IPV4 ALIAS RANGES                                                  //
////////////////////////////////////////////////////////////////////////

/// The IPv4-embedding IPv6 ranges other than v4compat, in which
/// explicit network entries are forbidden. (An IPv4 host in one of
/// these ranges canonicalizes into the v4compat region before any
/// lookup, so entries here could never match anything.)
const ALIAS_RANGES: &[(&str, Ipv6Addr, u8)] = &[
    ("v4mapped", Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0, 0), 96),
    ("SIIT", Ipv6Addr::new(0, 0, 0, 0, 0xffff, 0, 0, 0), 96),
    ("NAT64 WKP", Ipv6Addr::new(0x64, 0xff9b, 0, 0, 0, 0, 0, 0), 96),
    ("Teredo", Ipv6Addr::new(0x2001, 0, 0, 0, 0, 0, 0, 0), 32),
    ("6to4", Ipv6Addr::new(0x2002, 0, 0, 0, 0, 0, 0, 0), 16),
];

/// If the network `net/prefix_len` falls within one of the forbidden
/// IPv4 alias ranges, returns that range's name (for use in an error
/// message). Otherwise, returns [`None`].
pub fn alias_range_of(net: &Ipv6Addr, prefix_len: u8) -> Option<&'static str> {
    let net_octets = net.octets();
    for &(name, range, range_len) in ALIAS_RANGES {
        if prefix_len >= range_len && prefix_matches(&net_octets, &range.octets(), range_len) {
            return Some(name);
        }
    }
    None
}

/// Checks whether the first `len` bits of `a` and `b` are equal.
fn prefix_matches(a: &[u8; 16], b: &[u8; 16], len: u8) -> bool {
    let whole = usize::from(len) / 8;
    if a[..whole] != b[..whole] {
        return false;
    }
    let rem = len % 8;
    if rem == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rem);
    a[whole] & mask == b[whole] & mask
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 77);

    fn all_encodings() -> Vec<IpAddr> {
        vec![
            IpAddr::V4(HOST),
            "::192.0.2.77".parse().unwrap(),
            "::ffff:192.0.2.77".parse().unwrap(),
            "::ffff:0:c000:24d".parse().unwrap(),
            "64:ff9b::c000:24d".parse().unwrap(),
            "2002:c000:24d::1".parse().unwrap(),
            "2001::3fff:fdb2".parse().unwrap(),
        ]
    }

    #[test]
    fn all_encodings_of_one_host_agree() {
        let canonical = CanonicalAddr::from(IpAddr::V4(HOST));
        for encoding in all_encodings() {
            assert_eq!(CanonicalAddr::from(encoding), canonical, "{encoding}");
        }
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let inputs: Vec<IpAddr> = all_encodings()
            .into_iter()
            .chain(["2606:4700::6810:84e5".parse().unwrap()])
            .collect();
        for input in inputs {
            let once = CanonicalAddr::from(input);
            let twice = CanonicalAddr::from(IpAddr::V6(once.octets().into()));
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn native_v6_is_untouched() {
        let addr: Ipv6Addr = "2606:4700::6810:84e5".parse().unwrap();
        let canonical = CanonicalAddr::from(addr);
        assert_eq!(canonical.octets(), addr.octets());
        assert!(!canonical.is_v4());
        assert_eq!(canonical.to_ip_addr(), IpAddr::V6(addr));
    }

    #[test]
    fn v4_round_trips() {
        let canonical = CanonicalAddr::from(HOST);
        assert!(canonical.is_v4());
        assert_eq!(canonical.to_ip_addr(), IpAddr::V4(HOST));
    }

    #[test]
    fn bit_indexing_works() {
        let addr = CanonicalAddr::from(Ipv4Addr::new(128, 0, 0, 1));
        assert!(addr.bit(96));
        assert!(!addr.bit(97));
        assert!(addr.bit(127));
        assert!(!addr.bit(0));
    }

    #[test]
    fn alias_ranges_are_recognized() {
        let teredo: Ipv6Addr = "2001::".parse().unwrap();
        assert_eq!(alias_range_of(&teredo, 32), Some("Teredo"));
        assert_eq!(alias_range_of(&teredo, 48), Some("Teredo"));
        // Shorter than the range itself: not within it.
        assert_eq!(alias_range_of(&teredo, 16), None);

        let mapped: Ipv6Addr = "::ffff:192.0.2.0".parse().unwrap();
        assert_eq!(alias_range_of(&mapped, 120), Some("v4mapped"));

        let v4compat: Ipv6Addr = "::192.0.2.0".parse().unwrap();
        assert_eq!(alias_range_of(&v4compat, 120), None);

        let native: Ipv6Addr = "2606:4700::".parse().unwrap();
        assert_eq!(alias_range_of(&native, 32), None);
    }
}
