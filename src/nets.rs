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

//! The network-prefix table for explicit per-subnet overrides.
//!
//! A [`PrefixTable`] is a binary trie over the canonical 128-bit
//! address space (see [`crate::addr`]). It is built once per
//! configuration generation from raw `(network, prefix length,
//! datacenter list)` entries and is immutable afterward.
//!
//! Construction inserts entries most specific first, so that a more
//! specific entry masks the corresponding portion of any less specific
//! one, and then runs a bottom-up merge pass: whenever the two halves
//! of a network carry identical lists, they collapse into a single
//! entry for the containing network. The merge repeats upward until no
//! further collapse is possible, leaving the minimal number of maximal
//! congruent entries. Matched prefix lengths reported by
//! [`PrefixTable::lookup`] therefore describe the widest network over
//! which the returned list is valid, which is exactly what EDNS Client
//! Subnet scope reporting needs.

use std::sync::Arc;

use log::warn;

use crate::addr::CanonicalAddr;
use crate::dc::DcList;

////////////////////////////////////////////////////////////////////////
// BUILD INPUT                                                        //
////////////////////////////////////////////////////////////////////////

/// One raw entry for [`PrefixTable::build`]. The network address and
/// prefix length are in canonical 128-bit terms (IPv4 networks have 96
/// added to their prefix lengths by the configuration layer).
#[derive(Clone, Debug)]
pub struct Entry {
    pub net: CanonicalAddr,
    pub prefix_len: u8,
    pub dclist: Arc<DcList>,
}

/// A recoverable build-time condition: an entry was entirely shadowed
/// by more specific entries covering the same effective network with
/// different data. The shadowing data is kept; the shadowed entry is
/// dropped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MergeConflict {
    pub net: CanonicalAddr,
    pub prefix_len: u8,
}

////////////////////////////////////////////////////////////////////////
// THE PREFIX TABLE                                                   //
////////////////////////////////////////////////////////////////////////

/// An immutable merged network-prefix table. See the module
/// documentation for construction and merge semantics.
#[derive(Debug, Default)]
pub struct PrefixTable {
    root: Node,
    entries: usize,
}

#[derive(Debug, Default)]
struct Node {
    dclist: Option<Arc<DcList>>,
    zero: Option<Box<Node>>,
    one: Option<Box<Node>>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.zero.is_none() && self.one.is_none()
    }

    fn child(&self, bit: bool) -> Option<&Node> {
        if bit {
            self.one.as_deref()
        } else {
            self.zero.as_deref()
        }
    }

    fn child_slot(&mut self, bit: bool) -> &mut Option<Box<Node>> {
        if bit {
            &mut self.one
        } else {
            &mut self.zero
        }
    }
}

/// The result of a [`PrefixTable::lookup`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Lookup<'a> {
    /// An entry covers the address. The prefix length is the merged
    /// entry's, i.e. the widest network over which the list applies.
    Hit(&'a Arc<DcList>, u8),

    /// No entry covers the address. The prefix length is the depth at
    /// which the miss was established: every address sharing that many
    /// leading bits misses identically, so an answer obtained elsewhere
    /// is cacheable over at most that network.
    Miss(u8),
}

impl PrefixTable {
    /// Builds a `PrefixTable` from raw entries.
    ///
    /// Host bits below each entry's prefix length are masked off with a
    /// warning. Entries fully shadowed by more specific entries with
    /// different data are dropped, logged, and reported in the returned
    /// conflict list; this is never fatal.
    pub fn build(mut entries: Vec<Entry>) -> (Self, Vec<MergeConflict>) {
        for entry in &mut entries {
            mask_host_bits(entry);
        }

        // Most specific first, so that later (less specific) entries
        // only fill parts of the space not already claimed.
        entries.sort_by(|a, b| b.prefix_len.cmp(&a.prefix_len));

        let mut root = Node::default();
        let mut conflicts = Vec::new();
        for entry in entries {
            if !insert(&mut root, &entry) {
                warn!(
                    "nets entry {}/{} is shadowed by more specific entries \
                     with different data; dropping it",
                    entry.net, entry.prefix_len,
                );
                conflicts.push(MergeConflict {
                    net: entry.net,
                    prefix_len: entry.prefix_len,
                });
            }
        }
        merge(&mut root);
        let entries = count_entries(&root);
        (Self { root, entries }, conflicts)
    }

    /// Looks up the entry covering `addr`. See [`Lookup`].
    pub fn lookup(&self, addr: CanonicalAddr) -> Lookup<'_> {
        let mut node = &self.root;
        let mut depth = 0;
        loop {
            if let Some(dclist) = &node.dclist {
                return Lookup::Hit(dclist, depth);
            }
            if node.is_leaf() {
                // Only possible at the root of an empty table.
                return Lookup::Miss(0);
            }
            match node.child(addr.bit(depth)) {
                Some(child) => {
                    node = child;
                    depth += 1;
                }
                None => return Lookup::Miss(depth + 1),
            }
        }
    }

    /// Returns the number of entries after merging.
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Returns whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

/// Masks off any bits of `entry.net` below its prefix length, warning
/// if any were set.
fn mask_host_bits(entry: &mut Entry) {
    let mut octets = entry.net.octets();
    let mut changed = false;
    for (i, octet) in octets.iter_mut().enumerate() {
        let bit_offset = i as u8 * 8;
        let keep = if entry.prefix_len >= bit_offset + 8 {
            0xff
        } else if entry.prefix_len <= bit_offset {
            0x00
        } else {
            0xffu8 << (8 - (entry.prefix_len - bit_offset))
        };
        if *octet & !keep != 0 {
            changed = true;
            *octet &= keep;
        }
    }
    if changed {
        let masked = CanonicalAddr::from(std::net::Ipv6Addr::from(octets));
        warn!(
            "nets entry {}/{} has bits set below its prefix length; using {}",
            entry.net, entry.prefix_len, masked,
        );
        entry.net = masked;
    }
}

/// Inserts `entry` into the trie rooted at `node`. Returns `false` if
/// the entry contributed nothing (it was entirely shadowed by more
/// specific entries with different data).
fn insert(root: &mut Node, entry: &Entry) -> bool {
    let mut node = root;
    for depth in 0..entry.prefix_len {
        node = &mut **node
            .child_slot(entry.net.bit(depth))
            .get_or_insert_with(Box::default);
    }
    fill(node, &entry.dclist)
}

/// Fills all vacant leaf regions under `node` with `dclist`. Returns
/// whether anything was filled or an equal value was already present.
fn fill(node: &mut Node, dclist: &Arc<DcList>) -> bool {
    if let Some(existing) = &node.dclist {
        return existing == dclist;
    }
    if node.is_leaf() {
        node.dclist = Some(dclist.clone());
        return true;
    }
    // More specific entries occupy part of this region; claim only the
    // vacant halves.
    let mut filled = false;
    for bit in [false, true] {
        let slot = node.child_slot(bit);
        if let Some(child) = slot.as_deref_mut() {
            filled |= fill(child, dclist);
        } else {
            *slot = Some(Box::new(Node {
                dclist: Some(dclist.clone()),
                ..Node::default()
            }));
            filled = true;
        }
    }
    filled
}

/// The bottom-up merge pass: collapses sibling leaves carrying equal
/// lists into their parent, repeatedly, in post-order.
fn merge(node: &mut Node) {
    if let Some(zero) = &mut node.zero {
        merge(zero);
    }
    if let Some(one) = &mut node.one {
        merge(one);
    }
    if let (Some(zero), Some(one)) = (&node.zero, &node.one) {
        if zero.is_leaf() && one.is_leaf() && zero.dclist.is_some() && zero.dclist == one.dclist {
            node.dclist = node.zero.take().and_then(|z| z.dclist);
            node.one = None;
        }
    }
}

fn count_entries(node: &Node) -> usize {
    usize::from(node.dclist.is_some())
        + node.zero.as_deref().map_or(0, count_entries)
        + node.one.as_deref().map_or(0, count_entries)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
