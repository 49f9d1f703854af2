//! Sets of prefix ranges, stored as a binary trie over address bits
//!
//! A [`PrefixRange`] describes a prefix together with the lengths of its more specific prefixes
//! that are considered part of the range (e.g. `10.0.0.0/8:16-24` covers every `/16` to `/24`
//! inside `10.0.0.0/8`). A [`PrefixSpace`] stores a set of such ranges in a trie whose nodes are
//! kept in a flat arena. Each node holds the ranges whose prefix ends exactly at that node, and
//! the set is kept minimal: no stored range is ever subsumed by another stored range.

use crate::error::InvalidInput;
use crate::network::ip::Prefix;
use crate::sub_range::SubRange;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct PrefixRange {
    prefix: Prefix,
    lengths: SubRange,
}

impl PrefixRange {
    pub fn new(prefix: Prefix, lengths: SubRange) -> Self {
        Self { prefix, lengths }
    }

    /// The range matching exactly `prefix` and nothing else
    pub fn exact(prefix: Prefix) -> Self {
        Self {
            prefix,
            lengths: SubRange::singleton(prefix.length() as u32),
        }
    }

    /// The range matching `prefix` and every more specific prefix inside it
    pub fn more_specifics(prefix: Prefix) -> Self {
        Self {
            prefix,
            lengths: SubRange::new(prefix.length() as u32, Prefix::MAX_LENGTH as u32)
                .expect("prefix length never exceeds 32"),
        }
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    pub fn lengths(&self) -> SubRange {
        self.lengths
    }

    /// Whether every prefix matched by `other` is also matched by `self`
    pub fn includes(&self, other: &PrefixRange) -> bool {
        self.prefix.contains_prefix(&other.prefix) && self.lengths.includes_range(&other.lengths)
    }

    pub fn includes_prefix(&self, prefix: &Prefix) -> bool {
        self.includes(&PrefixRange::exact(*prefix))
    }
}

impl Display for PrefixRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.lengths == SubRange::singleton(self.prefix.length() as u32) {
            write!(f, "{}", self.prefix)
        } else {
            write!(f, "{}:{}", self.prefix, self.lengths)
        }
    }
}

impl Debug for PrefixRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for PrefixRange {
    type Err = InvalidInput;

    // Parse ranges like `10.0.0.0/8` (exact) or `10.0.0.0/8:16-24`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |_| InvalidInput::InvalidPrefixRange(s.to_string());
        match s.split_once(':') {
            None => Ok(PrefixRange::exact(s.parse().map_err(invalid)?)),
            Some((prefix, lengths)) => Ok(PrefixRange::new(
                prefix.parse().map_err(invalid)?,
                lengths.parse().map_err(invalid)?,
            )),
        }
    }
}

#[derive(Clone, Default)]
struct TrieNode {
    ranges: Vec<PrefixRange>,
    children: [Option<usize>; 2],
}

/// A minimal set of [`PrefixRange`]s
///
/// Mutation is single-writer; once built, a `PrefixSpace` can be shared and read from any
/// number of threads.
#[derive(Clone)]
pub struct PrefixSpace {
    /// Trie nodes, the root being at index 0
    nodes: Vec<TrieNode>,
    len: usize,
}

impl PrefixSpace {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of ranges stored after subsumption
    pub fn len(&self) -> usize {
        self.len
    }

    /// Adds `range` to the space, returning whether the space changed
    ///
    /// Adding a range that is already covered by a stored range is a no-op. Adding a range that
    /// covers stored ranges removes them.
    pub fn add(&mut self, range: PrefixRange) -> bool {
        if self.contains(&range) {
            return false;
        }

        let prefix = range.prefix();
        let mut node = 0;
        for i in 0..prefix.length() {
            let bit = prefix.bit(i);
            node = match self.nodes[node].children[bit] {
                Some(child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children[bit] = Some(child);
                    child
                }
            };
        }

        self.nodes[node].ranges.push(range);
        self.len += 1;
        self.prune_subsumed(node, &range);
        true
    }

    /// Removes from the subtree rooted at `root` every range subsumed by `range` (other than
    /// `range` itself), visiting children before their parents
    fn prune_subsumed(&mut self, root: usize, range: &PrefixRange) {
        let mut pre_order = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            pre_order.push(node);
            stack.extend(self.nodes[node].children.iter().flatten());
        }

        for node in pre_order.into_iter().rev() {
            let ranges = &mut self.nodes[node].ranges;
            let before = ranges.len();
            ranges.retain(|r| r == range || !range.includes(r));
            self.len -= before - ranges.len();
        }
    }

    /// Whether `range` is subsumed by one of the stored ranges
    pub fn contains(&self, range: &PrefixRange) -> bool {
        let prefix = range.prefix();
        let mut node = 0;
        for i in 0..=prefix.length() {
            if self.nodes[node].ranges.iter().any(|r| r.includes(range)) {
                return true;
            }

            if i == prefix.length() {
                break;
            }

            match self.nodes[node].children[prefix.bit(i)] {
                Some(child) => node = child,
                None => return false,
            }
        }

        false
    }

    pub fn contains_prefix(&self, prefix: &Prefix) -> bool {
        self.contains(&PrefixRange::exact(*prefix))
    }

    pub fn contains_ip(&self, ip: Ipv4Addr) -> bool {
        self.contains_prefix(&Prefix::host(ip))
    }

    /// Adds every range of `other` to this space
    pub fn add_space(&mut self, other: &PrefixSpace) {
        for range in other.prefix_ranges() {
            self.add(range);
        }
    }

    pub fn union(&self, other: &PrefixSpace) -> PrefixSpace {
        let mut union = self.clone();
        union.add_space(other);
        union
    }

    /// The ranges of `other` that are contained in `self`
    ///
    /// Note that this is not symmetric: a range of `self` that is strictly narrower than a range
    /// of `other` does not make it into the result.
    pub fn intersection(&self, other: &PrefixSpace) -> PrefixSpace {
        other
            .prefix_ranges()
            .into_iter()
            .filter(|range| self.contains(range))
            .collect()
    }

    /// The stored ranges, in depth-first order over the trie (the `0` branch first)
    pub fn prefix_ranges(&self) -> Vec<PrefixRange> {
        let mut ranges = Vec::with_capacity(self.len);
        let mut stack = vec![0];
        while let Some(node) = stack.pop() {
            let node = &self.nodes[node];
            ranges.extend(node.ranges.iter().copied());
            stack.extend(node.children.iter().rev().flatten());
        }

        ranges
    }
}

impl Default for PrefixSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<PrefixRange> for PrefixSpace {
    fn from_iter<T: IntoIterator<Item = PrefixRange>>(iter: T) -> Self {
        let mut space = PrefixSpace::new();
        for range in iter {
            space.add(range);
        }

        space
    }
}

impl PartialEq for PrefixSpace {
    fn eq(&self, other: &Self) -> bool {
        let ours: BTreeSet<_> = self.prefix_ranges().into_iter().collect();
        let theirs: BTreeSet<_> = other.prefix_ranges().into_iter().collect();
        ours == theirs
    }
}

impl Eq for PrefixSpace {}

impl Debug for PrefixSpace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.prefix_ranges()).finish()
    }
}
