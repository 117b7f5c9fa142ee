//! Arena-backed skiplist ordered by (score, member).
//!
//! Nodes live in a flat arena and refer to each other by index, keeping
//! ownership single-rooted: forward links, backward links, and the tail
//! are all `Option<usize>` into the arena, and removed slots go on a
//! free list for reuse. Slot 0 is the head sentinel and is never
//! removed.
//!
//! Every forward link carries a span — the number of level-0 steps the
//! link jumps over — which is what makes rank queries O(log n). The
//! level of a new node is drawn from a geometric distribution
//! (probability 1/4 per extra level, capped), independent of the data,
//! so the expected O(log n) shape needs no rebalancing.
//!
//! Invariants:
//! - the level-0 chain is a fully sorted doubly-linked list of all
//!   members (forward links plus backward indices),
//! - no two live nodes share (score, member),
//! - for every level, the spans along the chain sum to `len + 1`.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;
use rand::Rng;

use super::ScoreBound;

/// Maximum node level. 16 levels cover ~4^16 entries at p = 1/4.
const MAX_LEVEL: usize = 16;

/// Head sentinel slot.
const HEAD: usize = 0;

#[derive(Debug, Clone, Default)]
struct Link {
    forward: Option<usize>,
    /// Level-0 nodes this link skips over (including the target).
    span: u64,
}

#[derive(Debug, Clone)]
struct Node {
    member: String,
    score: f64,
    backward: Option<usize>,
    /// One link per level; `links.len()` is the node's level.
    links: Vec<Link>,
}

/// Skiplist over (score, member) pairs with per-level spans.
#[derive(Debug, Clone)]
pub struct Skiplist {
    arena: Vec<Node>,
    free: Vec<usize>,
    tail: Option<usize>,
    len: u64,
    level: usize,
}

impl Skiplist {
    pub fn new() -> Self {
        let head = Node {
            member: String::new(),
            score: 0.0,
            backward: None,
            links: vec![Link::default(); MAX_LEVEL],
        };
        Self {
            arena: vec![head],
            free: Vec::new(),
            tail: None,
            len: 0,
            level: 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Compares a live node against a search key.
    fn cmp_node(&self, id: usize, score: f64, member: &str) -> Ordering {
        let node = &self.arena[id];
        OrderedFloat(node.score)
            .cmp(&OrderedFloat(score))
            .then_with(|| node.member.as_str().cmp(member))
    }

    /// Draws a level from the geometric distribution: each extra level
    /// with probability 1/4, capped at `MAX_LEVEL`.
    fn random_level() -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen_ratio(1, 4) {
            level += 1;
        }
        level
    }

    /// Takes a slot from the free list or grows the arena.
    fn alloc(&mut self, member: String, score: f64, level: usize) -> usize {
        let node = Node {
            member,
            score,
            backward: None,
            links: vec![Link::default(); level],
        };
        match self.free.pop() {
            Some(id) => {
                self.arena[id] = node;
                id
            }
            None => {
                self.arena.push(node);
                self.arena.len() - 1
            }
        }
    }

    /// Returns a slot to the free list. The shell stays in the arena;
    /// clearing the links and member releases the heap data now.
    fn release(&mut self, id: usize) {
        self.arena[id].member = String::new();
        self.arena[id].links = Vec::new();
        self.arena[id].backward = None;
        self.free.push(id);
    }

    /// Inserts a new (member, score) node. Callers keep members unique:
    /// an existing entry for the member must be removed first — the
    /// list itself only deduplicates exact (score, member) pairs.
    pub fn insert(&mut self, member: String, score: f64) {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0u64; MAX_LEVEL];

        // find the insertion point, tracking the rank crossed to reach
        // the predecessor at every level
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.arena[x].links[i].forward {
                if self.cmp_node(next, score, &member) == Ordering::Less {
                    rank[i] += self.arena[x].links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        if let Some(next) = self.arena[update[0]].links[0].forward {
            if self.cmp_node(next, score, &member) == Ordering::Equal {
                return; // exact duplicate, nothing to do
            }
        }

        let level = Self::random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = HEAD;
                self.arena[HEAD].links[i].span = self.len;
            }
            self.level = level;
        }

        let id = self.alloc(member, score, level);
        for i in 0..level {
            let upd = update[i];
            let upd_forward = self.arena[upd].links[i].forward;
            let upd_span = self.arena[upd].links[i].span;

            self.arena[id].links[i].forward = upd_forward;
            self.arena[upd].links[i].forward = Some(id);

            // split the predecessor's span around the new node
            self.arena[id].links[i].span = upd_span - (rank[0] - rank[i]);
            self.arena[upd].links[i].span = (rank[0] - rank[i]) + 1;
        }
        for i in level..self.level {
            self.arena[update[i]].links[i].span += 1;
        }

        self.arena[id].backward = if update[0] == HEAD {
            None
        } else {
            Some(update[0])
        };
        match self.arena[id].links[0].forward {
            Some(next) => self.arena[next].backward = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
    }

    /// Unlinks `id` at every level given the per-level predecessors,
    /// shrinking the list level when top levels empty out.
    fn remove_node(&mut self, id: usize, update: &[usize; MAX_LEVEL]) {
        for i in 0..self.level {
            let upd = update[i];
            if self.arena[upd].links[i].forward == Some(id) {
                let gone_span = self.arena[id].links[i].span;
                let gone_forward = self.arena[id].links[i].forward;
                self.arena[upd].links[i].span += gone_span - 1;
                self.arena[upd].links[i].forward = gone_forward;
            } else {
                self.arena[upd].links[i].span -= 1;
            }
        }
        let backward = self.arena[id].backward;
        match self.arena[id].links[0].forward {
            Some(next) => self.arena[next].backward = backward,
            None => self.tail = backward,
        }
        while self.level > 1 && self.arena[HEAD].links[self.level - 1].forward.is_none() {
            self.level -= 1;
        }
        self.len -= 1;
        self.release(id);
    }

    /// Removes the node with exactly this (member, score). Returns
    /// whether it was found.
    pub fn remove(&mut self, member: &str, score: f64) -> bool {
        let mut update = [HEAD; MAX_LEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[x].links[i].forward {
                if self.cmp_node(next, score, member) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        match self.arena[update[0]].links[0].forward {
            Some(id) if self.cmp_node(id, score, member) == Ordering::Equal => {
                self.remove_node(id, &update);
                true
            }
            _ => false,
        }
    }

    /// 1-based rank of (member, score); 0 when absent.
    pub fn rank(&self, member: &str, score: f64) -> u64 {
        let mut rank = 0u64;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[x].links[i].forward {
                if self.cmp_node(next, score, member) != Ordering::Greater {
                    rank += self.arena[x].links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            if x != HEAD && self.arena[x].member == member {
                return rank;
            }
        }
        0
    }

    /// 1-based lookup by rank.
    pub fn by_rank(&self, rank: u64) -> Option<(&str, f64)> {
        self.node_by_rank(rank)
            .map(|id| (self.arena[id].member.as_str(), self.arena[id].score))
    }

    fn node_by_rank(&self, rank: u64) -> Option<usize> {
        if rank == 0 || rank > self.len {
            return None;
        }
        let mut traversed = 0u64;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[x].links[i].forward {
                if traversed + self.arena[x].links[i].span <= rank {
                    traversed += self.arena[x].links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            if traversed == rank {
                return Some(x);
            }
        }
        None
    }

    /// Whether any node's score falls inside [min, max].
    pub fn has_in_range(&self, min: &ScoreBound, max: &ScoreBound) -> bool {
        if min.empty_range_with(max) {
            return false;
        }
        // the last node must clear the minimum...
        let Some(tail) = self.tail else {
            return false;
        };
        if !min.allows_above(self.arena[tail].score) {
            return false;
        }
        // ...and the first node must clear the maximum
        let Some(first) = self.arena[HEAD].links[0].forward else {
            return false;
        };
        max.allows_below(self.arena[first].score)
    }

    /// First node with a score inside the range.
    pub fn first_in_range(&self, min: &ScoreBound, max: &ScoreBound) -> Option<(&str, f64)> {
        self.first_id_in_range(min, max)
            .map(|id| (self.arena[id].member.as_str(), self.arena[id].score))
    }

    fn first_id_in_range(&self, min: &ScoreBound, max: &ScoreBound) -> Option<usize> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[x].links[i].forward {
                if !min.allows_above(self.arena[next].score) {
                    x = next;
                } else {
                    break;
                }
            }
        }
        // an in-range node exists, so the successor is present
        let id = self.arena[x].links[0].forward?;
        if max.allows_below(self.arena[id].score) {
            Some(id)
        } else {
            None
        }
    }

    /// Last node with a score inside the range.
    pub fn last_in_range(&self, min: &ScoreBound, max: &ScoreBound) -> Option<(&str, f64)> {
        self.last_id_in_range(min, max)
            .map(|id| (self.arena[id].member.as_str(), self.arena[id].score))
    }

    fn last_id_in_range(&self, min: &ScoreBound, max: &ScoreBound) -> Option<usize> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[x].links[i].forward {
                if max.allows_below(self.arena[next].score) {
                    x = next;
                } else {
                    break;
                }
            }
        }
        if x != HEAD && min.allows_above(self.arena[x].score) {
            Some(x)
        } else {
            None
        }
    }

    /// Ascending iteration over nodes whose score lies inside the range.
    pub fn iter_score_range(
        &self,
        min: &ScoreBound,
        max: &ScoreBound,
    ) -> impl Iterator<Item = (&str, f64)> + '_ {
        let max = *max;
        Iter {
            list: self,
            next: self.first_id_in_range(min, &max),
        }
        .take_while(move |(_, score)| max.allows_below(*score))
    }

    /// Descending iteration over nodes whose score lies inside the range.
    pub fn iter_score_range_rev(
        &self,
        min: &ScoreBound,
        max: &ScoreBound,
    ) -> impl Iterator<Item = (&str, f64)> + '_ {
        let min = *min;
        IterRev {
            list: self,
            next: self.last_id_in_range(&min, max),
        }
        .take_while(move |(_, score)| min.allows_above(*score))
    }

    /// Ascending iteration starting at the node with the given 1-based
    /// rank.
    pub fn iter_from_rank(&self, rank: u64) -> Iter<'_> {
        Iter {
            list: self,
            next: self.node_by_rank(rank),
        }
    }

    /// Descending iteration starting at the node with the given 1-based
    /// rank.
    pub fn iter_rev_from_rank(&self, rank: u64) -> IterRev<'_> {
        IterRev {
            list: self,
            next: self.node_by_rank(rank),
        }
    }

    /// Removes every node whose score lies inside [min, max], returning
    /// the removed elements in ascending order.
    pub fn remove_range_by_score(
        &mut self,
        min: &ScoreBound,
        max: &ScoreBound,
    ) -> Vec<(String, f64)> {
        let mut update = [HEAD; MAX_LEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[x].links[i].forward {
                if min.allows_above(self.arena[next].score) {
                    break; // successor already in range
                }
                x = next;
            }
            update[i] = x;
        }

        let mut removed = Vec::new();
        let mut node = self.arena[x].links[0].forward;
        while let Some(id) = node {
            if !max.allows_below(self.arena[id].score) {
                break;
            }
            let next = self.arena[id].links[0].forward;
            removed.push((self.arena[id].member.clone(), self.arena[id].score));
            self.remove_node(id, &update);
            node = next;
        }
        removed
    }

    /// Removes nodes by 1-based rank, including `start`, excluding
    /// `stop`. Returns the removed elements in ascending order.
    pub fn remove_range_by_rank(&mut self, start: u64, stop: u64) -> Vec<(String, f64)> {
        let mut traversed = 0u64;
        let mut update = [HEAD; MAX_LEVEL];

        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.arena[x].links[i].forward {
                if traversed + self.arena[x].links[i].span < start {
                    traversed += self.arena[x].links[i].span;
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let mut removed = Vec::new();
        traversed += 1;
        let mut node = self.arena[x].links[0].forward;
        while let Some(id) = node {
            if traversed >= stop {
                break;
            }
            let next = self.arena[id].links[0].forward;
            removed.push((self.arena[id].member.clone(), self.arena[id].score));
            self.remove_node(id, &update);
            node = next;
            traversed += 1;
        }
        removed
    }

    /// Ascending iteration over the level-0 chain.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            next: self.arena[HEAD].links[0].forward,
        }
    }

    /// Descending iteration following backward links from the tail.
    pub fn iter_rev(&self) -> IterRev<'_> {
        IterRev {
            list: self,
            next: self.tail,
        }
    }
}

impl Default for Skiplist {
    fn default() -> Self {
        Self::new()
    }
}

/// Ascending iterator over (member, score).
pub struct Iter<'a> {
    list: &'a Skiplist,
    next: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = &self.list.arena[id];
        self.next = node.links[0].forward;
        Some((node.member.as_str(), node.score))
    }
}

/// Descending iterator over (member, score).
pub struct IterRev<'a> {
    list: &'a Skiplist,
    next: Option<usize>,
}

impl<'a> Iterator for IterRev<'a> {
    type Item = (&'a str, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = &self.list.arena[id];
        self.next = node.backward;
        Some((node.member.as_str(), node.score))
    }
}
