//! Sorted set: unique members with float scores, ordered by
//! (score, member).
//!
//! Pairs a member→score hash index (O(1) score lookups) with an
//! arena-backed skiplist (O(log n) rank and range queries). Members are
//! unique; the wrapper removes a member's old skiplist node before
//! re-inserting it under a new score, since the skiplist itself only
//! deduplicates exact (score, member) pairs.

pub mod skiplist;

use ahash::AHashMap;

pub use skiplist::Skiplist;

/// One end of a score range, with open/closed exclusivity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Value { score: f64, exclusive: bool },
}

impl ScoreBound {
    pub fn inclusive(score: f64) -> Self {
        ScoreBound::Value {
            score,
            exclusive: false,
        }
    }

    pub fn exclusive(score: f64) -> Self {
        ScoreBound::Value {
            score,
            exclusive: true,
        }
    }

    /// Parses the textual range syntax: a float, `(float` for an
    /// exclusive bound, or `-inf`/`+inf`/`inf`.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "-inf" => return Some(ScoreBound::NegInf),
            "+inf" | "inf" => return Some(ScoreBound::PosInf),
            _ => {}
        }
        let (raw, exclusive) = match text.strip_prefix('(') {
            Some(rest) => (rest, true),
            None => (text, false),
        };
        let score: f64 = raw.parse().ok()?;
        if score.is_nan() {
            return None;
        }
        Some(ScoreBound::Value { score, exclusive })
    }

    /// Used as a minimum: does `score` lie above this bound?
    pub fn allows_above(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Value {
                score: v,
                exclusive,
            } => {
                if *exclusive {
                    *v < score
                } else {
                    *v <= score
                }
            }
        }
    }

    /// Used as a maximum: does `score` lie below this bound?
    pub fn allows_below(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Value {
                score: v,
                exclusive,
            } => {
                if *exclusive {
                    score < *v
                } else {
                    score <= *v
                }
            }
        }
    }

    /// With `self` as minimum and `other` as maximum: can no score at
    /// all satisfy both bounds?
    pub fn empty_range_with(&self, max: &ScoreBound) -> bool {
        match (self, max) {
            (ScoreBound::PosInf, _) | (_, ScoreBound::NegInf) => true,
            (ScoreBound::NegInf, _) | (_, ScoreBound::PosInf) => false,
            (
                ScoreBound::Value {
                    score: lo,
                    exclusive: lo_ex,
                },
                ScoreBound::Value {
                    score: hi,
                    exclusive: hi_ex,
                },
            ) => lo > hi || (lo == hi && (*lo_ex || *hi_ex)),
        }
    }
}

/// A set of unique string members, each with an `f64` score, ordered by
/// (score ascending, member lexicographic ascending).
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    members: AHashMap<String, f64>,
    index: Skiplist,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Adds a member or updates its score. Returns `true` when the
    /// member is new.
    pub fn add(&mut self, member: String, score: f64) -> bool {
        if let Some(&old) = self.members.get(&member) {
            if old != score {
                self.index.remove(&member, old);
                self.index.insert(member.clone(), score);
                self.members.insert(member, score);
            }
            false
        } else {
            self.index.insert(member.clone(), score);
            self.members.insert(member, score);
            true
        }
    }

    /// Removes a member. Returns `true` if it existed.
    pub fn remove(&mut self, member: &str) -> bool {
        match self.members.remove(member) {
            Some(score) => {
                self.index.remove(member, score);
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.members.get(member).copied()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.contains_key(member)
    }

    /// 0-based rank; lowest (score, member) is rank 0. `desc` counts
    /// from the highest instead.
    pub fn rank(&self, member: &str, desc: bool) -> Option<u64> {
        let score = self.score(member)?;
        let r = self.index.rank(member, score);
        if r == 0 {
            return None;
        }
        Some(if desc { self.index.len() - r } else { r - 1 })
    }

    /// Number of members with scores inside the range.
    pub fn count(&self, min: &ScoreBound, max: &ScoreBound) -> usize {
        self.index.iter_score_range(min, max).count()
    }

    /// Members in the 0-based rank window [start, stop), ascending, or
    /// descending when `desc` is set (rank 0 is then the highest pair).
    pub fn range_by_rank(&self, start: u64, stop: u64, desc: bool) -> Vec<(String, f64)> {
        let len = self.index.len();
        let stop = stop.min(len);
        if start >= stop {
            return Vec::new();
        }
        let take = (stop - start) as usize;
        if desc {
            self.index
                .iter_rev_from_rank(len - start)
                .take(take)
                .map(|(m, s)| (m.to_string(), s))
                .collect()
        } else {
            self.index
                .iter_from_rank(start + 1)
                .take(take)
                .map(|(m, s)| (m.to_string(), s))
                .collect()
        }
    }

    /// Members with scores inside the range, ascending or descending.
    pub fn range_by_score(
        &self,
        min: &ScoreBound,
        max: &ScoreBound,
        desc: bool,
    ) -> Vec<(String, f64)> {
        if desc {
            self.index
                .iter_score_range_rev(min, max)
                .map(|(m, s)| (m.to_string(), s))
                .collect()
        } else {
            self.index
                .iter_score_range(min, max)
                .map(|(m, s)| (m.to_string(), s))
                .collect()
        }
    }

    /// Whether any member's score falls inside the range.
    pub fn has_in_range(&self, min: &ScoreBound, max: &ScoreBound) -> bool {
        self.index.has_in_range(min, max)
    }

    /// Removes members with scores inside the range; returns them in
    /// ascending order.
    pub fn remove_range_by_score(
        &mut self,
        min: &ScoreBound,
        max: &ScoreBound,
    ) -> Vec<(String, f64)> {
        let removed = self.index.remove_range_by_score(min, max);
        for (member, _) in &removed {
            self.members.remove(member);
        }
        removed
    }

    /// Removes members in the 0-based rank window [start, stop);
    /// returns them in ascending order.
    pub fn remove_range_by_rank(&mut self, start: u64, stop: u64) -> Vec<(String, f64)> {
        let removed = self.index.remove_range_by_rank(start + 1, stop + 1);
        for (member, _) in &removed {
            self.members.remove(member);
        }
        removed
    }

    /// Ascending iteration over (member, score).
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.index.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(pairs: &[(&str, f64)]) -> SortedSet {
        let mut set = SortedSet::new();
        for (m, s) in pairs {
            set.add(m.to_string(), *s);
        }
        set
    }

    #[test]
    fn add_reports_new_vs_update() {
        let mut set = SortedSet::new();
        assert!(set.add("a".into(), 1.0));
        assert!(!set.add("a".into(), 2.0));
        assert_eq!(set.score("a"), Some(2.0));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn score_update_moves_rank() {
        let mut set = filled(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(set.rank("a", false), Some(0));
        set.add("a".into(), 10.0);
        assert_eq!(set.rank("a", false), Some(2));
        assert_eq!(set.rank("b", false), Some(0));
        // the index must not keep a stale node for the old score
        assert_eq!(set.len(), 3);
        assert_eq!(set.iter().count(), 3);
    }

    #[test]
    fn remove_cleans_both_structures() {
        let mut set = filled(&[("a", 1.0), ("b", 2.0)]);
        assert!(set.remove("a"));
        assert!(!set.remove("a"));
        assert_eq!(set.score("a"), None);
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn rank_forward_and_reverse() {
        let set = filled(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(set.rank("a", false), Some(0));
        assert_eq!(set.rank("a", true), Some(2));
        assert_eq!(set.rank("c", true), Some(0));
        assert_eq!(set.rank("missing", false), None);
    }

    #[test]
    fn range_by_rank_windows() {
        let set = filled(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        assert_eq!(
            set.range_by_rank(1, 3, false),
            vec![("b".to_string(), 2.0), ("c".to_string(), 3.0)]
        );
        assert_eq!(
            set.range_by_rank(0, 2, true),
            vec![("d".to_string(), 4.0), ("c".to_string(), 3.0)]
        );
        assert!(set.range_by_rank(3, 3, false).is_empty());
        // stop beyond the end is clamped
        assert_eq!(set.range_by_rank(2, 100, false).len(), 2);
    }

    #[test]
    fn range_by_score_with_bounds() {
        let set = filled(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let all = set.range_by_score(&ScoreBound::NegInf, &ScoreBound::PosInf, false);
        assert_eq!(all.len(), 3);

        let open = set.range_by_score(
            &ScoreBound::exclusive(1.0),
            &ScoreBound::inclusive(3.0),
            false,
        );
        assert_eq!(
            open,
            vec![("b".to_string(), 2.0), ("c".to_string(), 3.0)]
        );

        let desc = set.range_by_score(&ScoreBound::NegInf, &ScoreBound::PosInf, true);
        assert_eq!(desc.first().map(|(m, _)| m.as_str()), Some("c"));
    }

    #[test]
    fn count_respects_exclusivity() {
        let set = filled(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(
            set.count(&ScoreBound::inclusive(1.0), &ScoreBound::inclusive(3.0)),
            3
        );
        assert_eq!(
            set.count(&ScoreBound::exclusive(1.0), &ScoreBound::exclusive(3.0)),
            1
        );
    }

    #[test]
    fn remove_range_by_score_empties_window() {
        let mut set = filled(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        let min = ScoreBound::inclusive(2.0);
        let max = ScoreBound::inclusive(3.0);
        let removed = set.remove_range_by_score(&min, &max);
        assert_eq!(removed.len(), 2);
        assert!(!set.has_in_range(&min, &max));
        assert_eq!(set.len(), 2);
        assert_eq!(set.score("b"), None);
    }

    #[test]
    fn remove_range_by_rank_zero_based() {
        let mut set = filled(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let removed = set.remove_range_by_rank(0, 2);
        assert_eq!(
            removed,
            vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)]
        );
        assert_eq!(set.len(), 1);
        assert_eq!(set.rank("c", false), Some(0));
    }

    #[test]
    fn bound_parsing() {
        assert_eq!(ScoreBound::parse("-inf"), Some(ScoreBound::NegInf));
        assert_eq!(ScoreBound::parse("+inf"), Some(ScoreBound::PosInf));
        assert_eq!(ScoreBound::parse("3.5"), Some(ScoreBound::inclusive(3.5)));
        assert_eq!(ScoreBound::parse("(3.5"), Some(ScoreBound::exclusive(3.5)));
        assert_eq!(ScoreBound::parse("abc"), None);
        assert_eq!(ScoreBound::parse("(nan"), None);
    }
}
