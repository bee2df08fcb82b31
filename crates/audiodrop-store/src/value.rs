//! Typed values held by the store.

use std::collections::{BTreeSet, HashMap, VecDeque};

/// A stored value.
#[derive(Debug, Clone)]
pub enum Value {
    /// A plain string (also used for counters and JSON documents).
    Scalar(String),
    /// Field → value map.
    Hash(HashMap<String, String>),
    /// Double-ended list; new elements go to the front.
    List(VecDeque<String>),
    /// Unordered unique members, iterated in lexical order.
    Set(BTreeSet<String>),
    /// Members ordered by integer score, ties by insertion.
    SortedSet(SortedSet),
}

impl Value {
    /// Short type name used in errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "string",
            Self::Hash(_) => "hash",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::SortedSet(_) => "zset",
        }
    }

    /// Whether a collection has become empty.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Self::Scalar(_) => false,
            Self::Hash(h) => h.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::SortedSet(z) => z.is_empty(),
        }
    }
}

/// A score-ordered set of unique members.
///
/// Ordering is `(score, seq)` where `seq` is a store-wide insertion counter,
/// so members with equal scores come out in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    scores: HashMap<String, (i64, u64)>,
    order: BTreeSet<(i64, u64, String)>,
}

impl SortedSet {
    /// Insert or re-score a member. Returns `true` if it was new.
    pub fn insert(&mut self, member: &str, score: i64, seq: u64) -> bool {
        let added = match self.scores.insert(member.to_string(), (score, seq)) {
            Some((old_score, old_seq)) => {
                self.order.remove(&(old_score, old_seq, member.to_string()));
                false
            }
            None => true,
        };
        self.order.insert((score, seq, member.to_string()));
        added
    }

    /// Remove a member. Returns `true` if it was present.
    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some((score, seq)) => {
                self.order.remove(&(score, seq, member.to_string()));
                true
            }
            None => false,
        }
    }

    /// Remove and return the lowest-ordered member.
    pub fn pop_min(&mut self) -> Option<(String, i64)> {
        let (score, _, member) = self.order.pop_first()?;
        self.scores.remove(&member);
        Some((member, score))
    }

    /// Score of a member.
    pub fn score(&self, member: &str) -> Option<i64> {
        self.scores.get(member).map(|(score, _)| *score)
    }

    /// Members in order with their scores.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.order.iter().map(|(score, _, m)| (m.as_str(), *score))
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_set_orders_by_score_then_insertion() {
        let mut z = SortedSet::default();
        z.insert("b", 1, 1);
        z.insert("a", 0, 2);
        z.insert("c", 1, 3);

        let order: Vec<_> = z.iter().map(|(m, _)| m.to_string()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sorted_set_rescore() {
        let mut z = SortedSet::default();
        assert!(z.insert("a", 5, 1));
        assert!(!z.insert("a", 1, 2));
        assert_eq!(z.len(), 1);
        assert_eq!(z.score("a"), Some(1));
        assert_eq!(z.pop_min(), Some(("a".to_string(), 1)));
        assert!(z.is_empty());
    }
}
