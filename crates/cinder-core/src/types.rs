//! Data type representations for stored values.
//!
//! Each variant maps to one of the server's data types. A value is
//! owned by its dictionary entry and is replaced wholesale on write:
//! mutating commands clone the handle under the key's write lock,
//! modify the clone, and put it back. Nothing outside a lock ever
//! holds a mutable view of stored data.

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};
use bytes::Bytes;

use crate::zset::SortedSet;

/// A stored value in the keyspace.
#[derive(Debug, Clone)]
pub enum Value {
    /// Binary-safe string data. `Bytes` makes the clone-on-write
    /// discipline cheap for the most common type.
    String(Bytes),

    /// Ordered list of binary-safe elements with O(1) push/pop at
    /// both ends.
    List(VecDeque<Bytes>),

    /// Field → value map.
    Hash(AHashMap<String, Bytes>),

    /// Unordered set of unique members.
    Set(AHashSet<String>),

    /// Sorted set of unique members ordered by (score, member).
    SortedSet(SortedSet),
}

impl Value {
    /// Type name as reported by the TYPE command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::SortedSet(a), Value::SortedSet(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((m1, s1), (m2, s2))| m1 == m2 && s1 == s2)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names() {
        assert_eq!(Value::String(Bytes::from("x")).type_name(), "string");
        assert_eq!(Value::List(VecDeque::new()).type_name(), "list");
        assert_eq!(Value::Hash(AHashMap::new()).type_name(), "hash");
        assert_eq!(Value::Set(AHashSet::new()).type_name(), "set");
        assert_eq!(Value::SortedSet(SortedSet::new()).type_name(), "zset");
    }

    #[test]
    fn cross_type_never_equal() {
        assert_ne!(
            Value::String(Bytes::from("1")),
            Value::List(VecDeque::from([Bytes::from("1")]))
        );
    }

    #[test]
    fn sorted_set_equality_by_contents() {
        let mut a = SortedSet::new();
        a.add("m".into(), 1.0);
        let mut b = SortedSet::new();
        b.add("m".into(), 1.0);
        assert_eq!(Value::SortedSet(a), Value::SortedSet(b));
    }
}
