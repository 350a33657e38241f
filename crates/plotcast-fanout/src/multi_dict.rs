//! A compact multi-map.
//!
//! Almost every key holds exactly one value (one subscriber per topic,
//! one topic per subscriber), so a bare value is stored until a second
//! distinct value arrives, at which point the slot is promoted to a set.
//! A set that shrinks back to one member is demoted, and a key whose last
//! value is removed is deleted outright. No empty container ever persists.

use std::borrow::Borrow;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, hash_set};
use std::hash::Hash;

#[derive(Debug, Clone)]
enum Slot<V> {
    Single(V),
    Many(HashSet<V>),
}

/// Multi-map from a key to one or many values. Values are unordered.
#[derive(Debug, Clone)]
pub struct MultiValuedDict<K, V> {
    entries: HashMap<K, Slot<V>>,
}

impl<K, V> Default for MultiValuedDict<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> MultiValuedDict<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash + Clone,
{
    /// Create an empty multi-map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `value` with `key`. Adding a value already present is a no-op.
    pub fn add(&mut self, key: K, value: V) {
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(Slot::Single(value));
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                Slot::Single(existing) => {
                    if *existing != value {
                        let mut set = HashSet::with_capacity(2);
                        set.insert(existing.clone());
                        set.insert(value);
                        slot.insert(Slot::Many(set));
                    }
                }
                Slot::Many(set) => {
                    set.insert(value);
                }
            },
        }
    }

    /// Remove one value from `key`, deleting the key when it drains.
    ///
    /// Returns whether the value was present.
    pub fn remove_value<Q>(&mut self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let Some(slot) = self.entries.get_mut(key) else {
            return false;
        };
        let mut demoted = None;
        let drained = match slot {
            Slot::Single(existing) => {
                if existing != value {
                    return false;
                }
                true
            }
            Slot::Many(set) => {
                if !set.remove(value) {
                    return false;
                }
                if set.len() == 1 {
                    demoted = set.drain().next();
                }
                set.is_empty() && demoted.is_none()
            }
        };
        if let Some(last) = demoted {
            *slot = Slot::Single(last);
        }
        if drained {
            self.entries.remove(key);
        }
        true
    }

    /// Delete `key` and all its values unconditionally.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    /// The values stored under `key`; empty when the key is absent.
    pub fn get<Q>(&self, key: &Q) -> Values<'_, V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        match self.entries.get(key) {
            None => Values::Empty,
            Some(Slot::Single(value)) => Values::Single(Some(value)),
            Some(Slot::Many(set)) => Values::Many(set.iter()),
        }
    }

    /// Whether `value` is stored under `key`.
    pub fn contains<Q>(&self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        match self.entries.get(key) {
            None => false,
            Some(Slot::Single(existing)) => existing == value,
            Some(Slot::Many(set)) => set.contains(value),
        }
    }

    /// Whether `key` has at least one value.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Number of values stored under `key`.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        match self.entries.get(key) {
            None => 0,
            Some(Slot::Single(_)) => 1,
            Some(Slot::Many(set)) => set.len(),
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of `(key, value)` pairs.
    pub fn pair_count(&self) -> usize {
        self.entries
            .values()
            .map(|slot| match slot {
                Slot::Single(_) => 1,
                Slot::Many(set) => set.len(),
            })
            .fold(0_usize, usize::saturating_add)
    }

    /// Iterate over the keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    #[cfg(test)]
    fn is_promoted<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        matches!(self.entries.get(key), Some(Slot::Many(_)))
    }
}

/// Iterator over the values stored under one key.
#[derive(Debug)]
pub enum Values<'a, V> {
    /// The key is absent.
    Empty,
    /// The key holds a bare value.
    Single(Option<&'a V>),
    /// The key holds a set.
    Many(hash_set::Iter<'a, V>),
}

impl<'a, V> Iterator for Values<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Empty => None,
            Self::Single(value) => value.take(),
            Self::Many(iter) => iter.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(dict: &MultiValuedDict<&'static str, u32>, key: &str) -> Vec<u32> {
        let mut values: Vec<u32> = dict.get(key).copied().collect();
        values.sort_unstable();
        values
    }

    #[test]
    fn single_value_is_stored_bare() {
        let mut dict = MultiValuedDict::new();
        dict.add("t", 1);
        assert_eq!(sorted(&dict, "t"), vec![1]);
        assert!(!dict.is_promoted("t"));
    }

    #[test]
    fn second_add_promotes_and_duplicate_does_not() {
        let mut dict = MultiValuedDict::new();
        dict.add("t", 1);
        dict.add("t", 1);
        assert!(!dict.is_promoted("t"));
        dict.add("t", 2);
        assert!(dict.is_promoted("t"));
        assert_eq!(sorted(&dict, "t"), vec![1, 2]);
    }

    #[test]
    fn removing_last_value_deletes_the_key() {
        let mut dict = MultiValuedDict::new();
        dict.add("t", 1);
        dict.add("t", 2);
        dict.add("t", 3);
        assert!(dict.remove_value("t", &2));
        assert_eq!(sorted(&dict, "t"), vec![1, 3]);
        assert!(dict.remove_value("t", &1));
        assert!(!dict.is_promoted("t"));
        assert!(dict.remove_value("t", &3));
        assert_eq!(dict.get("t").count(), 0);
        assert!(!dict.contains_key("t"));
        assert!(dict.is_empty());
    }

    #[test]
    fn removing_absent_value_changes_nothing() {
        let mut dict = MultiValuedDict::new();
        dict.add("t", 1);
        assert!(!dict.remove_value("t", &9));
        assert!(!dict.remove_value("missing", &1));
        assert_eq!(sorted(&dict, "t"), vec![1]);
    }

    #[test]
    fn remove_key_is_unconditional() {
        let mut dict = MultiValuedDict::new();
        dict.add("t", 1);
        dict.add("t", 2);
        assert!(dict.remove("t"));
        assert!(!dict.remove("t"));
        assert!(dict.is_empty());
    }

    #[test]
    fn counts_pairs_across_keys() {
        let mut dict = MultiValuedDict::new();
        dict.add("a", 1);
        dict.add("a", 2);
        dict.add("b", 1);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.pair_count(), 3);
        assert_eq!(dict.count("a"), 2);
        assert!(dict.contains("b", &1));
        assert!(!dict.contains("b", &2));
    }

    #[test]
    fn arbitrary_add_remove_sequences_leave_no_empty_slots() {
        let mut dict = MultiValuedDict::new();
        let keys = ["a", "b", "c"];
        // Deterministic pseudo-random walk over add/remove.
        let mut state = 17_u32;
        for _ in 0..2_000 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let key = keys[(state >> 8) as usize % keys.len()];
            let value = (state >> 16) % 4;
            if state & 1 == 0 {
                dict.add(key, value);
            } else {
                dict.remove_value(key, &value);
            }
            for key in keys {
                assert_eq!(dict.contains_key(key), dict.count(key) > 0);
            }
        }
        for key in keys {
            for value in 0..4 {
                dict.remove_value(key, &value);
            }
        }
        assert!(dict.is_empty());
    }
}
