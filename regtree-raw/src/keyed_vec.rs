//! Insertion-ordered map with positional access
//!
//! [`KeyedVec`] backs every name-to-child table in the register tree and the
//! symbol tables of enum and bitmask datatypes. Keys are unique, iteration
//! follows insertion order, and entries can be addressed either by key or by
//! their integer position.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct KeyedVec<K, V> {
    entries: Vec<(K, V)>,
    index: HashMap<K, usize>,
}

impl<K, V> Default for KeyedVec<K, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V> KeyedVec<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite
    ///
    /// Overwriting an existing key replaces its value in place and keeps its
    /// position. Returns the previous value, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&pos) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[pos].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.index.get(key) {
            Some(&pos) => Some(&mut self.entries[pos].1),
            None => None,
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Position of `key` in insertion order
    pub fn position<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).copied()
    }

    /// Value at position `pos`
    pub fn at(&self, pos: usize) -> Option<&V> {
        self.entries.get(pos).map(|(_, v)| v)
    }

    /// Key stored at position `pos`
    pub fn key_at(&self, pos: usize) -> Option<&K> {
        self.entries.get(pos).map(|(k, _)| k)
    }

    /// Remove the entry at `pos`, shifting every later entry down by one
    pub fn erase(&mut self, pos: usize) -> Option<(K, V)> {
        if pos >= self.entries.len() {
            return None;
        }
        let (key, value) = self.entries.remove(pos);
        self.index.remove(&key);
        for (k, _) in &self.entries[pos..] {
            if let Some(slot) = self.index.get_mut(k) {
                *slot -= 1;
            }
        }
        Some((key, value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl<K: Eq + Hash + Clone, V> FromIterator<(K, V)> for KeyedVec<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = KeyedVec::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KeyedVec<String, u32> {
        ["alpha", "beta", "gamma", "delta"]
            .iter()
            .enumerate()
            .map(|(i, k)| (k.to_string(), i as u32))
            .collect()
    }

    #[test]
    fn test_insertion_order_is_index_order() {
        let map = sample();
        assert_eq!(map.len(), 4);
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, ["alpha", "beta", "gamma", "delta"]);
        for i in 0..4 {
            assert_eq!(map.at(i), Some(&(i as u32)));
        }
        assert_eq!(map.key_at(2).map(String::as_str), Some("gamma"));
        assert_eq!(map.position("delta"), Some(3));
    }

    #[test]
    fn test_reinsert_overwrites_in_place() {
        let mut map = sample();
        let old = map.insert("beta".to_string(), 42);
        assert_eq!(old, Some(1));
        assert_eq!(map.len(), 4);
        assert_eq!(map.position("beta"), Some(1));
        assert_eq!(map.get("beta"), Some(&42));
        assert_eq!(map.at(1), Some(&42));
    }

    #[test]
    fn test_erase_renumbers() {
        let mut map = sample();
        let removed = map.erase(1);
        assert_eq!(removed, Some(("beta".to_string(), 1)));
        assert_eq!(map.len(), 3);
        assert_eq!(map.position("gamma"), Some(1));
        assert_eq!(map.position("delta"), Some(2));
        assert_eq!(map.key_at(1).map(String::as_str), Some("gamma"));
        assert!(!map.contains_key("beta"));
        assert!(map.erase(10).is_none());
    }

    #[test]
    fn test_missing_lookups() {
        let map = sample();
        assert!(map.get("omega").is_none());
        assert!(map.at(4).is_none());
        assert!(map.key_at(99).is_none());
    }
}
