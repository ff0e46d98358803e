use std::collections::BTreeMap;
use std::ops::Bound;

use serde::Serialize;

/// An ordered map keyed by ILP address prefix.
///
/// Lookups follow address segment boundaries: `test.alice` is an ancestor
/// of `test.alice.x` but not of `test.alicea`.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct PrefixMap<T> {
    entries: BTreeMap<String, T>,
}

impl<T> PrefixMap<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert or overwrite. Returns the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: T) -> Option<T> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    /// Remove a key. Absent keys are a no-op.
    pub fn delete(&mut self, key: &str) -> Option<T> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.entries.iter()
    }

    /// Keys that begin with `prefix` as a plain string.
    pub fn keys_starting_with(&self, prefix: &str) -> Vec<String> {
        self.entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Stored proper ancestors of `address`, longest first.
    pub fn keys_prefixes_of(&self, address: &str) -> Vec<String> {
        address
            .rmatch_indices('.')
            .map(|(i, _)| &address[..i])
            .filter(|candidate| self.entries.contains_key(*candidate))
            .map(str::to_string)
            .collect()
    }

    /// Key of the longest stored prefix covering `address`.
    pub fn resolve_key(&self, address: &str) -> Option<&str> {
        if let Some((key, _)) = self.entries.get_key_value(address) {
            return Some(key.as_str());
        }
        address
            .rmatch_indices('.')
            .map(|(i, _)| &address[..i])
            .find_map(|candidate| self.entries.get_key_value(candidate))
            .map(|(key, _)| key.as_str())
    }

    /// Value at the exact key, or at the longest ancestor of `address`.
    pub fn resolve(&self, address: &str) -> Option<&T> {
        self.resolve_key(address).and_then(|key| self.entries.get(key))
    }
}

impl<T> Default for PrefixMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
