//! Insertion-ordered hash map over owned Rust values.
//!
//! The compile-time counterpart of [`crate::RawMap`]: `K: Hash + Eq` replaces
//! the hash and equality functions, `Clone` replaces the clone functions and
//! `Drop` replaces the free functions. Storage and ordering rules are the same.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::Index;

use rustc_hash::FxBuildHasher;

use crate::alloc::or_fail;
use crate::config::MapConfig;
use crate::error::Result;
use crate::index::ChainIndex;

pub struct Map<K, V, S = FxBuildHasher> {
    /// `None` marks a tombstone.
    entries: Vec<Option<(K, V)>>,
    index: ChainIndex,
    len: usize,
    hasher: S,
    config: MapConfig,
}

impl<K, V> Map<K, V> {
    pub fn new() -> Self {
        Self::with_config(MapConfig::default())
    }

    pub fn with_config(config: MapConfig) -> Self {
        Self::with_config_and_hasher(config, FxBuildHasher)
    }

    pub fn try_with_config(config: MapConfig) -> Result<Self> {
        Self::try_with_config_and_hasher(config, FxBuildHasher)
    }
}

impl<K, V, S> Map<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_config_and_hasher(MapConfig::default(), hasher)
    }

    /// # Panics
    ///
    /// If `config` fails [`MapConfig::validate`].
    pub fn with_config_and_hasher(config: MapConfig, hasher: S) -> Self {
        or_fail(
            Self::try_with_config_and_hasher(config, hasher),
            config.on_alloc_failure,
        )
    }

    pub fn try_with_config_and_hasher(config: MapConfig, hasher: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            entries: Vec::new(),
            index: ChainIndex::new(config.bucket_count()),
            len: 0,
            hasher,
            config,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.index.bucket_count()
    }

    pub fn max_chain_len(&self) -> usize {
        self.index.max_chain_len()
    }

    pub fn tombstones(&self) -> usize {
        self.entries.len() - self.len
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            entries: self.entries.iter(),
            remaining: self.len,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + Clone + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + Clone + '_ {
        self.iter().map(|(_, value)| value)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.entries.iter_mut().flatten().map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.len = 0;
    }

    /// Drop tombstones, keeping live entries in order. Entries and index are
    /// replaced together.
    pub fn compact(&mut self) {
        if self.tombstones() == 0 {
            return;
        }
        let dead = self.tombstones();
        let mut hashes = Vec::with_capacity(self.len);
        let mut entries = Vec::with_capacity(self.len);
        for (pos, entry) in self.entries.drain(..).enumerate() {
            if entry.is_some() {
                hashes.push(self.index.hash_at(pos));
                entries.push(entry);
            }
        }
        self.index = ChainIndex::from_hashes(self.index.bucket_count(), hashes);
        self.entries = entries;
        tracing::debug!(reclaimed = dead, live = self.len, "compact map entries");
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn find<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        self.index.find(hash, |pos| {
            matches!(&self.entries[pos], Some((k, _)) if k.borrow() == key)
        })
    }

    /// Insert or update. An existing key keeps its position and the replaced
    /// value is returned.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(pos) = self.find(&key) {
            if let Some((_, slot)) = &mut self.entries[pos] {
                return Some(std::mem::replace(slot, value));
            }
        }
        let hash = self.hasher.hash_one(&key);
        self.entries.push(Some((key, value)));
        self.index.push(hash);
        self.len += 1;
        if self.index.is_overloaded(self.len, self.config.max_load_factor) {
            self.index.rehash(self.len, self.config.max_load_factor);
        }
        None
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self.find(key)?;
        self.entries[pos].as_ref().map(|(_, value)| value)
    }

    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self.find(key)?;
        self.entries[pos].as_ref().map(|(key, value)| (key, value))
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self.find(key)?;
        self.entries[pos].as_mut().map(|(_, value)| value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Remove `key`, returning its value. Later entries keep their order.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, value)| value)
    }

    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self.find(key)?;
        let entry = self.entries[pos].take();
        self.index.unlink(pos);
        self.len -= 1;
        if self.config.should_compact(self.tombstones(), self.entries.len()) {
            self.compact();
        }
        entry
    }
}

/// Deep copy of the live entries with a freshly built index; tombstones are
/// not carried over.
impl<K: Clone, V: Clone, S: Clone> Clone for Map<K, V, S> {
    fn clone(&self) -> Self {
        let mut hashes = Vec::with_capacity(self.len);
        let entries = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(pos, entry)| {
                let entry = entry.as_ref()?;
                hashes.push(self.index.hash_at(pos));
                Some(Some(entry.clone()))
            })
            .collect();
        Self {
            entries,
            index: ChainIndex::from_hashes(self.index.bucket_count(), hashes),
            len: self.len,
            hasher: self.hasher.clone(),
            config: self.config,
        }
    }
}

impl<K, V> Default for Map<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> fmt::Debug for Map<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Equal when both hold the same entries in the same order.
impl<K, V, S> PartialEq for Map<K, V, S>
where
    K: PartialEq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq, S> Eq for Map<K, V, S> {}

impl<K, V, Q, S> Index<&Q> for Map<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    S: BuildHasher,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not present in map")
    }
}

impl<K, V, S> Extend<(K, V)> for Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Map<K, V>
where
    K: Hash + Eq,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Map::new();
        map.extend(iter);
        map
    }
}

impl<'a, K, V, S> IntoIterator for &'a Map<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<K, V, S> IntoIterator for Map<K, V, S> {
    type Item = (K, V);
    type IntoIter = std::iter::Flatten<std::vec::IntoIter<Option<(K, V)>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter().flatten()
    }
}

/// Insertion-order iterator over live entries.
pub struct Iter<'a, K, V> {
    entries: std::slice::Iter<'a, Option<(K, V)>>,
    remaining: usize,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            entries: self.entries.clone(),
            remaining: self.remaining,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            if let Some((key, value)) = entry {
                self.remaining -= 1;
                return Some((key, value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
