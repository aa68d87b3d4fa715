//! Type-erased, insertion-ordered hash map.
//!
//! Keys and values are opaque byte cells of sizes fixed at construction.
//! Behaviour comes from a [`MapFns`] table: the hash and equality functions
//! locate keys, the clone functions copy caller-provided keys and values into
//! map-owned storage, and the free functions release what the map owns.
//!
//! Cells live in a [`DenseArray`] in insertion order. Deleting a key leaves a
//! tombstone; once tombstones dominate the entries the map compacts, building
//! the new entry array and the new index before swapping both in.

use std::fmt;
use std::hash::Hasher;
use std::mem;
use std::ptr;

use bytemuck::Pod;
use rustc_hash::FxHasher;

use crate::alloc::or_fail;
use crate::array::{CloneFn, DenseArray, FreeFn};
use crate::config::{ArrayConfig, MapConfig};
use crate::error::Result;
use crate::index::ChainIndex;

pub type HashFn = unsafe extern "C" fn(key: *const u8) -> u64;
pub type EqFn = unsafe extern "C" fn(a: *const u8, b: *const u8) -> bool;

/// Every cell starts on this boundary; keys and values up to this alignment
/// are stored aligned.
const CELL_ALIGN: usize = 8;

/// Behaviour table for a [`RawMap`].
///
/// `None` for a clone function means a byte copy, `None` for a free function
/// means the cell owns nothing.
#[derive(Debug, Clone, Copy)]
pub struct MapFns {
    pub hash: HashFn,
    pub eq: EqFn,
    pub clone_key: Option<CloneFn>,
    pub free_key: Option<FreeFn>,
    pub clone_value: Option<CloneFn>,
    pub free_value: Option<FreeFn>,
}

impl MapFns {
    /// Keys compared and hashed as `N` plain bytes.
    pub fn plain<const N: usize>() -> Self {
        Self {
            hash: hash_plain::<N>,
            eq: eq_plain::<N>,
            clone_key: None,
            free_key: None,
            clone_value: None,
            free_value: None,
        }
    }

    /// Plain-byte behaviour for the integer key sizes generated code uses.
    pub fn for_key_size(key_size: usize) -> Option<Self> {
        Some(match key_size {
            1 => Self::plain::<1>(),
            2 => Self::plain::<2>(),
            4 => Self::plain::<4>(),
            8 => Self::plain::<8>(),
            16 => Self::plain::<16>(),
            _ => return None,
        })
    }

    pub fn with_value_fns(mut self, clone: Option<CloneFn>, free: Option<FreeFn>) -> Self {
        self.clone_value = clone;
        self.free_value = free;
        self
    }
}

unsafe extern "C" fn hash_plain<const N: usize>(key: *const u8) -> u64 {
    let bytes = unsafe { std::slice::from_raw_parts(key, N) };
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

unsafe extern "C" fn eq_plain<const N: usize>(a: *const u8, b: *const u8) -> bool {
    unsafe { std::slice::from_raw_parts(a, N) == std::slice::from_raw_parts(b, N) }
}

fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

/// Scratch cell with `CELL_ALIGN` alignment for building entries.
struct CellBuf(Vec<u64>);

impl CellBuf {
    fn zeroed(size: usize) -> Self {
        CellBuf(vec![0; size / mem::size_of::<u64>()])
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.0.as_mut_ptr().cast()
    }

    fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.0.as_ptr().cast(), self.0.len() * mem::size_of::<u64>()) }
    }
}

pub struct RawMap {
    entries: DenseArray,
    live: Vec<bool>,
    index: ChainIndex,
    key_size: usize,
    value_size: usize,
    value_offset: usize,
    fns: MapFns,
    len: usize,
    config: MapConfig,
}

impl RawMap {
    pub fn new(key_size: usize, value_size: usize, fns: MapFns) -> Self {
        Self::with_config(key_size, value_size, fns, MapConfig::default())
    }

    /// # Panics
    ///
    /// If `config` fails [`MapConfig::validate`].
    pub fn with_config(key_size: usize, value_size: usize, fns: MapFns, config: MapConfig) -> Self {
        or_fail(
            Self::try_with_config(key_size, value_size, fns, config),
            config.on_alloc_failure,
        )
    }

    pub fn try_with_config(
        key_size: usize,
        value_size: usize,
        fns: MapFns,
        config: MapConfig,
    ) -> Result<Self> {
        config.validate()?;
        let value_offset = round_up(key_size, CELL_ALIGN);
        let cell_size = round_up(value_offset + value_size, CELL_ALIGN);
        Ok(Self {
            entries: DenseArray::try_with_config(cell_size, Self::entry_config(&config, 0))?,
            live: Vec::new(),
            index: ChainIndex::new(config.bucket_count()),
            key_size,
            value_size,
            value_offset,
            fns,
            len: 0,
            config,
        })
    }

    fn entry_config(config: &MapConfig, capacity: usize) -> ArrayConfig {
        ArrayConfig::default()
            .with_initial_capacity(capacity)
            .with_align(CELL_ALIGN)
            .with_alloc_failure(config.on_alloc_failure)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    pub fn fns(&self) -> MapFns {
        self.fns
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn bucket_count(&self) -> usize {
        self.index.bucket_count()
    }

    pub fn max_chain_len(&self) -> usize {
        self.index.max_chain_len()
    }

    /// Deleted cells not yet reclaimed by compaction.
    pub fn tombstones(&self) -> usize {
        self.entries.len() - self.len
    }

    fn cell_size(&self) -> usize {
        self.entries.elem_size()
    }

    fn cell(&self, pos: usize) -> &[u8] {
        let size = self.cell_size();
        &self.entries.as_bytes()[pos * size..(pos + 1) * size]
    }

    fn cell_mut(&mut self, pos: usize) -> &mut [u8] {
        let size = self.cell_size();
        &mut self.entries.as_bytes_mut()[pos * size..(pos + 1) * size]
    }

    fn key_at(&self, pos: usize) -> &[u8] {
        &self.cell(pos)[..self.key_size]
    }

    fn value_at(&self, pos: usize) -> &[u8] {
        let start = self.value_offset;
        &self.cell(pos)[start..start + self.value_size]
    }

    fn check_key(&self, key: &[u8]) {
        assert_eq!(
            key.len(),
            self.key_size,
            "key is {} bytes, map holds {}-byte keys",
            key.len(),
            self.key_size
        );
    }

    fn check_value(&self, value: &[u8]) {
        assert_eq!(
            value.len(),
            self.value_size,
            "value is {} bytes, map holds {}-byte values",
            value.len(),
            self.value_size
        );
    }

    fn hash(&self, key: &[u8]) -> u64 {
        unsafe { (self.fns.hash)(key.as_ptr()) }
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        self.check_key(key);
        let hash = self.hash(key);
        self.index
            .find(hash, |pos| unsafe { (self.fns.eq)(self.key_at(pos).as_ptr(), key.as_ptr()) })
    }

    unsafe fn clone_into(clone: Option<CloneFn>, dst: *mut u8, src: &[u8]) {
        match clone {
            Some(clone) => unsafe { clone(dst, src.as_ptr()) },
            None => unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) },
        }
    }

    /// Insert or update. The map stores clones of `key` and `value`; the
    /// caller keeps ownership of what it passed in. Returns `true` when the
    /// key was not present before.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> bool {
        self.check_value(value);
        if let Some(pos) = self.find(key) {
            let (offset, fns) = (self.value_offset, self.fns);
            let slot = self.cell_mut(pos)[offset..].as_mut_ptr();
            unsafe {
                if let Some(free) = fns.free_value {
                    free(slot);
                }
                Self::clone_into(fns.clone_value, slot, value);
            }
            return false;
        }

        let hash = self.hash(key);
        let mut cell = CellBuf::zeroed(self.cell_size());
        unsafe {
            Self::clone_into(self.fns.clone_key, cell.as_mut_ptr(), key);
            Self::clone_into(
                self.fns.clone_value,
                cell.as_mut_ptr().add(self.value_offset),
                value,
            );
        }
        self.entries.push(cell.as_bytes());
        self.live.push(true);
        let pos = self.index.push(hash);
        debug_assert_eq!(pos + 1, self.entries.len());
        self.len += 1;

        if self.index.is_overloaded(self.len, self.config.max_load_factor) {
            self.index.rehash(self.len, self.config.max_load_factor);
        }
        self.check_consistency();
        true
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.find(key).map(|pos| self.value_at(pos))
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut [u8]> {
        let pos = self.find(key)?;
        let (start, size) = (self.value_offset, self.value_size);
        Some(&mut self.cell_mut(pos)[start..start + size])
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }

    /// Remove `key`, releasing the stored key and value. Returns whether the
    /// key was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let Some(pos) = self.find(key) else {
            return false;
        };
        unsafe { self.free_cell(pos) };
        self.cell_mut(pos).fill(0);
        self.live[pos] = false;
        self.index.unlink(pos);
        self.len -= 1;

        if self.config.should_compact(self.tombstones(), self.entries.len()) {
            self.compact();
        }
        self.check_consistency();
        true
    }

    unsafe fn free_cell(&mut self, pos: usize) {
        let (offset, fns) = (self.value_offset, self.fns);
        let cell = self.cell_mut(pos).as_mut_ptr();
        unsafe {
            if let Some(free) = fns.free_key {
                free(cell);
            }
            if let Some(free) = fns.free_value {
                free(cell.add(offset));
            }
        }
    }

    /// Drop tombstones, keeping live cells in order. The entry array and the
    /// index are replaced together.
    pub fn compact(&mut self) {
        if self.tombstones() == 0 {
            return;
        }
        let dead = self.tombstones();
        let mut entries = DenseArray::with_config(
            self.cell_size(),
            Self::entry_config(&self.config, self.len),
        );
        let mut hashes = Vec::with_capacity(self.len);
        for pos in (0..self.entries.len()).filter(|&pos| self.live[pos]) {
            // Cells move bitwise; ownership of their contents moves with them.
            entries.push(self.cell(pos));
            hashes.push(self.index.hash_at(pos));
        }
        let index = ChainIndex::from_hashes(self.index.bucket_count(), hashes);

        self.entries = entries;
        self.live = vec![true; self.len];
        self.index = index;
        tracing::debug!(reclaimed = dead, live = self.len, "compact map entries");
    }

    /// Remove every entry, releasing keys and values. Bucket count is kept.
    pub fn clear(&mut self) {
        for pos in 0..self.entries.len() {
            if self.live[pos] {
                unsafe { self.free_cell(pos) };
            }
        }
        self.entries.clear();
        self.live.clear();
        self.index.clear();
        self.len = 0;
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            map: self,
            pos: 0,
            remaining: self.len,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + Clone + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &[u8]> + Clone + '_ {
        self.iter().map(|(_, value)| value)
    }

    /// Deep copy through the clone functions, with a freshly built index.
    pub fn try_clone(&self) -> Result<Self> {
        let mut entries = DenseArray::try_with_config(
            self.cell_size(),
            Self::entry_config(&self.config, self.len),
        )?;
        let mut hashes = Vec::with_capacity(self.len);
        for pos in (0..self.entries.len()).filter(|&pos| self.live[pos]) {
            let mut cell = CellBuf::zeroed(self.cell_size());
            unsafe {
                Self::clone_into(self.fns.clone_key, cell.as_mut_ptr(), self.key_at(pos));
                Self::clone_into(
                    self.fns.clone_value,
                    cell.as_mut_ptr().add(self.value_offset),
                    self.value_at(pos),
                );
            }
            entries.try_push(cell.as_bytes())?;
            hashes.push(self.index.hash_at(pos));
        }
        Ok(Self {
            entries,
            live: vec![true; self.len],
            index: ChainIndex::from_hashes(self.index.bucket_count(), hashes),
            key_size: self.key_size,
            value_size: self.value_size,
            value_offset: self.value_offset,
            fns: self.fns,
            len: self.len,
            config: self.config,
        })
    }

    /// Insert plain values. `Pod` rules out padding, so every key byte takes
    /// part in hashing and equality:
    ///
    /// ```compile_fail
    /// # use densa_runtime::{MapFns, RawMap};
    /// let mut map = RawMap::new(8, 4, MapFns::plain::<8>());
    /// map.set_value((1u8, 2u32), 0u32);
    /// ```
    pub fn set_value<K: Pod, V: Pod>(&mut self, key: K, value: V) -> bool {
        self.set(bytemuck::bytes_of(&key), bytemuck::bytes_of(&value))
    }

    pub fn get_value<K: Pod, V: Pod>(&self, key: K) -> Option<V> {
        assert_eq!(mem::size_of::<V>(), self.value_size, "value size mismatch");
        self.get(bytemuck::bytes_of(&key)).map(bytemuck::pod_read_unaligned)
    }

    pub fn delete_value<K: Pod>(&mut self, key: K) -> bool {
        self.delete(bytemuck::bytes_of(&key))
    }

    fn check_consistency(&self) {
        #[cfg(feature = "debug_runtime")]
        {
            self.index.assert_consistent();
            assert_eq!(self.index.positions(), self.entries.len());
            assert_eq!(self.live.iter().filter(|&&l| l).count(), self.len);
        }
    }
}

impl Drop for RawMap {
    fn drop(&mut self) {
        if self.fns.free_key.is_none() && self.fns.free_value.is_none() {
            return;
        }
        for pos in 0..self.entries.len() {
            if self.live[pos] {
                unsafe { self.free_cell(pos) };
            }
        }
    }
}

impl Clone for RawMap {
    fn clone(&self) -> Self {
        or_fail(self.try_clone(), self.config.on_alloc_failure)
    }
}

impl fmt::Debug for RawMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a RawMap {
    type Item = (&'a [u8], &'a [u8]);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Insertion-order iterator over live `(key, value)` cells.
#[derive(Clone)]
pub struct Iter<'a> {
    map: &'a RawMap,
    pos: usize,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.map.entries.len() {
            let pos = self.pos;
            self.pos += 1;
            if self.map.live[pos] {
                self.remaining -= 1;
                return Some((self.map.key_at(pos), self.map.value_at(pos)));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}
