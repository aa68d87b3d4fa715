//! Hash index shared by [`crate::RawMap`] and [`crate::Map`].
//!
//! The index never stores keys. It maps a bucket to a chain of entry
//! positions in the owner's dense entry storage, and remembers each entry's
//! full hash so that chains can be walked and rebuilt without calling back
//! into the owner's hash function. Positions are stable until the owner
//! compacts its entries, at which point the whole index is rebuilt in the
//! same step.

/// End of a chain.
const NIL: usize = usize::MAX;
/// Link value of an entry that has been unlinked (tombstoned by the owner).
const DEAD: usize = usize::MAX - 1;

#[derive(Debug, Clone)]
pub struct ChainIndex {
    heads: Vec<usize>,
    next: Vec<usize>,
    hashes: Vec<u64>,
}

impl ChainIndex {
    pub fn new(buckets: usize) -> Self {
        let buckets = buckets.max(1).next_power_of_two();
        Self {
            heads: vec![NIL; buckets],
            next: Vec::new(),
            hashes: Vec::new(),
        }
    }

    /// Index over `hashes`, one entry per position, all linked.
    pub fn from_hashes(buckets: usize, hashes: impl IntoIterator<Item = u64>) -> Self {
        let mut index = Self::new(buckets);
        for hash in hashes {
            index.push(hash);
        }
        index
    }

    pub fn bucket_count(&self) -> usize {
        self.heads.len()
    }

    /// Number of positions, linked or not.
    #[cfg(any(test, feature = "debug_runtime"))]
    pub fn positions(&self) -> usize {
        self.hashes.len()
    }

    pub fn hash_at(&self, pos: usize) -> u64 {
        self.hashes[pos]
    }

    #[cfg(test)]
    pub fn is_linked(&self, pos: usize) -> bool {
        self.next[pos] != DEAD
    }

    fn bucket_of(&self, hash: u64) -> usize {
        let folded = hash ^ (hash >> 32);
        (folded as usize) & (self.heads.len() - 1)
    }

    /// First linked position whose hash equals `hash` and for which
    /// `matches` holds.
    pub fn find(&self, hash: u64, mut matches: impl FnMut(usize) -> bool) -> Option<usize> {
        let mut pos = self.heads[self.bucket_of(hash)];
        while pos != NIL {
            if self.hashes[pos] == hash && matches(pos) {
                return Some(pos);
            }
            pos = self.next[pos];
        }
        None
    }

    /// Register a new entry at the next position and return that position.
    pub fn push(&mut self, hash: u64) -> usize {
        let pos = self.hashes.len();
        let bucket = self.bucket_of(hash);
        self.hashes.push(hash);
        self.next.push(self.heads[bucket]);
        self.heads[bucket] = pos;
        pos
    }

    /// Remove `pos` from its chain. The position itself stays allocated
    /// until the next [`ChainIndex::from_hashes`] rebuild.
    pub fn unlink(&mut self, pos: usize) {
        let bucket = self.bucket_of(self.hashes[pos]);
        let after = self.next[pos];
        if self.heads[bucket] == pos {
            self.heads[bucket] = after;
        } else {
            let mut cur = self.heads[bucket];
            while cur != NIL {
                if self.next[cur] == pos {
                    self.next[cur] = after;
                    break;
                }
                cur = self.next[cur];
            }
        }
        self.next[pos] = DEAD;
    }

    /// Whether `live` entries overload the current bucket count.
    pub fn is_overloaded(&self, live: usize, max_load_factor: f64) -> bool {
        live as f64 > self.heads.len() as f64 * max_load_factor
    }

    /// Double the bucket count until `live` entries fit, relinking linked
    /// positions in position order. Doubling stops at the largest power of
    /// two a `usize` holds.
    pub fn rehash(&mut self, live: usize, max_load_factor: f64) {
        debug_assert!(max_load_factor > 0.0, "load factor {max_load_factor} must be positive");
        let mut buckets = self.heads.len();
        while live as f64 > buckets as f64 * max_load_factor {
            match buckets.checked_mul(2) {
                Some(doubled) => buckets = doubled,
                None => break,
            }
        }
        tracing::debug!(from = self.heads.len(), to = buckets, live, "rehash index");
        self.heads = vec![NIL; buckets];
        for pos in 0..self.hashes.len() {
            if self.next[pos] == DEAD {
                continue;
            }
            let bucket = self.bucket_of(self.hashes[pos]);
            self.next[pos] = self.heads[bucket];
            self.heads[bucket] = pos;
        }
    }

    pub fn clear(&mut self) {
        self.heads.fill(NIL);
        self.next.clear();
        self.hashes.clear();
    }

    /// Longest chain, counting linked positions only.
    pub fn max_chain_len(&self) -> usize {
        self.heads
            .iter()
            .map(|&head| {
                let mut len = 0;
                let mut pos = head;
                while pos != NIL {
                    len += 1;
                    pos = self.next[pos];
                }
                len
            })
            .max()
            .unwrap_or(0)
    }

    /// Check that every linked position is reachable from its bucket exactly
    /// once.
    #[cfg(any(test, feature = "debug_runtime"))]
    pub fn assert_consistent(&self) {
        let mut seen = vec![0usize; self.hashes.len()];
        for (bucket, &head) in self.heads.iter().enumerate() {
            let mut pos = head;
            while pos != NIL {
                assert_eq!(self.bucket_of(self.hashes[pos]), bucket, "entry {pos} in wrong bucket");
                seen[pos] += 1;
                pos = self.next[pos];
            }
        }
        for (pos, &count) in seen.iter().enumerate() {
            let expected = usize::from(self.next[pos] != DEAD);
            assert_eq!(count, expected, "entry {pos} reachable {count} times");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_find() {
        let mut index = ChainIndex::new(4);
        let a = index.push(10);
        let b = index.push(14);
        let c = index.push(10);
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(index.find(10, |pos| pos == a), Some(a));
        assert_eq!(index.find(10, |pos| pos == c), Some(c));
        assert_eq!(index.find(14, |_| true), Some(b));
        assert_eq!(index.find(99, |_| true), None);
        index.assert_consistent();
    }

    #[test]
    fn unlink_middle_of_chain() {
        // Same hash forces a single chain.
        let mut index = ChainIndex::new(1);
        for _ in 0..4 {
            index.push(7);
        }
        index.unlink(2);
        index.unlink(0);
        index.assert_consistent();
        assert!(!index.is_linked(2));
        assert_eq!(index.find(7, |pos| pos == 2), None);
        assert_eq!(index.find(7, |pos| pos == 3), Some(3));
        assert_eq!(index.max_chain_len(), 2);
    }

    #[test]
    fn rehash_skips_dead_positions() {
        let mut index = ChainIndex::new(2);
        for hash in 0..6u64 {
            index.push(hash);
        }
        index.unlink(1);
        assert!(index.is_overloaded(5, 0.75));
        index.rehash(5, 0.75);
        assert_eq!(index.bucket_count(), 8);
        index.assert_consistent();
        assert_eq!(index.find(1, |_| true), None);
        assert_eq!(index.find(5, |_| true), Some(5));
    }

    #[test]
    fn rebuild_from_hashes() {
        let index = ChainIndex::from_hashes(3, [5, 6, 7]);
        assert_eq!(index.bucket_count(), 4);
        assert_eq!(index.positions(), 3);
        assert_eq!(index.hash_at(1), 6);
        index.assert_consistent();
    }
}
