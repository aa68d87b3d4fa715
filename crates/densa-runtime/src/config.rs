//! Tunables for arrays and maps.
//!
//! Both config types are plain data with `serde` support so that a compiler
//! embedding the runtime can carry them in its own build manifest.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

fn invalid(reason: &'static str) -> Result<()> {
    Err(RuntimeError::InvalidConfig { reason })
}

/// What a convenience method does when the allocator cannot satisfy a request.
///
/// The fallible `try_*` methods always hand the error back regardless of this
/// setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocFailurePolicy {
    /// Terminate the process: failed allocations go through
    /// `std::alloc::handle_alloc_error`, capacity overflow aborts directly.
    #[default]
    Abort,
    /// Panic with the allocation error, leaving unwinding to the caller.
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    /// Elements reserved up front. Zero means the first push allocates.
    pub initial_capacity: usize,
    /// Alignment of the backing block in bytes (power of two).
    pub align: usize,
    /// Allocation hint: the block holds no pointers a collector must trace.
    pub no_scan: bool,
    pub on_alloc_failure: AllocFailurePolicy,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            align: 8,
            no_scan: false,
            on_alloc_failure: AllocFailurePolicy::Abort,
        }
    }
}

impl ArrayConfig {
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    pub fn with_no_scan(mut self, no_scan: bool) -> Self {
        self.no_scan = no_scan;
        self
    }

    pub fn with_alloc_failure(mut self, policy: AllocFailurePolicy) -> Self {
        self.on_alloc_failure = policy;
        self
    }

    /// Reject settings no block can be built with.
    pub fn validate(&self) -> Result<()> {
        if !self.align.is_power_of_two() {
            return invalid("align must be a power of two");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Bucket count of a fresh index. Rounded up to a power of two.
    pub initial_buckets: usize,
    /// Rehash once `len / buckets` exceeds this ratio.
    pub max_load_factor: f64,
    /// Compact entries once tombstones exceed this share of all entries.
    pub max_tombstone_ratio: f64,
    /// Never compact below this many tombstones.
    pub min_tombstones: usize,
    pub on_alloc_failure: AllocFailurePolicy,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            initial_buckets: 8,
            max_load_factor: 0.75,
            max_tombstone_ratio: 0.5,
            min_tombstones: 8,
            on_alloc_failure: AllocFailurePolicy::Abort,
        }
    }
}

impl MapConfig {
    pub fn with_initial_buckets(mut self, buckets: usize) -> Self {
        self.initial_buckets = buckets;
        self
    }

    pub fn with_max_load_factor(mut self, load_factor: f64) -> Self {
        self.max_load_factor = load_factor;
        self
    }

    pub fn with_max_tombstone_ratio(mut self, ratio: f64) -> Self {
        self.max_tombstone_ratio = ratio;
        self
    }

    pub fn with_min_tombstones(mut self, count: usize) -> Self {
        self.min_tombstones = count;
        self
    }

    pub fn with_alloc_failure(mut self, policy: AllocFailurePolicy) -> Self {
        self.on_alloc_failure = policy;
        self
    }

    /// Reject settings under which the index could never settle: a load
    /// factor that is not a positive finite number, a tombstone ratio that is
    /// NaN or negative, or a bucket count with no power of two above it.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_load_factor.is_finite() && self.max_load_factor > 0.0) {
            return invalid("max_load_factor must be a positive finite number");
        }
        if self.max_tombstone_ratio.is_nan() || self.max_tombstone_ratio < 0.0 {
            return invalid("max_tombstone_ratio must not be negative or NaN");
        }
        if self.initial_buckets.checked_next_power_of_two().is_none() {
            return invalid("initial_buckets is too large");
        }
        Ok(())
    }

    /// Bucket count actually used for a fresh index.
    pub(crate) fn bucket_count(&self) -> usize {
        self.initial_buckets.max(1).next_power_of_two()
    }

    pub(crate) fn should_compact(&self, tombstones: usize, entries: usize) -> bool {
        tombstones >= self.min_tombstones
            && tombstones as f64 > entries as f64 * self.max_tombstone_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MapConfig::default();
        assert_eq!(config.bucket_count(), 8);
        assert_eq!(config.max_load_factor, 0.75);
        assert_eq!(ArrayConfig::default().initial_capacity, 0);
        assert_eq!(ArrayConfig::default().on_alloc_failure, AllocFailurePolicy::Abort);
    }

    #[test]
    fn bucket_count_rounds_up() {
        assert_eq!(MapConfig::default().with_initial_buckets(0).bucket_count(), 1);
        assert_eq!(MapConfig::default().with_initial_buckets(9).bucket_count(), 16);
    }

    #[test]
    fn compaction_threshold() {
        let config = MapConfig::default();
        assert!(!config.should_compact(7, 8));
        assert!(!config.should_compact(8, 16));
        assert!(config.should_compact(9, 16));
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(ArrayConfig::default().validate(), Ok(()));
        assert_eq!(MapConfig::default().validate(), Ok(()));
        assert_eq!(MapConfig::default().with_max_tombstone_ratio(0.0).validate(), Ok(()));
    }

    #[test]
    fn rejects_unusable_settings() {
        assert!(ArrayConfig::default().with_align(3).validate().is_err());
        assert!(ArrayConfig::default().with_align(0).validate().is_err());
        for load_factor in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = MapConfig::default()
                .with_max_load_factor(load_factor)
                .validate()
                .unwrap_err();
            assert_eq!(err.code(), 5);
        }
        assert!(MapConfig::default().with_max_tombstone_ratio(f64::NAN).validate().is_err());
        assert!(MapConfig::default().with_max_tombstone_ratio(-0.5).validate().is_err());
        assert!(MapConfig::default().with_initial_buckets(usize::MAX).validate().is_err());
    }

    #[test]
    fn policy_uses_snake_case_names() {
        let policy: AllocFailurePolicy = serde::de::Deserialize::deserialize(
            serde::de::value::StrDeserializer::<serde::de::value::Error>::new("panic"),
        )
        .unwrap();
        assert_eq!(policy, AllocFailurePolicy::Panic);
    }
}
