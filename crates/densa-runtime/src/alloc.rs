//! Cell/slot allocator backing every container.
//!
//! A [`RawBlock`] is a zeroed, untyped run of `capacity * elem_size` bytes.
//! Containers track their own length on top of it; the block only knows how
//! much room it has. Blocks with zero bytes of capacity never touch the
//! allocator.

use std::alloc::{self, Layout};
use std::cell::Cell;
use std::ptr::{self, NonNull};

use crate::config::AllocFailurePolicy;
use crate::error::{Result, RuntimeError};

/// Capacity multiplier applied when a block runs out of room.
pub const GROWTH_FACTOR: usize = 2;

/// Smallest capacity a block grows to from empty.
pub const MIN_NON_ZERO_CAP: usize = 4;

/// Capacity to grow to when `required` elements must fit in a block that
/// currently holds `current`.
pub fn next_capacity(current: usize, required: usize) -> usize {
    current
        .saturating_mul(GROWTH_FACTOR)
        .max(required)
        .max(MIN_NON_ZERO_CAP)
}

pub struct RawBlock {
    ptr: NonNull<u8>,
    capacity: usize,
    elem_size: usize,
    align: usize,
    no_scan: bool,
    /// Memory belongs to someone else; never freed or reallocated in place.
    borrowed: bool,
}

impl RawBlock {
    /// A block with no backing allocation.
    ///
    /// Panics if `align` is not a power of two.
    pub fn empty(elem_size: usize, align: usize, no_scan: bool) -> Self {
        assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
        Self {
            ptr: dangling(align),
            capacity: 0,
            elem_size,
            align,
            no_scan,
            borrowed: false,
        }
    }

    /// Allocate a zeroed block with room for `capacity` elements.
    pub fn allocate(capacity: usize, elem_size: usize, align: usize, no_scan: bool) -> Result<Self> {
        if !align.is_power_of_two() {
            return Err(RuntimeError::InvalidConfig {
                reason: "align must be a power of two",
            });
        }
        let mut block = Self::empty(elem_size, align, no_scan);
        block.grow(capacity)?;
        Ok(block)
    }

    /// Wrap memory owned by the caller.
    ///
    /// The block never frees `ptr`; the first growth moves the contents into
    /// an owned allocation.
    ///
    /// # Safety
    /// `ptr` must be aligned to `align` and valid for reads and writes of
    /// `capacity * elem_size` bytes for as long as the block refers to it.
    pub unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        capacity: usize,
        elem_size: usize,
        align: usize,
    ) -> Self {
        assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
        debug_assert_eq!(ptr.as_ptr() as usize % align, 0, "misaligned fixed buffer");
        Self {
            ptr,
            capacity,
            elem_size,
            align,
            no_scan: false,
            borrowed: true,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn is_no_scan(&self) -> bool {
        self.no_scan
    }

    pub fn is_borrowed(&self) -> bool {
        self.borrowed
    }

    /// Whether the block currently owns an allocation.
    pub fn is_allocated(&self) -> bool {
        !self.borrowed && self.byte_len() > 0
    }

    fn byte_len(&self) -> usize {
        // Never overflows: the layout was validated when the block grew.
        self.capacity * self.elem_size
    }

    fn layout_for(&self, capacity: usize) -> Result<Layout> {
        let size = capacity
            .checked_mul(self.elem_size)
            .ok_or(RuntimeError::CapacityOverflow)?;
        if size > isize::MAX as usize {
            return Err(RuntimeError::CapacityOverflow);
        }
        Layout::from_size_align(size, self.align).map_err(|_| RuntimeError::CapacityOverflow)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Pointer to element `index`, which may be one past the end.
    ///
    /// # Safety
    /// `index <= capacity`.
    pub unsafe fn elem_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index <= self.capacity);
        unsafe { self.ptr.as_ptr().add(index * self.elem_size) }
    }

    /// The first `len` elements as bytes.
    ///
    /// # Safety
    /// `len <= capacity`.
    pub unsafe fn bytes(&self, len: usize) -> &[u8] {
        debug_assert!(len <= self.capacity);
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), len * self.elem_size) }
    }

    /// The first `len` elements as mutable bytes.
    ///
    /// # Safety
    /// `len <= capacity`.
    pub unsafe fn bytes_mut(&mut self, len: usize) -> &mut [u8] {
        debug_assert!(len <= self.capacity);
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), len * self.elem_size) }
    }

    /// Grow to hold at least `new_capacity` elements. Existing contents are
    /// preserved and the new tail is zeroed. On error the block is unchanged.
    pub fn grow(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity <= self.capacity {
            return Ok(());
        }
        let new_layout = self.layout_for(new_capacity)?;
        let old_bytes = self.byte_len();

        if new_layout.size() == 0 {
            // Zero-sized elements never need storage.
            self.capacity = new_capacity;
            return Ok(());
        }

        let new_ptr = if self.borrowed || old_bytes == 0 {
            let fresh = unsafe { alloc::alloc_zeroed(new_layout) };
            let fresh = NonNull::new(fresh).ok_or_else(|| alloc_failed(new_layout))?;
            if old_bytes > 0 {
                unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), fresh.as_ptr(), old_bytes) };
            }
            record_alloc(new_layout.size(), self.no_scan);
            fresh
        } else {
            let old_layout =
                unsafe { Layout::from_size_align_unchecked(old_bytes, self.align) };
            let moved = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) };
            let moved = NonNull::new(moved).ok_or_else(|| alloc_failed(new_layout))?;
            unsafe { ptr::write_bytes(moved.as_ptr().add(old_bytes), 0, new_layout.size() - old_bytes) };
            record_realloc(old_bytes, new_layout.size(), self.no_scan);
            moved
        };

        tracing::trace!(
            from = self.capacity,
            to = new_capacity,
            elem_size = self.elem_size,
            borrowed = self.borrowed,
            "grow block"
        );
        self.ptr = new_ptr;
        self.capacity = new_capacity;
        self.borrowed = false;
        Ok(())
    }

    /// Release capacity beyond `new_capacity`. Borrowed blocks only forget the
    /// spare room.
    pub fn shrink_to(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity >= self.capacity {
            return Ok(());
        }
        if !self.is_allocated() {
            self.capacity = new_capacity;
            return Ok(());
        }
        let old_bytes = self.byte_len();
        let old_layout = unsafe { Layout::from_size_align_unchecked(old_bytes, self.align) };
        let new_layout = self.layout_for(new_capacity)?;
        if new_layout.size() == 0 {
            unsafe { alloc::dealloc(self.ptr.as_ptr(), old_layout) };
            record_free(old_bytes, self.no_scan);
            self.ptr = dangling(self.align);
        } else {
            let moved = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) };
            self.ptr = NonNull::new(moved).ok_or_else(|| alloc_failed(new_layout))?;
            record_realloc(old_bytes, new_layout.size(), self.no_scan);
        }
        self.capacity = new_capacity;
        Ok(())
    }

    /// Zero elements `start..end`.
    ///
    /// # Safety
    /// `start <= end <= capacity`.
    pub unsafe fn zero_range(&mut self, start: usize, end: usize) {
        debug_assert!(start <= end && end <= self.capacity);
        unsafe { ptr::write_bytes(self.elem_ptr(start), 0, (end - start) * self.elem_size) };
    }

    /// Move `count` elements from `src` to `dst`; ranges may overlap.
    ///
    /// # Safety
    /// Both ranges must lie within the capacity.
    pub unsafe fn copy_within(&mut self, src: usize, dst: usize, count: usize) {
        debug_assert!(src + count <= self.capacity && dst + count <= self.capacity);
        unsafe { ptr::copy(self.elem_ptr(src), self.elem_ptr(dst), count * self.elem_size) };
    }

    /// A new owned block holding a byte copy of the first `len` elements.
    ///
    /// # Safety
    /// `len <= capacity`.
    pub unsafe fn duplicate(&self, len: usize) -> Result<RawBlock> {
        let mut copy = RawBlock::allocate(len, self.elem_size, self.align, self.no_scan)?;
        if len > 0 {
            unsafe {
                ptr::copy_nonoverlapping(self.ptr.as_ptr(), copy.as_mut_ptr(), len * self.elem_size)
            };
        }
        Ok(copy)
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        if self.is_allocated() {
            let bytes = self.byte_len();
            unsafe {
                let layout = Layout::from_size_align_unchecked(bytes, self.align);
                alloc::dealloc(self.ptr.as_ptr(), layout);
            }
            record_free(bytes, self.no_scan);
        }
    }
}

impl std::fmt::Debug for RawBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBlock")
            .field("capacity", &self.capacity)
            .field("elem_size", &self.elem_size)
            .field("align", &self.align)
            .field("no_scan", &self.no_scan)
            .field("borrowed", &self.borrowed)
            .finish()
    }
}

fn dangling(align: usize) -> NonNull<u8> {
    // SAFETY: `align` is a non-zero power of two.
    unsafe { NonNull::new_unchecked(ptr::without_provenance_mut(align)) }
}

fn alloc_failed(layout: Layout) -> RuntimeError {
    RuntimeError::AllocationFailed {
        size: layout.size(),
        align: layout.align(),
    }
}

/// Unwrap an allocation result according to `policy`.
pub(crate) fn or_fail<T>(result: Result<T>, policy: AllocFailurePolicy) -> T {
    match result {
        Ok(value) => value,
        Err(err) => fail(err, policy),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureAction {
    /// Report through the global allocation error hook.
    AllocError(Layout),
    Abort,
    Panic,
}

/// What `policy` does with `err`. Errors that are not about memory (an invalid
/// configuration, say) always panic; they are caller mistakes.
fn failure_action(err: &RuntimeError, policy: AllocFailurePolicy) -> FailureAction {
    match (policy, err) {
        (AllocFailurePolicy::Abort, RuntimeError::AllocationFailed { size, align }) => {
            match Layout::from_size_align(*size, *align) {
                Ok(layout) => FailureAction::AllocError(layout),
                Err(_) => FailureAction::Abort,
            }
        }
        (AllocFailurePolicy::Abort, RuntimeError::CapacityOverflow) => FailureAction::Abort,
        _ => FailureAction::Panic,
    }
}

fn fail(err: RuntimeError, policy: AllocFailurePolicy) -> ! {
    match failure_action(&err, policy) {
        FailureAction::AllocError(layout) => alloc::handle_alloc_error(layout),
        FailureAction::Abort => {
            tracing::error!(error = %err, "container allocation failed, aborting");
            std::process::abort()
        }
        FailureAction::Panic => {
            tracing::warn!(error = %err, "container allocation failed");
            panic!("{err}")
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of allocator activity on the calling thread.
///
/// Blocks are `!Send`, so every block is allocated and freed on the same
/// thread and per-thread counters are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocStats {
    pub live_blocks: usize,
    pub live_bytes: usize,
    /// Portion of `live_bytes` in blocks allocated with the no-scan hint.
    pub no_scan_bytes: usize,
    pub peak_bytes: usize,
    pub total_allocations: usize,
    pub reallocations: usize,
}

thread_local! {
    static STATS: Cell<AllocStats> = const { Cell::new(AllocStats {
        live_blocks: 0,
        live_bytes: 0,
        no_scan_bytes: 0,
        peak_bytes: 0,
        total_allocations: 0,
        reallocations: 0,
    }) };
}

pub fn stats() -> AllocStats {
    STATS.with(Cell::get)
}

fn update_stats(f: impl FnOnce(&mut AllocStats)) {
    STATS.with(|cell| {
        let mut stats = cell.get();
        f(&mut stats);
        stats.peak_bytes = stats.peak_bytes.max(stats.live_bytes);
        cell.set(stats);
    });
}

fn record_alloc(bytes: usize, no_scan: bool) {
    update_stats(|stats| {
        stats.live_blocks += 1;
        stats.total_allocations += 1;
        stats.live_bytes += bytes;
        if no_scan {
            stats.no_scan_bytes += bytes;
        }
    });
}

fn record_realloc(old: usize, new: usize, no_scan: bool) {
    update_stats(|stats| {
        stats.reallocations += 1;
        stats.live_bytes = stats.live_bytes - old + new;
        if no_scan {
            stats.no_scan_bytes = stats.no_scan_bytes - old + new;
        }
    });
}

fn record_free(bytes: usize, no_scan: bool) {
    update_stats(|stats| {
        stats.live_blocks -= 1;
        stats.live_bytes -= bytes;
        if no_scan {
            stats.no_scan_bytes -= bytes;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_policy() {
        assert_eq!(next_capacity(0, 1), MIN_NON_ZERO_CAP);
        assert_eq!(next_capacity(4, 5), 8);
        assert_eq!(next_capacity(8, 100), 100);
        assert_eq!(next_capacity(usize::MAX, usize::MAX), usize::MAX);
    }

    #[test]
    fn appends_cost_amortized_linear() {
        const N: usize = 100_000;
        let mut capacity = 0;
        let mut copied = 0;
        for len in 0..N {
            if len == capacity {
                copied += len;
                capacity = next_capacity(capacity, len + 1);
            }
        }
        assert!(copied <= 2 * N, "copied {copied} elements for {N} appends");
    }

    #[test]
    fn empty_block_owns_nothing() {
        let block = RawBlock::allocate(0, 8, 8, false).unwrap();
        assert_eq!(block.capacity(), 0);
        assert!(!block.is_allocated());
        assert_eq!(block.as_ptr() as usize % 8, 0);
    }

    #[test]
    fn grow_preserves_contents_and_zeroes_tail() {
        let mut block = RawBlock::allocate(2, 4, 4, false).unwrap();
        unsafe { block.bytes_mut(2).copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]) };
        block.grow(5).unwrap();
        assert_eq!(block.capacity(), 5);
        let bytes = unsafe { block.bytes(5) };
        assert_eq!(&bytes[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(bytes[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn grow_never_shrinks() {
        let mut block = RawBlock::allocate(8, 1, 1, false).unwrap();
        block.grow(3).unwrap();
        assert_eq!(block.capacity(), 8);
    }

    #[test]
    fn zero_sized_elements_never_allocate() {
        let mut block = RawBlock::empty(0, 1, false);
        block.grow(1_000).unwrap();
        assert_eq!(block.capacity(), 1_000);
        assert!(!block.is_allocated());
    }

    #[test]
    fn overflowing_capacity_is_an_error() {
        let mut block = RawBlock::empty(16, 8, false);
        assert_eq!(block.grow(usize::MAX / 2), Err(RuntimeError::CapacityOverflow));
        assert_eq!(block.capacity(), 0);
    }

    #[test]
    fn copy_within_and_zero_range() {
        let mut block = RawBlock::allocate(4, 2, 2, false).unwrap();
        unsafe {
            block.bytes_mut(4).copy_from_slice(&[1, 1, 2, 2, 3, 3, 4, 4]);
            block.copy_within(1, 0, 3);
            block.zero_range(3, 4);
            assert_eq!(block.bytes(4), &[2, 2, 3, 3, 4, 4, 0, 0]);
        }
    }

    #[test]
    fn shrink_releases_capacity() {
        let mut block = RawBlock::allocate(16, 1, 1, false).unwrap();
        unsafe { block.bytes_mut(3).copy_from_slice(b"abc") };
        block.shrink_to(3).unwrap();
        assert_eq!(block.capacity(), 3);
        assert_eq!(unsafe { block.bytes(3) }, b"abc");
        block.shrink_to(0).unwrap();
        assert!(!block.is_allocated());
    }

    #[test]
    fn borrowed_block_is_copied_not_freed() {
        let mut buffer = [7u8; 4];
        let before = stats();
        {
            let ptr = NonNull::new(buffer.as_mut_ptr()).unwrap();
            let mut block = unsafe { RawBlock::from_raw_parts(ptr, 4, 1, 1) };
            assert!(block.is_borrowed());
            assert!(!block.is_allocated());
            block.grow(8).unwrap();
            assert!(!block.is_borrowed());
            assert_eq!(unsafe { block.bytes(8) }, &[7, 7, 7, 7, 0, 0, 0, 0]);
            assert_eq!(stats().live_blocks, before.live_blocks + 1);
        }
        assert_eq!(stats().live_blocks, before.live_blocks);
        assert_eq!(buffer, [7; 4]);
    }

    #[test]
    fn no_scan_blocks_are_classified() {
        let before = stats();
        let block = RawBlock::allocate(16, 4, 4, true).unwrap();
        let during = stats();
        assert_eq!(during.no_scan_bytes, before.no_scan_bytes + 64);
        assert_eq!(during.live_bytes, before.live_bytes + 64);
        drop(block);
        assert_eq!(stats().no_scan_bytes, before.no_scan_bytes);
    }

    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn panic_policy_panics() {
        or_fail::<()>(Err(RuntimeError::CapacityOverflow), AllocFailurePolicy::Panic);
    }

    #[test]
    fn abort_policy_never_unwinds_on_memory_errors() {
        let overflow = RuntimeError::CapacityOverflow;
        assert_eq!(failure_action(&overflow, AllocFailurePolicy::Abort), FailureAction::Abort);
        assert_eq!(failure_action(&overflow, AllocFailurePolicy::Panic), FailureAction::Panic);

        let failed = RuntimeError::AllocationFailed { size: 64, align: 8 };
        assert_eq!(
            failure_action(&failed, AllocFailurePolicy::Abort),
            FailureAction::AllocError(Layout::from_size_align(64, 8).unwrap())
        );
        assert_eq!(failure_action(&failed, AllocFailurePolicy::Panic), FailureAction::Panic);

        let bogus = RuntimeError::AllocationFailed { size: 64, align: 3 };
        assert_eq!(failure_action(&bogus, AllocFailurePolicy::Abort), FailureAction::Abort);
    }

    #[test]
    fn invalid_config_panics_under_either_policy() {
        let err = RuntimeError::InvalidConfig { reason: "alignment must be a power of two" };
        assert_eq!(failure_action(&err, AllocFailurePolicy::Abort), FailureAction::Panic);
        assert_eq!(failure_action(&err, AllocFailurePolicy::Panic), FailureAction::Panic);
    }
}
