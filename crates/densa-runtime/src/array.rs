//! Type-erased dynamic array.
//!
//! [`DenseArray`] stores elements of a fixed byte size chosen at construction.
//! Pushing moves the element bytes into the array, which owns them from then
//! on; when elements carry nested resources the owner supplies [`ElemFns`] so
//! that cloning and dropping the array can deep-copy and release them.

use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use bytemuck::Pod;

use crate::alloc::{RawBlock, next_capacity, or_fail};
use crate::config::{AllocFailurePolicy, ArrayConfig};
use crate::error::{Result, RuntimeError};

/// Deep-copy the value at `src` into uninitialised storage at `dst`.
pub type CloneFn = unsafe extern "C" fn(dst: *mut u8, src: *const u8);

/// Release the resources owned by the value at `ptr` (not the storage itself).
pub type FreeFn = unsafe extern "C" fn(ptr: *mut u8);

/// Element behaviour for arrays whose elements own nested resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElemFns {
    pub clone: Option<CloneFn>,
    pub free: Option<FreeFn>,
}

pub struct DenseArray {
    block: RawBlock,
    len: usize,
    fns: ElemFns,
    policy: AllocFailurePolicy,
}

impl DenseArray {
    /// An empty array. Nothing is allocated until the first push.
    pub fn new(elem_size: usize) -> Self {
        Self::with_config(elem_size, ArrayConfig::default())
    }

    pub fn with_capacity(elem_size: usize, capacity: usize) -> Self {
        Self::with_config(elem_size, ArrayConfig::default().with_initial_capacity(capacity))
    }

    pub fn with_config(elem_size: usize, config: ArrayConfig) -> Self {
        or_fail(Self::try_with_config(elem_size, config), config.on_alloc_failure)
    }

    pub fn try_with_config(elem_size: usize, config: ArrayConfig) -> Result<Self> {
        config.validate()?;
        let block = RawBlock::allocate(config.initial_capacity, elem_size, config.align, config.no_scan)?;
        Ok(Self {
            block,
            len: 0,
            fns: ElemFns::default(),
            policy: config.on_alloc_failure,
        })
    }

    /// Copy the elements packed in `bytes` into a fresh array.
    ///
    /// # Panics
    ///
    /// If `bytes` does not split evenly into `elem_size`-byte elements.
    pub fn from_bytes(elem_size: usize, bytes: &[u8]) -> Self {
        let count = match elem_size {
            0 => 0,
            size => {
                assert!(
                    bytes.len() % size == 0,
                    "{} bytes leave a trailing partial element of {}-byte elements",
                    bytes.len(),
                    size
                );
                bytes.len() / size
            }
        };
        let mut array = Self::with_capacity(elem_size, count);
        array.push_many(bytes, count);
        array
    }

    /// Build an array over a fixed buffer owned by the caller.
    ///
    /// The array never frees the buffer. Growing past `capacity` copies the
    /// contents into an owned allocation and leaves the buffer untouched.
    ///
    /// # Safety
    /// `ptr` must be aligned to `align`, valid for `capacity * elem_size`
    /// bytes and outlive the array; the first `len` elements must be
    /// initialised.
    pub unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        len: usize,
        capacity: usize,
        elem_size: usize,
        align: usize,
    ) -> Self {
        assert!(len <= capacity, "length {len} exceeds capacity {capacity}");
        Self {
            block: unsafe { RawBlock::from_raw_parts(ptr, capacity, elem_size, align) },
            len,
            fns: ElemFns::default(),
            policy: AllocFailurePolicy::default(),
        }
    }

    pub fn with_elem_fns(mut self, fns: ElemFns) -> Self {
        self.fns = fns;
        self
    }

    pub fn elem_fns(&self) -> ElemFns {
        self.fns
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.block.capacity()
    }

    pub fn elem_size(&self) -> usize {
        self.block.elem_size()
    }

    pub fn is_no_scan(&self) -> bool {
        self.block.is_no_scan()
    }

    pub fn is_borrowed(&self) -> bool {
        self.block.is_borrowed()
    }

    /// Start of the element storage, or null when nothing is allocated.
    pub fn data_ptr(&self) -> *const u8 {
        if self.block.is_allocated() || self.block.is_borrowed() {
            self.block.as_ptr()
        } else {
            ptr::null()
        }
    }

    /// All live elements packed back to back.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { self.block.bytes(self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { self.block.bytes_mut(self.len) }
    }

    fn check_elem(&self, elem: &[u8]) {
        assert_eq!(
            elem.len(),
            self.elem_size(),
            "element is {} bytes, array holds {}-byte elements",
            elem.len(),
            self.elem_size()
        );
    }

    fn check_type<T>(&self) {
        assert_eq!(
            mem::size_of::<T>(),
            self.elem_size(),
            "{} is {} bytes, array holds {}-byte elements",
            std::any::type_name::<T>(),
            mem::size_of::<T>(),
            self.elem_size()
        );
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.len {
            Ok(())
        } else {
            Err(RuntimeError::index(index, self.len))
        }
    }

    unsafe fn free_range(&mut self, start: usize, end: usize) {
        if let Some(free) = self.fns.free {
            for i in start..end {
                unsafe { free(self.block.elem_ptr(i)) };
            }
        }
    }

    /// Make room for `additional` more elements.
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        let required = self
            .len
            .checked_add(additional)
            .ok_or(RuntimeError::CapacityOverflow)?;
        if required > self.capacity() {
            self.block.grow(next_capacity(self.capacity(), required))?;
        }
        Ok(())
    }

    pub fn reserve(&mut self, additional: usize) {
        or_fail(self.try_reserve(additional), self.policy)
    }

    pub fn try_push(&mut self, elem: &[u8]) -> Result<()> {
        self.check_elem(elem);
        self.try_reserve(1)?;
        unsafe {
            ptr::copy_nonoverlapping(elem.as_ptr(), self.block.elem_ptr(self.len), elem.len());
        }
        self.len += 1;
        Ok(())
    }

    /// Append one element, taking ownership of its bytes.
    pub fn push(&mut self, elem: &[u8]) {
        or_fail(self.try_push(elem), self.policy)
    }

    /// Append `count` elements packed in `elems` with a single capacity check.
    pub fn push_many(&mut self, elems: &[u8], count: usize) {
        assert_eq!(
            elems.len(),
            count * self.elem_size(),
            "{} bytes do not hold {count} elements of {} bytes",
            elems.len(),
            self.elem_size()
        );
        self.reserve(count);
        unsafe {
            ptr::copy_nonoverlapping(elems.as_ptr(), self.block.elem_ptr(self.len), elems.len());
        }
        self.len += count;
    }

    /// Insert at `index`, shifting later elements right.
    pub fn insert(&mut self, index: usize, elem: &[u8]) -> Result<()> {
        self.check_elem(elem);
        if index > self.len {
            return Err(RuntimeError::index(index, self.len));
        }
        self.reserve(1);
        unsafe {
            self.block.copy_within(index, index + 1, self.len - index);
            ptr::copy_nonoverlapping(elem.as_ptr(), self.block.elem_ptr(index), elem.len());
        }
        self.len += 1;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<&[u8]> {
        self.check_index(index)?;
        let size = self.elem_size();
        Ok(&self.as_bytes()[index * size..(index + 1) * size])
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        self.check_index(index)?;
        let size = self.elem_size();
        Ok(&mut self.as_bytes_mut()[index * size..(index + 1) * size])
    }

    /// Replace the element at `index`, releasing the previous one.
    pub fn set(&mut self, index: usize, elem: &[u8]) -> Result<()> {
        self.check_elem(elem);
        self.check_index(index)?;
        unsafe {
            self.free_range(index, index + 1);
            ptr::copy_nonoverlapping(elem.as_ptr(), self.block.elem_ptr(index), elem.len());
        }
        Ok(())
    }

    /// Remove the element at `index`, releasing it and shifting the tail left.
    pub fn delete(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        unsafe {
            self.free_range(index, index + 1);
            self.remove_slot(index);
        }
        Ok(())
    }

    /// Remove the element at `index` and hand its bytes to the caller, who
    /// becomes responsible for any resources it owns.
    pub fn take(&mut self, index: usize) -> Result<Vec<u8>> {
        let taken = self.get(index)?.to_vec();
        unsafe { self.remove_slot(index) };
        Ok(taken)
    }

    unsafe fn remove_slot(&mut self, index: usize) {
        unsafe {
            self.block.copy_within(index + 1, index, self.len - index - 1);
            self.block.zero_range(self.len - 1, self.len);
        }
        self.len -= 1;
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let last = self.len.checked_sub(1)?;
        self.take(last).ok()
    }

    /// Drop elements past `new_len`. Capacity is kept.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len >= self.len {
            return;
        }
        unsafe {
            self.free_range(new_len, self.len);
            self.block.zero_range(new_len, self.len);
        }
        self.len = new_len;
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Give spare capacity back to the allocator.
    pub fn shrink_to_fit(&mut self) {
        or_fail(self.block.shrink_to(self.len), self.policy)
    }

    /// Borrow elements `lo..hi` without copying.
    pub fn slice(&self, lo: usize, hi: usize) -> Result<ArrayView<'_>> {
        ArrayView::new(self.as_bytes(), self.elem_size(), self.len).slice(lo, hi)
    }

    /// Mutably borrow elements `lo..hi`; writes land in this array.
    pub fn slice_mut(&mut self, lo: usize, hi: usize) -> Result<ArrayViewMut<'_>> {
        if lo > hi || hi > self.len {
            return Err(RuntimeError::slice(lo, hi, self.len));
        }
        let size = self.elem_size();
        let fns = self.fns;
        let bytes = &mut self.as_bytes_mut()[lo * size..hi * size];
        Ok(ArrayViewMut {
            bytes,
            elem_size: size,
            len: hi - lo,
            fns,
        })
    }

    pub fn as_view(&self) -> ArrayView<'_> {
        ArrayView::new(self.as_bytes(), self.elem_size(), self.len)
    }

    pub fn iter(&self) -> Iter<'_> {
        self.as_view().iter()
    }

    /// Deep copy: byte copy, then the element clone behaviour if any.
    pub fn try_clone(&self) -> Result<Self> {
        let block = match self.fns.clone {
            None => unsafe { self.block.duplicate(self.len)? },
            Some(clone) => {
                let mut block = RawBlock::allocate(
                    self.len,
                    self.elem_size(),
                    self.block.align(),
                    self.is_no_scan(),
                )?;
                for i in 0..self.len {
                    unsafe { clone(block.elem_ptr(i), self.block.elem_ptr(i)) };
                }
                block
            }
        };
        Ok(Self {
            block,
            len: self.len,
            fns: self.fns,
            policy: self.policy,
        })
    }

    /// Push a plain value whose size equals the element size.
    pub fn push_value<T: Pod>(&mut self, value: T) {
        self.check_type::<T>();
        self.push(bytemuck::bytes_of(&value));
    }

    pub fn get_value<T: Pod>(&self, index: usize) -> Result<T> {
        self.check_type::<T>();
        Ok(bytemuck::pod_read_unaligned(self.get(index)?))
    }

    pub fn set_value<T: Pod>(&mut self, index: usize, value: T) -> Result<()> {
        self.check_type::<T>();
        self.set(index, bytemuck::bytes_of(&value))
    }
}

impl Drop for DenseArray {
    fn drop(&mut self) {
        unsafe { self.free_range(0, self.len) };
    }
}

impl Clone for DenseArray {
    fn clone(&self) -> Self {
        or_fail(self.try_clone(), self.policy)
    }
}

impl PartialEq for DenseArray {
    fn eq(&self, other: &Self) -> bool {
        self.elem_size() == other.elem_size()
            && self.len == other.len
            && self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for DenseArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseArray")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("elem_size", &self.elem_size())
            .field("borrowed", &self.is_borrowed())
            .finish()
    }
}

impl<'a> IntoIterator for &'a DenseArray {
    type Item = &'a [u8];
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

// =============================================================================
// Views
// =============================================================================

/// Shared, non-owning view of a run of array elements.
#[derive(Clone, Copy)]
pub struct ArrayView<'a> {
    bytes: &'a [u8],
    elem_size: usize,
    len: usize,
}

impl<'a> ArrayView<'a> {
    fn new(bytes: &'a [u8], elem_size: usize, len: usize) -> Self {
        Self { bytes, elem_size, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index >= self.len {
            return Err(RuntimeError::index(index, self.len));
        }
        Ok(&self.bytes[index * self.elem_size..(index + 1) * self.elem_size])
    }

    pub fn get_value<T: Pod>(&self, index: usize) -> Result<T> {
        assert_eq!(mem::size_of::<T>(), self.elem_size, "element size mismatch");
        Ok(bytemuck::pod_read_unaligned(self.get(index)?))
    }

    pub fn slice(&self, lo: usize, hi: usize) -> Result<ArrayView<'a>> {
        if lo > hi || hi > self.len {
            return Err(RuntimeError::slice(lo, hi, self.len));
        }
        Ok(ArrayView::new(
            &self.bytes[lo * self.elem_size..hi * self.elem_size],
            self.elem_size,
            hi - lo,
        ))
    }

    pub fn iter(&self) -> Iter<'a> {
        Iter {
            bytes: self.bytes,
            elem_size: self.elem_size,
            front: 0,
            back: self.len,
        }
    }

    /// Copy the viewed elements into a new owned array.
    pub fn to_array(&self) -> DenseArray {
        let mut array = DenseArray::with_capacity(self.elem_size, self.len);
        array.push_many(self.bytes, self.len);
        array
    }
}

impl fmt::Debug for ArrayView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Exclusive, non-owning view of a run of array elements.
pub struct ArrayViewMut<'a> {
    bytes: &'a mut [u8],
    elem_size: usize,
    len: usize,
    fns: ElemFns,
}

impl ArrayViewMut<'_> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_view(&self) -> ArrayView<'_> {
        ArrayView::new(self.bytes, self.elem_size, self.len)
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        if index >= self.len {
            return Err(RuntimeError::index(index, self.len));
        }
        Ok(&mut self.bytes[index * self.elem_size..(index + 1) * self.elem_size])
    }

    /// Replace an element, releasing the previous one.
    pub fn set(&mut self, index: usize, elem: &[u8]) -> Result<()> {
        assert_eq!(elem.len(), self.elem_size, "element size mismatch");
        let free = self.fns.free;
        let slot = self.get_mut(index)?;
        if let Some(free) = free {
            unsafe { free(slot.as_mut_ptr()) };
        }
        slot.copy_from_slice(elem);
        Ok(())
    }

    pub fn set_value<T: Pod>(&mut self, index: usize, value: T) -> Result<()> {
        assert_eq!(mem::size_of::<T>(), self.elem_size, "element size mismatch");
        self.set(index, bytemuck::bytes_of(&value))
    }
}

/// Storage-order iterator over array elements.
#[derive(Clone)]
pub struct Iter<'a> {
    bytes: &'a [u8],
    elem_size: usize,
    front: usize,
    back: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.front == self.back {
            return None;
        }
        let start = self.front * self.elem_size;
        self.front += 1;
        Some(&self.bytes[start..start + self.elem_size])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        let start = self.back * self.elem_size;
        Some(&self.bytes[start..start + self.elem_size])
    }
}

impl ExactSizeIterator for Iter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::stats;
    use proptest::prelude::*;
    use std::cell::Cell;

    fn bytes_of(array: &DenseArray) -> Vec<u8> {
        array.iter().flatten().copied().collect()
    }

    #[test]
    fn delete_from_byte_array() {
        let mut array = DenseArray::new(1);
        for b in 1..=5u8 {
            array.push(&[b]);
        }
        array.delete(2).unwrap();
        assert_eq!(bytes_of(&array), [1, 2, 4, 5]);
        assert_eq!(array.len(), 4);
    }

    #[test]
    fn empty_array_allocates_lazily() {
        let mut array = DenseArray::new(4);
        assert_eq!(array.capacity(), 0);
        assert!(array.data_ptr().is_null());
        array.push_value(7i32);
        assert!(array.capacity() >= 1);
        assert!(!array.data_ptr().is_null());
    }

    #[test]
    fn get_out_of_bounds() {
        let mut array = DenseArray::new(4);
        array.push_value(1u32);
        assert_eq!(array.get(1), Err(RuntimeError::index(1, 1)));
        assert_eq!(array.get_value::<u32>(3), Err(RuntimeError::index(3, 1)));
        assert!(array.delete(1).is_err());
        assert!(array.set(5, &[0; 4]).is_err());
    }

    #[test]
    fn push_many_checks_capacity_once() {
        let mut array = DenseArray::new(2);
        let reallocs = stats().reallocations;
        let allocs = stats().total_allocations;
        array.push_many(&[1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0], 6);
        assert_eq!(stats().total_allocations, allocs + 1);
        assert_eq!(stats().reallocations, reallocs);
        assert_eq!(array.get_value::<u16>(5), Ok(6));
    }

    #[test]
    fn insert_shifts_right() {
        let mut array = DenseArray::from_bytes(1, &[1, 2, 4]);
        array.insert(2, &[3]).unwrap();
        array.insert(4, &[5]).unwrap();
        array.insert(0, &[0]).unwrap();
        assert_eq!(bytes_of(&array), [0, 1, 2, 3, 4, 5]);
        assert!(array.insert(9, &[9]).is_err());
    }

    #[test]
    fn truncate_keeps_capacity() {
        let mut array = DenseArray::from_bytes(1, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let capacity = array.capacity();
        array.truncate(2);
        assert_eq!(array.capacity(), capacity);
        assert_eq!(bytes_of(&array), [1, 2]);
        array.shrink_to_fit();
        assert_eq!(array.capacity(), 2);
    }

    #[test]
    fn pop_and_take() {
        let mut array = DenseArray::from_bytes(2, &[1, 1, 2, 2, 3, 3]);
        assert_eq!(array.pop(), Some(vec![3, 3]));
        assert_eq!(array.take(0), Ok(vec![1, 1]));
        assert_eq!(bytes_of(&array), [2, 2]);
        array.clear();
        assert_eq!(array.pop(), None);
    }

    #[test]
    fn slices_share_storage() {
        let mut array = DenseArray::from_bytes(1, &[10, 20, 30, 40, 50]);
        {
            let view = array.slice(1, 4).unwrap();
            assert_eq!(view.len(), 3);
            assert_eq!(view.get(0), Ok(&[20u8][..]));
            assert_eq!(view.as_bytes().as_ptr(), unsafe { array.data_ptr().add(1) });
            let inner = view.slice(1, 3).unwrap();
            assert_eq!(inner.as_bytes(), &[30, 40]);
        }
        {
            let mut view = array.slice_mut(3, 5).unwrap();
            view.set(1, &[99]).unwrap();
            view.get_mut(0).unwrap()[0] = 44;
        }
        assert_eq!(bytes_of(&array), [10, 20, 30, 44, 99]);
        assert_eq!(
            array.slice(4, 6).unwrap_err(),
            RuntimeError::slice(4, 6, 5)
        );
        assert!(array.slice(3, 2).is_err());
        assert!(array.slice(5, 5).unwrap().is_empty());
    }

    #[test]
    fn iteration_is_restartable() {
        let array = DenseArray::from_bytes(1, &[1, 2, 3]);
        let iter = array.iter();
        assert_eq!(iter.clone().count(), 3);
        assert_eq!(iter.rev().map(|e| e[0]).collect::<Vec<_>>(), [3, 2, 1]);
        assert_eq!((&array).into_iter().len(), 3);
    }

    #[test]
    fn clone_is_deep_for_plain_bytes() {
        let array = DenseArray::from_bytes(4, &[1, 0, 0, 0, 2, 0, 0, 0]);
        let mut copy = array.clone();
        copy.set_value(0, 9u32).unwrap();
        assert_eq!(array.get_value::<u32>(0), Ok(1));
        assert_eq!(copy.get_value::<u32>(0), Ok(9));
        assert_ne!(array, copy);
    }

    #[test]
    fn typed_values_through_views() {
        let mut array = DenseArray::new(3);
        array.push_value([1u8, 2, 3]);
        array.push_value([4u8, 5, 6]);
        array.slice_mut(1, 2).unwrap().set_value(0, [7u8, 8, 9]).unwrap();
        let view = array.as_view();
        assert_eq!(view.get_value::<[u8; 3]>(0), Ok([1, 2, 3]));
        assert_eq!(view.get_value::<[u8; 3]>(1), Ok([7, 8, 9]));
        assert_eq!(view.get_value::<[u8; 3]>(2), Err(RuntimeError::index(2, 2)));
    }

    #[test]
    fn odd_alignment_is_an_error() {
        let config = ArrayConfig::default().with_align(3).with_initial_capacity(4);
        assert_eq!(
            DenseArray::try_with_config(4, config).unwrap_err(),
            RuntimeError::InvalidConfig {
                reason: "align must be a power of two"
            }
        );
        assert!(RawBlock::allocate(4, 4, 3, false).is_err());
    }

    #[test]
    fn zero_sized_elements() {
        let mut array = DenseArray::new(0);
        array.push(&[]);
        array.push(&[]);
        assert_eq!(array.len(), 2);
        assert_eq!(array.iter().count(), 2);
        array.delete(0).unwrap();
        assert_eq!(array.len(), 1);
    }

    #[test]
    #[should_panic(expected = "5 bytes leave a trailing partial element of 2-byte elements")]
    fn from_bytes_rejects_trailing_bytes() {
        DenseArray::from_bytes(2, &[1, 0, 2, 0, 3]);
    }

    #[test]
    #[should_panic(expected = "array holds 4-byte elements")]
    fn wrong_element_size_panics() {
        DenseArray::new(4).push(&[1, 2]);
    }

    thread_local! {
        static FREED: Cell<usize> = const { Cell::new(0) };
        static CLONED: Cell<usize> = const { Cell::new(0) };
    }

    unsafe extern "C" fn count_free(_ptr: *mut u8) {
        FREED.with(|c| c.set(c.get() + 1));
    }

    unsafe extern "C" fn count_clone(dst: *mut u8, src: *const u8) {
        CLONED.with(|c| c.set(c.get() + 1));
        unsafe { ptr::copy_nonoverlapping(src, dst, 1) };
    }

    #[test]
    fn element_fns_run_on_clone_set_delete_and_drop() {
        let fns = ElemFns {
            clone: Some(count_clone),
            free: Some(count_free),
        };
        let mut array = DenseArray::from_bytes(1, &[1, 2, 3, 4]).with_elem_fns(fns);
        let copy = array.clone();
        assert_eq!(CLONED.with(Cell::get), 4);
        assert_eq!(copy, array);

        array.set(0, &[9]).unwrap();
        array.delete(1).unwrap();
        assert_eq!(FREED.with(Cell::get), 2);
        let _ = array.take(0).unwrap();
        assert_eq!(FREED.with(Cell::get), 2);

        drop(array);
        assert_eq!(FREED.with(Cell::get), 4);
        drop(copy);
        assert_eq!(FREED.with(Cell::get), 8);
    }

    #[test]
    fn fixed_buffer_is_borrowed_until_growth() {
        let mut buffer = [1u8, 2, 3, 0];
        let ptr = NonNull::new(buffer.as_mut_ptr()).unwrap();
        {
            let mut array = unsafe { DenseArray::from_raw_parts(ptr, 3, 4, 1, 1) };
            assert!(array.is_borrowed());
            array.push(&[4]);
            assert!(array.is_borrowed());
            array.push(&[5]);
            assert!(!array.is_borrowed());
            array.set(0, &[100]).unwrap();
            assert_eq!(bytes_of(&array), [100, 2, 3, 4, 5]);
        }
        assert_eq!(buffer, [1, 2, 3, 4]);
    }

    #[test]
    fn no_scan_hint_is_kept() {
        let array = DenseArray::with_config(8, ArrayConfig::default().with_no_scan(true));
        assert!(array.is_no_scan());
    }

    proptest! {
        #[test]
        fn pushes_are_retrievable(values in proptest::collection::vec(any::<u64>(), 0..200)) {
            let mut array = DenseArray::new(8);
            for &v in &values {
                array.push_value(v);
            }
            prop_assert_eq!(array.len(), values.len());
            for (i, &v) in values.iter().enumerate() {
                prop_assert_eq!(array.get_value::<u64>(i), Ok(v));
            }
        }

        #[test]
        fn delete_preserves_order(
            values in proptest::collection::vec(any::<u8>(), 1..100),
            pick in any::<prop::sample::Index>(),
        ) {
            let index = pick.index(values.len());
            let mut array = DenseArray::from_bytes(1, &values);
            array.delete(index).unwrap();
            let mut expected = values.clone();
            expected.remove(index);
            prop_assert_eq!(array.as_bytes(), &expected[..]);
        }
    }
}
