//! C ABI for generated code.
//!
//! Containers cross the boundary as opaque boxed handles. Element, key and
//! value arguments are pointers to exactly as many bytes as the container was
//! created with. Functions report failure through status codes or null
//! handles and never unwind into the caller.

use std::ptr;

use crate::array::{CloneFn, DenseArray, FreeFn};
use crate::config::ArrayConfig;
use crate::option::RtOption;
use crate::raw_map::{EqFn, HashFn, MapFns, RawMap};

/// Success.
pub const DENSA_OK: i32 = 0;
/// A required handle or pointer argument was null.
pub const DENSA_NULL: i32 = -1;
/// The key is not in the map, or the option holds no error.
pub const DENSA_NOT_FOUND: i32 = -2;
/// The option holds an error; read it with `densa_option_error_code`.
pub const DENSA_ERROR: i32 = -3;
// Positive statuses are `RuntimeError::code` values.

fn status(result: crate::Result<()>) -> i32 {
    match result {
        Ok(()) => DENSA_OK,
        Err(err) => {
            tracing::debug!(%err, "runtime call failed");
            err.code()
        }
    }
}

/// `len` bytes at `ptr`; `None` when a non-empty range has a null pointer.
unsafe fn bytes<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        Some(&[])
    } else if ptr.is_null() {
        None
    } else {
        Some(unsafe { std::slice::from_raw_parts(ptr, len) })
    }
}

/// Copy `src` to `out`, which must have room for `src.len()` bytes.
unsafe fn copy_out(src: &[u8], out: *mut u8) -> i32 {
    if src.is_empty() {
        return DENSA_OK;
    }
    if out.is_null() {
        return DENSA_NULL;
    }
    unsafe { ptr::copy_nonoverlapping(src.as_ptr(), out, src.len()) };
    DENSA_OK
}

// =============================================================================
// Array
// =============================================================================

/// Create an array of `elem_size`-byte elements. Returns null if the initial
/// allocation fails.
#[unsafe(no_mangle)]
pub extern "C" fn densa_array_new(elem_size: usize, capacity: usize) -> *mut DenseArray {
    let config = ArrayConfig::default().with_initial_capacity(capacity);
    match DenseArray::try_with_config(elem_size, config) {
        Ok(array) => Box::into_raw(Box::new(array)),
        Err(err) => {
            tracing::warn!(%err, elem_size, capacity, "array creation failed");
            ptr::null_mut()
        }
    }
}

/// # Safety
///
/// `array` must come from `densa_array_new` and not have been freed, or be
/// null (no-op).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_array_free(array: *mut DenseArray) {
    if !array.is_null() {
        drop(unsafe { Box::from_raw(array) });
    }
}

/// # Safety
///
/// `array` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_array_len(array: *const DenseArray) -> usize {
    unsafe { array.as_ref() }.map_or(0, DenseArray::len)
}

/// # Safety
///
/// `array` must be a live handle or null; `elem` must point to `elem_size`
/// readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_array_push(array: *mut DenseArray, elem: *const u8) -> i32 {
    let Some(array) = (unsafe { array.as_mut() }) else {
        return DENSA_NULL;
    };
    let Some(elem) = (unsafe { bytes(elem, array.elem_size()) }) else {
        return DENSA_NULL;
    };
    status(array.try_push(elem))
}

/// Copy element `index` into `out`.
///
/// # Safety
///
/// `array` must be a live handle or null; `out` must have room for
/// `elem_size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_array_get(array: *const DenseArray, index: usize, out: *mut u8) -> i32 {
    let Some(array) = (unsafe { array.as_ref() }) else {
        return DENSA_NULL;
    };
    match array.get(index) {
        Ok(elem) => unsafe { copy_out(elem, out) },
        Err(err) => status(Err(err)),
    }
}

/// # Safety
///
/// `array` must be a live handle or null; `elem` must point to `elem_size`
/// readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_array_set(array: *mut DenseArray, index: usize, elem: *const u8) -> i32 {
    let Some(array) = (unsafe { array.as_mut() }) else {
        return DENSA_NULL;
    };
    let Some(elem) = (unsafe { bytes(elem, array.elem_size()) }) else {
        return DENSA_NULL;
    };
    status(array.set(index, elem))
}

/// # Safety
///
/// `array` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_array_delete(array: *mut DenseArray, index: usize) -> i32 {
    let Some(array) = (unsafe { array.as_mut() }) else {
        return DENSA_NULL;
    };
    status(array.delete(index))
}

// =============================================================================
// Map
// =============================================================================

/// Create a map. `clone` and `free` apply to keys; values are plain bytes.
/// Passing null for both `hash` and `eq` selects byte-wise hashing for key
/// sizes 1, 2, 4, 8 and 16. Returns null for an unusable combination.
#[unsafe(no_mangle)]
pub extern "C" fn densa_map_new(
    key_size: usize,
    value_size: usize,
    hash: Option<HashFn>,
    eq: Option<EqFn>,
    clone: Option<CloneFn>,
    free: Option<FreeFn>,
) -> *mut RawMap {
    let fns = match (hash, eq) {
        (Some(hash), Some(eq)) => MapFns {
            hash,
            eq,
            clone_key: None,
            free_key: None,
            clone_value: None,
            free_value: None,
        },
        (None, None) => match MapFns::for_key_size(key_size) {
            Some(fns) => fns,
            None => {
                tracing::warn!(key_size, "no default hash for key size");
                return ptr::null_mut();
            }
        },
        _ => return ptr::null_mut(),
    };
    let fns = MapFns {
        clone_key: clone,
        free_key: free,
        ..fns
    };
    Box::into_raw(Box::new(RawMap::new(key_size, value_size, fns)))
}

/// # Safety
///
/// `map` must come from `densa_map_new` and not have been freed, or be null
/// (no-op).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_map_free(map: *mut RawMap) {
    if !map.is_null() {
        drop(unsafe { Box::from_raw(map) });
    }
}

/// # Safety
///
/// `map` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_map_len(map: *const RawMap) -> usize {
    unsafe { map.as_ref() }.map_or(0, RawMap::len)
}

/// Insert or update. Returns 1 for a new key, 0 for an update.
///
/// # Safety
///
/// `map` must be a live handle or null; `key` and `value` must point to
/// `key_size` and `value_size` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_map_set(map: *mut RawMap, key: *const u8, value: *const u8) -> i32 {
    let Some(map) = (unsafe { map.as_mut() }) else {
        return DENSA_NULL;
    };
    let (Some(key), Some(value)) = (unsafe { bytes(key, map.key_size()) }, unsafe {
        bytes(value, map.value_size())
    }) else {
        return DENSA_NULL;
    };
    i32::from(map.set(key, value))
}

/// Copy the value for `key` into `out`.
///
/// # Safety
///
/// `map` must be a live handle or null; `key` must point to `key_size`
/// readable bytes; `out` must have room for `value_size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_map_get(map: *const RawMap, key: *const u8, out: *mut u8) -> i32 {
    let Some(map) = (unsafe { map.as_ref() }) else {
        return DENSA_NULL;
    };
    let Some(key) = (unsafe { bytes(key, map.key_size()) }) else {
        return DENSA_NULL;
    };
    match map.get(key) {
        Some(value) => unsafe { copy_out(value, out) },
        None => DENSA_NOT_FOUND,
    }
}

/// # Safety
///
/// `map` must be a live handle or null; `key` must point to `key_size`
/// readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_map_delete(map: *mut RawMap, key: *const u8) -> i32 {
    let Some(map) = (unsafe { map.as_mut() }) else {
        return DENSA_NULL;
    };
    let Some(key) = (unsafe { bytes(key, map.key_size()) }) else {
        return DENSA_NULL;
    };
    if map.delete(key) { DENSA_OK } else { DENSA_NOT_FOUND }
}

// =============================================================================
// Option
// =============================================================================

/// # Safety
///
/// `value` must point to `size` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_option_ok(value: *const u8, size: usize) -> *mut RtOption {
    match unsafe { bytes(value, size) } {
        Some(value) => Box::into_raw(Box::new(RtOption::ok(value))),
        None => ptr::null_mut(),
    }
}

/// Invalid UTF-8 in `message` is replaced rather than rejected.
///
/// # Safety
///
/// `message` must point to `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_option_error(message: *const u8, len: usize, code: i32) -> *mut RtOption {
    let Some(message) = (unsafe { bytes(message, len) }) else {
        return ptr::null_mut();
    };
    let message = String::from_utf8_lossy(message);
    Box::into_raw(Box::new(RtOption::error(message, code)))
}

/// A null option counts as an error.
///
/// # Safety
///
/// `option` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_option_is_error(option: *const RtOption) -> bool {
    unsafe { option.as_ref() }.is_none_or(RtOption::is_error)
}

/// Copy the wrapped value into `out`. Returns `DENSA_ERROR` for any error
/// option, whatever its code, and leaves `out` untouched.
///
/// # Safety
///
/// `option` must be a live handle or null; `out` must have room for the
/// value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_option_value(option: *const RtOption, out: *mut u8) -> i32 {
    let Some(option) = (unsafe { option.as_ref() }) else {
        return DENSA_NULL;
    };
    match option.value() {
        Ok(value) => unsafe { copy_out(value, out) },
        Err(_) => DENSA_ERROR,
    }
}

/// Write the error's code to `code`. Returns `DENSA_NOT_FOUND` when the
/// option holds a value.
///
/// # Safety
///
/// `option` must be a live handle or null; `code` must be writable or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_option_error_code(option: *const RtOption, code: *mut i32) -> i32 {
    let Some(option) = (unsafe { option.as_ref() }) else {
        return DENSA_NULL;
    };
    let Some(err) = option.err() else {
        return DENSA_NOT_FOUND;
    };
    if code.is_null() {
        return DENSA_NULL;
    }
    unsafe { code.write(err.code()) };
    DENSA_OK
}

/// # Safety
///
/// `option` must come from one of the `densa_option_*` constructors and not
/// have been freed, or be null (no-op).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn densa_option_free(option: *mut RtOption) {
    if !option.is_null() {
        drop(unsafe { Box::from_raw(option) });
    }
}
