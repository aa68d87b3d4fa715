//! Reference-counted runtime string.
//!
//! String literals in compiled programs are `'static` and never counted;
//! strings built at run time share one heap buffer through an [`Rc`].
//! Cloning either kind is O(1).

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::{self, ManuallyDrop};
use std::ops::Deref;
use std::ptr;
use std::rc::Rc;

use rustc_hash::FxHasher;

use crate::array::{DenseArray, ElemFns};
use crate::raw_map::MapFns;

// Word-sized tag: both variants are two words, so the cell has no padding.
#[derive(Clone)]
#[repr(usize)]
enum Repr {
    Literal(&'static str),
    Counted(Rc<str>),
}

#[derive(Clone)]
#[repr(transparent)]
pub struct RtString(Repr);

impl RtString {
    /// Size of the cell an `RtString` occupies inside containers.
    pub const CELL_SIZE: usize = mem::size_of::<RtString>();

    pub const fn literal(s: &'static str) -> Self {
        RtString(Repr::Literal(s))
    }

    pub fn new(s: &str) -> Self {
        RtString(Repr::Counted(Rc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        match &self.0 {
            Repr::Literal(s) => s,
            Repr::Counted(rc) => rc,
        }
    }

    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }

    /// Number of `RtString`s sharing this buffer; `None` for literals.
    pub fn ref_count(&self) -> Option<usize> {
        match &self.0 {
            Repr::Literal(_) => None,
            Repr::Counted(rc) => Some(Rc::strong_count(rc)),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.0, Repr::Literal(_))
    }

    pub fn concat(&self, other: &RtString) -> RtString {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut joined = String::with_capacity(self.len() + other.len());
        joined.push_str(self.as_str());
        joined.push_str(other.as_str());
        joined.into()
    }

    /// The in-memory cell of this string, for passing as a key or value to
    /// containers built with [`MapFns::string`] or [`ElemFns::string`].
    /// Containers clone from the cell; `self` keeps its own reference.
    pub fn as_cell(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts((self as *const Self).cast::<u8>(), Self::CELL_SIZE) }
    }

    /// Borrow the string stored in a container cell.
    ///
    /// # Safety
    ///
    /// `cell` must hold a live `RtString` and be aligned for it.
    pub unsafe fn from_cell(cell: &[u8]) -> &RtString {
        debug_assert_eq!(cell.len(), Self::CELL_SIZE);
        unsafe { &*cell.as_ptr().cast::<RtString>() }
    }
}

impl Default for RtString {
    fn default() -> Self {
        RtString::literal("")
    }
}

impl Deref for RtString {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for RtString {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for RtString {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq for RtString {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for RtString {}

impl PartialEq<str> for RtString {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for RtString {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl PartialOrd for RtString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RtString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for RtString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl fmt::Display for RtString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for RtString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl From<&str> for RtString {
    fn from(s: &str) -> Self {
        RtString::new(s)
    }
}

impl From<String> for RtString {
    fn from(s: String) -> Self {
        RtString(Repr::Counted(Rc::from(s)))
    }
}

// Cells handed to these functions may sit at any address, so strings are
// read out unaligned and never dropped through a borrowed view.

unsafe fn peek(cell: *const u8) -> ManuallyDrop<RtString> {
    ManuallyDrop::new(unsafe { ptr::read_unaligned(cell.cast::<RtString>()) })
}

unsafe extern "C" fn hash_string(cell: *const u8) -> u64 {
    let s = unsafe { peek(cell) };
    let mut hasher = FxHasher::default();
    hasher.write(s.as_bytes());
    hasher.write_u8(0xff);
    hasher.finish()
}

unsafe extern "C" fn eq_string(a: *const u8, b: *const u8) -> bool {
    let (a, b) = unsafe { (peek(a), peek(b)) };
    a.as_str() == b.as_str()
}

unsafe extern "C" fn clone_string(dst: *mut u8, src: *const u8) {
    let src = unsafe { peek(src) };
    unsafe { ptr::write_unaligned(dst.cast::<RtString>(), RtString::clone(&src)) };
}

unsafe extern "C" fn free_string(cell: *mut u8) {
    drop(unsafe { ptr::read_unaligned(cell.cast::<RtString>()) });
}

impl MapFns {
    /// Keys are [`RtString`] cells; values are plain bytes.
    pub fn string() -> Self {
        MapFns {
            hash: hash_string,
            eq: eq_string,
            clone_key: Some(clone_string),
            free_key: Some(free_string),
            clone_value: None,
            free_value: None,
        }
    }

    /// Values are [`RtString`] cells.
    pub fn with_string_values(self) -> Self {
        self.with_value_fns(Some(clone_string), Some(free_string))
    }
}

impl ElemFns {
    /// Elements are [`RtString`] cells.
    pub fn string() -> Self {
        ElemFns {
            clone: Some(clone_string),
            free: Some(free_string),
        }
    }
}

impl DenseArray {
    /// Move `s` into the array. The array must hold [`RtString`] cells and be
    /// built with [`ElemFns::string`], which releases the reference again.
    ///
    /// The cell is copied straight from `s` in memory, so its pointers stay
    /// valid pointers rather than passing through a byte array.
    pub fn push_string(&mut self, s: RtString) {
        self.push(s.as_cell());
        mem::forget(s);
    }
}
