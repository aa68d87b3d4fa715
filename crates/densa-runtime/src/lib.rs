//! Densa container runtime.
//!
//! Provides the data structures every compiled Densa program links against:
//! - Aligned block allocation with configurable failure policy (`alloc`)
//! - Type-erased dynamic array with borrowed views (`DenseArray`, `ArrayView`)
//! - Insertion-ordered hash maps, type-erased (`RawMap`) and generic (`Map`)
//! - Option/Error result encoding (`RtOption`, `Outcome`)
//! - Reference-counted strings (`RtString`)
//! - The `densa_*` C ABI over the above (`exports`)
//!
//! Containers are single-threaded; none of the type-erased ones are `Send`.

pub mod alloc;
mod array;
mod config;
mod error;
pub mod exports;
mod index;
mod map;
pub mod option;
mod raw_map;
mod string;

pub use alloc::{AllocStats, stats};
pub use array::{ArrayView, ArrayViewMut, CloneFn, DenseArray, ElemFns, FreeFn};
pub use config::{AllocFailurePolicy, ArrayConfig, MapConfig};
pub use error::{Result, RuntimeError};
pub use map::Map;
pub use option::{NONE_CODE, Outcome, RtError, RtOption};
pub use raw_map::{EqFn, HashFn, MapFns, RawMap};
pub use string::RtString;
