//! Error types for container operations

use derive_more::{Display, Error};

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Display, Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[display("index {index} out of range for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[display("slice range {lo}..{hi} out of range for length {len}")]
    SliceOutOfBounds { lo: usize, hi: usize, len: usize },

    #[display("capacity overflow")]
    CapacityOverflow,

    #[display("allocation of {size} bytes (align {align}) failed")]
    AllocationFailed { size: usize, align: usize },

    #[display("invalid container config: {reason}")]
    InvalidConfig { reason: &'static str },
}

impl RuntimeError {
    pub(crate) fn index(index: usize, len: usize) -> Self {
        RuntimeError::IndexOutOfBounds { index, len }
    }

    pub(crate) fn slice(lo: usize, hi: usize, len: usize) -> Self {
        RuntimeError::SliceOutOfBounds { lo, hi, len }
    }

    /// Stable numeric code used across the C ABI and in [`crate::RtError`].
    pub fn code(&self) -> i32 {
        match self {
            RuntimeError::IndexOutOfBounds { .. } => 1,
            RuntimeError::SliceOutOfBounds { .. } => 2,
            RuntimeError::CapacityOverflow => 3,
            RuntimeError::AllocationFailed { .. } => 4,
            RuntimeError::InvalidConfig { .. } => 5,
        }
    }
}
