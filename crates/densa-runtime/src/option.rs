//! Option/Result encoding used as the return contract of fallible runtime
//! operations.
//!
//! An [`RtOption`] holds either the raw bytes of a value or an [`RtError`].
//! Rust callers should prefer [`Outcome<T>`]; the byte form exists for
//! generated code and the C ABI, where the value type is only known by size.

use std::fmt;
use std::mem;

use bytemuck::Pod;
use derive_more::{Display, Error};

use crate::error::RuntimeError;

/// Code carried by the "absent" error of [`RtOption::none`].
pub const NONE_CODE: i32 = 0;

const NONE_MESSAGE: &str = "none";

#[derive(Display, Debug, Clone, PartialEq, Eq, Error)]
#[display("{message} (code {code})")]
pub struct RtError {
    message: String,
    code: i32,
}

impl RtError {
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub fn none() -> Self {
        Self::new(NONE_MESSAGE, NONE_CODE)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    /// Whether this is the absent marker rather than a failure.
    pub fn is_none(&self) -> bool {
        self.code == NONE_CODE && self.message == NONE_MESSAGE
    }
}

impl From<RuntimeError> for RtError {
    fn from(err: RuntimeError) -> Self {
        Self::new(err.to_string(), err.code())
    }
}

/// Typed form of [`RtOption`].
pub type Outcome<T> = std::result::Result<T, RtError>;

/// Shorthand for a failed [`Outcome`].
pub fn error<T>(message: impl Into<String>, code: i32) -> Outcome<T> {
    Err(RtError::new(message, code))
}

#[derive(Clone, PartialEq, Eq)]
enum State {
    Value(Box<[u8]>),
    Error(RtError),
}

/// Either a value of known size or an error, never both.
#[derive(Clone, PartialEq, Eq)]
pub struct RtOption {
    state: State,
}

impl RtOption {
    /// Wraps a copy of `value`.
    pub fn ok(value: &[u8]) -> Self {
        Self {
            state: State::Value(value.into()),
        }
    }

    pub fn ok_value<T: Pod>(value: T) -> Self {
        Self::ok(bytemuck::bytes_of(&value))
    }

    pub fn error(message: impl Into<String>, code: i32) -> Self {
        Self {
            state: State::Error(RtError::new(message, code)),
        }
    }

    pub fn none() -> Self {
        Self {
            state: State::Error(RtError::none()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, State::Error(_))
    }

    pub fn is_ok(&self) -> bool {
        !self.is_error()
    }

    /// Size in bytes of the wrapped value, zero for errors.
    pub fn value_size(&self) -> usize {
        match &self.state {
            State::Value(bytes) => bytes.len(),
            State::Error(_) => 0,
        }
    }

    pub fn value(&self) -> Result<&[u8], &RtError> {
        match &self.state {
            State::Value(bytes) => Ok(bytes),
            State::Error(err) => Err(err),
        }
    }

    /// The value read as `T`.
    ///
    /// Only types valid for every bit pattern can be read back:
    ///
    /// ```compile_fail
    /// # use densa_runtime::RtOption;
    /// let flag = RtOption::ok(&[2]).value_as::<bool>();
    /// ```
    ///
    /// # Panics
    ///
    /// If the wrapped value is not exactly `size_of::<T>()` bytes.
    pub fn value_as<T: Pod>(&self) -> Result<T, &RtError> {
        let bytes = self.value()?;
        assert_eq!(bytes.len(), mem::size_of::<T>(), "value size mismatch");
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn err(&self) -> Option<&RtError> {
        match &self.state {
            State::Value(_) => None,
            State::Error(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Outcome<Box<[u8]>> {
        match self.state {
            State::Value(bytes) => Ok(bytes),
            State::Error(err) => Err(err),
        }
    }
}

impl<T: Pod> From<Outcome<T>> for RtOption {
    fn from(outcome: Outcome<T>) -> Self {
        match outcome {
            Ok(value) => Self::ok_value(value),
            Err(err) => Self {
                state: State::Error(err),
            },
        }
    }
}

impl From<RuntimeError> for RtOption {
    fn from(err: RuntimeError) -> Self {
        Self {
            state: State::Error(err.into()),
        }
    }
}

impl fmt::Debug for RtOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Value(bytes) => f.debug_tuple("Ok").field(bytes).finish(),
            State::Error(err) if err.is_none() => f.write_str("None"),
            State::Error(err) => f.debug_tuple("Error").field(err).finish(),
        }
    }
}
