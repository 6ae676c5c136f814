//! Runtime errors
//!
//! Two layers:
//! - [`ErrorKind`] / [`Exception`]: exceptions visible to interpreted code.
//!   Handler blocks match on the kind (and its parents).
//! - [`VmError`]: what Rust callers see. Exceptions that escape every frame
//!   surface here, next to `SystemExit` and fatal invariant violations.

use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/* ===================== Exception Kinds ===================== */

/// Exception classes known to the runtime
///
/// The hierarchy is shallow: `parent()` links a kind to the class that also
/// catches it (`ArgumentCount` is a `TypeError`, `GeneratorExhausted` is a
/// `StopIteration`, I/O and memory failures are `SystemError`s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    TypeError,
    /// Wrong number of arguments supplied to a callable
    ArgumentCount,
    ValueError,
    NameError,
    IndexError,
    KeyError,
    ZeroDivisionError,
    SystemError,
    IoError,
    MemoryError,
    StopIteration,
    /// Resuming a generator that already completed
    GeneratorExhausted,
    AssertionError,
    SystemExit,
}

impl ErrorKind {
    pub fn parent(self) -> Option<ErrorKind> {
        match self {
            ErrorKind::ArgumentCount => Some(ErrorKind::TypeError),
            ErrorKind::IoError | ErrorKind::MemoryError => Some(ErrorKind::SystemError),
            ErrorKind::GeneratorExhausted => Some(ErrorKind::StopIteration),
            _ => None,
        }
    }

    /// True if a handler for `class` catches an exception of this kind
    pub fn is_a(self, class: ErrorKind) -> bool {
        let mut kind = Some(self);
        while let Some(k) = kind {
            if k == class {
                return true;
            }
            kind = k.parent();
        }
        false
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ArgumentCount => "ArgumentCount",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::NameError => "NameError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::SystemError => "SystemError",
            ErrorKind::IoError => "IoError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::StopIteration => "StopIteration",
            ErrorKind::GeneratorExhausted => "GeneratorExhausted",
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::SystemExit => "SystemExit",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/* ===================== Exception ===================== */

/// An exception raised inside the runtime
///
/// `value` carries a payload: the return value of a finished generator for
/// `StopIteration`, the exit code for `SystemExit`. While an exception is in
/// flight its payload is pinned before anything is allocated.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct Exception {
    pub kind: ErrorKind,
    pub message: String,
    pub value: Value,
}

impl Exception {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            value: Value::None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn is_a(&self, class: ErrorKind) -> bool {
        self.kind.is_a(class)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/* ===================== VM Errors ===================== */

#[derive(Debug, Error)]
pub enum VmError {
    /// An exception, either still propagating or uncaught
    #[error(transparent)]
    Exception(#[from] Exception),

    /// `SystemExit` escaped every handler
    #[error("SystemExit({0})")]
    Exit(i32),

    /// A runtime invariant was violated (malformed code, operand stack overflow)
    #[error("fatal runtime error: {0}")]
    Fatal(String),
}

impl VmError {
    pub fn raise(kind: ErrorKind, message: impl Into<String>) -> Self {
        VmError::Exception(Exception::new(kind, message))
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        VmError::Fatal(message.into())
    }

    /// Exception kind, if this error is an exception
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            VmError::Exception(exc) => Some(exc.kind),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<&Exception> {
        match self {
            VmError::Exception(exc) => Some(exc),
            _ => None,
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;
