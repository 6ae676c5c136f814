//! Temporary roots
//!
//! A bounded LIFO of pinned values. Anything on it survives collection even
//! when nothing else refers to it. Pins nest strictly: each push hands back a
//! handle and the handle must be popped before anything pushed earlier.

use crate::error::{ErrorKind, VmError, VmResult};
use crate::types::Value;

/// Proof of a pin; pass it back to release the pin
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pinned value must be released with pop_temp_root"]
pub struct TempRootHandle(usize);

#[derive(Debug)]
pub struct TempRoots {
    entries: Vec<Value>,
    limit: usize,
}

impl TempRoots {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::with_capacity(limit),
            limit,
        }
    }

    pub fn push(&mut self, value: Value) -> VmResult<TempRootHandle> {
        if self.entries.len() >= self.limit {
            return Err(VmError::raise(
                ErrorKind::SystemError,
                format!("temp-root stack overflow (depth {})", self.limit),
            ));
        }
        self.entries.push(value);
        Ok(TempRootHandle(self.entries.len() - 1))
    }

    /// Release the most recent pin. Panics if `handle` isn't it.
    pub fn pop(&mut self, handle: TempRootHandle) {
        assert!(
            handle.0 + 1 == self.entries.len(),
            "temp root popped out of order: handle {} with depth {}",
            handle.0,
            self.entries.len()
        );
        self.entries.pop();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_nesting() {
        let mut roots = TempRoots::new(4);
        let h1 = roots.push(Value::Int(1)).unwrap();
        let h2 = roots.push(Value::Int(2)).unwrap();
        let h3 = roots.push(Value::Int(3)).unwrap();
        assert_eq!(roots.len(), 3);
        roots.pop(h3);
        roots.pop(h2);
        roots.pop(h1);
        assert!(roots.is_empty());
    }

    #[test]
    #[should_panic(expected = "temp root popped out of order")]
    fn test_out_of_order_pop_panics() {
        let mut roots = TempRoots::new(4);
        let h1 = roots.push(Value::Int(1)).unwrap();
        let _h2 = roots.push(Value::Int(2)).unwrap();
        roots.pop(h1);
    }

    #[test]
    fn test_overflow_is_system_error() {
        let mut roots = TempRoots::new(1);
        let _h = roots.push(Value::None).unwrap();
        let err = roots.push(Value::None).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::SystemError));
    }
}
