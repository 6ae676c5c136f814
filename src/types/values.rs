//! Runtime value types

use crate::heap::ObjRef;
use crate::native::NativeId;

/// Runtime value
///
/// Immediates live inline; everything else is a handle into the heap.
/// Values are `Copy`, so holding one never keeps its object alive: only the
/// root set does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i32),
    /// A registered foreign call
    Native(NativeId),
    Obj(ObjRef),
}

impl Value {
    pub fn is_none(self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_int(self) -> Option<i32> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_obj(self) -> Option<ObjRef> {
        match self {
            Value::Obj(r) => Some(r),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjRef> for Value {
    fn from(r: ObjRef) -> Self {
        Value::Obj(r)
    }
}
