//! Heap object payloads that don't warrant their own module

use super::code::Code;
use super::values::Value;
use crate::heap::ObjRef;
use std::collections::HashMap;
use std::rc::Rc;

/// Name -> value mapping used for globals, frame attributes and builtins
pub type Namespace = HashMap<String, Value>;

/// A code object bound to the globals it was defined in
#[derive(Debug, Clone)]
pub struct Function {
    pub code: Rc<Code>,
    pub globals: ObjRef,
}
