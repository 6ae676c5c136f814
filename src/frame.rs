//! Execution frames
//!
//! A frame is one activation record: operand stack, local slots, namespace
//! references, the back-link to whoever regains control when it finishes or
//! suspends, and its handler blocks. Frames are heap objects, so a parked
//! generator frame lives exactly as long as something references it.

use crate::error::{ErrorKind, Exception, VmError, VmResult};
use crate::heap::{HeapObject, ObjRef};
use crate::types::{Code, Namespace, Value};
use crate::vm::Vm;
use std::rc::Rc;

/// Exception handler installed by `SetupExcept`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub handler: usize,
    /// `None` catches everything but `SystemExit`
    pub kind: Option<ErrorKind>,
    /// Operand stack depth to restore before jumping to the handler
    pub depth: usize,
}

impl Block {
    pub fn catches(&self, kind: ErrorKind) -> bool {
        match self.kind {
            None => kind != ErrorKind::SystemExit,
            Some(class) => kind.is_a(class),
        }
    }
}

#[derive(Debug)]
pub struct Frame {
    pub code: Rc<Code>,
    pub ip: usize,
    pub stack: Vec<Value>,
    pub locals: Vec<Value>,
    pub globals: ObjRef,
    /// Local attribute namespace (`locals()`, `StoreName`)
    pub attrs: ObjRef,
    pub back: Option<ObjRef>,
    pub blocks: Vec<Block>,
    pub is_import: bool,
    /// Generator this frame is the body of
    pub owner: Option<ObjRef>,
}

impl Frame {
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= usize::from(self.code.stack_size) {
            return Err(VmError::fatal(format!(
                "operand stack overflow in {} (size {})",
                self.code.name, self.code.stack_size
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::fatal(format!("operand stack underflow in {}", self.code.name)))
    }

    /// Value `depth` slots below the top (0 = top)
    pub fn peek(&self, depth: usize) -> VmResult<Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|i| self.stack[i])
            .ok_or_else(|| VmError::fatal(format!("operand stack underflow in {}", self.code.name)))
    }

    /// Top `n` values, bottom first
    pub fn top(&self, n: usize) -> VmResult<&[Value]> {
        let start = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| VmError::fatal(format!("operand stack underflow in {}", self.code.name)))?;
        Ok(&self.stack[start..])
    }

    pub fn drop_top(&mut self, n: usize) {
        let len = self.stack.len().saturating_sub(n);
        self.stack.truncate(len);
    }

    pub(crate) fn trace(&self, out: &mut Vec<ObjRef>) {
        let values = self.stack.iter().chain(self.locals.iter());
        out.extend(values.filter_map(|v| v.as_obj()));
        out.push(self.globals);
        out.push(self.attrs);
        out.extend(self.back);
        out.extend(self.owner);
    }
}

impl Vm {
    /// Build a frame for calling `callable` with `args`
    ///
    /// The callable must be a function whose code takes exactly
    /// `args.len()` arguments. The frame gets a fresh local namespace, no
    /// back-link and is not made current. `args` must be rooted by the
    /// caller (they normally sit on the caller's operand stack).
    pub fn new_frame(&mut self, callable: Value, args: &[Value]) -> VmResult<ObjRef> {
        let func = match callable {
            Value::Obj(r) => self.heap.function(r).cloned(),
            _ => None,
        };
        let Some(func) = func else {
            return Err(Exception::type_error(format!(
                "'{}' object is not callable",
                self.heap.type_name(callable)
            ))
            .into());
        };

        // The function keeps its globals alive while the attrs dict is allocated.
        self.with_pinned(callable, |vm| {
            vm.build_frame(func.code, func.globals, None, args)
        })
    }

    /// Allocate a frame running `code`
    ///
    /// With `attrs: None` a fresh local namespace is allocated. `globals`,
    /// `attrs` and `args` must already be rooted.
    pub(crate) fn build_frame(
        &mut self,
        code: Rc<Code>,
        globals: ObjRef,
        attrs: Option<ObjRef>,
        args: &[Value],
    ) -> VmResult<ObjRef> {
        if args.len() != usize::from(code.argcount) {
            return Err(Exception::new(
                ErrorKind::ArgumentCount,
                format!(
                    "{}() takes {} positional arguments but {} were given",
                    code.name,
                    code.argcount,
                    args.len()
                ),
            )
            .into());
        }

        let attrs = match attrs {
            Some(attrs) => attrs,
            None => self.alloc(HeapObject::Dict(Namespace::new()))?,
        };

        let mut locals = vec![Value::None; code.local_slots()];
        locals[..args.len()].copy_from_slice(args);
        let frame = Frame {
            stack: Vec::with_capacity(usize::from(code.stack_size)),
            code,
            ip: 0,
            locals,
            globals,
            attrs,
            back: None,
            blocks: Vec::new(),
            is_import: false,
            owner: None,
        };

        self.with_pinned(Value::Obj(attrs), |vm| {
            vm.alloc(HeapObject::Frame(Box::new(frame)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_all_skips_system_exit() {
        let block = Block {
            handler: 0,
            kind: None,
            depth: 0,
        };
        assert!(block.catches(ErrorKind::ValueError));
        assert!(!block.catches(ErrorKind::SystemExit));

        let typed = Block {
            kind: Some(ErrorKind::StopIteration),
            ..block
        };
        assert!(typed.catches(ErrorKind::GeneratorExhausted));
        assert!(!typed.catches(ErrorKind::TypeError));
    }
}
