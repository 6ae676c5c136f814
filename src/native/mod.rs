//! Foreign calls
//!
//! Natively implemented operations callable from interpreted code. Every
//! native follows the same convention:
//!
//! - The dispatcher checks the argument count against the declared [`Arity`]
//!   before the handler runs. A mismatch raises `ArgumentCount` and touches
//!   nothing.
//! - Arguments live in the rooted [`NativeFrame`] while the handler runs and
//!   are read through [`NativeCtx`]'s typed accessors.
//! - The handler sets at most one result and returns [`Status::Ok`], or
//!   returns [`Status::FrameSwitch`] with the frame that will produce the
//!   result. It never calls back into the interpreter.
//! - A switch target without a back-link returns to the caller. Anything but
//!   a fresh frame is a fatal error.

pub mod builtins;
pub mod generators;
pub mod sys;

use crate::error::{ErrorKind, Exception, VmError, VmResult};
use crate::heap::{HeapObject, ObjRef};
use crate::types::{Code, Value};
use crate::vm::Vm;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/* ===================== Registration ===================== */

/// Index of a registered native
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub(crate) u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// Inclusive bounds
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == n,
            Arity::Range(lo, hi) => (lo..=hi).contains(&argc),
        }
    }

    pub fn max(self) -> usize {
        match self {
            Arity::Exact(n) | Arity::Range(_, n) => n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(1) => write!(f, "exactly 1 argument"),
            Arity::Exact(n) => write!(f, "exactly {} arguments", n),
            Arity::Range(lo, hi) => write!(f, "from {} to {} arguments", lo, hi),
        }
    }
}

pub type NativeFn = fn(&mut NativeCtx<'_>) -> VmResult<Status>;

#[derive(Clone, Copy)]
pub struct NativeDef {
    pub name: &'static str,
    pub arity: Arity,
    pub func: NativeFn,
}

impl NativeDef {
    pub const fn new(name: &'static str, arity: Arity, func: NativeFn) -> Self {
        Self { name, arity, func }
    }
}

impl fmt::Debug for NativeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct NativeRegistry {
    defs: Vec<NativeDef>,
}

impl NativeRegistry {
    pub fn register(&mut self, def: NativeDef) -> VmResult<NativeId> {
        let id = u16::try_from(self.defs.len())
            .map_err(|_| VmError::fatal("too many natives registered"))?;
        self.defs.push(def);
        Ok(NativeId(id))
    }

    pub fn get(&self, id: NativeId) -> Option<&NativeDef> {
        self.defs.get(usize::from(id.0))
    }

    pub fn find(&self, name: &str) -> Option<NativeId> {
        // Later registrations shadow earlier ones, same as the builtins dict.
        self.defs
            .iter()
            .rposition(|def| def.name == name)
            .map(|i| NativeId(i as u16))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NativeDef> {
        self.defs.iter()
    }
}

/// The outcome of a successful native call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The result (or `None` if unset) goes on the caller's operand stack
    Ok,
    /// Make this frame current; it produces the result
    FrameSwitch(ObjRef),
}

/// What a native call produced, as seen by the dispatcher's caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOutcome {
    Value(Value),
    FrameSwitch(ObjRef),
}

/* ===================== Native Frame ===================== */

/// Rooted argument frame of the native call in progress
///
/// Natives never nest, so there is only ever one.
#[derive(Debug, Default)]
pub struct NativeFrame {
    args: Vec<Value>,
    result: Option<Value>,
    active: bool,
}

impl NativeFrame {
    fn enter(&mut self, args: &[Value]) -> VmResult<()> {
        if self.active {
            return Err(VmError::fatal("native call re-entered the dispatcher"));
        }
        self.args.clear();
        self.args.extend_from_slice(args);
        self.result = None;
        self.active = true;
        Ok(())
    }

    fn leave(&mut self) -> Option<Value> {
        self.args.clear();
        self.active = false;
        self.result.take()
    }

    pub(crate) fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.args.iter().copied().chain(self.result)
    }
}

/* ===================== Handler Context ===================== */

/// What a native handler sees: its arguments, the calling frame, the VM
pub struct NativeCtx<'vm> {
    vm: &'vm mut Vm,
    name: &'static str,
    caller: ObjRef,
}

impl<'vm> NativeCtx<'vm> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn num_args(&self) -> usize {
        self.vm.native_frame.args.len()
    }

    /// Argument `i`, or `None` past the end
    pub fn arg(&self, i: usize) -> Value {
        self.vm.native_frame.args.get(i).copied().unwrap_or_default()
    }

    pub fn args(&self) -> &[Value] {
        &self.vm.native_frame.args
    }

    /// Frame that made this call
    pub fn caller(&self) -> ObjRef {
        self.caller
    }

    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    pub fn vm_ref(&self) -> &Vm {
        self.vm
    }

    pub fn set_result(&mut self, value: Value) {
        self.vm.native_frame.result = Some(value);
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        self.vm.heap.type_name(value)
    }

    pub fn type_error(&self, message: impl Into<String>) -> VmError {
        Exception::type_error(format!("{}(): {}", self.name, message.into())).into()
    }

    pub fn value_error(&self, message: impl Into<String>) -> VmError {
        Exception::value_error(format!("{}(): {}", self.name, message.into())).into()
    }

    fn wrong_type(&self, i: usize, expected: &str) -> VmError {
        self.type_error(format!(
            "argument {} must be {}, not {}",
            i + 1,
            expected,
            self.type_name(self.arg(i))
        ))
    }

    pub fn int_arg(&self, i: usize) -> VmResult<i32> {
        match self.arg(i) {
            Value::Int(n) => Ok(n),
            _ => Err(self.wrong_type(i, "int")),
        }
    }

    pub fn str_arg(&self, i: usize) -> VmResult<&str> {
        match self.arg(i) {
            Value::Obj(r) => self.vm.heap.str(r).ok_or_else(|| self.wrong_type(i, "str")),
            _ => Err(self.wrong_type(i, "str")),
        }
    }

    pub fn dict_arg(&self, i: usize) -> VmResult<ObjRef> {
        match self.arg(i) {
            Value::Obj(r) if self.vm.heap.dict(r).is_some() => Ok(r),
            _ => Err(self.wrong_type(i, "dict")),
        }
    }

    /// List or tuple
    pub fn seq_arg(&self, i: usize) -> VmResult<&[Value]> {
        match self.arg(i) {
            Value::Obj(r) => self.vm.heap.items(r).ok_or_else(|| self.wrong_type(i, "sequence")),
            _ => Err(self.wrong_type(i, "sequence")),
        }
    }

    pub fn function_arg(&self, i: usize) -> VmResult<ObjRef> {
        match self.arg(i) {
            Value::Obj(r) if self.vm.heap.function(r).is_some() => Ok(r),
            _ => Err(self.wrong_type(i, "function")),
        }
    }

    pub fn generator_arg(&self, i: usize) -> VmResult<ObjRef> {
        match self.arg(i) {
            Value::Obj(r) if self.vm.heap.generator(r).is_some() => Ok(r),
            _ => Err(self.wrong_type(i, "generator")),
        }
    }

    pub fn code_arg(&self, i: usize) -> VmResult<Rc<Code>> {
        if let Value::Obj(r) = self.arg(i) {
            if let HeapObject::Code(code) = self.vm.heap.get(r) {
                return Ok(Rc::clone(code));
            }
        }
        Err(self.wrong_type(i, "code"))
    }
}

/* ===================== Dispatch ===================== */

impl Vm {
    /// Register a native and bind it in the builtins namespace
    pub fn register_native(&mut self, def: NativeDef) -> VmResult<NativeId> {
        let id = self.natives.register(def)?;
        let builtins = self.builtins;
        if let Some(ns) = self.heap.dict_mut(builtins) {
            ns.insert(def.name.to_string(), Value::Native(id));
        }
        Ok(id)
    }

    pub fn native_def(&self, id: NativeId) -> Option<&NativeDef> {
        self.natives.get(id)
    }

    pub fn natives(&self) -> impl Iterator<Item = &NativeDef> {
        self.natives.iter()
    }

    /// Invoke native `name` on behalf of frame `caller`
    ///
    /// A returned frame switch is not applied: making that frame current is
    /// up to the caller. `args` must be rooted until this returns.
    pub fn invoke_native(
        &mut self,
        caller: ObjRef,
        name: &str,
        args: &[Value],
    ) -> VmResult<NativeOutcome> {
        let id = self
            .natives
            .find(name)
            .ok_or_else(|| {
                VmError::raise(ErrorKind::NameError, format!("no native named '{}'", name))
            })?;
        self.dispatch_native(caller, id, args)
    }

    pub(crate) fn dispatch_native(
        &mut self,
        caller: ObjRef,
        id: NativeId,
        args: &[Value],
    ) -> VmResult<NativeOutcome> {
        let def = *self
            .natives
            .get(id)
            .ok_or_else(|| VmError::fatal(format!("unknown native {:?}", id)))?;

        if !def.arity.accepts(args.len()) {
            return Err(Exception::new(
                ErrorKind::ArgumentCount,
                format!(
                    "{}() takes {} ({} given)",
                    def.name,
                    def.arity,
                    args.len()
                ),
            )
            .into());
        }

        self.native_frame.enter(args)?;
        self.stats.native_depth += 1;
        self.stats.max_native_depth = self.stats.max_native_depth.max(self.stats.native_depth);
        trace!(native = def.name, argc = args.len(), "native call");

        let status = {
            let mut ctx = NativeCtx {
                vm: self,
                name: def.name,
                caller,
            };
            (def.func)(&mut ctx)
        };

        self.stats.native_depth -= 1;
        let result = self.native_frame.leave();
        match status? {
            Status::Ok => Ok(NativeOutcome::Value(result.unwrap_or_default())),
            Status::FrameSwitch(frame) => Ok(NativeOutcome::FrameSwitch(frame)),
        }
    }
}
