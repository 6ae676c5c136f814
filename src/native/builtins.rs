//! Builtin functions
//!
//! Every handler validates all of its arguments before it allocates or
//! touches anything reachable from the caller.

use super::{Arity, NativeCtx, NativeDef, Status};
use crate::error::{ErrorKind, Exception, VmResult};
use crate::heap::HeapObject;
use crate::platform::io_error;
use crate::types::Value;
use crate::vm::Vm;

/// Longest sequence `range()` will build
const MAX_RANGE_LEN: i64 = 1 << 20;

pub const BUILTINS: &[NativeDef] = &[
    NativeDef::new("abs", Arity::Exact(1), abs),
    NativeDef::new("chr", Arity::Exact(1), chr),
    NativeDef::new("ord", Arity::Exact(1), ord),
    NativeDef::new("pow", Arity::Exact(2), pow),
    NativeDef::new("len", Arity::Exact(1), len),
    NativeDef::new("range", Arity::Range(1, 3), range),
    NativeDef::new("sum", Arity::Exact(1), sum),
    NativeDef::new("dir", Arity::Range(0, 1), dir),
    NativeDef::new("globals", Arity::Exact(0), globals),
    NativeDef::new("locals", Arity::Exact(0), locals),
    NativeDef::new("eval", Arity::Range(1, 3), eval),
    NativeDef::new("id", Arity::Exact(1), id),
    NativeDef::new("type", Arity::Exact(1), type_of),
    NativeDef::new("ismain", Arity::Exact(0), ismain),
    NativeDef::new("print", Arity::Range(0, 8), print),
];

pub(crate) fn register(vm: &mut Vm) -> VmResult<()> {
    for def in BUILTINS {
        vm.register_native(*def)?;
    }
    Ok(())
}

/// abs(n) - Absolute value of an int
fn abs(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let n = ctx.int_arg(0)?;
    let n = n.checked_abs().ok_or_else(|| ctx.value_error("integer overflow"))?;
    ctx.set_result(Value::Int(n));
    Ok(Status::Ok)
}

/// chr(n) - One-character string for ASCII code n
///
/// Strings print as UTF-8, so codes stop at 127: `print(chr(n))` then writes
/// the same single byte as `putb(n)`.
fn chr(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let n = ctx.int_arg(0)?;
    let byte = u8::try_from(n)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| ctx.value_error("arg not in range(128)"))?;
    let s = ctx.vm().alloc_str(char::from(byte).to_string())?;
    ctx.set_result(s);
    Ok(Status::Ok)
}

/// ord(c) - Code of a one-character string
fn ord(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let s = ctx.str_arg(0)?;
    let mut chars = s.chars();
    let code = match (chars.next(), chars.next()) {
        (Some(c), None) => c as i32,
        _ => {
            let found = s.chars().count();
            return Err(ctx.type_error(format!(
                "expected a character, but string of length {} found",
                found
            )));
        }
    };
    ctx.set_result(Value::Int(code));
    Ok(Status::Ok)
}

/// pow(x, y) - x raised to a non-negative int power
fn pow(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let x = ctx.int_arg(0)?;
    let y = ctx.int_arg(1)?;
    let y = u32::try_from(y).map_err(|_| ctx.value_error("negative exponent"))?;
    let n = x
        .checked_pow(y)
        .ok_or_else(|| ctx.value_error("integer overflow"))?;
    ctx.set_result(Value::Int(n));
    Ok(Status::Ok)
}

/// len(o) - Length of a string, sequence or namespace
fn len(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let arg = ctx.arg(0);
    let n = match arg {
        Value::Obj(r) => match ctx.vm_ref().heap().get(r) {
            HeapObject::Str(s) => Some(s.chars().count()),
            HeapObject::List(items) | HeapObject::Tuple(items) => Some(items.len()),
            HeapObject::Dict(ns) => Some(ns.len()),
            _ => None,
        },
        _ => None,
    };
    let n = n.ok_or_else(|| {
        ctx.type_error(format!("object of type '{}' has no len()", ctx.type_name(arg)))
    })?;
    ctx.set_result(Value::Int(i32::try_from(n).unwrap_or(i32::MAX)));
    Ok(Status::Ok)
}

/// range([start,] stop[, step]) - List of integers
fn range(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let (start, stop, step) = match ctx.num_args() {
        1 => (0, ctx.int_arg(0)?, 1),
        2 => (ctx.int_arg(0)?, ctx.int_arg(1)?, 1),
        _ => (ctx.int_arg(0)?, ctx.int_arg(1)?, ctx.int_arg(2)?),
    };
    if step == 0 {
        return Err(ctx.value_error("arg 3 must not be zero"));
    }

    let (start, stop, step) = (i64::from(start), i64::from(stop), i64::from(step));
    let count = if step > 0 {
        (stop - start + step - 1).div_euclid(step)
    } else {
        (start - stop - step - 1).div_euclid(-step)
    }
    .max(0);
    if count > MAX_RANGE_LEN {
        return Err(Exception::new(
            ErrorKind::MemoryError,
            format!("range(): {} elements exceeds the limit of {}", count, MAX_RANGE_LEN),
        )
        .into());
    }

    // Elements are immediates, so the list is the only allocation.
    let items = (0..count).map(|i| Value::Int((start + i * step) as i32)).collect();
    let list = ctx.vm().alloc(HeapObject::List(items))?;
    ctx.set_result(Value::Obj(list));
    Ok(Status::Ok)
}

/// sum(s) - Sum of a sequence of integers
fn sum(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let mut total: i32 = 0;
    for item in ctx.seq_arg(0)? {
        let Value::Int(n) = *item else {
            return Err(ctx.type_error(format!(
                "unsupported operand type for +: '{}'",
                ctx.type_name(*item)
            )));
        };
        total = total
            .checked_add(n)
            .ok_or_else(|| ctx.value_error("integer overflow"))?;
    }
    ctx.set_result(Value::Int(total));
    Ok(Status::Ok)
}

/// dir([o]) - Sorted names in a namespace (the caller's globals by default)
fn dir(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let ns = if ctx.num_args() == 0 {
        ctx.vm_ref().heap().frame(ctx.caller()).globals
    } else {
        match ctx.arg(0) {
            Value::Obj(r) => match ctx.vm_ref().heap().get(r) {
                HeapObject::Dict(_) => r,
                HeapObject::Function(f) => f.globals,
                _ => return Err(ctx.type_error(format!(
                    "cannot list names of '{}'",
                    ctx.type_name(ctx.arg(0))
                ))),
            },
            other => {
                return Err(ctx.type_error(format!(
                    "cannot list names of '{}'",
                    ctx.type_name(other)
                )))
            }
        }
    };

    let mut names: Vec<String> = ctx
        .vm_ref()
        .heap()
        .dict(ns)
        .map(|d| d.keys().cloned().collect())
        .unwrap_or_default();
    names.sort();

    let vm = ctx.vm();
    let list = vm.alloc(HeapObject::List(Vec::with_capacity(names.len())))?;
    // One string per name; the list holds each one as soon as it exists.
    vm.with_pinned(Value::Obj(list), |vm| {
        for name in names {
            let s = vm.alloc_str(name)?;
            if let Some(items) = vm.heap.list_mut(list) {
                items.push(s);
            }
        }
        Ok(())
    })?;
    ctx.set_result(Value::Obj(list));
    Ok(Status::Ok)
}

/// globals() - The caller's global namespace
fn globals(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let ns = ctx.vm_ref().heap().frame(ctx.caller()).globals;
    ctx.set_result(Value::Obj(ns));
    Ok(Status::Ok)
}

/// locals() - The caller's local namespace
fn locals(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let ns = ctx.vm_ref().heap().frame(ctx.caller()).attrs;
    ctx.set_result(Value::Obj(ns));
    Ok(Status::Ok)
}

/// eval(co[, g[, l]]) - Run a code object in a new frame
///
/// With only `co` the new frame shares the caller's globals and local
/// namespace. `g` replaces both; `l` then replaces the local namespace. The
/// frame returns to the caller, whose stack receives its return value.
fn eval(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let code = ctx.code_arg(0)?;
    let caller = ctx.caller();
    let (mut globals, mut attrs, is_import) = {
        let frame = ctx.vm_ref().heap().frame(caller);
        (frame.globals, frame.attrs, frame.is_import)
    };
    if ctx.num_args() >= 2 {
        globals = ctx.dict_arg(1)?;
        attrs = globals;
    }
    if ctx.num_args() == 3 {
        attrs = ctx.dict_arg(2)?;
    }

    let vm = ctx.vm();
    let frame = vm.build_frame(code, globals, Some(attrs), &[])?;
    let f = vm.heap.frame_mut(frame);
    f.back = Some(caller);
    f.is_import = is_import;
    Ok(Status::FrameSwitch(frame))
}

/// id(o) - Identity of an object
///
/// Heap objects identify by arena slot, immediates as themselves. The two
/// spaces overlap: `id(5)` equals the id of whatever object sits in slot 5.
/// Ids are only comparable between values of the same kind.
fn id(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let id = match ctx.arg(0) {
        Value::None => 0,
        Value::Bool(b) => i32::from(b),
        Value::Int(n) => n,
        Value::Native(native) => i32::from(native.0),
        Value::Obj(r) => r.index() as i32,
    };
    ctx.set_result(Value::Int(id));
    Ok(Status::Ok)
}

/// type(o) - Name of an object's type
fn type_of(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let name = ctx.type_name(ctx.arg(0));
    let s = ctx.vm().alloc_str(name)?;
    ctx.set_result(s);
    Ok(Status::Ok)
}

/// ismain() - True in the main program, False in an imported module
fn ismain(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let is_import = ctx.vm_ref().heap().frame(ctx.caller()).is_import;
    ctx.set_result(Value::Bool(!is_import));
    Ok(Status::Ok)
}

/// print(*args) - Write args separated by spaces, then a newline
fn print(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let vm = ctx.vm_ref();
    let mut line = ctx
        .args()
        .iter()
        .map(|arg| vm.display(*arg))
        .collect::<Vec<_>>()
        .join(" ");
    line.push('\n');
    ctx.vm()
        .platform
        .write_all(line.as_bytes())
        .map_err(io_error)?;
    Ok(Status::Ok)
}
