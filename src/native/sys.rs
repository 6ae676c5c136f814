//! System functions: process exit, heap control, byte I/O, threads, time

use super::{Arity, NativeCtx, NativeDef, Status};
use crate::error::{ErrorKind, Exception, VmResult};
use crate::heap::HeapObject;
use crate::platform::io_error;
use crate::types::Value;
use crate::vm::Vm;

pub const SYS_NATIVES: &[NativeDef] = &[
    NativeDef::new("exit", Arity::Range(0, 1), exit),
    NativeDef::new("gc", Arity::Exact(0), gc),
    NativeDef::new("heap", Arity::Exact(0), heap),
    NativeDef::new("sizeof", Arity::Exact(1), sizeof),
    NativeDef::new("putb", Arity::Exact(1), putb),
    NativeDef::new("getb", Arity::Exact(0), getb),
    NativeDef::new("spawn", Arity::Exact(1), spawn),
    NativeDef::new("yield_thread", Arity::Exact(0), yield_thread),
    NativeDef::new("clock", Arity::Exact(0), clock),
];

pub(crate) fn register(vm: &mut Vm) -> VmResult<()> {
    for def in SYS_NATIVES {
        vm.register_native(*def)?;
    }
    Ok(())
}

fn saturate(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// exit([code]) - Raise SystemExit
fn exit(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let code = match ctx.arg(0) {
        Value::None => 0,
        Value::Int(n) => n,
        Value::Bool(b) => i32::from(b),
        _ => 1,
    };
    Err(Exception::new(ErrorKind::SystemExit, "")
        .with_value(Value::Int(code))
        .into())
}

/// gc() - Collect garbage now
fn gc(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    ctx.vm().collect_garbage();
    Ok(Status::Ok)
}

/// heap() - (available, capacity), counted in objects
fn heap(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let vm = ctx.vm();
    let items = vec![
        Value::Int(saturate(vm.heap.available())),
        Value::Int(saturate(vm.heap.capacity())),
    ];
    let tuple = vm.alloc(HeapObject::Tuple(items))?;
    ctx.set_result(Value::Obj(tuple));
    Ok(Status::Ok)
}

/// sizeof(o) - Approximate footprint of a value in bytes
fn sizeof(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let vm = ctx.vm_ref();
    let value = std::mem::size_of::<Value>();
    let size = match ctx.arg(0) {
        Value::Obj(r) => {
            let extra = match vm.heap.get(r) {
                HeapObject::Str(s) => s.len(),
                HeapObject::List(items) | HeapObject::Tuple(items) => items.len() * value,
                HeapObject::Dict(ns) => ns.keys().map(|k| k.len() + value).sum(),
                HeapObject::Frame(frame) => (frame.stack.len() + frame.locals.len()) * value,
                _ => 0,
            };
            std::mem::size_of::<HeapObject>() + extra
        }
        _ => value,
    };
    ctx.set_result(Value::Int(saturate(size)));
    Ok(Status::Ok)
}

/// putb(b) - Write one byte
fn putb(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let byte = ctx.int_arg(0)?;
    let byte = u8::try_from(byte).map_err(|_| ctx.value_error("byte must be in range(256)"))?;
    ctx.vm().platform.put_byte(byte).map_err(io_error)?;
    Ok(Status::Ok)
}

/// getb() - Read one byte
fn getb(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let byte = ctx.vm().platform.get_byte().map_err(io_error)?;
    ctx.set_result(Value::Int(i32::from(byte)));
    Ok(Status::Ok)
}

/// spawn(f) - Run f() as a new thread sharing the caller's globals
fn spawn(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let func = ctx.function_arg(0)?;
    let globals = ctx.vm_ref().heap().frame(ctx.caller()).globals;
    let id = ctx.vm().spawn(Value::Obj(func), Some(globals))?;
    ctx.set_result(Value::Int(id.0 as i32));
    Ok(Status::Ok)
}

/// yield_thread() - Let the next thread run
fn yield_thread(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    ctx.vm().scheduler.request_reschedule();
    Ok(Status::Ok)
}

/// clock() - Milliseconds since the VM started
fn clock(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let ms = ctx.vm_ref().uptime_ms();
    ctx.set_result(Value::Int(i32::try_from(ms).unwrap_or(i32::MAX)));
    Ok(Status::Ok)
}
