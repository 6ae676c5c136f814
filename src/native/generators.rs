//! Generator capability: generator(), next(), send(), close()

use super::{Arity, NativeCtx, NativeDef, Status};
use crate::error::VmResult;
use crate::generator;
use crate::types::Value;
use crate::vm::Vm;

pub const GENERATOR_NATIVES: &[NativeDef] = &[
    NativeDef::new("generator", Arity::Range(1, 16), make_generator),
    NativeDef::new("next", Arity::Exact(1), next),
    NativeDef::new("send", Arity::Exact(2), send),
    NativeDef::new("close", Arity::Exact(1), close),
];

pub(crate) fn register(vm: &mut Vm) -> VmResult<()> {
    for def in GENERATOR_NATIVES {
        vm.register_native(*def)?;
    }
    Ok(())
}

/// generator(f, *args) - Generator that runs f(*args) on demand
fn make_generator(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let func = ctx.function_arg(0)?;
    let args = ctx.args()[1..].to_vec();
    let gen = generator::create(ctx.vm(), Value::Obj(func), &args)?;
    ctx.set_result(Value::Obj(gen));
    Ok(Status::Ok)
}

/// next(g) - Resume g until it yields; same as send(g, None)
fn next(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let gen = ctx.generator_arg(0)?;
    let caller = ctx.caller();
    let frame = generator::resume(ctx.vm(), caller, gen, Value::None)?;
    Ok(Status::FrameSwitch(frame))
}

/// send(g, v) - Resume g; v becomes the value of the pending yield
fn send(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let gen = ctx.generator_arg(0)?;
    let value = ctx.arg(1);
    let caller = ctx.caller();
    let frame = generator::resume(ctx.vm(), caller, gen, value)?;
    Ok(Status::FrameSwitch(frame))
}

/// close(g) - Finish g without running more of its body
fn close(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let gen = ctx.generator_arg(0)?;
    generator::close(ctx.vm(), gen)?;
    Ok(Status::Ok)
}
