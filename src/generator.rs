//! Generator coroutines
//!
//! A generator owns one parked frame. Resuming it splices that frame into the
//! caller's chain (back-link = caller) and hands it to the trampoline as a
//! frame switch; `YieldValue` unsplices it again. Nothing here recurses into
//! the interpreter.
//!
//! State machine: `NotStarted -> Suspended <-> Running -> Completed`.

use crate::error::{ErrorKind, Exception, VmError, VmResult};
use crate::heap::{HeapObject, ObjRef};
use crate::types::Value;
use crate::vm::Vm;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenState {
    NotStarted,
    Suspended,
    Running,
    Completed,
}

#[derive(Debug)]
pub struct Generator {
    pub(crate) frame: Option<ObjRef>,
    pub(crate) state: GenState,
}

impl Generator {
    pub fn state(&self) -> GenState {
        self.state
    }

    /// The parked body frame; `None` once completed
    pub fn frame(&self) -> Option<ObjRef> {
        self.frame
    }
}

fn generator_mut(vm: &mut Vm, gen: ObjRef) -> VmResult<&mut Generator> {
    let type_name = vm.heap.get(gen).type_name();
    vm.heap
        .generator_mut(gen)
        .ok_or_else(|| Exception::type_error(format!("expected generator, got {}", type_name)).into())
}

/// Build a generator around a not-yet-started call of `func(args)`
///
/// No body code runs. `args` must be rooted by the caller.
pub fn create(vm: &mut Vm, func: Value, args: &[Value]) -> VmResult<ObjRef> {
    let frame = vm.new_frame(func, args)?;
    let gen = vm.with_pinned(Value::Obj(frame), |vm| {
        vm.alloc(HeapObject::Generator(Generator {
            frame: Some(frame),
            state: GenState::NotStarted,
        }))
    })?;
    vm.heap.frame_mut(frame).owner = Some(gen);
    debug!(?gen, ?frame, "generator created");
    Ok(gen)
}

/// Prepare `gen` to run on behalf of `caller`
///
/// Returns the frame to switch to. `value` becomes the result of the
/// pending `YieldValue`; a generator that has not started yet only accepts
/// `None`.
pub fn resume(vm: &mut Vm, caller: ObjRef, gen: ObjRef, value: Value) -> VmResult<ObjRef> {
    let (state, frame) = {
        let g = generator_mut(vm, gen)?;
        (g.state, g.frame)
    };

    let frame = match (state, frame) {
        (GenState::Completed, _) => {
            return Err(Exception::new(
                ErrorKind::GeneratorExhausted,
                "generator already exhausted",
            )
            .into())
        }
        (GenState::Running, _) => {
            return Err(Exception::value_error("generator already executing").into())
        }
        (GenState::NotStarted, Some(frame)) => {
            if !value.is_none() {
                return Err(Exception::type_error(
                    "can't send non-None value to a just-started generator",
                )
                .into());
            }
            frame
        }
        (GenState::Suspended, Some(frame)) => {
            vm.heap.frame_mut(frame).push(value)?;
            frame
        }
        (state, None) => {
            return Err(VmError::fatal(format!(
                "generator {:?} is {:?} but has no frame",
                gen, state
            )))
        }
    };

    vm.heap.frame_mut(frame).back = Some(caller);
    generator_mut(vm, gen)?.state = GenState::Running;
    debug!(?gen, from = ?state, "generator resumed");
    Ok(frame)
}

/// Body yielded: the frame stays parked in the generator
pub(crate) fn suspend(vm: &mut Vm, gen: ObjRef) -> VmResult<()> {
    generator_mut(vm, gen)?.state = GenState::Suspended;
    debug!(?gen, "generator suspended");
    Ok(())
}

/// Body returned or raised: drop the frame for good
pub(crate) fn finish(vm: &mut Vm, gen: ObjRef) -> VmResult<()> {
    let g = generator_mut(vm, gen)?;
    g.frame = None;
    g.state = GenState::Completed;
    debug!(?gen, "generator completed");
    Ok(())
}

/// Complete a generator without running any more of its body
pub fn close(vm: &mut Vm, gen: ObjRef) -> VmResult<()> {
    match generator_mut(vm, gen)?.state {
        GenState::Completed => Ok(()),
        GenState::Running => Err(Exception::value_error("generator already executing").into()),
        GenState::NotStarted | GenState::Suspended => finish(vm, gen),
    }
}
