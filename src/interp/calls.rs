//! Calls, returns and yields
//!
//! All three are slot substitutions on `vm.frame`. A call installs the
//! callee with its back-link set to the caller; a return or yield installs
//! the back-link and pushes the value onto it.

use super::Step;
use crate::error::{ErrorKind, Exception, VmError, VmResult};
use crate::generator;
use crate::heap::{HeapObject, ObjRef};
use crate::native::{NativeId, NativeOutcome};
use crate::types::Value;
use crate::vm::Vm;
use tracing::trace;

impl Vm {
    /// `CallFunction(argc)`: callee sits below its `argc` arguments
    pub(crate) fn call(&mut self, fr: ObjRef, argc: usize) -> VmResult<Step> {
        let callee = self.heap.frame(fr).peek(argc)?;
        match callee {
            Value::Native(id) => self.call_native(fr, id, argc),
            Value::Obj(r) => {
                let is_generator = match self.heap.get(r) {
                    HeapObject::Function(f) => f.code.generator,
                    other => {
                        return Err(Exception::type_error(format!(
                            "'{}' object is not callable",
                            other.type_name()
                        ))
                        .into())
                    }
                };
                // Arguments stay on the caller's stack (rooted) until the
                // callee frame exists.
                let args = self.heap.frame(fr).top(argc)?.to_vec();
                if is_generator {
                    let gen = generator::create(self, callee, &args)?;
                    let frame = self.heap.frame_mut(fr);
                    frame.drop_top(argc + 1);
                    frame.push(Value::Obj(gen))?;
                } else {
                    let callee_frame = self.new_frame(callee, &args)?;
                    self.heap.frame_mut(fr).drop_top(argc + 1);
                    self.heap.frame_mut(callee_frame).back = Some(fr);
                    self.switch_to(callee_frame);
                }
                Ok(Step::Continue)
            }
            other => Err(Exception::type_error(format!(
                "'{}' object is not callable",
                self.heap.type_name(other)
            ))
            .into()),
        }
    }

    fn call_native(&mut self, fr: ObjRef, id: NativeId, argc: usize) -> VmResult<Step> {
        let args = self.heap.frame(fr).top(argc)?.to_vec();
        let outcome = self.dispatch_native(fr, id, &args)?;
        if let NativeOutcome::FrameSwitch(target) = outcome {
            self.check_switch_target(fr, target)?;
        }

        // The caller's stack is only touched once the native succeeded.
        self.heap.frame_mut(fr).drop_top(argc + 1);
        match outcome {
            NativeOutcome::Value(value) => self.heap.frame_mut(fr).push(value)?,
            NativeOutcome::FrameSwitch(target) => self.switch_to(target),
        }
        Ok(Step::Continue)
    }

    /// A native's switch target must be a live frame that returns to `fr`.
    /// A target without a back-link is linked to `fr` here.
    fn check_switch_target(&mut self, fr: ObjRef, target: ObjRef) -> VmResult<()> {
        if target == fr
            || !self.heap.is_live(target)
            || !matches!(self.heap.get(target), HeapObject::Frame(_))
        {
            return Err(VmError::fatal(format!(
                "native switched to {:?}, which is not a fresh frame",
                target
            )));
        }
        let frame = self.heap.frame_mut(target);
        match frame.back {
            None => frame.back = Some(fr),
            Some(back) if back == fr => {}
            Some(back) => {
                return Err(VmError::fatal(format!(
                    "native switch target returns to {:?} instead of its caller",
                    back
                )))
            }
        }
        Ok(())
    }

    pub(crate) fn switch_to(&mut self, target: ObjRef) {
        trace!(from = ?self.frame, to = ?target, "frame switch");
        self.frame = Some(target);
        self.stats.frame_switches += 1;
    }

    /// Frame `fr` finished with `value`
    pub(crate) fn return_from(&mut self, fr: ObjRef, value: Value) -> VmResult<Step> {
        let (back, owner) = {
            let frame = self.heap.frame_mut(fr);
            (frame.back.take(), frame.owner)
        };

        match back {
            Some(caller) => self.switch_to(caller),
            None => self.frame = None,
        }

        if let Some(gen) = owner {
            generator::finish(self, gen)?;
            // The return value travels to the resumer inside StopIteration.
            return Err(Exception::new(ErrorKind::StopIteration, "generator returned")
                .with_value(value)
                .into());
        }

        match back {
            Some(caller) => {
                self.heap.frame_mut(caller).push(value)?;
                Ok(Step::Continue)
            }
            None => Ok(Step::ThreadDone),
        }
    }

    /// `YieldValue` in frame `fr`: park it and hand `value` to the resumer
    pub(crate) fn yield_from(&mut self, fr: ObjRef, value: Value) -> VmResult<Step> {
        let Some(gen) = self.heap.frame(fr).owner else {
            return Err(VmError::raise(
                ErrorKind::SystemError,
                "yield outside of a generator",
            ));
        };
        let Some(caller) = self.heap.frame_mut(fr).back.take() else {
            return Err(VmError::fatal("running generator frame has no back-link"));
        };

        generator::suspend(self, gen)?;
        self.switch_to(caller);
        self.heap.frame_mut(caller).push(value)?;
        Ok(Step::Continue)
    }
}
