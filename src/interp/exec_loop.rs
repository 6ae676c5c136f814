//! Core execution loop
//!
//! ## Function Organization
//! Functions are ordered by call hierarchy:
//! 1. run() - Top-level driver: rotates threads until none are left
//! 2. run_slice() - Runs the current thread until it finishes or yields
//! 3. step() - Executes one instruction of the current frame
//! 4. unwind() - Delivers an exception to the nearest matching handler

use super::Step;
use crate::error::{ErrorKind, Exception, VmError, VmResult};
use crate::generator;
use crate::types::Value;
use crate::vm::Vm;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Why a thread gave up the current-frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slice {
    Rotate,
    Finished,
}

impl Vm {
    /* ===================== Public API ===================== */

    /// Run every registered thread until none is left
    ///
    /// Returns the main thread's uncaught exception, if any (other threads
    /// are dropped with it). An uncaught exception in a spawned thread only
    /// ends that thread. `SystemExit` anywhere ends the run with
    /// [`VmError::Exit`].
    pub fn run(&mut self) -> VmResult<()> {
        while let Some(thread) = self.scheduler.next() {
            self.frame = Some(thread.frame);
            trace!(thread = %thread.id, "thread scheduled");

            match self.run_slice() {
                Ok(Slice::Rotate) => {
                    let frame = self.expect_frame()?;
                    self.frame = None;
                    self.scheduler.park(frame);
                }
                Ok(Slice::Finished) => {
                    self.scheduler.finish();
                    debug!(thread = %thread.id, "thread finished");
                }
                Err(VmError::Exception(exc)) if exc.kind == ErrorKind::SystemExit => {
                    let code = match exc.value {
                        Value::Int(n) => n,
                        Value::None => 0,
                        _ => 1,
                    };
                    debug!(thread = %thread.id, code, "system exit");
                    self.abandon_threads();
                    return Err(VmError::Exit(code));
                }
                Err(VmError::Exception(exc)) if !thread.main => {
                    self.frame = None;
                    self.scheduler.finish();
                    warn!(thread = %thread.id, error = %exc, "uncaught exception in thread");
                }
                Err(err) => {
                    self.abandon_threads();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Execute one instruction of the current frame
    pub fn step(&mut self) -> VmResult<Step> {
        let fr = self.expect_frame()?;
        let (code, ip) = {
            let f = self.heap.frame(fr);
            (Rc::clone(&f.code), f.ip)
        };
        self.stats.instructions += 1;

        // Running off the end returns None
        let Some(&instr) = code.instrs.get(ip) else {
            return self.return_from(fr, Value::None);
        };
        self.heap.frame_mut(fr).ip = ip + 1;
        self.execute(fr, &code, instr, ip)
    }

    /* ===================== Threads ===================== */

    fn run_slice(&mut self) -> VmResult<Slice> {
        let quantum = u64::from(self.scheduler.quantum());
        let mut executed: u64 = 0;
        loop {
            let step = match self.step() {
                Ok(step) => step,
                Err(VmError::Exception(exc)) => {
                    self.unwind(exc)?;
                    Step::Continue
                }
                Err(err) => return Err(err),
            };
            executed += 1;

            match step {
                Step::ThreadDone => return Ok(Slice::Finished),
                Step::SafePoint if quantum > 0 && executed >= quantum => {
                    return Ok(Slice::Rotate)
                }
                _ => {}
            }
            if self.scheduler.take_reschedule() {
                return Ok(Slice::Rotate);
            }
        }
    }

    fn abandon_threads(&mut self) {
        let dropped = self.scheduler.len();
        self.scheduler.clear();
        self.frame = None;
        if dropped > 0 {
            debug!(dropped, "remaining threads dropped");
        }
    }

    /* ===================== Control Flow ===================== */

    /// Deliver `exc` to the nearest handler block, walking back-links
    ///
    /// Frames without a matching handler are discarded; a generator whose
    /// body frame is discarded becomes completed. If no frame in the thread
    /// handles it, the current slot ends up empty and `exc` is returned.
    pub(crate) fn unwind(&mut self, exc: Exception) -> VmResult<()> {
        while let Some(fr) = self.frame {
            let block = {
                let frame = self.heap.frame_mut(fr);
                let mut found = None;
                while let Some(block) = frame.blocks.pop() {
                    if block.catches(exc.kind) {
                        found = Some(block);
                        break;
                    }
                }
                found
            };

            if let Some(block) = block {
                let kind = exc.kind;
                self.heap.frame_mut(fr).stack.truncate(block.depth);
                let obj = self.with_pinned(exc.value, |vm| vm.alloc_exception(exc))?;
                let frame = self.heap.frame_mut(fr);
                frame.ip = block.handler;
                frame.push(Value::Obj(obj))?;
                trace!(%kind, handler = block.handler, "exception caught");
                return Ok(());
            }

            let (back, owner) = {
                let frame = self.heap.frame_mut(fr);
                (frame.back.take(), frame.owner)
            };
            if let Some(gen) = owner {
                generator::finish(self, gen)?;
            }
            self.frame = back;
        }
        Err(exc.into())
    }
}
