//! # Interpreter - Frame-Switching Trampoline
//!
//! ## Core Principles
//!
//! 1. **One current frame**: the VM executes `vm.frame` one instruction at a
//!    time. Calls, returns, yields and natives replace the slot; nothing
//!    recurses on the Rust stack.
//! 2. **Frame switch is data**: natives return `Status::FrameSwitch(frame)`
//!    and the loop installs it. `eval()`, generators and threads all reduce
//!    to this.
//! 3. **Centralized unwinding**: every error funnels through `unwind()`,
//!    which walks back-links looking for a matching handler block.
//! 4. **Safe points**: threads only rotate at backward jumps or after
//!    `yield_thread()`.

pub mod calls;
pub mod exec_loop;
pub mod instructions;

/// Result of executing one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Backward jump taken: the scheduler may rotate here
    SafePoint,
    /// The thread's top-level frame returned
    ThreadDone,
}
