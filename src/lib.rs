//! # framevm
//!
//! A small garbage-collected bytecode runtime built around one primitive: the
//! frame switch. The interpreter dispatches from a single current-frame slot,
//! and calls, `eval()`, generator resumption and thread rotation all work by
//! writing a different frame into that slot instead of recursing.
//!
//! ```
//! use framevm::{CodeBuilder, Config, Value, Vm};
//!
//! let mut b = CodeBuilder::new("main");
//! b.load("sum").load("range").int(5).call(1).call(1).store("total");
//!
//! let mut vm = Vm::new(Config::default()).unwrap();
//! vm.run_main(b.build()).unwrap();
//! assert_eq!(vm.global("total"), Some(Value::Int(10)));
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod generator;
pub mod heap;
pub mod interp;
pub mod native;
pub mod platform;
pub mod scheduler;
pub mod types;
pub mod vm;

#[cfg(test)]
mod tests;

// Re-export main types
pub use config::Config;
pub use error::{ErrorKind, Exception, VmError, VmResult};
pub use heap::ObjRef;
pub use native::{Arity, NativeCtx, NativeDef, Status};
pub use platform::{CapturePlatform, Platform};
pub use types::{Code, CodeBuilder, Const, Instr, Value};
pub use vm::{Vm, VmStats};
