//! Type definitions for the runtime
//!
//! This module contains the types that interpreted programs are made of:
//! - Code objects and instructions (Code, Instr, Const)
//! - Runtime values (Value)
//! - Small heap object payloads (Function)

pub mod code;
pub mod objects;
pub mod values;

// Re-export all types for convenient access
pub use code::{CmpOp, Code, CodeBuilder, Const, Instr, Label};
pub use objects::{Function, Namespace};
pub use values::Value;
