//! Code objects and the instruction set
//!
//! Code is plain data: it (de)serializes with serde, so programs can be
//! written as JSON or assembled with [`CodeBuilder`].

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::rc::Rc;

/// Compile-time constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Const {
    None,
    Bool(bool),
    Int(i32),
    Str(String),
    Code(Rc<Code>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    /// Identity (same heap object, or equal immediates)
    Is,
}

/// Instruction
///
/// Jump targets are absolute instruction indices. `SetupExcept` pushes a
/// handler block; with `kind: None` it catches everything except
/// `SystemExit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg")]
pub enum Instr {
    Nop,
    LoadConst(u16),
    LoadFast(u8),
    StoreFast(u8),
    LoadName(u16),
    StoreName(u16),
    LoadGlobal(u16),
    StoreGlobal(u16),
    PopTop,
    DupTop,
    RotTwo,
    BinaryAdd,
    BinarySub,
    BinaryMul,
    BinaryFloorDiv,
    BinaryMod,
    Compare(CmpOp),
    Not,
    BuildList(u16),
    BuildTuple(u16),
    Subscript,
    MakeFunction,
    CallFunction(u8),
    ReturnValue,
    YieldValue,
    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    SetupExcept {
        handler: u32,
        #[serde(default)]
        kind: Option<ErrorKind>,
    },
    PopBlock,
    /// Pop a message (`None` for no message) and raise `kind`
    Raise(ErrorKind),
    /// Re-raise the exception object on top of the stack
    RaiseValue,
}

fn default_stack_size() -> u16 {
    16
}

/// A unit of executable code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub name: String,
    #[serde(default)]
    pub argcount: u8,
    #[serde(default)]
    pub nlocals: u8,
    #[serde(default = "default_stack_size")]
    pub stack_size: u16,
    /// Calling a function with this code builds a generator instead
    #[serde(default)]
    pub generator: bool,
    #[serde(default)]
    pub consts: Vec<Const>,
    #[serde(default)]
    pub names: Vec<String>,
    pub instrs: Vec<Instr>,
}

impl Code {
    pub fn from_json(json: &str) -> Result<Rc<Code>, serde_json::Error> {
        serde_json::from_str(json).map(Rc::new)
    }

    /// Number of local slots a frame for this code needs
    pub fn local_slots(&self) -> usize {
        usize::from(self.argcount.max(self.nlocals))
    }

    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out);
        out
    }

    fn disassemble_into(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "code {} (args={}, locals={}, stack={}{})",
            self.name,
            self.argcount,
            self.nlocals,
            self.stack_size,
            if self.generator { ", generator" } else { "" }
        );
        for (ip, instr) in self.instrs.iter().enumerate() {
            let _ = write!(out, "{:>5}  {:?}", ip, instr);
            match instr {
                Instr::LoadConst(i) => {
                    if let Some(c) = self.consts.get(usize::from(*i)) {
                        let _ = write!(out, "  ; {}", describe_const(c));
                    }
                }
                Instr::LoadName(i)
                | Instr::StoreName(i)
                | Instr::LoadGlobal(i)
                | Instr::StoreGlobal(i) => {
                    if let Some(name) = self.names.get(usize::from(*i)) {
                        let _ = write!(out, "  ; {}", name);
                    }
                }
                _ => {}
            }
            out.push('\n');
        }
        for c in &self.consts {
            if let Const::Code(inner) = c {
                out.push('\n');
                inner.disassemble_into(out);
            }
        }
    }
}

fn describe_const(c: &Const) -> String {
    match c {
        Const::None => "None".to_string(),
        Const::Bool(b) => (if *b { "True" } else { "False" }).to_string(),
        Const::Int(n) => n.to_string(),
        Const::Str(s) => format!("{:?}", s),
        Const::Code(code) => format!("<code {}>", code.name),
    }
}

/* ===================== Builder ===================== */

/// A forward jump waiting for its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Label {
    at: usize,
}

/// Assembles a [`Code`] object
///
/// ```
/// use framevm::CodeBuilder;
///
/// let mut b = CodeBuilder::new("main");
/// b.int(2).int(3).add().store("x");
/// let code = b.build();
/// assert_eq!(code.names, vec!["x".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct CodeBuilder {
    code: Code,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            code: Code {
                name: name.into(),
                argcount: 0,
                nlocals: 0,
                stack_size: 32,
                generator: false,
                consts: Vec::new(),
                names: Vec::new(),
                instrs: Vec::new(),
            },
        }
    }

    pub fn args(&mut self, argcount: u8) -> &mut Self {
        self.code.argcount = argcount;
        self
    }

    pub fn locals(&mut self, nlocals: u8) -> &mut Self {
        self.code.nlocals = nlocals;
        self
    }

    pub fn stack_size(&mut self, size: u16) -> &mut Self {
        self.code.stack_size = size;
        self
    }

    pub fn generator(&mut self) -> &mut Self {
        self.code.generator = true;
        self
    }

    pub fn emit(&mut self, instr: Instr) -> &mut Self {
        self.code.instrs.push(instr);
        self
    }

    /// Index of the next instruction
    pub fn here(&self) -> u32 {
        self.code.instrs.len() as u32
    }

    pub fn constant(&mut self, c: Const) -> u16 {
        if let Some(i) = self.code.consts.iter().position(|k| *k == c) {
            return i as u16;
        }
        self.code.consts.push(c);
        (self.code.consts.len() - 1) as u16
    }

    pub fn name_index(&mut self, name: &str) -> u16 {
        if let Some(i) = self.code.names.iter().position(|n| n == name) {
            return i as u16;
        }
        self.code.names.push(name.to_string());
        (self.code.names.len() - 1) as u16
    }

    /* ----- constants ----- */

    pub fn load_const(&mut self, c: Const) -> &mut Self {
        let i = self.constant(c);
        self.emit(Instr::LoadConst(i))
    }

    pub fn none(&mut self) -> &mut Self {
        self.load_const(Const::None)
    }

    pub fn boolean(&mut self, b: bool) -> &mut Self {
        self.load_const(Const::Bool(b))
    }

    pub fn int(&mut self, n: i32) -> &mut Self {
        self.load_const(Const::Int(n))
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.load_const(Const::Str(s.to_string()))
    }

    pub fn code(&mut self, code: Rc<Code>) -> &mut Self {
        self.load_const(Const::Code(code))
    }

    /* ----- names ----- */

    pub fn load(&mut self, name: &str) -> &mut Self {
        let i = self.name_index(name);
        self.emit(Instr::LoadName(i))
    }

    pub fn store(&mut self, name: &str) -> &mut Self {
        let i = self.name_index(name);
        self.emit(Instr::StoreName(i))
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        let i = self.name_index(name);
        self.emit(Instr::LoadGlobal(i))
    }

    pub fn store_global(&mut self, name: &str) -> &mut Self {
        let i = self.name_index(name);
        self.emit(Instr::StoreGlobal(i))
    }

    pub fn load_fast(&mut self, slot: u8) -> &mut Self {
        self.emit(Instr::LoadFast(slot))
    }

    pub fn store_fast(&mut self, slot: u8) -> &mut Self {
        self.emit(Instr::StoreFast(slot))
    }

    /// Bind `code` as a function called `name` in the current namespace
    pub fn def(&mut self, name: &str, code: Rc<Code>) -> &mut Self {
        self.code(code).emit(Instr::MakeFunction).store(name)
    }

    /* ----- operators and calls ----- */

    pub fn add(&mut self) -> &mut Self {
        self.emit(Instr::BinaryAdd)
    }

    pub fn compare(&mut self, op: CmpOp) -> &mut Self {
        self.emit(Instr::Compare(op))
    }

    pub fn call(&mut self, argc: u8) -> &mut Self {
        self.emit(Instr::CallFunction(argc))
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit(Instr::PopTop)
    }

    pub fn ret(&mut self) -> &mut Self {
        self.emit(Instr::ReturnValue)
    }

    pub fn yield_value(&mut self) -> &mut Self {
        self.emit(Instr::YieldValue)
    }

    pub fn raise(&mut self, kind: ErrorKind, message: &str) -> &mut Self {
        self.string(message).emit(Instr::Raise(kind))
    }

    /* ----- control flow ----- */

    pub fn jump(&mut self, target: u32) -> &mut Self {
        self.emit(Instr::Jump(target))
    }

    pub fn jump_fwd(&mut self) -> Label {
        self.forward(Instr::Jump(0))
    }

    pub fn jump_if_false_fwd(&mut self) -> Label {
        self.forward(Instr::JumpIfFalse(0))
    }

    pub fn jump_if_true_fwd(&mut self) -> Label {
        self.forward(Instr::JumpIfTrue(0))
    }

    pub fn setup_except(&mut self, kind: Option<ErrorKind>) -> Label {
        self.forward(Instr::SetupExcept { handler: 0, kind })
    }

    fn forward(&mut self, instr: Instr) -> Label {
        let at = self.code.instrs.len();
        self.code.instrs.push(instr);
        Label { at }
    }

    /// Point a forward jump at the next instruction
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let target = self.here();
        match &mut self.code.instrs[label.at] {
            Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::JumpIfTrue(t) => *t = target,
            Instr::SetupExcept { handler, .. } => *handler = target,
            other => panic!("label does not point at a jump: {:?}", other),
        }
        self
    }

    /// `try: body except kind as bind: pass`
    ///
    /// With `bind: None` the caught exception is discarded.
    pub fn try_except(
        &mut self,
        kind: Option<ErrorKind>,
        bind: Option<&str>,
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let handler = self.setup_except(kind);
        body(self);
        self.emit(Instr::PopBlock);
        let done = self.jump_fwd();
        self.bind(handler);
        match bind {
            Some(name) => self.store(name),
            None => self.pop(),
        };
        self.bind(done)
    }

    pub fn build(self) -> Rc<Code> {
        Rc::new(self.code)
    }
}
