//! Instruction handlers
//!
//! Operands are peeked, not popped, until every allocation an instruction
//! needs is done: while they sit on the frame's stack they are rooted.

use super::Step;
use crate::error::{ErrorKind, Exception, VmError, VmResult};
use crate::frame::Block;
use crate::heap::{HeapObject, ObjRef};
use crate::types::{CmpOp, Code, Const, Function, Instr, Value};
use crate::vm::Vm;
use std::cmp::Ordering;
use std::rc::Rc;

/* ===================== Dispatch ===================== */

impl Vm {
    pub(crate) fn execute(
        &mut self,
        fr: ObjRef,
        code: &Code,
        instr: Instr,
        ip: usize,
    ) -> VmResult<Step> {
        match instr {
            Instr::Nop => {}

            Instr::LoadConst(i) => {
                let c = code
                    .consts
                    .get(usize::from(i))
                    .ok_or_else(|| bad_operand(code, ip, "constant"))?;
                let value = self.const_value(c)?;
                self.heap.frame_mut(fr).push(value)?;
            }

            Instr::LoadFast(slot) => {
                let frame = self.heap.frame_mut(fr);
                let value = *frame
                    .locals
                    .get(usize::from(slot))
                    .ok_or_else(|| bad_operand(code, ip, "local slot"))?;
                frame.push(value)?;
            }

            Instr::StoreFast(slot) => {
                let frame = self.heap.frame_mut(fr);
                let value = frame.pop()?;
                *frame
                    .locals
                    .get_mut(usize::from(slot))
                    .ok_or_else(|| bad_operand(code, ip, "local slot"))? = value;
            }

            Instr::LoadName(i) => {
                let name = name_at(code, i, ip)?;
                let (attrs, globals) = {
                    let frame = self.heap.frame(fr);
                    (frame.attrs, frame.globals)
                };
                let value = [attrs, globals, self.builtins]
                    .into_iter()
                    .find_map(|ns| self.heap.dict(ns).and_then(|d| d.get(name)).copied())
                    .ok_or_else(|| name_error(name))?;
                self.heap.frame_mut(fr).push(value)?;
            }

            Instr::LoadGlobal(i) => {
                let name = name_at(code, i, ip)?;
                let globals = self.heap.frame(fr).globals;
                let value = [globals, self.builtins]
                    .into_iter()
                    .find_map(|ns| self.heap.dict(ns).and_then(|d| d.get(name)).copied())
                    .ok_or_else(|| name_error(name))?;
                self.heap.frame_mut(fr).push(value)?;
            }

            Instr::StoreName(i) | Instr::StoreGlobal(i) => {
                let name = name_at(code, i, ip)?;
                let frame = self.heap.frame_mut(fr);
                let value = frame.pop()?;
                let ns = if matches!(instr, Instr::StoreName(_)) {
                    frame.attrs
                } else {
                    frame.globals
                };
                self.heap
                    .dict_mut(ns)
                    .ok_or_else(|| VmError::fatal("frame namespace is not a dict"))?
                    .insert(name.to_string(), value);
            }

            Instr::PopTop => {
                self.heap.frame_mut(fr).pop()?;
            }

            Instr::DupTop => {
                let frame = self.heap.frame_mut(fr);
                let top = frame.peek(0)?;
                frame.push(top)?;
            }

            Instr::RotTwo => {
                let frame = self.heap.frame_mut(fr);
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a)?;
                frame.push(b)?;
            }

            Instr::BinaryAdd
            | Instr::BinarySub
            | Instr::BinaryMul
            | Instr::BinaryFloorDiv
            | Instr::BinaryMod => {
                let (lhs, rhs) = {
                    let frame = self.heap.frame(fr);
                    (frame.peek(1)?, frame.peek(0)?)
                };
                let result = self.binary_op(instr, lhs, rhs)?;
                let frame = self.heap.frame_mut(fr);
                frame.drop_top(2);
                frame.push(result)?;
            }

            Instr::Compare(op) => {
                let frame = self.heap.frame_mut(fr);
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let result = self.compare(op, lhs, rhs)?;
                self.heap.frame_mut(fr).push(Value::Bool(result))?;
            }

            Instr::Not => {
                let value = self.heap.frame_mut(fr).pop()?;
                let truthy = self.is_truthy(value);
                self.heap.frame_mut(fr).push(Value::Bool(!truthy))?;
            }

            Instr::BuildList(n) | Instr::BuildTuple(n) => {
                let n = usize::from(n);
                let items = self.heap.frame(fr).top(n)?.to_vec();
                let obj = if matches!(instr, Instr::BuildList(_)) {
                    HeapObject::List(items)
                } else {
                    HeapObject::Tuple(items)
                };
                let r = self.alloc(obj)?;
                let frame = self.heap.frame_mut(fr);
                frame.drop_top(n);
                frame.push(Value::Obj(r))?;
            }

            Instr::Subscript => {
                let (container, index) = {
                    let frame = self.heap.frame(fr);
                    (frame.peek(1)?, frame.peek(0)?)
                };
                let result = self.subscript(container, index)?;
                let frame = self.heap.frame_mut(fr);
                frame.drop_top(2);
                frame.push(result)?;
            }

            Instr::MakeFunction => {
                let top = self.heap.frame(fr).peek(0)?;
                let code = match top {
                    Value::Obj(r) => match self.heap.get(r) {
                        HeapObject::Code(code) => Some(Rc::clone(code)),
                        _ => None,
                    },
                    _ => None,
                }
                .ok_or_else(|| {
                    Exception::type_error(format!(
                        "cannot make a function from '{}'",
                        self.heap.type_name(top)
                    ))
                })?;
                let globals = self.heap.frame(fr).globals;
                let func = self.alloc(HeapObject::Function(Function { code, globals }))?;
                let frame = self.heap.frame_mut(fr);
                frame.drop_top(1);
                frame.push(Value::Obj(func))?;
            }

            Instr::CallFunction(argc) => return self.call(fr, usize::from(argc)),

            Instr::ReturnValue => {
                let value = self.heap.frame_mut(fr).pop()?;
                return self.return_from(fr, value);
            }

            Instr::YieldValue => {
                let value = self.heap.frame_mut(fr).pop()?;
                return self.yield_from(fr, value);
            }

            Instr::Jump(target) => return Ok(self.jump(fr, target, ip)),

            Instr::JumpIfFalse(target) | Instr::JumpIfTrue(target) => {
                let cond = self.heap.frame_mut(fr).pop()?;
                let want = matches!(instr, Instr::JumpIfTrue(_));
                if self.is_truthy(cond) == want {
                    return Ok(self.jump(fr, target, ip));
                }
            }

            Instr::SetupExcept { handler, kind } => {
                let frame = self.heap.frame_mut(fr);
                let depth = frame.stack.len();
                frame.blocks.push(Block {
                    handler: handler as usize,
                    kind,
                    depth,
                });
            }

            Instr::PopBlock => {
                self.heap
                    .frame_mut(fr)
                    .blocks
                    .pop()
                    .ok_or_else(|| bad_operand(code, ip, "handler block"))?;
            }

            Instr::Raise(kind) => {
                let message = self.heap.frame_mut(fr).pop()?;
                let message = match message {
                    Value::None => String::new(),
                    other => self.display(other),
                };
                return Err(Exception::new(kind, message).into());
            }

            Instr::RaiseValue => {
                let top = self.heap.frame_mut(fr).pop()?;
                let exc = self
                    .exception(top)
                    .cloned()
                    .ok_or_else(|| Exception::type_error("exceptions must be exception objects"))?;
                return Err(exc.into());
            }
        }
        Ok(Step::Continue)
    }

    fn jump(&mut self, fr: ObjRef, target: u32, ip: usize) -> Step {
        let target = target as usize;
        self.heap.frame_mut(fr).ip = target;
        if target <= ip {
            Step::SafePoint
        } else {
            Step::Continue
        }
    }

    /* ===================== Values ===================== */

    fn const_value(&mut self, c: &Const) -> VmResult<Value> {
        Ok(match c {
            Const::None => Value::None,
            Const::Bool(b) => Value::Bool(*b),
            Const::Int(n) => Value::Int(*n),
            Const::Str(s) => self.alloc_str(s.as_str())?,
            Const::Code(code) => Value::Obj(self.alloc(HeapObject::Code(Rc::clone(code)))?),
        })
    }

    pub fn is_truthy(&self, value: Value) -> bool {
        match value {
            Value::None => false,
            Value::Bool(b) => b,
            Value::Int(n) => n != 0,
            Value::Native(_) => true,
            Value::Obj(r) => match self.heap.get(r) {
                HeapObject::Str(s) => !s.is_empty(),
                HeapObject::List(items) | HeapObject::Tuple(items) => !items.is_empty(),
                HeapObject::Dict(ns) => !ns.is_empty(),
                _ => true,
            },
        }
    }

    /// Structural equality for strings and sequences, identity otherwise
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        match (a, b) {
            (Value::Int(n), Value::Bool(flag)) | (Value::Bool(flag), Value::Int(n)) => {
                n == i32::from(flag)
            }
            (Value::Obj(x), Value::Obj(y)) => match (self.heap.get(x), self.heap.get(y)) {
                (HeapObject::Str(s), HeapObject::Str(t)) => s == t,
                (HeapObject::List(xs), HeapObject::List(ys))
                | (HeapObject::Tuple(xs), HeapObject::Tuple(ys)) => {
                    xs.len() == ys.len()
                        && xs.iter().zip(ys).all(|(p, q)| self.values_equal(*p, *q))
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn compare(&self, op: CmpOp, lhs: Value, rhs: Value) -> VmResult<bool> {
        match op {
            CmpOp::Eq => return Ok(self.values_equal(lhs, rhs)),
            CmpOp::Ne => return Ok(!self.values_equal(lhs, rhs)),
            CmpOp::Is => return Ok(lhs == rhs),
            _ => {}
        }

        let ordering = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a.cmp(&b),
            (Value::Obj(a), Value::Obj(b)) => match (self.heap.str(a), self.heap.str(b)) {
                (Some(a), Some(b)) => a.cmp(b),
                _ => return Err(self.unsupported("<", lhs, rhs)),
            },
            _ => return Err(self.unsupported("<", lhs, rhs)),
        };
        Ok(match op {
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
            CmpOp::Eq | CmpOp::Ne | CmpOp::Is => unreachable!("handled above"),
        })
    }

    fn binary_op(&mut self, instr: Instr, lhs: Value, rhs: Value) -> VmResult<Value> {
        let symbol = match instr {
            Instr::BinaryAdd => "+",
            Instr::BinarySub => "-",
            Instr::BinaryMul => "*",
            Instr::BinaryFloorDiv => "//",
            _ => "%",
        };

        if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
            let result = match instr {
                Instr::BinaryAdd => a.checked_add(b),
                Instr::BinarySub => a.checked_sub(b),
                Instr::BinaryMul => a.checked_mul(b),
                Instr::BinaryFloorDiv | Instr::BinaryMod if b == 0 => {
                    return Err(VmError::raise(
                        ErrorKind::ZeroDivisionError,
                        "integer division or modulo by zero",
                    ))
                }
                Instr::BinaryFloorDiv => floor_div(a, b),
                _ => floor_mod(a, b),
            };
            return result.map(Value::Int).ok_or_else(|| {
                Exception::value_error(format!("integer overflow in {} {} {}", a, symbol, b)).into()
            });
        }

        // Sequence concatenation; both operands are still on the stack.
        if let (Instr::BinaryAdd, Value::Obj(a), Value::Obj(b)) = (instr, lhs, rhs) {
            let joined = match (self.heap.get(a), self.heap.get(b)) {
                (HeapObject::Str(x), HeapObject::Str(y)) => Some(HeapObject::Str(format!("{}{}", x, y))),
                (HeapObject::List(x), HeapObject::List(y)) => {
                    Some(HeapObject::List(x.iter().chain(y).copied().collect()))
                }
                (HeapObject::Tuple(x), HeapObject::Tuple(y)) => {
                    Some(HeapObject::Tuple(x.iter().chain(y).copied().collect()))
                }
                _ => None,
            };
            if let Some(obj) = joined {
                return self.alloc(obj).map(Value::Obj);
            }
        }

        Err(self.unsupported(symbol, lhs, rhs))
    }

    fn subscript(&mut self, container: Value, index: Value) -> VmResult<Value> {
        let Value::Obj(r) = container else {
            return Err(Exception::type_error(format!(
                "'{}' object is not subscriptable",
                self.heap.type_name(container)
            ))
            .into());
        };

        match (self.heap.get(r), index) {
            (HeapObject::List(items) | HeapObject::Tuple(items), Value::Int(i)) => {
                let at = normalize_index(i, items.len())
                    .ok_or_else(|| VmError::raise(ErrorKind::IndexError, "index out of range"))?;
                Ok(items[at])
            }
            (HeapObject::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let at = normalize_index(i, chars.len()).ok_or_else(|| {
                    VmError::raise(ErrorKind::IndexError, "string index out of range")
                })?;
                self.alloc_str(chars[at].to_string())
            }
            (HeapObject::Dict(ns), Value::Obj(key)) => {
                let key = self.heap.str(key).ok_or_else(|| {
                    Exception::type_error("namespace keys must be strings")
                })?;
                ns.get(key)
                    .copied()
                    .ok_or_else(|| VmError::raise(ErrorKind::KeyError, key.to_string()))
            }
            (obj, _) => Err(Exception::type_error(format!(
                "'{}' indices must be {}",
                obj.type_name(),
                if matches!(obj, HeapObject::Dict(_)) { "strings" } else { "integers" }
            ))
            .into()),
        }
    }

    fn unsupported(&self, symbol: &str, lhs: Value, rhs: Value) -> VmError {
        Exception::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            symbol,
            self.heap.type_name(lhs),
            self.heap.type_name(rhs)
        ))
        .into()
    }
}

/* ===================== Helpers ===================== */

fn name_at(code: &Code, i: u16, ip: usize) -> VmResult<&str> {
    code.names
        .get(usize::from(i))
        .map(String::as_str)
        .ok_or_else(|| bad_operand(code, ip, "name"))
}

fn name_error(name: &str) -> VmError {
    VmError::raise(ErrorKind::NameError, format!("name '{}' is not defined", name))
}

fn bad_operand(code: &Code, ip: usize, what: &str) -> VmError {
    VmError::fatal(format!("{}@{}: bad {} operand", code.name, ip, what))
}

fn normalize_index(i: i32, len: usize) -> Option<usize> {
    let i = i64::from(i);
    let len = len as i64;
    let at = if i < 0 { i + len } else { i };
    (0..len).contains(&at).then_some(at as usize)
}

/// Division rounding toward negative infinity
fn floor_div(a: i32, b: i32) -> Option<i32> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Remainder with the sign of the divisor
fn floor_mod(a: i32, b: i32) -> Option<i32> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_division_rounds_down() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_div(7, -2), Some(-4));
        assert_eq!(floor_div(i32::MIN, -1), None);
        assert_eq!(floor_mod(-7, 2), Some(1));
        assert_eq!(floor_mod(7, -2), Some(-1));
    }

    #[test]
    fn test_negative_indices() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }
}
