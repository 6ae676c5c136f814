//! Managed heap
//!
//! A non-moving arena with mark-and-sweep collection. Objects live in slots
//! addressed by [`ObjRef`] (index + generation). Freed slots go on a free list
//! and bump their generation, so a handle that outlived its object is caught
//! on the next access instead of silently aliasing a new object.
//!
//! The heap itself only knows two kinds of roots: the ones handed to
//! [`Heap::collect`] and the [`TempRoots`] pin stack it owns.

pub mod roots;

pub use roots::{TempRootHandle, TempRoots};

use crate::config::HeapConfig;
use crate::error::{ErrorKind, Exception, VmError, VmResult};
use crate::frame::Frame;
use crate::generator::Generator;
use crate::types::{Code, Function, Namespace, Value};
use std::fmt;
use std::rc::Rc;

/// Slots past `capacity` that only exception delivery may take
pub const EXCEPTION_RESERVE: usize = 8;

/// Handle to a heap object
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjRef {
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({}/{})", self.index, self.generation)
    }
}

/// A heap object
#[derive(Debug)]
pub enum HeapObject {
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Namespace),
    Code(Rc<Code>),
    Function(Function),
    Frame(Box<Frame>),
    Generator(Generator),
    Exception(Exception),
    /// Free slot
    Free,
}

impl HeapObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::Str(_) => "str",
            HeapObject::List(_) => "list",
            HeapObject::Tuple(_) => "tuple",
            HeapObject::Dict(_) => "dict",
            HeapObject::Code(_) => "code",
            HeapObject::Function(_) => "function",
            HeapObject::Frame(_) => "frame",
            HeapObject::Generator(_) => "generator",
            HeapObject::Exception(_) => "exception",
            HeapObject::Free => "free",
        }
    }

    /// Push every handle this object references onto `out`
    fn trace(&self, out: &mut Vec<ObjRef>) {
        fn push(out: &mut Vec<ObjRef>, v: &Value) {
            if let Value::Obj(r) = v {
                out.push(*r);
            }
        }
        match self {
            HeapObject::List(items) | HeapObject::Tuple(items) => {
                items.iter().for_each(|v| push(out, v));
            }
            HeapObject::Dict(ns) => ns.values().for_each(|v| push(out, v)),
            HeapObject::Function(f) => out.push(f.globals),
            HeapObject::Frame(frame) => frame.trace(out),
            HeapObject::Generator(g) => out.extend(g.frame),
            HeapObject::Exception(exc) => push(out, &exc.value),
            HeapObject::Str(_) | HeapObject::Code(_) | HeapObject::Free => {}
        }
    }
}

pub struct Heap {
    objects: Vec<HeapObject>,
    generations: Vec<u32>,
    marks: Vec<bool>,
    free_list: Vec<u32>,
    live: usize,
    capacity: usize,
    gc_threshold: usize,
    allocated_since_gc: usize,
    total_allocated: u64,
    stress: bool,
    pub(crate) temp_roots: TempRoots,
}

impl Heap {
    pub fn new(config: &HeapConfig) -> Self {
        Self {
            objects: Vec::new(),
            generations: Vec::new(),
            marks: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            capacity: config.capacity,
            gc_threshold: config.gc_threshold.max(1),
            allocated_since_gc: 0,
            total_allocated: 0,
            stress: config.stress,
            temp_roots: TempRoots::new(config.temp_roots),
        }
    }

    /* ===================== Allocation ===================== */

    /// True when the next allocation should be preceded by a collection
    pub fn should_collect(&self) -> bool {
        self.stress || self.allocated_since_gc >= self.gc_threshold || self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.live >= self.capacity
    }

    /// Store `obj` in a free slot. Never collects; fails with `MemoryError`
    /// when the arena is at capacity.
    pub(crate) fn insert(&mut self, obj: HeapObject) -> VmResult<ObjRef> {
        if self.is_full() {
            return Err(VmError::raise(
                ErrorKind::MemoryError,
                format!("heap exhausted ({} objects)", self.capacity),
            ));
        }
        Ok(self.place(obj))
    }

    /// Like [`Heap::insert`], but may use the [`EXCEPTION_RESERVE`] slots
    /// past capacity. Running out of those too is fatal.
    pub(crate) fn insert_reserved(&mut self, obj: HeapObject) -> VmResult<ObjRef> {
        if self.live >= self.capacity + EXCEPTION_RESERVE {
            return Err(VmError::fatal(format!(
                "heap exhausted ({} objects) with the exception reserve spent",
                self.capacity
            )));
        }
        Ok(self.place(obj))
    }

    fn place(&mut self, obj: HeapObject) -> ObjRef {
        self.live += 1;
        self.allocated_since_gc += 1;
        self.total_allocated += 1;
        if let Some(idx) = self.free_list.pop() {
            let i = idx as usize;
            self.objects[i] = obj;
            self.marks[i] = false;
            ObjRef {
                index: idx,
                generation: self.generations[i],
            }
        } else {
            let idx = self.objects.len() as u32;
            self.objects.push(obj);
            self.generations.push(0);
            self.marks.push(false);
            ObjRef {
                index: idx,
                generation: 0,
            }
        }
    }

    /* ===================== Access ===================== */

    fn check(&self, r: ObjRef) -> usize {
        let i = r.index as usize;
        assert!(
            i < self.objects.len()
                && self.generations[i] == r.generation
                && !matches!(self.objects[i], HeapObject::Free),
            "stale ObjRef: {:?}",
            r
        );
        i
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        let i = r.index as usize;
        i < self.objects.len()
            && self.generations[i] == r.generation
            && !matches!(self.objects[i], HeapObject::Free)
    }

    pub fn get(&self, r: ObjRef) -> &HeapObject {
        let i = self.check(r);
        &self.objects[i]
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut HeapObject {
        let i = self.check(r);
        &mut self.objects[i]
    }

    pub fn type_name(&self, v: Value) -> &'static str {
        match v {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Native(_) => "builtin_function",
            Value::Obj(r) => self.get(r).type_name(),
        }
    }

    pub fn str(&self, r: ObjRef) -> Option<&str> {
        match self.get(r) {
            HeapObject::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a list or tuple
    pub fn items(&self, r: ObjRef) -> Option<&[Value]> {
        match self.get(r) {
            HeapObject::List(items) | HeapObject::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn list_mut(&mut self, r: ObjRef) -> Option<&mut Vec<Value>> {
        match self.get_mut(r) {
            HeapObject::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn dict(&self, r: ObjRef) -> Option<&Namespace> {
        match self.get(r) {
            HeapObject::Dict(ns) => Some(ns),
            _ => None,
        }
    }

    pub fn dict_mut(&mut self, r: ObjRef) -> Option<&mut Namespace> {
        match self.get_mut(r) {
            HeapObject::Dict(ns) => Some(ns),
            _ => None,
        }
    }

    pub fn function(&self, r: ObjRef) -> Option<&Function> {
        match self.get(r) {
            HeapObject::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn generator(&self, r: ObjRef) -> Option<&Generator> {
        match self.get(r) {
            HeapObject::Generator(g) => Some(g),
            _ => None,
        }
    }

    pub fn generator_mut(&mut self, r: ObjRef) -> Option<&mut Generator> {
        match self.get_mut(r) {
            HeapObject::Generator(g) => Some(g),
            _ => None,
        }
    }

    pub fn exception(&self, r: ObjRef) -> Option<&Exception> {
        match self.get(r) {
            HeapObject::Exception(exc) => Some(exc),
            _ => None,
        }
    }

    /// Frame behind `r`. Panics if `r` is not a frame: frame handles only
    /// ever come from the runtime itself.
    pub fn frame(&self, r: ObjRef) -> &Frame {
        match self.get(r) {
            HeapObject::Frame(frame) => frame,
            other => panic!("expected frame at {:?}, found {}", r, other.type_name()),
        }
    }

    pub fn frame_mut(&mut self, r: ObjRef) -> &mut Frame {
        match self.get_mut(r) {
            HeapObject::Frame(frame) => frame,
            other => panic!("expected frame at {:?}, found {}", r, other.type_name()),
        }
    }

    /* ===================== Statistics ===================== */

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.live)
    }

    /// Allocations since the heap was created
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    pub fn temp_roots(&self) -> &TempRoots {
        &self.temp_roots
    }

    /* ===================== Collection ===================== */

    /// Mark everything reachable from `roots` and the temp-root stack, free
    /// the rest. Returns the number of objects freed.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> usize {
        self.marks.iter_mut().for_each(|m| *m = false);

        let mut worklist: Vec<ObjRef> = roots
            .into_iter()
            .chain(self.temp_roots.iter())
            .filter_map(Value::as_obj)
            .collect();

        while let Some(r) = worklist.pop() {
            let i = self.check(r);
            if self.marks[i] {
                continue;
            }
            self.marks[i] = true;
            self.objects[i].trace(&mut worklist);
        }

        let mut freed = 0;
        for i in 0..self.objects.len() {
            if self.marks[i] || matches!(self.objects[i], HeapObject::Free) {
                continue;
            }
            self.objects[i] = HeapObject::Free;
            self.generations[i] = self.generations[i].wrapping_add(1);
            self.free_list.push(i as u32);
            freed += 1;
        }
        self.live -= freed;
        self.allocated_since_gc = 0;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(&HeapConfig {
            capacity: 8,
            ..HeapConfig::default()
        })
    }

    #[test]
    fn test_free_list_reuse() {
        let mut heap = heap();
        let a = heap.insert(HeapObject::Str("a".into())).unwrap();
        assert_eq!(heap.collect(std::iter::empty()), 1);
        let b = heap.insert(HeapObject::Str("b".into())).unwrap();
        assert_eq!(a.index, b.index);
        assert_ne!(a.generation, b.generation);
        assert!(!heap.is_live(a));
        assert_eq!(heap.str(b), Some("b"));
    }

    #[test]
    #[should_panic(expected = "stale ObjRef")]
    fn test_stale_handle_panics() {
        let mut heap = heap();
        let a = heap.insert(HeapObject::Str("a".into())).unwrap();
        heap.collect(std::iter::empty());
        let _ = heap.get(a);
    }

    #[test]
    fn test_collect_keeps_reachable_children() {
        let mut heap = heap();
        let s = heap.insert(HeapObject::Str("kept".into())).unwrap();
        let list = heap.insert(HeapObject::List(vec![Value::Obj(s)])).unwrap();
        let garbage = heap.insert(HeapObject::Str("garbage".into())).unwrap();

        let freed = heap.collect([Value::Obj(list)]);
        assert_eq!(freed, 1);
        assert!(heap.is_live(s));
        assert!(heap.is_live(list));
        assert!(!heap.is_live(garbage));
        assert_eq!(heap.live(), 2);
    }

    #[test]
    fn test_collect_unreachable_cycle() {
        let mut heap = heap();
        let a = heap.insert(HeapObject::List(vec![])).unwrap();
        let b = heap.insert(HeapObject::List(vec![Value::Obj(a)])).unwrap();
        heap.list_mut(a).unwrap().push(Value::Obj(b));

        assert_eq!(heap.collect([Value::Obj(a)]), 0);
        assert_eq!(heap.collect(std::iter::empty()), 2);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn test_temp_roots_are_roots() {
        let mut heap = heap();
        let s = heap.insert(HeapObject::Str("pinned".into())).unwrap();
        let handle = heap.temp_roots.push(Value::Obj(s)).unwrap();
        heap.collect(std::iter::empty());
        assert!(heap.is_live(s));
        heap.temp_roots.pop(handle);
        heap.collect(std::iter::empty());
        assert!(!heap.is_live(s));
    }

    #[test]
    fn test_insert_at_capacity_is_memory_error() {
        let mut heap = heap();
        for i in 0..8 {
            heap.insert(HeapObject::Str(i.to_string())).unwrap();
        }
        assert!(heap.is_full());
        assert!(heap.should_collect());
        let err = heap.insert(HeapObject::Str("one too many".into())).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MemoryError));
        assert_eq!(heap.live(), 8);
    }

    #[test]
    fn test_reserve_admits_exceptions_past_capacity() {
        let mut heap = heap();
        for i in 0..8 {
            heap.insert(HeapObject::Str(i.to_string())).unwrap();
        }
        for _ in 0..EXCEPTION_RESERVE {
            let exc = Exception::new(ErrorKind::MemoryError, "full");
            heap.insert_reserved(HeapObject::Exception(exc)).unwrap();
        }
        assert_eq!(heap.live(), 8 + EXCEPTION_RESERVE);
        assert_eq!(heap.available(), 0);

        let exc = Exception::new(ErrorKind::MemoryError, "full");
        let err = heap.insert_reserved(HeapObject::Exception(exc)).unwrap_err();
        assert!(matches!(err, VmError::Fatal(_)));
        assert!(heap.insert(HeapObject::Str("x".into())).is_err());
    }
}
