//! The virtual machine
//!
//! `Vm` owns everything: the heap, the current-frame slot the trampoline
//! dispatches from, the thread pool, the native registry and the platform.
//! All mutation goes through `&mut Vm`; `Vm` is neither `Send` nor `Sync`,
//! which is what makes "one frame executes at a time" hold.

use crate::config::Config;
use crate::error::{Exception, VmError, VmResult};
use crate::generator::GenState;
use crate::heap::{Heap, HeapObject, ObjRef, TempRootHandle};
use crate::native::{self, NativeFrame, NativeRegistry};
use crate::platform::{Platform, StdPlatform};
use crate::scheduler::{Scheduler, ThreadId};
use crate::types::{Code, Function, Namespace, Value};
use std::rc::Rc;
use std::time::Instant;
use tracing::debug;

/// Counters maintained while the VM runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    pub instructions: u64,
    pub frame_switches: u64,
    pub collections: u64,
    pub threads_spawned: u64,
    /// Native calls currently on the Rust stack
    pub native_depth: u32,
    /// Deepest native nesting observed; natives never re-enter, so at most 1
    pub max_native_depth: u32,
}

pub struct Vm {
    pub(crate) heap: Heap,
    /// The trampoline's current-frame slot
    pub(crate) frame: Option<ObjRef>,
    pub(crate) scheduler: Scheduler,
    pub(crate) natives: NativeRegistry,
    pub(crate) native_frame: NativeFrame,
    pub(crate) builtins: ObjRef,
    pub(crate) main_globals: Option<ObjRef>,
    pub(crate) platform: Box<dyn Platform>,
    pub(crate) config: Config,
    pub(crate) stats: VmStats,
    pub(crate) started: Instant,
}

impl Vm {
    pub fn new(config: Config) -> VmResult<Self> {
        Self::with_platform(config, Box::new(StdPlatform))
    }

    pub fn with_platform(config: Config, platform: Box<dyn Platform>) -> VmResult<Self> {
        let mut heap = Heap::new(&config.heap);
        let builtins = heap.insert(HeapObject::Dict(Namespace::new()))?;
        let mut vm = Self {
            heap,
            frame: None,
            scheduler: Scheduler::new(config.scheduler.quantum),
            natives: NativeRegistry::default(),
            native_frame: NativeFrame::default(),
            builtins,
            main_globals: None,
            platform,
            config,
            stats: VmStats::default(),
            started: Instant::now(),
        };
        native::builtins::register(&mut vm)?;
        native::generators::register(&mut vm)?;
        native::sys::register(&mut vm)?;
        debug!(natives = vm.natives.iter().count(), "vm initialized");
        Ok(vm)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> VmStats {
        self.stats
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Milliseconds since the VM was created
    pub fn uptime_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    /* ===================== Allocation & GC ===================== */

    /// Allocate a heap object, collecting first if the heap asks for it
    ///
    /// Anything allocated earlier and not yet reachable from a root must be
    /// pinned across this call, including the objects `obj` itself refers to.
    pub fn alloc(&mut self, obj: HeapObject) -> VmResult<ObjRef> {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.insert(obj)
    }

    /// Allocate a caught exception, dipping into the heap's reserve when
    /// live data has filled it
    pub(crate) fn alloc_exception(&mut self, exc: Exception) -> VmResult<ObjRef> {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.insert_reserved(HeapObject::Exception(exc))
    }

    pub fn alloc_str(&mut self, s: impl Into<String>) -> VmResult<Value> {
        self.alloc(HeapObject::Str(s.into())).map(Value::Obj)
    }

    pub fn new_namespace(&mut self) -> VmResult<ObjRef> {
        self.alloc(HeapObject::Dict(Namespace::new()))
    }

    /// Bind `code` to `globals` (which must be rooted)
    pub fn new_function(&mut self, code: Rc<Code>, globals: ObjRef) -> VmResult<ObjRef> {
        self.alloc(HeapObject::Function(Function { code, globals }))
    }

    fn roots(&self) -> Vec<Value> {
        let mut roots = vec![Value::Obj(self.builtins)];
        roots.extend(self.main_globals.map(Value::Obj));
        roots.extend(self.frame.map(Value::Obj));
        roots.extend(self.scheduler.frames().map(Value::Obj));
        roots.extend(self.native_frame.roots());
        roots
    }

    /// Run a full collection now. Returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        let roots = self.roots();
        let freed = self.heap.collect(roots);
        self.stats.collections += 1;
        debug!(freed, live = self.heap.live(), "garbage collected");
        freed
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        self.heap.is_live(r)
    }

    /* ===================== Temp Roots ===================== */

    pub fn push_temp_root(&mut self, value: Value) -> VmResult<TempRootHandle> {
        self.heap.temp_roots.push(value)
    }

    /// Panics if `handle` is not the most recent pin
    pub fn pop_temp_root(&mut self, handle: TempRootHandle) {
        self.heap.temp_roots.pop(handle)
    }

    /// Pin `value` for the duration of `f`, unpinning on every exit path
    pub fn with_pinned<T>(
        &mut self,
        value: Value,
        f: impl FnOnce(&mut Self) -> VmResult<T>,
    ) -> VmResult<T> {
        let handle = self.push_temp_root(value)?;
        let result = f(self);
        self.pop_temp_root(handle);
        result
    }

    /// Pin `values` in order for the duration of `f`, unpinning in reverse
    pub fn with_pinned_all<T>(
        &mut self,
        values: &[Value],
        f: impl FnOnce(&mut Self) -> VmResult<T>,
    ) -> VmResult<T> {
        let mut handles = Vec::with_capacity(values.len());
        for &value in values {
            match self.push_temp_root(value) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    while let Some(handle) = handles.pop() {
                        self.pop_temp_root(handle);
                    }
                    return Err(err);
                }
            }
        }
        let result = f(self);
        while let Some(handle) = handles.pop() {
            self.pop_temp_root(handle);
        }
        result
    }

    /* ===================== Programs & Threads ===================== */

    /// Install `code` as the main program and register it as the main thread
    ///
    /// Returns the main frame. Its globals become the main-program globals.
    pub fn load_main(&mut self, code: Rc<Code>) -> VmResult<ObjRef> {
        let globals = match self.main_globals {
            Some(globals) => globals,
            None => {
                let globals = self.new_namespace()?;
                self.main_globals = Some(globals);
                globals
            }
        };
        let frame = self.build_frame(code, globals, Some(globals), &[])?;
        let id = self.scheduler.add(frame, true);
        debug!(thread = %id, "main program loaded");
        Ok(frame)
    }

    /// Register `code` as an imported module running in its own thread
    ///
    /// The module gets fresh globals and reports `ismain()` as false.
    pub fn load_module(&mut self, code: Rc<Code>) -> VmResult<ThreadId> {
        let globals = self.new_namespace()?;
        let frame = self.with_pinned(Value::Obj(globals), |vm| {
            vm.build_frame(code, globals, Some(globals), &[])
        })?;
        self.heap.frame_mut(frame).is_import = true;
        let id = self.scheduler.add(frame, false);
        debug!(thread = %id, "module loaded");
        Ok(id)
    }

    /// Load `code` as the main program and run every thread to completion
    pub fn run_main(&mut self, code: Rc<Code>) -> VmResult<()> {
        self.load_main(code)?;
        self.run()
    }

    /// Start `func()` as a new thread
    ///
    /// With `globals` the thread's frame uses those globals instead of the
    /// function's own. `func` and `globals` must be rooted.
    pub fn spawn(&mut self, func: Value, globals: Option<ObjRef>) -> VmResult<ThreadId> {
        let frame = self.new_frame(func, &[])?;
        if let Some(globals) = globals {
            self.heap.frame_mut(frame).globals = globals;
        }
        let id = self.scheduler.add(frame, false);
        self.stats.threads_spawned += 1;
        debug!(thread = %id, "thread spawned");
        Ok(id)
    }

    /// Threads waiting to run (excluding the running one)
    pub fn ready_threads(&self) -> usize {
        self.scheduler.len()
    }

    /* ===================== Inspection ===================== */

    pub fn main_globals(&self) -> Option<ObjRef> {
        self.main_globals
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        let globals = self.main_globals?;
        self.heap.dict(globals)?.get(name).copied()
    }

    /// Bind a main-program global, creating the main globals if needed
    pub fn set_global(&mut self, name: &str, value: Value) -> VmResult<()> {
        let globals = match self.main_globals {
            Some(globals) => globals,
            None => {
                let globals = self.with_pinned(value, |vm| vm.new_namespace())?;
                self.main_globals = Some(globals);
                globals
            }
        };
        if let Some(ns) = self.heap.dict_mut(globals) {
            ns.insert(name.to_string(), value);
        }
        Ok(())
    }

    pub fn builtin(&self, name: &str) -> Option<Value> {
        self.heap.dict(self.builtins)?.get(name).copied()
    }

    pub fn str_value(&self, value: Value) -> Option<&str> {
        self.heap.str(value.as_obj()?)
    }

    /// Items of a list or tuple value
    pub fn items(&self, value: Value) -> Option<&[Value]> {
        self.heap.items(value.as_obj()?)
    }

    pub fn exception(&self, value: Value) -> Option<&Exception> {
        self.heap.exception(value.as_obj()?)
    }

    pub fn generator_state(&self, value: Value) -> Option<GenState> {
        self.heap.generator(value.as_obj()?).map(|g| g.state())
    }

    pub fn type_name(&self, value: Value) -> &'static str {
        self.heap.type_name(value)
    }

    /// Current frame, if a thread is running
    pub fn current_frame(&self) -> Option<ObjRef> {
        self.frame
    }

    pub(crate) fn expect_frame(&self) -> VmResult<ObjRef> {
        self.frame.ok_or_else(|| VmError::fatal("no current frame"))
    }

    /// `str()` of a value
    pub fn display(&self, value: Value) -> String {
        match value {
            Value::Obj(r) => match self.heap.get(r) {
                HeapObject::Str(s) => s.clone(),
                _ => self.repr(value),
            },
            _ => self.repr(value),
        }
    }

    /// `repr()` of a value
    pub fn repr(&self, value: Value) -> String {
        let mut out = String::new();
        self.repr_into(value, &mut out, 0);
        out
    }

    fn repr_into(&self, value: Value, out: &mut String, depth: usize) {
        use std::fmt::Write as _;

        const MAX_DEPTH: usize = 8;
        match value {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Native(id) => {
                let name = self.natives.get(id).map_or("?", |def| def.name);
                let _ = write!(out, "<built-in function {}>", name);
            }
            Value::Obj(r) => match self.heap.get(r) {
                HeapObject::Str(s) => {
                    let _ = write!(out, "'{}'", s.escape_default());
                }
                HeapObject::List(items) | HeapObject::Tuple(items) => {
                    let is_list = matches!(self.heap.get(r), HeapObject::List(_));
                    let (open, close) = if is_list { ('[', ']') } else { ('(', ')') };
                    out.push(open);
                    if depth >= MAX_DEPTH {
                        out.push_str("...");
                    } else {
                        for (i, item) in items.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            self.repr_into(*item, out, depth + 1);
                        }
                        if !is_list && items.len() == 1 {
                            out.push(',');
                        }
                    }
                    out.push(close);
                }
                HeapObject::Dict(ns) => {
                    let mut keys: Vec<&String> = ns.keys().collect();
                    keys.sort();
                    out.push('{');
                    if depth >= MAX_DEPTH {
                        out.push_str("...");
                    } else {
                        for (i, key) in keys.into_iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            let _ = write!(out, "'{}': ", key);
                            self.repr_into(ns[key], out, depth + 1);
                        }
                    }
                    out.push('}');
                }
                HeapObject::Code(code) => {
                    let _ = write!(out, "<code {}>", code.name);
                }
                HeapObject::Function(f) => {
                    let _ = write!(out, "<function {}>", f.code.name);
                }
                HeapObject::Frame(frame) => {
                    let _ = write!(out, "<frame {} at {}>", frame.code.name, frame.ip);
                }
                HeapObject::Generator(g) => {
                    let _ = write!(out, "<generator {:?}>", g.state());
                }
                HeapObject::Exception(exc) => {
                    let _ = write!(out, "{}", exc);
                }
                HeapObject::Free => out.push_str("<free>"),
            },
        }
    }
}
