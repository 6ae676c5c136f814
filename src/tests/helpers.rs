//! Test helpers
//!
//! Common utilities for building VMs, running programs and reading results

use crate::error::{ErrorKind, VmResult};
use crate::{CapturePlatform, Code, CodeBuilder, Config, Value, Vm};
use std::collections::HashMap;
use std::rc::Rc;

/// Defaults, except threads only switch on `yield_thread()`
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.scheduler.quantum = 0;
    config
}

/// Collect before every allocation
pub fn stress_config() -> Config {
    let mut config = test_config();
    config.heap.stress = true;
    config
}

pub fn build_vm(config: Config) -> (Vm, CapturePlatform) {
    let platform = CapturePlatform::new();
    let vm = Vm::with_platform(config, Box::new(platform.clone())).expect("VM creation failed");
    (vm, platform)
}

/// Assemble a code object; `body` sets flags and emits instructions
pub fn assemble(name: &str, body: impl FnOnce(&mut CodeBuilder)) -> Rc<Code> {
    let mut b = CodeBuilder::new(name);
    body(&mut b);
    b.build()
}

/// Run `code` as the main program and return the VM, its output and the result
pub fn run_with(config: Config, code: Rc<Code>) -> (Vm, CapturePlatform, VmResult<()>) {
    let (mut vm, platform) = build_vm(config);
    let result = vm.run_main(code);
    (vm, platform, result)
}

/// Run `code` with the test config; the run must succeed
pub fn run(code: Rc<Code>) -> (Vm, CapturePlatform) {
    let (vm, platform, result) = run_with(test_config(), code);
    if let Err(err) = result {
        panic!("program failed: {}", err);
    }
    (vm, platform)
}

pub fn global(vm: &Vm, name: &str) -> Value {
    vm.global(name)
        .unwrap_or_else(|| panic!("global '{}' is not set", name))
}

pub fn global_int(vm: &Vm, name: &str) -> i32 {
    match global(vm, name) {
        Value::Int(n) => n,
        other => panic!("global '{}' is {:?}, not an int", name, other),
    }
}

pub fn global_str(vm: &Vm, name: &str) -> String {
    let value = global(vm, name);
    vm.str_value(value)
        .unwrap_or_else(|| panic!("global '{}' is {}, not a str", name, vm.type_name(value)))
        .to_string()
}

pub fn global_ints(vm: &Vm, name: &str) -> Vec<i32> {
    let value = global(vm, name);
    vm.items(value)
        .unwrap_or_else(|| panic!("global '{}' is not a sequence", name))
        .iter()
        .map(|v| v.as_int().expect("non-int item"))
        .collect()
}

/// Kind of the caught exception object bound to `name`
pub fn global_exception_kind(vm: &Vm, name: &str) -> ErrorKind {
    let value = global(vm, name);
    vm.exception(value)
        .unwrap_or_else(|| panic!("global '{}' is {}, not an exception", name, vm.type_name(value)))
        .kind
}

/// Assert several immediate globals at once
pub fn assert_globals(vm: &Vm, expected: HashMap<&str, Value>) {
    for (name, value) in expected {
        assert_eq!(vm.global(name), Some(value), "global '{}'", name);
    }
}
