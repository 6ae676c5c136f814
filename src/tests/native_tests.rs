//! Tests for the native call convention and the builtin natives

use super::helpers::*;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::heap::HeapObject;
use crate::native::{Arity, NativeCtx, NativeDef, NativeOutcome, Status};
use crate::types::CmpOp;
use crate::{CapturePlatform, CodeBuilder, Value, Vm};
use maplit::hashmap;

/// Main frame of an empty program, for invoking natives from Rust
fn main_frame(vm: &mut Vm) -> crate::ObjRef {
    vm.load_main(CodeBuilder::new("main").build())
        .expect("failed to load main")
}

fn heap_counts(vm: &Vm) -> (usize, u64) {
    (vm.heap().live(), vm.heap().total_allocated())
}

/* ===================== Arity ===================== */

#[test]
fn test_every_native_rejects_too_many_args_without_allocating() {
    let (mut vm, _) = build_vm(test_config());
    let main = main_frame(&mut vm);
    let defs: Vec<NativeDef> = vm.natives().copied().collect();
    assert!(defs.len() >= 20);

    for def in defs {
        let args = vec![Value::None; def.arity.max() + 1];
        let before = heap_counts(&vm);
        let err = vm.invoke_native(main, def.name, &args).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ArgumentCount), "{}", def.name);
        assert_eq!(heap_counts(&vm), before, "{} allocated", def.name);
        assert_eq!(vm.stats().native_depth, 0);
    }
}

#[test]
fn test_every_native_rejects_too_few_args() {
    let (mut vm, _) = build_vm(test_config());
    let main = main_frame(&mut vm);
    let defs: Vec<NativeDef> = vm.natives().copied().collect();

    for def in defs {
        let min = match def.arity {
            Arity::Exact(n) => n,
            Arity::Range(lo, _) => lo,
        };
        if min == 0 {
            continue;
        }
        let args = vec![Value::Int(0); min - 1];
        let err = vm.invoke_native(main, def.name, &args).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ArgumentCount), "{}", def.name);
    }
}

#[test]
fn test_argument_count_is_caught_as_type_error() {
    let mut b = CodeBuilder::new("main");
    b.try_except(Some(ErrorKind::TypeError), Some("e"), |b| {
        b.load("chr").int(1).int(2).call(2).store("never");
    });
    let (vm, _) = run(b.build());

    assert_eq!(global_exception_kind(&vm, "e"), ErrorKind::ArgumentCount);
    assert_eq!(vm.global("never"), None);
}

#[test]
fn test_arity_display() {
    assert_eq!(Arity::Exact(1).to_string(), "exactly 1 argument");
    assert!(Arity::Range(1, 3).accepts(2));
    assert!(!Arity::Range(1, 3).accepts(0));
    assert_eq!(Arity::Range(0, 8).max(), 8);
}

/* ===================== Argument Types ===================== */

#[test]
fn test_wrong_argument_types_raise_type_error_without_allocating() {
    let (mut vm, _) = build_vm(test_config());
    let main = main_frame(&mut vm);

    let s = vm.alloc_str("x").unwrap();
    vm.set_global("s", s).unwrap();
    let code = vm.alloc(HeapObject::Code(CodeBuilder::new("co").build())).unwrap();
    vm.set_global("co", Value::Obj(code)).unwrap();
    let mixed = vm.alloc(HeapObject::List(vec![Value::Int(1), s])).unwrap();
    vm.set_global("mixed", Value::Obj(mixed)).unwrap();

    let cases = vec![
        ("abs", vec![s]),
        ("chr", vec![s]),
        ("ord", vec![Value::Int(1)]),
        ("pow", vec![Value::Int(2), Value::None]),
        ("len", vec![Value::Int(1)]),
        ("range", vec![s]),
        ("range", vec![Value::Int(1), Value::None]),
        ("sum", vec![Value::Int(1)]),
        ("sum", vec![Value::Obj(mixed)]),
        ("dir", vec![Value::Int(1)]),
        ("eval", vec![Value::Int(1)]),
        ("eval", vec![Value::Obj(code), Value::Int(1)]),
        ("generator", vec![s]),
        ("next", vec![Value::Int(1)]),
        ("send", vec![s, Value::None]),
        ("close", vec![Value::None]),
        ("putb", vec![s]),
        ("spawn", vec![Value::Int(1)]),
    ];

    for (name, args) in cases {
        let before = heap_counts(&vm);
        let err = vm.invoke_native(main, name, &args).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::TypeError), "{}{:?}", name, args);
        assert!(err.to_string().contains(name), "{}: {}", name, err);
        assert_eq!(heap_counts(&vm), before, "{} allocated", name);
    }
    assert_eq!(vm.ready_threads(), 1);
}

#[test]
fn test_out_of_range_values_raise_value_error() {
    let (mut vm, _) = build_vm(test_config());
    let main = main_frame(&mut vm);

    let cases = vec![
        ("chr", vec![Value::Int(256)]),
        ("chr", vec![Value::Int(-1)]),
        ("chr", vec![Value::Int(200)]),
        ("pow", vec![Value::Int(2), Value::Int(-1)]),
        ("pow", vec![Value::Int(2), Value::Int(31)]),
        ("abs", vec![Value::Int(i32::MIN)]),
        ("range", vec![Value::Int(1), Value::Int(5), Value::Int(0)]),
        ("putb", vec![Value::Int(300)]),
    ];
    for (name, args) in cases {
        let err = vm.invoke_native(main, name, &args).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ValueError), "{}{:?}", name, args);
    }
}

#[test]
fn test_ord_requires_one_character() {
    let (mut vm, _) = build_vm(test_config());
    let main = main_frame(&mut vm);
    let s = vm.alloc_str("ab").unwrap();
    vm.set_global("s", s).unwrap();

    let err = vm.invoke_native(main, "ord", &[s]).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::TypeError));
    assert!(err.to_string().contains("length 2"));
}

#[test]
fn test_huge_range_is_memory_error() {
    let (mut vm, _) = build_vm(test_config());
    let main = main_frame(&mut vm);
    let err = vm
        .invoke_native(main, "range", &[Value::Int(i32::MAX)])
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::MemoryError));
}

/* ===================== Results ===================== */

#[test]
fn test_builtin_results() {
    let mut b = CodeBuilder::new("main");
    b.load("chr").int(65).call(1).store("c");
    b.load("ord").string("A").call(1).store("o");
    b.load("len").string("hello").call(1).store("n");
    b.load("range").int(1).int(10).int(3).call(3).store("up");
    b.load("range").int(5).int(0).int(-2).call(3).store("down");
    b.load("range").int(3).int(3).call(2).store("empty");
    b.load("sum").load("range").int(5).call(1).call(1).store("total");
    b.load("type").int(3).call(1).store("t");
    b.load("type").load("len").call(1).store("tn");
    b.load("ismain").call(0).store("main");
    b.load("id").int(9).call(1).store("nine");
    let (vm, _) = run(b.build());

    assert_eq!(global_str(&vm, "c"), "A");
    assert_eq!(global_ints(&vm, "up"), vec![1, 4, 7]);
    assert_eq!(global_ints(&vm, "down"), vec![5, 3, 1]);
    assert!(global_ints(&vm, "empty").is_empty());
    assert_eq!(global_str(&vm, "t"), "int");
    assert_eq!(global_str(&vm, "tn"), "builtin_function");
    assert_globals(
        &vm,
        hashmap! {
            "o" => Value::Int(65),
            "n" => Value::Int(5),
            "total" => Value::Int(10),
            "main" => Value::Bool(true),
            "nine" => Value::Int(9),
        },
    );
}

#[test]
fn test_arithmetic_and_size_builtins() {
    let mut b = CodeBuilder::new("main");
    b.load("abs").int(-7).call(1).store("a");
    b.load("abs").int(7).call(1).store("b");
    b.load("pow").int(-3).int(3).call(2).store("p");
    b.load("pow").int(5).int(0).call(2).store("one");
    b.load("sizeof").int(1).call(1).store("small");
    b.load("sizeof").load("range").int(100).call(1).call(1).store("big");
    b.load("sizeof").emit(crate::Instr::BuildList(0)).call(1).store("bare");
    let (vm, _) = run(b.build());

    assert_globals(
        &vm,
        hashmap! {
            "a" => Value::Int(7),
            "b" => Value::Int(7),
            "p" => Value::Int(-27),
            "one" => Value::Int(1),
        },
    );
    let (small, big, bare) = (
        global_int(&vm, "small"),
        global_int(&vm, "big"),
        global_int(&vm, "bare"),
    );
    assert!(small > 0);
    assert!(bare > small);
    assert_eq!(big - bare, 100 * small);
}

#[test]
fn test_chr_prints_the_byte_putb_writes() {
    let mut b = CodeBuilder::new("main");
    b.load("print").load("chr").int(126).call(1).call(1).pop();
    b.load("putb").int(126).call(1).pop();
    let (_, out) = run(b.build());
    assert_eq!(out.output(), b"~\n~".to_vec());
}

#[test]
fn test_id_spaces_overlap_between_kinds() {
    let (mut vm, _) = build_vm(test_config());
    let main = main_frame(&mut vm);
    let s = vm.alloc_str("s").unwrap();
    vm.set_global("s", s).unwrap();
    let slot = s.as_obj().unwrap().index() as i32;

    let of = |vm: &mut Vm, v: Value| match vm.invoke_native(main, "id", &[v]).unwrap() {
        NativeOutcome::Value(id) => id,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(of(&mut vm, s), Value::Int(slot));
    assert_eq!(of(&mut vm, Value::Int(slot)), Value::Int(slot));
    assert_eq!(of(&mut vm, s), of(&mut vm, s));
}

#[test]
fn test_dir_lists_sorted_globals_under_stress() {
    let mut b = CodeBuilder::new("main");
    b.int(1).store("zeta");
    b.int(2).store("alpha");
    b.int(3).store("mid");
    b.load("dir").call(0).store("names");
    let (vm, _, result) = run_with(stress_config(), b.build());
    result.unwrap();

    let names: Vec<String> = vm
        .items(global(&vm, "names"))
        .unwrap()
        .iter()
        .map(|v| vm.str_value(*v).unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
}

#[test]
fn test_dir_of_function_lists_its_globals() {
    let f = assemble("f", |b| {
        b.none().ret();
    });
    let mut b = CodeBuilder::new("main");
    b.def("f", f);
    b.load("dir").load("f").call(1).store("names");
    let (vm, _) = run(b.build());
    assert_eq!(vm.items(global(&vm, "names")).unwrap().len(), 1);
}

#[test]
fn test_print_joins_with_spaces() {
    let mut b = CodeBuilder::new("main");
    b.load("print").string("hello").int(42).boolean(true).none().call(4).pop();
    b.load("print").call(0).pop();
    b.load("print").load("range").int(3).call(1).call(1).pop();
    let (_, out) = run(b.build());
    assert_eq!(out.output_string(), "hello 42 True None\n\n[0, 1, 2]\n");
}

#[test]
fn test_byte_io() {
    let platform = CapturePlatform::with_input(b"hi");
    let mut vm = Vm::with_platform(test_config(), Box::new(platform.clone())).unwrap();

    let mut b = CodeBuilder::new("main");
    b.load("putb").int(65).call(1).pop();
    b.load("putb").load("getb").call(0).call(1).pop();
    b.load("getb").call(0).store("i");
    vm.run_main(b.build()).unwrap();

    assert_eq!(platform.output(), b"Ah".to_vec());
    assert_eq!(vm.global("i"), Some(Value::Int(i32::from(b'i'))));
}

#[test]
fn test_getb_at_end_of_input_is_io_error() {
    let mut b = CodeBuilder::new("main");
    b.try_except(Some(ErrorKind::SystemError), Some("e"), |b| {
        b.load("getb").call(0).pop();
    });
    let (vm, _) = run(b.build());
    assert_eq!(global_exception_kind(&vm, "e"), ErrorKind::IoError);
}

#[test]
fn test_heap_reports_capacity() {
    let mut b = CodeBuilder::new("main");
    b.load("gc").call(0).pop();
    b.load("heap").call(0).store("h");
    let (vm, _) = run(b.build());

    let h = global_ints(&vm, "h");
    assert_eq!(h[1], vm.config().heap.capacity as i32);
    assert!(h[0] > 0 && h[0] < h[1]);
    assert!(vm.stats().collections >= 1);
}

#[test]
fn test_clock_is_non_negative() {
    let mut b = CodeBuilder::new("main");
    b.load("clock").call(0).store("t");
    b.load("t").int(0).compare(CmpOp::Ge).store("ok");
    let (vm, _) = run(b.build());
    assert_eq!(vm.global("ok"), Some(Value::Bool(true)));
}

/* ===================== Custom Natives ===================== */

fn add2(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let a = ctx.int_arg(0)?;
    let b = ctx.int_arg(1)?;
    ctx.set_result(Value::Int(a + b));
    Ok(Status::Ok)
}

fn nothing(_ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    Ok(Status::Ok)
}

fn fail(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    Err(ctx.value_error("always fails"))
}

#[test]
fn test_registered_native_is_callable() {
    let (mut vm, _) = build_vm(test_config());
    vm.register_native(NativeDef::new("add2", Arity::Exact(2), add2))
        .unwrap();
    vm.register_native(NativeDef::new("nothing", Arity::Exact(0), nothing))
        .unwrap();

    let mut b = CodeBuilder::new("main");
    b.int(0).store("untouched");
    b.load("add2").int(40).int(2).call(2).store("x");
    b.load("nothing").call(0).store("y");
    vm.run_main(b.build()).unwrap();

    assert_eq!(vm.global("x"), Some(Value::Int(42)));
    assert_eq!(vm.global("y"), Some(Value::None));
    assert_eq!(vm.stats().max_native_depth, 1);
}

#[test]
fn test_failed_native_leaves_caller_stack_alone() {
    let (mut vm, _) = build_vm(test_config());
    vm.register_native(NativeDef::new("fail", Arity::Exact(1), fail))
        .unwrap();

    // The handler block records stack depth 1 (the pending 7); the call's
    // operands are discarded by unwinding, not by the native.
    let mut b = CodeBuilder::new("main");
    b.int(7);
    b.try_except(Some(ErrorKind::ValueError), Some("e"), |b| {
        b.load("fail").int(1).call(1).pop();
    });
    b.store("kept");
    vm.run_main(b.build()).unwrap();

    assert_eq!(vm.global("kept"), Some(Value::Int(7)));
    assert_eq!(global_exception_kind(&vm, "e"), ErrorKind::ValueError);
}

#[test]
fn test_invoke_native_reports_frame_switch() {
    let (mut vm, _) = build_vm(test_config());
    let main = main_frame(&mut vm);
    let code = vm.alloc(HeapObject::Code(CodeBuilder::new("co").build())).unwrap();
    vm.set_global("co", Value::Obj(code)).unwrap();

    match vm.invoke_native(main, "eval", &[Value::Obj(code)]).unwrap() {
        NativeOutcome::FrameSwitch(frame) => {
            assert_eq!(vm.heap().frame(frame).back, Some(main));
            assert_eq!(vm.heap().frame(frame).globals, vm.main_globals().unwrap());
        }
        other => panic!("expected a frame switch, got {:?}", other),
    }

    let err = vm.invoke_native(main, "no_such", &[]).unwrap_err();
    assert!(matches!(err, VmError::Exception(ref e) if e.kind == ErrorKind::NameError));
}

/* ===================== Frame Switch Targets ===================== */

/// jump(f) - Switch to a fresh frame for `f` without linking it back
fn jump(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let f = ctx.function_arg(0)?;
    let frame = ctx.vm().new_frame(Value::Obj(f), &[])?;
    Ok(Status::FrameSwitch(frame))
}

/// Switch to something that is not a frame
fn bogus_switch(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let s = ctx.vm().alloc_str("not a frame")?;
    Ok(Status::FrameSwitch(s.as_obj().expect("strings live on the heap")))
}

/// Switch to a frame that returns somewhere other than the caller
fn misrouted_switch(ctx: &mut NativeCtx<'_>) -> VmResult<Status> {
    let f = ctx.function_arg(0)?;
    let vm = ctx.vm();
    let elsewhere = vm.new_frame(Value::Obj(f), &[])?;
    let frame = vm.with_pinned(Value::Obj(elsewhere), |vm| vm.new_frame(Value::Obj(f), &[]))?;
    vm.heap.frame_mut(frame).back = Some(elsewhere);
    Ok(Status::FrameSwitch(frame))
}

#[test]
fn test_unlinked_switch_target_returns_to_caller() {
    let (mut vm, out) = build_vm(test_config());
    vm.register_native(NativeDef::new("jump", Arity::Exact(1), jump))
        .unwrap();

    let five = assemble("five", |b| {
        b.int(5).ret();
    });
    let mut b = CodeBuilder::new("main");
    b.def("five", five);
    b.load("jump").load("five").call(1).store("x");
    b.load("print").string("after").call(1).pop();
    vm.run_main(b.build()).unwrap();

    assert_eq!(vm.global("x"), Some(Value::Int(5)));
    assert_eq!(out.output_string(), "after\n");
    assert_eq!(vm.stats().max_native_depth, 1);
}

#[test]
fn test_non_frame_switch_target_is_fatal() {
    let (mut vm, _) = build_vm(test_config());
    vm.register_native(NativeDef::new("bogus", Arity::Exact(0), bogus_switch))
        .unwrap();

    let mut b = CodeBuilder::new("main");
    b.try_except(None, None, |b| {
        b.load("bogus").call(0).pop();
    });
    b.int(1).store("reached");
    let err = vm.run_main(b.build()).unwrap_err();

    assert!(matches!(err, VmError::Fatal(_)), "got {:?}", err);
    assert_eq!(vm.global("reached"), None);
}

#[test]
fn test_misrouted_switch_target_is_fatal() {
    let (mut vm, _) = build_vm(test_config());
    vm.register_native(NativeDef::new("misroute", Arity::Exact(1), misrouted_switch))
        .unwrap();

    let noop = assemble("noop", |b| {
        b.none().ret();
    });
    let mut b = CodeBuilder::new("main");
    b.def("noop", noop);
    b.load("misroute").load("noop").call(1).store("x");
    let err = vm.run_main(b.build()).unwrap_err();

    assert!(matches!(err, VmError::Fatal(_)), "got {:?}", err);
    assert_eq!(vm.global("x"), None);
}
