//! Integration tests for the VM runtime surface

use std::cell::Cell;
use std::rc::Rc;

use squire_vm::{ParamsCheck, TypeTag, Value, ValueType, Vm, VmError, VmOptions};

#[test]
fn test_root_table_survives_stack_traffic() {
    let vm = Vm::new();
    let root = vm.root_table().unwrap();
    let before = vm.ref_count(root);

    vm.push_root_table().unwrap();
    vm.push_root_table().unwrap();
    assert_eq!(vm.ref_count(root), before + 2);
    vm.pop(2).unwrap();
    assert_eq!(vm.ref_count(root), before);
}

#[test]
fn test_nested_values_freed_together() {
    let vm = Vm::new();
    let baseline = vm.heap_stats().live_objects;

    let outer = vm.new_table().unwrap();
    let inner = vm.new_array().unwrap();
    let s = vm.new_string("leaf").unwrap();
    vm.array_push(inner, s).unwrap();
    vm.release(s);
    vm.set_slot(outer, "items", inner).unwrap();
    vm.release(inner);
    assert_eq!(vm.heap_stats().live_objects, baseline + 3);

    vm.release(outer);
    assert_eq!(vm.heap_stats().live_objects, baseline);
}

#[test]
fn test_stale_reference_rejected() {
    let vm = Vm::new();
    let s = vm.new_string("gone").unwrap();
    vm.release(s);
    assert_eq!(vm.push(s), Err(VmError::StaleReference));
    assert!(vm.read_string(s).is_err());
}

#[test]
fn test_release_hook_runs_at_teardown() {
    let fired = Rc::new(Cell::new(0));
    {
        let vm = Vm::new();
        let data = vm.new_userdata(Rc::new(1u8), None).unwrap();
        let root = vm.root_table().unwrap();
        vm.set_slot(root, "data", data).unwrap();
        vm.release(data);

        let seen = fired.clone();
        vm.set_release_hook(data, Box::new(move |_| seen.set(seen.get() + 1)))
            .unwrap();
        assert_eq!(fired.get(), 0);
    }
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_release_hook_may_reenter_vm() {
    let vm = Rc::new(Vm::new());
    let data = vm.new_userdata(Rc::new(()), None).unwrap();
    let weak = vm.weak();
    vm.set_release_hook(
        data,
        Box::new(move |_| {
            if let Some(vm) = weak.upgrade() {
                let root = vm.root_table().unwrap();
                vm.set_slot(root, "released", Value::bool(true)).unwrap();
            }
        }),
    )
    .unwrap();
    vm.release(data);
    let root = vm.root_table().unwrap();
    assert_eq!(vm.get_slot(root, "released").unwrap(), Some(Value::bool(true)));
}

#[test]
fn test_threads_share_heap() {
    let vm = Vm::new();
    let thread = vm.new_thread().unwrap();
    assert!(thread.is_thread());
    assert_eq!(vm.live_contexts(), 2);

    let root = thread.root_table().unwrap();
    thread.set_slot(root, "from_thread", Value::integer(1)).unwrap();
    assert_eq!(
        vm.get_slot(vm.root_table().unwrap(), "from_thread").unwrap(),
        Some(Value::integer(1))
    );

    thread.push_integer(5).unwrap();
    assert_eq!(thread.top(), 1);
    assert_eq!(vm.top(), 0);

    drop(thread);
    assert_eq!(vm.live_contexts(), 1);
}

#[test]
fn test_errors_are_per_context() {
    let vm = Vm::new();
    let thread = vm.new_thread().unwrap();
    let _ = thread.throw_error("thread failure");
    assert_eq!(thread.last_error().as_deref(), Some("thread failure"));
    assert!(vm.last_error().is_none());
}

#[test]
fn test_destroyed_vm_rejects_operations() {
    let vm = Vm::new();
    let thread = vm.new_thread().unwrap();
    vm.destroy();
    assert!(thread.is_destroyed());
    assert_eq!(thread.new_table(), Err(VmError::Destroyed));
    assert_eq!(vm.heap_stats().live_objects, 0);
    // Second destroy is a no-op.
    vm.destroy();
}

#[test]
fn test_class_call_runs_constructor() {
    let vm = Vm::new();
    let class = vm.new_class("Point", None).unwrap();
    let ctor = vm
        .new_closure(
            "constructor",
            Rc::new(|vm: &Vm| {
                let this = vm.get(1).map_err(|e| vm.throw_error(e.to_string()))?;
                let x = vm.get(2).map_err(|e| vm.throw_error(e.to_string()))?;
                vm.set_instance_payload(this, Some(Rc::new(x.as_integer().unwrap_or(0))))
                    .map_err(|e| vm.throw_error(e.to_string()))?;
                Ok(0)
            }),
            &[],
            Some(ParamsCheck::new(2, 2, "xi").unwrap()),
        )
        .unwrap();
    vm.set_slot(class, "constructor", ctor).unwrap();
    vm.release(ctor);

    vm.push(class).unwrap();
    vm.push_null().unwrap();
    vm.push_integer(12).unwrap();
    vm.call(2).unwrap();

    let instance = vm.get(-1).unwrap();
    assert_eq!(vm.value_type(instance).unwrap(), ValueType::Instance);
    let payload = vm.instance_payload(instance).unwrap().unwrap();
    assert_eq!(payload.downcast_ref::<i64>(), Some(&12));
}

#[test]
fn test_type_tags() {
    struct Sprite;
    let vm = Vm::new();
    let data = vm.new_userdata(Rc::new(Sprite), Some(TypeTag::of::<Sprite>())).unwrap();
    assert_eq!(vm.type_tag(data).unwrap(), Some(TypeTag::of::<Sprite>()));
    let table = vm.new_table().unwrap();
    assert_eq!(vm.type_tag(table).unwrap(), None);
}

#[test]
fn test_options_from_json() {
    let options: VmOptions = serde_json::from_str(r#"{ "max_call_depth": 8 }"#).unwrap();
    assert_eq!(options.max_call_depth, 8);
    assert_eq!(options.max_stack_size, VmOptions::default().max_stack_size);

    let vm = Vm::with_options(options.clone());
    assert_eq!(vm.options(), &options);
}

#[test]
fn test_stack_overflow_reported() {
    let vm = Vm::with_options(VmOptions {
        initial_stack_size: 4,
        max_stack_size: 4,
        ..VmOptions::default()
    });
    for i in 0..4 {
        vm.push_integer(i).unwrap();
    }
    assert_eq!(vm.push_integer(5), Err(VmError::StackOverflow));
}
