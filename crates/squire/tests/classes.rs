//! Integration tests for host classes

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use squire::{inherit, ClassOptions, Error, Inherits, Object, Ownership, TypeTag, Vm, VmExt};

struct Counter {
    value: i64,
    drops: Rc<Cell<u32>>,
}

impl Drop for Counter {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

fn counter_class(vm: &Vm, drops: &Rc<Cell<u32>>, ownership: Ownership) -> squire::Class {
    let drops = drops.clone();
    let class = vm
        .root()
        .unwrap()
        .add_class_with(
            "Counter",
            move || Counter {
                value: 0,
                drops: drops.clone(),
            },
            ClassOptions::<Counter>::new().ownership(ownership),
        )
        .unwrap();
    class
        .add_method::<Counter, _, _>("increment", |c: &mut Counter| {
            c.value += 1;
            c.value
        })
        .unwrap();
    class
}

#[test]
fn test_owned_destructor_runs_once() {
    let drops = Rc::new(Cell::new(0));
    let vm = Vm::new();
    let class = counter_class(&vm, &drops, Ownership::Owned);

    let counter = vm.new_instance(&class, ()).unwrap();
    let alias = counter.clone();
    assert_eq!(vm.call_method::<_, i64>(&alias, "increment", ()).unwrap(), 1);
    assert_eq!(counter.with_ref(|c: &Counter| c.value).unwrap(), 1);

    drop(counter);
    assert_eq!(drops.get(), 0);
    drop(alias);
    assert_eq!(drops.get(), 1);

    drop(class);
    drop(vm);
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_borrowed_instance_not_dropped_by_handles() {
    let drops = Rc::new(Cell::new(0));
    let vm = Vm::new();
    let class = counter_class(&vm, &drops, Ownership::Borrowed);

    let host = Rc::new(RefCell::new(Counter {
        value: 41,
        drops: drops.clone(),
    }));
    let instance = vm.new_instance_ptr(&class, &host).unwrap();
    assert_eq!(vm.call_method::<_, i64>(&instance, "increment", ()).unwrap(), 42);
    drop(instance);
    assert_eq!(drops.get(), 0);
    assert_eq!(host.borrow().value, 42);

    drop(host);
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_constructor_arguments_and_defaults() {
    struct Range {
        start: i64,
        end: i64,
        step: i64,
    }

    let vm = Vm::new();
    let root = vm.root().unwrap();
    let class = root
        .add_class_with(
            "Range",
            |start: i64, end: i64, step: i64| Range { start, end, step },
            ClassOptions::<Range>::new().defaults((100, 1)),
        )
        .unwrap();
    class
        .add_method::<Range, _, _>("len", |r: &Range| (r.end - r.start) / r.step)
        .unwrap();
    assert_eq!(class.as_object().to::<squire::Function>().unwrap().num_params().unwrap(), (1, 3));

    let short = vm.new_instance(&class, (0,)).unwrap();
    assert_eq!(vm.call_method::<_, i64>(&short, "len", ()).unwrap(), 100);
    let stepped = vm.new_instance(&class, (0, 10, 5)).unwrap();
    assert_eq!(vm.call_method::<_, i64>(&stepped, "len", ()).unwrap(), 2);

    let err = vm.new_instance(&class, ("zero",)).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
    assert_eq!(vm.top(), 0);
}

struct Shape {
    sides: i64,
}

struct Square {
    shape: Shape,
    size: i64,
}

impl Inherits<Shape> for Square {
    fn as_base(&self) -> &Shape {
        &self.shape
    }

    fn as_base_mut(&mut self) -> &mut Shape {
        &mut self.shape
    }
}

struct Polygon {
    shape: Shape,
}

impl Inherits<Shape> for Polygon {
    fn as_base(&self) -> &Shape {
        &self.shape
    }

    fn as_base_mut(&mut self) -> &mut Shape {
        &mut self.shape
    }
}

struct Stone;

#[test]
fn test_derived_is_compatible_with_base() {
    let vm = Vm::new();
    let root = vm.root().unwrap();
    let shape = root
        .add_class::<Shape, _, _>("Shape", |sides: i64| Shape { sides })
        .unwrap();
    shape
        .add_method::<Shape, _, _>("sides", |s: &Shape| s.sides)
        .unwrap();
    let square = root
        .add_class_with(
            "Square",
            |size: i64| Square {
                shape: Shape { sides: 4 },
                size,
            },
            ClassOptions::<Square>::new().inherit::<Shape>(&shape),
        )
        .unwrap();
    square
        .add_method::<Square, _, _>("area", |s: &Square| s.size * s.size)
        .unwrap();
    let stone = root.add_class::<Stone, _, _>("Stone", || Stone).unwrap();

    let registry = vm.type_registry().unwrap();
    let (shape_tag, square_tag, stone_tag) = (
        TypeTag::of::<Shape>(),
        TypeTag::of::<Square>(),
        TypeTag::of::<Stone>(),
    );
    assert!(registry.is_compatible(square_tag, shape_tag));
    assert!(!registry.is_compatible(shape_tag, square_tag));
    assert!(!registry.is_compatible(stone_tag, shape_tag));
    assert_eq!(registry.base_of(square_tag), Some(shape_tag));
    assert_eq!(square.base().unwrap(), Some(shape.clone()));

    // The inherited method reads the embedded base.
    let sq = vm.new_instance(&square, (3,)).unwrap();
    assert!(sq.is::<Shape>());
    assert!(sq.is::<Square>());
    assert_eq!(vm.call_method::<_, i64>(&sq, "sides", ()).unwrap(), 4);
    assert_eq!(vm.call_method::<_, i64>(&sq, "area", ()).unwrap(), 9);
    sq.with(|s: &mut Shape| s.sides = 5).unwrap();
    assert_eq!(sq.with_ref(|s: &Square| s.shape.sides).unwrap(), 5);

    // An abstract subclass drops the inherited constructor but keeps the
    // methods.
    let polygon = root
        .add_abstract_class::<Polygon>("Polygon", Some(inherit::<Polygon, Shape>(&shape)))
        .unwrap();
    assert!(polygon.find_function("constructor").unwrap().is_none());
    assert!(polygon.find_function("sides").unwrap().is_some());
    assert!(registry.is_compatible(TypeTag::of::<Polygon>(), shape_tag));

    // An unrelated instance is refused as a receiver.
    let rock = vm.new_instance(&stone, ()).unwrap();
    assert!(!rock.is::<Shape>());
    let sides = shape.find_function("sides").unwrap().unwrap();
    assert!(sides.call::<_, i64>(rock.as_object(), ()).is_err());
    assert!(matches!(
        rock.with_ref(|s: &Shape| s.sides),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_invalid_base_rejected() {
    let vm = Vm::new();
    let root = vm.root().unwrap();
    let stone = root.add_class::<Stone, _, _>("Stone", || Stone).unwrap();

    // `stone` is not the class registered for `Shape`.
    let err = root
        .add_class_with(
            "Square",
            |size: i64| Square {
                shape: Shape { sides: 4 },
                size,
            },
            ClassOptions::<Square>::new().inherit::<Shape>(&stone),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Binding(_)));
    assert!(!root.has_entry("Square"));
    assert!(!vm.type_registry().unwrap().contains(TypeTag::of::<Square>()));
}

#[test]
fn test_abstract_class_as_base() {
    let vm = Vm::new();
    let root = vm.root().unwrap();
    let shape = root.add_abstract_class::<Shape>("Shape", None).unwrap();
    shape
        .add_method::<Shape, _, _>("sides", |s: &Shape| s.sides)
        .unwrap();

    let err = vm.new_instance(&shape, (3,)).unwrap_err();
    assert!(matches!(err, Error::ArityMismatch { .. }));

    let square = root
        .add_class_with(
            "Square",
            |size: i64| Square {
                shape: Shape { sides: 4 },
                size,
            },
            ClassOptions::<Square>::new().inherit::<Shape>(&shape),
        )
        .unwrap();
    let sq = vm.new_instance(&square, (2,)).unwrap();
    assert_eq!(vm.call_method::<_, i64>(&sq, "sides", ()).unwrap(), 4);
}

#[test]
fn test_instance_handle_refcount() {
    let vm = Vm::new();
    let root = vm.root().unwrap();
    let class = root.add_default_class::<Vec<i64>>("List").unwrap();
    class
        .add_method::<Vec<i64>, _, _>("push", |v: &mut Vec<i64>, x: i64| v.push(x))
        .unwrap();
    class
        .add_method::<Vec<i64>, _, _>("len", |v: &Vec<i64>| v.len())
        .unwrap();

    let list = vm.new_instance(&class, ()).unwrap();
    assert_eq!(list.ref_count(), 1);
    let copy = list.clone();
    assert_eq!(list.ref_count(), 2);
    drop(copy);
    assert_eq!(list.ref_count(), 1);

    for x in 0..3 {
        vm.call_method::<_, ()>(&list, "push", (x,)).unwrap();
    }
    assert_eq!(vm.call_method::<_, usize>(&list, "len", ()).unwrap(), 3);
    assert_eq!(*list.host::<Vec<i64>>().unwrap().borrow(), vec![0, 1, 2]);
    assert_eq!(list.class().unwrap(), class);
    assert_eq!(
        Object::from(list.clone()).kind().unwrap(),
        squire::ValueType::Instance
    );
}
