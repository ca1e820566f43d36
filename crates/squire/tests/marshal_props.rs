//! Property tests for value conversion and argument substitution

use proptest::prelude::*;

use squire::{Array, FromVm, Object, Table, ToVm, Vm, VmExt};

fn stored<T: ToVm + FromVm>(value: T) -> T {
    let vm = Vm::new();
    let table = Table::new(&vm).unwrap();
    table.set("v", value).unwrap();
    let back = table.get::<T>("v").unwrap();
    assert_eq!(vm.top(), 0);
    back
}

macro_rules! width_roundtrips {
    ($($name:ident: $ty:ty),*) => {
        proptest! {
            $(
                #[test]
                fn $name(value in any::<$ty>()) {
                    prop_assert_eq!(stored(value), value);
                }
            )*
        }

        #[test]
        fn integer_width_edges_survive_table_storage() {
            $(
                for value in [<$ty>::MIN, 0, <$ty>::MAX] {
                    assert_eq!(stored(value), value, "{}", stringify!($ty));
                }
            )*
        }
    };
}

width_roundtrips!(
    i8_roundtrip: i8,
    i16_roundtrip: i16,
    i32_roundtrip: i32,
    i64_roundtrip: i64,
    isize_roundtrip: isize,
    u8_roundtrip: u8,
    u16_roundtrip: u16,
    u32_roundtrip: u32,
    u64_roundtrip: u64,
    usize_roundtrip: usize
);

proptest! {
    #[test]
    fn narrowing_never_truncates(value in any::<i64>()) {
        let vm = Vm::new();
        let table = Table::new(&vm).unwrap();
        table.set("v", value).unwrap();
        match table.get::<i32>("v") {
            Ok(narrow) => prop_assert_eq!(i64::from(narrow), value),
            Err(_) => prop_assert!(i32::try_from(value).is_err()),
        }
    }

    #[test]
    fn floats_survive_table_storage(value in any::<f64>().prop_filter("nan", |f| !f.is_nan())) {
        prop_assert_eq!(stored(value), value);
    }

    #[test]
    fn f32_survives_widening(value in any::<f32>().prop_filter("nan", |f| !f.is_nan())) {
        prop_assert_eq!(stored(value), value);
    }

    #[test]
    fn bools_survive_table_storage(value in any::<bool>()) {
        prop_assert_eq!(stored(value), value);
    }

    #[test]
    fn strings_survive_table_storage(value in ".*") {
        let vm = Vm::new();
        let table = Table::new(&vm).unwrap();
        table.set("s", value.as_str()).unwrap();
        prop_assert_eq!(table.get::<String>("s").unwrap(), value);
    }

    #[test]
    fn arrays_preserve_order(values in prop::collection::vec(any::<i32>(), 0..32)) {
        let vm = Vm::new();
        let array = Array::from_vec(&vm, values.clone()).unwrap();
        prop_assert_eq!(array.len().unwrap(), values.len());
        prop_assert_eq!(array.to_vec::<i32>().unwrap(), values);
    }

    #[test]
    fn defaults_fill_from_the_right(a in any::<i32>(), b in proptest::option::of(any::<i32>())) {
        let vm = Vm::new();
        let f = vm
            .root()
            .unwrap()
            .add_function_with_defaults(
                "pair",
                |a: i64, b: i64| a.wrapping_mul(31).wrapping_add(b),
                (-7,),
            )
            .unwrap();
        let got: i64 = match b {
            Some(b) => vm.call_func(&f, &Object::null(), (a, b)).unwrap(),
            None => vm.call_func(&f, &Object::null(), (a,)).unwrap(),
        };
        let expected = i64::from(a).wrapping_mul(31).wrapping_add(i64::from(b.unwrap_or(-7)));
        prop_assert_eq!(got, expected);
    }
}
