//! Conversion between host values and VM stack slots
//!
//! [`FromVm`] reads a host value out of a stack slot and [`ToVm`] pushes one.
//! Booleans and every integer width share the VM's integer representation:
//! integer reads accept booleans, and narrowing reads that do not fit fail
//! instead of truncating.

use std::fmt::Display;

use squire_vm::{ParamKind, Value, ValueType, Vm};

use crate::error::{Error, Result};

/// Read a host value from a VM stack slot.
pub trait FromVm: Sized {
    /// Parameter kind checked by the VM before a bound callable runs
    const KIND: ParamKind;

    /// Read the value at stack `index`
    fn from_vm(vm: &Vm, index: isize) -> Result<Self>;
}

/// Push a host value onto the VM stack.
pub trait ToVm {
    /// Push exactly one value
    fn to_vm(self, vm: &Vm) -> Result<()>;
}

fn mismatch(vm: &Vm, expected: &str, value: Value) -> Error {
    let got = vm.value_type(value).map_or("unknown", ValueType::name);
    Error::type_mismatch(expected, got)
}

// ============================================================================
// Primitives
// ============================================================================

macro_rules! impl_integer {
    ($($ty:ty),*) => {$(
        impl FromVm for $ty {
            const KIND: ParamKind = ParamKind::Integer;

            fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
                let wide = read_integer(vm, index, stringify!($ty))?;
                <$ty>::try_from(wide).map_err(|_| {
                    Error::type_mismatch(stringify!($ty), format!("integer {} out of range", wide))
                })
            }
        }

        impl ToVm for $ty {
            fn to_vm(self, vm: &Vm) -> Result<()> {
                let wide = i64::try_from(self).map_err(|_| {
                    Error::type_mismatch("integer", format!("{} {} out of range", stringify!($ty), self))
                })?;
                vm.push_integer(wide)?;
                Ok(())
            }
        }
    )*};
}

// Full-width unsigned values travel as the same 64 bits, so values above
// `i64::MAX` show up as negative integers inside the VM.
macro_rules! impl_unsigned_bits {
    ($($ty:ty),*) => {$(
        impl FromVm for $ty {
            const KIND: ParamKind = ParamKind::Integer;

            fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
                let bits = read_integer(vm, index, stringify!($ty))? as u64;
                <$ty>::try_from(bits).map_err(|_| {
                    Error::type_mismatch(stringify!($ty), format!("integer {} out of range", bits))
                })
            }
        }

        impl ToVm for $ty {
            fn to_vm(self, vm: &Vm) -> Result<()> {
                vm.push_integer(self as u64 as i64)?;
                Ok(())
            }
        }
    )*};
}

fn read_integer(vm: &Vm, index: isize, expected: &str) -> Result<i64> {
    match vm.get(index)? {
        Value::Integer(i) => Ok(i),
        Value::Bool(b) => Ok(i64::from(b)),
        other => Err(mismatch(vm, expected, other)),
    }
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32);
impl_unsigned_bits!(u64, usize);

impl FromVm for bool {
    const KIND: ParamKind = ParamKind::Bool;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        match vm.get(index)? {
            Value::Bool(b) => Ok(b),
            Value::Integer(i) => Ok(i != 0),
            other => Err(mismatch(vm, "bool", other)),
        }
    }
}

impl ToVm for bool {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        vm.push_bool(self)?;
        Ok(())
    }
}

impl FromVm for f64 {
    const KIND: ParamKind = ParamKind::Float;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        match vm.get(index)? {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => Err(mismatch(vm, "float", other)),
        }
    }
}

impl ToVm for f64 {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        vm.push_float(self)?;
        Ok(())
    }
}

impl FromVm for f32 {
    const KIND: ParamKind = ParamKind::Float;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        f64::from_vm(vm, index).map(|f| f as f32)
    }
}

impl ToVm for f32 {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        vm.push_float(f64::from(self))?;
        Ok(())
    }
}

impl FromVm for String {
    const KIND: ParamKind = ParamKind::String;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        let value = vm.get(index)?;
        match vm.value_type(value)? {
            ValueType::String => Ok(vm.read_string(value)?),
            other => Err(Error::type_mismatch("string", other.name())),
        }
    }
}

impl ToVm for String {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        vm.push_string(&self)?;
        Ok(())
    }
}

impl ToVm for &str {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        vm.push_string(self)?;
        Ok(())
    }
}

impl ToVm for &String {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        vm.push_string(self)?;
        Ok(())
    }
}

impl FromVm for char {
    const KIND: ParamKind = ParamKind::String;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        let s = String::from_vm(vm, index)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(Error::type_mismatch(
                "char",
                format!("string of {} characters", s.chars().count()),
            )),
        }
    }
}

impl ToVm for char {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        let mut buf = [0u8; 4];
        vm.push_string(self.encode_utf8(&mut buf))?;
        Ok(())
    }
}

/// The VM's null value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Null;

impl FromVm for Null {
    const KIND: ParamKind = ParamKind::Null;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        match vm.get(index)? {
            Value::Null => Ok(Null),
            other => Err(mismatch(vm, "null", other)),
        }
    }
}

impl ToVm for Null {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        vm.push_null()?;
        Ok(())
    }
}

/// Discards the slot; used as the result type of calls whose value is not
/// needed.
impl FromVm for () {
    const KIND: ParamKind = ParamKind::Any;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        vm.get(index)?;
        Ok(())
    }
}

impl<T: FromVm> FromVm for Option<T> {
    const KIND: ParamKind = ParamKind::Any;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        match vm.get(index)? {
            Value::Null => Ok(None),
            _ => T::from_vm(vm, index).map(Some),
        }
    }
}

impl<T: ToVm> ToVm for Option<T> {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        match self {
            Some(value) => value.to_vm(vm),
            None => {
                vm.push_null()?;
                Ok(())
            }
        }
    }
}

// ============================================================================
// Arrays
// ============================================================================

impl<T: FromVm> FromVm for Vec<T> {
    const KIND: ParamKind = ParamKind::Array;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        let array = vm.get(index)?;
        match vm.value_type(array)? {
            ValueType::Array => {}
            other => return Err(Error::type_mismatch("array", other.name())),
        }
        let len = vm.array_len(array)?;
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            vm.push(vm.array_get(array, i)?)?;
            let item = T::from_vm(vm, -1);
            vm.pop(1)?;
            out.push(item?);
        }
        Ok(out)
    }
}

impl<T: ToVm> ToVm for Vec<T> {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        let array = vm.new_array()?;
        vm.push_owned(array)?;
        for item in self {
            item.to_vm(vm)?;
            let value = vm.get(-1)?;
            let pushed = vm.array_push(array, value);
            vm.pop(1)?;
            pushed?;
        }
        Ok(())
    }
}

/// Convert `value` and hand the resulting VM value (borrowed from a
/// temporary stack slot) to `f`.
pub(crate) fn with_value<V: ToVm, R>(
    vm: &Vm,
    value: V,
    f: impl FnOnce(Value) -> Result<R>,
) -> Result<R> {
    let base = vm.top();
    if let Err(err) = value.to_vm(vm) {
        vm.set_top(base)?;
        return Err(err);
    }
    let result = vm.get(-1).map_err(Error::from).and_then(f);
    vm.set_top(base)?;
    result
}

// ============================================================================
// Results
// ============================================================================

/// The "results already pushed" convention.
///
/// A bound callable returning `Pushed(n)` has manipulated the stack itself
/// and left `n` results on top; nothing further is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pushed(pub usize);

/// Turn a host return value into VM results.
pub trait ReturnValue {
    /// Push the results and report how many there are
    fn push_result(self, vm: &Vm) -> Result<usize>;
}

impl ReturnValue for () {
    fn push_result(self, _vm: &Vm) -> Result<usize> {
        Ok(0)
    }
}

impl ReturnValue for Pushed {
    fn push_result(self, _vm: &Vm) -> Result<usize> {
        Ok(self.0)
    }
}

impl<T: ToVm> ReturnValue for T {
    fn push_result(self, vm: &Vm) -> Result<usize> {
        self.to_vm(vm)?;
        Ok(1)
    }
}

impl<R: ReturnValue, E: Display> ReturnValue for std::result::Result<R, E> {
    fn push_result(self, vm: &Vm) -> Result<usize> {
        match self {
            Ok(value) => value.push_result(vm),
            Err(err) => Err(Error::Runtime(err.to_string())),
        }
    }
}

// ============================================================================
// Argument lists
// ============================================================================

/// A fixed list of host values pushed in order: call arguments and default
/// argument sets.
pub trait ArgList {
    /// Number of values
    const LEN: usize;

    /// Push every value, first to last
    fn push_all(self, vm: &Vm) -> Result<()>;
}

impl ArgList for () {
    const LEN: usize = 0;

    fn push_all(self, _vm: &Vm) -> Result<()> {
        Ok(())
    }
}

macro_rules! impl_arg_list {
    ($len:expr; $($T:ident $v:ident),+) => {
        impl<$($T: ToVm),+> ArgList for ($($T,)+) {
            const LEN: usize = $len;

            fn push_all(self, vm: &Vm) -> Result<()> {
                let ($($v,)+) = self;
                $($v.to_vm(vm)?;)+
                Ok(())
            }
        }
    };
}

impl_arg_list!(1; A a);
impl_arg_list!(2; A a, B b);
impl_arg_list!(3; A a, B b, C c);
impl_arg_list!(4; A a, B b, C c, D d);
impl_arg_list!(5; A a, B b, C c, D d, E e);
impl_arg_list!(6; A a, B b, C c, D d, E e, F f);
impl_arg_list!(7; A a, B b, C c, D d, E e, F f, G g);
impl_arg_list!(8; A a, B b, C c, D d, E e, F f, G g, H h);

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: ToVm + FromVm>(vm: &Vm, value: T) -> Result<T> {
        value.to_vm(vm)?;
        let back = T::from_vm(vm, -1);
        vm.pop(1)?;
        back
    }

    #[test]
    fn test_integer_accepts_bool() {
        let vm = Vm::new();
        vm.push_bool(true).unwrap();
        assert_eq!(i32::from_vm(&vm, -1).unwrap(), 1);
        assert!(bool::from_vm(&vm, -1).unwrap());
    }

    #[test]
    fn test_narrowing_out_of_range() {
        let vm = Vm::new();
        vm.push_integer(300).unwrap();
        assert!(matches!(u8::from_vm(&vm, -1), Err(Error::TypeMismatch { .. })));
        vm.push_integer(-1).unwrap();
        assert!(u32::from_vm(&vm, -1).is_err());
        vm.push_integer(i64::MAX).unwrap();
        assert!(i32::from_vm(&vm, -1).is_err());
        assert!(u32::from_vm(&vm, -1).is_err());
    }

    #[test]
    fn test_full_width_unsigned_keeps_bits() {
        let vm = Vm::new();
        assert_eq!(roundtrip(&vm, u64::MAX).unwrap(), u64::MAX);
        assert_eq!(roundtrip(&vm, usize::MAX).unwrap(), usize::MAX);
        assert_eq!(roundtrip(&vm, 1u64 << 63).unwrap(), 1u64 << 63);
        u64::MAX.to_vm(&vm).unwrap();
        assert_eq!(vm.get(-1).unwrap(), Value::Integer(-1));
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn test_float_accepts_integer() {
        let vm = Vm::new();
        vm.push_integer(3).unwrap();
        assert_eq!(f64::from_vm(&vm, -1).unwrap(), 3.0);
        vm.push_float(1.5).unwrap();
        assert!(matches!(i64::from_vm(&vm, -1), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_string_and_char() {
        let vm = Vm::new();
        assert_eq!(roundtrip(&vm, String::from("héllo")).unwrap(), "héllo");
        assert_eq!(roundtrip(&vm, 'ß').unwrap(), 'ß');
        "ab".to_vm(&vm).unwrap();
        assert!(char::from_vm(&vm, -1).is_err());
        vm.push_integer(1).unwrap();
        assert!(matches!(
            String::from_vm(&vm, -1),
            Err(Error::TypeMismatch { ref expected, .. }) if expected == "string"
        ));
    }

    #[test]
    fn test_option_and_null() {
        let vm = Vm::new();
        assert_eq!(roundtrip(&vm, None::<i64>).unwrap(), None);
        assert_eq!(roundtrip(&vm, Some(4i64)).unwrap(), Some(4));
        assert_eq!(roundtrip(&vm, Null).unwrap(), Null);
    }

    #[test]
    fn test_vec_preserves_order() {
        let vm = Vm::new();
        let values = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(roundtrip(&vm, values.clone()).unwrap(), values);

        let nested = vec![vec![1i32], vec![], vec![2, 3]];
        assert_eq!(roundtrip(&vm, nested.clone()).unwrap(), nested);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_return_values() {
        let vm = Vm::new();
        assert_eq!(().push_result(&vm).unwrap(), 0);
        assert_eq!(7i32.push_result(&vm).unwrap(), 1);
        assert_eq!(Pushed(2).push_result(&vm).unwrap(), 2);
        let failed: std::result::Result<i32, String> = Err("nope".to_string());
        assert_eq!(failed.push_result(&vm), Err(Error::Runtime("nope".to_string())));
    }

    #[test]
    fn test_arg_list_push_order() {
        let vm = Vm::new();
        (1i32, "two", 3.0f64).push_all(&vm).unwrap();
        assert_eq!(<(i32, &str, f64) as ArgList>::LEN, 3);
        assert_eq!(i32::from_vm(&vm, 1).unwrap(), 1);
        assert_eq!(String::from_vm(&vm, 2).unwrap(), "two");
        assert_eq!(f64::from_vm(&vm, 3).unwrap(), 3.0);
    }
}
