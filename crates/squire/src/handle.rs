//! Reference counted value handles
//!
//! An [`Object`] owns exactly one strong reference on the VM value it holds.
//! Cloning takes another reference, dropping gives it back, and moving
//! leaves the count alone. Handles only keep a weak link to their VM: once
//! the VM is destroyed, dropping a handle does nothing and every operation
//! fails.
//!
//! The typed handles ([`Table`], [`Array`], [`Function`], [`Class`],
//! [`Instance`], [`UserData`]) wrap an `Object` whose kind was checked when
//! the handle was made.

use std::fmt;

use squire_vm::{ParamKind, Value, ValueType, Vm, WeakVm};

use crate::error::{Error, Result};
use crate::marshal::{FromVm, ToVm};

/// Handle to one VM value
pub struct Object {
    raw: Value,
    vm: WeakVm,
}

impl Object {
    /// The null handle
    pub fn null() -> Self {
        Self {
            raw: Value::Null,
            vm: WeakVm::dangling(),
        }
    }

    /// Wrap `value`, taking a new strong reference on it
    pub fn from_value(vm: &Vm, value: Value) -> Self {
        vm.add_ref(value);
        Self {
            raw: value,
            vm: vm.weak(),
        }
    }

    /// Wrap `value`, taking over a reference the caller already owns
    pub fn from_owned(vm: &Vm, value: Value) -> Self {
        Self {
            raw: value,
            vm: vm.weak(),
        }
    }

    /// Wrap the value at stack `index`
    pub fn from_stack(vm: &Vm, index: isize) -> Result<Self> {
        let value = vm.get(index)?;
        Ok(Self::from_value(vm, value))
    }

    /// The underlying VM value (borrowed from this handle)
    pub fn raw(&self) -> Value {
        self.raw
    }

    /// Give up this handle's reference and return the raw value.
    ///
    /// The caller becomes responsible for releasing it.
    pub fn into_raw(self) -> Value {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    /// The VM this handle belongs to
    pub fn vm(&self) -> Result<Vm> {
        self.vm.upgrade().ok_or_else(Error::vm_gone)
    }

    /// Whether this handle belongs to `vm`
    pub fn belongs_to(&self, vm: &Vm) -> bool {
        !self.raw.is_object() || self.vm.is(vm)
    }

    /// Whether the value is null
    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    /// Dynamic type of the value
    pub fn kind(&self) -> Result<ValueType> {
        match self.raw {
            Value::Object(_) => Ok(self.vm()?.value_type(self.raw)?),
            Value::Null => Ok(ValueType::Null),
            Value::Bool(_) => Ok(ValueType::Bool),
            Value::Integer(_) => Ok(ValueType::Integer),
            Value::Float(_) => Ok(ValueType::Float),
        }
    }

    /// Current strong count on the value (0 for primitives or a dead VM)
    pub fn ref_count(&self) -> usize {
        self.vm.upgrade().map_or(0, |vm| vm.ref_count(self.raw))
    }

    /// Convert to a host value
    pub fn to<T: FromVm>(&self) -> Result<T> {
        let vm = self.vm_for_read()?;
        self.push(&vm)?;
        let value = T::from_vm(&vm, -1);
        vm.pop(1)?;
        value
    }

    /// Push the value onto `vm`'s stack
    pub fn push(&self, vm: &Vm) -> Result<()> {
        if !self.belongs_to(vm) {
            return Err(Error::Runtime(
                "value belongs to a different VM".to_string(),
            ));
        }
        vm.push(self.raw)?;
        Ok(())
    }

    /// Drop the reference and become null
    pub fn release(&mut self) {
        let old = std::mem::replace(self, Object::null());
        drop(old);
    }

    /// Primitives convert without their VM; objects need it alive.
    fn vm_for_read(&self) -> Result<Vm> {
        match self.vm.upgrade() {
            Some(vm) => Ok(vm),
            None if !self.raw.is_object() => Err(Error::Runtime(
                "primitive handle has no VM to convert through".to_string(),
            )),
            None => Err(Error::vm_gone()),
        }
    }
}

impl Clone for Object {
    fn clone(&self) -> Self {
        self.vm.add_ref(self.raw);
        Self {
            raw: self.raw,
            vm: self.vm.clone(),
        }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        if self.raw.is_object() {
            self.vm.release(self.raw);
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({:?})", self.raw)
    }
}

impl FromVm for Object {
    const KIND: ParamKind = ParamKind::Any;

    fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
        Object::from_stack(vm, index)
    }
}

impl ToVm for Object {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        self.push(vm)
    }
}

impl ToVm for &Object {
    fn to_vm(self, vm: &Vm) -> Result<()> {
        self.push(vm)
    }
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident, $kind:expr, [$($accepted:path),+]) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq)]
        pub struct $name(Object);

        impl $name {
            /// The untyped handle
            pub fn as_object(&self) -> &Object {
                &self.0
            }

            /// Convert into the untyped handle
            pub fn into_object(self) -> Object {
                self.0
            }

            /// The underlying VM value (borrowed from this handle)
            pub fn raw(&self) -> Value {
                self.0.raw()
            }

            /// Current strong count on the value
            pub fn ref_count(&self) -> usize {
                self.0.ref_count()
            }

            pub(crate) fn vm(&self) -> Result<Vm> {
                self.0.vm()
            }
        }

        impl TryFrom<Object> for $name {
            type Error = Error;

            fn try_from(object: Object) -> Result<Self> {
                let kind = object.kind()?;
                if [$($accepted),+].contains(&kind) {
                    Ok($name(object))
                } else {
                    Err(Error::type_mismatch($kind.name(), kind.name()))
                }
            }
        }

        impl From<$name> for Object {
            fn from(handle: $name) -> Object {
                handle.0
            }
        }

        impl FromVm for $name {
            const KIND: ParamKind = $kind;

            fn from_vm(vm: &Vm, index: isize) -> Result<Self> {
                Object::from_stack(vm, index)?.try_into()
            }
        }

        impl ToVm for $name {
            fn to_vm(self, vm: &Vm) -> Result<()> {
                self.0.push(vm)
            }
        }

        impl ToVm for &$name {
            fn to_vm(self, vm: &Vm) -> Result<()> {
                self.0.push(vm)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0.raw())
            }
        }
    };
}

typed_handle!(
    /// Handle to a table
    Table,
    ParamKind::Table,
    [ValueType::Table]
);

typed_handle!(
    /// Handle to an array
    Array,
    ParamKind::Array,
    [ValueType::Array]
);

typed_handle!(
    /// Handle to something callable: a closure or a class
    Function,
    ParamKind::Callable,
    [ValueType::Closure, ValueType::Class]
);

typed_handle!(
    /// Handle to a class
    Class,
    ParamKind::Class,
    [ValueType::Class]
);

typed_handle!(
    /// Handle to a class instance
    Instance,
    ParamKind::Instance,
    [ValueType::Instance]
);

typed_handle!(
    /// Handle to opaque host data
    UserData,
    ParamKind::UserData,
    [ValueType::UserData]
);

impl UserData {
    /// Wrap host data in a new VM value
    pub fn new<T: 'static>(vm: &Vm, data: T) -> Result<Self> {
        let value = vm.new_userdata(
            std::rc::Rc::new(data),
            Some(squire_vm::TypeTag::of::<T>()),
        )?;
        Ok(UserData(Object::from_owned(vm, value)))
    }

    /// Borrow the host data as `T`
    pub fn data<T: 'static>(&self) -> Result<std::rc::Rc<T>> {
        let payload = self.vm()?.userdata_payload(self.raw())?;
        payload.downcast::<T>().map_err(|_| {
            Error::type_mismatch(std::any::type_name::<T>(), "user data of another type")
        })
    }
}

impl Function {
    /// Accepted argument range, receiver excluded.
    ///
    /// A class reports its constructor's range; an unchecked closure
    /// accepts anything.
    pub fn num_params(&self) -> Result<(usize, usize)> {
        let vm = self.vm()?;
        let closure = match vm.value_type(self.raw())? {
            ValueType::Class => match vm.get_slot(self.raw(), squire_vm::defaults::CONSTRUCTOR_NAME)? {
                Some(ctor) => ctor,
                None => return Ok((0, 0)),
            },
            _ => self.raw(),
        };
        Ok(match vm.closure_params(closure)? {
            Some(check) => (check.min().saturating_sub(1), check.max().saturating_sub(1)),
            None => (0, usize::MAX),
        })
    }

    /// Name the closure was bound under
    pub fn name(&self) -> Result<String> {
        let vm = self.vm()?;
        match vm.value_type(self.raw())? {
            ValueType::Class => Ok(vm.class_name(self.raw())?),
            _ => Ok(vm.closure_name(self.raw())?),
        }
    }

    /// Call with `env` as the receiver
    pub fn call<A, R>(&self, env: &Object, args: A) -> Result<R>
    where
        A: crate::marshal::ArgList,
        R: FromVm,
    {
        crate::vm::call_value(&self.vm()?, self.as_object(), env, args)
    }
}

pub(crate) fn wrap_owned<H: TryFrom<Object, Error = Error>>(vm: &Vm, value: Value) -> Result<H> {
    Object::from_owned(vm, value).try_into()
}
