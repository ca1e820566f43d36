//! Binding host callables as VM closures
//!
//! Every bound callable becomes a native closure with:
//! - a [`ParamsCheck`](squire_vm::ParamsCheck) built from its [`Signature`],
//!   so the VM rejects bad calls before any host code runs
//! - its default arguments (if any) as the single free variable
//! - a thunk that reads the arguments, calls the host code and pushes the
//!   result
//!
//! # Stack layout inside a call
//!
//! ```text
//! slot 1                  receiver (`this`)
//! slot 2 ..= 1 + supplied arguments the caller passed
//! next                    default argument store (free variable)
//! next ..                 defaults pushed for the omitted parameters
//! ```
//!
//! Parameter `i` lives at [`FIRST_ARG_SLOT`]` + i` when supplied, and in the
//! pushed defaults otherwise. A `&Vm` parameter is passed directly and
//! never occupies a slot.
//!
//! Host errors and panics never cross into the VM: the thunk turns them
//! into a VM error carrying the message.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use squire_vm::{NativeFn, ParamKind, Vm};

use crate::class;
use crate::defaults::DefaultSet;
use crate::error::{Error, Result};
use crate::handle::{wrap_owned, Function};
use crate::marshal::{ArgList, FromVm, ReturnValue};
use crate::signature::Signature;

/// Stack slot of the receiver
pub const RECEIVER_SLOT: isize = 1;

/// Stack slot of the first host argument
pub const FIRST_ARG_SLOT: isize = 2;

/// Where each parameter of the running call is read from
#[derive(Debug, Clone, Copy)]
pub struct ArgSlots {
    supplied: usize,
    first_default: isize,
}

impl ArgSlots {
    /// Work out the argument slots for a callable of `total` parameters,
    /// pushing the defaults for omitted trailing parameters.
    pub(crate) fn prepare(vm: &Vm, total: usize) -> Result<Self> {
        let supplied = vm.arg_count().saturating_sub(1);
        if supplied > total {
            return Err(Error::ArityMismatch {
                min: 0,
                max: total,
                got: supplied,
            });
        }
        let omitted = total - supplied;
        if omitted > 0 {
            let set = DefaultSet::of_frame(vm).map_err(|_| Error::ArityMismatch {
                min: total,
                max: total,
                got: supplied,
            })?;
            let values = set.tail(omitted).ok_or(Error::ArityMismatch {
                min: total - set.len(),
                max: total,
                got: supplied,
            })?;
            for value in values {
                vm.push(*value)?;
            }
        }
        Ok(Self {
            supplied,
            first_default: (vm.top() - omitted) as isize + 1,
        })
    }

    /// Stack slot of parameter `index`
    pub fn slot(&self, index: usize) -> isize {
        if index < self.supplied {
            FIRST_ARG_SLOT + index as isize
        } else {
            self.first_default + (index - self.supplied) as isize
        }
    }

    /// Number of arguments the caller supplied
    pub fn supplied(&self) -> usize {
        self.supplied
    }
}

/// A host callable that can be bound as a free function.
///
/// Implemented for closures and function items of up to eight parameters,
/// each of which implements [`FromVm`], optionally preceded by `&Vm`. The
/// return type implements [`ReturnValue`].
pub trait HostFunction<Marker>: 'static {
    /// Kinds of the host parameters
    fn param_kinds() -> Vec<ParamKind>;

    /// Read the arguments, run, and push the result
    fn invoke(&self, vm: &Vm, slots: &ArgSlots) -> Result<usize>;
}

/// A host callable that can be bound as a method of `T`.
///
/// The first parameter is the receiver, as `&T` or `&mut T`, optionally
/// preceded by `&Vm`.
pub trait HostMethod<T, Marker>: 'static {
    /// Kinds of the host parameters (receiver excluded)
    fn param_kinds() -> Vec<ParamKind>;

    /// Resolve the receiver, read the arguments, run, and push the result
    fn invoke(&self, vm: &Vm, slots: &ArgSlots) -> Result<usize>;
}

/// A host callable that builds a new `T` from constructor arguments.
pub trait Allocator<T, Marker>: 'static {
    /// Kinds of the constructor parameters
    fn param_kinds() -> Vec<ParamKind>;

    /// Read the arguments and build the host object
    fn allocate(&self, vm: &Vm, slots: &ArgSlots) -> Result<T>;
}

// Markers telling the callable shapes apart during impl selection.
#[doc(hidden)]
pub struct Plain;
#[doc(hidden)]
pub struct WithVm;
#[doc(hidden)]
pub struct ByRef;
#[doc(hidden)]
pub struct ByMut;

macro_rules! impl_host_callables {
    ($($A:ident $a:ident),*) => {
        impl<F, R, $($A,)*> HostFunction<(Plain, fn($($A,)*) -> R)> for F
        where
            F: Fn($($A,)*) -> R + 'static,
            R: ReturnValue,
            $($A: FromVm,)*
        {
            fn param_kinds() -> Vec<ParamKind> {
                vec![$($A::KIND),*]
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn invoke(&self, vm: &Vm, slots: &ArgSlots) -> Result<usize> {
                let mut index = 0;
                $(let $a = $A::from_vm(vm, slots.slot(index))?; index += 1;)*
                (self)($($a,)*).push_result(vm)
            }
        }

        impl<F, R, $($A,)*> HostFunction<(WithVm, fn($($A,)*) -> R)> for F
        where
            F: Fn(&Vm, $($A,)*) -> R + 'static,
            R: ReturnValue,
            $($A: FromVm,)*
        {
            fn param_kinds() -> Vec<ParamKind> {
                vec![$($A::KIND),*]
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn invoke(&self, vm: &Vm, slots: &ArgSlots) -> Result<usize> {
                let mut index = 0;
                $(let $a = $A::from_vm(vm, slots.slot(index))?; index += 1;)*
                (self)(vm, $($a,)*).push_result(vm)
            }
        }

        impl<F, T, R, $($A,)*> HostMethod<T, (ByRef, fn($($A,)*) -> R)> for F
        where
            F: Fn(&T, $($A,)*) -> R + 'static,
            T: 'static,
            R: ReturnValue,
            $($A: FromVm,)*
        {
            fn param_kinds() -> Vec<ParamKind> {
                vec![$($A::KIND),*]
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn invoke(&self, vm: &Vm, slots: &ArgSlots) -> Result<usize> {
                let mut index = 0;
                $(let $a = $A::from_vm(vm, slots.slot(index))?; index += 1;)*
                let this = vm.get(RECEIVER_SLOT)?;
                class::with_host::<T, _>(vm, this, |receiver| (self)(receiver, $($a,)*))?
                    .push_result(vm)
            }
        }

        impl<F, T, R, $($A,)*> HostMethod<T, (ByMut, fn($($A,)*) -> R)> for F
        where
            F: Fn(&mut T, $($A,)*) -> R + 'static,
            T: 'static,
            R: ReturnValue,
            $($A: FromVm,)*
        {
            fn param_kinds() -> Vec<ParamKind> {
                vec![$($A::KIND),*]
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn invoke(&self, vm: &Vm, slots: &ArgSlots) -> Result<usize> {
                let mut index = 0;
                $(let $a = $A::from_vm(vm, slots.slot(index))?; index += 1;)*
                let this = vm.get(RECEIVER_SLOT)?;
                class::with_host_mut::<T, _>(vm, this, |receiver| (self)(receiver, $($a,)*))?
                    .push_result(vm)
            }
        }

        impl<F, T, R, $($A,)*> HostMethod<T, (WithVm, fn($($A,)*) -> R)> for F
        where
            F: Fn(&Vm, &mut T, $($A,)*) -> R + 'static,
            T: 'static,
            R: ReturnValue,
            $($A: FromVm,)*
        {
            fn param_kinds() -> Vec<ParamKind> {
                vec![$($A::KIND),*]
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn invoke(&self, vm: &Vm, slots: &ArgSlots) -> Result<usize> {
                let mut index = 0;
                $(let $a = $A::from_vm(vm, slots.slot(index))?; index += 1;)*
                let this = vm.get(RECEIVER_SLOT)?;
                class::with_host_mut::<T, _>(vm, this, |receiver| (self)(vm, receiver, $($a,)*))?
                    .push_result(vm)
            }
        }

        impl<F, T, $($A,)*> Allocator<T, (Plain, fn($($A,)*))> for F
        where
            F: Fn($($A,)*) -> T + 'static,
            $($A: FromVm,)*
        {
            fn param_kinds() -> Vec<ParamKind> {
                vec![$($A::KIND),*]
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn allocate(&self, vm: &Vm, slots: &ArgSlots) -> Result<T> {
                let mut index = 0;
                $(let $a = $A::from_vm(vm, slots.slot(index))?; index += 1;)*
                Ok((self)($($a,)*))
            }
        }

        impl<F, T, $($A,)*> Allocator<T, (WithVm, fn($($A,)*))> for F
        where
            F: Fn(&Vm, $($A,)*) -> T + 'static,
            $($A: FromVm,)*
        {
            fn param_kinds() -> Vec<ParamKind> {
                vec![$($A::KIND),*]
            }

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn allocate(&self, vm: &Vm, slots: &ArgSlots) -> Result<T> {
                let mut index = 0;
                $(let $a = $A::from_vm(vm, slots.slot(index))?; index += 1;)*
                Ok((self)(vm, $($a,)*))
            }
        }
    };
}

impl_host_callables!();
impl_host_callables!(A1 a1);
impl_host_callables!(A1 a1, A2 a2);
impl_host_callables!(A1 a1, A2 a2, A3 a3);
impl_host_callables!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_host_callables!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_host_callables!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_host_callables!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_host_callables!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

/// Extract a message from a panic payload
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Wrap a host body into a VM entry point.
///
/// `total` is the number of host parameters, used to locate defaults.
pub(crate) fn make_thunk<B>(name: &str, total: usize, body: B) -> NativeFn
where
    B: Fn(&Vm, &ArgSlots) -> Result<usize> + 'static,
{
    let name = name.to_string();
    Rc::new(move |vm: &Vm| {
        tracing::trace!(function = %name, args = vm.arg_count().saturating_sub(1), "host call");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let slots = ArgSlots::prepare(vm, total)?;
            body(vm, &slots)
        }));
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(Error::Panic(panic_message(panic))),
        };
        result.map_err(|err| {
            tracing::trace!(function = %name, error = %err, "host call failed");
            vm.throw_error(format!("{}: {}", name, err))
        })
    })
}

/// Create a checked native closure for a host body.
pub(crate) fn bind<B, D>(
    vm: &Vm,
    name: &str,
    signature: Signature,
    defaults: D,
    body: B,
) -> Result<Function>
where
    B: Fn(&Vm, &ArgSlots) -> Result<usize> + 'static,
    D: ArgList,
{
    let signature = signature.with_defaults(D::LEN)?;
    let check = signature.params_check()?;
    let store = DefaultSet::store(vm, defaults)?;
    let free: Vec<_> = store.iter().map(|s| s.raw()).collect();

    let thunk = make_thunk(name, signature.total(), body);
    let closure = vm.new_closure(name, thunk, &free, Some(check))?;
    tracing::debug!(
        function = name,
        descriptor = %signature.descriptor(),
        defaults = signature.defaults(),
        "host callable bound"
    );
    wrap_owned(vm, closure)
}

/// Bind a free function
pub(crate) fn bind_function<M, F, D>(vm: &Vm, name: &str, f: F, defaults: D) -> Result<Function>
where
    F: HostFunction<M>,
    D: ArgList,
{
    let signature = Signature::function(F::param_kinds());
    bind(vm, name, signature, defaults, move |vm: &Vm, slots: &ArgSlots| {
        f.invoke(vm, slots)
    })
}

/// Bind a method of `T`
pub(crate) fn bind_method<T, M, F, D>(vm: &Vm, name: &str, f: F, defaults: D) -> Result<Function>
where
    F: HostMethod<T, M>,
    D: ArgList,
{
    let signature = Signature::method(F::param_kinds());
    bind(vm, name, signature, defaults, move |vm: &Vm, slots: &ArgSlots| {
        f.invoke(vm, slots)
    })
}
