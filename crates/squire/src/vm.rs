//! Host-facing operations on a VM
//!
//! [`VmExt`] adds the binding layer's entry points to the runtime's
//! [`Vm`]: the root table, the type registry, and calls into the VM with
//! typed arguments and results.

use std::cell::RefCell;
use std::rc::Rc;

use squire_vm::{TypeTag, Vm};

use crate::class;
use crate::error::{Error, Result};
use crate::handle::{wrap_owned, Class, Function, Instance, Object, Table};
use crate::marshal::{ArgList, FromVm};
use crate::registry::TypeRegistry;
use crate::table::Enum;

/// Push `callee`, `env` and `args`, call, and convert the single result.
///
/// The stack is left as it was found, whether the call succeeds or not.
pub(crate) fn call_value<A, R>(vm: &Vm, callee: &Object, env: &Object, args: A) -> Result<R>
where
    A: ArgList,
    R: FromVm,
{
    let base = vm.top();
    let pushed = callee
        .push(vm)
        .and_then(|()| env.push(vm))
        .and_then(|()| args.push_all(vm));
    if let Err(err) = pushed {
        vm.set_top(base)?;
        return Err(err);
    }
    if let Err(err) = vm.call(A::LEN + 1) {
        vm.set_top(base)?;
        return Err(err.into());
    }
    let result = R::from_vm(vm, -1);
    vm.set_top(base)?;
    result
}

/// Binding-layer operations on a [`Vm`]
pub trait VmExt {
    /// The root table
    fn root(&self) -> Result<Table>;

    /// The VM's type tag registry
    fn type_registry(&self) -> Result<Rc<TypeRegistry>>;

    /// Add a group of named constants to the root table
    fn add_enum(&self, name: &str) -> Result<Enum>;

    /// Call `function` with `env` as its receiver
    fn call_func<A: ArgList, R: FromVm>(&self, function: &Function, env: &Object, args: A) -> Result<R>;

    /// Call the member `name` of `instance` with the instance as receiver
    fn call_method<A: ArgList, R: FromVm>(&self, instance: &Instance, name: &str, args: A) -> Result<R>;

    /// Instantiate `class`, running its constructor with `args`
    fn new_instance<A: ArgList>(&self, class: &Class, args: A) -> Result<Instance>;

    /// Instantiate `class` without running its constructor
    fn new_instance_no_ctor(&self, class: &Class) -> Result<Instance>;

    /// Instantiate `class` around a host object the host keeps owning.
    ///
    /// `class` must be the class registered for `T`. The instance holds a
    /// weak link: once the host drops its last `Rc`, method calls on the
    /// instance fail.
    fn new_instance_ptr<T: 'static>(&self, class: &Class, host: &Rc<RefCell<T>>) -> Result<Instance>;
}

impl VmExt for Vm {
    fn root(&self) -> Result<Table> {
        let root = self.root_table()?;
        Object::from_value(self, root).try_into()
    }

    fn type_registry(&self) -> Result<Rc<TypeRegistry>> {
        Ok(self.extension::<TypeRegistry>()?)
    }

    fn add_enum(&self, name: &str) -> Result<Enum> {
        self.root()?.add_enum(name)
    }

    fn call_func<A: ArgList, R: FromVm>(&self, function: &Function, env: &Object, args: A) -> Result<R> {
        call_value(self, function.as_object(), env, args)
    }

    fn call_method<A: ArgList, R: FromVm>(&self, instance: &Instance, name: &str, args: A) -> Result<R> {
        let member = self
            .get_slot(instance.raw(), name)?
            .ok_or_else(|| Error::NotFound(format!("method '{}'", name)))?;
        let method: Function = Object::from_value(self, member).try_into()?;
        call_value(self, method.as_object(), instance.as_object(), args)
    }

    fn new_instance<A: ArgList>(&self, class: &Class, args: A) -> Result<Instance> {
        call_value(self, class.as_object(), &Object::null(), args)
    }

    fn new_instance_no_ctor(&self, class: &Class) -> Result<Instance> {
        wrap_owned(self, self.create_instance(class.raw())?)
    }

    fn new_instance_ptr<T: 'static>(&self, class: &Class, host: &Rc<RefCell<T>>) -> Result<Instance> {
        let expected = TypeTag::of::<T>();
        let tag = self.type_tag(class.raw())?;
        if tag != Some(expected) {
            return Err(Error::type_mismatch(
                expected.name(),
                tag.map_or("an untagged class", |t| t.name()),
            ));
        }
        let instance: Instance = wrap_owned(self, self.create_instance(class.raw())?)?;
        class::attach_borrowed(self, instance.raw(), host)?;
        tracing::trace!(ty = expected.name(), "host object attached");
        Ok(instance)
    }
}
