//! Host classes
//!
//! Registering a host type `T` creates a VM class tagged with `T`'s
//! [`TypeTag`], records it in the VM's [`TypeRegistry`](crate::TypeRegistry)
//! and installs a constructor that builds a `T` from the call arguments and
//! attaches it to the new instance.
//!
//! Instances carry their host object behind a host slot. Under
//! [`Ownership::Owned`] the slot holds the only strong reference and the
//! object is dropped exactly once, when the VM frees the instance. Under
//! [`Ownership::Borrowed`] the slot holds a weak link and the host keeps
//! the object alive: objects built by a VM-side constructor are handed to
//! the sink given to [`ClassOptions::borrowed`].
//!
//! Members of a base class are copied into a derived class when the derived
//! class is registered, so a base must be complete before anything
//! inherits from it.

use std::any::{type_name, Any};
use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use squire_vm::defaults::CONSTRUCTOR_NAME;
use squire_vm::{Payload, TypeTag, Value, Vm};

use crate::error::{Error, Result};
use crate::function::{self, Allocator, ArgSlots, HostFunction, HostMethod, RECEIVER_SLOT};
use crate::handle::{wrap_owned, Class, Function, Instance, Object, Table};
use crate::marshal::{with_value, ArgList, FromVm, ToVm};
use crate::registry::BaseLink;
use crate::signature::Signature;
use crate::vm::VmExt;

/// Who is responsible for dropping a bound host object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    /// The VM drops the host object when the instance is freed
    #[default]
    Owned,
    /// The host keeps the object; the VM never drops it
    Borrowed,
}

/// Declares that `Self` embeds a `B` and may be used wherever `B` is
/// expected.
pub trait Inherits<B: 'static>: 'static {
    /// The embedded base
    fn as_base(&self) -> &B;

    /// The embedded base, mutably
    fn as_base_mut(&mut self) -> &mut B;
}

fn upcast_ref<D: Inherits<B>, B: 'static>(object: &dyn Any) -> Option<&dyn Any> {
    object.downcast_ref::<D>().map(|d| d.as_base() as &dyn Any)
}

fn upcast_mut<D: Inherits<B>, B: 'static>(object: &mut dyn Any) -> Option<&mut dyn Any> {
    object.downcast_mut::<D>().map(|d| d.as_base_mut() as &mut dyn Any)
}

/// A registered class to inherit from, with the upcast from the derived
/// host type
#[derive(Debug, Clone)]
pub struct BaseClass {
    class: Class,
    link: BaseLink,
}

/// Inherit from `base`, the class registered for `B`
pub fn inherit<T: Inherits<B>, B: 'static>(base: &Class) -> BaseClass {
    BaseClass {
        class: base.clone(),
        link: BaseLink {
            tag: TypeTag::of::<B>(),
            upcast_ref: upcast_ref::<T, B>,
            upcast_mut: upcast_mut::<T, B>,
        },
    }
}

/// Receives host objects built by the constructor of a borrowed class
pub type HostSink<T> = Rc<dyn Fn(Rc<RefCell<T>>)>;

/// Registration options for a class bound to `T`
pub struct ClassOptions<T, D = ()> {
    defaults: D,
    ownership: Ownership,
    sink: Option<HostSink<T>>,
    base: Option<BaseClass>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ClassOptions<T, ()> {
    /// Owned, no defaults, no base
    pub fn new() -> Self {
        Self {
            defaults: (),
            ownership: Ownership::Owned,
            sink: None,
            base: None,
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> Default for ClassOptions<T, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, D: ArgList> ClassOptions<T, D> {
    /// Defaults for the trailing constructor parameters
    pub fn defaults<E: ArgList>(self, defaults: E) -> ClassOptions<T, E> {
        ClassOptions {
            defaults,
            ownership: self.ownership,
            sink: self.sink,
            base: self.base,
            _marker: PhantomData,
        }
    }

    /// Set the ownership policy
    pub fn ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    /// Borrowed ownership, handing every object the constructor builds to
    /// `sink`. The instance only links to it weakly.
    ///
    /// Without a sink a borrowed class can only get instances through
    /// [`VmExt::new_instance_ptr`].
    pub fn borrowed(mut self, sink: impl Fn(Rc<RefCell<T>>) + 'static) -> Self {
        self.ownership = Ownership::Borrowed;
        self.sink = Some(Rc::new(sink));
        self
    }

    /// Inherit from `base`, the class registered for `B`
    pub fn inherit<B: 'static>(mut self, base: &Class) -> Self
    where
        T: Inherits<B>,
    {
        self.base = Some(inherit::<T, B>(base));
        self
    }
}

// ============================================================================
// Host slots
// ============================================================================

enum HostLink {
    Strong(Rc<dyn Any>),
    Weak(Weak<dyn Any>),
}

impl HostLink {
    fn upgrade(&self) -> Option<Rc<dyn Any>> {
        match self {
            HostLink::Strong(rc) => Some(rc.clone()),
            HostLink::Weak(weak) => weak.upgrade(),
        }
    }
}

type BorrowRef = for<'a> fn(&'a dyn Any) -> Result<Ref<'a, dyn Any>>;
type BorrowMut = for<'a> fn(&'a dyn Any) -> Result<RefMut<'a, dyn Any>>;

/// Host object attached to an instance, as `Rc<RefCell<D>>` with `D` erased
struct HostSlot {
    tag: TypeTag,
    link: HostLink,
    borrow_ref: BorrowRef,
    borrow_mut: BorrowMut,
}

fn foreign<D>() -> Error {
    Error::type_mismatch(type_name::<D>(), "host object of another type")
}

fn borrow_ref<D: 'static>(object: &dyn Any) -> Result<Ref<'_, dyn Any>> {
    let cell = object.downcast_ref::<RefCell<D>>().ok_or_else(foreign::<D>)?;
    let guard = cell
        .try_borrow()
        .map_err(|_| Error::Runtime(format!("{} is mutably borrowed", type_name::<D>())))?;
    Ok(Ref::map(guard, |d| d as &dyn Any))
}

fn borrow_mut<D: 'static>(object: &dyn Any) -> Result<RefMut<'_, dyn Any>> {
    let cell = object.downcast_ref::<RefCell<D>>().ok_or_else(foreign::<D>)?;
    let guard = cell
        .try_borrow_mut()
        .map_err(|_| Error::Runtime(format!("{} is already borrowed", type_name::<D>())))?;
    Ok(RefMut::map(guard, |d| d as &mut dyn Any))
}

fn host_slot(vm: &Vm, instance: Value) -> Result<Rc<HostSlot>> {
    let payload = vm
        .instance_payload(instance)?
        .ok_or_else(|| Error::Runtime("instance has no host object".to_string()))?;
    payload
        .downcast::<HostSlot>()
        .map_err(|_| Error::Runtime("instance payload is not a host object".to_string()))
}

fn resolve<T: 'static>(vm: &Vm, instance: Value) -> Result<(Rc<HostSlot>, Rc<dyn Any>, Vec<BaseLink>)> {
    let slot = host_slot(vm, instance)?;
    let chain = vm
        .type_registry()?
        .chain(slot.tag, TypeTag::of::<T>())
        .ok_or_else(|| Error::type_mismatch(type_name::<T>(), slot.tag.name()))?;
    let object = slot
        .link
        .upgrade()
        .ok_or_else(|| Error::Runtime(format!("{} has been dropped by the host", slot.tag.name())))?;
    Ok((slot, object, chain))
}

/// Run `f` on the host object of `instance`, viewed as `T`
pub(crate) fn with_host<T: 'static, R>(vm: &Vm, instance: Value, f: impl FnOnce(&T) -> R) -> Result<R> {
    let (slot, object, chain) = resolve::<T>(vm, instance)?;
    let guard = (slot.borrow_ref)(&*object)?;
    let mut current: &dyn Any = &*guard;
    for link in &chain {
        current = (link.upcast_ref)(current).ok_or_else(foreign::<T>)?;
    }
    let target = current.downcast_ref::<T>().ok_or_else(foreign::<T>)?;
    Ok(f(target))
}

/// Run `f` on the host object of `instance`, viewed as `&mut T`
pub(crate) fn with_host_mut<T: 'static, R>(
    vm: &Vm,
    instance: Value,
    f: impl FnOnce(&mut T) -> R,
) -> Result<R> {
    let (slot, object, chain) = resolve::<T>(vm, instance)?;
    let mut guard = (slot.borrow_mut)(&*object)?;
    let mut current: &mut dyn Any = &mut *guard;
    for link in &chain {
        current = (link.upcast_mut)(current).ok_or_else(foreign::<T>)?;
    }
    let target = current.downcast_mut::<T>().ok_or_else(foreign::<T>)?;
    Ok(f(target))
}

fn install<T: 'static>(vm: &Vm, instance: Value, link: HostLink, owned: bool) -> Result<()> {
    let slot = HostSlot {
        tag: TypeTag::of::<T>(),
        link,
        borrow_ref: borrow_ref::<T>,
        borrow_mut: borrow_mut::<T>,
    };
    let previous = vm.set_instance_payload(instance, Some(Rc::new(slot)))?;
    if owned {
        vm.set_release_hook(
            instance,
            Box::new(|payload: Option<Payload>| {
                tracing::trace!(ty = type_name::<T>(), "dropping owned host object");
                drop(payload);
            }),
        )?;
    }
    drop(previous);
    Ok(())
}

/// Attach a freshly built host object that the instance owns
pub(crate) fn attach<T: 'static>(vm: &Vm, instance: Value, host: T) -> Result<()> {
    let object: Rc<dyn Any> = Rc::new(RefCell::new(host));
    install::<T>(vm, instance, HostLink::Strong(object), true)
}

/// Attach a host-owned object to `instance` through a weak link
pub(crate) fn attach_borrowed<T: 'static>(vm: &Vm, instance: Value, host: &Rc<RefCell<T>>) -> Result<()> {
    let object: Rc<dyn Any> = host.clone();
    install::<T>(vm, instance, HostLink::Weak(Rc::downgrade(&object)), false)
}

// ============================================================================
// Registration
// ============================================================================

fn define(table: &Table, name: &str, tag: TypeTag, base: Option<&BaseClass>) -> Result<(Vm, Class)> {
    let vm = table.vm()?;
    let registry = vm.type_registry()?;
    if registry.contains(tag) {
        return Err(Error::Binding(format!("{} is already registered", tag.name())));
    }
    let base_raw = match base {
        Some(base) => {
            if !base.class.as_object().belongs_to(&vm) {
                return Err(Error::Binding(format!(
                    "base of {} belongs to a different VM",
                    name
                )));
            }
            let base_tag = vm.type_tag(base.class.raw())?;
            if base_tag != Some(base.link.tag) || !registry.contains(base.link.tag) {
                return Err(Error::Binding(format!(
                    "base of {} is not the registered class of {}",
                    name,
                    base.link.tag.name()
                )));
            }
            Some(base.class.raw())
        }
        None => None,
    };
    let class: Class = wrap_owned(&vm, vm.new_class(name, base_raw)?)?;
    vm.set_type_tag(class.raw(), tag)?;
    Ok((vm, class))
}

fn publish(vm: &Vm, table: &Table, name: &str, tag: TypeTag, class: &Class, base: Option<BaseLink>) -> Result<()> {
    vm.type_registry()?.register(tag, class.clone(), base);
    table.set(name, class)?;
    tracing::debug!(class = name, ty = tag.name(), "class registered");
    Ok(())
}

/// Register `T` as a class named `name` on `table`
pub(crate) fn register<T, M, A, D>(
    table: &Table,
    name: &str,
    allocator: A,
    options: ClassOptions<T, D>,
) -> Result<Class>
where
    T: 'static,
    A: Allocator<T, M>,
    D: ArgList,
{
    let tag = TypeTag::of::<T>();
    let (vm, class) = define(table, name, tag, options.base.as_ref())?;

    let ownership = options.ownership;
    let sink = options.sink;
    let class_name = name.to_string();
    let signature = Signature::method(A::param_kinds());
    let constructor = function::bind(
        &vm,
        &format!("{}.{}", name, CONSTRUCTOR_NAME),
        signature,
        options.defaults,
        move |vm: &Vm, slots: &ArgSlots| {
            let instance = vm.get(RECEIVER_SLOT)?;
            match (ownership, &sink) {
                (Ownership::Owned, _) => attach(vm, instance, allocator.allocate(vm, slots)?)?,
                (Ownership::Borrowed, Some(sink)) => {
                    let host = Rc::new(RefCell::new(allocator.allocate(vm, slots)?));
                    attach_borrowed(vm, instance, &host)?;
                    (**sink)(host);
                }
                (Ownership::Borrowed, None) => {
                    return Err(Error::Runtime(format!(
                        "{} is borrowed and has no host sink; use new_instance_ptr",
                        class_name
                    )))
                }
            }
            Ok(0)
        },
    )?;
    vm.set_slot(class.raw(), CONSTRUCTOR_NAME, constructor.raw())?;

    publish(&vm, table, name, tag, &class, options.base.map(|b| b.link))?;
    Ok(class)
}

/// Register `T` as a class that cannot be constructed from the VM
pub(crate) fn register_abstract<T: 'static>(
    table: &Table,
    name: &str,
    base: Option<BaseClass>,
) -> Result<Class> {
    let tag = TypeTag::of::<T>();
    let (vm, class) = define(table, name, tag, base.as_ref())?;
    // Drop any constructor copied from the base.
    vm.remove_slot(class.raw(), CONSTRUCTOR_NAME)?;
    publish(&vm, table, name, tag, &class, base.map(|b| b.link))?;
    Ok(class)
}

// ============================================================================
// Class and instance handles
// ============================================================================

impl Class {
    /// Bind a method of `T`
    pub fn add_method<T, M, F>(&self, name: &str, method: F) -> Result<()>
    where
        T: 'static,
        F: HostMethod<T, M>,
    {
        self.add_method_with_defaults(name, method, ())
    }

    /// Bind a method of `T` with defaults for its trailing parameters
    pub fn add_method_with_defaults<T, M, F, D>(&self, name: &str, method: F, defaults: D) -> Result<()>
    where
        T: 'static,
        F: HostMethod<T, M>,
        D: ArgList,
    {
        let vm = self.vm()?;
        let qualified = format!("{}.{}", vm.class_name(self.raw())?, name);
        let function = function::bind_method(&vm, &qualified, method, defaults)?;
        vm.set_slot(self.raw(), name, function.raw())?;
        Ok(())
    }

    /// Bind a function that ignores its receiver
    pub fn add_static_function<M, F>(&self, name: &str, function: F) -> Result<()>
    where
        F: HostFunction<M>,
    {
        self.add_static_function_with_defaults(name, function, ())
    }

    /// Bind a receiver-less function with defaults for its trailing
    /// parameters
    pub fn add_static_function_with_defaults<M, F, D>(&self, name: &str, function: F, defaults: D) -> Result<()>
    where
        F: HostFunction<M>,
        D: ArgList,
    {
        let vm = self.vm()?;
        let qualified = format!("{}.{}", vm.class_name(self.raw())?, name);
        let bound = function::bind_function(&vm, &qualified, function, defaults)?;
        vm.set_slot(self.raw(), name, bound.raw())?;
        Ok(())
    }

    /// Set a class-level value
    pub fn set<V: ToVm>(&self, name: &str, value: V) -> Result<()> {
        let vm = self.vm()?;
        with_value(&vm, value, |v| Ok(vm.set_slot(self.raw(), name, v)?))
    }

    /// Read a class-level value
    pub fn get<V: FromVm>(&self, name: &str) -> Result<V> {
        let vm = self.vm()?;
        let value = vm
            .get_slot(self.raw(), name)?
            .ok_or_else(|| Error::NotFound(format!("class member {}", name)))?;
        Object::from_value(&vm, value).to()
    }

    /// A callable member, if there is one. A member that is not callable
    /// is a type mismatch.
    pub fn find_function(&self, name: &str) -> Result<Option<Function>> {
        let vm = self.vm()?;
        match vm.get_slot(self.raw(), name)? {
            Some(value) => Object::from_value(&vm, value).try_into().map(Some),
            None => Ok(None),
        }
    }

    /// Name the class was registered under
    pub fn name(&self) -> Result<String> {
        Ok(self.vm()?.class_name(self.raw())?)
    }

    /// Base class, if any
    pub fn base(&self) -> Result<Option<Class>> {
        let vm = self.vm()?;
        match vm.class_base(self.raw())? {
            Some(base) => Object::from_value(&vm, base).try_into().map(Some),
            None => Ok(None),
        }
    }

    /// Host type the class is bound to
    pub fn type_tag(&self) -> Result<Option<TypeTag>> {
        Ok(self.vm()?.type_tag(self.raw())?)
    }
}

impl Instance {
    /// Run `f` on the host object, viewed as `T` (its own type or a
    /// registered base of it)
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        with_host_mut(&self.vm()?, self.raw(), f)
    }

    /// Shared-borrow flavour of [`Instance::with`]
    pub fn with_ref<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        with_host(&self.vm()?, self.raw(), f)
    }

    /// Whether the instance's class is bound to `T` or a type derived from it
    pub fn is<T: 'static>(&self) -> bool {
        let Ok(vm) = self.vm() else {
            return false;
        };
        match vm.type_tag(self.raw()) {
            Ok(Some(tag)) => match vm.type_registry() {
                Ok(registry) => registry.is_compatible(tag, TypeTag::of::<T>()),
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// The host object itself; `T` must be its exact type
    pub fn host<T: 'static>(&self) -> Result<Rc<RefCell<T>>> {
        let slot = host_slot(&self.vm()?, self.raw())?;
        let object = slot
            .link
            .upgrade()
            .ok_or_else(|| Error::Runtime(format!("{} has been dropped by the host", slot.tag.name())))?;
        object.downcast::<RefCell<T>>().map_err(|_| foreign::<T>())
    }

    /// Class of the instance
    pub fn class(&self) -> Result<Class> {
        let vm = self.vm()?;
        Object::from_value(&vm, vm.instance_class(self.raw())?).try_into()
    }

    /// Look a member up through the class
    pub fn get<V: FromVm>(&self, name: &str) -> Result<V> {
        let vm = self.vm()?;
        let value = vm
            .get_slot(self.raw(), name)?
            .ok_or_else(|| Error::NotFound(format!("member {}", name)))?;
        Object::from_value(&vm, value).to()
    }
}
