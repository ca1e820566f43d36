//! Type tag registry
//!
//! Maps each registered host type to its VM class, together with the base
//! type it inherits from and the functions that turn a reference to the
//! derived host object into a reference to its base. One registry exists
//! per VM, stored in the VM's extension slots and dropped at teardown.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;

use rustc_hash::FxHashMap;
use squire_vm::TypeTag;

use crate::error::{Error, Result};
use crate::handle::Class;

/// Upcast `&mut Derived` (type-erased) to `&mut Base`
pub type UpcastMut = for<'a> fn(&'a mut dyn Any) -> Option<&'a mut dyn Any>;

/// Upcast `&Derived` (type-erased) to `&Base`
pub type UpcastRef = for<'a> fn(&'a dyn Any) -> Option<&'a dyn Any>;

/// Link from a derived type to its base
#[derive(Clone, Copy)]
pub struct BaseLink {
    pub(crate) tag: TypeTag,
    pub(crate) upcast_ref: UpcastRef,
    pub(crate) upcast_mut: UpcastMut,
}

impl BaseLink {
    /// Tag of the base type
    pub fn tag(&self) -> TypeTag {
        self.tag
    }
}

impl fmt::Debug for BaseLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BaseLink({})", self.tag.name())
    }
}

#[derive(Clone)]
struct Entry {
    class: Class,
    base: Option<BaseLink>,
}

/// Per-VM map from host type identity to VM class
#[derive(Default)]
pub struct TypeRegistry {
    entries: RefCell<FxHashMap<TypeTag, Entry>>,
}

impl TypeRegistry {
    /// Record (or overwrite) the class of `tag`
    pub fn register(&self, tag: TypeTag, class: Class, base: Option<BaseLink>) {
        tracing::debug!(ty = tag.name(), base = ?base.map(|b| b.tag.name()), "type registered");
        self.entries
            .borrow_mut()
            .insert(tag, Entry { class, base });
    }

    /// Class registered for `tag`
    pub fn lookup(&self, tag: TypeTag) -> Result<Class> {
        self.entries
            .borrow()
            .get(&tag)
            .map(|e| e.class.clone())
            .ok_or_else(|| Error::NotFound(format!("no class registered for {}", tag.name())))
    }

    /// Whether `tag` has a class
    pub fn contains(&self, tag: TypeTag) -> bool {
        self.entries.borrow().contains_key(&tag)
    }

    /// Direct base of `tag`
    pub fn base_of(&self, tag: TypeTag) -> Option<TypeTag> {
        self.entries
            .borrow()
            .get(&tag)
            .and_then(|e| e.base)
            .map(|b| b.tag)
    }

    /// Base links from `from` up to `to`, or `None` if `to` is not an
    /// ancestor of `from` (or `from` itself).
    pub(crate) fn chain(&self, from: TypeTag, to: TypeTag) -> Option<Vec<BaseLink>> {
        let entries = self.entries.borrow();
        let mut links = Vec::new();
        let mut current = from;
        // A chain can be no longer than the number of registered types.
        for _ in 0..=entries.len() {
            if current == to {
                return Some(links);
            }
            let link = entries.get(&current)?.base?;
            links.push(link);
            current = link.tag;
        }
        None
    }

    /// Whether a value tagged `tag` may be used where `target` is expected
    pub fn is_compatible(&self, tag: TypeTag, target: TypeTag) -> bool {
        self.chain(tag, target).is_some()
    }

    /// Apply the upcasts from `from` to `to` to a shared reference
    pub fn upcast<'a>(&self, object: &'a dyn Any, from: TypeTag, to: TypeTag) -> Option<&'a dyn Any> {
        let mut current = object;
        for link in self.chain(from, to)? {
            current = (link.upcast_ref)(current)?;
        }
        Some(current)
    }

    /// Apply the upcasts from `from` to `to` to an exclusive reference
    pub fn upcast_mut<'a>(
        &self,
        object: &'a mut dyn Any,
        from: TypeTag,
        to: TypeTag,
    ) -> Option<&'a mut dyn Any> {
        let mut current = object;
        for link in self.chain(from, to)? {
            current = (link.upcast_mut)(current)?;
        }
        Some(current)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Forget every registration
    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        tracing::debug!(count = entries.len(), "type registry cleared");
        drop(entries);
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.borrow();
        let mut names: Vec<&str> = entries.keys().map(|t| t.name()).collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Object;
    use squire_vm::Vm;

    struct Base(i32);
    struct Derived {
        base: Base,
    }
    struct Other;

    fn up_ref(any: &dyn Any) -> Option<&dyn Any> {
        any.downcast_ref::<Derived>().map(|d| &d.base as &dyn Any)
    }

    fn up_mut(any: &mut dyn Any) -> Option<&mut dyn Any> {
        any.downcast_mut::<Derived>().map(|d| &mut d.base as &mut dyn Any)
    }

    fn class(vm: &Vm, name: &str) -> Class {
        let raw = vm.new_class(name, None).unwrap();
        Class::try_from(Object::from_owned(vm, raw)).unwrap()
    }

    fn setup(vm: &Vm) -> TypeRegistry {
        let registry = TypeRegistry::default();
        registry.register(TypeTag::of::<Base>(), class(vm, "Base"), None);
        registry.register(
            TypeTag::of::<Derived>(),
            class(vm, "Derived"),
            Some(BaseLink {
                tag: TypeTag::of::<Base>(),
                upcast_ref: up_ref,
                upcast_mut: up_mut,
            }),
        );
        registry.register(TypeTag::of::<Other>(), class(vm, "Other"), None);
        registry
    }

    #[test]
    fn test_compatibility_walks_chain() {
        let vm = Vm::new();
        let registry = setup(&vm);
        let (base, derived, other) = (
            TypeTag::of::<Base>(),
            TypeTag::of::<Derived>(),
            TypeTag::of::<Other>(),
        );
        assert!(registry.is_compatible(derived, base));
        assert!(registry.is_compatible(derived, derived));
        assert!(!registry.is_compatible(base, derived));
        assert!(!registry.is_compatible(other, base));
        assert_eq!(registry.base_of(derived), Some(base));
    }

    #[test]
    fn test_upcast_reaches_base_field() {
        let vm = Vm::new();
        let registry = setup(&vm);
        let mut object = Derived { base: Base(7) };
        let base = registry
            .upcast_mut(&mut object, TypeTag::of::<Derived>(), TypeTag::of::<Base>())
            .and_then(|b| b.downcast_mut::<Base>())
            .unwrap();
        base.0 += 1;
        assert_eq!(object.base.0, 8);
    }

    #[test]
    fn test_lookup_missing() {
        let vm = Vm::new();
        let registry = setup(&vm);
        assert!(registry.lookup(TypeTag::of::<Base>()).is_ok());
        assert!(matches!(
            registry.lookup(TypeTag::of::<String>()),
            Err(Error::NotFound(_))
        ));
        registry.clear();
        assert!(registry.is_empty());
    }
}
