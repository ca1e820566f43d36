//! Opaque per-host-type identity attached to classes and user data.

use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Stable identity of a host type for the lifetime of the process.
///
/// Only the [`TypeId`] takes part in equality and hashing; the name is kept
/// for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// Tag of host type `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Underlying type id
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Host type name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;

    #[test]
    fn test_tag_identity() {
        assert_eq!(TypeTag::of::<A>(), TypeTag::of::<A>());
        assert_ne!(TypeTag::of::<A>(), TypeTag::of::<B>());
        assert!(TypeTag::of::<A>().name().ends_with("A"));
    }
}
