//! Heap object model
//!
//! Everything that is not a primitive lives in the heap as a [`HeapObject`].
//! Objects own strong counts on every `Value::Object` they contain; those
//! counts are handed back through [`HeapObject::drain_children`] when the
//! object itself is freed.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::params::ParamsCheck;
use crate::tag::TypeTag;
use crate::value::{ObjectRef, Value, ValueType};
use crate::vm::Vm;

/// Type-erased host data attached to an instance or user data value.
pub type Payload = Rc<dyn Any>;

/// Callback run once when a value's last reference goes away.
///
/// Receives the value's host payload, if it had one.
pub type ReleaseHook = Box<dyn FnOnce(Option<Payload>)>;

/// Entry point of a native closure.
///
/// Returns the number of results it left on top of the stack, or [`Raised`]
/// after reporting an error through [`Vm::throw_error`].
pub type NativeFn = Rc<dyn Fn(&Vm) -> NativeResult>;

/// Result of a native closure
pub type NativeResult = Result<usize, Raised>;

/// Proof that an error message has been set on the VM.
///
/// Only [`Vm::throw_error`] creates one, so a native closure cannot report
/// failure without also reporting *why*.
#[derive(Debug)]
#[must_use]
pub struct Raised {
    _private: (),
}

impl Raised {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// String keyed table with an optional delegate consulted on misses.
#[derive(Debug, Default)]
pub struct TableObject {
    pub(crate) entries: FxHashMap<String, Value>,
    pub(crate) delegate: Option<ObjectRef>,
}

/// Class definition.
///
/// Members of the base class are copied in at creation time, so lookups
/// never need to walk the chain.
#[derive(Debug)]
pub struct ClassObject {
    pub(crate) name: String,
    pub(crate) base: Option<ObjectRef>,
    pub(crate) members: FxHashMap<String, Value>,
    pub(crate) type_tag: Option<TypeTag>,
}

/// Class instance carrying an optional host payload.
pub struct InstanceObject {
    pub(crate) class: ObjectRef,
    pub(crate) payload: Option<Payload>,
}

/// Host entry point plus the VM values it closes over.
pub struct NativeClosure {
    pub(crate) name: String,
    pub(crate) function: NativeFn,
    pub(crate) free_variables: Vec<Value>,
    pub(crate) params_check: Option<ParamsCheck>,
}

/// Opaque host data.
pub struct UserDataObject {
    pub(crate) payload: Payload,
    pub(crate) type_tag: Option<TypeTag>,
}

/// A heap resident object.
pub enum HeapObject {
    /// Immutable string
    String(Box<str>),
    /// Table
    Table(TableObject),
    /// Array
    Array(Vec<Value>),
    /// Class
    Class(ClassObject),
    /// Class instance
    Instance(InstanceObject),
    /// Native closure
    Closure(NativeClosure),
    /// Host data
    UserData(UserDataObject),
}

impl HeapObject {
    /// Dynamic type of this object
    pub fn value_type(&self) -> ValueType {
        match self {
            HeapObject::String(_) => ValueType::String,
            HeapObject::Table(_) => ValueType::Table,
            HeapObject::Array(_) => ValueType::Array,
            HeapObject::Class(_) => ValueType::Class,
            HeapObject::Instance(_) => ValueType::Instance,
            HeapObject::Closure(_) => ValueType::Closure,
            HeapObject::UserData(_) => ValueType::UserData,
        }
    }

    /// Move every strong reference this object holds into `out`.
    pub(crate) fn drain_children(&mut self, out: &mut Vec<Value>) {
        match self {
            HeapObject::String(_) => {}
            HeapObject::Table(table) => {
                out.extend(table.entries.drain().map(|(_, v)| v));
                if let Some(delegate) = table.delegate.take() {
                    out.push(Value::Object(delegate));
                }
            }
            HeapObject::Array(items) => out.append(items),
            HeapObject::Class(class) => {
                out.extend(class.members.drain().map(|(_, v)| v));
                if let Some(base) = class.base.take() {
                    out.push(Value::Object(base));
                }
            }
            HeapObject::Instance(instance) => out.push(Value::Object(instance.class)),
            HeapObject::Closure(closure) => out.append(&mut closure.free_variables),
            HeapObject::UserData(_) => {}
        }
    }

    /// Take the host payload out of this object, if it carries one.
    pub(crate) fn take_payload(&mut self) -> Option<Payload> {
        match self {
            HeapObject::Instance(instance) => instance.payload.take(),
            HeapObject::UserData(data) => {
                // The payload is not optional on user data; leave an inert
                // placeholder behind since the object is about to be dropped.
                let empty: Payload = Rc::new(());
                Some(std::mem::replace(&mut data.payload, empty))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapObject::String(s) => write!(f, "String({:?})", s),
            HeapObject::Table(t) => write!(f, "Table(len={})", t.entries.len()),
            HeapObject::Array(a) => write!(f, "Array(len={})", a.len()),
            HeapObject::Class(c) => write!(f, "Class({})", c.name),
            HeapObject::Instance(i) => write!(
                f,
                "Instance(class={}, payload={})",
                i.class.index(),
                i.payload.is_some()
            ),
            HeapObject::Closure(c) => write!(f, "Closure({})", c.name),
            HeapObject::UserData(u) => write!(f, "UserData({:?})", u.type_tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_children_table() {
        let mut table = TableObject::default();
        table
            .entries
            .insert("a".to_string(), Value::Object(ObjectRef::new(1, 0)));
        table.entries.insert("b".to_string(), Value::integer(3));
        table.delegate = Some(ObjectRef::new(2, 0));
        let mut obj = HeapObject::Table(table);

        let mut out = Vec::new();
        obj.drain_children(&mut out);
        assert_eq!(out.iter().filter(|v| v.is_object()).count(), 2);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_take_payload_once() {
        let payload: Payload = Rc::new(5u32);
        let mut obj = HeapObject::Instance(InstanceObject {
            class: ObjectRef::new(0, 0),
            payload: Some(payload),
        });
        assert!(obj.take_payload().is_some());
        assert!(obj.take_payload().is_none());
    }
}
