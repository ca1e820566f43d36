//! Object allocation and access
//!
//! Every `new_*` function returns an owned value: the caller holds the
//! single strong reference and must hand it to a slot, push it with
//! [`Vm::push_owned`] or [`Vm::release`] it. Accessors return borrowed
//! values that stay valid only while their container keeps them.

use crate::object::{
    ClassObject, HeapObject, InstanceObject, NativeClosure, NativeFn, Payload, ReleaseHook,
    TableObject, UserDataObject,
};
use crate::params::ParamsCheck;
use crate::tag::TypeTag;
use crate::value::{ObjectRef, Value, ValueType};
use crate::{VmError, VmResult};

use super::Vm;

fn object_ref(value: Value) -> VmResult<ObjectRef> {
    value.as_object().ok_or(VmError::WrongType {
        expected: "object",
        got: primitive_name(value),
    })
}

fn primitive_name(value: Value) -> &'static str {
    match value {
        Value::Null => ValueType::Null.name(),
        Value::Bool(_) => ValueType::Bool.name(),
        Value::Integer(_) => ValueType::Integer.name(),
        Value::Float(_) => ValueType::Float.name(),
        Value::Object(_) => "object",
    }
}

fn wrong(expected: ValueType, got: &HeapObject) -> VmError {
    VmError::WrongType {
        expected: expected.name(),
        got: got.value_type().name(),
    }
}

impl Vm {
    fn allocate(&self, object: HeapObject) -> VmResult<Value> {
        let r = self.shared.heap_mut()?.allocate(object);
        Ok(Value::Object(r))
    }

    fn check_live(&self, values: &[Value]) -> VmResult<()> {
        let heap = self.shared.heap()?;
        for value in values {
            if let Value::Object(r) = value {
                if !heap.contains(*r) {
                    return Err(VmError::StaleReference);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate a string
    pub fn new_string(&self, s: &str) -> VmResult<Value> {
        self.allocate(HeapObject::String(s.into()))
    }

    /// Allocate an empty table
    pub fn new_table(&self) -> VmResult<Value> {
        self.allocate(HeapObject::Table(TableObject::default()))
    }

    /// Allocate an empty array
    pub fn new_array(&self) -> VmResult<Value> {
        self.allocate(HeapObject::Array(Vec::new()))
    }

    /// Allocate a class, optionally derived from `base`.
    ///
    /// The members the base has at this point are copied into the new
    /// class.
    pub fn new_class(&self, name: &str, base: Option<Value>) -> VmResult<Value> {
        let (base_ref, members) = match base {
            None => (None, Default::default()),
            Some(base) => {
                let r = object_ref(base)?;
                let heap = self.shared.heap()?;
                match heap.get(r)? {
                    HeapObject::Class(class) => (Some(r), class.members.clone()),
                    other => return Err(wrong(ValueType::Class, other)),
                }
            }
        };
        if let Some(r) = base_ref {
            self.add_ref(Value::Object(r));
        }
        for value in members.values() {
            self.add_ref(*value);
        }
        tracing::debug!(class = name, derived = base_ref.is_some(), "class created");
        self.allocate(HeapObject::Class(ClassObject {
            name: name.to_string(),
            base: base_ref,
            members,
            type_tag: None,
        }))
    }

    /// Allocate an instance of `class` without running its constructor
    pub fn create_instance(&self, class: Value) -> VmResult<Value> {
        let r = object_ref(class)?;
        {
            let heap = self.shared.heap()?;
            let object = heap.get(r)?;
            if !matches!(object, HeapObject::Class(_)) {
                return Err(wrong(ValueType::Class, object));
            }
        }
        self.add_ref(class);
        self.allocate(HeapObject::Instance(InstanceObject {
            class: r,
            payload: None,
        }))
    }

    /// Allocate a native closure.
    ///
    /// `free_variables` are pushed above the parameters on every call and
    /// read back with [`Vm::free_variable`].
    pub fn new_closure(
        &self,
        name: &str,
        function: NativeFn,
        free_variables: &[Value],
        params_check: Option<ParamsCheck>,
    ) -> VmResult<Value> {
        self.check_live(free_variables)?;
        for value in free_variables {
            self.add_ref(*value);
        }
        self.allocate(HeapObject::Closure(NativeClosure {
            name: name.to_string(),
            function,
            free_variables: free_variables.to_vec(),
            params_check,
        }))
    }

    /// Allocate opaque host data
    pub fn new_userdata(&self, payload: Payload, tag: Option<TypeTag>) -> VmResult<Value> {
        self.allocate(HeapObject::UserData(UserDataObject {
            payload,
            type_tag: tag,
        }))
    }

    // ========================================================================
    // Strings
    // ========================================================================

    /// Contents of a string value
    pub fn read_string(&self, value: Value) -> VmResult<String> {
        let r = object_ref(value)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::String(s) => Ok(s.to_string()),
            other => Err(wrong(ValueType::String, other)),
        }
    }

    // ========================================================================
    // Slots (tables and classes)
    // ========================================================================

    /// Set `key` on a table or class, taking a reference on `value`
    pub fn set_slot(&self, container: Value, key: &str, value: Value) -> VmResult<()> {
        let r = object_ref(container)?;
        self.check_live(&[value])?;
        let old = {
            let mut heap = self.shared.heap_mut()?;
            let entries = match heap.get_mut(r)? {
                HeapObject::Table(table) => &mut table.entries,
                HeapObject::Class(class) => &mut class.members,
                other => return Err(wrong(ValueType::Table, other)),
            };
            let old = entries.insert(key.to_string(), value);
            heap.add_ref(value);
            old
        };
        if let Some(old) = old {
            self.release(old);
        }
        Ok(())
    }

    /// Look `key` up on a table (following delegates), a class, or an
    /// instance (through its class)
    pub fn get_slot(&self, container: Value, key: &str) -> VmResult<Option<Value>> {
        let mut r = object_ref(container)?;
        let heap = self.shared.heap()?;
        loop {
            match heap.get(r)? {
                HeapObject::Table(table) => match table.entries.get(key) {
                    Some(value) => return Ok(Some(*value)),
                    None => match table.delegate {
                        Some(delegate) => r = delegate,
                        None => return Ok(None),
                    },
                },
                HeapObject::Class(class) => return Ok(class.members.get(key).copied()),
                HeapObject::Instance(instance) => r = instance.class,
                other => return Err(wrong(ValueType::Table, other)),
            }
        }
    }

    /// Remove `key` from a table or class. Returns whether it was present.
    pub fn remove_slot(&self, container: Value, key: &str) -> VmResult<bool> {
        let r = object_ref(container)?;
        let removed = {
            let mut heap = self.shared.heap_mut()?;
            match heap.get_mut(r)? {
                HeapObject::Table(table) => table.entries.remove(key),
                HeapObject::Class(class) => class.members.remove(key),
                other => return Err(wrong(ValueType::Table, other)),
            }
        };
        match removed {
            Some(value) => {
                self.release(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Own keys of a table or class, sorted
    pub fn slot_keys(&self, container: Value) -> VmResult<Vec<String>> {
        let r = object_ref(container)?;
        let heap = self.shared.heap()?;
        let mut keys: Vec<String> = match heap.get(r)? {
            HeapObject::Table(table) => table.entries.keys().cloned().collect(),
            HeapObject::Class(class) => class.members.keys().cloned().collect(),
            other => return Err(wrong(ValueType::Table, other)),
        };
        keys.sort_unstable();
        Ok(keys)
    }

    /// Number of own entries of a table or class
    pub fn slot_count(&self, container: Value) -> VmResult<usize> {
        let r = object_ref(container)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::Table(table) => Ok(table.entries.len()),
            HeapObject::Class(class) => Ok(class.members.len()),
            other => Err(wrong(ValueType::Table, other)),
        }
    }

    /// Remove every own entry of a table or class
    pub fn clear_slots(&self, container: Value) -> VmResult<()> {
        let r = object_ref(container)?;
        let values: Vec<Value> = {
            let mut heap = self.shared.heap_mut()?;
            match heap.get_mut(r)? {
                HeapObject::Table(table) => table.entries.drain().map(|(_, v)| v).collect(),
                HeapObject::Class(class) => class.members.drain().map(|(_, v)| v).collect(),
                other => return Err(wrong(ValueType::Table, other)),
            }
        };
        self.shared.release_all(values);
        Ok(())
    }

    /// Set (or clear) the table consulted when a lookup on `table` misses
    pub fn set_delegate(&self, table: Value, delegate: Option<Value>) -> VmResult<()> {
        let r = object_ref(table)?;
        let delegate_ref = match delegate {
            None => None,
            Some(d) => {
                let dr = object_ref(d)?;
                let heap = self.shared.heap()?;
                let object = heap.get(dr)?;
                if !matches!(object, HeapObject::Table(_)) {
                    return Err(wrong(ValueType::Table, object));
                }
                let mut cursor = Some(dr);
                while let Some(current) = cursor {
                    if current == r {
                        return Err(VmError::RuntimeError(
                            "delegate chain would loop back to the table".to_string(),
                        ));
                    }
                    cursor = match heap.get(current)? {
                        HeapObject::Table(t) => t.delegate,
                        _ => None,
                    };
                }
                Some(dr)
            }
        };
        let old = {
            let mut heap = self.shared.heap_mut()?;
            let old = match heap.get_mut(r)? {
                HeapObject::Table(t) => std::mem::replace(&mut t.delegate, delegate_ref),
                other => return Err(wrong(ValueType::Table, other)),
            };
            if let Some(dr) = delegate_ref {
                heap.add_ref(Value::Object(dr));
            }
            old
        };
        if let Some(old) = old {
            self.release(Value::Object(old));
        }
        Ok(())
    }

    /// Delegate of a table (borrowed)
    pub fn delegate(&self, table: Value) -> VmResult<Option<Value>> {
        let r = object_ref(table)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::Table(t) => Ok(t.delegate.map(Value::Object)),
            other => Err(wrong(ValueType::Table, other)),
        }
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    fn with_array<R>(&self, array: Value, f: impl FnOnce(&mut Vec<Value>) -> VmResult<R>) -> VmResult<R> {
        let r = object_ref(array)?;
        let mut heap = self.shared.heap_mut()?;
        match heap.get_mut(r)? {
            HeapObject::Array(items) => f(items),
            other => Err(wrong(ValueType::Array, other)),
        }
    }

    /// Length of an array
    pub fn array_len(&self, array: Value) -> VmResult<usize> {
        self.with_array(array, |items| Ok(items.len()))
    }

    /// Element `index` of an array (borrowed)
    pub fn array_get(&self, array: Value, index: usize) -> VmResult<Value> {
        self.with_array(array, |items| {
            items
                .get(index)
                .copied()
                .ok_or(VmError::InvalidIndex(index as isize))
        })
    }

    /// Overwrite element `index`, taking a reference on `value`
    pub fn array_set(&self, array: Value, index: usize, value: Value) -> VmResult<()> {
        self.check_live(&[value])?;
        let old = self.with_array(array, |items| {
            let slot = items
                .get_mut(index)
                .ok_or(VmError::InvalidIndex(index as isize))?;
            Ok(std::mem::replace(slot, value))
        })?;
        self.add_ref(value);
        self.release(old);
        Ok(())
    }

    /// Append `value`, taking a reference on it
    pub fn array_push(&self, array: Value, value: Value) -> VmResult<()> {
        self.check_live(&[value])?;
        self.with_array(array, |items| {
            items.push(value);
            Ok(())
        })?;
        self.add_ref(value);
        Ok(())
    }

    /// Remove the last element, handing its reference to the caller
    pub fn array_pop(&self, array: Value) -> VmResult<Option<Value>> {
        self.with_array(array, |items| Ok(items.pop()))
    }

    /// Remove every element
    pub fn array_clear(&self, array: Value) -> VmResult<()> {
        let values = self.with_array(array, |items| Ok(std::mem::take(items)))?;
        self.shared.release_all(values);
        Ok(())
    }

    // ========================================================================
    // Classes and Instances
    // ========================================================================

    /// Base class of a class (borrowed)
    pub fn class_base(&self, class: Value) -> VmResult<Option<Value>> {
        let r = object_ref(class)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::Class(c) => Ok(c.base.map(Value::Object)),
            other => Err(wrong(ValueType::Class, other)),
        }
    }

    /// Name of a class
    pub fn class_name(&self, class: Value) -> VmResult<String> {
        let r = object_ref(class)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::Class(c) => Ok(c.name.clone()),
            other => Err(wrong(ValueType::Class, other)),
        }
    }

    /// Class of an instance (borrowed)
    pub fn instance_class(&self, instance: Value) -> VmResult<Value> {
        let r = object_ref(instance)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::Instance(i) => Ok(Value::Object(i.class)),
            other => Err(wrong(ValueType::Instance, other)),
        }
    }

    /// Attach a host payload to an instance, returning the previous one
    pub fn set_instance_payload(
        &self,
        instance: Value,
        payload: Option<Payload>,
    ) -> VmResult<Option<Payload>> {
        let r = object_ref(instance)?;
        let old = {
            let mut heap = self.shared.heap_mut()?;
            match heap.get_mut(r)? {
                HeapObject::Instance(i) => std::mem::replace(&mut i.payload, payload),
                other => return Err(wrong(ValueType::Instance, other)),
            }
        };
        Ok(old)
    }

    /// Host payload of an instance
    pub fn instance_payload(&self, instance: Value) -> VmResult<Option<Payload>> {
        let r = object_ref(instance)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::Instance(i) => Ok(i.payload.clone()),
            other => Err(wrong(ValueType::Instance, other)),
        }
    }

    /// Host payload of user data
    pub fn userdata_payload(&self, userdata: Value) -> VmResult<Payload> {
        let r = object_ref(userdata)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::UserData(u) => Ok(u.payload.clone()),
            other => Err(wrong(ValueType::UserData, other)),
        }
    }

    // ========================================================================
    // Type Tags and Release Hooks
    // ========================================================================

    /// Tag a class or user data value with a host type
    pub fn set_type_tag(&self, value: Value, tag: TypeTag) -> VmResult<()> {
        let r = object_ref(value)?;
        let mut heap = self.shared.heap_mut()?;
        match heap.get_mut(r)? {
            HeapObject::Class(c) => c.type_tag = Some(tag),
            HeapObject::UserData(u) => u.type_tag = Some(tag),
            other => return Err(wrong(ValueType::Class, other)),
        }
        Ok(())
    }

    /// Type tag of a class or user data; an instance reports its class's tag
    pub fn type_tag(&self, value: Value) -> VmResult<Option<TypeTag>> {
        let r = object_ref(value)?;
        let heap = self.shared.heap()?;
        match heap.get(r)? {
            HeapObject::Class(c) => Ok(c.type_tag),
            HeapObject::UserData(u) => Ok(u.type_tag),
            HeapObject::Instance(i) => match heap.get(i.class)? {
                HeapObject::Class(c) => Ok(c.type_tag),
                other => Err(wrong(ValueType::Class, other)),
            },
            _ => Ok(None),
        }
    }

    /// Install a hook run once when the last reference to `value` goes away
    pub fn set_release_hook(&self, value: Value, hook: ReleaseHook) -> VmResult<()> {
        let r = object_ref(value)?;
        self.shared.heap_mut()?.set_release_hook(r, hook)
    }

    // ========================================================================
    // Closures
    // ========================================================================

    /// Name a closure was created with
    pub fn closure_name(&self, closure: Value) -> VmResult<String> {
        let r = object_ref(closure)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::Closure(c) => Ok(c.name.clone()),
            other => Err(wrong(ValueType::Closure, other)),
        }
    }

    /// Parameter check of a closure
    pub fn closure_params(&self, closure: Value) -> VmResult<Option<ParamsCheck>> {
        let r = object_ref(closure)?;
        match self.shared.heap()?.get(r)? {
            HeapObject::Closure(c) => Ok(c.params_check.clone()),
            other => Err(wrong(ValueType::Closure, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_table_slots() {
        let vm = Vm::new();
        let table = vm.new_table().unwrap();
        let s = vm.new_string("v").unwrap();
        vm.set_slot(table, "k", s).unwrap();
        assert_eq!(vm.ref_count(s), 2);
        assert_eq!(vm.get_slot(table, "k").unwrap(), Some(s));
        assert_eq!(vm.slot_keys(table).unwrap(), vec!["k".to_string()]);

        vm.set_slot(table, "k", Value::integer(3)).unwrap();
        assert_eq!(vm.ref_count(s), 1);
        assert!(vm.remove_slot(table, "k").unwrap());
        assert!(!vm.remove_slot(table, "k").unwrap());
        vm.release(s);
        vm.release(table);
    }

    #[test]
    fn test_delegate_lookup() {
        let vm = Vm::new();
        let parent = vm.new_table().unwrap();
        let child = vm.new_table().unwrap();
        vm.set_slot(parent, "x", Value::integer(1)).unwrap();
        vm.set_delegate(child, Some(parent)).unwrap();
        assert_eq!(vm.get_slot(child, "x").unwrap(), Some(Value::integer(1)));
        assert!(vm.set_delegate(child, Some(child)).is_err());
        vm.set_delegate(child, None).unwrap();
        assert_eq!(vm.get_slot(child, "x").unwrap(), None);
        vm.release(child);
        vm.release(parent);
    }

    #[test]
    fn test_delegate_cycle_rejected() {
        let vm = Vm::new();
        let a = vm.new_table().unwrap();
        let b = vm.new_table().unwrap();
        let c = vm.new_table().unwrap();
        vm.set_delegate(a, Some(b)).unwrap();
        vm.set_delegate(b, Some(c)).unwrap();
        assert!(matches!(
            vm.set_delegate(c, Some(a)),
            Err(VmError::RuntimeError(_))
        ));
        assert_eq!(vm.delegate(c).unwrap(), None);
        assert_eq!(vm.ref_count(a), 1);
        assert_eq!(vm.get_slot(a, "missing").unwrap(), None);

        // Re-pointing along the chain is still fine.
        vm.set_delegate(a, Some(c)).unwrap();
        vm.set_delegate(a, None).unwrap();
        vm.release(a);
        vm.release(b);
        vm.release(c);
    }

    #[test]
    fn test_class_copies_base_members() {
        let vm = Vm::new();
        let base = vm.new_class("Base", None).unwrap();
        vm.set_slot(base, "answer", Value::integer(42)).unwrap();
        let derived = vm.new_class("Derived", Some(base)).unwrap();
        assert_eq!(vm.class_base(derived).unwrap(), Some(base));
        assert_eq!(vm.get_slot(derived, "answer").unwrap(), Some(Value::integer(42)));

        let table = vm.new_table().unwrap();
        assert!(matches!(
            vm.new_class("Bad", Some(table)),
            Err(VmError::WrongType { expected: "class", .. })
        ));

        let instance = vm.create_instance(derived).unwrap();
        assert_eq!(vm.instance_class(instance).unwrap(), derived);
        assert_eq!(vm.get_slot(instance, "answer").unwrap(), Some(Value::integer(42)));
    }

    #[test]
    fn test_type_tag_through_instance() {
        struct Host;
        let vm = Vm::new();
        let class = vm.new_class("Host", None).unwrap();
        vm.set_type_tag(class, TypeTag::of::<Host>()).unwrap();
        let instance = vm.create_instance(class).unwrap();
        assert_eq!(vm.type_tag(instance).unwrap(), Some(TypeTag::of::<Host>()));
        assert_eq!(vm.type_tag(Value::integer(1)).ok(), None);
    }

    #[test]
    fn test_instance_payload_hook() {
        let vm = Vm::new();
        let class = vm.new_class("C", None).unwrap();
        let instance = vm.create_instance(class).unwrap();
        vm.set_instance_payload(instance, Some(Rc::new(7i32))).unwrap();

        let seen = Rc::new(Cell::new(0));
        let hook_seen = seen.clone();
        vm.set_release_hook(
            instance,
            Box::new(move |payload| {
                let value = payload.and_then(|p| p.downcast::<i32>().ok());
                hook_seen.set(value.map_or(-1, |v| *v));
            }),
        )
        .unwrap();
        vm.release(instance);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn test_array_ops() {
        let vm = Vm::new();
        let array = vm.new_array().unwrap();
        vm.array_push(array, Value::integer(1)).unwrap();
        vm.array_push(array, Value::integer(2)).unwrap();
        assert_eq!(vm.array_len(array).unwrap(), 2);
        vm.array_set(array, 0, Value::float(1.5)).unwrap();
        assert_eq!(vm.array_get(array, 0).unwrap(), Value::float(1.5));
        assert!(vm.array_get(array, 5).is_err());
        assert_eq!(vm.array_pop(array).unwrap(), Some(Value::integer(2)));
        vm.array_clear(array).unwrap();
        assert_eq!(vm.array_len(array).unwrap(), 0);
    }

    #[test]
    fn test_wrong_container() {
        let vm = Vm::new();
        let s = vm.new_string("x").unwrap();
        assert!(matches!(
            vm.set_slot(s, "k", Value::null()),
            Err(VmError::WrongType { expected: "table", got: "string" })
        ));
        assert!(vm.set_slot(Value::integer(1), "k", Value::null()).is_err());
    }
}
