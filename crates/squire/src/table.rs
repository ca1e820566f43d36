//! Tables: string keyed VM containers
//!
//! The root table is the VM's global namespace; every other table is
//! reachable from it or from a host handle. Lookups follow the table's
//! delegate on a miss, writes always land on the table itself.

use std::collections::BTreeMap;

use squire_vm::{Value, Vm};

use crate::class::{self, BaseClass, ClassOptions};
use crate::error::{Error, Result};
use crate::function::{self, Allocator, HostFunction};
use crate::handle::{wrap_owned, Class, Function, Object, Table};
use crate::marshal::{with_value, ArgList, FromVm, ToVm};

impl Table {
    /// Create an empty table
    pub fn new(vm: &Vm) -> Result<Self> {
        wrap_owned(vm, vm.new_table()?)
    }

    fn lookup(&self, vm: &Vm, key: &str) -> Result<Option<Value>> {
        Ok(vm.get_slot(self.raw(), key)?)
    }

    /// Set `key` to `value`
    pub fn set<V: ToVm>(&self, key: &str, value: V) -> Result<()> {
        let vm = self.vm()?;
        with_value(&vm, value, |v| Ok(vm.set_slot(self.raw(), key, v)?))
    }

    /// Read `key` as `V`
    pub fn get<V: FromVm>(&self, key: &str) -> Result<V> {
        self.try_get(key)?
            .ok_or_else(|| Error::NotFound(format!("table entry '{}'", key)))
    }

    /// Read `key` as `V`, or `None` when it is missing
    pub fn try_get<V: FromVm>(&self, key: &str) -> Result<Option<V>> {
        match self.find(key)? {
            Some(object) => object.to().map(Some),
            None => Ok(None),
        }
    }

    /// Handle to the value at `key`
    pub fn find(&self, key: &str) -> Result<Option<Object>> {
        let vm = self.vm()?;
        Ok(self
            .lookup(&vm, key)?
            .map(|value| Object::from_value(&vm, value)))
    }

    /// Whether `key` resolves to a value
    pub fn has_entry(&self, key: &str) -> bool {
        matches!(self.find(key), Ok(Some(_)))
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.vm()?.remove_slot(self.raw(), key)?)
    }

    /// Move the value at `from` to `to`
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let vm = self.vm()?;
        let value = self
            .lookup(&vm, from)?
            .ok_or_else(|| Error::NotFound(format!("table entry '{}'", from)))?;
        // Hold a reference while the entry moves.
        let held = Object::from_value(&vm, value);
        vm.set_slot(self.raw(), to, held.raw())?;
        vm.remove_slot(self.raw(), from)?;
        Ok(())
    }

    /// Number of own entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.vm()?.slot_count(self.raw())?)
    }

    /// Whether the table has no own entries
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Own keys, sorted
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.vm()?.slot_keys(self.raw())?)
    }

    /// Remove every own entry
    pub fn clear(&self) -> Result<()> {
        Ok(self.vm()?.clear_slots(self.raw())?)
    }

    /// Create a table under `name`, replacing any existing entry
    pub fn add_table(&self, name: &str) -> Result<Table> {
        let table = Table::new(&self.vm()?)?;
        self.set(name, &table)?;
        Ok(table)
    }

    /// Create an enum under `name`. Fails if the table already has an own
    /// entry of that name.
    pub fn add_enum(&self, name: &str) -> Result<Enum> {
        if self.keys()?.iter().any(|key| key == name) {
            return Err(Error::Binding(format!("'{}' is already defined", name)));
        }
        let table = self.add_table(name)?;
        tracing::debug!(name, "enum added");
        Ok(Enum(table))
    }

    /// The table under `name`, created if missing
    pub fn get_or_create_table(&self, name: &str) -> Result<Table> {
        match self.find_table(name)? {
            Some(table) => Ok(table),
            None => self.add_table(name),
        }
    }

    fn find_typed<H: TryFrom<Object, Error = Error>>(&self, name: &str) -> Result<Option<H>> {
        match self.find(name)? {
            Some(object) => object.try_into().map(Some),
            None => Ok(None),
        }
    }

    /// The callable under `name`, if any
    pub fn find_function(&self, name: &str) -> Result<Option<Function>> {
        self.find_typed(name)
    }

    /// The class under `name`, if any
    pub fn find_class(&self, name: &str) -> Result<Option<Class>> {
        self.find_typed(name)
    }

    /// The table under `name`, if any
    pub fn find_table(&self, name: &str) -> Result<Option<Table>> {
        self.find_typed(name)
    }

    /// Consult `delegate` on lookup misses (or stop delegating)
    pub fn set_delegate(&self, delegate: Option<&Table>) -> Result<()> {
        let vm = self.vm()?;
        if let Some(delegate) = delegate {
            if !delegate.as_object().belongs_to(&vm) {
                return Err(Error::Runtime(
                    "delegate belongs to a different VM".to_string(),
                ));
            }
        }
        vm.set_delegate(self.raw(), delegate.map(Table::raw))?;
        Ok(())
    }

    /// Convert every own entry to `V`
    pub fn to_map<V: FromVm>(&self) -> Result<BTreeMap<String, V>> {
        let mut map = BTreeMap::new();
        for key in self.keys()? {
            let value = self.get(&key)?;
            map.insert(key, value);
        }
        Ok(map)
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    /// Bind a host function under `name`
    pub fn add_function<M, F>(&self, name: &str, f: F) -> Result<Function>
    where
        F: HostFunction<M>,
    {
        self.add_function_with_defaults(name, f, ())
    }

    /// Bind a host function with defaults for its trailing parameters
    pub fn add_function_with_defaults<M, F, D>(&self, name: &str, f: F, defaults: D) -> Result<Function>
    where
        F: HostFunction<M>,
        D: ArgList,
    {
        let vm = self.vm()?;
        let function = function::bind_function(&vm, name, f, defaults)?;
        self.set(name, &function)?;
        Ok(function)
    }

    /// Register `T` as an owned class constructed by `allocator`
    pub fn add_class<T, M, A>(&self, name: &str, allocator: A) -> Result<Class>
    where
        T: 'static,
        A: Allocator<T, M>,
    {
        class::register(self, name, allocator, ClassOptions::new())
    }

    /// Register `T` as a class with explicit options
    pub fn add_class_with<T, M, A, D>(
        &self,
        name: &str,
        allocator: A,
        options: ClassOptions<T, D>,
    ) -> Result<Class>
    where
        T: 'static,
        A: Allocator<T, M>,
        D: ArgList,
    {
        class::register(self, name, allocator, options)
    }

    /// Register `T` as an owned class built with `T::default()`
    pub fn add_default_class<T: Default + 'static>(&self, name: &str) -> Result<Class> {
        self.add_class(name, T::default)
    }

    /// Register `T` as a class without a constructor, usable only as a base
    /// or through instances attached from the host
    pub fn add_abstract_class<T: 'static>(&self, name: &str, base: Option<BaseClass>) -> Result<Class> {
        class::register_abstract::<T>(self, name, base)
    }
}

/// A named group of constants, stored in the VM as a table
#[derive(Debug, Clone, PartialEq)]
pub struct Enum(Table);

impl Enum {
    /// Add the constant `name`
    pub fn add_slot<V: ToVm>(&self, name: &str, value: V) -> Result<&Self> {
        self.0.set(name, value)?;
        Ok(self)
    }

    /// Read the constant `name`
    pub fn get<V: FromVm>(&self, name: &str) -> Result<V> {
        self.0.get(name)
    }

    /// Names of the constants, sorted
    pub fn names(&self) -> Result<Vec<String>> {
        self.0.keys()
    }

    /// The backing table
    pub fn as_table(&self) -> &Table {
        &self.0
    }
}
