//! Arrays: ordered VM containers

use squire_vm::Vm;

use crate::error::{Error, Result};
use crate::handle::{wrap_owned, Array, Object};
use crate::marshal::{with_value, FromVm, ToVm};

impl Array {
    /// Create an empty array
    pub fn new(vm: &Vm) -> Result<Self> {
        wrap_owned(vm, vm.new_array()?)
    }

    /// Create an array holding `items`, in order
    pub fn from_vec<V: ToVm>(vm: &Vm, items: Vec<V>) -> Result<Self> {
        with_value(vm, items, |value| Object::from_value(vm, value).try_into())
    }

    /// Number of elements
    pub fn len(&self) -> Result<usize> {
        Ok(self.vm()?.array_len(self.raw())?)
    }

    /// Whether the array has no elements
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn element(&self, vm: &Vm, index: usize) -> Result<Object> {
        let len = vm.array_len(self.raw())?;
        if index >= len {
            return Err(Error::NotFound(format!(
                "array index {} (length {})",
                index, len
            )));
        }
        Ok(Object::from_value(vm, vm.array_get(self.raw(), index)?))
    }

    /// Element `index` as `V`
    pub fn get<V: FromVm>(&self, index: usize) -> Result<V> {
        self.element(&self.vm()?, index)?.to()
    }

    /// Overwrite element `index`
    pub fn set<V: ToVm>(&self, index: usize, value: V) -> Result<()> {
        let vm = self.vm()?;
        let len = vm.array_len(self.raw())?;
        if index >= len {
            return Err(Error::NotFound(format!(
                "array index {} (length {})",
                index, len
            )));
        }
        with_value(&vm, value, |v| Ok(vm.array_set(self.raw(), index, v)?))
    }

    /// Append `value`
    pub fn push<V: ToVm>(&self, value: V) -> Result<()> {
        let vm = self.vm()?;
        with_value(&vm, value, |v| Ok(vm.array_push(self.raw(), v)?))
    }

    /// Remove and return the last element
    pub fn pop<V: FromVm>(&self) -> Result<Option<V>> {
        let vm = self.vm()?;
        match vm.array_pop(self.raw())? {
            Some(value) => Object::from_owned(&vm, value).to().map(Some),
            None => Ok(None),
        }
    }

    /// The last element, left in place
    pub fn back<V: FromVm>(&self) -> Result<Option<V>> {
        let vm = self.vm()?;
        match vm.array_len(self.raw())? {
            0 => Ok(None),
            len => self.element(&vm, len - 1)?.to().map(Some),
        }
    }

    /// Remove every element
    pub fn clear(&self) -> Result<()> {
        Ok(self.vm()?.array_clear(self.raw())?)
    }

    /// Convert every element to `V`
    pub fn to_vec<V: FromVm>(&self) -> Result<Vec<V>> {
        let vm = self.vm()?;
        with_value(&vm, self, |_| Vec::<V>::from_vm(&vm, -1))
    }

    /// Handles to every element
    pub fn to_objects(&self) -> Result<Vec<Object>> {
        let vm = self.vm()?;
        let len = vm.array_len(self.raw())?;
        (0..len).map(|i| self.element(&vm, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_back() {
        let vm = Vm::new();
        let array = Array::new(&vm).unwrap();
        assert_eq!(array.pop::<i64>().unwrap(), None);
        array.push(1).unwrap();
        array.push("two").unwrap();
        assert_eq!(array.len().unwrap(), 2);
        assert_eq!(array.back::<String>().unwrap().as_deref(), Some("two"));
        assert_eq!(array.pop::<String>().unwrap().as_deref(), Some("two"));
        assert_eq!(array.get::<i64>(0).unwrap(), 1);
        assert!(matches!(array.get::<i64>(1), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_from_vec_and_back() {
        let vm = Vm::new();
        let array = Array::from_vec(&vm, vec![3.5, 1.0, 2.25]).unwrap();
        assert_eq!(array.to_vec::<f64>().unwrap(), vec![3.5, 1.0, 2.25]);
        array.set(1, 9.0).unwrap();
        assert_eq!(array.get::<f64>(1).unwrap(), 9.0);
        assert!(array.set(5, 0.0).is_err());
        assert_eq!(array.ref_count(), 1);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_objects_hold_references() {
        let vm = Vm::new();
        let array = Array::from_vec(&vm, vec!["a", "b"]).unwrap();
        let objects = array.to_objects().unwrap();
        assert_eq!(objects[0].ref_count(), 2);
        array.clear().unwrap();
        assert!(array.is_empty().unwrap());
        assert_eq!(objects[0].ref_count(), 1);
        assert_eq!(objects[1].to::<String>().unwrap(), "b");
    }
}
