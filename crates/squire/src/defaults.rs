//! Default argument storage
//!
//! The defaults of a bound callable are converted to VM values once, at
//! registration, and kept in a user data value attached to the closure as
//! its only free variable. The user data owns one strong reference on each
//! default; its release hook gives them back when the closure dies.

use std::rc::Rc;

use squire_vm::{Payload, TypeTag, Value, Vm};

use crate::error::{Error, Result};
use crate::handle::Object;
use crate::marshal::ArgList;

/// Default values of one callable, right-aligned against its parameters
#[derive(Debug)]
pub struct DefaultSet {
    values: Vec<Value>,
}

impl DefaultSet {
    /// Number of defaults
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are none
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The last `n` defaults, for a call that omitted `n` arguments
    pub fn tail(&self, n: usize) -> Option<&[Value]> {
        let start = self.values.len().checked_sub(n)?;
        Some(&self.values[start..])
    }

    /// Convert `defaults` into a user data value owning them.
    ///
    /// Returns `None` when there are no defaults.
    pub fn store<D: ArgList>(vm: &Vm, defaults: D) -> Result<Option<Object>> {
        if D::LEN == 0 {
            return Ok(None);
        }
        let base = vm.top();
        if let Err(err) = defaults.push_all(vm) {
            vm.set_top(base)?;
            return Err(err);
        }

        let mut values = Vec::with_capacity(D::LEN);
        for offset in 0..D::LEN {
            let value = vm.get((base + offset + 1) as isize)?;
            vm.add_ref(value);
            values.push(value);
        }
        vm.set_top(base)?;

        let set = Rc::new(DefaultSet { values });
        let data = vm.new_userdata(set, Some(TypeTag::of::<DefaultSet>()))?;
        let weak = vm.weak();
        vm.set_release_hook(
            data,
            Box::new(move |payload: Option<Payload>| {
                if let Some(set) = payload.and_then(|p| p.downcast::<DefaultSet>().ok()) {
                    tracing::trace!(count = set.values.len(), "releasing default arguments");
                    for value in &set.values {
                        weak.release(*value);
                    }
                }
            }),
        )?;
        Ok(Some(Object::from_owned(vm, data)))
    }

    /// The default set of the running closure
    pub fn of_frame(vm: &Vm) -> Result<Rc<DefaultSet>> {
        let data = vm
            .free_variable(0)
            .map_err(|_| Error::NotFound("default arguments".to_string()))?;
        vm.userdata_payload(data)?
            .downcast::<DefaultSet>()
            .map_err(|_| Error::type_mismatch("default arguments", "user data of another type"))
    }
}
