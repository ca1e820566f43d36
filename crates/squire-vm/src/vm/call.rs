//! Call dispatch
//!
//! A call consumes `[callee, this, arg1 .. argN]` from the top of the stack
//! and leaves exactly one result in the callee's slot. On error every one of
//! those slots is gone and nothing is pushed.

use crate::defaults::CONSTRUCTOR_NAME;
use crate::object::HeapObject;
use crate::stack::CallFrame;
use crate::value::{Value, ValueType};
use crate::{VmError, VmResult};

use super::Vm;

enum Callee {
    Closure {
        function: crate::object::NativeFn,
        free_variables: Vec<Value>,
        params_check: Option<crate::params::ParamsCheck>,
        name: String,
    },
    Class,
    Other(ValueType),
}

impl Vm {
    /// Call the value below the top `nparams` slots.
    ///
    /// `nparams` counts the receiver, so it is at least one. On success the
    /// callee and its parameters are replaced by the call's result.
    pub fn call(&self, nparams: usize) -> VmResult<()> {
        if nparams == 0 {
            return Err(VmError::WrongArgumentCount {
                min: 1,
                max: 1,
                got: 0,
            });
        }
        let callee_pos = {
            let stack = self.context.stack.borrow();
            if stack.top() < nparams + 1 {
                return Err(VmError::StackUnderflow);
            }
            stack.depth() - nparams - 1
        };
        let callee = self.context.stack.borrow().peek_at(callee_pos)?;

        let kind = match callee {
            Value::Object(r) => match self.shared.heap()?.get(r)? {
                HeapObject::Closure(c) => Callee::Closure {
                    function: c.function.clone(),
                    free_variables: c.free_variables.clone(),
                    params_check: c.params_check.clone(),
                    name: c.name.clone(),
                },
                HeapObject::Class(_) => Callee::Class,
                other => Callee::Other(other.value_type()),
            },
            Value::Null => Callee::Other(ValueType::Null),
            Value::Bool(_) => Callee::Other(ValueType::Bool),
            Value::Integer(_) => Callee::Other(ValueType::Integer),
            Value::Float(_) => Callee::Other(ValueType::Float),
        };

        let result = match kind {
            Callee::Closure {
                function,
                free_variables,
                params_check,
                name,
            } => self.call_native(callee_pos, nparams, &name, function, free_variables, params_check),
            Callee::Class => self.call_class(callee, callee_pos, nparams),
            Callee::Other(ty) => Err(VmError::NotCallable(ty.name())),
        };
        if result.is_err() {
            self.unwind_to(callee_pos);
        }
        result
    }

    fn unwind_to(&self, depth: usize) {
        let removed = self.context.stack.borrow_mut().truncate(depth);
        self.shared.release_all(removed);
    }

    fn call_native(
        &self,
        callee_pos: usize,
        nparams: usize,
        name: &str,
        function: crate::object::NativeFn,
        free_variables: Vec<Value>,
        params_check: Option<crate::params::ParamsCheck>,
    ) -> VmResult<()> {
        let base = callee_pos + 1;
        if let Some(check) = &params_check {
            let supplied = self.context.stack.borrow().slice(base, base + nparams).to_vec();
            let types = supplied
                .into_iter()
                .map(|v| self.value_type(v))
                .collect::<VmResult<Vec<_>>>()?;
            check.check(&types)?;
        }

        let depth = self.context.depth.get();
        if depth >= self.shared.options.max_call_depth {
            tracing::warn!(closure = name, depth, "call depth exceeded");
            return Err(VmError::CallDepthExceeded(self.shared.options.max_call_depth));
        }

        for value in &free_variables {
            self.push(*value)?;
        }
        self.context.stack.borrow_mut().push_frame(CallFrame {
            base,
            arg_count: nparams,
            free_count: free_variables.len(),
        });
        self.context.depth.set(depth + 1);

        tracing::trace!(closure = name, nparams, "native call");
        let outcome = function(self);

        self.context.depth.set(depth);
        self.context.stack.borrow_mut().pop_frame()?;

        match outcome {
            Ok(nresults) => {
                let result = {
                    let stack = self.context.stack.borrow();
                    if nresults > 0 && stack.depth() > base {
                        stack.peek_at(stack.depth() - 1)?
                    } else {
                        Value::Null
                    }
                };
                self.add_ref(result);
                self.unwind_to(callee_pos);
                self.push_owned(result)
            }
            Err(_raised) => {
                let message = self
                    .last_error()
                    .unwrap_or_else(|| format!("error in '{}'", name));
                Err(VmError::Raised(message))
            }
        }
    }

    fn call_class(&self, class: Value, callee_pos: usize, nparams: usize) -> VmResult<()> {
        let instance = self.create_instance(class)?;
        // The instance takes the receiver slot.
        let this_pos = callee_pos + 1;
        let old_this = self.context.stack.borrow_mut().replace_at(this_pos, instance);
        match old_this {
            Ok(old) => self.release(old),
            Err(err) => {
                self.release(instance);
                return Err(err);
            }
        }

        let constructor = self.get_slot(class, CONSTRUCTOR_NAME)?;
        match constructor {
            Some(ctor) => {
                // Keep the instance alive across the constructor call.
                self.add_ref(instance);
                self.add_ref(ctor);
                match self.context.stack.borrow_mut().replace_at(callee_pos, ctor) {
                    Ok(old) => self.release(old),
                    Err(err) => {
                        self.release(ctor);
                        self.release(instance);
                        return Err(err);
                    }
                }
                match self.call(nparams) {
                    Ok(()) => {
                        self.pop(1)?;
                        self.push_owned(instance)
                    }
                    Err(err) => {
                        self.release(instance);
                        Err(err)
                    }
                }
            }
            None if nparams > 1 => Err(VmError::WrongArgumentCount {
                min: 1,
                max: 1,
                got: nparams,
            }),
            None => {
                self.add_ref(instance);
                self.unwind_to(callee_pos);
                self.push_owned(instance)
            }
        }
    }
}
