//! The virtual machine handle
//!
//! A [`Vm`] is a cheap view onto shared VM state (heap, root table,
//! extension slots) plus one execution context. The value returned by
//! [`Vm::new`] owns the VM and tears it down when dropped; threads and
//! views upgraded from a [`WeakVm`] do not.
//!
//! `Vm` is deliberately neither `Send` nor `Sync`: every operation on a VM
//! and on values it owns must happen on the thread that created it.

mod call;
mod context;
mod objects;

pub use context::{ContextId, VmOptions};
pub(crate) use context::Context;

use std::any::{Any, TypeId};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::heap::{Graveyard, Heap, HeapStats};
use crate::object::{HeapObject, Raised, TableObject};
use crate::stack::CallFrame;
use crate::value::{ObjectRef, Value, ValueType};
use crate::{VmError, VmResult};

/// State shared by every context of one VM
pub(crate) struct Shared {
    heap: RefCell<Heap>,
    root_table: Cell<Option<ObjectRef>>,
    main: Rc<Context>,
    contexts: RefCell<FxHashMap<ContextId, Weak<Context>>>,
    extensions: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
    options: VmOptions,
    // Set once teardown starts; no extension is created after that.
    closing: Cell<bool>,
    destroyed: Cell<bool>,
}

impl Shared {
    fn heap(&self) -> VmResult<Ref<'_, Heap>> {
        if self.destroyed.get() {
            return Err(VmError::Destroyed);
        }
        Ok(self.heap.borrow())
    }

    fn heap_mut(&self) -> VmResult<RefMut<'_, Heap>> {
        if self.destroyed.get() {
            return Err(VmError::Destroyed);
        }
        Ok(self.heap.borrow_mut())
    }

    fn add_ref(&self, value: Value) {
        if value.is_object() && !self.destroyed.get() {
            self.heap.borrow_mut().add_ref(value);
        }
    }

    fn release_all<I: IntoIterator<Item = Value>>(&self, values: I) {
        if self.destroyed.get() {
            return;
        }
        let mut grave = Graveyard::default();
        {
            let mut heap = self.heap.borrow_mut();
            for value in values {
                heap.release(value, &mut grave);
            }
        }
        grave.bury();
    }

    fn destroy(&self) {
        if self.destroyed.get() {
            return;
        }
        tracing::debug!("destroying VM");
        self.closing.set(true);

        // Extensions may hold VM values; drop them while the heap still works.
        let extensions = std::mem::take(&mut *self.extensions.borrow_mut());
        drop(extensions);

        let contexts: Vec<Rc<Context>> = self
            .contexts
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for context in contexts {
            let values = context.stack.borrow_mut().clear();
            self.release_all(values);
        }
        if let Some(root) = self.root_table.take() {
            self.release_all([Value::Object(root)]);
        }

        self.destroyed.set(true);
        let mut grave = Graveyard::default();
        self.heap.borrow_mut().clear(&mut grave);
        let freed = grave.len();
        grave.bury();
        tracing::debug!(freed, "VM destroyed");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Owner,
    Thread,
    View,
}

/// Handle to an embedded VM bound to one execution context
pub struct Vm {
    shared: Rc<Shared>,
    context: Rc<Context>,
    role: Role,
}

impl Vm {
    /// Create a VM with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a VM with specific options
    pub fn with_options(options: VmOptions) -> Self {
        let main = Rc::new(Context::new(&options, false));
        let mut heap = Heap::new();
        let root = heap.allocate(HeapObject::Table(TableObject::default()));

        let mut contexts = FxHashMap::default();
        contexts.insert(main.id, Rc::downgrade(&main));

        tracing::debug!(context = main.id.as_u64(), ?options, "VM created");
        let shared = Rc::new(Shared {
            heap: RefCell::new(heap),
            root_table: Cell::new(Some(root)),
            main: main.clone(),
            contexts: RefCell::new(contexts),
            extensions: RefCell::new(FxHashMap::default()),
            options,
            closing: Cell::new(false),
            destroyed: Cell::new(false),
        });
        Self {
            shared,
            context: main,
            role: Role::Owner,
        }
    }

    /// Options the VM was created with
    pub fn options(&self) -> &VmOptions {
        &self.shared.options
    }

    /// Identifier of this handle's execution context
    pub fn context_id(&self) -> ContextId {
        self.context.id
    }

    /// Whether this handle runs on a thread context
    pub fn is_thread(&self) -> bool {
        self.context.is_thread
    }

    /// Whether the VM has been torn down
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.get()
    }

    /// Number of execution contexts still alive
    pub fn live_contexts(&self) -> usize {
        self.shared
            .contexts
            .borrow()
            .values()
            .filter(|c| c.strong_count() > 0)
            .count()
    }

    /// Heap statistics
    pub fn heap_stats(&self) -> HeapStats {
        self.shared.heap.borrow().stats()
    }

    /// Non-owning reference to this VM
    pub fn weak(&self) -> WeakVm {
        WeakVm {
            shared: Rc::downgrade(&self.shared),
            context: Rc::downgrade(&self.context),
        }
    }

    /// Whether two handles refer to the same VM
    pub fn same_vm(&self, other: &Vm) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Create a new execution context sharing this VM's heap.
    pub fn new_thread(&self) -> VmResult<Vm> {
        if self.is_destroyed() {
            return Err(VmError::Destroyed);
        }
        let context = Rc::new(Context::new(&self.shared.options, true));
        self.shared
            .contexts
            .borrow_mut()
            .insert(context.id, Rc::downgrade(&context));
        tracing::debug!(context = context.id.as_u64(), "thread created");
        Ok(Vm {
            shared: self.shared.clone(),
            context,
            role: Role::Thread,
        })
    }

    /// Tear the VM down.
    ///
    /// Every context stack is emptied and every object freed, running the
    /// release hooks of objects still alive. Handles held by the host become
    /// inert. Idempotent; also run when the owning handle is dropped.
    pub fn destroy(&self) {
        self.shared.destroy();
    }

    // ========================================================================
    // Extensions
    // ========================================================================

    /// Per-VM singleton of host type `T`, created on first use.
    ///
    /// Extensions are dropped at teardown before any object is freed. Once
    /// teardown has started this fails with [`VmError::Destroyed`].
    pub fn extension<T: Default + 'static>(&self) -> VmResult<Rc<T>> {
        if self.shared.closing.get() {
            return Err(VmError::Destroyed);
        }
        let key = TypeId::of::<T>();
        let existing = self.shared.extensions.borrow().get(&key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let fresh: Rc<dyn Any> = Rc::new(T::default());
                self.shared
                    .extensions
                    .borrow_mut()
                    .entry(key)
                    .or_insert(fresh)
                    .clone()
            }
        };
        slot.downcast::<T>().map_err(|_| {
            VmError::RuntimeError(format!(
                "extension slot of {} holds another type",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Whether extension `T` has been created
    pub fn has_extension<T: 'static>(&self) -> bool {
        self.shared
            .extensions
            .borrow()
            .contains_key(&TypeId::of::<T>())
    }

    // ========================================================================
    // Reference Counting
    // ========================================================================

    /// Take one more strong reference on `value`
    pub fn add_ref(&self, value: Value) {
        self.shared.add_ref(value);
    }

    /// Give back one strong reference on `value`
    pub fn release(&self, value: Value) {
        self.shared.release_all([value]);
    }

    /// Current strong count of `value` (0 for primitives)
    pub fn ref_count(&self, value: Value) -> usize {
        self.shared.heap.borrow().ref_count(value)
    }

    // ========================================================================
    // Stack
    // ========================================================================

    /// Number of slots in the current frame
    pub fn top(&self) -> usize {
        self.context.stack.borrow().top()
    }

    /// Push a value, taking a new strong reference on it
    pub fn push(&self, value: Value) -> VmResult<()> {
        if let Value::Object(r) = value {
            if !self.shared.heap()?.contains(r) {
                return Err(VmError::StaleReference);
            }
        }
        self.context.stack.borrow_mut().push(value)?;
        self.shared.add_ref(value);
        Ok(())
    }

    /// Push a value, taking over a reference the caller already owns.
    ///
    /// On error the reference is released.
    pub fn push_owned(&self, value: Value) -> VmResult<()> {
        let pushed = self.context.stack.borrow_mut().push(value);
        if pushed.is_err() {
            self.release(value);
        }
        pushed
    }

    /// Push null
    pub fn push_null(&self) -> VmResult<()> {
        self.push_owned(Value::Null)
    }

    /// Push a boolean
    pub fn push_bool(&self, b: bool) -> VmResult<()> {
        self.push_owned(Value::Bool(b))
    }

    /// Push an integer
    pub fn push_integer(&self, i: i64) -> VmResult<()> {
        self.push_owned(Value::Integer(i))
    }

    /// Push a float
    pub fn push_float(&self, f: f64) -> VmResult<()> {
        self.push_owned(Value::Float(f))
    }

    /// Push a new string
    pub fn push_string(&self, s: &str) -> VmResult<()> {
        let value = self.new_string(s)?;
        self.push_owned(value)
    }

    /// Push the root table
    pub fn push_root_table(&self) -> VmResult<()> {
        let root = self.root_table()?;
        self.push(root)
    }

    /// Value at a frame-relative index (1-based, negative from the top).
    ///
    /// The returned value is borrowed from the stack slot.
    pub fn get(&self, index: isize) -> VmResult<Value> {
        let stack = self.context.stack.borrow();
        let pos = stack.resolve(index)?;
        stack.peek_at(pos)
    }

    /// Pop `n` values, releasing them
    pub fn pop(&self, n: usize) -> VmResult<()> {
        let popped = {
            let mut stack = self.context.stack.borrow_mut();
            if n > stack.top() {
                return Err(VmError::StackUnderflow);
            }
            let depth = stack.depth();
            stack.truncate(depth - n)
        };
        self.shared.release_all(popped);
        Ok(())
    }

    /// Pop the top value, handing its reference to the caller
    pub fn pop_owned(&self) -> VmResult<Value> {
        self.context.stack.borrow_mut().pop()
    }

    /// Resize the current frame to `top` slots, padding with null
    pub fn set_top(&self, top: usize) -> VmResult<()> {
        let current = self.top();
        if top < current {
            return self.pop(current - top);
        }
        for _ in current..top {
            self.push_null()?;
        }
        Ok(())
    }

    /// Remove the value at `index`, shifting the values above it down
    pub fn remove(&self, index: isize) -> VmResult<()> {
        let removed = {
            let mut stack = self.context.stack.borrow_mut();
            let pos = stack.resolve(index)?;
            stack.remove_at(pos)?
        };
        self.release(removed);
        Ok(())
    }

    /// Replace the value at `index`, taking a new reference on `value`
    pub fn replace(&self, index: isize, value: Value) -> VmResult<()> {
        self.shared.add_ref(value);
        let old = {
            let mut stack = self.context.stack.borrow_mut();
            match stack.resolve(index) {
                Ok(pos) => stack.replace_at(pos, value),
                Err(err) => Err(err),
            }
        };
        match old {
            Ok(old) => {
                self.release(old);
                Ok(())
            }
            Err(err) => {
                self.release(value);
                Err(err)
            }
        }
    }

    // ========================================================================
    // Frames and Errors
    // ========================================================================

    /// Current call frame, if a native closure is running
    pub fn current_frame(&self) -> Option<CallFrame> {
        self.context.stack.borrow().current_frame().copied()
    }

    /// Parameters supplied to the running closure, receiver included
    pub fn arg_count(&self) -> usize {
        self.current_frame().map_or(0, |f| f.arg_count)
    }

    /// Free variable `index` of the running closure.
    ///
    /// Free variables sit right above the supplied parameters.
    pub fn free_variable(&self, index: usize) -> VmResult<Value> {
        let frame = self.current_frame().ok_or(VmError::StackUnderflow)?;
        if index >= frame.free_count {
            return Err(VmError::InvalidIndex(index as isize));
        }
        self.context
            .stack
            .borrow()
            .peek_at(frame.base + frame.arg_count + index)
    }

    /// Record an error message and get the token a native closure returns
    /// to signal failure.
    pub fn throw_error(&self, message: impl Into<String>) -> Raised {
        let message = message.into();
        tracing::trace!(%message, "native error raised");
        *self.context.last_error.borrow_mut() = Some(message);
        Raised::new()
    }

    /// Last error raised on this context
    pub fn last_error(&self) -> Option<String> {
        self.context.last_error.borrow().clone()
    }

    /// Forget the last error
    pub fn reset_error(&self) {
        self.context.last_error.borrow_mut().take();
    }

    // ========================================================================
    // Value Information
    // ========================================================================

    /// The root table (borrowed)
    pub fn root_table(&self) -> VmResult<Value> {
        self.shared
            .root_table
            .get()
            .map(Value::Object)
            .ok_or(VmError::Destroyed)
    }

    /// Dynamic type of a value
    pub fn value_type(&self, value: Value) -> VmResult<ValueType> {
        Ok(match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Object(r) => self.shared.heap()?.get(r)?.value_type(),
        })
    }

    /// Whether two values are the same value (identity for objects)
    pub fn raw_equal(&self, a: Value, b: Value) -> bool {
        a == b
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        match self.role {
            Role::Owner => self.shared.destroy(),
            Role::Thread => {
                let values = self.context.stack.borrow_mut().clear();
                self.shared.release_all(values);
                self.shared.contexts.borrow_mut().remove(&self.context.id);
                tracing::debug!(context = self.context.id.as_u64(), "thread released");
            }
            Role::View => {}
        }
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("context", &self.context.id)
            .field("thread", &self.context.is_thread)
            .field("destroyed", &self.shared.destroyed.get())
            .finish()
    }
}

/// Non-owning reference to a VM.
///
/// Lets host objects that outlive a call (value handles, release hooks)
/// give their references back without keeping the VM alive. Every
/// operation is a no-op once the VM is gone.
#[derive(Clone)]
pub struct WeakVm {
    shared: Weak<Shared>,
    context: Weak<Context>,
}

impl WeakVm {
    /// A reference that never resolves
    pub fn dangling() -> Self {
        Self {
            shared: Weak::new(),
            context: Weak::new(),
        }
    }

    /// Whether the VM is still usable
    pub fn is_alive(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(false, |shared| !shared.destroyed.get())
    }

    /// Take one more strong reference on `value`. Returns `false` if the VM
    /// is gone.
    pub fn add_ref(&self, value: Value) -> bool {
        match self.shared.upgrade() {
            Some(shared) if !shared.destroyed.get() => {
                shared.add_ref(value);
                true
            }
            _ => false,
        }
    }

    /// Give back one strong reference on `value`
    pub fn release(&self, value: Value) {
        if let Some(shared) = self.shared.upgrade() {
            shared.release_all([value]);
        }
    }

    /// A VM handle usable for one operation.
    ///
    /// Runs on the originating context if it is still alive, otherwise on
    /// the main context. Dropping the returned handle never tears anything
    /// down.
    pub fn upgrade(&self) -> Option<Vm> {
        let shared = self.shared.upgrade()?;
        if shared.destroyed.get() {
            return None;
        }
        let context = self
            .context
            .upgrade()
            .unwrap_or_else(|| shared.main.clone());
        Some(Vm {
            shared,
            context,
            role: Role::View,
        })
    }

    /// Whether this refers to the same VM as `vm`
    pub fn is(&self, vm: &Vm) -> bool {
        std::ptr::eq(self.shared.as_ptr(), Rc::as_ptr(&vm.shared))
    }
}

impl fmt::Debug for WeakVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakVm")
            .field("alive", &self.is_alive())
            .finish()
    }
}
