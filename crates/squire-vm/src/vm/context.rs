//! Execution contexts and VM options
//!
//! Every VM has a main context; threads created with
//! [`Vm::new_thread`](super::Vm::new_thread) get their own. A context owns an
//! evaluation stack and the last error raised on it, while the heap, the
//! root table and the extension slots are shared by all contexts of a VM.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::defaults::{DEFAULT_INITIAL_STACK_SIZE, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_STACK_SIZE};
use crate::stack::Stack;

/// Unique identifier for an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Create a new unique context ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// VM creation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Slots reserved for each new stack
    pub initial_stack_size: usize,

    /// Hard limit on stack slots per context
    pub max_stack_size: usize,

    /// Maximum nesting of native calls per context
    pub max_call_depth: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            initial_stack_size: DEFAULT_INITIAL_STACK_SIZE,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl VmOptions {
    /// Options with a custom stack size
    pub fn with_stack_size(mut self, initial: usize) -> Self {
        self.initial_stack_size = initial;
        self
    }

    /// Options with a custom call depth limit
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

/// Per-context state
pub(crate) struct Context {
    pub(crate) id: ContextId,
    pub(crate) stack: RefCell<Stack>,
    pub(crate) last_error: RefCell<Option<String>>,
    pub(crate) is_thread: bool,
    pub(crate) depth: Cell<usize>,
}

impl Context {
    pub(crate) fn new(options: &VmOptions, is_thread: bool) -> Self {
        Self {
            id: ContextId::new(),
            stack: RefCell::new(Stack::with_capacity(
                options.initial_stack_size,
                options.max_stack_size,
            )),
            last_error: RefCell::new(None),
            is_thread,
            depth: Cell::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_unique() {
        let a = ContextId::new();
        let b = ContextId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_options_builder() {
        let options = VmOptions::default()
            .with_stack_size(16)
            .with_max_call_depth(4);
        assert_eq!(options.initial_stack_size, 16);
        assert_eq!(options.max_call_depth, 4);
        assert_eq!(options.max_stack_size, DEFAULT_MAX_STACK_SIZE);
    }

    #[test]
    fn test_context_stack_respects_limit() {
        let options = VmOptions {
            max_stack_size: 8,
            ..VmOptions::default()
        };
        let context = Context::new(&options, false);
        assert_eq!(context.stack.borrow().max_size(), 8);
        assert!(!context.is_thread);
    }
}
