//! Evaluation stack and call frames
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ free variables / pushed defaults    │  ← top
//! │ argN                                │
//! │ ...                                 │
//! │ arg1                                │
//! │ this                                │  ← frame base (index 1)
//! ├─────────────────────────────────────┤
//! │ callee                              │
//! │ caller's slots                      │
//! └─────────────────────────────────────┘
//! ```
//!
//! Positive indices are 1-based from the current frame base; negative
//! indices count back from the top (-1 is the top slot). This type only
//! moves values around: strong counts are taken and given back by the
//! [`Vm`](crate::Vm), which owns the stack.

use crate::defaults::DEFAULT_MAX_STACK_SIZE;
use crate::value::Value;
use crate::{VmError, VmResult};

/// Activation record of one native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    /// Absolute position of the receiver slot
    pub base: usize,
    /// Parameters supplied by the caller, receiver included
    pub arg_count: usize,
    /// Free variables pushed right after the parameters
    pub free_count: usize,
}

/// Operand stack with call frames.
#[derive(Debug)]
pub struct Stack {
    slots: Vec<Value>,
    frames: Vec<CallFrame>,
    max_size: usize,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Stack {
    /// Create a stack with the default size limit
    pub fn new() -> Self {
        Self::with_capacity(64, DEFAULT_MAX_STACK_SIZE)
    }

    /// Create a stack with an initial capacity and a hard size limit
    pub fn with_capacity(initial: usize, max_size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(initial.min(max_size)),
            frames: Vec::new(),
            max_size,
        }
    }

    // ========================================================================
    // Operand Stack Operations
    // ========================================================================

    /// Push a value
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the stack is full.
    #[inline]
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.slots.len() >= self.max_size {
            return Err(VmError::StackOverflow);
        }
        self.slots.push(value);
        Ok(())
    }

    /// Pop the top value
    ///
    /// Never pops below the current frame base.
    #[inline]
    pub fn pop(&mut self) -> VmResult<Value> {
        if self.slots.len() <= self.base() {
            return Err(VmError::StackUnderflow);
        }
        self.slots.pop().ok_or(VmError::StackUnderflow)
    }

    /// Absolute stack depth
    #[inline]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots in the current frame
    #[inline]
    pub fn top(&self) -> usize {
        self.slots.len() - self.base()
    }

    /// Maximum stack size
    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Translate a frame-relative index into an absolute position
    pub fn resolve(&self, index: isize) -> VmResult<usize> {
        let base = self.base();
        let depth = self.slots.len();
        let pos = match index {
            0 => None,
            i if i > 0 => Some(base + (i as usize) - 1),
            i => depth.checked_sub(i.unsigned_abs()),
        };
        match pos {
            Some(pos) if pos >= base && pos < depth => Ok(pos),
            _ => Err(VmError::InvalidIndex(index)),
        }
    }

    /// Value at an absolute position
    #[inline]
    pub fn peek_at(&self, pos: usize) -> VmResult<Value> {
        self.slots.get(pos).copied().ok_or(VmError::StackUnderflow)
    }

    /// Overwrite the value at an absolute position, returning the old one
    #[inline]
    pub fn replace_at(&mut self, pos: usize, value: Value) -> VmResult<Value> {
        let slot = self.slots.get_mut(pos).ok_or(VmError::StackUnderflow)?;
        Ok(std::mem::replace(slot, value))
    }

    /// Remove the value at an absolute position, shifting the rest down
    pub fn remove_at(&mut self, pos: usize) -> VmResult<Value> {
        if pos < self.base() || pos >= self.slots.len() {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.slots.remove(pos))
    }

    /// Cut the stack down to `depth` slots, returning the removed values
    pub fn truncate(&mut self, depth: usize) -> Vec<Value> {
        if depth >= self.slots.len() {
            return Vec::new();
        }
        self.slots.split_off(depth)
    }

    /// Slice of values between two absolute positions
    pub fn slice(&self, from: usize, to: usize) -> &[Value] {
        let to = to.min(self.slots.len());
        &self.slots[from.min(to)..to]
    }

    // ========================================================================
    // Call Frame Management
    // ========================================================================

    /// Push a new call frame
    pub fn push_frame(&mut self, frame: CallFrame) {
        self.frames.push(frame);
    }

    /// Pop the current call frame
    pub fn pop_frame(&mut self) -> VmResult<CallFrame> {
        self.frames
            .pop()
            .ok_or_else(|| VmError::RuntimeError("No call frame to pop".to_string()))
    }

    /// Current call frame
    #[inline]
    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Number of active frames
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.base)
    }

    /// Drop every slot and frame, returning the values that were held
    pub fn clear(&mut self) -> Vec<Value> {
        self.frames.clear();
        std::mem::take(&mut self.slots)
    }
}
