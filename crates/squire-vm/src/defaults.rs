//! Default constants for VM configuration.

/// Slots reserved up front for a fresh stack.
pub const DEFAULT_INITIAL_STACK_SIZE: usize = 1024;

/// Hard limit on stack slots per context.
pub const DEFAULT_MAX_STACK_SIZE: usize = 64 * 1024;

/// Maximum nesting of native calls per context.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Name of the class member invoked when a class is called.
pub const CONSTRUCTOR_NAME: &str = "constructor";
