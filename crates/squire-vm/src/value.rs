//! VM values
//!
//! A [`Value`] is one dynamically typed slot of the embedded VM. Primitives
//! are stored inline; everything else lives in the [`Heap`](crate::heap::Heap)
//! and is referenced through a generational [`ObjectRef`].
//!
//! # Reference counting
//!
//! `Value` is `Copy` and does not count anything by itself. Every place that
//! *stores* a `Value::Object` (a stack slot, a table entry, an array element,
//! a closure free variable) owns exactly one strong count on the heap cell,
//! and gives it back when the slot is overwritten or dropped.

use std::fmt;

/// Generational reference to a heap cell.
///
/// The generation is bumped every time a slot is freed, so a stale reference
/// to a reused slot never resolves to the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    index: u32,
    generation: u32,
}

impl ObjectRef {
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the heap
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot at the time this reference was created
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// One dynamically typed VM value.
#[derive(Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// The null value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Integer (every host integer width maps here)
    Integer(i64),
    /// Floating point
    Float(f64),
    /// Reference to a heap object
    Object(ObjectRef),
}

impl Value {
    // ========================================================================
    // Constructors
    // ========================================================================

    /// Create a null value
    #[inline]
    pub const fn null() -> Self {
        Value::Null
    }

    /// Create a boolean value
    #[inline]
    pub const fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    /// Create an integer value
    #[inline]
    pub const fn integer(i: i64) -> Self {
        Value::Integer(i)
    }

    /// Create a float value
    #[inline]
    pub const fn float(f: f64) -> Self {
        Value::Float(f)
    }

    // ========================================================================
    // Type checks and extractors
    // ========================================================================

    /// Check if value is null
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if value references a heap object
    #[inline]
    pub const fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Extract boolean value
    #[inline]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract integer value
    #[inline]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract float value
    #[inline]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Extract the heap reference
    #[inline]
    pub const fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Value::Null"),
            Value::Bool(b) => write!(f, "Value::Bool({})", b),
            Value::Integer(i) => write!(f, "Value::Integer({})", i),
            Value::Float(x) => write!(f, "Value::Float({})", x),
            Value::Object(r) => write!(f, "Value::Object({}#{})", r.index, r.generation),
        }
    }
}

/// Dynamic type of a value, as seen by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// null
    Null,
    /// bool
    Bool,
    /// integer
    Integer,
    /// float
    Float,
    /// string
    String,
    /// table
    Table,
    /// array
    Array,
    /// native closure
    Closure,
    /// class
    Class,
    /// class instance
    Instance,
    /// opaque host data
    UserData,
}

impl ValueType {
    /// Human readable name, used in error messages
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Table => "table",
            ValueType::Array => "array",
            ValueType::Closure => "function",
            ValueType::Class => "class",
            ValueType::Instance => "instance",
            ValueType::UserData => "userdata",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
