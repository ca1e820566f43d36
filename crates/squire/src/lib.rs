//! Squire: host bindings for the Squire embedded VM
//!
//! This crate connects statically typed host code to the dynamically typed
//! VM in [`squire_vm`]:
//! - Reference counted value handles ([`Object`], [`Table`], [`Array`], ...)
//! - Bidirectional value conversion ([`FromVm`], [`ToVm`], [`ReturnValue`])
//! - Host functions and methods of any arity bound as VM closures, with
//!   call-time type checking and default trailing arguments
//! - Host types registered as VM classes, with single inheritance and a
//!   per-VM type tag registry for safe down-casting
//!
//! # Example
//!
//! ```ignore
//! use squire::{Vm, VmExt};
//!
//! let vm = Vm::new();
//! let root = vm.root()?;
//! root.add_function_with_defaults("add", |a: i64, b: i64| a + b, (10,))?;
//! let add = root.find_function("add")?.unwrap();
//! let sum: i64 = vm.call_func(&add, root.as_object(), (5,))?;
//! assert_eq!(sum, 15);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod array;
pub mod class;
pub mod defaults;
pub mod error;
pub mod function;
pub mod handle;
pub mod marshal;
pub mod registry;
pub mod signature;
pub mod table;
pub mod vm;

pub use class::{inherit, BaseClass, ClassOptions, HostSink, Inherits, Ownership};
pub use error::{Error, Result};
pub use function::{Allocator, HostFunction, HostMethod, FIRST_ARG_SLOT, RECEIVER_SLOT};
pub use handle::{Array, Class, Function, Instance, Object, Table, UserData};
pub use marshal::{ArgList, FromVm, Null, Pushed, ReturnValue, ToVm};
pub use registry::TypeRegistry;
pub use signature::Signature;
pub use table::Enum;
pub use vm::VmExt;

pub use squire_vm::{ParamKind, TypeTag, Value, ValueType, Vm, VmOptions};
