//! Quill interpreter
//!
//! Tree-walking evaluation of checked programs over a single value stack.

pub mod env;
pub mod error;
pub mod eval;
pub mod native;
pub mod value;

pub use env::Env;
pub use error::{ErrorKind, InterpResult, RuntimeError};
pub use eval::{DEFAULT_MAX_ARRAY_LEN, DEFAULT_MAX_CALL_DEPTH, Flow, Interpreter};
pub use native::{Linker, NativeArgs, NativeFunction, NativeModule, NativeResult, Natives};
pub use value::{FunctionHandle, Object, ObjectRef, Place, RuntimeValue};
