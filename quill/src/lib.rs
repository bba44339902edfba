//! Quill Library
//!
//! Embeddable scripting language with a C-like syntax, classes with
//! destructors, overloading and native functions supplied by the host.
//!
//! A [`Session`] keeps declarations alive between runs:
//!
//! ```
//! use quill::{RuntimeValue, Session};
//!
//! let mut session = Session::default();
//! assert!(session.run("int a = 3;").is_success());
//! assert!(session.run("a = a + 1; a;").is_success());
//! assert!(matches!(session.result(), RuntimeValue::Int(4)));
//! ```

pub mod ast;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod resolver;
pub mod sema;
pub mod session;
pub mod stdio;
pub mod symbols;
pub mod types;
pub mod util;

pub use ast::Span;
pub use error::{CompileError, Result, Status};
pub use interp::{NativeArgs, NativeModule, RuntimeValue};
pub use session::{RunResult, Session, SessionConfig};
