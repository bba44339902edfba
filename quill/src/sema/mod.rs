//! Semantic passes that run before type checking
//!
//! - [`registrar`]: records top-level declarations and directive targets
//! - [`binder`]: attaches declarations to every name and resolves written types

pub mod binder;
pub mod registrar;

pub use binder::bind;
pub use registrar::{Registration, register};
