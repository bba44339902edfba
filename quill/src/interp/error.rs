//! Runtime errors for the interpreter

use thiserror::Error;

use crate::ast::Span;
use crate::error::CompileError;

/// Kinds of runtime errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Member access, indexing or call through `nil`
    NilDereference,
    /// Reference to an object that no longer exists
    DanglingReference,
    /// Read of a slot that was never written
    Uninitialized,
    IndexOutOfBounds,
    NegativeArraySize,
    /// Array with more elements than the interpreter allows
    ArrayTooLarge,
    DivisionByZero,
    /// Native prototype without a bound implementation
    UnboundNative,
    /// Failure reported by a native implementation
    Native,
    /// Non-void function finished without `return`
    MissingReturn,
    StackOverflow,
    /// Evaluator reached a state the checker should have ruled out
    Internal,
}

/// Runtime error during interpretation
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<Span>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), span: None }
    }

    pub fn nil_dereference(what: &str) -> Self {
        Self::new(ErrorKind::NilDereference, format!("{what} on nil"))
    }

    pub fn dangling_reference() -> Self {
        Self::new(ErrorKind::DanglingReference, "reference to an object that no longer exists")
    }

    pub fn uninitialized() -> Self {
        Self::new(ErrorKind::Uninitialized, "read of an uninitialized value")
    }

    pub fn used_before_declaration(name: &str) -> Self {
        Self::new(ErrorKind::Uninitialized, format!("'{name}' is used before its declaration runs"))
    }

    pub fn index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::new(
            ErrorKind::IndexOutOfBounds,
            format!("index {index} out of bounds for length {len}"),
        )
    }

    pub fn negative_array_size(size: i64) -> Self {
        Self::new(ErrorKind::NegativeArraySize, format!("negative array size {size}"))
    }

    pub fn array_too_large(sizes: &[i64], limit: usize) -> Self {
        let dims: Vec<String> = sizes.iter().map(|n| format!("[{n}]")).collect();
        Self::new(
            ErrorKind::ArrayTooLarge,
            format!("array {} exceeds the limit of {limit} elements", dims.concat()),
        )
    }

    pub fn division_by_zero() -> Self {
        Self::new(ErrorKind::DivisionByZero, "division by zero")
    }

    pub fn unbound_native(signature: &str) -> Self {
        Self::new(
            ErrorKind::UnboundNative,
            format!("native function '{signature}' has no implementation"),
        )
    }

    pub fn native(signature: &str, message: &str) -> Self {
        Self::new(ErrorKind::Native, format!("native function '{signature}' failed: {message}"))
    }

    pub fn missing_return(name: &str) -> Self {
        Self::new(
            ErrorKind::MissingReturn,
            format!("function '{name}' finished without returning a value"),
        )
    }

    pub fn stack_overflow(limit: usize) -> Self {
        Self::new(ErrorKind::StackOverflow, format!("stack overflow: call depth exceeded {limit}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach `span` unless a more precise location is already known
    pub fn at(mut self, span: Span) -> Self {
        self.span.get_or_insert(span);
        self
    }

    pub fn into_compile_error(self, fallback: Span) -> CompileError {
        CompileError::runtime(self.message, self.span.unwrap_or(fallback))
    }
}

/// Result type for interpreter operations
pub type InterpResult<T> = Result<T, RuntimeError>;
