//! The boundary to the numeric/distribution layer.
//!
//! The core decides what is computed, in what order, with what bindings;
//! the arithmetic and sampling primitives themselves live behind this
//! trait. Errors a primitive raises are propagated to the caller
//! unchanged, never wrapped or reinterpreted.

use thiserror::Error;

use crate::expr::Value;

/// An error raised by an externally supplied primitive operation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Supplies the primitive operations a compiled model applies.
///
/// Every `Call` expression the compiler emits is resolved through `apply`;
/// the core never interprets the function name itself.
pub trait Backend {
    fn apply(
        &self,
        func: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value, BackendError>;
}
