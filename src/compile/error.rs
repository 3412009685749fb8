//! Error types for compilation and for calling a compiled model.

use thiserror::Error;

use crate::backend::BackendError;

/// Raised while lowering a graph into a callable. These are model
/// structure errors, reported at compile time, never at call time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Two different predecessors claimed the same positional slot of
    /// one successor.
    #[error("two predecessors of `{node}` claim positional slot {slot}")]
    DuplicateArgument { node: String, slot: usize },

    /// The graph is not acyclic.
    #[error("cycle detected in model graph")]
    Cycle,

    /// A template hole was never filled by any operand.
    #[error("operand `{slot}` of node `{node}` was never bound")]
    UnboundSlot { node: String, slot: String },
}

/// Raised when calling a compiled model. Backend errors pass through
/// unchanged; the core never wraps or reinterprets them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("missing value for parameter `{0}`")]
    MissingParameter(String),

    #[error("expected at most {expected} arguments, got {given}")]
    TooManyArguments { expected: usize, given: usize },

    #[error("name `{0}` is not bound in the evaluation scope")]
    UnboundName(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
