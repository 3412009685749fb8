//! Lowers a model graph into a directly callable artifact.
pub(crate) mod cache;
pub mod compiler;
pub mod error;
pub mod program;

pub use compiler::{compile, RNG_STATE};
pub use error::{CompileError, EvalError};
pub use program::{CompiledModel, Param};
