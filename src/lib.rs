//! Core graph representation and compiler for probabilistic models.
//!
//! A model is built as an explicit dependency graph
//! ([`graph::ModelGraph`]) of arguments, constants, random variables and
//! deterministic transformations, optionally rewritten
//! ([`ModelGraph::intervene`](graph::ModelGraph::intervene),
//! [`ModelGraph::merge_models`](graph::ModelGraph::merge_models)), then
//! lowered by [`compile`] into a callable that evaluates the model
//! through an externally supplied [`Backend`].
//!
//! The crate performs no numerical computation itself: it decides what is
//! computed, in what order, with what argument bindings, and composes
//! expressions the backend's primitives evaluate.

pub mod backend;
pub mod compile;
pub mod display;
pub mod expr;
pub mod graph;

#[cfg(test)]
pub(crate) mod test_util;

pub use backend::{Backend, BackendError};
pub use compile::{compile, CompileError, CompiledModel, EvalError, Param, RNG_STATE};
pub use expr::{Expression, Value};
pub use graph::{Edge, GraphError, MergeArg, ModelGraph, Node, NodeId, NodeKind, Operand};
