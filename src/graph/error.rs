//! Error types for model-graph construction and rewriting.
//!
//! All of these are raised eagerly at the offending operation, never
//! deferred to compilation or execution, and carry enough context to be
//! shown to a model author directly.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An expression referenced a name absent from the graph at the time
    /// the node was defined.
    #[error("variable `{reference}` referenced in `{node} ~ {expression}` is undefined")]
    UndefinedReference {
        reference: String,
        node: String,
        expression: String,
    },

    /// An operation addressed a node name that does not exist.
    #[error("node `{0}` does not exist in the graph")]
    UnknownNode(String),

    /// Node names must be unique within one graph.
    #[error("node `{0}` is already defined")]
    DuplicateName(String),

    /// `merge_models` inlined a sub-model argument with neither a supplied
    /// value nor a default.
    #[error("sub-model `{model}` is missing a value for parameter `{parameter}`")]
    MissingArgument { model: String, parameter: String },

    /// A sub-model handed to `merge_models` must return exactly one node.
    #[error("sub-model `{model}` must return exactly one variable, found {returned}")]
    MalformedSubModel { model: String, returned: usize },
}
