//! Defines the model graph: nodes, binding-typed edges and the DAG container.
pub mod dag;
pub mod edge;
pub mod error;
pub mod node;

// Re-export key types for convenient access
pub use dag::{MergeArg, ModelGraph, NodeId, Operand};
pub use edge::Edge;
pub use error::GraphError;
pub use node::{Node, NodeKind};
