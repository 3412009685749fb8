//! Node types for the model graph.
//!
//! A node is the "skeleton" of one model quantity: it records how the
//! quantity's expression is produced from its operands. Values only exist
//! once a compiled model is called.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::expr::Expression;

/// The closed set of node contents.
///
/// Dispatch on the variant happens at exactly two points: expression
/// production below, and the compiler's topological walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// An input placeholder of the compiled function.
    Argument {
        default: Option<Expression>,
        /// True when the argument stands for a random variable supplied
        /// externally (a density function's scored variable).
        is_random_variable: bool,
    },
    /// A fixed literal value.
    Constant { value: Expression },
    /// A deterministic expression over named operands.
    Transformation { template: Expression },
    /// A distribution application over named operands.
    RandVar { template: Expression },
}

/// One node of a [`ModelGraph`](crate::graph::ModelGraph).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within a graph; `None` for an unnamed/inlined intermediate.
    pub name: Option<String>,
    /// Marks nodes whose value is an output of the compiled function.
    pub is_returned: bool,
    pub kind: NodeKind,
}

impl Node {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_argument(&self) -> bool {
        matches!(self.kind, NodeKind::Argument { .. })
    }

    /// Transformations and random variables; the model's variables.
    pub fn is_variable(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Transformation { .. } | NodeKind::RandVar { .. }
        )
    }

    pub fn is_randvar(&self) -> bool {
        matches!(self.kind, NodeKind::RandVar { .. })
    }

    pub fn is_random_variable(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Argument {
                is_random_variable: true,
                ..
            }
        )
    }

    pub fn has_default(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Argument {
                default: Some(_),
                ..
            }
        )
    }

    /// Produces this node's expression from its resolved operands.
    ///
    /// Positional operands are keyed by slot index, keyword operands by
    /// key. A constant ignores its operands; an argument yields the
    /// supplied operand, else its default, else a reference to itself;
    /// expression-bearing nodes substitute operands into their template.
    pub fn produce_expression(
        &self,
        pos: &BTreeMap<usize, Expression>,
        kw: &HashMap<String, Expression>,
    ) -> Expression {
        match &self.kind {
            NodeKind::Constant { value } => value.clone(),
            NodeKind::Argument { default, .. } => {
                if let Some(supplied) = pos.get(&0) {
                    supplied.clone()
                } else if let Some(default) = default {
                    default.clone()
                } else {
                    let name = self.name().expect("arguments always carry a name");
                    Expression::name(name)
                }
            }
            NodeKind::Transformation { template } | NodeKind::RandVar { template } => {
                template.substitute(pos, kw)
            }
        }
    }

    /// Rewrites every name reference inside this node's expressions.
    /// Used by `merge_models` when namespacing an inlined sub-graph.
    pub(crate) fn rename_references(&mut self, map: &HashMap<String, String>) {
        match &mut self.kind {
            NodeKind::Argument { default, .. } => {
                if let Some(d) = default {
                    *d = d.renamed(map);
                }
            }
            NodeKind::Constant { value } => *value = value.renamed(map),
            NodeKind::Transformation { template } | NodeKind::RandVar { template } => {
                *template = template.renamed(map);
            }
        }
    }
}
