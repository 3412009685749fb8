//! The model graph: a DAG of typed nodes with binding-typed edges.
//!
//! `ModelGraph` owns the graph and exposes only the mutation, query and
//! rewrite operations the compiler and conditioning tooling need; the
//! underlying petgraph structure is never part of the public surface.
//! Rewrites (`intervene`, `merge_models`) are copy-on-write: they build a
//! new graph with a fresh identity and leave the receiver untouched.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::edge::Edge;
use super::error::GraphError;
use super::node::{Node, NodeKind};
use crate::expr::{Expression, Value};

/// A stable identifier for a node within one graph.
pub type NodeId = petgraph::graph::NodeIndex<u32>;

/// Process-unique graph identities; the compiled-model cache keys on them.
static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_graph_id() -> u64 {
    NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed)
}

/// One entry of the operand list handed to `add_transformation` /
/// `add_randvar`. Graph references become edges; literal sub-expressions
/// are substituted into the template immediately and leave no edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Positional reference to a named node. Fills the slot matching its
    /// index in the operand list.
    Var(String),
    /// Positional reference to an existing node by id; how unnamed
    /// intermediates are consumed.
    Id(NodeId),
    /// Positional literal sub-expression.
    Lit(Expression),
    /// Keyword reference to a named node: `(key, node name)`.
    Kw(String, String),
    /// Keyword literal sub-expression.
    KwLit(String, Expression),
}

/// A positional value supplied to `merge_models` for one sub-model
/// argument, in the sub-model's argument order.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeArg {
    /// A literal value; the argument node becomes a constant.
    Value(Expression),
    /// The name of an existing node in the outer graph; the argument's
    /// consumers are rewired onto it.
    Var(String),
}

/// A probabilistic model as an explicit dependency graph.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelGraph {
    name: String,
    /// Unique per construction and per rewrite; never serialized, a
    /// deserialized graph gets a fresh identity.
    #[serde(skip, default = "fresh_graph_id")]
    id: u64,
    pub(crate) dag: StableDiGraph<Node, Edge>,
    by_name: HashMap<String, NodeId>,
    /// Authoritative graph-insertion order. Stable indices can be reused
    /// after a removal, so the order is tracked explicitly.
    insertion: Vec<NodeId>,
}

impl Clone for ModelGraph {
    /// A clone is a distinct graph and gets its own identity, so a
    /// mutated clone can never collide with its source in the
    /// compiled-model cache.
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            id: fresh_graph_id(),
            dag: self.dag.clone(),
            by_name: self.by_name.clone(),
            insertion: self.insertion.clone(),
        }
    }
}

impl Drop for ModelGraph {
    fn drop(&mut self) {
        crate::compile::cache::evict(self.id);
    }
}

impl ModelGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: fresh_graph_id(),
            dag: StableDiGraph::default(),
            by_name: HashMap::new(),
            insertion: Vec::new(),
        }
    }

    /// The model's identifying name, used to namespace inlined sub-graphs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph_id(&self) -> u64 {
        self.id
    }

    pub fn node_count(&self) -> usize {
        self.dag.node_count()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.dag[id]
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    // --- Construction ---

    fn insert_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if let Some(n) = &node.name {
            if self.by_name.contains_key(n) {
                return Err(GraphError::DuplicateName(n.clone()));
            }
        }
        let name = node.name.clone();
        let id = self.dag.add_node(node);
        if let Some(n) = name {
            self.by_name.insert(n, id);
        }
        self.insertion.push(id);
        Ok(id)
    }

    fn remove_node(&mut self, id: NodeId) {
        if let Some(node) = self.dag.remove_node(id) {
            if let Some(n) = node.name {
                self.by_name.remove(&n);
            }
            self.insertion.retain(|&x| x != id);
        }
    }

    /// Adds an input placeholder. A default that references an existing
    /// node is linked to it, so the compiled default can inline that
    /// node's value instead of a stale literal.
    pub fn add_argument(
        &mut self,
        name: &str,
        default: Option<Expression>,
    ) -> Result<NodeId, GraphError> {
        let default_pred = default.as_ref().and_then(|d| {
            d.references()
                .into_iter()
                .find_map(|r| self.lookup(r))
        });
        let id = self.insert_node(Node {
            name: Some(name.to_string()),
            is_returned: false,
            kind: NodeKind::Argument {
                default,
                is_random_variable: false,
            },
        })?;
        if let Some(pred) = default_pred {
            self.dag.add_edge(pred, id, Edge::positional(0));
        }
        Ok(id)
    }

    /// Adds a placeholder standing for an externally supplied random
    /// variable (the scored variable of a density function).
    pub fn add_rv_argument(&mut self, name: &str) -> Result<NodeId, GraphError> {
        self.insert_node(Node {
            name: Some(name.to_string()),
            is_returned: false,
            kind: NodeKind::Argument {
                default: None,
                is_random_variable: true,
            },
        })
    }

    /// Adds a constant holding a literal value-expression.
    pub fn add_variable(
        &mut self,
        name: &str,
        value: Expression,
        is_returned: bool,
    ) -> Result<NodeId, GraphError> {
        self.insert_node(Node {
            name: Some(name.to_string()),
            is_returned,
            kind: NodeKind::Constant { value },
        })
    }

    /// Adds a deterministic transformation over the given operands.
    pub fn add_transformation(
        &mut self,
        name: &str,
        template: Expression,
        args: Vec<Operand>,
        is_returned: bool,
    ) -> Result<NodeId, GraphError> {
        self.add_operation(Some(name), template, args, is_returned, false)
    }

    /// Adds a random variable: a distribution application over operands.
    pub fn add_randvar(
        &mut self,
        name: &str,
        dist: Expression,
        args: Vec<Operand>,
        is_returned: bool,
    ) -> Result<NodeId, GraphError> {
        self.add_operation(Some(name), dist, args, is_returned, true)
    }

    /// Adds an unnamed intermediate. It is never bound to a variable; the
    /// compiler folds its expression into the consumer's.
    pub fn add_inlined_transformation(
        &mut self,
        template: Expression,
        args: Vec<Operand>,
    ) -> Result<NodeId, GraphError> {
        self.add_operation(None, template, args, false, false)
    }

    fn add_operation(
        &mut self,
        name: Option<&str>,
        template: Expression,
        args: Vec<Operand>,
        is_returned: bool,
        random: bool,
    ) -> Result<NodeId, GraphError> {
        let rendered = template.render();
        let label = name.unwrap_or("<inlined>");

        // Resolve references eagerly; an unknown name fails here, before
        // the node is inserted, leaving the graph untouched.
        let mut lit_pos: BTreeMap<usize, Expression> = BTreeMap::new();
        let mut lit_kw: HashMap<String, Expression> = HashMap::new();
        let mut pos_refs: Vec<(NodeId, u32)> = Vec::new();
        let mut kw_refs: Vec<(NodeId, String)> = Vec::new();
        for (i, arg) in args.into_iter().enumerate() {
            match arg {
                Operand::Var(r) => {
                    let pid = self.lookup(&r).ok_or_else(|| GraphError::UndefinedReference {
                        reference: r.clone(),
                        node: label.to_string(),
                        expression: rendered.clone(),
                    })?;
                    pos_refs.push((pid, i as u32));
                }
                Operand::Id(pid) => {
                    if !self.dag.contains_node(pid) {
                        return Err(GraphError::UndefinedReference {
                            reference: format!("#{}", pid.index()),
                            node: label.to_string(),
                            expression: rendered.clone(),
                        });
                    }
                    pos_refs.push((pid, i as u32));
                }
                Operand::Lit(e) => {
                    lit_pos.insert(i, e);
                }
                Operand::Kw(key, r) => {
                    let pid = self.lookup(&r).ok_or_else(|| GraphError::UndefinedReference {
                        reference: r.clone(),
                        node: label.to_string(),
                        expression: rendered.clone(),
                    })?;
                    kw_refs.push((pid, key));
                }
                Operand::KwLit(key, e) => {
                    lit_kw.insert(key, e);
                }
            }
        }

        // Literal operands are baked into the template now; referenced
        // operands stay as holes the compiler fills from the edges.
        let template = if lit_pos.is_empty() && lit_kw.is_empty() {
            template
        } else {
            template.substitute(&lit_pos, &lit_kw)
        };

        let kind = if random {
            NodeKind::RandVar { template }
        } else {
            NodeKind::Transformation { template }
        };
        let id = self.insert_node(Node {
            name: name.map(str::to_string),
            is_returned,
            kind,
        })?;

        // One positional edge per predecessor, carrying all of its slots.
        let mut slots_by_pred: HashMap<NodeId, SmallVec<[u32; 2]>> = HashMap::new();
        for (pid, slot) in pos_refs {
            slots_by_pred.entry(pid).or_default().push(slot);
        }
        for (pid, slots) in slots_by_pred {
            self.dag.add_edge(pid, id, Edge::Positional { slots });
        }
        let mut keys_by_pred: HashMap<NodeId, SmallVec<[String; 1]>> = HashMap::new();
        for (pid, key) in kw_refs {
            keys_by_pred.entry(pid).or_default().push(key);
        }
        for (pid, keys) in keys_by_pred {
            self.dag.add_edge(pid, id, Edge::Keyword { keys });
        }
        Ok(id)
    }

    pub fn mark_as_returned(&mut self, name: &str) -> Result<(), GraphError> {
        let id = self
            .lookup(name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        self.dag[id].is_returned = true;
        Ok(())
    }

    // --- Queries ---

    /// All argument nodes, in graph-insertion order.
    pub fn arguments(&self) -> Vec<NodeId> {
        self.in_insertion_order(|n| n.is_argument())
    }

    /// All nodes marked as outputs, in graph-insertion order.
    pub fn returned_variables(&self) -> Vec<NodeId> {
        self.in_insertion_order(|n| n.is_returned)
    }

    /// All transformations and random variables, in graph-insertion order.
    pub fn variables(&self) -> Vec<NodeId> {
        self.in_insertion_order(|n| n.is_variable())
    }

    /// Random variables that are not returned: the candidates for
    /// posterior inference.
    pub fn posterior_variables(&self) -> Vec<NodeId> {
        self.in_insertion_order(|n| n.is_randvar() && !n.is_returned)
    }

    fn in_insertion_order(&self, keep: impl Fn(&Node) -> bool) -> Vec<NodeId> {
        self.insertion
            .iter()
            .copied()
            .filter(|&id| keep(&self.dag[id]))
            .collect()
    }

    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.dag.neighbors_directed(id, Direction::Incoming).collect()
    }

    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.dag.neighbors_directed(id, Direction::Outgoing).collect()
    }

    /// A node's Markov blanket: its parents, its children, and its
    /// children's other parents.
    pub fn markov_blanket(&self, name: &str) -> Result<BTreeSet<String>, GraphError> {
        let id = self
            .lookup(name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        let mut blanket = BTreeSet::new();
        let insert = |nid: NodeId, blanket: &mut BTreeSet<String>| {
            if nid != id {
                if let Some(n) = self.dag[nid].name() {
                    blanket.insert(n.to_string());
                }
            }
        };
        for p in self.dag.neighbors_directed(id, Direction::Incoming) {
            insert(p, &mut blanket);
        }
        for c in self.dag.neighbors_directed(id, Direction::Outgoing) {
            insert(c, &mut blanket);
            for cp in self.dag.neighbors_directed(c, Direction::Incoming) {
                insert(cp, &mut blanket);
            }
        }
        Ok(blanket)
    }

    // --- Rewrites ---

    /// The do-operator: clamps each named node to a constant and severs
    /// it from its causal parents, then prunes every weakly-connected
    /// component left without a returned node. Returns a new graph; the
    /// receiver is untouched.
    pub fn intervene(&self, bindings: &[(&str, Value)]) -> Result<ModelGraph, GraphError> {
        let mut out = self.clone();
        for (name, value) in bindings {
            let id = out
                .lookup(name)
                .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
            let incoming: Vec<_> = out
                .dag
                .edges_directed(id, Direction::Incoming)
                .map(|e| e.id())
                .collect();
            for eid in incoming {
                out.dag.remove_edge(eid);
            }
            let node = &mut out.dag[id];
            node.kind = NodeKind::Constant {
                value: Expression::Lit(value.clone()),
            };
        }
        out.prune_unreturned_components();
        Ok(out)
    }

    fn prune_unreturned_components(&mut self) {
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut doomed: Vec<NodeId> = Vec::new();
        for start in self.insertion.clone() {
            if !visited.insert(start) {
                continue;
            }
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(n) = queue.pop_front() {
                for m in self.dag.neighbors_undirected(n) {
                    if visited.insert(m) {
                        component.push(m);
                        queue.push_back(m);
                    }
                }
            }
            if !component.iter().any(|&n| self.dag[n].is_returned) {
                doomed.extend(component);
            }
        }
        for id in doomed {
            self.remove_node(id);
        }
    }

    /// Splices `sub` into this graph as the definition of `var_name`.
    ///
    /// The sub-graph's single returned node is demoted and renamed to
    /// `var_name`; every other sub-node name is namespaced with the
    /// sub-graph's name; `args` partially applies the sub-model's
    /// arguments, positionally in its argument order. One nesting level
    /// per call; repeated use composes.
    pub fn merge_models(
        &self,
        var_name: &str,
        sub: &ModelGraph,
        args: &[MergeArg],
    ) -> Result<ModelGraph, GraphError> {
        let returned = sub.returned_variables();
        if returned.len() != 1 {
            return Err(GraphError::MalformedSubModel {
                model: sub.name.clone(),
                returned: returned.len(),
            });
        }
        let ret_id = returned[0];

        // Namespacing map over the sub-graph's names. Applied to node
        // identities, expressions and (through id mapping) edges alike.
        let mut renames: HashMap<String, String> = HashMap::new();
        for &sid in &sub.insertion {
            if let Some(n) = sub.dag[sid].name() {
                let new = if sid == ret_id {
                    var_name.to_string()
                } else {
                    format!("{}_{}", n, sub.name)
                };
                renames.insert(n.to_string(), new);
            }
        }

        // Partial application of the sub-model's arguments.
        enum Plan {
            Constant(Expression),
            Alias(NodeId),
        }
        let mut plans: HashMap<NodeId, Plan> = HashMap::new();
        for (i, &aid) in sub.arguments().iter().enumerate() {
            let arg = &sub.dag[aid];
            let pname = arg.name().expect("arguments always carry a name");
            match args.get(i) {
                Some(MergeArg::Value(expr)) => {
                    plans.insert(aid, Plan::Constant(expr.clone()));
                }
                Some(MergeArg::Var(outer)) => {
                    let oid = self
                        .lookup(outer)
                        .ok_or_else(|| GraphError::UnknownNode(outer.clone()))?;
                    renames.insert(pname.to_string(), outer.clone());
                    plans.insert(aid, Plan::Alias(oid));
                }
                None => {
                    if !arg.has_default() {
                        return Err(GraphError::MissingArgument {
                            model: sub.name.clone(),
                            parameter: pname.to_string(),
                        });
                    }
                }
            }
        }

        // Union: copy the renamed sub-nodes, then the edges. Aliased
        // arguments are not copied; their outgoing edges are rewired onto
        // the outer node. Substituted arguments lose their inputs.
        let mut out = self.clone();
        let mut idmap: HashMap<NodeId, NodeId> = HashMap::new();
        for &sid in &sub.insertion {
            if let Some(Plan::Alias(oid)) = plans.get(&sid) {
                idmap.insert(sid, *oid);
                continue;
            }
            let mut node = sub.dag[sid].clone();
            node.name = if sid == ret_id {
                Some(var_name.to_string())
            } else {
                node.name
                    .map(|n| renames.get(&n).cloned().unwrap_or(n))
            };
            if sid == ret_id {
                node.is_returned = false;
            }
            match plans.get(&sid) {
                Some(Plan::Constant(expr)) => {
                    // The supplied value lives in the outer scope; it is
                    // not subject to the sub-graph's renaming.
                    node.kind = NodeKind::Constant {
                        value: expr.clone(),
                    };
                }
                _ => node.rename_references(&renames),
            }
            let nid = out.insert_node(node)?;
            idmap.insert(sid, nid);
        }
        for &sid in &sub.insertion {
            for edge in sub.dag.edges_directed(sid, Direction::Outgoing) {
                let target = edge.target();
                // A substituted or aliased argument severs its old inputs.
                if plans.contains_key(&target) {
                    continue;
                }
                out.dag
                    .add_edge(idmap[&sid], idmap[&target], edge.weight().clone());
            }
        }
        Ok(out)
    }

    // --- Persistence ---

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<ModelGraph> {
        serde_json::from_str(json)
    }
}
