//! Lowers a model graph into a `CompiledModel`.
//!
//! The compiler computes one topological evaluation order, assembles the
//! parameter list under a fixed precedence contract, and recursively
//! expands each node's expression, folding unnamed intermediates into
//! their consumers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use super::cache;
use super::error::CompileError;
use super::program::{CompiledModel, Param};
use crate::display::source;
use crate::expr::Expression;
use crate::graph::{Edge, ModelGraph, NodeId};

/// The reserved name of the generator-state argument. When present, it is
/// always the compiled function's first parameter.
pub const RNG_STATE: &str = "rng_key";

/// Compiles `graph` into a callable model named `fn_name`.
///
/// Parameter order is fixed: the generator-state argument first (if the
/// graph declares one), then required arguments in graph-insertion order,
/// then random-variable inputs in *reverse* insertion order, then
/// defaulted arguments in insertion order.
///
/// Note the reversal: random-variable inputs are fed in the opposite of
/// the order they were inserted. Density-compiling front-ends insert the
/// scored variables deepest-first, and downstream consumers rely on
/// receiving them in natural dependency order.
///
/// Results are cached per `(graph identity, fn_name)`; recompiling an
/// unmodified graph returns the same artifact. Rewrites produce graphs
/// with fresh identities and therefore always recompile.
pub fn compile(graph: &ModelGraph, fn_name: &str) -> Result<Arc<CompiledModel>, CompileError> {
    if let Some(hit) = cache::lookup(graph.graph_id(), fn_name) {
        return Ok(hit);
    }
    let compiled = Arc::new(lower(graph, fn_name)?);
    cache::store(graph.graph_id(), fn_name, compiled.clone());
    Ok(compiled)
}

fn lower(graph: &ModelGraph, fn_name: &str) -> Result<CompiledModel, CompileError> {
    let params = parameter_list(graph);

    // Every binding statement corresponds to one named node; a
    // topological sort makes each binding refer only to earlier ones.
    let order = toposort(&graph.dag, None).map_err(|_| CompileError::Cycle)?;

    let mut bindings = Vec::new();
    let mut returns = Vec::new();
    for id in order {
        let node = graph.node(id);
        let Some(name) = node.name() else {
            // Unnamed intermediates are folded into their consumers.
            continue;
        };
        if !node.is_argument() {
            bindings.push((name.to_string(), compile_op(graph, id)?));
        }
        if node.is_returned {
            returns.push(name.to_string());
        }
    }

    let source = source::render(fn_name, &params, &bindings, &returns);
    Ok(CompiledModel::new(fn_name, params, bindings, returns, source))
}

/// Assembles the parameter list under the fixed precedence contract.
fn parameter_list(graph: &ModelGraph) -> Vec<Param> {
    let args = graph.arguments();
    let mut params = Vec::new();

    // 1. Generator state.
    for &id in &args {
        if graph.node(id).name() == Some(RNG_STATE) {
            params.push(compile_placeholder(graph, id));
        }
    }
    // 2. Required arguments, in insertion order.
    for &id in &args {
        let node = graph.node(id);
        if !node.is_random_variable() && node.name() != Some(RNG_STATE) && !node.has_default() {
            params.push(compile_placeholder(graph, id));
        }
    }
    // 3. Random-variable inputs, in reverse insertion order.
    for &id in args.iter().rev() {
        if graph.node(id).is_random_variable() {
            params.push(compile_placeholder(graph, id));
        }
    }
    // 4. Defaulted arguments, in insertion order.
    for &id in &args {
        let node = graph.node(id);
        if !node.is_random_variable() && node.name() != Some(RNG_STATE) && node.has_default() {
            params.push(compile_placeholder(graph, id));
        }
    }
    params
}

/// Compiles one argument node into a parameter.
///
/// A predecessor (a constant the default refers to) contributes its own
/// value expression, so the parameter's default inlines the constant
/// rather than keeping a dangling reference.
fn compile_placeholder(graph: &ModelGraph, id: NodeId) -> Param {
    let node = graph.node(id);
    let name = node
        .name()
        .expect("arguments always carry a name")
        .to_string();

    let no_pos = BTreeMap::new();
    let no_kw = HashMap::new();
    let supplied = graph
        .predecessors(id)
        .into_iter()
        .next()
        .map(|pred| graph.node(pred).produce_expression(&no_pos, &no_kw));

    let default = if let Some(expr) = supplied {
        let mut pos = BTreeMap::new();
        pos.insert(0, expr);
        Some(node.produce_expression(&pos, &no_kw))
    } else if node.has_default() {
        Some(node.produce_expression(&no_pos, &no_kw))
    } else {
        None
    };
    Param { name, default }
}

/// Recursively expands a node's expression from its predecessor edges.
///
/// A named predecessor is referenced by name; its own binding is already
/// scheduled earlier in the topological walk. An unnamed predecessor is
/// expanded in place, so chains like `f(g(x))` compile without an
/// intermediate binding.
fn compile_op(graph: &ModelGraph, id: NodeId) -> Result<Expression, CompileError> {
    let mut pos: BTreeMap<usize, Expression> = BTreeMap::new();
    let mut kw: HashMap<String, Expression> = HashMap::new();

    for edge in graph.dag.edges_directed(id, Direction::Incoming) {
        let pred = edge.source();
        let operand = match graph.node(pred).name() {
            Some(n) => Expression::name(n),
            None => compile_op(graph, pred)?,
        };
        match edge.weight() {
            Edge::Positional { slots } => {
                for &slot in slots {
                    if pos.insert(slot as usize, operand.clone()).is_some() {
                        return Err(CompileError::DuplicateArgument {
                            node: label(graph, id),
                            slot: slot as usize,
                        });
                    }
                }
            }
            Edge::Keyword { keys } => {
                // Last writer wins when a key is bound more than once.
                for key in keys {
                    kw.insert(key.clone(), operand.clone());
                }
            }
        }
    }

    let expr = graph.node(id).produce_expression(&pos, &kw);
    if let Some(hole) = expr.first_hole() {
        return Err(CompileError::UnboundSlot {
            node: label(graph, id),
            slot: hole,
        });
    }
    Ok(expr)
}

fn label(graph: &ModelGraph, id: NodeId) -> String {
    graph.node(id).name().unwrap_or("<inlined>").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Value;
    use crate::graph::{Edge, MergeArg, Operand};
    use crate::test_util::Arith;

    fn binop(op: &str) -> Expression {
        Expression::call(op, vec![Expression::slot(0), Expression::slot(1)])
    }

    /// `y = add(mul(a, x), b)`, with the product kept as an unnamed
    /// intermediate.
    fn linear_model() -> ModelGraph {
        let mut g = ModelGraph::new("linear");
        g.add_argument("a", None).unwrap();
        g.add_argument("b", None).unwrap();
        g.add_argument("x", None).unwrap();
        let prod = g
            .add_inlined_transformation(
                binop("mul"),
                vec![Operand::Var("a".into()), Operand::Var("x".into())],
            )
            .unwrap();
        g.add_transformation(
            "y",
            binop("add"),
            vec![Operand::Id(prod), Operand::Var("b".into())],
            true,
        )
        .unwrap();
        g
    }

    #[test]
    fn parameter_order_follows_the_contract() {
        let mut g = ModelGraph::new("m");
        g.add_argument(RNG_STATE, None).unwrap();
        g.add_argument("a", None).unwrap();
        g.add_argument("b", None).unwrap();
        // Random-variable inputs inserted y first, then x.
        g.add_rv_argument("y").unwrap();
        g.add_rv_argument("x").unwrap();
        g.add_argument("c", Some(Expression::scalar(3.0))).unwrap();

        let model = compile(&g, "logpdf").unwrap();
        let names: Vec<&str> = model.params().iter().map(|p| p.name.as_str()).collect();
        // rv inputs come out reversed relative to insertion order.
        assert_eq!(names, [RNG_STATE, "a", "b", "x", "y", "c"]);
        assert_eq!(
            model.params().last().unwrap().default,
            Some(Expression::scalar(3.0))
        );
    }

    #[test]
    fn bindings_are_in_topological_order() {
        let mut g = ModelGraph::new("m");
        g.add_variable("w", Expression::scalar(1.0), false).unwrap();
        g.add_transformation("s", binop("add"), vec![
            Operand::Var("w".into()),
            Operand::Lit(Expression::scalar(1.0)),
        ], false)
        .unwrap();
        g.add_transformation("t", binop("mul"), vec![
            Operand::Var("s".into()),
            Operand::Var("w".into()),
        ], true)
        .unwrap();

        let model = compile(&g, "forward").unwrap();
        let mut seen: Vec<&str> = Vec::new();
        for (name, expr) in model.bindings() {
            for r in expr.references() {
                assert!(seen.contains(&r), "`{name}` references `{r}` before its binding");
            }
            seen.push(name);
        }
        assert_eq!(seen, ["w", "s", "t"]);
    }

    #[test]
    fn unnamed_intermediates_fold_into_their_consumer() {
        let model = compile(&linear_model(), "forward").unwrap();
        assert_eq!(model.bindings().len(), 1);
        assert_eq!(model.bindings()[0].0, "y");
        assert_eq!(model.bindings()[0].1.render(), "add(mul(a, x), b)");
    }

    #[test]
    fn compiled_linear_model_evaluates() {
        let model = compile(&linear_model(), "forward").unwrap();
        let out = model
            .call(
                &Arith,
                &[Value::Scalar(2.0), Value::Scalar(1.0), Value::Scalar(10.0)],
            )
            .unwrap();
        // 2 * 10 + 1
        assert_eq!(out.as_slice(), &[Value::Scalar(21.0)]);
    }

    #[test]
    fn duplicate_positional_slots_fail_at_compile_time() {
        let mut g = ModelGraph::new("m");
        g.add_variable("w1", Expression::scalar(1.0), false).unwrap();
        g.add_transformation(
            "t",
            Expression::call("exp", vec![Expression::slot(0)]),
            vec![Operand::Var("w1".into())],
            true,
        )
        .unwrap();
        let w2 = g.add_variable("w2", Expression::scalar(2.0), false).unwrap();
        // Force a second claim on slot 0; construction itself cannot
        // produce one, and the compiler must reject it.
        let t = g.lookup("t").unwrap();
        g.dag.add_edge(w2, t, Edge::positional(0));

        assert_eq!(
            compile(&g, "forward").unwrap_err(),
            CompileError::DuplicateArgument {
                node: "t".into(),
                slot: 0,
            }
        );
    }

    #[test]
    fn unfilled_template_holes_fail_at_compile_time() {
        let mut g = ModelGraph::new("m");
        g.add_variable("w", Expression::scalar(1.0), false).unwrap();
        g.add_transformation("t", binop("add"), vec![Operand::Var("w".into())], true)
            .unwrap();
        assert_eq!(
            compile(&g, "forward").unwrap_err(),
            CompileError::UnboundSlot {
                node: "t".into(),
                slot: "$1".into(),
            }
        );
    }

    #[test]
    fn defaults_may_reference_previously_defined_constants() {
        let mut g = ModelGraph::new("m");
        g.add_variable("w", Expression::scalar(9.0), false).unwrap();
        g.add_argument("c", Some(Expression::name("w"))).unwrap();
        g.add_transformation("t", binop("add"), vec![
            Operand::Var("c".into()),
            Operand::Lit(Expression::scalar(1.0)),
        ], true)
        .unwrap();

        let model = compile(&g, "forward").unwrap();
        // The constant's value is inlined into the parameter default.
        let c = model.params().iter().find(|p| p.name == "c").unwrap();
        assert_eq!(c.default, Some(Expression::scalar(9.0)));
        let out = model.call(&Arith, &[]).unwrap();
        assert_eq!(out.as_slice(), &[Value::Scalar(10.0)]);
    }

    #[test]
    fn multiple_returns_come_out_in_statement_order() {
        let mut g = ModelGraph::new("m");
        g.add_variable("w", Expression::scalar(2.0), true).unwrap();
        g.add_transformation("t", binop("mul"), vec![
            Operand::Var("w".into()),
            Operand::Lit(Expression::scalar(3.0)),
        ], true)
        .unwrap();

        let model = compile(&g, "forward").unwrap();
        assert_eq!(model.returns(), ["w", "t"]);
        let out = model.call(&Arith, &[]).unwrap();
        assert_eq!(out.as_slice(), &[Value::Scalar(2.0), Value::Scalar(6.0)]);
    }

    #[test]
    fn keyword_operands_bind_by_key() {
        let mut g = ModelGraph::new("m");
        g.add_variable("mu", Expression::scalar(1.0), false).unwrap();
        g.add_randvar(
            "y",
            Expression::call_kw(
                "normal",
                vec![],
                vec![
                    ("mu".into(), Expression::kw_slot("mu")),
                    ("sigma".into(), Expression::kw_slot("sigma")),
                ],
            ),
            vec![
                Operand::Kw("mu".into(), "mu".into()),
                Operand::KwLit("sigma".into(), Expression::scalar(0.5)),
            ],
            true,
        )
        .unwrap();

        let model = compile(&g, "sample").unwrap();
        assert_eq!(model.bindings()[1].1.render(), "normal(mu = mu, sigma = 0.5)");
        let out = model.call(&Arith, &[]).unwrap();
        assert_eq!(out.as_slice(), &[Value::Scalar(1.5)]);
    }

    #[test]
    fn recompiling_an_unmodified_graph_hits_the_cache() {
        let g = linear_model();
        let first = compile(&g, "forward").unwrap();
        let second = compile(&g, "forward").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // A different target kind is a distinct artifact.
        let density = compile(&g, "logpdf").unwrap();
        assert!(!Arc::ptr_eq(&first, &density));
    }

    #[test]
    fn rewrites_always_recompile() {
        let mut g = ModelGraph::new("m");
        g.add_variable("w", Expression::scalar(1.0), false).unwrap();
        g.add_transformation("t", binop("add"), vec![
            Operand::Var("w".into()),
            Operand::Lit(Expression::scalar(1.0)),
        ], true)
        .unwrap();

        let before = compile(&g, "forward").unwrap();
        let clamped = g.intervene(&[("t", Value::Scalar(7.0))]).unwrap();
        let after = compile(&clamped, "forward").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.call(&Arith, &[]).unwrap().as_slice(), &[Value::Scalar(7.0)]);
    }

    #[test]
    fn intervened_models_drop_severed_parameters() {
        // x feeds only m; clamping m makes x's component prunable, so the
        // compiled function no longer declares it.
        let mut g = ModelGraph::new("m");
        g.add_argument("x", None).unwrap();
        g.add_transformation("m", binop("add"), vec![
            Operand::Var("x".into()),
            Operand::Lit(Expression::scalar(1.0)),
        ], false)
        .unwrap();
        g.add_transformation("y", binop("mul"), vec![
            Operand::Var("m".into()),
            Operand::Lit(Expression::scalar(2.0)),
        ], true)
        .unwrap();

        let clamped = g.intervene(&[("m", Value::Scalar(5.0))]).unwrap();
        let model = compile(&clamped, "forward").unwrap();
        assert!(model.params().is_empty());
        assert_eq!(model.call(&Arith, &[]).unwrap().as_slice(), &[Value::Scalar(10.0)]);
    }

    #[test]
    fn merged_sub_model_compiles_with_the_applied_value() {
        let mut sub = ModelGraph::new("shift");
        sub.add_argument("p", None).unwrap();
        sub.add_transformation("r", binop("add"), vec![
            Operand::Var("p".into()),
            Operand::Lit(Expression::scalar(1.0)),
        ], true)
        .unwrap();

        let outer = ModelGraph::new("outer");
        let mut merged = outer
            .merge_models("z", &sub, &[MergeArg::Value(Expression::scalar(5.0))])
            .unwrap();
        merged.mark_as_returned("z").unwrap();

        let model = compile(&merged, "forward").unwrap();
        assert!(model.params().is_empty());
        assert_eq!(
            model.call(&Arith, &[]).unwrap().as_slice(),
            &[Value::Scalar(6.0)]
        );
    }
}
