//! Expression trees composed by the graph and evaluated by compiled models.
//!
//! An `Expression` is the value representation that nodes produce and the
//! compiler composes. The core never interprets a `Call` itself; every
//! application is handed to the externally supplied [`Backend`] when a
//! compiled model runs.
//!
//! [`Backend`]: crate::backend::Backend

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A literal payload carried through the graph without inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Scalar(f64),
    /// Shared vector data. Cloning is cheap.
    Series(Arc<Vec<f64>>),
    /// Opaque random-generator state.
    Key(u64),
}

impl Value {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// Flattens the value into a plain vector at the API boundary.
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Value::Scalar(s) => vec![*s],
            Value::Series(s) => s.to_vec(),
            Value::Key(k) => vec![*k as f64],
        }
    }
}

/// An owned expression tree.
///
/// `Slot` and `KwSlot` are holes: they stand for operands a node receives
/// at expression-production time. A finished (compiled) expression contains
/// no holes; the compiler rejects any that survive expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// A literal value.
    Lit(Value),
    /// A reference to a bound variable or parameter.
    Name(String),
    /// A positional hole. `Slot(i)` is filled by the i-th operand.
    Slot(usize),
    /// A keyword hole, filled by the operand bound under that key.
    KwSlot(String),
    /// Application of an externally defined primitive.
    Call {
        func: String,
        args: Vec<Expression>,
        kwargs: Vec<(String, Expression)>,
    },
}

impl Expression {
    pub fn scalar(v: f64) -> Self {
        Expression::Lit(Value::Scalar(v))
    }

    pub fn series(v: Vec<f64>) -> Self {
        Expression::Lit(Value::Series(Arc::new(v)))
    }

    pub fn name(n: impl Into<String>) -> Self {
        Expression::Name(n.into())
    }

    pub fn slot(i: usize) -> Self {
        Expression::Slot(i)
    }

    pub fn kw_slot(k: impl Into<String>) -> Self {
        Expression::KwSlot(k.into())
    }

    pub fn call(func: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call {
            func: func.into(),
            args,
            kwargs: Vec::new(),
        }
    }

    pub fn call_kw(
        func: impl Into<String>,
        args: Vec<Expression>,
        kwargs: Vec<(String, Expression)>,
    ) -> Self {
        Expression::Call {
            func: func.into(),
            args,
            kwargs,
        }
    }

    /// Fills holes from the given operand maps. Holes with no matching
    /// operand are left in place for the caller to detect.
    pub fn substitute(
        &self,
        pos: &BTreeMap<usize, Expression>,
        kw: &HashMap<String, Expression>,
    ) -> Expression {
        match self {
            Expression::Slot(i) => pos.get(i).cloned().unwrap_or_else(|| self.clone()),
            Expression::KwSlot(k) => kw.get(k).cloned().unwrap_or_else(|| self.clone()),
            Expression::Call { func, args, kwargs } => Expression::Call {
                func: func.clone(),
                args: args.iter().map(|a| a.substitute(pos, kw)).collect(),
                kwargs: kwargs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.substitute(pos, kw)))
                    .collect(),
            },
            other => other.clone(),
        }
    }

    /// Rewrites every `Name` reference through the given map. Names absent
    /// from the map are kept as-is.
    pub fn renamed(&self, map: &HashMap<String, String>) -> Expression {
        match self {
            Expression::Name(n) => match map.get(n) {
                Some(new) => Expression::Name(new.clone()),
                None => self.clone(),
            },
            Expression::Call { func, args, kwargs } => Expression::Call {
                func: func.clone(),
                args: args.iter().map(|a| a.renamed(map)).collect(),
                kwargs: kwargs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.renamed(map)))
                    .collect(),
            },
            other => other.clone(),
        }
    }

    /// All names this expression references, in traversal order.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Name(n) => out.push(n.as_str()),
            Expression::Call { args, kwargs, .. } => {
                for a in args {
                    a.collect_references(out);
                }
                for (_, v) in kwargs {
                    v.collect_references(out);
                }
            }
            _ => {}
        }
    }

    /// The first unfilled hole, rendered for diagnostics (`$0`, `$mu`).
    pub fn first_hole(&self) -> Option<String> {
        match self {
            Expression::Slot(i) => Some(format!("${}", i)),
            Expression::KwSlot(k) => Some(format!("${}", k)),
            Expression::Call { args, kwargs, .. } => args
                .iter()
                .find_map(Expression::first_hole)
                .or_else(|| kwargs.iter().find_map(|(_, v)| v.first_hole())),
            _ => None,
        }
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Expression::Lit(Value::Scalar(s)) => {
                let _ = write!(out, "{}", s);
            }
            Expression::Lit(Value::Series(s)) => {
                out.push('[');
                for (i, v) in s.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{}", v);
                }
                out.push(']');
            }
            Expression::Lit(Value::Key(k)) => {
                let _ = write!(out, "key({})", k);
            }
            Expression::Name(n) => out.push_str(n),
            Expression::Slot(i) => {
                let _ = write!(out, "${}", i);
            }
            Expression::KwSlot(k) => {
                let _ = write!(out, "${}", k);
            }
            Expression::Call { func, args, kwargs } => {
                out.push_str(func);
                out.push('(');
                let mut first = true;
                for a in args {
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                    a.render_into(out);
                }
                for (k, v) in kwargs {
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                    out.push_str(k);
                    out.push_str(" = ");
                    v.render_into(out);
                }
                out.push(')');
            }
        }
    }

    /// Source-ish text of the expression, used in errors and rendered models.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pos(entries: &[(usize, Expression)]) -> BTreeMap<usize, Expression> {
        entries.iter().cloned().collect()
    }

    #[test]
    fn substitute_fills_positional_and_keyword_holes() {
        let template = Expression::call_kw(
            "normal",
            vec![Expression::slot(0)],
            vec![("sigma".into(), Expression::kw_slot("sigma"))],
        );
        let mut kw = HashMap::new();
        kw.insert("sigma".to_string(), Expression::scalar(1.0));
        let filled = template.substitute(&pos(&[(0, Expression::name("mu"))]), &kw);
        assert_eq!(filled.render(), "normal(mu, sigma = 1)");
        assert_eq!(filled.first_hole(), None);
    }

    #[test]
    fn substitute_leaves_unmatched_holes_in_place() {
        let template = Expression::call("add", vec![Expression::slot(0), Expression::slot(3)]);
        let filled = template.substitute(&pos(&[(0, Expression::scalar(2.0))]), &HashMap::new());
        assert_eq!(filled.first_hole(), Some("$3".to_string()));
    }

    #[test]
    fn renamed_rewrites_nested_references() {
        let expr = Expression::call(
            "add",
            vec![
                Expression::name("a"),
                Expression::call("exp", vec![Expression::name("b")]),
            ],
        );
        let mut map = HashMap::new();
        map.insert("b".to_string(), "b_sub".to_string());
        assert_eq!(expr.renamed(&map).render(), "add(a, exp(b_sub))");
    }

    #[test]
    fn references_are_collected_in_traversal_order() {
        let expr = Expression::call_kw(
            "f",
            vec![Expression::name("x"), Expression::scalar(2.0)],
            vec![("scale".into(), Expression::name("s"))],
        );
        assert_eq!(expr.references(), vec!["x", "s"]);
    }

    #[rstest]
    #[case(Expression::scalar(2.0), "2")]
    #[case(Expression::scalar(0.5), "0.5")]
    #[case(Expression::series(vec![1.0, 2.0]), "[1, 2]")]
    #[case(Expression::name("mu"), "mu")]
    #[case(Expression::slot(1), "$1")]
    #[case(Expression::call("exp", vec![Expression::name("x")]), "exp(x)")]
    fn render_forms(#[case] expr: Expression, #[case] expected: &str) {
        assert_eq!(expr.render(), expected);
    }
}
