//! The compiled artifact: an ordered parameter list, binding statements
//! in topological order, and a tree-walking evaluator.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::error::EvalError;
use crate::backend::Backend;
use crate::expr::{Expression, Value};

/// One parameter of a compiled model, with its compiled default if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expression>,
}

/// A model graph lowered into a directly callable form.
///
/// Calling is referentially transparent: identical arguments produce
/// identical results, with no state between calls beyond an explicitly
/// passed generator-state value.
#[derive(Debug)]
pub struct CompiledModel {
    name: String,
    params: Vec<Param>,
    bindings: Vec<(String, Expression)>,
    returns: Vec<String>,
    source: String,
}

impl CompiledModel {
    pub(crate) fn new(
        name: impl Into<String>,
        params: Vec<Param>,
        bindings: Vec<(String, Expression)>,
        returns: Vec<String>,
        source: String,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            bindings,
            returns,
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters in the model's declared argument order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Binding statements, one per named node, in evaluation order.
    pub fn bindings(&self) -> &[(String, Expression)] {
        &self.bindings
    }

    /// Names of the returned values, in statement-encounter order.
    pub fn returns(&self) -> &[String] {
        &self.returns
    }

    /// Rendered pseudo-source of the model, for display and debugging.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the model over positional `args`, matched against the
    /// parameter list in order. Missing trailing parameters fall back to
    /// their compiled defaults. Returns one value per returned node.
    pub fn call(
        &self,
        backend: &dyn Backend,
        args: &[Value],
    ) -> Result<SmallVec<[Value; 1]>, EvalError> {
        if args.len() > self.params.len() {
            return Err(EvalError::TooManyArguments {
                expected: self.params.len(),
                given: args.len(),
            });
        }

        let mut scope: HashMap<String, Value> = HashMap::new();
        for (i, param) in self.params.iter().enumerate() {
            let value = match args.get(i) {
                Some(v) => v.clone(),
                None => match &param.default {
                    Some(default) => eval(default, &scope, backend)?,
                    None => return Err(EvalError::MissingParameter(param.name.clone())),
                },
            };
            scope.insert(param.name.clone(), value);
        }

        for (name, expr) in &self.bindings {
            let value = eval(expr, &scope, backend)?;
            scope.insert(name.clone(), value);
        }

        let mut out = SmallVec::new();
        for name in &self.returns {
            let value = scope
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UnboundName(name.clone()))?;
            out.push(value);
        }
        Ok(out)
    }
}

fn eval(
    expr: &Expression,
    scope: &HashMap<String, Value>,
    backend: &dyn Backend,
) -> Result<Value, EvalError> {
    match expr {
        Expression::Lit(v) => Ok(v.clone()),
        Expression::Name(n) => scope
            .get(n)
            .cloned()
            .ok_or_else(|| EvalError::UnboundName(n.clone())),
        Expression::Call { func, args, kwargs } => {
            let mut argv = Vec::with_capacity(args.len());
            for a in args {
                argv.push(eval(a, scope, backend)?);
            }
            let mut kwv = Vec::with_capacity(kwargs.len());
            for (k, v) in kwargs {
                kwv.push((k.clone(), eval(v, scope, backend)?));
            }
            Ok(backend.apply(func, &argv, &kwv)?)
        }
        // The compiler rejects artifacts with surviving holes; reaching
        // one here means the expression never went through `compile`.
        Expression::Slot(_) | Expression::KwSlot(_) => {
            Err(EvalError::UnboundName(expr.render()))
        }
    }
}
