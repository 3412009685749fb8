//! Shared test helpers: a small scalar backend standing in for the
//! external distribution/numeric library.

use crate::backend::{Backend, BackendError};
use crate::expr::Value;

/// Scalar arithmetic plus a deterministic `normal` stand-in, so tests can
/// assert exact values without a real sampler.
pub(crate) struct Arith;

fn scalar(v: &Value) -> Result<f64, BackendError> {
    v.as_scalar()
        .ok_or_else(|| BackendError::new("expected a scalar"))
}

fn operand(
    args: &[Value],
    kwargs: &[(String, Value)],
    i: usize,
    key: &str,
) -> Result<f64, BackendError> {
    if let Some(v) = args.get(i) {
        return scalar(v);
    }
    match kwargs.iter().find(|(k, _)| k.as_str() == key) {
        Some((_, v)) => scalar(v),
        None => Err(BackendError::new(format!("missing operand `{key}`"))),
    }
}

impl Backend for Arith {
    fn apply(
        &self,
        func: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value, BackendError> {
        let value = match func {
            "add" => operand(args, kwargs, 0, "lhs")? + operand(args, kwargs, 1, "rhs")?,
            "sub" => operand(args, kwargs, 0, "lhs")? - operand(args, kwargs, 1, "rhs")?,
            "mul" => operand(args, kwargs, 0, "lhs")? * operand(args, kwargs, 1, "rhs")?,
            "div" => operand(args, kwargs, 0, "lhs")? / operand(args, kwargs, 1, "rhs")?,
            "exp" => operand(args, kwargs, 0, "x")?.exp(),
            // Stand-in for sampling: mean shifted by one scale.
            "normal" => operand(args, kwargs, 0, "mu")? + operand(args, kwargs, 1, "sigma")?,
            other => return Err(BackendError::new(format!("unknown primitive `{other}`"))),
        };
        Ok(Value::Scalar(value))
    }
}
