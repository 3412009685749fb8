//! Renders a compiled model as readable pseudo-source.
//!
//! The text mirrors the artifact exactly: the parameter list in contract
//! order, one binding statement per named node in evaluation order, and
//! the returned names. It is display output, never executed.

use std::fmt::Write;

use crate::compile::program::Param;
use crate::expr::Expression;

pub fn render(
    fn_name: &str,
    params: &[Param],
    bindings: &[(String, Expression)],
    returns: &[String],
) -> String {
    let mut out = String::new();

    let signature: Vec<String> = params
        .iter()
        .map(|p| match &p.default {
            Some(default) => format!("{} = {}", p.name, default),
            None => p.name.clone(),
        })
        .collect();
    let _ = writeln!(out, "fn {}({}):", fn_name, signature.join(", "));

    for (name, expr) in bindings {
        let _ = writeln!(out, "    {} = {}", name, expr);
    }
    if !returns.is_empty() {
        let _ = writeln!(out, "    return {}", returns.join(", "));
    }
    out
}
