//! The concrete primitive kinds, one module per family. Each module exposes
//! a `patterns()` table collected into the global registry at startup.

pub mod arithmetic;
pub mod comparison;
pub mod control;
pub mod lists;
pub mod logical;
pub mod output;
pub mod random;
pub mod sync;
pub mod tensors;
pub mod variables;

use crate::{
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::EvalContext,
    values::Value,
};

/// Every pattern of the built-in primitive set, local and distributed.
pub(crate) fn all_patterns() -> Vec<MatchPattern> {
    let mut patterns = Vec::new();
    patterns.extend(control::patterns());
    patterns.extend(variables::patterns());
    patterns.extend(lists::patterns());
    patterns.extend(arithmetic::patterns());
    patterns.extend(comparison::patterns());
    patterns.extend(logical::patterns());
    patterns.extend(tensors::patterns());
    patterns.extend(output::patterns());
    patterns.extend(sync::patterns());
    patterns.extend(random::patterns());
    patterns.extend(crate::distributed::annotate::patterns());
    patterns.extend(crate::distributed::all_gather::patterns());
    patterns.extend(crate::distributed::retile::patterns());
    patterns.extend(crate::distributed::dot_d::patterns());
    patterns.extend(crate::distributed::cannon::patterns());
    patterns.extend(crate::distributed::reductions::patterns());
    patterns.extend(crate::distributed::argminmax::patterns());
    patterns.extend(crate::distributed::conv1d::patterns());
    patterns
}

/// Verifies an operand count at node construction.
pub(crate) fn expect_operands(kind: &str, operands: &[Value], min: usize, max: Option<usize>) -> Result<()> {
    let n = operands.len();
    if n < min || max.is_some_and(|max| n > max) {
        let expected = match max {
            Some(max) if max == min => min.to_string(),
            Some(max) => format!("{min} to {max}"),
            None => format!("at least {min}"),
        };
        return Err(Error::arity(kind, expected, n));
    }
    Ok(())
}

/// Invokes a callable value: a function closure (bound arguments first,
/// evaluated under its captured definition-site frames) or a raw handle to
/// a function node.
pub(crate) async fn invoke_function(callee: &Value, args: Vec<Value>, ctx: &EvalContext, who: &str) -> Result<Value> {
    match callee {
        Value::Function(closure) => {
            let ctx = match closure.frames() {
                Some(frames) => ctx.with_frames(frames.clone()),
                None => ctx.clone(),
            };
            if closure.bound.is_empty() {
                closure.target.eval(&args, &ctx).await
            } else {
                let mut all = closure.bound.clone();
                all.extend(args);
                closure.target.eval(&all, &ctx).await
            }
        }
        Value::Handle(handle) => handle.eval(&args, ctx).await,
        other => Err(Error::type_error(format!(
            "{who} expects a function, received {}",
            other.type_name()
        ))),
    }
}
