//! `synchronize`, `timer`, and `assert_condition`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, future::{BoxFuture, Shared}};
use tokio::sync::Mutex;

use super::{expect_operands, invoke_function};
use crate::{
    distributed::Locality,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, value_operand},
    values::Value,
};

type SharedEval = Shared<BoxFuture<'static, Result<Value>>>;

/// `synchronize(e)`: single-flight evaluation. Concurrent callers share the
/// first in-flight future; once it completes, the next call starts a fresh
/// evaluation.
#[derive(Default)]
struct SynchronizeOp {
    inflight: Mutex<Option<SharedEval>>,
}

impl std::fmt::Debug for SynchronizeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizeOp").finish_non_exhaustive()
    }
}

#[async_trait]
impl PrimitiveOp for SynchronizeOp {
    fn kind(&self) -> &'static str {
        "synchronize"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let flight = {
            let mut inflight = self.inflight.lock().await;
            match inflight.as_ref() {
                // Join the in-flight evaluation only while it is still
                // pending; a finished one is stale.
                Some(shared) if shared.peek().is_none() => shared.clone(),
                _ => {
                    let operand = node.operands()[0].clone();
                    let params = params.to_vec();
                    let ctx = ctx.clone();
                    let shared = async move { value_operand(&operand, &params, &ctx).await }.boxed().shared();
                    *inflight = Some(shared.clone());
                    shared
                }
            }
        };
        flight.await
    }
}

/// `timer(e, callback)`: evaluates `e`, reports the elapsed wall time in
/// seconds to the callback, returns `e`'s value.
#[derive(Debug, Default)]
struct TimerOp;

#[async_trait]
impl PrimitiveOp for TimerOp {
    fn kind(&self) -> &'static str {
        "timer"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let started = std::time::Instant::now();
        let value = value_operand(&node.operands()[0], params, ctx).await?;
        let elapsed = started.elapsed().as_secs_f64();
        let callback = value_operand(&node.operands()[1], params, ctx).await?;
        invoke_function(&callback, vec![Value::Double(elapsed)], ctx, self.kind()).await?;
        Ok(value)
    }
}

/// `assert_condition(cond[, msg])`: fails the enclosing eval with an
/// assertion diagnostic when the condition is falsy. Never terminates the
/// process.
#[derive(Debug, Default)]
struct AssertConditionOp;

#[async_trait]
impl PrimitiveOp for AssertConditionOp {
    fn kind(&self) -> &'static str {
        "assert_condition"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let condition = value_operand(&node.operands()[0], params, ctx).await?;
        if condition.is_true()? {
            return Ok(Value::Nil);
        }
        let message = match node.operands().get(1) {
            Some(operand) => value_operand(operand, params, ctx).await?.to_string(),
            None => "assertion failed".to_owned(),
        };
        Err(Error::assertion(message))
    }
}

fn make_synchronize(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("synchronize", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(SynchronizeOp::default()), operands, parts, locality))
}

fn make_timer(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("timer", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(TimerOp), operands, parts, locality))
}

fn make_assert_condition(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("assert_condition", &operands, 1, Some(2))?;
    Ok(Primitive::new(Box::new(AssertConditionOp), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "synchronize",
            templates: &["synchronize(_1)"],
            factory: make_synchronize,
            help: "synchronize(e): concurrent callers share one in-flight evaluation",
        },
        MatchPattern {
            name: "timer",
            templates: &["timer(_1, _2)"],
            factory: make_timer,
            help: "timer(e, callback): time e, report elapsed seconds, return e's value",
        },
        MatchPattern {
            name: "assert_condition",
            templates: &["assert_condition(_1)", "assert_condition(_1, _2)"],
            factory: make_assert_condition,
            help: "assert_condition(cond, msg): fail the eval when cond is falsy",
        },
    ]
}
