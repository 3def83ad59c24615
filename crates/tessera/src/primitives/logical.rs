//! Logical connectives. Scalar operands short-circuit; array operands
//! combine elementwise (both sides evaluate).

use std::sync::Arc;

use async_trait::async_trait;

use super::expect_operands;
use crate::{
    distributed::Locality,
    error::Result,
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, value_operand},
    values::{Value, tensor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicalKind {
    And,
    Or,
}

#[derive(Debug)]
struct LogicalOp {
    kind: LogicalKind,
}

#[async_trait]
impl PrimitiveOp for LogicalOp {
    fn kind(&self) -> &'static str {
        match self.kind {
            LogicalKind::And => "and",
            LogicalKind::Or => "or",
        }
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let lhs = value_operand(&node.operands()[0], params, ctx).await?;
        if !matches!(lhs, Value::Tensor(_)) {
            // Scalar short-circuit: the right side only evaluates when it
            // can still decide the outcome.
            let left = lhs.is_true()?;
            match (self.kind, left) {
                (LogicalKind::And, false) => return Ok(Value::Bool(false)),
                (LogicalKind::Or, true) => return Ok(Value::Bool(true)),
                _ => {}
            }
            let rhs = value_operand(&node.operands()[1], params, ctx).await?;
            if let Value::Tensor(rt) = &rhs {
                let lt = lhs.to_tensor()?;
                return elementwise(self.kind, &lt, rt);
            }
            return Ok(Value::Bool(rhs.is_true()?));
        }

        let rhs = value_operand(&node.operands()[1], params, ctx).await?;
        let lt = lhs.to_tensor()?;
        let rt = rhs.to_tensor()?;
        elementwise(self.kind, &lt, &rt)
    }
}

fn elementwise(kind: LogicalKind, lhs: &tensor::Tensor, rhs: &tensor::Tensor) -> Result<Value> {
    let out = match kind {
        LogicalKind::And => tensor::binary_compare(lhs, rhs, |a, b| a != 0 && b != 0, |a, b| a != 0.0 && b != 0.0)?,
        LogicalKind::Or => tensor::binary_compare(lhs, rhs, |a, b| a != 0 || b != 0, |a, b| a != 0.0 || b != 0.0)?,
    };
    Ok(Value::from(out).demote_scalar())
}

/// Logical complement; arrays complement elementwise.
#[derive(Debug, Default)]
struct NotOp;

#[async_trait]
impl PrimitiveOp for NotOp {
    fn kind(&self) -> &'static str {
        "not"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let value = value_operand(&node.operands()[0], params, ctx).await?;
        if let Value::Tensor(t) = &value {
            let zero = tensor::Tensor::scalar_int(0);
            let out = tensor::binary_compare(t, &zero, |a, _| a == 0, |a, _| a == 0.0)?;
            return Ok(Value::from(out).demote_scalar());
        }
        Ok(Value::Bool(!value.is_true()?))
    }
}

fn make_and(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("and", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(LogicalOp { kind: LogicalKind::And }), operands, parts, locality))
}

fn make_or(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("or", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(LogicalOp { kind: LogicalKind::Or }), operands, parts, locality))
}

fn make_not(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("not", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(NotOp), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "and",
            templates: &["and(_1, _2)"],
            factory: make_and,
            help: "and(a, b): logical conjunction; scalars short-circuit",
        },
        MatchPattern {
            name: "or",
            templates: &["or(_1, _2)"],
            factory: make_or,
            help: "or(a, b): logical disjunction; scalars short-circuit",
        },
        MatchPattern {
            name: "not",
            templates: &["not(_1)"],
            factory: make_not,
            help: "not(a): logical complement",
        },
    ]
}
