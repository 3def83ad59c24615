//! Elementwise comparisons. Numeric operands compare in the promoted
//! dtype (so `1 == 1.0` holds); non-numeric operands compare structurally
//! for `eq`/`ne` and lexicographically for the orderings on strings.

use std::sync::Arc;

use async_trait::async_trait;

use super::expect_operands;
use crate::{
    distributed::Locality,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands},
    values::{Value, tensor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpKind {
    fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
        }
    }

    fn ordering(self, ord: std::cmp::Ordering) -> bool {
        match self {
            Self::Eq => ord.is_eq(),
            Self::Ne => ord.is_ne(),
            Self::Lt => ord.is_lt(),
            Self::Le => ord.is_le(),
            Self::Gt => ord.is_gt(),
            Self::Ge => ord.is_ge(),
        }
    }

    fn int(self, a: i64, b: i64) -> bool {
        self.ordering(a.cmp(&b))
    }

    fn double(self, a: f64, b: f64) -> bool {
        match self {
            Self::Eq => a == b,
            Self::Ne => a != b,
            Self::Lt => a < b,
            Self::Le => a <= b,
            Self::Gt => a > b,
            Self::Ge => a >= b,
        }
    }
}

fn both_scalar(lhs: &Value, rhs: &Value) -> bool {
    matches!(lhs, Value::Bool(_) | Value::Int(_) | Value::Double(_))
        && matches!(rhs, Value::Bool(_) | Value::Int(_) | Value::Double(_))
}

fn apply(kind: CmpKind, lhs: &Value, rhs: &Value) -> Result<Value> {
    if both_scalar(lhs, rhs) {
        let result = if matches!(lhs, Value::Double(_)) || matches!(rhs, Value::Double(_)) {
            kind.double(lhs.to_double()?, rhs.to_double()?)
        } else {
            kind.int(lhs.to_int()?, rhs.to_int()?)
        };
        return Ok(Value::Bool(result));
    }

    if lhs.is_numeric() && rhs.is_numeric() {
        let lt = lhs.to_tensor()?;
        let rt = rhs.to_tensor()?;
        let out = tensor::binary_compare(
            &lt,
            &rt,
            |a, b| kind.int(a, b),
            |a, b| kind.double(a, b),
        )?;
        return Ok(Value::from(out).demote_scalar());
    }

    match kind {
        CmpKind::Eq => Ok(Value::Bool(lhs == rhs)),
        CmpKind::Ne => Ok(Value::Bool(lhs != rhs)),
        _ => match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(kind.ordering(a.cmp(b)))),
            _ => Err(Error::type_error(format!(
                "cannot order {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

#[derive(Debug)]
struct ComparisonOp {
    kind: CmpKind,
}

#[async_trait]
impl PrimitiveOp for ComparisonOp {
    fn kind(&self) -> &'static str {
        self.kind.name()
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        apply(self.kind, &values[0], &values[1])
    }
}

fn make(kind: CmpKind, operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands(kind.name(), &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(ComparisonOp { kind }), operands, parts, locality))
}

fn make_eq(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make(CmpKind::Eq, operands, parts, locality)
}

fn make_ne(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make(CmpKind::Ne, operands, parts, locality)
}

fn make_lt(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make(CmpKind::Lt, operands, parts, locality)
}

fn make_le(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make(CmpKind::Le, operands, parts, locality)
}

fn make_gt(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make(CmpKind::Gt, operands, parts, locality)
}

fn make_ge(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make(CmpKind::Ge, operands, parts, locality)
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "eq",
            templates: &["eq(_1, _2)"],
            factory: make_eq,
            help: "eq(a, b): equality; elementwise on arrays, structural otherwise",
        },
        MatchPattern {
            name: "ne",
            templates: &["ne(_1, _2)"],
            factory: make_ne,
            help: "ne(a, b): inequality",
        },
        MatchPattern {
            name: "lt",
            templates: &["lt(_1, _2)"],
            factory: make_lt,
            help: "lt(a, b): less-than",
        },
        MatchPattern {
            name: "le",
            templates: &["le(_1, _2)"],
            factory: make_le,
            help: "le(a, b): less-or-equal",
        },
        MatchPattern {
            name: "gt",
            templates: &["gt(_1, _2)"],
            factory: make_gt,
            help: "gt(a, b): greater-than",
        },
        MatchPattern {
            name: "ge",
            templates: &["ge(_1, _2)"],
            factory: make_ge,
            help: "ge(a, b): greater-or-equal",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_dtype_scalar_equality() {
        assert_eq!(apply(CmpKind::Eq, &Value::Int(1), &Value::Double(1.0)).unwrap(), Value::Bool(true));
        assert_eq!(apply(CmpKind::Lt, &Value::Bool(false), &Value::Int(1)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn structural_equality_for_non_numeric() {
        assert_eq!(apply(CmpKind::Eq, &Value::Nil, &Value::Nil).unwrap(), Value::Bool(true));
        assert_eq!(apply(CmpKind::Ne, &Value::from("a"), &Value::from("b")).unwrap(), Value::Bool(true));
    }

    #[test]
    fn ordering_non_numeric_is_a_type_error() {
        let err = apply(CmpKind::Lt, &Value::Nil, &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TypeError);
    }
}
