//! Elementwise arithmetic with numpy-style promotion and broadcasting.
//!
//! Integer division and modulo truncate toward zero (the native i64
//! semantics); integer division by zero raises a user error, never a
//! panic. `add` also concatenates strings and lists.

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
enum ArithKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithKind {
    fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
        }
    }

    fn int(self, a: i64, b: i64) -> Result<i64> {
        match self {
            Self::Add => a.checked_add(b).ok_or_else(|| overflow("add")),
            Self::Sub => a.checked_sub(b).ok_or_else(|| overflow("sub")),
            Self::Mul => a.checked_mul(b).ok_or_else(|| overflow("mul")),
            // Truncation toward zero; `checked_div` also covers
            // i64::MIN / -1.
            Self::Div => {
                if b == 0 {
                    return Err(Error::user("integer division by zero"));
                }
                a.checked_div(b).ok_or_else(|| overflow("div"))
            }
            Self::Mod => {
                if b == 0 {
                    return Err(Error::user("integer modulo by zero"));
                }
                a.checked_rem(b).ok_or_else(|| overflow("mod"))
            }
        }
    }

    fn double(self, a: f64, b: f64) -> Result<f64> {
        Ok(match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Mod => a % b,
        })
    }
}

fn overflow(op: &str) -> Error {
    Error::user(format!("integer overflow in {op}"))
}

/// Applies one arithmetic operation to two evaluated values.
fn apply(kind: ArithKind, lhs: &Value, rhs: &Value) -> Result<Value> {
    // Non-numeric additive forms.
    if kind == ArithKind::Add {
        match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                return Ok(Value::from(out));
            }
            (Value::List(a), Value::List(b)) => {
                let mut out = a.as_ref().clone();
                out.extend(b.iter().cloned());
                return Ok(Value::List(Arc::new(out)));
            }
            _ => {}
        }
    }

    // Scalar fast path.
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => return kind.int(*a, *b).map(Value::Int),
        (Value::Int(_) | Value::Double(_) | Value::Bool(_), Value::Int(_) | Value::Double(_) | Value::Bool(_)) => {
            if matches!(lhs, Value::Double(_)) || matches!(rhs, Value::Double(_)) {
                return kind.double(lhs.to_double()?, rhs.to_double()?).map(Value::Double);
            }
            return kind.int(lhs.to_int()?, rhs.to_int()?).map(Value::Int);
        }
        _ => {}
    }

    if !lhs.is_numeric() || !rhs.is_numeric() {
        return Err(Error::type_error(format!(
            "cannot {} {} and {}",
            kind.name(),
            lhs.type_name(),
            rhs.type_name()
        )));
    }

    let lt = lhs.to_tensor()?;
    let rt = rhs.to_tensor()?;
    let out = tensor::binary_numeric(&lt, &rt, |a, b| kind.int(a, b), |a, b| kind.double(a, b))?;
    Ok(Value::from(out))
}

#[derive(Debug)]
struct ArithmeticOp {
    kind: ArithKind,
}

#[async_trait]
impl PrimitiveOp for ArithmeticOp {
    fn kind(&self) -> &'static str {
        self.kind.name()
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        apply(self.kind, &values[0], &values[1])
    }
}

/// Unary numeric negation.
#[derive(Debug, Default)]
struct NegOp;

#[async_trait]
impl PrimitiveOp for NegOp {
    fn kind(&self) -> &'static str {
        "neg"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        match &values[0] {
            Value::Int(v) => v.checked_neg().map(Value::Int).ok_or_else(|| overflow("neg")),
            Value::Double(v) => Ok(Value::Double(-v)),
            Value::Bool(v) => Ok(Value::Int(-i64::from(*v))),
            Value::Tensor(t) => Ok(Value::from(tensor::negate(t)?)),
            other => Err(Error::type_error(format!("cannot negate a {}", other.type_name()))),
        }
    }
}

fn arith_factory(kind: ArithKind) -> impl Fn(Vec<Value>, NameParts, Arc<Locality>) -> Result<Primitive> {
    move |operands, parts, locality| {
        expect_operands(kind.name(), &operands, 2, Some(2))?;
        Ok(Primitive::new(Box::new(ArithmeticOp { kind }), operands, parts, locality))
    }
}

fn make_add(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    arith_factory(ArithKind::Add)(operands, parts, locality)
}

fn make_sub(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    arith_factory(ArithKind::Sub)(operands, parts, locality)
}

fn make_mul(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    arith_factory(ArithKind::Mul)(operands, parts, locality)
}

fn make_div(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    arith_factory(ArithKind::Div)(operands, parts, locality)
}

fn make_mod(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    arith_factory(ArithKind::Mod)(operands, parts, locality)
}

fn make_neg(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("neg", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(NegOp), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "add",
            templates: &["add(_1, _2)"],
            factory: make_add,
            help: "add(a, b): elementwise addition; concatenates strings and lists",
        },
        MatchPattern {
            name: "sub",
            templates: &["sub(_1, _2)"],
            factory: make_sub,
            help: "sub(a, b): elementwise subtraction",
        },
        MatchPattern {
            name: "mul",
            templates: &["mul(_1, _2)"],
            factory: make_mul,
            help: "mul(a, b): elementwise multiplication",
        },
        MatchPattern {
            name: "div",
            templates: &["div(_1, _2)"],
            factory: make_div,
            help: "div(a, b): elementwise division; integers truncate toward zero",
        },
        MatchPattern {
            name: "mod",
            templates: &["mod(_1, _2)"],
            factory: make_mod,
            help: "mod(a, b): elementwise remainder with the sign of the dividend",
        },
        MatchPattern {
            name: "neg",
            templates: &["neg(_1)"],
            factory: make_neg,
            help: "neg(a): elementwise numeric negation",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_truncates_toward_zero() {
        assert_eq!(ArithKind::Div.int(7, 2).unwrap(), 3);
        assert_eq!(ArithKind::Div.int(-7, 2).unwrap(), -3);
        assert_eq!(ArithKind::Div.int(7, -2).unwrap(), -3);
        assert_eq!(ArithKind::Mod.int(-7, 2).unwrap(), -1);
        assert_eq!(ArithKind::Mod.int(7, -2).unwrap(), 1);
    }

    #[test]
    fn integer_division_by_zero_is_a_user_error() {
        assert_eq!(ArithKind::Div.int(1, 0).unwrap_err().kind(), crate::error::ErrorKind::UserError);
        assert_eq!(ArithKind::Mod.int(1, 0).unwrap_err().kind(), crate::error::ErrorKind::UserError);
    }

    #[test]
    fn string_concatenation() {
        let out = apply(ArithKind::Add, &Value::from("ab"), &Value::from("cd")).unwrap();
        assert_eq!(out, Value::from("abcd"));
    }

    #[test]
    fn nil_plus_int_is_a_type_error() {
        let err = apply(ArithKind::Add, &Value::Nil, &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TypeError);
    }
}
