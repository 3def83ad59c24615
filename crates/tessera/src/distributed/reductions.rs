//! Tiled reductions: per-locality partials combined with an associative
//! reducer across localities. Every locality receives the same result.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;

use super::{Exchange, Locality, tiled_operand};
use crate::{
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, value_operand},
    primitives::expect_operands,
    values::{DType, Tensor, TensorData, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatKind {
    Sum,
    Mean,
    Max,
}

impl StatKind {
    fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum_d",
            Self::Mean => "mean_d",
            Self::Max => "max_d",
        }
    }
}

/// A per-locality partial: empty tiles contribute nothing.
#[derive(Debug, Clone, Copy)]
enum Partial {
    Empty,
    Int { acc: i64, count: i64 },
    Double { acc: f64, count: i64 },
}

fn local_partial(kind: StatKind, tensor: &Tensor) -> Partial {
    if tensor.is_empty() {
        return Partial::Empty;
    }
    match tensor.data() {
        TensorData::Double(a) => {
            let acc = match kind {
                StatKind::Sum | StatKind::Mean => a.iter().sum::<f64>(),
                StatKind::Max => a.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            Partial::Double { acc, count: a.len() as i64 }
        }
        _ => {
            let a = tensor.to_int_array();
            let acc = match kind {
                StatKind::Sum | StatKind::Mean => a.iter().sum::<i64>(),
                StatKind::Max => a.iter().copied().max().unwrap_or(i64::MIN),
            };
            Partial::Int { acc, count: a.len() as i64 }
        }
    }
}

fn partial_to_value(partial: Partial) -> Value {
    match partial {
        Partial::Empty => Value::Nil,
        Partial::Int { acc, count } => Value::List(Arc::new(vec![Value::Int(acc), Value::Int(count)])),
        Partial::Double { acc, count } => Value::List(Arc::new(vec![Value::Double(acc), Value::Int(count)])),
    }
}

fn partial_from_value(value: &Value) -> Result<Partial> {
    match value {
        Value::Nil => Ok(Partial::Empty),
        Value::List(items) if items.len() == 2 => {
            let count = items[1].to_int()?;
            match &items[0] {
                Value::Int(acc) => Ok(Partial::Int { acc: *acc, count }),
                Value::Double(acc) => Ok(Partial::Double { acc: *acc, count }),
                _ => Err(Error::locality("malformed reduction partial")),
            }
        }
        _ => Err(Error::locality("malformed reduction partial")),
    }
}

fn combine(kind: StatKind, partials: &[Partial]) -> Result<Value> {
    let dtype = partials.iter().fold(DType::Int64, |acc, p| match p {
        Partial::Double { .. } => DType::Double,
        _ => acc,
    });
    let mut acc_int: Option<i64> = None;
    let mut acc_double: Option<f64> = None;
    let mut count = 0i64;
    for partial in partials {
        let (value_d, value_i, n) = match partial {
            Partial::Empty => continue,
            Partial::Int { acc, count } => (*acc as f64, *acc, *count),
            Partial::Double { acc, count } => (*acc, *acc as i64, *count),
        };
        count += n;
        match kind {
            StatKind::Sum | StatKind::Mean => {
                acc_double = Some(acc_double.unwrap_or(0.0) + value_d);
                acc_int = Some(acc_int.unwrap_or(0).saturating_add(value_i));
            }
            StatKind::Max => {
                acc_double = Some(acc_double.map_or(value_d, |a| a.max(value_d)));
                acc_int = Some(acc_int.map_or(value_i, |a| a.max(value_i)));
            }
        }
    }
    if count == 0 {
        return Err(Error::user(format!("{} of an empty array", kind.name())));
    }
    match kind {
        StatKind::Mean => Ok(Value::Double(acc_double.unwrap_or(0.0) / count as f64)),
        _ if dtype == DType::Double => Ok(Value::Double(acc_double.unwrap_or(0.0))),
        _ => Ok(Value::Int(acc_int.unwrap_or(0))),
    }
}

#[derive(Debug)]
struct StatOp {
    kind: StatKind,
    generation: AtomicU64,
}

#[async_trait]
impl PrimitiveOp for StatOp {
    fn kind(&self) -> &'static str {
        self.kind.name()
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let value = value_operand(&node.operands()[0], params, ctx).await?;
        let locality = node.locality();

        // Unannotated operands reduce locally even in a distributed run.
        let tensor = value.to_tensor()?;
        let local = local_partial(self.kind, &tensor);
        if locality.num_localities() == 1 || tensor.annotation().is_none() {
            return combine(self.kind, &[local]);
        }
        tiled_operand(&value, self.kind.name())?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let exchange = Exchange::new(locality, &node.name_parts().tag_base(), generation);
        let gathered = exchange.all_to_all("partial", partial_to_value(local)).await;
        let partials: Vec<Partial> = gathered.iter().map(partial_from_value).collect::<Result<_>>()?;
        combine(self.kind, &partials)
    }
}

fn make_stat(kind: StatKind, operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands(kind.name(), &operands, 1, Some(1))?;
    Ok(Primitive::new(
        Box::new(StatOp { kind, generation: AtomicU64::new(0) }),
        operands,
        parts,
        locality,
    ))
}

fn make_sum_d(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make_stat(StatKind::Sum, operands, parts, locality)
}

fn make_mean_d(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make_stat(StatKind::Mean, operands, parts, locality)
}

fn make_max_d(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make_stat(StatKind::Max, operands, parts, locality)
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "sum_d",
            templates: &["sum_d(_1)"],
            factory: make_sum_d,
            help: "sum_d(a): global sum over all tiles",
        },
        MatchPattern {
            name: "mean_d",
            templates: &["mean_d(_1)"],
            factory: make_mean_d,
            help: "mean_d(a): global mean from per-tile (sum, count) contributions",
        },
        MatchPattern {
            name: "max_d",
            templates: &["max_d(_1)"],
            factory: make_max_d,
            help: "max_d(a): global maximum over all tiles",
        },
    ]
}
