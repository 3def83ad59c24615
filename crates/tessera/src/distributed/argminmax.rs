//! Tiled arg-reductions: per-locality (value, global index) candidates
//! combined across localities with ties broken by the lowest index.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;

use super::{Exchange, Locality, tiled_operand};
use crate::{
    annotation::Tiling,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, value_operand},
    primitives::expect_operands,
    values::{Tensor, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    Min,
    Max,
}

impl ArgKind {
    fn name(self) -> &'static str {
        match self {
            Self::Min => "argmin_d",
            Self::Max => "argmax_d",
        }
    }

    fn prefers(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Min => candidate < incumbent,
            Self::Max => candidate > incumbent,
        }
    }
}

/// The winning element of the local tile: its value and local flat index in
/// row-major order. Ties keep the lowest index.
fn local_candidate(kind: ArgKind, tensor: &Tensor) -> Option<(f64, usize)> {
    let data = tensor.to_double_array();
    let mut best: Option<(f64, usize)> = None;
    for (index, value) in data.iter().enumerate() {
        match best {
            None => best = Some((*value, index)),
            Some((incumbent, _)) if kind.prefers(*value, incumbent) => best = Some((*value, index)),
            _ => {}
        }
    }
    best
}

/// Maps a local row-major flat index to the global row-major flat index
/// through the tile's spans.
fn globalize(local_index: usize, tiling: &Tiling, global_shape: &[usize]) -> Result<i64> {
    let local_shape = tiling.local_shape()?;
    let spans = tiling.spans()?;

    // Unravel locally, shift by the span starts, re-ravel globally.
    let mut remainder = local_index;
    let mut global_index = 0i64;
    for dim in 0..local_shape.len() {
        let stride: usize = local_shape[dim + 1..].iter().product();
        let coord = remainder / stride.max(1);
        remainder %= stride.max(1);
        let global_coord = coord as i64 + spans[dim].start;
        let global_stride: usize = global_shape[dim + 1..].iter().product();
        global_index += global_coord * global_stride as i64;
    }
    Ok(global_index)
}

#[derive(Debug)]
struct ArgMinMaxOp {
    kind: ArgKind,
    generation: AtomicU64,
}

#[async_trait]
impl PrimitiveOp for ArgMinMaxOp {
    fn kind(&self) -> &'static str {
        self.kind.name()
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let value = value_operand(&node.operands()[0], params, ctx).await?;
        let locality = node.locality();
        let tensor = value.to_tensor()?;

        if locality.num_localities() == 1 || tensor.annotation().is_none() {
            let (_, index) = local_candidate(self.kind, &tensor)
                .ok_or_else(|| Error::user(format!("{} of an empty array", self.kind.name())))?;
            return Ok(Value::Int(index as i64));
        }

        let (tensor, tiling) = tiled_operand(&value, self.kind.name())?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let exchange = Exchange::new(locality, &node.name_parts().tag_base(), generation);

        let tilings = exchange.gather_tilings("tiling", &tiling).await?;
        let global_shape = Tiling::check_cover(&tilings, false)?;

        let candidate = match local_candidate(self.kind, &tensor) {
            Some((value, local_index)) => Value::List(Arc::new(vec![
                Value::Double(value),
                Value::Int(globalize(local_index, &tiling, &global_shape)?),
            ])),
            None => Value::Nil,
        };
        let gathered = exchange.all_to_all("candidate", candidate).await;

        // Combine (value, global_index) pairs; the lowest index wins ties.
        let mut best: Option<(f64, i64)> = None;
        for entry in &gathered {
            let (value, index) = match entry {
                Value::Nil => continue,
                Value::List(pair) if pair.len() == 2 => (pair[0].to_double()?, pair[1].to_int()?),
                _ => return Err(Error::locality("malformed arg-reduction candidate")),
            };
            best = match best {
                None => Some((value, index)),
                Some((incumbent, incumbent_index)) => {
                    if self.kind.prefers(value, incumbent) || (value == incumbent && index < incumbent_index) {
                        Some((value, index))
                    } else {
                        Some((incumbent, incumbent_index))
                    }
                }
            };
        }
        let (_, index) = best.ok_or_else(|| Error::user(format!("{} of an empty array", self.kind.name())))?;
        Ok(Value::Int(index))
    }
}

fn make_arg(kind: ArgKind, operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands(kind.name(), &operands, 1, Some(1))?;
    Ok(Primitive::new(
        Box::new(ArgMinMaxOp { kind, generation: AtomicU64::new(0) }),
        operands,
        parts,
        locality,
    ))
}

fn make_argmin_d(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make_arg(ArgKind::Min, operands, parts, locality)
}

fn make_argmax_d(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    make_arg(ArgKind::Max, operands, parts, locality)
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "argmin_d",
            templates: &["argmin_d(_1)"],
            factory: make_argmin_d,
            help: "argmin_d(a): global flat index of the minimum; lowest index wins ties",
        },
        MatchPattern {
            name: "argmax_d",
            templates: &["argmax_d(_1)"],
            factory: make_argmax_d,
            help: "argmax_d(a): global flat index of the maximum; lowest index wins ties",
        },
    ]
}
