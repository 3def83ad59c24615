//! `dot_d`: the tiled dot product.
//!
//! For aligned contraction layouts each locality multiplies its local
//! blocks and the partial results reduce elementwise across localities.
//! Square-grid layouts route through Cannon's algorithm; anything else
//! falls back to gathering both operands and multiplying locally.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;

use super::{Exchange, Locality, gather_whole, tiled_operand};
use crate::{
    annotation::{TileSpan, Tiling},
    distributed::cannon::cannon_tiled,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands},
    primitives::expect_operands,
    values::{Tensor, Value, tensor},
};

/// Elementwise sum of every locality's partial result.
async fn allreduce_add(exchange: &Exchange<'_>, subtag: &str, partial: Tensor) -> Result<Tensor> {
    let gathered = exchange.all_to_all(subtag, Value::from(partial)).await;
    let mut acc: Option<Tensor> = None;
    for value in gathered {
        let block = value
            .to_tensor()
            .map_err(|_| Error::locality("peer supplied a non-array partial"))?;
        acc = Some(match acc {
            None => block.as_ref().clone(),
            Some(current) => tensor::binary_numeric(
                &current,
                &block,
                |x, y| x.checked_add(y).ok_or_else(|| Error::user("integer overflow in dot_d")),
                |x, y| Ok(x + y),
            )?,
        });
    }
    acc.ok_or_else(|| Error::locality("dot_d received no partial results"))
}

fn full_span(span: TileSpan, extent: usize) -> bool {
    span.start == 0 && span.stop == extent as i64
}

/// Whether the two tilings contract compatibly: the contraction axis is
/// tiled identically on both sides and every non-contraction axis is held
/// whole.
fn aligned_contraction(
    tile_a: &Tiling,
    shape_a: &[usize],
    tile_b: &Tiling,
    shape_b: &[usize],
) -> Result<bool> {
    let a_contract = tile_a.dim_span(tile_a.rank() - 1)?;
    let b_contract = tile_b.dim_span(0)?;
    if a_contract != b_contract {
        return Ok(false);
    }
    // Leading axes of A and trailing axes of B must be whole.
    for dim in 0..tile_a.rank() - 1 {
        if !full_span(tile_a.dim_span(dim)?, shape_a[dim]) {
            return Ok(false);
        }
    }
    for dim in 1..tile_b.rank() {
        if !full_span(tile_b.dim_span(dim)?, shape_b[dim]) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn square_grid_layout(tilings_a: &[Tiling], tilings_b: &[Tiling]) -> bool {
    super::cannon::Grid::from_tilings(tilings_a, "dot_d lhs").is_ok()
        && super::cannon::Grid::from_tilings(tilings_b, "dot_d rhs").is_ok()
}

#[derive(Debug, Default)]
struct DotDOp {
    generation: AtomicU64,
}

#[async_trait]
impl PrimitiveOp for DotDOp {
    fn kind(&self) -> &'static str {
        "dot_d"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let locality = node.locality();

        let a_plain = values[0].to_tensor()?;
        let b_plain = values[1].to_tensor()?;
        if locality.num_localities() == 1 || (a_plain.annotation().is_none() && b_plain.annotation().is_none()) {
            return Ok(Value::from(tensor::dot(&a_plain, &b_plain)?).demote_scalar());
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let exchange = Exchange::new(locality, &node.name_parts().tag_base(), generation);

        // A replicated (unannotated) side gathers nothing; the tiled side
        // is collected and the product computed locally.
        let (Ok((a, tile_a)), Ok((b, tile_b))) = (
            tiled_operand(&values[0], "dot_d lhs"),
            tiled_operand(&values[1], "dot_d rhs"),
        ) else {
            let (a, b) = match (a_plain.annotation().is_some(), b_plain.annotation().is_some()) {
                (true, false) => {
                    let (a, tile_a) = tiled_operand(&values[0], "dot_d lhs")?;
                    (gather_whole(&exchange, "lhs", &a, &tile_a).await?, b_plain.as_ref().clone())
                }
                _ => {
                    let (b, tile_b) = tiled_operand(&values[1], "dot_d rhs")?;
                    (a_plain.as_ref().clone(), gather_whole(&exchange, "rhs", &b, &tile_b).await?)
                }
            };
            return Ok(Value::from(tensor::dot(&a, &b)?).demote_scalar());
        };

        let tilings_a = exchange.gather_tilings("tilings-a", &tile_a).await?;
        let tilings_b = exchange.gather_tilings("tilings-b", &tile_b).await?;
        let shape_a = Tiling::check_cover(&tilings_a, false)?;
        let shape_b = Tiling::check_cover(&tilings_b, false)?;
        if shape_a.last() != shape_b.first() {
            return Err(Error::shape(format!(
                "mismatched contraction axes: {:?} vs {:?}",
                shape_a.as_slice(),
                shape_b.as_slice()
            )));
        }

        // Strategy decision on the tile layout.
        if aligned_contraction(&tile_a, &shape_a, &tile_b, &shape_b)? {
            let partial = tensor::dot(&a, &b)?;
            let reduced = allreduce_add(&exchange, "partial", partial).await?;
            return Ok(Value::from(reduced).demote_scalar());
        }
        if tile_a.rank() == 2 && tile_b.rank() == 2 && square_grid_layout(&tilings_a, &tilings_b) {
            return cannon_tiled(&exchange, locality, a, &tile_a, b, &tile_b, &tilings_a, &tilings_b).await;
        }

        // Layout does not fit either strategy: gather both sides.
        let whole_a = gather_whole(&exchange, "lhs", &a, &tile_a).await?;
        let whole_b = gather_whole(&exchange, "rhs", &b, &tile_b).await?;
        Ok(Value::from(tensor::dot(&whole_a, &whole_b)?).demote_scalar())
    }
}

fn make_dot_d(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("dot_d", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(DotDOp::default()), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![MatchPattern {
        name: "dot_d",
        templates: &["dot_d(_1, _2)"],
        factory: make_dot_d,
        help: "dot_d(a, b): tiled dot product; local multiply + reduce, Cannon, or gather",
    }]
}
