//! `all_gather`: every locality supplies its slab; every locality receives
//! the concatenated global array.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;

use super::{Exchange, Locality, gather_whole, tiled_operand};
use crate::{
    annotation::Tiling,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, value_operand},
    primitives::expect_operands,
    values::Value,
};

#[derive(Debug, Default)]
struct AllGatherOp {
    generation: AtomicU64,
}

#[async_trait]
impl PrimitiveOp for AllGatherOp {
    fn kind(&self) -> &'static str {
        "all_gather"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let value = value_operand(&node.operands()[0], params, ctx).await?;
        let (tensor, tiling) = tiled_operand(&value, "all_gather operand")?;

        let locality = node.locality();
        if locality.num_localities() == 1 {
            let shape = Tiling::check_cover(std::slice::from_ref(&tiling), false)?;
            if shape.as_slice() != tensor.shape() {
                return Err(Error::locality("single-locality tile does not cover the global shape"));
            }
            return Ok(Value::from(tensor.as_ref().clone().without_annotation()));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let exchange = Exchange::new(locality, &node.name_parts().tag_base(), generation);
        let gathered = gather_whole(&exchange, "gather", &tensor, &tiling).await?;
        Ok(Value::from(gathered))
    }
}

fn make_all_gather(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("all_gather", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(AllGatherOp::default()), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![MatchPattern {
        name: "all_gather",
        templates: &["all_gather(_1)"],
        factory: make_all_gather,
        help: "all_gather(a): the concatenated global array on every locality",
    }]
}
