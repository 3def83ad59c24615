//! `retile_annotations`: redistribute a tiled array to a new tile layout by
//! pairwise span-intersection exchanges. No global barrier; only per-pair
//! futures.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use smallvec::SmallVec;

use super::{Exchange, Locality, assemble_blocks, tiled_operand};
use crate::{
    annotation::{TileSpan, Tiling},
    distributed::annotate::{annotation_from_value, localities_annotation, object_name},
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands},
    primitives::expect_operands,
    values::{SliceSpec, Value, tensor},
};

/// The per-axis overlap of two tilings, or `None` when any axis is
/// disjoint.
fn intersection(a: &Tiling, b: &Tiling) -> Result<Option<SmallVec<[TileSpan; 3]>>> {
    let mut spans = SmallVec::new();
    for dim in 0..a.rank() {
        match a.dim_span(dim)?.intersect(&b.dim_span(dim)?) {
            Some(span) => spans.push(span),
            None => return Ok(None),
        }
    }
    Ok(Some(spans))
}

/// Slice specs of a global sub-region relative to a tiling's own origin.
fn relative_specs(region: &[TileSpan], origin: &Tiling) -> Result<Vec<SliceSpec>> {
    region
        .iter()
        .enumerate()
        .map(|(dim, span)| {
            let base = origin.dim_span(dim)?.start;
            Ok(SliceSpec::Range {
                start: span.start - base,
                stop: span.stop - base,
            })
        })
        .collect()
}

#[derive(Debug, Default)]
struct RetileOp {
    generation: AtomicU64,
}

#[async_trait]
impl PrimitiveOp for RetileOp {
    fn kind(&self) -> &'static str {
        "retile_annotations"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let (tensor_in, current) = tiled_operand(&values[0], "retile_annotations operand")?;
        let desired_ann = annotation_from_value(&values[1])?;
        let desired = Tiling::from_annotation(&desired_ann)?;
        if desired.rank() != current.rank() {
            return Err(Error::locality(format!(
                "cannot retile a rank-{} tiling into a rank-{} tiling",
                current.rank(),
                desired.rank()
            )));
        }
        let name = tensor_in.annotation().and_then(object_name);

        let locality = node.locality();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let exchange = Exchange::new(locality, &node.name_parts().tag_base(), generation);

        // Everyone learns everyone's current and desired layout; halo-style
        // overlaps are legal on either side, gaps on neither.
        let currents = exchange.gather_tilings("current", &current).await?;
        let desireds = exchange.gather_tilings("desired", &desired).await?;
        let shape = Tiling::check_cover(&currents, true)?;
        let desired_shape = Tiling::check_cover(&desireds, true)?;
        if shape != desired_shape {
            return Err(Error::locality(format!(
                "source tiling covers {:?} but the desired tiling covers {:?}",
                shape.as_slice(),
                desired_shape.as_slice()
            )));
        }

        let me = exchange.me() as usize;

        // Outbound: my current slab intersected with every peer's desired
        // slab. Sends are non-blocking, so all pairs proceed concurrently.
        for (peer, peer_desired) in desireds.iter().enumerate() {
            if peer == me {
                continue;
            }
            if let Some(region) = intersection(&current, peer_desired)? {
                let specs = relative_specs(&region, &current)?;
                let block = tensor::read_slice(&tensor_in, &specs)?;
                exchange.send(peer as u32, "xfer", Value::from(block));
            }
        }

        // Inbound: every peer's current slab intersected with my desired
        // slab, placed at its global position.
        let mut parts = Vec::new();
        let mut covered = 0i64;
        for (peer, peer_current) in currents.iter().enumerate() {
            let Some(region) = intersection(peer_current, &desired)? else {
                continue;
            };
            covered += region.iter().map(TileSpan::size).product::<i64>();
            let block = if peer == me {
                let specs = relative_specs(&region, &current)?;
                Arc::new(tensor::read_slice(&tensor_in, &specs)?)
            } else {
                exchange
                    .recv(peer as u32, "xfer")
                    .await
                    .to_tensor()
                    .map_err(|_| Error::locality("peer supplied a non-array block"))?
            };
            parts.push((Tiling::from_spans(desired.rank(), &region)?, block));
        }

        let desired_volume: i64 = desired.spans()?.iter().map(TileSpan::size).product();
        if covered < desired_volume {
            return Err(Error::locality(format!(
                "retile received {covered} of {desired_volume} elements; a participating locality is missing a tile"
            )));
        }

        // Assemble relative to my desired origin.
        let local_shape = desired.local_shape()?;
        let origin: SmallVec<[TileSpan; 3]> = desired.spans()?;
        let shifted: Vec<_> = parts
            .into_iter()
            .map(|(tiling, block)| {
                let spans: SmallVec<[TileSpan; 3]> = tiling
                    .spans()
                    .map(|spans| {
                        spans
                            .iter()
                            .zip(origin.iter())
                            .map(|(s, o)| TileSpan::new(s.start - o.start, s.stop - o.start))
                            .collect()
                    })
                    .unwrap_or_default();
                Tiling::from_spans(desired.rank(), &spans).map(|t| (t, block))
            })
            .collect::<Result<_>>()?;
        let assembled = assemble_blocks(&local_shape, &shifted)?
            .cast(tensor_in.dtype())
            .with_annotation(localities_annotation(locality.info(), &desired, name.as_deref()));
        Ok(Value::from(assembled))
    }
}

fn make_retile(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("retile_annotations", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(RetileOp::default()), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![MatchPattern {
        name: "retile_annotations",
        templates: &["retile_annotations(_1, _2)"],
        factory: make_retile,
        help: "retile_annotations(a, tiles): redistribute to the desired tile layout",
    }]
}
