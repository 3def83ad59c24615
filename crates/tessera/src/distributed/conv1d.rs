//! `conv1d_d`: tiled one-dimensional convolution with halo exchange.
//!
//! Each locality owns a contiguous slab of the input vector plus a halo of
//! up to `kernel_size - 1` elements per side fetched from its neighbours.
//! VALID trims the output to fully-covered positions, SAME zero-pads to the
//! input length, CAUSAL pads on the left only.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use strum::EnumString;

use super::{Exchange, Locality, tiled_operand};
use crate::{
    annotation::{TileSpan, Tiling},
    distributed::annotate::localities_annotation,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands},
    primitives::expect_operands,
    values::{Tensor, Value, tensor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
enum Padding {
    Valid,
    Same,
    Causal,
}

impl Padding {
    /// Number of virtual zeros to the left of input position 0.
    fn pad_left(self, kernel: usize) -> usize {
        match self {
            Self::Valid => 0,
            Self::Same => (kernel - 1) / 2,
            Self::Causal => kernel - 1,
        }
    }

    /// Global output length for input length `n`.
    fn output_len(self, n: usize, kernel: usize) -> usize {
        match self {
            Self::Valid => (n + 1).saturating_sub(kernel),
            Self::Same | Self::Causal => n,
        }
    }
}

/// The input range `[needed.start, needed.stop)` a locality must hold to
/// compute outputs for its own span, clipped to the global extent.
fn needed_span(own: TileSpan, pad_left: usize, kernel: usize, n: usize, out_len: usize) -> TileSpan {
    let out_start = own.start.min(out_len as i64);
    let out_stop = own.stop.min(out_len as i64);
    if out_start >= out_stop {
        return TileSpan::new(0, 0);
    }
    let lo = (out_start - pad_left as i64).max(0);
    let hi = (out_stop - 1 - pad_left as i64 + kernel as i64).min(n as i64);
    TileSpan::new(lo, hi.max(lo))
}

#[derive(Debug, Default)]
struct Conv1dDOp {
    generation: AtomicU64,
}

#[async_trait]
impl PrimitiveOp for Conv1dDOp {
    fn kind(&self) -> &'static str {
        "conv1d_d"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let kernel_tensor = values[1].to_tensor()?;
        if kernel_tensor.rank() != 1 || kernel_tensor.is_empty() {
            return Err(Error::shape("conv1d_d expects a non-empty rank-1 kernel"));
        }
        let kernel: Vec<f64> = kernel_tensor.to_double_array().iter().copied().collect();
        let padding: Padding = values[2]
            .to_str()?
            .parse()
            .map_err(|_| Error::user(format!("unknown padding mode '{}'", values[2])))?;

        let locality = node.locality();
        let input = values[0].to_tensor()?;
        if input.annotation().is_none() {
            // Purely local input: convolve in place.
            if input.rank() != 1 {
                return Err(Error::shape("conv1d_d expects a rank-1 input"));
            }
            let data: Vec<f64> = input.to_double_array().iter().copied().collect();
            let out = convolve(&data, 0, data.len(), &kernel, padding, data.len());
            return Ok(Value::from(Tensor::vector_double(out)));
        }

        let (input, tiling) = tiled_operand(&values[0], "conv1d_d input")?;
        if tiling.rank() != 1 {
            return Err(Error::shape("conv1d_d supports vector tilings"));
        }
        let own = tiling.dim_span(0)?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let exchange = Exchange::new(locality, &node.name_parts().tag_base(), generation);
        let tilings = exchange.gather_tilings("tiling", &tiling).await?;
        let n = Tiling::check_cover(&tilings, false)?[0];
        let kernel_len = kernel.len();
        let out_len = padding.output_len(n, kernel_len);
        let pad_left = padding.pad_left(kernel_len);

        // Symmetric halo exchange: I send every peer the part of my slab
        // its needed range covers, and receive the converse.
        for (peer, peer_tiling) in tilings.iter().enumerate() {
            if peer == exchange.me() as usize {
                continue;
            }
            let peer_need = needed_span(peer_tiling.dim_span(0)?, pad_left, kernel_len, n, out_len);
            if let Some(overlap) = own.intersect(&peer_need) {
                let block = tensor::read_slice(
                    &input,
                    &[crate::values::SliceSpec::Range {
                        start: overlap.start - own.start,
                        stop: overlap.stop - own.start,
                    }],
                )?;
                exchange.send(peer as u32, "halo", Value::from(block));
            }
        }

        let need = needed_span(own, pad_left, kernel_len, n, out_len);
        let mut extended = vec![0.0f64; need.size() as usize];
        for (peer, peer_tiling) in tilings.iter().enumerate() {
            let peer_own = peer_tiling.dim_span(0)?;
            let Some(overlap) = peer_own.intersect(&need) else {
                continue;
            };
            let block: Vec<f64> = if peer == exchange.me() as usize {
                tensor::read_slice(
                    &input,
                    &[crate::values::SliceSpec::Range {
                        start: overlap.start - own.start,
                        stop: overlap.stop - own.start,
                    }],
                )?
                .to_double_array()
                .iter()
                .copied()
                .collect()
            } else {
                let received = exchange
                    .recv(peer as u32, "halo")
                    .await
                    .to_tensor()
                    .map_err(|_| Error::locality("peer supplied a non-array halo"))?;
                received.to_double_array().iter().copied().collect()
            };
            let offset = (overlap.start - need.start) as usize;
            extended[offset..offset + block.len()].copy_from_slice(&block);
        }

        // Convolve the slab of outputs this locality owns.
        let out_start = own.start.min(out_len as i64);
        let out_stop = own.stop.min(out_len as i64);
        let mut out = Vec::with_capacity((out_stop - out_start).max(0) as usize);
        for t in out_start..out_stop {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let x = t + k as i64 - pad_left as i64;
                if x < 0 || x >= n as i64 {
                    continue;
                }
                let local = x - need.start;
                if local >= 0 && (local as usize) < extended.len() {
                    acc += extended[local as usize] * weight;
                }
            }
            out.push(acc);
        }

        let out_tiling = Tiling::from_spans(1, &[TileSpan::new(out_start, out_stop.max(out_start))])?;
        let result = Tensor::vector_double(out)
            .with_annotation(localities_annotation(locality.info(), &out_tiling, None));
        Ok(Value::from(result))
    }
}

/// Local convolution over a fully-resident input.
fn convolve(data: &[f64], start: i64, stop: usize, kernel: &[f64], padding: Padding, n: usize) -> Vec<f64> {
    let pad_left = padding.pad_left(kernel.len()) as i64;
    let out_len = padding.output_len(n, kernel.len());
    let stop = (stop as i64).min(out_len as i64);
    let mut out = Vec::with_capacity((stop - start).max(0) as usize);
    for t in start..stop {
        let mut acc = 0.0;
        for (k, weight) in kernel.iter().enumerate() {
            let x = t + k as i64 - pad_left;
            if x >= 0 && (x as usize) < n {
                acc += data[x as usize] * weight;
            }
        }
        out.push(acc);
    }
    out
}

fn make_conv1d_d(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("conv1d_d", &operands, 3, Some(3))?;
    Ok(Primitive::new(Box::new(Conv1dDOp::default()), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![MatchPattern {
        name: "conv1d_d",
        templates: &["conv1d_d(_1, _2, __arg(padding, \"valid\"))"],
        factory: make_conv1d_d,
        help: "conv1d_d(a, kernel, padding): tiled 1-D convolution (valid/same/causal)",
    }]
}
