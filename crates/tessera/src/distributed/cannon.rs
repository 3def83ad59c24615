//! Cannon's algorithm over a square process grid.
//!
//! Both operands are square-tiled as P×P sub-blocks. An initial skew moves
//! row i's A-tile left by i and column j's B-tile up by j; then P
//! multiply-accumulate steps each shift A left and B up by one position
//! (toroidal). Shifts are synchronous per step and use two point-to-point
//! exchanges; with P=1 the algorithm degenerates to one local matmul.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;

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

/// The square process grid implied by a set of tilings: side length, block
/// size, and the locality owning each (row, column) cell.
pub(crate) struct Grid {
    pub side: usize,
    pub block: usize,
    owners: Vec<Vec<u32>>,
}

impl Grid {
    /// Derives the grid from the gathered tilings, verifying a uniform
    /// square block partition of a square matrix.
    pub fn from_tilings(tilings: &[Tiling], what: &str) -> Result<Self> {
        let shape = Tiling::check_cover(tilings, false)?;
        if shape.len() != 2 || shape[0] != shape[1] {
            return Err(Error::locality(format!(
                "{what} must be a square matrix, covering {shape:?}"
            )));
        }
        let n = shape[0];
        let side = (tilings.len() as f64).sqrt().round() as usize;
        if side * side != tilings.len() {
            return Err(Error::locality(format!(
                "cannon_product requires a square process grid, have {} localities",
                tilings.len()
            )));
        }
        if n % side != 0 {
            return Err(Error::locality(format!(
                "{what} extent {n} is not divisible into a {side}x{side} grid"
            )));
        }
        let block = n / side;

        let mut owners = vec![vec![u32::MAX; side]; side];
        for (peer, tiling) in tilings.iter().enumerate() {
            let (row, col) = Self::cell_of(tiling, block, what)?;
            if owners[row][col] != u32::MAX {
                return Err(Error::locality(format!("{what} tile ({row}, {col}) is owned twice")));
            }
            owners[row][col] = peer as u32;
        }
        Ok(Self { side, block, owners })
    }

    /// The (row, column) grid cell a tiling occupies.
    pub fn cell_of(tiling: &Tiling, block: usize, what: &str) -> Result<(usize, usize)> {
        let rows = tiling.dim_span(0)?;
        let cols = tiling.dim_span(1)?;
        let block = block as i64;
        if rows.start % block != 0 || cols.start % block != 0 || rows.size() != block || cols.size() != block {
            return Err(Error::locality(format!(
                "{what} tile [{}, {})x[{}, {}) does not sit on the {block}-element block grid",
                rows.start, rows.stop, cols.start, cols.stop
            )));
        }
        Ok(((rows.start / block) as usize, (cols.start / block) as usize))
    }

    pub fn owner(&self, row: usize, col: usize) -> u32 {
        self.owners[row % self.side][col % self.side]
    }
}

/// One toroidal tile movement: sends `tile` to the cell it lands on and
/// receives this cell's incoming tile. A self-targeted move short-circuits
/// the fabric.
async fn shift(
    exchange: &Exchange<'_>,
    subtag: &str,
    tile: Arc<Tensor>,
    send_to: u32,
    recv_from: u32,
) -> Result<Arc<Tensor>> {
    if send_to == exchange.me() && recv_from == exchange.me() {
        return Ok(tile);
    }
    exchange.send(send_to, subtag, Value::Tensor(Arc::clone(&tile)));
    exchange
        .recv(recv_from, subtag)
        .await
        .to_tensor()
        .map_err(|_| Error::locality("peer supplied a non-array tile"))
}

/// Runs Cannon's algorithm for one locality holding aligned A- and B-tiles.
pub(crate) async fn cannon_tiled(
    exchange: &Exchange<'_>,
    locality: &Locality,
    a: Arc<Tensor>,
    tile_a: &Tiling,
    b: Arc<Tensor>,
    tile_b: &Tiling,
    tilings_a: &[Tiling],
    tilings_b: &[Tiling],
) -> Result<Value> {
    let grid_a = Grid::from_tilings(tilings_a, "cannon_product lhs")?;
    let grid_b = Grid::from_tilings(tilings_b, "cannon_product rhs")?;
    if grid_a.side != grid_b.side || grid_a.block != grid_b.block {
        return Err(Error::locality("cannon_product operands disagree on grid geometry"));
    }
    let p = grid_a.side;
    let (i, j) = Grid::cell_of(tile_a, grid_a.block, "cannon_product lhs")?;
    if Grid::cell_of(tile_b, grid_b.block, "cannon_product rhs")? != (i, j) {
        return Err(Error::locality("cannon_product operands must be tiled identically per locality"));
    }

    // Initial skew: row i shifts its A-tile left by i, column j shifts its
    // B-tile up by j; position (i, j) thus receives A(i, j+i) and B(i+j, j).
    let mut a_tile = shift(
        exchange,
        "skew-a",
        a,
        grid_a.owner(i, j + p - i),
        grid_a.owner(i, j + i),
    )
    .await?;
    let mut b_tile = shift(
        exchange,
        "skew-b",
        b,
        grid_b.owner(i + p - j, j),
        grid_b.owner(i + j, j),
    )
    .await?;

    let mut c = tensor::dot(&a_tile, &b_tile)?;
    for step in 1..p {
        a_tile = shift(
            exchange,
            &format!("a{step}"),
            a_tile,
            grid_a.owner(i, j + p - 1),
            grid_a.owner(i, j + 1),
        )
        .await?;
        b_tile = shift(
            exchange,
            &format!("b{step}"),
            b_tile,
            grid_b.owner(i + p - 1, j),
            grid_b.owner(i + 1, j),
        )
        .await?;
        let product = tensor::dot(&a_tile, &b_tile)?;
        c = tensor::binary_numeric(
            &c,
            &product,
            |x, y| x.checked_add(y).ok_or_else(|| Error::user("integer overflow in cannon_product")),
            |x, y| Ok(x + y),
        )?;
    }

    // My C-tile spans my original grid cell.
    let block = grid_a.block as i64;
    let spans = [
        TileSpan::new(i as i64 * block, (i as i64 + 1) * block),
        TileSpan::new(j as i64 * block, (j as i64 + 1) * block),
    ];
    let tiling = Tiling::from_spans(2, &spans)?;
    let annotated = c.with_annotation(localities_annotation(locality.info(), &tiling, None));
    Ok(Value::from(annotated))
}

#[derive(Debug, Default)]
struct CannonProductOp {
    generation: AtomicU64,
}

#[async_trait]
impl PrimitiveOp for CannonProductOp {
    fn kind(&self) -> &'static str {
        "cannon_product"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let locality = node.locality();

        // P=1 degenerates to a single local matmul.
        if locality.num_localities() == 1 {
            let a = values[0].to_tensor()?;
            let b = values[1].to_tensor()?;
            return Ok(Value::from(tensor::dot(&a, &b)?));
        }

        let (a, tile_a) = tiled_operand(&values[0], "cannon_product lhs")?;
        let (b, tile_b) = tiled_operand(&values[1], "cannon_product rhs")?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let exchange = Exchange::new(locality, &node.name_parts().tag_base(), generation);
        let tilings_a = exchange.gather_tilings("tilings-a", &tile_a).await?;
        let tilings_b = exchange.gather_tilings("tilings-b", &tile_b).await?;
        cannon_tiled(&exchange, locality, a, &tile_a, b, &tile_b, &tilings_a, &tilings_b).await
    }
}

fn make_cannon(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("cannon_product", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(CannonProductOp::default()), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![MatchPattern {
        name: "cannon_product",
        templates: &["cannon_product(_1, _2)"],
        factory: make_cannon,
        help: "cannon_product(a, b): distributed matmul over a square process grid",
    }]
}
