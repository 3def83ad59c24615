//! Uniform random arrays over a deterministic, reseedable stream.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::expect_operands;
use crate::{
    distributed::Locality,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands, value_operand},
    values::{Tensor, TensorData, Value},
};

/// The process-wide generator; `set_seed` replaces it, `random` without an
/// explicit seed draws from it.
static GLOBAL_RNG: Mutex<Option<ChaCha8Rng>> = Mutex::new(None);

fn draw(shape: &[usize], rng: &mut ChaCha8Rng) -> Result<Tensor> {
    let len: usize = shape.iter().product();
    let data: Vec<f64> = (0..len).map(|_| rng.gen::<f64>()).collect();
    let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|e| Error::shape(e.to_string()))?;
    Tensor::new(TensorData::Double(array))
}

fn shape_of(value: &Value) -> Result<Vec<usize>> {
    match value {
        Value::Nil => Ok(vec![]),
        Value::Int(n) if *n >= 0 => Ok(vec![*n as usize]),
        Value::List(_) | Value::Range(_) => value
            .iter_list()?
            .iter()
            .map(|v| {
                let n = v.to_int()?;
                if n < 0 {
                    return Err(Error::shape(format!("negative dimension {n}")));
                }
                Ok(n as usize)
            })
            .collect(),
        other => Err(Error::type_error(format!(
            "random expects a shape, received {}",
            other.type_name()
        ))),
    }
}

/// `random(shape[, seed])`: uniform doubles in `[0, 1)`.
#[derive(Debug, Default)]
struct RandomOp;

#[async_trait]
impl PrimitiveOp for RandomOp {
    fn kind(&self) -> &'static str {
        "random"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let shape = shape_of(&values[0])?;
        if shape.len() > 3 {
            return Err(Error::shape(format!("rank {} exceeds the rank-3 limit", shape.len())));
        }
        let out = match values.get(1) {
            Some(Value::Nil) | None => {
                let mut global = GLOBAL_RNG
                    .lock()
                    .map_err(|_| Error::user("random generator poisoned"))?;
                let rng = global.get_or_insert_with(ChaCha8Rng::from_entropy);
                draw(&shape, rng)?
            }
            Some(seed) => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.to_int()? as u64);
                draw(&shape, &mut rng)?
            }
        };
        Ok(Value::from(out).demote_scalar())
    }
}

/// `set_seed(n)`: restarts the process-wide stream deterministically.
#[derive(Debug, Default)]
struct SetSeedOp;

#[async_trait]
impl PrimitiveOp for SetSeedOp {
    fn kind(&self) -> &'static str {
        "set_seed"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let seed = value_operand(&node.operands()[0], params, ctx).await?.to_int()?;
        let mut global = GLOBAL_RNG
            .lock()
            .map_err(|_| Error::user("random generator poisoned"))?;
        *global = Some(ChaCha8Rng::seed_from_u64(seed as u64));
        Ok(Value::Nil)
    }
}

fn make_random(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("random", &operands, 1, Some(2))?;
    Ok(Primitive::new(Box::new(RandomOp), operands, parts, locality))
}

fn make_set_seed(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("set_seed", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(SetSeedOp), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "random",
            templates: &["random(_1, __arg(seed, nil))"],
            factory: make_random,
            help: "random(shape, seed): uniform doubles in [0, 1)",
        },
        MatchPattern {
            name: "set_seed",
            templates: &["set_seed(_1)"],
            factory: make_set_seed,
            help: "set_seed(n): restart the random stream deterministically",
        },
    ]
}
