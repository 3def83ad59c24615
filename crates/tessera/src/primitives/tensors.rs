//! Array construction and access: literal stacking, constant fills,
//! one-hot encoding, shape extraction, slicing (read and write-through),
//! and the local dot product.

use std::sync::Arc;

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};

use super::expect_operands;
use crate::{
    distributed::Locality,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands, value_operand},
    values::{SliceSpec, Tensor, TensorData, Value, tensor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackKind {
    H,
    V,
    D,
}

/// `hstack`/`vstack`/`dstack`: the array-literal constructors. `[a, b]`
/// lowers to `hstack`, which stacks scalars into vectors, vectors into
/// matrix rows, and matrices into 3-tensor pages.
#[derive(Debug)]
struct StackOp {
    kind: StackKind,
}

#[async_trait]
impl PrimitiveOp for StackOp {
    fn kind(&self) -> &'static str {
        match self.kind {
            StackKind::H => "hstack",
            StackKind::V => "vstack",
            StackKind::D => "dstack",
        }
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let mut elems = Vec::with_capacity(values.len());
        for value in &values {
            elems.push(value.to_tensor()?.as_ref().clone());
        }
        let out = match self.kind {
            StackKind::H => tensor::stack_literal(&elems)?,
            StackKind::V => tensor::vstack(&elems)?,
            StackKind::D => tensor::dstack(&elems)?,
        };
        Ok(Value::from(out))
    }
}

/// Reads a shape argument: nil → scalar, int → vector length, list → dims.
fn shape_argument(value: &Value) -> Result<Vec<usize>> {
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
            "expected a shape (nil, int, or list), received {}",
            other.type_name()
        ))),
    }
}

/// `constant(v[, shape])`: fill an array of the given shape with a scalar.
#[derive(Debug, Default)]
struct ConstantOp;

#[async_trait]
impl PrimitiveOp for ConstantOp {
    fn kind(&self) -> &'static str {
        "constant"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let fill = &values[0];
        let shape = values.get(1).map_or_else(|| Ok(vec![]), shape_argument)?;
        if shape.len() > 3 {
            return Err(Error::shape(format!("rank {} exceeds the rank-3 limit", shape.len())));
        }
        let dims = IxDyn(&shape);
        let data = match fill {
            Value::Bool(v) => TensorData::Bool(ArrayD::from_elem(dims, *v)),
            Value::Int(v) => TensorData::Int64(ArrayD::from_elem(dims, *v)),
            Value::Double(v) => TensorData::Double(ArrayD::from_elem(dims, *v)),
            Value::Tensor(t) if t.rank() == 0 => match t.data() {
                TensorData::Bool(a) => {
                    TensorData::Bool(ArrayD::from_elem(dims, a.iter().next().copied().unwrap_or_default()))
                }
                TensorData::Int64(a) => {
                    TensorData::Int64(ArrayD::from_elem(dims, a.iter().next().copied().unwrap_or_default()))
                }
                TensorData::Double(a) => {
                    TensorData::Double(ArrayD::from_elem(dims, a.iter().next().copied().unwrap_or_default()))
                }
            },
            other => {
                return Err(Error::type_error(format!(
                    "constant fill must be a scalar, received {}",
                    other.type_name()
                )));
            }
        };
        Ok(Value::from(Tensor::new(data)?).demote_scalar())
    }
}

/// `one_hot(idx, size)`: unit vector(s). An out-of-range index produces the
/// zero vector rather than failing.
#[derive(Debug, Default)]
struct OneHotOp;

fn one_hot_row(index: i64, size: usize) -> Vec<i64> {
    let mut row = vec![0; size];
    if index >= 0 && (index as usize) < size {
        row[index as usize] = 1;
    }
    row
}

#[async_trait]
impl PrimitiveOp for OneHotOp {
    fn kind(&self) -> &'static str {
        "one_hot"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let size = values[1].to_int()?;
        if size < 0 {
            return Err(Error::shape(format!("one_hot size {size} is negative")));
        }
        let size = size as usize;
        match &values[0] {
            Value::Tensor(t) if t.rank() == 1 => {
                let indices = t.to_int_array();
                let rows: Vec<Tensor> = indices
                    .iter()
                    .map(|i| Tensor::vector_int(one_hot_row(*i, size)))
                    .collect();
                Ok(Value::from(tensor::stack_literal(&rows)?))
            }
            scalar => {
                let index = scalar.to_int()?;
                Ok(Value::from(Tensor::vector_int(one_hot_row(index, size))))
            }
        }
    }
}

/// `shape(a[, axis])`: the shape as a list, or one extent as an int.
#[derive(Debug, Default)]
struct ExtractShapeOp;

#[async_trait]
impl PrimitiveOp for ExtractShapeOp {
    fn kind(&self) -> &'static str {
        "extract_shape"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let tensor = values[0].to_tensor()?;
        match values.get(1) {
            Some(axis) => {
                let axis = axis.to_int()?;
                let extent = tensor
                    .shape()
                    .get(axis as usize)
                    .ok_or_else(|| Error::shape(format!("axis {axis} out of range for rank {}", tensor.rank())))?;
                Ok(Value::Int(*extent as i64))
            }
            None => Ok(Value::List(Arc::new(
                tensor.shape().iter().map(|d| Value::Int(*d as i64)).collect(),
            ))),
        }
    }
}

/// Converts evaluated slice arguments into per-axis specs: an int selects
/// one index, `list(start, stop)` a half-open range.
fn slice_specs(args: &[Value]) -> Result<Vec<SliceSpec>> {
    args.iter()
        .map(|arg| match arg {
            Value::Int(i) => Ok(SliceSpec::Index(*i)),
            Value::Bool(_) | Value::Double(_) | Value::Tensor(_) => Ok(SliceSpec::Index(arg.to_int()?)),
            Value::List(_) => {
                let bounds = arg.iter_list()?;
                if bounds.len() != 2 {
                    return Err(Error::type_error("a slice range is list(start, stop)"));
                }
                Ok(SliceSpec::Range {
                    start: bounds[0].to_int()?,
                    stop: bounds[1].to_int()?,
                })
            }
            Value::Range(r) if r.step == 1 => Ok(SliceSpec::Range { start: r.start, stop: r.stop }),
            other => Err(Error::type_error(format!(
                "slice arguments are ints or list(start, stop), received {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn list_index(index: i64, len: usize) -> Result<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    if resolved < 0 || resolved >= len {
        return Err(Error::user(format!("list index {index} out of bounds for length {len}")));
    }
    Ok(resolved as usize)
}

fn read_list_slice(items: &[Value], specs: &[Value]) -> Result<Value> {
    let [spec] = specs else {
        return Err(Error::type_error("lists slice along a single axis"));
    };
    match slice_specs(std::slice::from_ref(spec))?[0] {
        SliceSpec::Index(index) => Ok(items[list_index(index, items.len())?].clone()),
        SliceSpec::Range { start, stop } => {
            let start = list_index(start, items.len() + 1)?;
            let stop = list_index(stop, items.len() + 1)?.max(start);
            Ok(Value::List(Arc::new(items[start..stop].to_vec())))
        }
    }
}

/// `slice(target, spec...)`: element access dispatched on the target kind —
/// sub-arrays of tensors, elements of lists, entries of dictionaries.
/// `store` through it writes back into the referenced variable with
/// copy-on-write on shared payloads.
#[derive(Debug, Default)]
struct SliceOp;

#[async_trait]
impl PrimitiveOp for SliceOp {
    fn kind(&self) -> &'static str {
        "slice"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let target = value_operand(&node.operands()[0], params, ctx).await?;
        let spec_values = eval_operands(&node.operands()[1..], params, ctx).await?;
        match &target {
            Value::List(items) => read_list_slice(items, &spec_values),
            Value::Dict(dict) => {
                let [key] = spec_values.as_slice() else {
                    return Err(Error::type_error("dictionaries slice by a single key"));
                };
                dict.get(key)
                    .cloned()
                    .ok_or_else(|| Error::user(format!("key {key} not found in dictionary")))
            }
            _ => {
                let specs = slice_specs(&spec_values)?;
                let target_tensor = target.to_tensor()?;
                let out = tensor::read_slice(&target_tensor, &specs)?;
                Ok(Value::from(out).demote_scalar())
            }
        }
    }

    async fn store(&self, node: &PrimitiveNode, value: Value, params: &[Value], ctx: &EvalContext) -> Result<()> {
        let Some(Value::Handle(target)) = node.operands().first() else {
            return Err(Error::mutation("slice of a non-variable"));
        };
        let spec_values = eval_operands(&node.operands()[1..], params, ctx).await?;
        let current = target.eval(params, ctx).await?;
        // Copy-on-write: a shared payload duplicates before the write; a
        // uniquely-held one mutates in place.
        let updated = match current {
            Value::List(mut items) => {
                let [spec] = spec_values.as_slice() else {
                    return Err(Error::type_error("lists slice along a single axis"));
                };
                let index = list_index(spec.to_int()?, items.len())?;
                Arc::make_mut(&mut items)[index] = value;
                Value::List(items)
            }
            Value::Dict(mut dict) => {
                let [key] = spec_values.as_slice() else {
                    return Err(Error::type_error("dictionaries slice by a single key"));
                };
                Arc::make_mut(&mut dict).insert(key.clone(), value)?;
                Value::Dict(dict)
            }
            other => {
                let specs = slice_specs(&spec_values)?;
                let mut arc = other.to_tensor()?;
                let slab = Arc::make_mut(&mut arc);
                let value_tensor = value.to_tensor()?;
                tensor::write_slice(slab, &specs, &value_tensor)?;
                Value::Tensor(arc)
            }
        };
        target.store(updated, params, ctx).await
    }
}

/// `dot(a, b)`: the local dot product for ranks up to (2, 2).
#[derive(Debug, Default)]
struct DotOp;

#[async_trait]
impl PrimitiveOp for DotOp {
    fn kind(&self) -> &'static str {
        "dot"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let lt = values[0].to_tensor()?;
        let rt = values[1].to_tensor()?;
        let out = tensor::dot(&lt, &rt)?;
        Ok(Value::from(out).demote_scalar())
    }
}

fn make_hstack(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    Ok(Primitive::new(Box::new(StackOp { kind: StackKind::H }), operands, parts, locality))
}

fn make_vstack(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    Ok(Primitive::new(Box::new(StackOp { kind: StackKind::V }), operands, parts, locality))
}

fn make_dstack(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    Ok(Primitive::new(Box::new(StackOp { kind: StackKind::D }), operands, parts, locality))
}

fn make_constant(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("constant", &operands, 1, Some(2))?;
    Ok(Primitive::new(Box::new(ConstantOp), operands, parts, locality))
}

fn make_zeros(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("zeros", &operands, 1, Some(1))?;
    let mut full = vec![Value::Double(0.0)];
    full.extend(operands);
    Ok(Primitive::new(Box::new(ConstantOp), full, parts, locality))
}

fn make_ones(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("ones", &operands, 1, Some(1))?;
    let mut full = vec![Value::Double(1.0)];
    full.extend(operands);
    Ok(Primitive::new(Box::new(ConstantOp), full, parts, locality))
}

fn make_one_hot(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("one_hot", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(OneHotOp), operands, parts, locality))
}

fn make_shape(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("shape", &operands, 1, Some(2))?;
    Ok(Primitive::new(Box::new(ExtractShapeOp), operands, parts, locality))
}

fn make_slice(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("slice", &operands, 1, Some(4))?;
    Ok(Primitive::new(Box::new(SliceOp), operands, parts, locality))
}

fn make_dot(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("dot", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(DotOp), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "hstack",
            templates: &["hstack(__1)"],
            factory: make_hstack,
            help: "hstack(...): stack elements into the next-higher rank",
        },
        MatchPattern {
            name: "vstack",
            templates: &["vstack(__1)"],
            factory: make_vstack,
            help: "vstack(...): stack vectors as rows, concatenate matrices vertically",
        },
        MatchPattern {
            name: "dstack",
            templates: &["dstack(__1)"],
            factory: make_dstack,
            help: "dstack(...): stack matrices into a 3-tensor",
        },
        MatchPattern {
            name: "constant",
            templates: &["constant(_1)", "constant(_1, _2)"],
            factory: make_constant,
            help: "constant(v, shape): fill an array with a scalar",
        },
        MatchPattern {
            name: "zeros",
            templates: &["zeros(_1)"],
            factory: make_zeros,
            help: "zeros(shape): an all-zero array",
        },
        MatchPattern {
            name: "ones",
            templates: &["ones(_1)"],
            factory: make_ones,
            help: "ones(shape): an all-one array",
        },
        MatchPattern {
            name: "one_hot",
            templates: &["one_hot(_1, _2)"],
            factory: make_one_hot,
            help: "one_hot(idx, size): unit vector(s); out-of-range yields zeros",
        },
        MatchPattern {
            name: "shape",
            templates: &["shape(_1)", "shape(_1, _2)"],
            factory: make_shape,
            help: "shape(a, axis): the shape list or one extent",
        },
        MatchPattern {
            name: "extract_shape",
            templates: &["extract_shape(_1)", "extract_shape(_1, _2)"],
            factory: make_shape,
            help: "extract_shape(a, axis): alias of shape",
        },
        MatchPattern {
            name: "slice",
            templates: &["slice(_1, __2)"],
            factory: make_slice,
            help: "slice(a, spec...): sub-array access; store writes through",
        },
        MatchPattern {
            name: "dot",
            templates: &["dot(_1, _2)"],
            factory: make_dot,
            help: "dot(a, b): inner product / matrix multiply",
        },
    ]
}
