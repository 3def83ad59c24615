//! Dense numeric arrays of rank 0–3 with a dtype tag and an optional
//! annotation slot.
//!
//! Elementwise operations follow numpy-equivalent rules: dtypes promote
//! along `bool < int64 < double`, size-1 axes stretch, and ranks align by
//! left-padding with size-1 axes. Boolean operands promote to `int64` before
//! arithmetic.

use ndarray::{ArrayD, Ix1, Ix2, IxDyn, SliceInfoElem};
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumString};

use crate::{
    annotation::Annotation,
    error::{Error, Result},
};

/// Element type of a numeric array. The variant order defines promotion:
/// `bool < int64 < double`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum DType {
    Bool,
    Int64,
    Double,
}

impl DType {
    #[must_use]
    pub fn promote(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Dense storage, tagged by dtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    Bool(ArrayD<bool>),
    Int64(ArrayD<i64>),
    Double(ArrayD<f64>),
}

impl TensorData {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Double(_) => DType::Double,
        }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Bool(a) => a.shape(),
            Self::Int64(a) => a.shape(),
            Self::Double(a) => a.shape(),
        }
    }

    fn cast(&self, dtype: DType) -> Self {
        if self.dtype() == dtype {
            return self.clone();
        }
        match (self, dtype) {
            (Self::Bool(a), DType::Int64) => Self::Int64(a.mapv(i64::from)),
            (Self::Bool(a), DType::Double) => Self::Double(a.mapv(|v| f64::from(i8::from(v)))),
            (Self::Int64(a), DType::Double) => Self::Double(a.mapv(|v| v as f64)),
            (Self::Int64(a), DType::Bool) => Self::Bool(a.mapv(|v| v != 0)),
            (Self::Double(a), DType::Int64) => Self::Int64(a.mapv(|v| v as i64)),
            (Self::Double(a), DType::Bool) => Self::Bool(a.mapv(|v| v != 0.0)),
            _ => self.clone(),
        }
    }
}

/// A numeric array value: dtype-tagged dense storage plus an optional
/// annotation (locality/tile metadata for the distributed engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    data: TensorData,
    annotation: Option<Annotation>,
}

impl Tensor {
    pub fn new(data: TensorData) -> Result<Self> {
        if data.shape().len() > 3 {
            return Err(Error::shape(format!(
                "arrays are limited to rank 3, received rank {}",
                data.shape().len()
            )));
        }
        Ok(Self { data, annotation: None })
    }

    #[must_use]
    pub fn scalar_int(value: i64) -> Self {
        Self {
            data: TensorData::Int64(ArrayD::from_elem(IxDyn(&[]), value)),
            annotation: None,
        }
    }

    #[must_use]
    pub fn scalar_double(value: f64) -> Self {
        Self {
            data: TensorData::Double(ArrayD::from_elem(IxDyn(&[]), value)),
            annotation: None,
        }
    }

    #[must_use]
    pub fn scalar_bool(value: bool) -> Self {
        Self {
            data: TensorData::Bool(ArrayD::from_elem(IxDyn(&[]), value)),
            annotation: None,
        }
    }

    #[must_use]
    pub fn vector_int(values: Vec<i64>) -> Self {
        let len = values.len();
        Self {
            data: TensorData::Int64(ArrayD::from_shape_vec(IxDyn(&[len]), values).expect("length matches shape")),
            annotation: None,
        }
    }

    #[must_use]
    pub fn vector_double(values: Vec<f64>) -> Self {
        let len = values.len();
        Self {
            data: TensorData::Double(ArrayD::from_shape_vec(IxDyn(&[len]), values).expect("length matches shape")),
            annotation: None,
        }
    }

    pub fn from_shape_double(shape: &[usize], values: Vec<f64>) -> Result<Self> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)
            .map_err(|e| Error::shape(format!("cannot shape data: {e}")))?;
        Self::new(TensorData::Double(data))
    }

    pub fn from_shape_int(shape: &[usize], values: Vec<i64>) -> Result<Self> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)
            .map_err(|e| Error::shape(format!("cannot shape data: {e}")))?;
        Self::new(TensorData::Int64(data))
    }

    #[must_use]
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.data.shape().len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn annotation(&self) -> Option<&Annotation> {
        self.annotation.as_ref()
    }

    #[must_use]
    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotation = Some(annotation);
        self
    }

    #[must_use]
    pub fn without_annotation(mut self) -> Self {
        self.annotation = None;
        self
    }

    pub fn set_annotation(&mut self, annotation: Option<Annotation>) {
        self.annotation = annotation;
    }

    #[must_use]
    pub fn cast(&self, dtype: DType) -> Self {
        Self {
            data: self.data.cast(dtype),
            annotation: self.annotation.clone(),
        }
    }

    /// The storage as doubles, casting if necessary.
    #[must_use]
    pub fn to_double_array(&self) -> ArrayD<f64> {
        match self.data.cast(DType::Double) {
            TensorData::Double(a) => a,
            _ => unreachable!("cast to double produced a non-double array"),
        }
    }

    /// The storage as int64, casting if necessary.
    #[must_use]
    pub fn to_int_array(&self) -> ArrayD<i64> {
        match self.data.cast(DType::Int64) {
            TensorData::Int64(a) => a,
            _ => unreachable!("cast to int64 produced a non-int64 array"),
        }
    }

    /// Boolean projection: a rank-0 array projects its single element; any
    /// other array is true iff it is non-empty and all elements are
    /// non-zero.
    #[must_use]
    pub fn truthy(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        match &self.data {
            TensorData::Bool(a) => a.iter().all(|v| *v),
            TensorData::Int64(a) => a.iter().all(|v| *v != 0),
            TensorData::Double(a) => a.iter().all(|v| *v != 0.0),
        }
    }

    /// The single element of a rank-0 or one-element array as i64.
    pub fn as_scalar_int(&self) -> Result<i64> {
        if self.len() != 1 {
            return Err(Error::type_error(format!(
                "expected a scalar, received an array of shape {:?}",
                self.shape()
            )));
        }
        match &self.data {
            TensorData::Bool(a) => Ok(i64::from(a.iter().next().copied().unwrap_or_default())),
            TensorData::Int64(a) => Ok(a.iter().next().copied().unwrap_or_default()),
            TensorData::Double(a) => Ok(a.iter().next().copied().unwrap_or_default() as i64),
        }
    }

    pub fn as_scalar_double(&self) -> Result<f64> {
        if self.len() != 1 {
            return Err(Error::type_error(format!(
                "expected a scalar, received an array of shape {:?}",
                self.shape()
            )));
        }
        match &self.data {
            TensorData::Bool(a) => Ok(f64::from(i8::from(a.iter().next().copied().unwrap_or_default()))),
            TensorData::Int64(a) => Ok(a.iter().next().and_then(|v| v.to_f64()).unwrap_or_default()),
            TensorData::Double(a) => Ok(a.iter().next().copied().unwrap_or_default()),
        }
    }
}

////////////////////////////////////////////////////////////////////////////
// Broadcasting

/// Numpy-style broadcast of two shapes: ranks align by left-padding with
/// size-1 axes; a size-1 axis stretches to the other side's extent.
pub fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Result<SmallVec<[usize; 3]>> {
    let rank = lhs.len().max(rhs.len());
    let mut shape: SmallVec<[usize; 3]> = SmallVec::with_capacity(rank);
    for i in 0..rank {
        let l = if i + lhs.len() >= rank { lhs[i + lhs.len() - rank] } else { 1 };
        let r = if i + rhs.len() >= rank { rhs[i + rhs.len() - rank] } else { 1 };
        if l == r || l == 1 || r == 1 {
            shape.push(l.max(r));
        } else {
            return Err(Error::shape(format!(
                "operands could not be broadcast together: {lhs:?} vs {rhs:?}"
            )));
        }
    }
    Ok(shape)
}

fn zip_broadcast<T, U, R>(
    lhs: &ArrayD<T>,
    rhs: &ArrayD<U>,
    shape: &[usize],
    mut f: impl FnMut(&T, &U) -> Result<R>,
) -> Result<ArrayD<R>>
where
    T: Clone,
    U: Clone,
{
    let lv = lhs
        .broadcast(IxDyn(shape))
        .ok_or_else(|| Error::shape(format!("cannot broadcast {:?} to {shape:?}", lhs.shape())))?;
    let rv = rhs
        .broadcast(IxDyn(shape))
        .ok_or_else(|| Error::shape(format!("cannot broadcast {:?} to {shape:?}", rhs.shape())))?;
    let elems: Result<Vec<R>> = lv.iter().zip(rv.iter()).map(|(l, r)| f(l, r)).collect();
    ArrayD::from_shape_vec(IxDyn(shape), elems?).map_err(|e| Error::shape(e.to_string()))
}

/// Which annotation, if any, survives an elementwise operation: an
/// annotation is kept when it belongs to an operand whose shape equals the
/// result shape and the other operand does not carry a conflicting one.
fn surviving_annotation(lhs: &Tensor, rhs: &Tensor, shape: &[usize]) -> Option<Annotation> {
    match (lhs.annotation(), rhs.annotation()) {
        (Some(a), Some(b)) if a == b => Some(a.clone()),
        (Some(a), None) if lhs.shape() == shape => Some(a.clone()),
        (None, Some(b)) if rhs.shape() == shape => Some(b.clone()),
        _ => None,
    }
}

/// Applies a binary numeric operation with promotion and broadcasting.
/// Boolean operands promote to int64 first.
pub fn binary_numeric(
    lhs: &Tensor,
    rhs: &Tensor,
    int_op: impl Fn(i64, i64) -> Result<i64>,
    double_op: impl Fn(f64, f64) -> Result<f64>,
) -> Result<Tensor> {
    let dtype = lhs.dtype().promote(rhs.dtype()).promote(DType::Int64);
    let shape = broadcast_shapes(lhs.shape(), rhs.shape())?;
    let annotation = surviving_annotation(lhs, rhs, &shape);
    let data = match dtype {
        DType::Double => {
            let l = lhs.to_double_array();
            let r = rhs.to_double_array();
            TensorData::Double(zip_broadcast(&l, &r, &shape, |a, b| double_op(*a, *b))?)
        }
        _ => {
            let l = lhs.to_int_array();
            let r = rhs.to_int_array();
            TensorData::Int64(zip_broadcast(&l, &r, &shape, |a, b| int_op(*a, *b))?)
        }
    };
    let mut out = Tensor::new(data)?;
    out.set_annotation(annotation);
    Ok(out)
}

/// Applies an elementwise comparison with promotion and broadcasting,
/// producing a bool array.
pub fn binary_compare(
    lhs: &Tensor,
    rhs: &Tensor,
    int_op: impl Fn(i64, i64) -> bool,
    double_op: impl Fn(f64, f64) -> bool,
) -> Result<Tensor> {
    let dtype = lhs.dtype().promote(rhs.dtype());
    let shape = broadcast_shapes(lhs.shape(), rhs.shape())?;
    let data = match dtype {
        DType::Double => {
            let l = lhs.to_double_array();
            let r = rhs.to_double_array();
            TensorData::Bool(zip_broadcast(&l, &r, &shape, |a, b| Ok(double_op(*a, *b)))?)
        }
        _ => {
            let l = lhs.to_int_array();
            let r = rhs.to_int_array();
            TensorData::Bool(zip_broadcast(&l, &r, &shape, |a, b| Ok(int_op(*a, *b)))?)
        }
    };
    Tensor::new(data)
}

/// Elementwise numeric negation; booleans promote to int64.
pub fn negate(value: &Tensor) -> Result<Tensor> {
    let data = match value.data() {
        TensorData::Double(a) => TensorData::Double(a.mapv(|v| -v)),
        _ => TensorData::Int64(value.to_int_array().mapv(|v| -v)),
    };
    let mut out = Tensor::new(data)?;
    out.set_annotation(value.annotation().cloned());
    Ok(out)
}

////////////////////////////////////////////////////////////////////////////
// Dot products

/// Local dot product for rank pairs (0,*), (*,0), (1,1), (1,2), (2,1) and
/// (2,2). Boolean operands promote to int64.
pub fn dot(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    // Rank-0 operands scale the other side elementwise.
    if lhs.rank() == 0 || rhs.rank() == 0 {
        return binary_numeric(
            lhs,
            rhs,
            |a, b| {
                a.checked_mul(b)
                    .ok_or_else(|| Error::user("integer overflow in dot product"))
            },
            |a, b| Ok(a * b),
        );
    }
    let dtype = lhs.dtype().promote(rhs.dtype()).promote(DType::Int64);
    match dtype {
        DType::Double => dot_typed(&lhs.to_double_array(), &rhs.to_double_array(), TensorData::Double),
        _ => dot_typed(&lhs.to_int_array(), &rhs.to_int_array(), TensorData::Int64),
    }
}

fn dot_typed<T>(lhs: &ArrayD<T>, rhs: &ArrayD<T>, wrap: impl Fn(ArrayD<T>) -> TensorData) -> Result<Tensor>
where
    T: ndarray::LinalgScalar,
{
    let contraction_mismatch = || {
        Error::shape(format!(
            "mismatched contraction axes: {:?} vs {:?}",
            lhs.shape(),
            rhs.shape()
        ))
    };
    match (lhs.ndim(), rhs.ndim()) {
        (1, 1) => {
            let l = lhs.view().into_dimensionality::<Ix1>().map_err(|e| Error::shape(e.to_string()))?;
            let r = rhs.view().into_dimensionality::<Ix1>().map_err(|e| Error::shape(e.to_string()))?;
            if l.len() != r.len() {
                return Err(contraction_mismatch());
            }
            Tensor::new(wrap(ArrayD::from_elem(IxDyn(&[]), l.dot(&r))))
        }
        (1, 2) => {
            let l = lhs.view().into_dimensionality::<Ix1>().map_err(|e| Error::shape(e.to_string()))?;
            let r = rhs.view().into_dimensionality::<Ix2>().map_err(|e| Error::shape(e.to_string()))?;
            if l.len() != r.nrows() {
                return Err(contraction_mismatch());
            }
            Tensor::new(wrap(l.dot(&r).into_dyn()))
        }
        (2, 1) => {
            let l = lhs.view().into_dimensionality::<Ix2>().map_err(|e| Error::shape(e.to_string()))?;
            let r = rhs.view().into_dimensionality::<Ix1>().map_err(|e| Error::shape(e.to_string()))?;
            if l.ncols() != r.len() {
                return Err(contraction_mismatch());
            }
            Tensor::new(wrap(l.dot(&r).into_dyn()))
        }
        (2, 2) => {
            let l = lhs.view().into_dimensionality::<Ix2>().map_err(|e| Error::shape(e.to_string()))?;
            let r = rhs.view().into_dimensionality::<Ix2>().map_err(|e| Error::shape(e.to_string()))?;
            if l.ncols() != r.nrows() {
                return Err(contraction_mismatch());
            }
            Tensor::new(wrap(l.dot(&r).into_dyn()))
        }
        (a, b) => Err(Error::shape(format!("dot product is not defined for ranks ({a}, {b})"))),
    }
}

////////////////////////////////////////////////////////////////////////////
// Stacking (array literals)

/// The array-literal constructor: scalars stack into a vector, equal-length
/// vectors into the rows of a matrix, equal-shape matrices into the pages of
/// a 3-tensor. Dtypes promote across elements.
pub fn stack_literal(elems: &[Tensor]) -> Result<Tensor> {
    if elems.is_empty() {
        return Tensor::new(TensorData::Double(
            ArrayD::from_shape_vec(IxDyn(&[0]), vec![]).expect("empty vector shape"),
        ));
    }
    let inner_rank = elems[0].rank();
    if inner_rank > 2 {
        return Err(Error::shape("cannot stack beyond rank 3"));
    }
    let inner_shape = elems[0].shape().to_vec();
    if elems.iter().any(|e| e.shape() != inner_shape.as_slice()) {
        return Err(Error::shape(format!(
            "stacked elements disagree on shape: expected {inner_shape:?}"
        )));
    }
    let dtype = elems.iter().fold(DType::Bool, |acc, e| acc.promote(e.dtype()));
    let mut shape = vec![elems.len()];
    shape.extend_from_slice(&inner_shape);
    match dtype {
        DType::Double => {
            let data: Vec<f64> = elems.iter().flat_map(|e| e.to_double_array().into_iter().collect::<Vec<_>>()).collect();
            Tensor::from_shape_double(&shape, data)
        }
        _ => {
            let data: Vec<i64> = elems.iter().flat_map(|e| e.to_int_array().into_iter().collect::<Vec<_>>()).collect();
            Tensor::from_shape_int(&shape, data)
        }
    }
}

/// Vertical stacking: vectors become matrix rows; matrices concatenate along
/// the row axis.
pub fn vstack(elems: &[Tensor]) -> Result<Tensor> {
    let rank = elems.first().map_or(0, Tensor::rank);
    if rank <= 1 {
        return stack_literal(elems);
    }
    if rank != 2 || elems.iter().any(|e| e.rank() != 2) {
        return Err(Error::shape("vstack expects vectors or matrices"));
    }
    let cols = elems[0].shape()[1];
    if elems.iter().any(|e| e.shape()[1] != cols) {
        return Err(Error::shape("vstack operands disagree on column count"));
    }
    let rows: usize = elems.iter().map(|e| e.shape()[0]).sum();
    let dtype = elems.iter().fold(DType::Bool, |acc, e| acc.promote(e.dtype()));
    match dtype {
        DType::Double => {
            let data: Vec<f64> = elems.iter().flat_map(|e| e.to_double_array().into_iter().collect::<Vec<_>>()).collect();
            Tensor::from_shape_double(&[rows, cols], data)
        }
        _ => {
            let data: Vec<i64> = elems.iter().flat_map(|e| e.to_int_array().into_iter().collect::<Vec<_>>()).collect();
            Tensor::from_shape_int(&[rows, cols], data)
        }
    }
}

/// Depth stacking: equal-shape matrices become the pages of a 3-tensor.
pub fn dstack(elems: &[Tensor]) -> Result<Tensor> {
    if elems.iter().any(|e| e.rank() != 2) {
        return Err(Error::shape("dstack expects matrices"));
    }
    stack_literal(elems)
}

////////////////////////////////////////////////////////////////////////////
// Slicing

/// One axis of a slice expression: a single index (dropping the axis) or a
/// half-open range (keeping it). Negative indices wrap from the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceSpec {
    Index(i64),
    Range { start: i64, stop: i64 },
}

fn resolve_index(index: i64, extent: usize, what: &str) -> Result<usize> {
    let extent = extent as i64;
    let resolved = if index < 0 { index + extent } else { index };
    if resolved < 0 || resolved >= extent {
        return Err(Error::user(format!(
            "{what} index {index} out of bounds for extent {extent}"
        )));
    }
    Ok(resolved as usize)
}

fn to_slice_info(specs: &[SliceSpec], shape: &[usize]) -> Result<Vec<SliceInfoElem>> {
    if specs.len() > shape.len() {
        return Err(Error::shape(format!(
            "{} slice specs for a rank-{} array",
            specs.len(),
            shape.len()
        )));
    }
    let mut info: Vec<SliceInfoElem> = Vec::with_capacity(shape.len());
    for (dim, spec) in specs.iter().enumerate() {
        match spec {
            SliceSpec::Index(i) => {
                let idx = resolve_index(*i, shape[dim], "slice")?;
                info.push(SliceInfoElem::Index(idx as isize));
            }
            SliceSpec::Range { start, stop } => {
                let start = resolve_index(*start, shape[dim] + 1, "slice start")?;
                let stop = resolve_index(*stop, shape[dim] + 1, "slice stop")?;
                if stop < start {
                    return Err(Error::user(format!("slice range {start}..{stop} is reversed")));
                }
                info.push(SliceInfoElem::Slice {
                    start: start as isize,
                    end: Some(stop as isize),
                    step: 1,
                });
            }
        }
    }
    // Unspecified trailing axes are taken whole.
    for _ in specs.len()..shape.len() {
        info.push(SliceInfoElem::Slice { start: 0, end: None, step: 1 });
    }
    Ok(info)
}

/// Reads a sub-array. Index specs drop their axis; range specs keep it.
pub fn read_slice(value: &Tensor, specs: &[SliceSpec]) -> Result<Tensor> {
    let info = to_slice_info(specs, value.shape())?;
    let data = match value.data() {
        TensorData::Bool(a) => TensorData::Bool(a.slice(info.as_slice()).to_owned()),
        TensorData::Int64(a) => TensorData::Int64(a.slice(info.as_slice()).to_owned()),
        TensorData::Double(a) => TensorData::Double(a.slice(info.as_slice()).to_owned()),
    };
    Tensor::new(data)
}

/// Writes `update` through a slice of `value`, broadcasting the update to
/// the slice's shape. The caller is responsible for copy-on-write of shared
/// buffers; this mutates in place.
pub fn write_slice(value: &mut Tensor, specs: &[SliceSpec], update: &Tensor) -> Result<()> {
    let info = to_slice_info(specs, value.shape())?;
    let dtype = value.dtype().promote(update.dtype());
    if dtype != value.dtype() {
        value.data = value.data.cast(dtype);
    }
    match &mut value.data {
        TensorData::Bool(a) => {
            let mut target = a.slice_mut(info.as_slice());
            let update = match update.data().cast(DType::Bool) {
                TensorData::Bool(u) => u,
                _ => unreachable!(),
            };
            let view = update
                .broadcast(target.raw_dim())
                .ok_or_else(|| Error::shape("update does not broadcast to the slice shape"))?;
            target.assign(&view);
        }
        TensorData::Int64(a) => {
            let mut target = a.slice_mut(info.as_slice());
            let update = update.to_int_array();
            let view = update
                .broadcast(target.raw_dim())
                .ok_or_else(|| Error::shape("update does not broadcast to the slice shape"))?;
            target.assign(&view);
        }
        TensorData::Double(a) => {
            let mut target = a.slice_mut(info.as_slice());
            let update = update.to_double_array();
            let view = update
                .broadcast(target.raw_dim())
                .ok_or_else(|| Error::shape("update does not broadcast to the slice shape"))?;
            target.assign(&view);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_order() {
        assert_eq!(DType::Bool.promote(DType::Int64), DType::Int64);
        assert_eq!(DType::Int64.promote(DType::Double), DType::Double);
        assert_eq!(DType::Bool.promote(DType::Bool), DType::Bool);
    }

    #[test]
    fn broadcast_left_pads_ranks() {
        assert_eq!(broadcast_shapes(&[2, 3], &[3]).unwrap().as_slice(), &[2, 3]);
        assert_eq!(broadcast_shapes(&[2, 1], &[1, 4]).unwrap().as_slice(), &[2, 4]);
        assert_eq!(broadcast_shapes(&[], &[5]).unwrap().as_slice(), &[5]);
        assert!(broadcast_shapes(&[2, 3], &[4]).is_err());
    }

    #[test]
    fn binary_numeric_promotes_and_broadcasts() {
        let m = Tensor::from_shape_int(&[2, 2], vec![1, 2, 3, 4]).unwrap();
        let s = Tensor::scalar_double(0.5);
        let out = binary_numeric(&m, &s, |a, b| Ok(a + b), |a, b| Ok(a + b)).unwrap();
        assert_eq!(out.dtype(), DType::Double);
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(out.to_double_array().iter().copied().collect::<Vec<_>>(), vec![1.5, 2.5, 3.5, 4.5]);
    }

    #[test]
    fn matmul_2x3_by_3x2() {
        let a = Tensor::from_shape_int(&[2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let b = Tensor::from_shape_int(&[3, 2], vec![7, 8, 9, 10, 11, 12]).unwrap();
        let c = dot(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.to_int_array().iter().copied().collect::<Vec<_>>(), vec![58, 64, 139, 154]);
    }

    #[test]
    fn dot_rejects_mismatched_contraction() {
        let a = Tensor::from_shape_int(&[2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let b = Tensor::from_shape_int(&[2, 2], vec![1, 2, 3, 4]).unwrap();
        let err = dot(&a, &b).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ShapeError);
    }

    #[test]
    fn literal_stacking_builds_matrices() {
        let rows = vec![Tensor::vector_int(vec![1, 2, 3]), Tensor::vector_int(vec![4, 5, 6])];
        let m = stack_literal(&rows).unwrap();
        assert_eq!(m.shape(), &[2, 3]);
        assert_eq!(m.to_int_array()[[1, 2]], 6);
    }

    #[test]
    fn slice_read_and_write() {
        let mut m = Tensor::from_shape_int(&[2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        let row = read_slice(&m, &[SliceSpec::Index(1)]).unwrap();
        assert_eq!(row.shape(), &[3]);
        assert_eq!(row.to_int_array().iter().copied().collect::<Vec<_>>(), vec![4, 5, 6]);

        write_slice(&mut m, &[SliceSpec::Index(0), SliceSpec::Range { start: 1, stop: 3 }], &Tensor::scalar_int(9))
            .unwrap();
        assert_eq!(m.to_int_array().iter().copied().collect::<Vec<_>>(), vec![1, 9, 9, 4, 5, 6]);
    }

    #[test]
    fn negative_indices_wrap() {
        let v = Tensor::vector_int(vec![10, 20, 30]);
        let last = read_slice(&v, &[SliceSpec::Index(-1)]).unwrap();
        assert_eq!(last.as_scalar_int().unwrap(), 30);
    }
}
