//! The runtime value model: a tagged sum over nil, scalars, strings, numeric
//! arrays, ranges, lists, dictionaries, primitive handles, and function
//! closures.
//!
//! Small values (ints, bools, handles) copy; large payloads (arrays, lists,
//! dictionaries, strings) are reference-counted and copy-on-write at their
//! mutation sites.

pub mod dict;
pub mod range;
pub mod tensor;

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

pub use dict::DictValue;
pub use range::RangeValue;
pub use tensor::{DType, SliceSpec, Tensor, TensorData};

use crate::{
    error::{Error, Result},
    primitive::{Closure, Primitive},
};

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Arc<str>),
    Tensor(Arc<Tensor>),
    Range(RangeValue),
    List(Arc<Vec<Value>>),
    Dict(Arc<DictValue>),
    /// A reference to a primitive node.
    Handle(Primitive),
    /// A closure: a function node plus bound arguments.
    Function(Arc<Closure>),
}

impl Value {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int64",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Tensor(_) => "array",
            Self::Range(_) => "range",
            Self::List(_) => "list",
            Self::Dict(_) => "dictionary",
            Self::Handle(_) => "handle",
            Self::Function(_) => "function",
        }
    }

    /// Boolean projection. Handles and functions have none; projecting them
    /// is a type error.
    pub fn is_true(&self) -> Result<bool> {
        match self {
            Self::Nil => Ok(false),
            Self::Bool(v) => Ok(*v),
            Self::Int(v) => Ok(*v != 0),
            Self::Double(v) => Ok(*v != 0.0),
            Self::Str(v) => Ok(!v.is_empty()),
            Self::Tensor(t) => Ok(t.truthy()),
            Self::Range(r) => Ok(!r.is_empty()),
            Self::List(l) => Ok(!l.is_empty()),
            Self::Dict(d) => Ok(!d.is_empty()),
            Self::Handle(_) | Self::Function(_) => {
                Err(Error::type_error(format!("a {} has no boolean projection", self.type_name())))
            }
        }
    }

    /// Whether this value is a numeric scalar or array.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Double(_) | Self::Tensor(_))
    }

    pub fn to_int(&self) -> Result<i64> {
        match self {
            Self::Bool(v) => Ok(i64::from(*v)),
            Self::Int(v) => Ok(*v),
            Self::Double(v) => Ok(*v as i64),
            Self::Tensor(t) => t.as_scalar_int(),
            other => Err(Error::type_error(format!("expected an integer, received {}", other.type_name()))),
        }
    }

    pub fn to_double(&self) -> Result<f64> {
        match self {
            Self::Bool(v) => Ok(f64::from(i8::from(*v))),
            Self::Int(v) => Ok(*v as f64),
            Self::Double(v) => Ok(*v),
            Self::Tensor(t) => t.as_scalar_double(),
            other => Err(Error::type_error(format!("expected a number, received {}", other.type_name()))),
        }
    }

    pub fn to_str(&self) -> Result<&str> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(Error::type_error(format!("expected a string, received {}", other.type_name()))),
        }
    }

    /// Numeric view: scalars wrap into rank-0 arrays, array payloads share
    /// their buffer.
    pub fn to_tensor(&self) -> Result<Arc<Tensor>> {
        match self {
            Self::Bool(v) => Ok(Arc::new(Tensor::scalar_bool(*v))),
            Self::Int(v) => Ok(Arc::new(Tensor::scalar_int(*v))),
            Self::Double(v) => Ok(Arc::new(Tensor::scalar_double(*v))),
            Self::Tensor(t) => Ok(Arc::clone(t)),
            other => Err(Error::type_error(format!(
                "expected a numeric value, received {}",
                other.type_name()
            ))),
        }
    }

    /// Collapses a rank-0 array back into a scalar value; other values pass
    /// through. Keeps primitive results scalar where the surface syntax
    /// wrote scalars.
    #[must_use]
    pub fn demote_scalar(self) -> Self {
        if let Self::Tensor(t) = &self {
            if t.rank() == 0 && t.annotation().is_none() {
                return match t.data() {
                    TensorData::Bool(a) => Self::Bool(a.iter().next().copied().unwrap_or_default()),
                    TensorData::Int64(a) => Self::Int(a.iter().next().copied().unwrap_or_default()),
                    TensorData::Double(a) => Self::Double(a.iter().next().copied().unwrap_or_default()),
                };
            }
        }
        self
    }

    /// Materializes list-like values (lists and ranges) into a vector.
    pub fn iter_list(&self) -> Result<Vec<Self>> {
        match self {
            Self::List(l) => Ok(l.as_ref().clone()),
            Self::Range(r) => Ok(r.iter().map(Self::Int).collect()),
            other => Err(Error::type_error(format!("expected a list, received {}", other.type_name()))),
        }
    }

    /// Host boundary constructor: dense row-major data plus an explicit
    /// shape vector.
    pub fn dense(shape: &[usize], data: Vec<f64>) -> Result<Self> {
        Ok(Self::Tensor(Arc::new(Tensor::from_shape_double(shape, data)?)))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tensor(a), Self::Tensor(b)) => a == b,
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (Self::Handle(a), Self::Handle(b)) => a.name() == b.name(),
            (Self::Function(a), Self::Function(b)) => {
                a.target.name() == b.target.name() && a.bound == b.bound
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Nil => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
            Self::Tensor(t) => {
                t.dtype().hash(state);
                t.shape().hash(state);
                match t.data() {
                    TensorData::Bool(a) => a.iter().for_each(|v| v.hash(state)),
                    TensorData::Int64(a) => a.iter().for_each(|v| v.hash(state)),
                    TensorData::Double(a) => a.iter().for_each(|v| v.to_bits().hash(state)),
                }
            }
            Self::Range(r) => r.hash(state),
            Self::List(l) => l.iter().for_each(|v| v.hash(state)),
            // Dictionaries hash by size only; equal dictionaries always
            // have equal sizes, which keeps Hash consistent with Eq.
            Self::Dict(d) => d.len().hash(state),
            Self::Handle(p) => p.name().hash(state),
            Self::Function(c) => c.target.name().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Self::Str(v) => write!(f, "{v}"),
            Self::Tensor(t) => match t.data() {
                TensorData::Bool(a) => write!(f, "{a}"),
                TensorData::Int64(a) => write!(f, "{a}"),
                TensorData::Double(a) => write!(f, "{a}"),
            },
            Self::Range(r) => write!(f, "range({}, {}, {})", r.start, r.stop, r.step),
            Self::List(l) => {
                write!(f, "list(")?;
                for (i, item) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Dict(d) => {
                write!(f, "dict(")?;
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "list({k}, {v})")?;
                }
                write!(f, ")")
            }
            Self::Handle(p) => write!(f, "{}", p.name()),
            Self::Function(c) => write!(f, "<function {}>", c.target.name()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(Arc::from(v.as_str()))
    }
}

impl From<Tensor> for Value {
    fn from(v: Tensor) -> Self {
        Self::Tensor(Arc::new(v))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(Arc::new(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_true().unwrap());
        assert!(Value::Int(3).is_true().unwrap());
        assert!(!Value::Double(0.0).is_true().unwrap());
        assert!(Value::from("x").is_true().unwrap());
        assert!(!Value::List(Arc::new(vec![])).is_true().unwrap());
    }

    #[test]
    fn scalar_demotion() {
        let v = Value::Tensor(Arc::new(Tensor::scalar_int(7))).demote_scalar();
        assert_eq!(v, Value::Int(7));
        let kept = Value::Tensor(Arc::new(Tensor::vector_int(vec![7]))).demote_scalar();
        assert!(matches!(kept, Value::Tensor(_)));
    }

    #[test]
    fn strict_structural_equality() {
        assert_ne!(Value::Int(2), Value::Double(2.0));
        assert_eq!(Value::from("a"), Value::from("a"));
    }

    #[test]
    fn range_materializes_as_list() {
        let items = Value::Range(RangeValue::upto(3)).iter_list().unwrap();
        assert_eq!(items, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
    }
}
