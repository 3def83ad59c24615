#![doc = include_str!("../../../README.md")]

mod annotation;
mod ast;
mod compiler;
mod distributed;
mod error;
mod lexer;
mod parser;
mod patterns;
mod primitive;
mod primitives;
mod topology;
mod values;

pub use crate::{
    annotation::{Annotation, AnnotationEntry, LocalityInfo, TileAxis, TileSpan, Tiling},
    compiler::{CompiledProgram, Environment, Snippets, compile},
    distributed::{Fabric, Locality, Runtime, run_spmd},
    error::{Error, ErrorKind, Result, Span},
    patterns::{MatchPattern, Registry},
    primitive::{
        Closure, EvalContext, EvalMode, Frame, Frames, NameParts, Primitive, PrimitiveNode, PrimitiveOp,
        compose_primitive_name, eval_operands, parse_primitive_name, value_operand,
    },
    topology::Topology,
    values::{DType, DictValue, RangeValue, SliceSpec, Tensor, TensorData, Value},
};
