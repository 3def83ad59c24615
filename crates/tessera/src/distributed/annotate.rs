//! `annotate_d` and the locality introspection primitives.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    annotation::{Annotation, AnnotationEntry, LocalityInfo, Tiling},
    distributed::Locality,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands},
    primitives::expect_operands,
    values::Value,
};

/// Converts the surface list form `list("tile", list("rows", 0, 2), ...)`
/// into an annotation tree.
pub(crate) fn annotation_from_value(value: &Value) -> Result<Annotation> {
    let items = value.iter_list()?;
    let Some(Value::Str(name)) = items.first() else {
        return Err(Error::type_error("an annotation list starts with its name string"));
    };
    let mut entries = Vec::with_capacity(items.len() - 1);
    for item in &items[1..] {
        entries.push(match item {
            Value::Bool(v) => AnnotationEntry::Bool(*v),
            Value::Int(v) => AnnotationEntry::Int(*v),
            Value::Double(v) => AnnotationEntry::Double(*v),
            Value::Str(v) => AnnotationEntry::Str(v.to_string()),
            Value::List(_) => AnnotationEntry::Nested(annotation_from_value(item)?),
            other => {
                return Err(Error::type_error(format!(
                    "annotation entries are scalars or nested lists, received {}",
                    other.type_name()
                )));
            }
        });
    }
    Ok(Annotation::new(name.to_string(), entries))
}

/// The combined annotation attached to distributed values: locality
/// information, the tile annotation, and the distributed object's name.
pub(crate) fn localities_annotation(info: LocalityInfo, tiling: &Tiling, object_name: Option<&str>) -> Annotation {
    let mut entries = vec![
        AnnotationEntry::Nested(info.as_annotation()),
        AnnotationEntry::Nested(tiling.as_annotation()),
    ];
    if let Some(name) = object_name {
        entries.push(AnnotationEntry::Nested(Annotation::new(
            "name",
            vec![AnnotationEntry::Str(name.to_owned())],
        )));
    }
    Annotation::new("localities", entries)
}

/// The registered name of an annotated value, if any.
pub(crate) fn object_name(ann: &Annotation) -> Option<String> {
    let name = ann.get("name")?;
    match name.entries().first() {
        Some(AnnotationEntry::Str(text)) => Some(text.clone()),
        _ => None,
    }
}

/// `annotate_d(a, name, tiles)`: attaches a tile annotation describing the
/// slab this locality holds, registering the value under `name`.
#[derive(Debug, Default)]
struct AnnotateDOp;

#[async_trait]
impl PrimitiveOp for AnnotateDOp {
    fn kind(&self) -> &'static str {
        "annotate_d"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let tensor = values[0]
            .to_tensor()
            .map_err(|_| Error::type_error(format!("annotate_d expects an array, received {}", values[0].type_name())))?;
        let name = values[1].to_str()?;
        let annotation = annotation_from_value(&values[2])?;
        let tiling = Tiling::from_annotation(&annotation)?;
        let local_shape = tiling.local_shape()?;
        if local_shape.as_slice() != tensor.shape() {
            return Err(Error::locality(format!(
                "tile annotation describes shape {:?} but the local array has shape {:?}",
                local_shape.as_slice(),
                tensor.shape()
            )));
        }
        let combined = localities_annotation(node.locality().info(), &tiling, Some(name));
        let annotated = tensor.as_ref().clone().with_annotation(combined);
        Ok(Value::from(annotated))
    }
}

/// `locality_id()` (alias `find_here()`): the numeric id of the evaluating
/// locality.
#[derive(Debug)]
struct LocalityIdOp {
    kind: &'static str,
}

#[async_trait]
impl PrimitiveOp for LocalityIdOp {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn direct_eval(&self) -> bool {
        true
    }

    async fn eval(&self, node: &PrimitiveNode, _params: &[Value], _ctx: &EvalContext) -> Result<Value> {
        Ok(Value::Int(i64::from(node.locality().id())))
    }
}

/// `num_localities()`: how many localities participate in this run.
#[derive(Debug, Default)]
struct NumLocalitiesOp;

#[async_trait]
impl PrimitiveOp for NumLocalitiesOp {
    fn kind(&self) -> &'static str {
        "num_localities"
    }

    fn direct_eval(&self) -> bool {
        true
    }

    async fn eval(&self, node: &PrimitiveNode, _params: &[Value], _ctx: &EvalContext) -> Result<Value> {
        Ok(Value::Int(i64::from(node.locality().num_localities())))
    }
}

fn make_annotate_d(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("annotate_d", &operands, 3, Some(3))?;
    Ok(Primitive::new(Box::new(AnnotateDOp), operands, parts, locality))
}

fn make_locality_id(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("locality_id", &operands, 0, Some(0))?;
    Ok(Primitive::new(Box::new(LocalityIdOp { kind: "locality_id" }), operands, parts, locality))
}

fn make_find_here(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("find_here", &operands, 0, Some(0))?;
    Ok(Primitive::new(Box::new(LocalityIdOp { kind: "find_here" }), operands, parts, locality))
}

fn make_num_localities(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("num_localities", &operands, 0, Some(0))?;
    Ok(Primitive::new(Box::new(NumLocalitiesOp), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "annotate_d",
            templates: &["annotate_d(_1, _2, _3)"],
            factory: make_annotate_d,
            help: "annotate_d(a, name, tiles): attach this locality's tile annotation",
        },
        MatchPattern {
            name: "locality_id",
            templates: &["locality_id()"],
            factory: make_locality_id,
            help: "locality_id(): the id of the evaluating locality",
        },
        MatchPattern {
            name: "find_here",
            templates: &["find_here()"],
            factory: make_find_here,
            help: "find_here(): alias of locality_id",
        },
        MatchPattern {
            name: "num_localities",
            templates: &["num_localities()"],
            factory: make_num_localities,
            help: "num_localities(): how many localities participate",
        },
    ]
}
