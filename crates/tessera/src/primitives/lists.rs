//! Lists, ranges, and the functional traversals over them.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use super::{expect_operands, invoke_function};
use crate::{
    distributed::Locality,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands, value_operand},
    values::{RangeValue, Value},
};

/// `list(...)`: the ordered-sequence constructor.
#[derive(Debug, Default)]
struct ListOp;

#[async_trait]
impl PrimitiveOp for ListOp {
    fn kind(&self) -> &'static str {
        "list"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let items = eval_operands(node.operands(), params, ctx).await?;
        Ok(Value::List(Arc::new(items)))
    }
}

/// `dict(pairs)`: the dictionary constructor. Accepts `list(k, v)` pairs
/// either as individual arguments or wrapped in one list.
#[derive(Debug, Default)]
struct DictOp;

#[async_trait]
impl PrimitiveOp for DictOp {
    fn kind(&self) -> &'static str {
        "dict"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let pairs = match values.as_slice() {
            [Value::List(items)] if items.iter().all(|i| matches!(i, Value::List(_))) => items.as_ref().clone(),
            _ => values,
        };
        let mut dict = crate::values::DictValue::new();
        for pair in pairs {
            let entry = pair.iter_list()?;
            let [key, value] = entry.as_slice() else {
                return Err(Error::type_error("dict entries are list(key, value) pairs"));
            };
            dict.insert(key.clone(), value.clone())?;
        }
        Ok(Value::Dict(Arc::new(dict)))
    }
}

/// `range(stop)` / `range(start, stop[, step])`: a lazy integer interval.
#[derive(Debug, Default)]
struct RangeOp;

#[async_trait]
impl PrimitiveOp for RangeOp {
    fn kind(&self) -> &'static str {
        "range"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let bounds = eval_operands(node.operands(), params, ctx).await?;
        let range = match bounds.as_slice() {
            [stop] => RangeValue::upto(stop.to_int()?),
            [start, stop] => RangeValue::new(start.to_int()?, stop.to_int()?, 1)?,
            [start, stop, step] => RangeValue::new(start.to_int()?, stop.to_int()?, step.to_int()?)?,
            other => return Err(Error::arity("range", "1 to 3", other.len())),
        };
        Ok(Value::Range(range))
    }
}

/// `append(l, v)`: a new list with `v` appended.
#[derive(Debug, Default)]
struct AppendOp;

#[async_trait]
impl PrimitiveOp for AppendOp {
    fn kind(&self) -> &'static str {
        "append"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let mut items = value_operand(&node.operands()[0], params, ctx).await?.iter_list()?;
        items.push(value_operand(&node.operands()[1], params, ctx).await?);
        Ok(Value::List(Arc::new(items)))
    }
}

/// `length(v)`: element count of lists, ranges, strings, and dictionaries.
#[derive(Debug, Default)]
struct LengthOp;

#[async_trait]
impl PrimitiveOp for LengthOp {
    fn kind(&self) -> &'static str {
        "length"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let value = value_operand(&node.operands()[0], params, ctx).await?;
        let len = match &value {
            Value::List(items) => items.len(),
            Value::Range(range) => range.len(),
            Value::Str(text) => text.chars().count(),
            Value::Dict(dict) => dict.len(),
            Value::Tensor(tensor) => tensor.len(),
            other => {
                return Err(Error::type_error(format!("a {} has no length", other.type_name())));
            }
        };
        Ok(Value::Int(len as i64))
    }
}

/// `car(l)`: the first element.
#[derive(Debug, Default)]
struct CarOp;

#[async_trait]
impl PrimitiveOp for CarOp {
    fn kind(&self) -> &'static str {
        "car"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let items = value_operand(&node.operands()[0], params, ctx).await?.iter_list()?;
        items
            .into_iter()
            .next()
            .ok_or_else(|| Error::user("car of an empty list"))
    }
}

/// `cdr(l)`: everything after the first element.
#[derive(Debug, Default)]
struct CdrOp;

#[async_trait]
impl PrimitiveOp for CdrOp {
    fn kind(&self) -> &'static str {
        "cdr"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let items = value_operand(&node.operands()[0], params, ctx).await?.iter_list()?;
        if items.is_empty() {
            return Err(Error::user("cdr of an empty list"));
        }
        Ok(Value::List(Arc::new(items[1..].to_vec())))
    }
}

/// Materializes the list operands of a traversal and checks they agree on
/// length.
async fn traversal_lists(
    operands: &[Value],
    params: &[Value],
    ctx: &EvalContext,
    who: &str,
) -> Result<Vec<Vec<Value>>> {
    let mut lists = Vec::with_capacity(operands.len());
    for operand in operands {
        lists.push(value_operand(operand, params, ctx).await?.iter_list()?);
    }
    if let Some(first) = lists.first() {
        if lists.iter().any(|l| l.len() != first.len()) {
            return Err(Error::shape(format!("{who} operand lists disagree on length")));
        }
    }
    Ok(lists)
}

fn zipped_args(lists: &[Vec<Value>], index: usize) -> Vec<Value> {
    lists.iter().map(|l| l[index].clone()).collect()
}

/// `map(f, l, ...)`: applies `f` across the zipped lists, in order.
#[derive(Debug, Default)]
struct MapOp;

#[async_trait]
impl PrimitiveOp for MapOp {
    fn kind(&self) -> &'static str {
        "map"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let f = value_operand(&node.operands()[0], params, ctx).await?;
        let lists = traversal_lists(&node.operands()[1..], params, ctx, self.kind()).await?;
        let len = lists.first().map_or(0, Vec::len);
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(invoke_function(&f, zipped_args(&lists, i), ctx, self.kind()).await?);
        }
        Ok(Value::List(Arc::new(out)))
    }
}

/// `parallel_map(f, l, ...)`: fans out across elements; results join in
/// original order, the first error by element index wins.
#[derive(Debug, Default)]
struct ParallelMapOp;

#[async_trait]
impl PrimitiveOp for ParallelMapOp {
    fn kind(&self) -> &'static str {
        "parallel_map"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let f = value_operand(&node.operands()[0], params, ctx).await?;
        let lists = traversal_lists(&node.operands()[1..], params, ctx, self.kind()).await?;
        let len = lists.first().map_or(0, Vec::len);
        let results = join_all((0..len).map(|i| {
            let args = zipped_args(&lists, i);
            let f = f.clone();
            async move { invoke_function(&f, args, ctx, "parallel_map").await }
        }))
        .await;
        let out: Result<Vec<Value>> = results.into_iter().collect();
        Ok(Value::List(Arc::new(out?)))
    }
}

/// `filter(p, l)`: keeps the elements whose predicate value is truthy.
#[derive(Debug, Default)]
struct FilterOp;

#[async_trait]
impl PrimitiveOp for FilterOp {
    fn kind(&self) -> &'static str {
        "filter"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let p = value_operand(&node.operands()[0], params, ctx).await?;
        let items = value_operand(&node.operands()[1], params, ctx).await?.iter_list()?;
        let mut out = Vec::new();
        for item in items {
            if invoke_function(&p, vec![item.clone()], ctx, self.kind()).await?.is_true()? {
                out.push(item);
            }
        }
        Ok(Value::List(Arc::new(out)))
    }
}

/// `fold_left(f, init, l)`: `f(f(init, l0), l1)...`
#[derive(Debug, Default)]
struct FoldLeftOp;

#[async_trait]
impl PrimitiveOp for FoldLeftOp {
    fn kind(&self) -> &'static str {
        "fold_left"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let f = value_operand(&node.operands()[0], params, ctx).await?;
        let mut acc = value_operand(&node.operands()[1], params, ctx).await?;
        let items = value_operand(&node.operands()[2], params, ctx).await?.iter_list()?;
        for item in items {
            acc = invoke_function(&f, vec![acc, item], ctx, self.kind()).await?;
        }
        Ok(acc)
    }
}

/// `fold_right(f, l, init)`: `f(l0, f(l1, ... f(ln, init)))`.
#[derive(Debug, Default)]
struct FoldRightOp;

#[async_trait]
impl PrimitiveOp for FoldRightOp {
    fn kind(&self) -> &'static str {
        "fold_right"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let f = value_operand(&node.operands()[0], params, ctx).await?;
        let items = value_operand(&node.operands()[1], params, ctx).await?.iter_list()?;
        let mut acc = value_operand(&node.operands()[2], params, ctx).await?;
        for item in items.into_iter().rev() {
            acc = invoke_function(&f, vec![item, acc], ctx, self.kind()).await?;
        }
        Ok(acc)
    }
}

/// `for_each(f, l)`: applies `f` for effect, returns nil.
#[derive(Debug, Default)]
struct ForEachOp;

#[async_trait]
impl PrimitiveOp for ForEachOp {
    fn kind(&self) -> &'static str {
        "for_each"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let f = value_operand(&node.operands()[0], params, ctx).await?;
        let items = value_operand(&node.operands()[1], params, ctx).await?.iter_list()?;
        for item in items {
            invoke_function(&f, vec![item], ctx, self.kind()).await?;
        }
        Ok(Value::Nil)
    }
}

/// `parallel_for_each(f, l)`: fans out for effect; awaits all elements.
#[derive(Debug, Default)]
struct ParallelForEachOp;

#[async_trait]
impl PrimitiveOp for ParallelForEachOp {
    fn kind(&self) -> &'static str {
        "parallel_for_each"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let f = value_operand(&node.operands()[0], params, ctx).await?;
        let items = value_operand(&node.operands()[1], params, ctx).await?.iter_list()?;
        let results = join_all(items.into_iter().map(|item| {
            let f = f.clone();
            async move { invoke_function(&f, vec![item], ctx, "parallel_for_each").await }
        }))
        .await;
        for result in results {
            result?;
        }
        Ok(Value::Nil)
    }
}

/// `apply(f, argList)`: invokes `f` with the unpacked list; the list
/// evaluates before the body.
#[derive(Debug, Default)]
struct ApplyOp;

#[async_trait]
impl PrimitiveOp for ApplyOp {
    fn kind(&self) -> &'static str {
        "apply"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let args = value_operand(&node.operands()[1], params, ctx).await?.iter_list()?;
        let f = value_operand(&node.operands()[0], params, ctx).await?;
        invoke_function(&f, args, ctx, self.kind()).await
    }
}

macro_rules! factory {
    ($fn_name:ident, $op:expr, $kind:literal, $min:expr, $max:expr) => {
        fn $fn_name(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
            expect_operands($kind, &operands, $min, $max)?;
            Ok(Primitive::new(Box::new($op), operands, parts, locality))
        }
    };
}

factory!(make_list, ListOp, "list", 0, None);
factory!(make_dict, DictOp, "dict", 0, None);
factory!(make_range, RangeOp, "range", 1, Some(3));
factory!(make_append, AppendOp, "append", 2, Some(2));
factory!(make_length, LengthOp, "length", 1, Some(1));
factory!(make_car, CarOp, "car", 1, Some(1));
factory!(make_cdr, CdrOp, "cdr", 1, Some(1));
factory!(make_map, MapOp, "map", 2, None);
factory!(make_parallel_map, ParallelMapOp, "parallel_map", 2, None);
factory!(make_filter, FilterOp, "filter", 2, Some(2));
factory!(make_fold_left, FoldLeftOp, "fold_left", 3, Some(3));
factory!(make_fold_right, FoldRightOp, "fold_right", 3, Some(3));
factory!(make_for_each, ForEachOp, "for_each", 2, Some(2));
factory!(make_parallel_for_each, ParallelForEachOp, "parallel_for_each", 2, Some(2));
factory!(make_apply, ApplyOp, "apply", 2, Some(2));

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "list",
            templates: &["list(__1)"],
            factory: make_list,
            help: "list(...): an ordered sequence of values",
        },
        MatchPattern {
            name: "dict",
            templates: &["dict(__1)"],
            factory: make_dict,
            help: "dict(pairs): a dictionary from list(key, value) pairs",
        },
        MatchPattern {
            name: "range",
            templates: &["range(_1)", "range(_1, _2)", "range(_1, _2, _3)"],
            factory: make_range,
            help: "range(start, stop, step): a lazy integer interval",
        },
        MatchPattern {
            name: "append",
            templates: &["append(_1, _2)"],
            factory: make_append,
            help: "append(l, v): a new list with v appended",
        },
        MatchPattern {
            name: "length",
            templates: &["length(_1)"],
            factory: make_length,
            help: "length(v): the element count",
        },
        MatchPattern {
            name: "car",
            templates: &["car(_1)"],
            factory: make_car,
            help: "car(l): the first element",
        },
        MatchPattern {
            name: "cdr",
            templates: &["cdr(_1)"],
            factory: make_cdr,
            help: "cdr(l): the list without its first element",
        },
        MatchPattern {
            name: "map",
            templates: &["map(_1, _2, __3)"],
            factory: make_map,
            help: "map(f, l, ...): apply f across zipped lists",
        },
        MatchPattern {
            name: "parallel_map",
            templates: &["parallel_map(_1, _2, __3)"],
            factory: make_parallel_map,
            help: "parallel_map(f, l, ...): map with concurrent elements, ordered results",
        },
        MatchPattern {
            name: "filter",
            templates: &["filter(_1, _2)"],
            factory: make_filter,
            help: "filter(p, l): elements whose predicate is truthy",
        },
        MatchPattern {
            name: "fold_left",
            templates: &["fold_left(_1, _2, _3)"],
            factory: make_fold_left,
            help: "fold_left(f, init, l): left fold",
        },
        MatchPattern {
            name: "fold_right",
            templates: &["fold_right(_1, _2, _3)"],
            factory: make_fold_right,
            help: "fold_right(f, l, init): right fold",
        },
        MatchPattern {
            name: "for_each",
            templates: &["for_each(_1, _2)"],
            factory: make_for_each,
            help: "for_each(f, l): apply for effect, return nil",
        },
        MatchPattern {
            name: "parallel_for_each",
            templates: &["parallel_for_each(_1, _2)"],
            factory: make_parallel_for_each,
            help: "parallel_for_each(f, l): concurrent for_each",
        },
        MatchPattern {
            name: "apply",
            templates: &["apply(_1, _2)"],
            factory: make_apply,
            help: "apply(f, argList): invoke f with the unpacked argument list",
        },
    ]
}
