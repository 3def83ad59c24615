//! Variables, functions, and argument access: the scoping primitives the
//! compiler lowers `define`, `lambda`, and identifier references into.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{expect_operands, invoke_function};
use crate::{
    distributed::Locality,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{Closure, EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands, value_operand},
    values::Value,
};

/// The mutable cell behind `define(x, body)`.
///
/// State machine: *unbound* (fresh) → *evaluating* (first eval runs the
/// body) → *bound* (value cached). Subsequent evals return the cached value
/// without re-running the body; `store` overwrites the cell. The cell lock
/// is never held across the body await: concurrent first evaluations may
/// both run the body, but exactly one result is cached.
#[derive(Debug, Default)]
struct VariableOp {
    cell: Mutex<Option<Value>>,
}

#[async_trait]
impl PrimitiveOp for VariableOp {
    fn kind(&self) -> &'static str {
        "variable"
    }

    fn direct_eval(&self) -> bool {
        true
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        if let Ok(cell) = self.cell.lock() {
            if let Some(value) = cell.as_ref() {
                return Ok(value.clone());
            }
        }
        let value = value_operand(&node.operands()[0], params, ctx).await?;
        let mut cell = self
            .cell
            .lock()
            .map_err(|_| Error::user("variable cell poisoned"))?;
        match cell.as_ref() {
            Some(existing) => Ok(existing.clone()),
            None => {
                *cell = Some(value.clone());
                Ok(value)
            }
        }
    }

    async fn store(&self, _node: &PrimitiveNode, value: Value, _params: &[Value], _ctx: &EvalContext) -> Result<()> {
        let mut cell = self
            .cell
            .lock()
            .map_err(|_| Error::user("variable cell poisoned"))?;
        *cell = Some(value);
        Ok(())
    }
}

/// Reads a binding; `store` through it mutates the referenced cell.
#[derive(Debug, Default)]
struct AccessVariableOp;

fn handle_operand<'a>(node: &'a PrimitiveNode, kind: &str) -> Result<&'a Primitive> {
    match node.operands().first() {
        Some(Value::Handle(target)) => Ok(target),
        _ => Err(Error::type_error(format!("{kind} expects a primitive handle operand"))),
    }
}

#[async_trait]
impl PrimitiveOp for AccessVariableOp {
    fn kind(&self) -> &'static str {
        "access-variable"
    }

    fn direct_eval(&self) -> bool {
        true
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        handle_operand(node, self.kind())?.eval(params, ctx).await
    }

    async fn store(&self, node: &PrimitiveNode, value: Value, params: &[Value], ctx: &EvalContext) -> Result<()> {
        handle_operand(node, self.kind())?.store(value, params, ctx).await
    }
}

/// A function body. Called through `call-function`/`apply` with the caller's
/// argument pack; `bind` can pre-set the pack without evaluating.
#[derive(Debug)]
struct FunctionOp {
    kind: &'static str,
    bound: Mutex<Vec<Value>>,
}

impl FunctionOp {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            bound: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PrimitiveOp for FunctionOp {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let args: Vec<Value> = if params.is_empty() {
            self.bound.lock().map(|bound| bound.clone()).unwrap_or_default()
        } else {
            params.to_vec()
        };
        let ctx = ctx.with_args(args);
        let body_args = ctx.args().to_vec();
        value_operand(&node.operands()[0], &body_args, &ctx).await
    }

    async fn bind(&self, _node: &PrimitiveNode, params: &[Value], _ctx: &EvalContext) -> Result<bool> {
        let mut bound = self
            .bound
            .lock()
            .map_err(|_| Error::user("function binding poisoned"))?;
        let changed = bound.as_slice() != params;
        if changed {
            *bound = params.to_vec();
        }
        Ok(changed)
    }
}

/// Yields a first-class function value for a function node; used at value
/// positions and for lambdas.
#[derive(Debug, Default)]
struct AccessFunctionOp;

#[async_trait]
impl PrimitiveOp for AccessFunctionOp {
    fn kind(&self) -> &'static str {
        "access-function"
    }

    fn direct_eval(&self) -> bool {
        true
    }

    async fn eval(&self, node: &PrimitiveNode, _params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let target = handle_operand(node, self.kind())?;
        Ok(Value::Function(Arc::new(Closure::with_frames(
            target.clone(),
            ctx.frames().clone(),
        ))))
    }
}

/// Positional argument access inside a function body, with an optional
/// default.
#[derive(Debug, Default)]
struct AccessArgumentOp;

#[async_trait]
impl PrimitiveOp for AccessArgumentOp {
    fn kind(&self) -> &'static str {
        "access-argument"
    }

    fn direct_eval(&self) -> bool {
        true
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let index = node.operands()[0].to_int()? as usize;
        if let Some(value) = ctx.args().get(index) {
            return Ok(value.clone());
        }
        if let Some(default) = node.operands().get(1) {
            return value_operand(default, params, ctx).await;
        }
        Err(Error::arity(
            "function call",
            format!("at least {}", index + 1),
            ctx.args().len(),
        ))
    }
}

/// Calls a statically-resolved function: operand 0 is the callee, the rest
/// are argument expressions. Arguments evaluate before the body.
#[derive(Debug, Default)]
struct CallFunctionOp;

#[async_trait]
impl PrimitiveOp for CallFunctionOp {
    fn kind(&self) -> &'static str {
        "call-function"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let args = eval_operands(&node.operands()[1..], params, ctx).await?;
        // A statically-resolved function node is the callee itself;
        // anything else (access-variable, target-reference, ...) evaluates
        // down to a function value first.
        let callee = match &node.operands()[0] {
            callee @ Value::Handle(handle) if matches!(handle.kind(), "function" | "lambda") => callee.clone(),
            operand => value_operand(operand, params, ctx).await?,
        };
        invoke_function(&callee, args, ctx, self.kind()).await
    }
}

/// Resolves a name through the context frames at eval time. This is what
/// breaks the cycle between a function name and its body: the body refers
/// to the name, and the name is defined by the time the body runs.
#[derive(Debug, Default)]
struct TargetReferenceOp;

#[async_trait]
impl PrimitiveOp for TargetReferenceOp {
    fn kind(&self) -> &'static str {
        "target-reference"
    }

    async fn eval(&self, node: &PrimitiveNode, _params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let name = node.operands()[0].to_str()?;
        ctx.lookup(name)
            .ok_or_else(|| Error::name(format!("'{name}' is not defined in the current context")))
    }
}

/// Registers a named function value into the innermost frame, so
/// target-references (recursion, escaping closures) can resolve it.
#[derive(Debug, Default)]
struct DefineFunctionOp;

#[async_trait]
impl PrimitiveOp for DefineFunctionOp {
    fn kind(&self) -> &'static str {
        "define-function"
    }

    async fn eval(&self, node: &PrimitiveNode, _params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let target = handle_operand(node, self.kind())?;
        let name = node.operands()[1].to_str()?;
        let value = Value::Function(Arc::new(Closure::with_frames(target.clone(), ctx.frames().clone())));
        ctx.define(name, value.clone());
        Ok(value)
    }
}

/// `store(target, value)`: evaluates the value, writes it through the
/// target's `store`, returns nil.
#[derive(Debug, Default)]
struct StoreOp;

#[async_trait]
impl PrimitiveOp for StoreOp {
    fn kind(&self) -> &'static str {
        "store"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let target = handle_operand(node, self.kind())?;
        let value = value_operand(&node.operands()[1], params, ctx).await?;
        target.store(value, params, ctx).await?;
        Ok(Value::Nil)
    }
}

fn make_variable(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("variable", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(VariableOp::default()), operands, parts, locality))
}

fn make_access_variable(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("access-variable", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(AccessVariableOp), operands, parts, locality))
}

fn make_function(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("function", &operands, 1, Some(2))?;
    Ok(Primitive::new(Box::new(FunctionOp::new("function")), operands, parts, locality))
}

fn make_lambda(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("lambda", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(FunctionOp::new("lambda")), operands, parts, locality))
}

fn make_access_function(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("access-function", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(AccessFunctionOp), operands, parts, locality))
}

fn make_access_argument(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("access-argument", &operands, 1, Some(2))?;
    Ok(Primitive::new(Box::new(AccessArgumentOp), operands, parts, locality))
}

fn make_call_function(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("call-function", &operands, 1, None)?;
    Ok(Primitive::new(Box::new(CallFunctionOp), operands, parts, locality))
}

fn make_target_reference(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("target-reference", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(TargetReferenceOp), operands, parts, locality))
}

fn make_define_function(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("define-function", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(DefineFunctionOp), operands, parts, locality))
}

fn make_store(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("store", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(StoreOp), operands, parts, locality))
}

/// `define` and `lambda` are resolved entirely by the compiler; the entries
/// exist so the surface names are documented and reserved.
fn make_compiler_form(_operands: Vec<Value>, parts: NameParts, _locality: Arc<Locality>) -> Result<Primitive> {
    Err(Error::name(format!(
        "'{}' is a compiler form and cannot be constructed directly",
        parts.primitive
    )))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "variable",
            templates: &["variable(_1)"],
            factory: make_variable,
            help: "variable(body): a mutable cell; first eval caches the body's value",
        },
        MatchPattern {
            name: "access-variable",
            templates: &["access-variable(_1)"],
            factory: make_access_variable,
            help: "access-variable(target): read a binding; store writes through",
        },
        MatchPattern {
            name: "function",
            templates: &["function(__1)"],
            factory: make_function,
            help: "function(body): a named function body",
        },
        MatchPattern {
            name: "lambda",
            templates: &["lambda(__1)"],
            factory: make_lambda,
            help: "lambda(p1, ..., pn, body): an anonymous function",
        },
        MatchPattern {
            name: "access-function",
            templates: &["access-function(_1)"],
            factory: make_access_function,
            help: "access-function(target): a first-class function value",
        },
        MatchPattern {
            name: "access-argument",
            templates: &["access-argument(__1)"],
            factory: make_access_argument,
            help: "access-argument(i): the i-th caller argument",
        },
        MatchPattern {
            name: "call-function",
            templates: &["call-function(__1)"],
            factory: make_call_function,
            help: "call-function(f, args...): invoke a resolved function",
        },
        MatchPattern {
            name: "target-reference",
            templates: &["target-reference(_1)"],
            factory: make_target_reference,
            help: "target-reference(name): resolve a name through the context frames at eval time",
        },
        MatchPattern {
            name: "define-function",
            templates: &["define-function(_1, _2)"],
            factory: make_define_function,
            help: "define-function(target, name): register a function value into the current frame",
        },
        MatchPattern {
            name: "store",
            templates: &["store(_1, _2)"],
            factory: make_store,
            help: "store(target, value): write through a mutable primitive",
        },
        MatchPattern {
            name: "define",
            templates: &["define(__1)"],
            factory: make_compiler_form,
            help: "define(name, [params...,] body): bind a variable or function",
        },
    ]
}
