//! Diagnostics: the debug stream, string formatting, and the runtime
//! tracing toggle.

use std::sync::{Arc, atomic::Ordering};

use async_trait::async_trait;

use super::expect_operands;
use crate::{
    distributed::Locality,
    error::{Error, Result},
    patterns::MatchPattern,
    primitive::{EVAL_TRACING, EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, eval_operands, value_operand},
    values::Value,
};

/// `debug(...)` / `console_output(...)`: evaluates the operands and writes
/// them, space-separated, to the debug stream (stderr plus a tracing
/// event). Returns nil.
#[derive(Debug)]
struct DebugOp {
    kind: &'static str,
}

#[async_trait]
impl PrimitiveOp for DebugOp {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let line = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(target: "tessera::debug", locality = node.locality().id(), "{line}");
        eprintln!("{line}");
        Ok(Value::Nil)
    }
}

/// `format(fmt, args...)`: substitutes each `{}` in order.
#[derive(Debug, Default)]
struct FormatOp;

#[async_trait]
impl PrimitiveOp for FormatOp {
    fn kind(&self) -> &'static str {
        "format"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let values = eval_operands(node.operands(), params, ctx).await?;
        let template = values[0].to_str()?;
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut args = values[1..].iter();
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            let arg = args
                .next()
                .ok_or_else(|| Error::user(format!("format string expects more arguments: '{template}'")))?;
            out.push_str(&arg.to_string());
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        if args.next().is_some() {
            return Err(Error::user(format!("format string has too few placeholders: '{template}'")));
        }
        Ok(Value::from(out))
    }
}

/// `enable_tracing(flag)`: toggles span-per-primitive eval tracing.
#[derive(Debug, Default)]
struct EnableTracingOp;

#[async_trait]
impl PrimitiveOp for EnableTracingOp {
    fn kind(&self) -> &'static str {
        "enable_tracing"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let flag = value_operand(&node.operands()[0], params, ctx).await?.is_true()?;
        let previous = EVAL_TRACING.swap(flag, Ordering::Relaxed);
        Ok(Value::Bool(previous))
    }
}

fn make_debug(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    Ok(Primitive::new(Box::new(DebugOp { kind: "debug" }), operands, parts, locality))
}

fn make_console_output(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    Ok(Primitive::new(Box::new(DebugOp { kind: "console_output" }), operands, parts, locality))
}

fn make_format(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("format", &operands, 1, None)?;
    Ok(Primitive::new(Box::new(FormatOp), operands, parts, locality))
}

fn make_enable_tracing(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("enable_tracing", &operands, 1, Some(1))?;
    Ok(Primitive::new(Box::new(EnableTracingOp), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "debug",
            templates: &["debug(__1)"],
            factory: make_debug,
            help: "debug(...): write operands to the debug stream, return nil",
        },
        MatchPattern {
            name: "console_output",
            templates: &["console_output(__1)"],
            factory: make_console_output,
            help: "console_output(...): write operands to the debug stream",
        },
        MatchPattern {
            name: "format",
            templates: &["format(_1, __2)"],
            factory: make_format,
            help: "format(fmt, args...): substitute each {} in order",
        },
        MatchPattern {
            name: "enable_tracing",
            templates: &["enable_tracing(_1)"],
            factory: make_enable_tracing,
            help: "enable_tracing(flag): toggle per-primitive eval tracing",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::EvalContext;

    fn parts(kind: &str) -> NameParts {
        NameParts::new(kind, 1, 0, 0)
    }

    #[tokio::test]
    async fn format_substitutes_in_order() {
        let node = make_format(
            vec![Value::from("{} + {} = {}"), Value::Int(1), Value::Int(2), Value::Int(3)],
            parts("format"),
            Locality::solo(),
        )
        .unwrap();
        let out = node.eval(&[], &EvalContext::default()).await.unwrap();
        assert_eq!(out, Value::from("1 + 2 = 3"));
    }

    #[tokio::test]
    async fn format_arity_mismatch_is_an_error() {
        let node = make_format(vec![Value::from("{} {}"), Value::Int(1)], parts("format"), Locality::solo()).unwrap();
        assert!(node.eval(&[], &EvalContext::default()).await.is_err());
    }
}
