//! Sequential and parallel control flow: `block`, `parallel_block`, `if`,
//! `while`, `for`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use super::expect_operands;
use crate::{
    distributed::Locality,
    error::Result,
    patterns::MatchPattern,
    primitive::{EvalContext, NameParts, Primitive, PrimitiveNode, PrimitiveOp, value_operand},
    values::Value,
};

/// `block(e1, ..., en)`: evaluates children in source order inside a fresh
/// frame; every child sees the side effects of all preceding children.
/// Returns the last child's value, or nil for an empty block.
#[derive(Debug, Default)]
struct BlockOp;

#[async_trait]
impl PrimitiveOp for BlockOp {
    fn kind(&self) -> &'static str {
        "block"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let ctx = ctx.push_frame();
        let mut last = Value::Nil;
        for operand in node.operands() {
            last = value_operand(operand, params, &ctx).await?;
        }
        Ok(last)
    }
}

/// `parallel_block(e1, ..., en)`: evaluates all children concurrently,
/// awaits every one of them, then surfaces the first error by child index
/// or the textually last child's value.
#[derive(Debug, Default)]
struct ParallelBlockOp;

#[async_trait]
impl PrimitiveOp for ParallelBlockOp {
    fn kind(&self) -> &'static str {
        "parallel_block"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let ctx = ctx.push_frame();
        let results = join_all(
            node.operands()
                .iter()
                .map(|operand| value_operand(operand, params, &ctx)),
        )
        .await;
        let mut last = Value::Nil;
        for result in results {
            last = result?;
        }
        Ok(last)
    }
}

/// `if(c, t, f)`: only the taken branch evaluates; `f` defaults to nil.
#[derive(Debug, Default)]
struct IfOp;

#[async_trait]
impl PrimitiveOp for IfOp {
    fn kind(&self) -> &'static str {
        "if"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let condition = value_operand(&node.operands()[0], params, ctx).await?;
        if condition.is_true()? {
            value_operand(&node.operands()[1], params, ctx).await
        } else if let Some(alternative) = node.operands().get(2) {
            value_operand(alternative, params, ctx).await
        } else {
            Ok(Value::Nil)
        }
    }
}

/// `while(c, b)`: strictly sequential; returns the last body value or nil
/// if the loop never ran.
#[derive(Debug, Default)]
struct WhileOp;

#[async_trait]
impl PrimitiveOp for WhileOp {
    fn kind(&self) -> &'static str {
        "while"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        let mut last = Value::Nil;
        loop {
            let condition = value_operand(&node.operands()[0], params, ctx).await?;
            if !condition.is_true()? {
                return Ok(last);
            }
            last = value_operand(&node.operands()[1], params, ctx).await?;
        }
    }
}

/// `for(init, c, step, b)`: C-style loop; returns the last body value or
/// nil.
#[derive(Debug, Default)]
struct ForOp;

#[async_trait]
impl PrimitiveOp for ForOp {
    fn kind(&self) -> &'static str {
        "for"
    }

    async fn eval(&self, node: &PrimitiveNode, params: &[Value], ctx: &EvalContext) -> Result<Value> {
        value_operand(&node.operands()[0], params, ctx).await?;
        let mut last = Value::Nil;
        loop {
            let condition = value_operand(&node.operands()[1], params, ctx).await?;
            if !condition.is_true()? {
                return Ok(last);
            }
            last = value_operand(&node.operands()[3], params, ctx).await?;
            value_operand(&node.operands()[2], params, ctx).await?;
        }
    }
}

fn make_block(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    Ok(Primitive::new(Box::new(BlockOp), operands, parts, locality))
}

fn make_parallel_block(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    Ok(Primitive::new(Box::new(ParallelBlockOp), operands, parts, locality))
}

fn make_if(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("if", &operands, 2, Some(3))?;
    Ok(Primitive::new(Box::new(IfOp), operands, parts, locality))
}

fn make_while(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("while", &operands, 2, Some(2))?;
    Ok(Primitive::new(Box::new(WhileOp), operands, parts, locality))
}

fn make_for(operands: Vec<Value>, parts: NameParts, locality: Arc<Locality>) -> Result<Primitive> {
    expect_operands("for", &operands, 4, Some(4))?;
    Ok(Primitive::new(Box::new(ForOp), operands, parts, locality))
}

pub(crate) fn patterns() -> Vec<MatchPattern> {
    vec![
        MatchPattern {
            name: "block",
            templates: &["block(__1)"],
            factory: make_block,
            help: "block(e1, ..., en): evaluate in order, return the last value",
        },
        MatchPattern {
            name: "parallel_block",
            templates: &["parallel_block(__1)"],
            factory: make_parallel_block,
            help: "parallel_block(e1, ..., en): evaluate concurrently, return the last value",
        },
        MatchPattern {
            name: "if",
            templates: &["if(_1, _2, _3)", "if(_1, _2)"],
            factory: make_if,
            help: "if(c, t, f): conditional; only the taken branch evaluates",
        },
        MatchPattern {
            name: "while",
            templates: &["while(_1, _2)"],
            factory: make_while,
            help: "while(c, b): loop while c is truthy, return the last body value",
        },
        MatchPattern {
            name: "for",
            templates: &["for(_1, _2, _3, _4)"],
            factory: make_for,
            help: "for(init, c, step, b): C-style loop",
        },
    ]
}
