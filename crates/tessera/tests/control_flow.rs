//! Control-flow primitives: sequencing, branching, loops, and the
//! parallel composition rules.

use pretty_assertions::assert_eq;
use tessera::{Environment, ErrorKind, Snippets, Value, compile};

async fn compile_and_run(source: &str) -> tessera::Result<Value> {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    compile("control", source, &mut snippets, &env)?.run().await
}

async fn run(source: &str) -> Value {
    compile_and_run(source).await.unwrap()
}

#[tokio::test]
async fn block_evaluates_in_source_order() {
    // Every child sees the side effects of its predecessors.
    assert_eq!(
        run("block(define(x, 1), store(x, x + 1), store(x, x * 10), x)").await,
        Value::Int(20)
    );
}

#[tokio::test]
async fn empty_block_is_nil() {
    assert_eq!(run("block()").await, Value::Nil);
}

#[tokio::test]
async fn if_takes_only_one_branch() {
    // The untaken branch must not evaluate; an assertion there would fail
    // the whole program.
    assert_eq!(run("if(1 < 2, 42, assert_condition(false))").await, Value::Int(42));
    assert_eq!(run("if(1 > 2, assert_condition(false), 24)").await, Value::Int(24));
}

#[tokio::test]
async fn if_without_else_defaults_to_nil() {
    assert_eq!(run("if(false, 1)").await, Value::Nil);
}

#[tokio::test]
async fn while_that_never_runs_is_nil() {
    assert_eq!(run("while(false, 1)").await, Value::Nil);
}

#[tokio::test]
async fn for_loop() {
    assert_eq!(
        run("block(define(acc, 0), define(i, 0), for(store(i, 0), i < 5, store(i, i + 1), store(acc, acc + i)), acc)")
            .await,
        Value::Int(10)
    );
}

#[tokio::test]
async fn parallel_block_returns_the_last_child() {
    assert_eq!(run("parallel_block(1, 2, 3)").await, Value::Int(3));
}

#[tokio::test]
async fn parallel_block_surfaces_the_first_error_by_index() {
    let err = compile_and_run(
        r#"parallel_block(assert_condition(false, "first"), assert_condition(false, "second"), 42)"#,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AssertionFailure);
    assert_eq!(err.message(), "first");
}

#[tokio::test]
async fn parallel_map_preserves_order() {
    assert_eq!(
        run("parallel_map(lambda(i, i * 10), list(1, 2, 3, 4))").await,
        Value::from(vec![Value::Int(10), Value::Int(20), Value::Int(30), Value::Int(40)])
    );
}

#[tokio::test]
async fn parallel_for_each_awaits_every_element() {
    // All stores land before the block continues.
    assert_eq!(
        run("block(define(acc, 0), parallel_for_each(lambda(i, store(acc, acc + i)), list(1, 2, 3)), acc)").await,
        Value::Int(6)
    );
}

#[tokio::test]
async fn for_each_returns_nil() {
    assert_eq!(run("for_each(lambda(i, i), list(1))").await, Value::Nil);
}

#[tokio::test]
async fn sequential_determinism() {
    let source = "block(define(f, n, if(n == 0, 0, n + f(n - 1))), f(50))";
    let first = run(source).await;
    for _ in 0..3 {
        assert_eq!(run(source).await, first);
    }
}

#[tokio::test]
async fn timer_reports_elapsed_and_returns_the_value() {
    let out = run("block(define(t, 0.0 - 1.0), define(v, timer(6 * 7, lambda(s, store(t, s)))), list(v, t >= 0.0))")
        .await;
    assert_eq!(
        out,
        Value::from(vec![Value::Int(42), Value::Bool(true)])
    );
}

#[tokio::test]
async fn synchronize_passes_the_value_through() {
    assert_eq!(run("synchronize(40 + 2)").await, Value::Int(42));
}

#[tokio::test]
async fn assert_condition_failure_carries_the_message() {
    let err = compile_and_run(r#"assert_condition(1 > 2, "impossible")"#).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AssertionFailure);
    assert_eq!(err.message(), "impossible");
}
