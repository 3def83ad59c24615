//! End-to-end language scenarios through the embedding API.

use pretty_assertions::assert_eq;
use tessera::{Environment, Snippets, Tensor, Value, compile};

async fn compile_and_run(name: &str, source: &str) -> tessera::Result<Value> {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    compile(name, source, &mut snippets, &env)?.run().await
}

async fn run(source: &str) -> Value {
    compile_and_run("test", source).await.unwrap()
}

// === Variables and functions ===

#[tokio::test]
async fn define_then_read() {
    assert_eq!(run("block(define(x, 42), x)").await, Value::Int(42));
}

#[tokio::test]
async fn define_function_and_call() {
    assert_eq!(run("block(define(f, a, a + 1), f(41))").await, Value::Int(42));
}

#[tokio::test]
async fn while_with_store() {
    assert_eq!(run("block(define(x, 0), while(x < 3, store(x, x + 1)), x)").await, Value::Int(3));
}

#[tokio::test]
async fn variable_caches_its_body() {
    // The body runs once; later reads see the cached value.
    assert_eq!(run("block(define(x, 1 + 1), x + x)").await, Value::Int(4));
}

#[tokio::test]
async fn recursion_through_the_function_name() {
    assert_eq!(
        run("block(define(fact, n, if(n == 0, 1, n * fact(n - 1))), fact(10))").await,
        Value::Int(3_628_800)
    );
}

#[tokio::test]
async fn functions_are_first_class() {
    assert_eq!(
        run("block(define(twice, f, x, f(f(x))), define(inc, a, a + 1), twice(inc, 40))").await,
        Value::Int(42)
    );
}

#[tokio::test]
async fn program_evaluating_to_a_function_is_callable() {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    let program = compile("callable", "block(define(f, a, a + 1), f)", &mut snippets, &env).unwrap();
    let out = program.call(vec![Value::Int(41)]).await.unwrap();
    assert_eq!(out, Value::Int(42));
}

#[tokio::test]
async fn escaped_functions_keep_their_recursion() {
    // The closure captures its defining frame, so the self-reference stays
    // resolvable after the block is gone.
    let mut snippets = Snippets::new();
    let env = Environment::local();
    let program = compile(
        "escaped",
        "block(define(fact, n, if(n == 0, 1, n * fact(n - 1))), fact)",
        &mut snippets,
        &env,
    )
    .unwrap();
    assert_eq!(program.call(vec![Value::Int(5)]).await.unwrap(), Value::Int(120));
}

#[tokio::test]
async fn successive_compiles_share_globals() {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    compile("first", "define(base, 40)", &mut snippets, &env)
        .unwrap()
        .run()
        .await
        .unwrap();
    let out = compile("second", "base + 2", &mut snippets, &env)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(out, Value::Int(42));
}

// === Lambdas and traversals ===

#[tokio::test]
async fn map_with_a_lambda() {
    assert_eq!(
        run("map(lambda(i, i * 2), list(1, 2, 3))").await,
        Value::from(vec![Value::Int(2), Value::Int(4), Value::Int(6)])
    );
}

#[tokio::test]
async fn map_zips_multiple_lists() {
    assert_eq!(
        run("map(lambda(a, b, a + b), list(1, 2), list(10, 20))").await,
        Value::from(vec![Value::Int(11), Value::Int(22)])
    );
}

#[tokio::test]
async fn filter_keeps_truthy() {
    assert_eq!(
        run("filter(lambda(i, i % 2 == 1), list(1, 2, 3, 4, 5))").await,
        Value::from(vec![Value::Int(1), Value::Int(3), Value::Int(5)])
    );
}

#[tokio::test]
async fn folds() {
    assert_eq!(run("fold_left(lambda(a, i, a + i), 0, list(1, 2, 3))").await, Value::Int(6));
    assert_eq!(
        run("fold_right(lambda(i, a, a + i), list(1, 2, 3), 10)").await,
        Value::Int(16)
    );
}

#[tokio::test]
async fn apply_unpacks_the_argument_list() {
    assert_eq!(run("block(define(f, a, b, a * b), apply(f, list(6, 7)))").await, Value::Int(42));
}

#[tokio::test]
async fn range_traversal() {
    assert_eq!(
        run("map(lambda(i, i * i), range(4))").await,
        Value::from(vec![Value::Int(0), Value::Int(1), Value::Int(4), Value::Int(9)])
    );
}

// === Arrays ===

#[tokio::test]
async fn matrix_product() {
    let expected = Tensor::from_shape_int(&[2, 2], vec![58, 64, 139, 154]).unwrap();
    assert_eq!(
        run("dot([[1, 2, 3], [4, 5, 6]], [[7, 8], [9, 10], [11, 12]])").await,
        Value::from(expected)
    );
}

#[tokio::test]
async fn one_hot_in_range() {
    assert_eq!(
        run("one_hot(2, 4)").await,
        Value::from(Tensor::vector_int(vec![0, 0, 1, 0]))
    );
}

#[tokio::test]
async fn one_hot_out_of_range_clamps_to_zero() {
    assert_eq!(
        run("one_hot(42, 4)").await,
        Value::from(Tensor::vector_int(vec![0, 0, 0, 0]))
    );
}

#[tokio::test]
async fn shape_extraction() {
    assert_eq!(
        run("shape([[1, 2, 3], [4, 5, 6]])").await,
        Value::from(vec![Value::Int(2), Value::Int(3)])
    );
    assert_eq!(run("shape([[1, 2, 3], [4, 5, 6]], 1)").await, Value::Int(3));
}

#[tokio::test]
async fn slicing_reads() {
    assert_eq!(run("slice([10, 20, 30], 1)").await, Value::Int(20));
    assert_eq!(
        run("slice([[1, 2], [3, 4]], 1)").await,
        Value::from(Tensor::vector_int(vec![3, 4]))
    );
    assert_eq!(
        run("slice([1, 2, 3, 4], list(1, 3))").await,
        Value::from(Tensor::vector_int(vec![2, 3]))
    );
}

// === Scalars, strings, operators ===

#[tokio::test]
async fn operator_precedence() {
    assert_eq!(run("1 + 2 * 3").await, Value::Int(7));
    assert_eq!(run("(1 + 2) * 3").await, Value::Int(9));
    assert_eq!(run("10 - 2 - 3").await, Value::Int(5));
}

#[tokio::test]
async fn string_concatenation() {
    assert_eq!(run(r#""foo" + "bar""#).await, Value::from("foobar"));
}

#[tokio::test]
async fn comparisons_and_logic() {
    assert_eq!(run("1 < 2 && 2 <= 2").await, Value::Bool(true));
    assert_eq!(run("1 == 1.0").await, Value::Bool(true));
    assert_eq!(run("!(1 > 2) || false").await, Value::Bool(true));
}

#[tokio::test]
async fn format_builds_strings() {
    assert_eq!(run(r#"format("{} = {}", "x", 42)"#).await, Value::from("x = 42"));
}

#[tokio::test]
async fn sequential_programs_return_the_last_entry() {
    assert_eq!(compile_and_run("multi", "define(x, 1) x + 1").await.unwrap(), Value::Int(2));
}
