//! Write-through slicing and copy-on-write of shared array buffers.

use pretty_assertions::assert_eq;
use tessera::{Environment, Snippets, Tensor, Value, compile};

async fn run(source: &str) -> Value {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    compile("slice", source, &mut snippets, &env).unwrap().run().await.unwrap()
}

#[tokio::test]
async fn store_into_a_vector_element() {
    assert_eq!(
        run("block(define(x, [1, 2, 3]), store(slice(x, 1), 9), x)").await,
        Value::from(Tensor::vector_int(vec![1, 9, 3]))
    );
}

#[tokio::test]
async fn store_into_a_matrix_row() {
    assert_eq!(
        run("block(define(m, [[1, 2], [3, 4]]), store(slice(m, 0), [9, 8]), m)").await,
        Value::from(Tensor::from_shape_int(&[2, 2], vec![9, 8, 3, 4]).unwrap())
    );
}

#[tokio::test]
async fn store_into_a_range_slice() {
    assert_eq!(
        run("block(define(x, [1, 2, 3, 4]), store(slice(x, list(1, 3)), 0), x)").await,
        Value::from(Tensor::from_shape_int(&[4], vec![1, 0, 0, 4]).unwrap())
    );
}

#[tokio::test]
async fn negative_indices_wrap() {
    assert_eq!(
        run("block(define(x, [1, 2, 3]), store(slice(x, 0 - 1), 7), x)").await,
        Value::from(Tensor::vector_int(vec![1, 2, 7]))
    );
}

#[tokio::test]
async fn shared_buffers_copy_on_write() {
    // y caches the array before the store; the write duplicates the
    // backing buffer instead of mutating the shared one.
    let out = run(
        "block(
            define(x, [1, 2, 3]),
            define(y, x),
            y,
            store(slice(x, 0), 7),
            list(x, y)
        )",
    )
    .await;
    assert_eq!(
        out,
        Value::from(vec![
            Value::from(Tensor::vector_int(vec![7, 2, 3])),
            Value::from(Tensor::vector_int(vec![1, 2, 3])),
        ])
    );
}

#[tokio::test]
async fn store_promotes_the_cell_dtype() {
    assert_eq!(
        run("block(define(x, [1, 2]), store(slice(x, 0), 2.5), x)").await,
        Value::from(Tensor::from_shape_double(&[2], vec![2.5, 2.0]).unwrap())
    );
}

#[tokio::test]
async fn list_elements_read_through_slice() {
    assert_eq!(run(r#"slice(list(1, "two", 3), 1)"#).await, Value::from("two"));
    assert_eq!(
        run("slice(list(1, 2, 3, 4), list(1, 3))").await,
        Value::from(vec![Value::Int(2), Value::Int(3)])
    );
}

#[tokio::test]
async fn store_into_a_list_element() {
    assert_eq!(
        run("block(define(l, list(1, 2, 3)), store(slice(l, 2), 9), l)").await,
        Value::from(vec![Value::Int(1), Value::Int(2), Value::Int(9)])
    );
}

#[tokio::test]
async fn dictionaries_read_and_write_by_key() {
    assert_eq!(
        run(r#"slice(dict(list("a", 1), list("b", 2)), "b")"#).await,
        Value::Int(2)
    );
    assert_eq!(
        run(r#"block(define(d, dict(list("a", 1))), store(slice(d, "a"), 5), slice(d, "a"))"#).await,
        Value::Int(5)
    );
}

#[tokio::test]
async fn missing_dictionary_key_is_an_error() {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    let result = compile("missing", r#"slice(dict(list("a", 1)), "z")"#, &mut snippets, &env)
        .unwrap()
        .run()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn out_of_bounds_store_fails() {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    let result = compile(
        "oob",
        "block(define(x, [1, 2]), store(slice(x, 5), 0), x)",
        &mut snippets,
        &env,
    )
    .unwrap()
    .run()
    .await;
    assert!(result.is_err());
}
