//! Annotation attachment and equality through the surface language.

use pretty_assertions::assert_eq;
use tessera::{Environment, ErrorKind, Snippets, Value, compile};

async fn compile_and_run(name: &str, source: &str) -> tessera::Result<Value> {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    compile(name, source, &mut snippets, &env)?.run().await
}

#[tokio::test]
async fn annotation_equality_ignores_axis_order() {
    let annotation_0 = r#"
        annotate_d([[91, 91]], "test2d2d_4_1/1",
            list("tile", list("columns", 0, 2), list("rows", 0, 1)))
    "#;
    let annotation_1 = r#"
        annotate_d([[91, 91]], "test2d2d_4_1/1",
            list("tile", list("rows", 0, 1), list("columns", 0, 2)))
    "#;

    assert_eq!(
        compile_and_run("annotation_0", annotation_0).await.unwrap(),
        compile_and_run("annotation_1", annotation_1).await.unwrap()
    );
}

#[tokio::test]
async fn annotated_values_differ_from_unannotated_ones() {
    let plain = compile_and_run("plain", "[[91, 91]]").await.unwrap();
    let annotated = compile_and_run(
        "annotated",
        r#"annotate_d([[91, 91]], "a", list("tile", list("rows", 0, 1), list("columns", 0, 2)))"#,
    )
    .await
    .unwrap();
    assert_ne!(plain, annotated);
}

#[tokio::test]
async fn annotations_differing_in_spans_are_unequal() {
    let a = compile_and_run(
        "a",
        r#"annotate_d([1, 2], "v", list("tile", list("columns", 0, 2)))"#,
    )
    .await
    .unwrap();
    let b = compile_and_run(
        "b",
        r#"annotate_d([1, 2], "v", list("tile", list("columns", 2, 4)))"#,
    )
    .await
    .unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn tile_annotation_must_match_the_local_shape() {
    let err = compile_and_run(
        "mismatch",
        r#"annotate_d([1, 2, 3], "v", list("tile", list("columns", 0, 2)))"#,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LocalityError);
}

#[tokio::test]
async fn annotating_a_non_array_is_a_type_error() {
    let err = compile_and_run(
        "non_array",
        r#"annotate_d(list(1, 2), "v", list("tile", list("columns", 0, 2)))"#,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

#[tokio::test]
async fn elementwise_results_keep_matching_annotations() {
    // Adding a scalar keeps the tiled array's annotation.
    let annotated = compile_and_run(
        "keep",
        r#"annotate_d([1, 2], "v", list("tile", list("columns", 0, 2))) + 0"#,
    )
    .await
    .unwrap();
    let Value::Tensor(tensor) = annotated else { panic!("expected an array") };
    assert!(tensor.annotation().is_some());
}

#[tokio::test]
async fn locality_introspection() {
    assert_eq!(compile_and_run("id", "locality_id()").await.unwrap(), Value::Int(0));
    assert_eq!(compile_and_run("here", "find_here()").await.unwrap(), Value::Int(0));
    assert_eq!(compile_and_run("num", "num_localities()").await.unwrap(), Value::Int(1));
}
