//! Multi-locality collectives over the in-process fabric: all-gather,
//! retile, and the tiled reductions. Every test runs the same source SPMD
//! on each locality.

use pretty_assertions::assert_eq;
use tessera::{Tensor, Value, run_spmd};

/// All localities must agree on the result.
fn assert_all_equal(results: &[Value], expected: &Value) {
    for (id, result) in results.iter().enumerate() {
        assert_eq!(result, expected, "locality {id} disagrees");
    }
}

// === all_gather ===

#[tokio::test(flavor = "multi_thread")]
async fn all_gather_vector_fixpoint() {
    let source = r#"
        block(
            define(a, annotate_d(constant(locality_id() + 1, list(2)), "ag",
                list("tile", list("columns", locality_id() * 2, locality_id() * 2 + 2)))),
            all_gather(a)
        )
    "#;
    let results = run_spmd(2, "all_gather_vector", source).await.unwrap();
    assert_all_equal(&results, &Value::from(Tensor::vector_int(vec![1, 1, 2, 2])));
}

#[tokio::test(flavor = "multi_thread")]
async fn all_gather_matrix_row_tiles() {
    let source = r#"
        block(
            define(m, [[1, 2, 3], [4, 5, 6]]),
            define(a, annotate_d(slice(m, locality_id()), "m",
                list("tile", list("rows", locality_id(), locality_id() + 1),
                             list("columns", 0, 3)))),
            all_gather(a)
        )
    "#;
    let results = run_spmd(2, "all_gather_matrix", source).await.unwrap();
    let expected = Value::from(Tensor::from_shape_int(&[2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap());
    assert_all_equal(&results, &expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn all_gather_with_gaps_is_a_locality_error() {
    let source = r#"
        all_gather(annotate_d(constant(0, list(1)), "gap",
            list("tile", list("columns", locality_id() * 3, locality_id() * 3 + 1))))
    "#;
    let err = run_spmd(2, "all_gather_gap", source).await.unwrap_err();
    assert_eq!(err.kind(), tessera::ErrorKind::LocalityError);
}

// === retile ===

#[tokio::test(flavor = "multi_thread")]
async fn retile_swaps_slabs_without_losing_content() {
    let source = r#"
        block(
            define(a, annotate_d(constant(locality_id(), list(2)), "rt",
                list("tile", list("columns", locality_id() * 2, locality_id() * 2 + 2)))),
            define(b, retile_annotations(a,
                list("tile", list("columns", 2 - locality_id() * 2, 4 - locality_id() * 2)))),
            all_gather(b)
        )
    "#;
    let results = run_spmd(2, "retile_swap", source).await.unwrap();
    assert_all_equal(&results, &Value::from(Tensor::vector_int(vec![0, 0, 1, 1])));
}

#[tokio::test(flavor = "multi_thread")]
async fn retile_to_the_same_layout_is_identity() {
    let source = r#"
        block(
            define(a, annotate_d(constant(locality_id() + 5, list(3)), "id",
                list("tile", list("columns", locality_id() * 3, locality_id() * 3 + 3)))),
            define(b, retile_annotations(a,
                list("tile", list("columns", locality_id() * 3, locality_id() * 3 + 3)))),
            all_gather(b)
        )
    "#;
    let results = run_spmd(2, "retile_identity", source).await.unwrap();
    assert_all_equal(&results, &Value::from(Tensor::vector_int(vec![5, 5, 5, 6, 6, 6])));
}

#[tokio::test(flavor = "multi_thread")]
async fn retile_composes() {
    // retile(retile(A, T1), T2) == retile(A, T2): uneven, then even.
    let source = r#"
        block(
            define(a, annotate_d(
                constant(locality_id() * 10, list(2)), "comp",
                list("tile", list("columns", locality_id() * 2, locality_id() * 2 + 2)))),
            define(uneven, retile_annotations(a,
                list("tile", list("columns", locality_id() * 3, 3 + locality_id())))),
            define(back, retile_annotations(uneven,
                list("tile", list("columns", locality_id() * 2, locality_id() * 2 + 2)))),
            all_gather(back)
        )
    "#;
    let results = run_spmd(2, "retile_compose", source).await.unwrap();
    assert_all_equal(&results, &Value::from(Tensor::vector_int(vec![0, 0, 10, 10])));
}

#[tokio::test(flavor = "multi_thread")]
async fn retile_matrix_rows_to_columns() {
    let source = r#"
        block(
            define(m, [[1, 2], [3, 4]]),
            define(a, annotate_d(slice(m, locality_id()), "m2",
                list("tile", list("rows", locality_id(), locality_id() + 1),
                             list("columns", 0, 2)))),
            define(b, retile_annotations(a,
                list("tile", list("rows", 0, 2),
                             list("columns", locality_id(), locality_id() + 1)))),
            all_gather(b)
        )
    "#;
    let results = run_spmd(2, "retile_matrix", source).await.unwrap();
    let expected = Value::from(Tensor::from_shape_int(&[2, 2], vec![1, 2, 3, 4]).unwrap());
    assert_all_equal(&results, &expected);
}

// === reductions ===

#[tokio::test(flavor = "multi_thread")]
async fn sum_d_over_tiles() {
    let source = r#"
        sum_d(annotate_d(constant(locality_id() + 1, list(2)), "s",
            list("tile", list("columns", locality_id() * 2, locality_id() * 2 + 2))))
    "#;
    let results = run_spmd(2, "sum_d", source).await.unwrap();
    assert_all_equal(&results, &Value::Int(6));
}

#[tokio::test(flavor = "multi_thread")]
async fn mean_d_combines_sum_and_count() {
    let source = r#"
        mean_d(annotate_d(constant(locality_id() * 3, list(2)), "m",
            list("tile", list("columns", locality_id() * 2, locality_id() * 2 + 2))))
    "#;
    let results = run_spmd(2, "mean_d", source).await.unwrap();
    assert_all_equal(&results, &Value::Double(1.5));
}

#[tokio::test(flavor = "multi_thread")]
async fn max_d_over_tiles() {
    let source = r#"
        max_d(annotate_d(constant(7 - locality_id(), list(2)), "x",
            list("tile", list("columns", locality_id() * 2, locality_id() * 2 + 2))))
    "#;
    let results = run_spmd(2, "max_d", source).await.unwrap();
    assert_all_equal(&results, &Value::Int(7));
}

#[tokio::test(flavor = "multi_thread")]
async fn argmax_d_finds_the_global_index() {
    let source = r#"
        argmax_d(annotate_d(constant(locality_id(), list(2)), "am",
            list("tile", list("columns", locality_id() * 2, locality_id() * 2 + 2))))
    "#;
    let results = run_spmd(2, "argmax_d", source).await.unwrap();
    assert_all_equal(&results, &Value::Int(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn argmin_d_breaks_ties_with_the_lowest_index() {
    let source = r#"
        argmin_d(annotate_d(constant(0, list(2)), "tie",
            list("tile", list("columns", locality_id() * 2, locality_id() * 2 + 2))))
    "#;
    let results = run_spmd(2, "argmin_tie", source).await.unwrap();
    assert_all_equal(&results, &Value::Int(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn reductions_on_unannotated_values_stay_local() {
    let results = run_spmd(2, "local_sum", "sum_d([1, 2, 3])").await.unwrap();
    assert_all_equal(&results, &Value::Int(6));
}
