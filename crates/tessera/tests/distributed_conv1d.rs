//! Tiled one-dimensional convolution: halo exchange between neighbouring
//! slabs and the three padding modes.

use pretty_assertions::assert_eq;
use tessera::{Tensor, Value, run_spmd};

fn assert_all_equal(results: &[Value], expected: &Value) {
    for (id, result) in results.iter().enumerate() {
        assert_eq!(result, expected, "locality {id} disagrees");
    }
}

fn conv_source(padding: &str) -> String {
    format!(
        r#"
        block(
            define(x, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            define(lo, locality_id() * 3),
            define(a, annotate_d(slice(x, list(lo, lo + 3)), "x",
                list("tile", list("columns", lo, lo + 3)))),
            all_gather(conv1d_d(a, [1.0, 1.0, 1.0], "{padding}"))
        )
    "#
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn valid_padding_trims_the_output() {
    let results = run_spmd(2, "conv_valid", &conv_source("valid")).await.unwrap();
    // N=6, K=3: output positions 0..4, each the sum of a full window.
    let expected = Value::from(Tensor::vector_double(vec![6.0, 9.0, 12.0, 15.0]));
    assert_all_equal(&results, &expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn same_padding_keeps_the_length() {
    let results = run_spmd(2, "conv_same", &conv_source("same")).await.unwrap();
    let expected = Value::from(Tensor::vector_double(vec![3.0, 6.0, 9.0, 12.0, 15.0, 11.0]));
    assert_all_equal(&results, &expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn causal_padding_pads_on_the_left_only() {
    let results = run_spmd(2, "conv_causal", &conv_source("causal")).await.unwrap();
    let expected = Value::from(Tensor::vector_double(vec![1.0, 3.0, 6.0, 9.0, 12.0, 15.0]));
    assert_all_equal(&results, &expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn three_localities_exchange_halos_across_both_neighbours() {
    let source = r#"
        block(
            define(x, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            define(lo, locality_id() * 2),
            define(a, annotate_d(slice(x, list(lo, lo + 2)), "x3",
                list("tile", list("columns", lo, lo + 2)))),
            all_gather(conv1d_d(a, [1.0, 1.0, 1.0], "same"))
        )
    "#;
    let results = run_spmd(3, "conv_3loc", source).await.unwrap();
    let expected = Value::from(Tensor::vector_double(vec![3.0, 6.0, 9.0, 12.0, 15.0, 11.0]));
    assert_all_equal(&results, &expected);
}

#[tokio::test]
async fn unannotated_input_convolves_locally() {
    let results = run_spmd(1, "conv_local", r#"conv1d_d([1.0, 2.0, 3.0, 4.0], [1.0, 1.0], "valid")"#)
        .await
        .unwrap();
    let expected = Value::from(Tensor::vector_double(vec![3.0, 5.0, 7.0]));
    assert_all_equal(&results, &expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn kernel_larger_than_a_slab_still_resolves() {
    // K=4 needs halo elements from beyond the immediate neighbour's edge.
    let source = r#"
        block(
            define(x, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]),
            define(lo, locality_id() * 2),
            define(a, annotate_d(slice(x, list(lo, lo + 2)), "wide",
                list("tile", list("columns", lo, lo + 2)))),
            all_gather(conv1d_d(a, [1.0, 1.0, 1.0, 1.0], "valid"))
        )
    "#;
    let results = run_spmd(4, "conv_wide", source).await.unwrap();
    let expected = Value::from(Tensor::vector_double(vec![10.0, 14.0, 18.0, 22.0, 26.0]));
    assert_all_equal(&results, &expected);
}
