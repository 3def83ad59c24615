//! Tiled dot products: the aligned local-multiply+reduce strategy, the
//! Cannon product over a square process grid, and their equivalence with
//! the local matmul.

use pretty_assertions::assert_eq;
use tessera::{Environment, Snippets, Value, compile, run_spmd};

async fn run_local(source: &str) -> Value {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    compile("local", source, &mut snippets, &env).unwrap().run().await.unwrap()
}

fn assert_all_equal(results: &[Value], expected: &Value) {
    for (id, result) in results.iter().enumerate() {
        assert_eq!(result, expected, "locality {id} disagrees");
    }
}

const M: &str = "[[1, 2, 3, 4], [5, 6, 7, 8], [9, 10, 11, 12], [13, 14, 15, 16]]";
const W: &str = "[[1, 0, 2, 0], [0, 1, 0, 2], [3, 0, 1, 0], [0, 3, 0, 1]]";

#[tokio::test]
async fn cannon_with_one_locality_is_the_local_matmul() {
    let local = run_local(&format!("dot({M}, {W})")).await;
    let cannon = run_local(&format!("cannon_product({M}, {W})")).await;
    assert_eq!(cannon, local);
}

#[tokio::test(flavor = "multi_thread")]
async fn cannon_on_a_2x2_grid_matches_the_local_matmul() {
    let source = format!(
        r#"
        block(
            define(m, {M}),
            define(w, {W}),
            define(r0, locality_id() / 2 * 2),
            define(c0, locality_id() % 2 * 2),
            define(a, annotate_d(slice(m, list(r0, r0 + 2), list(c0, c0 + 2)), "a",
                list("tile", list("rows", r0, r0 + 2), list("columns", c0, c0 + 2)))),
            define(b, annotate_d(slice(w, list(r0, r0 + 2), list(c0, c0 + 2)), "b",
                list("tile", list("rows", r0, r0 + 2), list("columns", c0, c0 + 2)))),
            all_gather(cannon_product(a, b))
        )
    "#
    );
    let results = run_spmd(4, "cannon_2x2", &source).await.unwrap();
    let expected = run_local(&format!("dot({M}, {W})")).await;
    assert_all_equal(&results, &expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn dot_d_routes_square_grids_through_cannon() {
    let source = format!(
        r#"
        block(
            define(m, {M}),
            define(w, {W}),
            define(r0, locality_id() / 2 * 2),
            define(c0, locality_id() % 2 * 2),
            define(a, annotate_d(slice(m, list(r0, r0 + 2), list(c0, c0 + 2)), "a",
                list("tile", list("rows", r0, r0 + 2), list("columns", c0, c0 + 2)))),
            define(b, annotate_d(slice(w, list(r0, r0 + 2), list(c0, c0 + 2)), "b",
                list("tile", list("rows", r0, r0 + 2), list("columns", c0, c0 + 2)))),
            all_gather(dot_d(a, b))
        )
    "#
    );
    let results = run_spmd(4, "dot_d_cannon", &source).await.unwrap();
    let expected = run_local(&format!("dot({M}, {W})")).await;
    assert_all_equal(&results, &expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn dot_d_reduces_aligned_contractions_locally() {
    // A is column-tiled and B row-tiled along the contraction axis, so
    // every locality multiplies its blocks and the partials sum.
    let source = r#"
        block(
            define(m, [[1, 2, 3, 4], [5, 6, 7, 8]]),
            define(w, [[1, 0], [0, 1], [2, 0], [0, 2]]),
            define(c0, locality_id() * 2),
            define(a, annotate_d(slice(m, list(0, 2), list(c0, c0 + 2)), "a",
                list("tile", list("rows", 0, 2), list("columns", c0, c0 + 2)))),
            define(b, annotate_d(slice(w, list(c0, c0 + 2), list(0, 2)), "b",
                list("tile", list("rows", c0, c0 + 2), list("columns", 0, 2)))),
            dot_d(a, b)
        )
    "#;
    let results = run_spmd(2, "dot_d_aligned", source).await.unwrap();
    let expected = run_local("dot([[1, 2, 3, 4], [5, 6, 7, 8]], [[1, 0], [0, 1], [2, 0], [0, 2]])").await;
    assert_all_equal(&results, &expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn dot_d_of_aligned_vectors_is_a_global_scalar() {
    let source = r#"
        block(
            define(x, [1, 2, 3, 4]),
            define(lo, locality_id() * 2),
            define(a, annotate_d(slice(x, list(lo, lo + 2)), "va",
                list("tile", list("columns", lo, lo + 2)))),
            define(b, annotate_d(slice(x, list(lo, lo + 2)), "vb",
                list("tile", list("columns", lo, lo + 2)))),
            dot_d(a, b)
        )
    "#;
    let results = run_spmd(2, "dot_d_vectors", source).await.unwrap();
    assert_all_equal(&results, &Value::Int(30));
}

#[tokio::test(flavor = "multi_thread")]
async fn dot_d_with_a_replicated_operand_gathers_the_tiled_side() {
    // Only the left side is tiled; the right side is a plain literal
    // present on every locality.
    let source = r#"
        block(
            define(m, [[1, 2], [3, 4], [5, 6]]),
            define(a, annotate_d(slice(m, list(locality_id(), locality_id() + 1), list(0, 2)), "a",
                list("tile", list("rows", locality_id(), locality_id() + 1), list("columns", 0, 2)))),
            define(b, annotate_d(slice(m, list(locality_id(), locality_id() + 1), list(0, 2)), "b",
                list("tile", list("rows", locality_id(), locality_id() + 1), list("columns", 0, 2)))),
            dot_d(a, [[1, 0], [0, 1]])
        )
    "#;
    let results = run_spmd(3, "dot_d_fallback", source).await.unwrap();
    let expected = run_local("dot([[1, 2], [3, 4], [5, 6]], [[1, 0], [0, 1]])").await;
    assert_all_equal(&results, &expected);
}
