//! Dtype promotion and numpy-style broadcasting across the elementwise
//! primitives.

use pretty_assertions::assert_eq;
use tessera::{DType, Environment, ErrorKind, Snippets, Tensor, Value, compile};

async fn compile_and_run(source: &str) -> tessera::Result<Value> {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    compile("broadcast", source, &mut snippets, &env)?.run().await
}

async fn run(source: &str) -> Value {
    compile_and_run(source).await.unwrap()
}

#[tokio::test]
async fn addition_commutes() {
    let ab = run("[1, 2, 3] + [[10, 20, 30], [40, 50, 60]]").await;
    let ba = run("[[10, 20, 30], [40, 50, 60]] + [1, 2, 3]").await;
    assert_eq!(ab, ba);
    assert_eq!(
        ab,
        Value::from(Tensor::from_shape_int(&[2, 3], vec![11, 22, 33, 41, 52, 63]).unwrap())
    );
}

#[tokio::test]
async fn adding_zeros_is_identity_up_to_dtype() {
    let plain = run("1.0 * [1, 2, 3]").await;
    let zeroed = run("[1, 2, 3] + zeros(3)").await;
    assert_eq!(plain, zeroed);
}

#[tokio::test]
async fn scalar_broadcasts_over_arrays() {
    assert_eq!(
        run("[1, 2, 3] * 2").await,
        Value::from(Tensor::vector_int(vec![2, 4, 6]))
    );
}

#[tokio::test]
async fn size_one_axes_stretch() {
    assert_eq!(
        run("[[1], [2]] + [[10, 20]]").await,
        Value::from(Tensor::from_shape_int(&[2, 2], vec![11, 21, 12, 22]).unwrap())
    );
}

#[tokio::test]
async fn promotion_reaches_double() {
    let out = run("[1, 2] + 0.5").await;
    let Value::Tensor(t) = out else { panic!("expected an array") };
    assert_eq!(t.dtype(), DType::Double);
}

#[tokio::test]
async fn bool_promotes_to_int_for_arithmetic() {
    assert_eq!(run("true + true").await, Value::Int(2));
}

#[tokio::test]
async fn incompatible_shapes_report_both() {
    let err = compile_and_run("[1, 2, 3] + [1, 2]").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShapeError);
    assert!(err.message().contains("[3]") && err.message().contains("[2]"), "{}", err.message());
}

#[tokio::test]
async fn comparison_broadcasts_to_bool_arrays() {
    assert_eq!(
        run("[1, 5, 3] > 2").await,
        Value::from(Tensor::new(tessera::TensorData::Bool(
            ndarray_from(vec![false, true, true])
        ))
        .unwrap())
    );
}

fn ndarray_from(values: Vec<bool>) -> ndarray::ArrayD<bool> {
    let len = values.len();
    ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&[len]), values).unwrap()
}

#[tokio::test]
async fn integer_division_truncates_toward_zero() {
    assert_eq!(run("0 - 7 / 2").await, Value::Int(-3));
    assert_eq!(run("(0 - 7) / 2").await, Value::Int(-3));
    assert_eq!(run("(0 - 7) % 2").await, Value::Int(-1));
}

#[tokio::test]
async fn integer_division_by_zero_fails() {
    let err = compile_and_run("1 / 0").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UserError);
}

#[tokio::test]
async fn nil_plus_one_is_a_type_error() {
    let err = compile_and_run("nil + 1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
}
