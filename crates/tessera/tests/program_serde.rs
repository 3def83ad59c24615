//! Program serialization: only the source text persists; loading
//! recompiles and name determinism reattaches handles.

use pretty_assertions::assert_eq;
use tessera::{CompiledProgram, Environment, Snippets, Value, compile};

#[tokio::test]
async fn dump_and_load_round_trip() {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    let program = compile(
        "roundtrip",
        "block(define(f, a, a * a), f(7))",
        &mut snippets,
        &env,
    )
    .unwrap();
    let bytes = program.dump().unwrap();

    let mut fresh = Snippets::new();
    let restored = CompiledProgram::load(&bytes, &mut fresh, &env).unwrap();
    assert_eq!(restored.name(), "roundtrip");
    assert_eq!(restored.source(), program.source());
    assert_eq!(restored.run().await.unwrap(), Value::Int(49));
}

#[tokio::test]
async fn recompilation_reproduces_the_same_names() {
    let source = "block(define(x, 1), x + 2 * x)";
    let env = Environment::local();

    let program = compile("names", source, &mut Snippets::new(), &env).unwrap();
    let bytes = program.dump().unwrap();
    let restored = CompiledProgram::load(&bytes, &mut Snippets::new(), &env).unwrap();

    let original = program.topology().unwrap().newick();
    let reloaded = restored.topology().unwrap().newick();
    assert_eq!(original, reloaded);
}

#[test]
fn load_rejects_garbage() {
    let env = Environment::local();
    assert!(CompiledProgram::load(&[0xff, 0x00, 0x13], &mut Snippets::new(), &env).is_err());
}
