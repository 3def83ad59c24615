//! Expression topology reporting and its Newick serialization.

use tessera::{Environment, Snippets, compile};

fn topology_of(source: &str) -> tessera::Topology {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    compile("topo", source, &mut snippets, &env)
        .unwrap()
        .topology()
        .expect("entry point is a primitive")
}

#[test]
fn literals_are_not_children() {
    // `1 + 2` keeps its literals inline; the add node is a leaf.
    let topology = topology_of("1 + 2");
    assert!(topology.name.contains("/add$"));
    assert!(topology.children.is_empty());
}

#[test]
fn nested_expressions_nest() {
    let topology = topology_of("(1 + 2) * neg(3)");
    assert!(topology.name.contains("/mul$"));
    assert_eq!(topology.children.len(), 2);
}

#[test]
fn newick_form_wraps_children() {
    let topology = topology_of("block(define(x, 42), x)");
    let newick = topology.newick();
    assert!(newick.ends_with(';'));
    assert!(newick.contains("block$1"), "{newick}");
    assert!(newick.contains("variable$1$x"), "{newick}");
}

#[test]
fn recursive_functions_do_not_loop_the_walk() {
    let topology = topology_of("block(define(f, n, if(n == 0, 0, f(n - 1))), f(3))");
    // The walk terminates and reports a bounded tree.
    assert!(topology.size() > 3);
}

#[test]
fn shared_variables_appear_under_every_reader() {
    let topology = topology_of("block(define(x, 1), x + x)");
    let newick = topology.newick();
    let occurrences = newick.matches("variable$1$x").count();
    assert!(occurrences >= 2, "{newick}");
}
