//! The primitive name scheme: compose/parse round-trips and the global
//! uniqueness of compiled names.

use std::collections::HashMap;

use pretty_assertions::assert_eq;
use tessera::{Environment, NameParts, Snippets, Topology, compile, compose_primitive_name, parse_primitive_name};

fn test_primitive_name(expected_parts: &NameParts, expected_name: &str) {
    let name = compose_primitive_name(expected_parts);
    assert_eq!(name, expected_name);

    let parts = parse_primitive_name(&name).unwrap();
    assert_eq!(&parts, expected_parts);
}

#[test]
fn compose_and_parse_cover_every_optional_field() {
    let mut parts = NameParts {
        locality: None,
        primitive: "add".to_owned(),
        sequence_number: 1,
        instance: None,
        compile_id: 2,
        tag1: 3,
        tag2: -1,
    };
    test_primitive_name(&parts, "/tessera/add$1/2$3");

    parts.locality = Some(0);
    parts.instance = Some("test".to_owned());
    test_primitive_name(&parts, "/tessera$0/add$1$test/2$3");

    parts.locality = Some(1);
    parts.tag2 = 4;
    test_primitive_name(&parts, "/tessera$1/add$1$test/2$3$4");

    parts.locality = None;
    parts.instance = None;
    test_primitive_name(&parts, "/tessera/add$1/2$3$4");
}

#[test]
fn parse_rejects_garbage() {
    for bad in ["", "add$1", "/tessera", "/tessera/add$1", "/tessera/add$1/2$3$4$5"] {
        assert!(parse_primitive_name(bad).is_err(), "{bad} should not parse");
    }
}

fn collect_names(topology: &Topology, into: &mut Vec<String>) {
    into.push(topology.name.clone());
    for child in &topology.children {
        collect_names(child, into);
    }
}

/// Distinct nodes must carry distinct names. A node may appear several
/// times in the reported tree (a variable referenced from more than one
/// place, a function re-entered and cut to a leaf), so a repeated name is
/// only legal when the subtrees agree or one of them is a cycle-cut leaf.
fn check_unique(topology: &Topology, seen: &mut HashMap<String, Topology>) {
    match seen.get(&topology.name) {
        Some(previous) => {
            let cycle_cut = previous.children.is_empty() || topology.children.is_empty();
            assert!(
                cycle_cut || previous == topology,
                "name '{}' is shared by two distinct nodes",
                topology.name
            );
        }
        None => {
            seen.insert(topology.name.clone(), topology.clone());
        }
    }
    for child in &topology.children {
        check_unique(child, seen);
    }
}

#[test]
fn compiled_names_are_unique_and_round_trip() {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    let program = compile(
        "names",
        "block(define(f, a, a + a * 2), map(lambda(i, f(i)), list(1, 2, 3)))",
        &mut snippets,
        &env,
    )
    .unwrap();

    let topology = program.topology().expect("the entry point is a primitive");
    check_unique(&topology, &mut HashMap::new());

    let mut names = Vec::new();
    collect_names(&topology, &mut names);
    for name in &names {
        let parts = parse_primitive_name(name).unwrap();
        assert_eq!(&compose_primitive_name(&parts), name);
    }
}

#[test]
fn instance_attributes_land_in_the_name() {
    let mut snippets = Snippets::new();
    let env = Environment::local();
    let program = compile("attr", "block(define(x, 42), x)", &mut snippets, &env).unwrap();
    let topology = program.topology().unwrap();
    let mut names = Vec::new();
    collect_names(&topology, &mut names);
    assert!(
        names.iter().any(|n| n.contains("variable$1$x")),
        "expected an instance-tagged variable name in {names:?}"
    );
}
