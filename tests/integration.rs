//! End-to-end scenarios for the parser/resolver pipeline, reproducing the
//! bounded scenarios of spec.md §8 (S1-S7) plus a couple of the universal
//! invariants that don't fit naturally as module-local unit tests.

use std::io::Write;

use assert_matches::assert_matches;
use flexi_cfg::{Error, Parser};

fn parse(source: &str) -> flexi_cfg::Reader {
    Parser::parse_from_string(source, "test").expect("source should parse and resolve")
}

#[test]
fn s1_scalars_and_structs() {
    let reader = parse(
        r#"
        struct test1 {
            key1 = "value"
            key2 = 1.342
            key3 = 10
            f = "none"
        }
        struct test2 {
            my_key = "foo"
            n_key = true
            struct inner {
                list = [1, 2, 3, 4]
            }
        }
        "#,
    );

    assert_eq!(reader.get::<String>("test1.key1"), "value");
    assert!((reader.get::<f64>("test1.key2") - 1.342).abs() < 1e-12);
    assert_eq!(reader.get::<i64>("test1.key3"), 10);
    assert!(reader.get::<bool>("test2.n_key"));
    assert_eq!(reader.get::<Vec<i64>>("test2.inner.list"), vec![1, 2, 3, 4]);
    assert_eq!(reader.kind("test2.inner").unwrap(), flexi_cfg::Kind::Struct);
}

#[test]
fn s2_override_propagates_through_lookups_and_expressions() {
    let reader = parse(
        r#"
        a = 1
        b = $(a)
        c = {{ $(a) }}
        d = $(c)
        a [override] = 2
        "#,
    );

    assert_eq!(reader.get::<i64>("a"), 2);
    assert_eq!(reader.get::<i64>("b"), 2);
    assert_eq!(reader.get::<i64>("c"), 2);
    assert_eq!(reader.get::<i64>("d"), 2);
}

#[test]
fn s3_proto_and_reference() {
    let reader = parse(
        r#"
        proto leg {
            dof = $DOF
            gain = {{ $DOF * 2 }}
        }
        reference leg as fl {
            $DOF = 3
        }
        "#,
    );

    assert_eq!(reader.get::<i64>("fl.dof"), 3);
    assert_eq!(reader.get::<i64>("fl.gain"), 6);
    assert_eq!(reader.kind("fl").unwrap(), flexi_cfg::Kind::Struct);
    assert!(!reader.exists("leg"));
}

#[test]
fn s4_cyclic_value_lookup_is_detected() {
    let err = Parser::parse_from_string(
        r#"
        foo = $(bar)
        bar = $(baz)
        baz = $(foo)
        "#,
        "test",
    )
    .unwrap_err();

    assert_matches!(err, Error::CyclicReference { .. });
}

#[test]
fn s5_expression_precedence_and_lookup() {
    let reader = parse(
        r#"
        x = 3
        y = {{ -4.7 * -(3.72 + -pi) }}
        z = {{ $(x) ^ 2 + 1 }}
        "#,
    );

    assert!((reader.get::<f64>("y") - 2.7185145281279732).abs() < 1e-9);
    assert_eq!(reader.get::<i64>("z"), 10);
}

#[test]
fn s6_include_once_skips_duplicate() {
    let dir = tempfile::tempdir().unwrap();

    let b_path = dir.path().join("b.cfg");
    std::fs::write(&b_path, "struct shared {\n  v = 2\n}\n").unwrap();

    let a_path = dir.path().join("a.cfg");
    let mut a_file = std::fs::File::create(&a_path).unwrap();
    writeln!(
        a_file,
        "include [once] b.cfg\ninclude [once] b.cfg\nstruct top {{\n  v = 1\n}}\n"
    )
    .unwrap();

    let reader = Parser::parse(&a_path).expect("duplicate [once] include should just warn");
    assert_eq!(reader.get::<i64>("shared.v"), 2);
    assert_eq!(reader.get::<i64>("top.v"), 1);
}

#[test]
fn include_missing_without_optional_fails() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a.cfg");
    std::fs::write(&a_path, "include missing.cfg\n").unwrap();

    let err = Parser::parse(&a_path).unwrap_err();
    assert_matches!(err, Error::Io { .. });
}

#[test]
fn include_missing_optional_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a.cfg");
    std::fs::write(
        &a_path,
        "include [optional] missing.cfg\nstruct top {\n  v = 1\n}\n",
    )
    .unwrap();

    let reader = Parser::parse(&a_path).expect("missing [optional] include should just warn");
    assert_eq!(reader.get::<i64>("top.v"), 1);
}

#[test]
fn include_relative_resolves_against_included_files_directory() {
    let dir = tempfile::tempdir().unwrap();
    let sub_dir = dir.path().join("sub");
    std::fs::create_dir(&sub_dir).unwrap();

    // `root.cfg` include_relatives `sub/middle.cfg`; `middle.cfg` in turn
    // include_relatives `inner.cfg`, which resolves against `sub/` (the
    // directory `base_dir` was just rebound to), not the root's directory.
    std::fs::write(sub_dir.join("inner.cfg"), "struct inner {\n  v = 9\n}\n").unwrap();
    std::fs::write(sub_dir.join("middle.cfg"), "include_relative inner.cfg\n").unwrap();
    std::fs::write(
        dir.path().join("root.cfg"),
        "include_relative sub/middle.cfg\n",
    )
    .unwrap();

    let reader = Parser::parse(dir.path().join("root.cfg")).unwrap();
    assert_eq!(reader.get::<i64>("inner.v"), 9);
}

#[test]
fn s7_overlay_strict_rejects_unknown_key() {
    let base = parse(r#"struct s { a = 1  b = "x" }"#);
    let overlay = parse(r#"struct s { a = 2  c = 3 }"#);

    let mut merged = base;
    let err = merged.apply_overlay(&overlay).unwrap_err();
    assert_matches!(err, Error::InvalidKey { .. });
}

#[test]
fn merge_overwrites_scalars_and_unions_keys() {
    let base = parse(r#"struct s { a = 1  b = "x" }"#);
    let other = parse(r#"struct s { a = 2  c = 3 }"#);

    let mut merged = base;
    merged.merge(&other);
    assert_eq!(merged.get::<i64>("s.a"), 2);
    assert_eq!(merged.get::<String>("s.b"), "x");
    assert_eq!(merged.get::<i64>("s.c"), 3);
}

#[test]
fn duplicate_key_without_override_is_an_error() {
    let err = Parser::parse_from_string("struct s { a = 1  a = 2 }", "test").unwrap_err();
    assert_matches!(err, Error::DuplicateKey { .. });
}

#[test]
fn undefined_proto_reference_is_an_error() {
    let err = Parser::parse_from_string("reference nope as x { }", "test").unwrap_err();
    assert_matches!(err, Error::UndefinedProto { .. });
}

#[test]
fn hex_literal_round_trips_as_a_number() {
    let reader = parse("h = 0x1F");
    assert_eq!(reader.get::<i64>("h"), 31);
    assert_eq!(reader.kind("h").unwrap(), flexi_cfg::Kind::Hex);
}

#[test]
fn fixed_size_array_accessor_checks_length() {
    let reader = parse("list = [1, 2, 3]");
    let arr: [i64; 3] = reader.get("list");
    assert_eq!(arr, [1, 2, 3]);
}

#[test]
fn flat_key_pairs_unflatten_into_nested_structs() {
    let reader = parse("a.b.c = 5");
    assert_eq!(reader.get::<i64>("a.b.c"), 5);
    assert_eq!(reader.kind("a").unwrap(), flexi_cfg::Kind::Struct);
    assert_eq!(reader.kind("a.b").unwrap(), flexi_cfg::Kind::Struct);
}

#[test]
fn resolved_tree_has_no_deferred_nodes_dump_succeeds() {
    let reader = parse(
        r#"
        proto leg { dof = $DOF }
        reference leg as fl { $DOF = 3 }
        plain = $(fl.dof)
        expr = {{ 1 + 1 }}
        "#,
    );
    let dumped = reader.dump();
    assert!(dumped.contains("\"fl\""));
    assert!(dumped.contains("\"plain\": 3"));
    assert!(dumped.contains("\"expr\": 2"));
}
