//! Pure transformations over node subtrees: deep merge, struct-from-reference
//! materialization, proto-variable substitution, flat-key unflattening, and
//! nested-key lookup.
//!
//! Ported from the original implementation's `config_helpers.cpp`
//! (`mergeNestedMaps`, `checkForErrors`, `structFromReference`,
//! `replaceProtoVar`) from `dynamic_pointer_cast`-based dispatch to
//! exhaustive pattern matching over [`Node`].

use indexmap::IndexMap;

use crate::error::Error;
use crate::expr;
use crate::node::{CfgMap, ElementType, Node, Origin, ScalarValue};

/// Merges `b` into `a`, consuming both (spec. §4.3). No override semantics:
/// a collision is only legal when both sides are struct-like, in which case
/// their `data` maps are merged recursively.
#[tracing::instrument(level = "trace", skip_all)]
pub(crate) fn merge_nested_maps(mut a: CfgMap, b: CfgMap) -> Result<CfgMap, Error> {
    for (key, b_node) in b {
        match a.shift_remove(&key) {
            None => {
                a.insert(key, b_node);
            }
            Some(a_node) => {
                let merged = check_for_errors_and_merge(&key, a_node, b_node)?;
                a.insert(key, merged);
            }
        }
    }
    Ok(a)
}

fn check_for_errors_and_merge(key: &str, a_node: Node, b_node: Node) -> Result<Node, Error> {
    let a_struct_like = a_node.is_struct_like();
    let b_struct_like = b_node.is_struct_like();

    if !a_struct_like && !b_struct_like {
        return Err(Error::duplicate_key(
            key,
            a_node.origin().clone(),
            b_node.origin().clone(),
        ));
    }
    if a_struct_like != b_struct_like {
        return Err(Error::mismatch_key(
            key,
            a_node.origin().clone(),
            b_node.origin().clone(),
        ));
    }

    if std::mem::discriminant(&a_node) != std::mem::discriminant(&b_node) {
        return Err(Error::mismatch_type(
            key,
            a_node.kind_name(),
            b_node.kind_name(),
            a_node.origin().clone(),
            b_node.origin().clone(),
        ));
    }

    let origin = a_node.origin().clone();
    let a_data = a_node.data().expect("struct-like has data").clone();
    let b_data = b_node.data().expect("struct-like has data").clone();
    let merged_data = merge_nested_maps(a_data, b_data)?;

    Ok(match a_node {
        Node::Struct { name, depth, .. } => Node::Struct {
            name,
            depth,
            data: merged_data,
            origin,
        },
        Node::StructInProto { name, depth, .. } => Node::StructInProto {
            name,
            depth,
            data: merged_data,
            origin,
        },
        Node::Proto { name, depth, .. } => Node::Proto {
            name,
            depth,
            data: merged_data,
            origin,
        },
        Node::Reference {
            name,
            proto_path,
            depth,
            ref_vars,
            ..
        } => Node::Reference {
            name,
            proto_path,
            depth,
            data: merged_data,
            ref_vars,
            origin,
        },
        _ => unreachable!("struct_like() only matches the four variants above"),
    })
}

/// Builds a new `Struct` named `reference.name` from a reference's own
/// `+key` additions plus a deep clone of the proto's fields (spec. §4.4).
/// `ref_vars` substitution happens afterwards, in [`replace_proto_var`].
pub(crate) fn struct_from_reference(
    ref_name: String,
    ref_depth: usize,
    ref_origin: Origin,
    ref_data: CfgMap,
    proto_data: &CfgMap,
) -> Result<Node, Error> {
    let mut data = ref_data;
    for (key, proto_node) in proto_data {
        let cloned = proto_node.deep_clone();
        match data.shift_remove(key) {
            None => {
                data.insert(key.clone(), cloned);
            }
            Some(existing) => {
                let merged = check_for_errors_and_merge(key, existing, cloned)?;
                data.insert(key.clone(), merged);
            }
        }
    }
    Ok(Node::Struct {
        name: ref_name,
        depth: ref_depth,
        data,
        origin: ref_origin,
    })
}

/// Recursively substitutes `Var` nodes and `$NAME`/`${NAME}` occurrences
/// inside string values, using `ref_vars` as the binding environment
/// (spec. §4.5).
pub(crate) fn replace_proto_var(node: Node, ref_vars: &CfgMap) -> Result<Node, Error> {
    match node {
        Node::Var { name, origin } => ref_vars
            .get(&name)
            .cloned()
            .ok_or(Error::UndefinedReferenceVar { var: name, origin }),
        Node::Value {
            value: ScalarValue::String(s),
            origin,
        } => {
            let substituted = substitute_vars_in_string(&s, ref_vars);
            Ok(Node::Value {
                value: ScalarValue::String(substituted),
                origin,
            })
        }
        Node::Value { .. } => Ok(node),
        Node::List {
            elements,
            origin,
            ..
        } => {
            let mut new_elements = Vec::with_capacity(elements.len());
            let mut element_type = ElementType::Unknown;
            for element in elements {
                let substituted = replace_proto_var(element, ref_vars)?;
                if !substituted.is_opaque() {
                    let found = ElementType::of(&substituted).expect("non-opaque has a tag");
                    match element_type {
                        ElementType::Unknown => element_type = found,
                        t if t == found => {}
                        _ => {
                            return Err(Error::Parse {
                                message: "list elements must share a type after substitution"
                                    .into(),
                                origin: substituted.origin().clone(),
                            })
                        }
                    }
                }
                new_elements.push(substituted);
            }
            Ok(Node::List {
                elements: new_elements,
                element_type,
                origin,
            })
        }
        Node::Expression { raw, origin, .. } => {
            let substituted_raw = substitute_vars_in_string(&raw, ref_vars);
            let lookups = expr::extract_lookups(&substituted_raw, &origin)?;
            if contains_unbound_dollar(&substituted_raw) {
                return Err(Error::InvalidConfig {
                    message: format!(
                        "expression '{substituted_raw}' still contains an unresolved '$' after variable substitution"
                    ),
                    origin,
                });
            }
            Ok(Node::Expression {
                raw: substituted_raw,
                lookups,
                origin,
            })
        }
        Node::ValueLookup { path, origin } => {
            let substituted_path = path
                .into_iter()
                .map(|segment| substitute_vars_in_string(&segment, ref_vars))
                .collect();
            Ok(Node::ValueLookup {
                path: substituted_path,
                origin,
            })
        }
        Node::Struct { name, depth, data, origin } => Ok(Node::Struct {
            name,
            depth,
            data: replace_proto_var_in_map(data, ref_vars)?,
            origin,
        }),
        Node::StructInProto { name, depth, data, origin } => Ok(Node::StructInProto {
            name,
            depth,
            data: replace_proto_var_in_map(data, ref_vars)?,
            origin,
        }),
        Node::Proto { name, depth, data, origin } => Ok(Node::Proto {
            name,
            depth,
            data: replace_proto_var_in_map(data, ref_vars)?,
            origin,
        }),
        Node::Reference {
            name,
            proto_path,
            depth,
            data,
            ref_vars: inner_ref_vars,
            origin,
        } => Ok(Node::Reference {
            name,
            proto_path,
            depth,
            data: replace_proto_var_in_map(data, ref_vars)?,
            ref_vars: inner_ref_vars,
            origin,
        }),
    }
}

fn replace_proto_var_in_map(data: CfgMap, ref_vars: &CfgMap) -> Result<CfgMap, Error> {
    let mut out = IndexMap::with_capacity(data.len());
    for (key, node) in data {
        out.insert(key, replace_proto_var(node, ref_vars)?);
    }
    Ok(out)
}

/// Replaces `$NAME`/`${NAME}` substrings of `s` with the bound value's text
/// (quotes stripped for strings), leaving unmatched `$...` untouched.
fn substitute_vars_in_string(s: &str, ref_vars: &CfgMap) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let rest = &s[i + 1..];
        let (name, consumed) = if let Some(stripped) = rest.strip_prefix('{') {
            match stripped.find('}') {
                Some(end) => (&stripped[..end], end + 2),
                None => {
                    out.push(c);
                    continue;
                }
            }
        } else {
            let end = rest
                .find(|ch: char| !(ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_'))
                .unwrap_or(rest.len());
            if end == 0 {
                out.push(c);
                continue;
            }
            (&rest[..end], end + 1)
        };
        if let Some(bound) = ref_vars.get(name) {
            out.push_str(&value_text(bound));
            for _ in 0..consumed {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn value_text(node: &Node) -> String {
    match node {
        Node::Value {
            value: ScalarValue::String(s),
            ..
        } => s.trim_matches('"').to_owned(),
        Node::Value {
            value: ScalarValue::Number { raw, .. },
            ..
        } => raw.clone(),
        Node::Value {
            value: ScalarValue::Boolean(b),
            ..
        } => b.to_string(),
        Node::Value {
            value: ScalarValue::Hex(hex),
            ..
        } => hex.raw.clone(),
        other => other.kind_name().to_owned(),
    }
}

/// After substitution, any `$` not introducing a `$(...)` value lookup is a
/// proto `Var` that was never bound.
fn contains_unbound_dollar(s: &str) -> bool {
    let bytes = s.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'$' && bytes.get(i + 1) != Some(&b'(') {
            return true;
        }
    }
    false
}

/// Builds a single-entry nested `CfgMap` out of a dotted-key assignment,
/// e.g. segments `["a", "b"]` and value `v` produce `{a: {b: v}}`.
pub(crate) fn unflatten(segments: &[String], value: Node, origin: &Origin) -> CfgMap {
    let mut node = value;
    for segment in segments.iter().rev().take(segments.len() - 1) {
        let mut data = CfgMap::new();
        data.insert(segment.clone(), node);
        node = Node::Struct {
            name: segment.clone(),
            depth: 0,
            data,
            origin: origin.clone(),
        };
    }
    let mut out = CfgMap::new();
    out.insert(segments[0].clone(), node);
    out
}

/// Walks `segments[..n-1]` from `root`, requiring each to be struct-like;
/// returns the final segment's parent map (spec. §4.8).
pub(crate) fn get_nested_config<'a>(
    root: &'a CfgMap,
    segments: &[String],
    full_path: &str,
    origin: &Origin,
) -> Result<&'a CfgMap, Error> {
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        match current.get(segment) {
            None => return Err(Error::invalid_key(full_path, origin.clone())),
            Some(node) if node.is_struct_like() => {
                current = node.data().expect("struct-like has data");
            }
            Some(node) => {
                return Err(Error::invalid_type(
                    full_path,
                    "struct",
                    node.kind_name(),
                    origin.clone(),
                ))
            }
        }
    }
    Ok(current)
}

pub(crate) fn get_config_value<'a>(
    root: &'a CfgMap,
    segments: &[String],
    full_path: &str,
    origin: &Origin,
) -> Result<&'a Node, Error> {
    let parent = get_nested_config(root, segments, full_path, origin)?;
    parent
        .get(segments.last().expect("non-empty path"))
        .ok_or_else(|| Error::invalid_key(full_path, origin.clone()))
}

pub(crate) fn get_nested_config_mut<'a>(
    root: &'a mut CfgMap,
    segments: &[String],
    full_path: &str,
    origin: &Origin,
) -> Result<&'a mut CfgMap, Error> {
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        match current.get_mut(segment) {
            None => return Err(Error::invalid_key(full_path, origin.clone())),
            Some(node) if node.is_struct_like() => {
                current = node.data_mut().expect("struct-like has data");
            }
            Some(node) => {
                return Err(Error::invalid_type(
                    full_path,
                    "struct",
                    node.kind_name(),
                    origin.clone(),
                ))
            }
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NumberValue, Origin};

    fn origin() -> Origin {
        Origin::new("test.cfg", 1)
    }

    fn num(v: i64) -> Node {
        Node::Value {
            value: ScalarValue::Number {
                raw: v.to_string(),
                value: NumberValue::Int(v),
            },
            origin: origin(),
        }
    }

    #[test]
    fn merge_disjoint_keys() {
        let mut a = CfgMap::new();
        a.insert("x".into(), num(1));
        let mut b = CfgMap::new();
        b.insert("y".into(), num(2));
        let merged = merge_nested_maps(a, b).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged.contains_key("x"));
        assert!(merged.contains_key("y"));
    }

    #[test]
    fn merge_duplicate_scalar_errors() {
        let mut a = CfgMap::new();
        a.insert("x".into(), num(1));
        let mut b = CfgMap::new();
        b.insert("x".into(), num(2));
        assert!(matches!(
            merge_nested_maps(a, b),
            Err(Error::DuplicateKey { .. })
        ));
    }

    #[test]
    fn merge_recurses_into_structs() {
        let mut inner_a = CfgMap::new();
        inner_a.insert("x".into(), num(1));
        let mut a = CfgMap::new();
        a.insert(
            "s".into(),
            Node::Struct {
                name: "s".into(),
                depth: 0,
                data: inner_a,
                origin: origin(),
            },
        );

        let mut inner_b = CfgMap::new();
        inner_b.insert("y".into(), num(2));
        let mut b = CfgMap::new();
        b.insert(
            "s".into(),
            Node::Struct {
                name: "s".into(),
                depth: 0,
                data: inner_b,
                origin: origin(),
            },
        );

        let merged = merge_nested_maps(a, b).unwrap();
        let data = merged["s"].data().unwrap();
        assert!(data.contains_key("x"));
        assert!(data.contains_key("y"));
    }

    #[test]
    fn unflatten_builds_nested_structs() {
        let segments = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let map = unflatten(&segments, num(5), &origin());
        let b = map["a"].data().unwrap();
        let c = b["b"].data().unwrap();
        assert!(matches!(c["c"], Node::Value { .. }));
    }

    #[test]
    fn substitutes_braced_and_bare_vars() {
        let mut ref_vars = CfgMap::new();
        ref_vars.insert(
            "DOF".into(),
            Node::Value {
                value: ScalarValue::String("\"3\"".into()),
                origin: origin(),
            },
        );
        assert_eq!(substitute_vars_in_string("leg_$DOF", &ref_vars), "leg_3");
        assert_eq!(substitute_vars_in_string("leg_${DOF}_end", &ref_vars), "leg_3_end");
        assert_eq!(substitute_vars_in_string("no vars here", &ref_vars), "no vars here");
    }
}


