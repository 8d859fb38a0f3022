//! Orchestrates the resolution pipeline (spec. §4.6), in the fixed order the
//! original implementation's `Parser::resolveConfig` runs its passes:
//! flatten-and-collect-protos → per-document reference resolution →
//! cross-document merge → apply overrides → strip protos → unflatten flat
//! keys → resolve value lookups → evaluate expressions → cleanup.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::Error;
use crate::expr;
use crate::helpers;
use crate::node::{CfgMap, Node, Origin};

/// Runs the full pipeline over the fragments and overrides a parse produced,
/// returning the fully resolved `CfgMap`.
#[tracing::instrument(skip_all)]
pub(crate) fn resolve(
    fragments: Vec<CfgMap>,
    overrides: IndexMap<String, (Node, Origin)>,
) -> Result<CfgMap, Error> {
    let protos = collect_protos(&fragments);

    let resolved_fragments = fragments
        .into_iter()
        .map(|fragment| resolve_references(fragment, &protos, &CfgMap::new(), &[]))
        .collect::<Result<Vec<_>, _>>()?;

    let mut cfg_data = CfgMap::new();
    for fragment in resolved_fragments {
        cfg_data = helpers::merge_nested_maps(cfg_data, fragment)?;
    }

    apply_overrides(&mut cfg_data, overrides)?;
    strip_protos(&mut cfg_data, &protos);
    cfg_data = unflatten_top_level(cfg_data)?;
    resolve_value_lookups(&mut cfg_data)?;
    evaluate_expressions(&mut cfg_data)?;
    cleanup(&mut cfg_data, 0);

    Ok(cfg_data)
}

/// Pass 1: walk every fragment, registering each `Proto` under its dotted
/// path. Protos are left in place; [`strip_protos`] removes them later.
#[tracing::instrument(level = "debug", skip_all)]
fn collect_protos(fragments: &[CfgMap]) -> HashMap<String, Node> {
    let mut protos = HashMap::new();
    for fragment in fragments {
        collect_protos_in(fragment, "", &mut protos);
    }
    protos
}

fn collect_protos_in(map: &CfgMap, prefix: &str, protos: &mut HashMap<String, Node>) {
    for (key, node) in map {
        let path = join(prefix, key);
        if let Node::Proto { data, .. } = node {
            collect_protos_in(data, &path, protos);
            protos.insert(path, node.clone());
        } else if let Some(data) = node.data() {
            collect_protos_in(data, &path, protos);
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Pass 2: materializes every `Reference` into a `Struct`, recursively, per
/// document (spec. §4.6 step 2).
#[tracing::instrument(level = "debug", skip_all)]
fn resolve_references(
    map: CfgMap,
    protos: &HashMap<String, Node>,
    ref_vars: &CfgMap,
    referenced_protos: &[String],
) -> Result<CfgMap, Error> {
    let mut out = IndexMap::with_capacity(map.len());
    for (key, node) in map {
        let resolved = match node {
            Node::Proto { .. } => node,
            Node::Reference {
                name,
                proto_path,
                depth,
                data,
                ref_vars: own_ref_vars,
                origin,
            } => {
                let proto = protos.get(&proto_path).ok_or_else(|| Error::UndefinedProto {
                    path: proto_path.clone(),
                    origin: origin.clone(),
                })?;
                if referenced_protos.iter().any(|p| p == &proto_path) {
                    let mut chain = referenced_protos.to_vec();
                    chain.push(proto_path.clone());
                    return Err(Error::CyclicReference { chain, origin });
                }

                let proto_data = proto.data().expect("registered protos are Proto nodes");
                let materialized =
                    helpers::struct_from_reference(name, depth, origin, data, proto_data)?;

                // Callee (innermost reference) wins on $VAR name collisions.
                let mut merged_ref_vars = ref_vars.clone();
                for (k, v) in own_ref_vars {
                    merged_ref_vars.insert(k, v);
                }

                let substituted = helpers::replace_proto_var(materialized, &merged_ref_vars)?;
                let Node::Struct { name, depth, data, origin } = substituted else {
                    unreachable!("struct_from_reference always produces a Struct")
                };

                let mut next_chain = referenced_protos.to_vec();
                next_chain.push(proto_path);
                let data = resolve_references(data, protos, &merged_ref_vars, &next_chain)?;
                Node::Struct {
                    name,
                    depth,
                    data,
                    origin,
                }
            }
            Node::StructInProto { name, depth, data, origin } => {
                let node = Node::StructInProto { name, depth, data, origin };
                let substituted = helpers::replace_proto_var(node, ref_vars)?;
                let Node::StructInProto { name, depth, data, origin } = substituted else {
                    unreachable!("replace_proto_var preserves the StructInProto variant")
                };
                let data = resolve_references(data, protos, ref_vars, referenced_protos)?;
                Node::StructInProto {
                    name,
                    depth,
                    data,
                    origin,
                }
            }
            Node::Struct { name, depth, data, origin } => {
                let data = resolve_references(data, protos, ref_vars, referenced_protos)?;
                Node::Struct {
                    name,
                    depth,
                    data,
                    origin,
                }
            }
            other => other,
        };
        out.insert(key, resolved);
    }
    Ok(out)
}

/// Pass 4: apply `[override]` assignments against the merged tree.
#[tracing::instrument(level = "debug", skip_all)]
fn apply_overrides(
    cfg_data: &mut CfgMap,
    overrides: IndexMap<String, (Node, Origin)>,
) -> Result<(), Error> {
    for (key, (value, origin)) in overrides {
        let segments: Vec<String> = key.split('.').map(str::to_owned).collect();
        let parent = helpers::get_nested_config_mut(cfg_data, &segments, &key, &origin)?;
        let last = segments.last().expect("non-empty override key");
        if let Some(existing) = parent.get(last) {
            if !existing.is_struct_like() && !value.is_struct_like() {
                let existing_kind = existing.kind_name();
                let new_kind = value.kind_name();
                if existing_kind != new_kind {
                    return Err(Error::mismatch_type(
                        key,
                        existing_kind,
                        new_kind,
                        existing.origin().clone(),
                        origin,
                    ));
                }
            }
        }
        parent.insert(last.clone(), value);
    }
    Ok(())
}

/// Pass 5: drop every registered proto's subtree from the merged tree,
/// removing children before their parents (spec. §4.6 step 5).
#[tracing::instrument(level = "debug", skip_all)]
fn strip_protos(cfg_data: &mut CfgMap, protos: &HashMap<String, Node>) {
    let mut paths: Vec<&String> = protos.keys().collect();
    paths.sort_by(|a, b| b.cmp(a));
    for path in paths {
        let segments: Vec<&str> = path.split('.').collect();
        remove_path(cfg_data, &segments);
    }
}

fn remove_path(map: &mut CfgMap, segments: &[&str]) {
    if segments.len() == 1 {
        map.shift_remove(segments[0]);
        return;
    }
    if let Some(node) = map.get_mut(segments[0]) {
        if let Some(data) = node.data_mut() {
            remove_path(data, &segments[1..]);
        }
    }
}

/// Pass 6: any top-level key containing `.` is unflattened into nested
/// structs (spec. §4.6 step 6).
#[tracing::instrument(level = "debug", skip_all)]
fn unflatten_top_level(cfg_data: CfgMap) -> Result<CfgMap, Error> {
    let mut flat_keys: Vec<String> = cfg_data
        .keys()
        .filter(|k| k.contains('.'))
        .cloned()
        .collect();
    if flat_keys.is_empty() {
        return Ok(cfg_data);
    }
    flat_keys.sort_by(|a, b| b.cmp(a));

    let mut out = cfg_data;
    for flat_key in flat_keys {
        let node = out.shift_remove(&flat_key).expect("key just listed");
        let segments: Vec<String> = flat_key.split('.').map(str::to_owned).collect();
        let origin = node.origin().clone();
        let unflattened = helpers::unflatten(&segments, node, &origin);
        out = helpers::merge_nested_maps(out, unflattened)?;
    }
    Ok(out)
}

/// Pass 7: chase every `ValueLookup` to its terminal value, detecting
/// cycles via a linear scan of the chain built so far (spec. §4.6 step 7,
/// §9 design notes).
///
/// This is interleaved with pass 8 rather than run strictly before it: per
/// spec. §4.6 step 7, "subtrees of Expressions that are themselves
/// Expressions are evaluated recursively so the outer Expression sees only
/// numeric inputs" — a lookup chain that bottoms out on an `Expression`
/// (e.g. `d = $(c)` where `c = {{ $(a) }}`) must evaluate that expression on
/// the spot, not hand back an unevaluated node. `resolve_path`/`resolve_node`
/// below recurse into each other on demand against a frozen snapshot of the
/// pre-pass tree, memoizing each dotted path's resolved value so repeated
/// lookups (and independent chase chains) agree.
#[tracing::instrument(level = "debug", skip_all)]
fn resolve_value_lookups(cfg_data: &mut CfgMap) -> Result<(), Error> {
    let frozen = cfg_data.clone();
    let mut memo: HashMap<String, Node> = HashMap::new();
    let keys: Vec<String> = cfg_data.keys().cloned().collect();
    for key in keys {
        let origin = frozen[&key].origin().clone();
        let mut chain = Vec::new();
        let resolved = resolve_path(&frozen, &mut memo, std::slice::from_ref(&key), &origin, &mut chain)?;
        cfg_data.insert(key, resolved);
    }
    Ok(())
}

/// Dereferences `path` against the frozen `root`, following further
/// `ValueLookup`/`Expression` indirection until a concrete value falls out.
/// `chain` holds every dotted path currently being dereferenced on the
/// current call stack; `path` reappearing there is a `CyclicReference`.
fn resolve_path(
    root: &CfgMap,
    memo: &mut HashMap<String, Node>,
    path: &[String],
    origin: &Origin,
    chain: &mut Vec<String>,
) -> Result<Node, Error> {
    let dotted = path.join(".");
    if let Some(cached) = memo.get(&dotted) {
        return Ok(cached.clone());
    }
    if chain.iter().any(|visited| visited == &dotted) {
        let mut full_chain = chain.clone();
        full_chain.push(dotted);
        return Err(Error::CyclicReference {
            chain: full_chain,
            origin: origin.clone(),
        });
    }
    chain.push(dotted.clone());
    let raw = helpers::get_config_value(root, path, &dotted, origin)?.clone();
    let resolved = resolve_node(raw, root, memo, chain);
    chain.pop();
    let resolved = resolved?;
    memo.insert(dotted, resolved.clone());
    Ok(resolved)
}

/// Resolves a single node to its final form: `ValueLookup` chases via
/// [`resolve_path`], `Expression` resolves its embedded lookups then
/// evaluates (§4.7), and `List`/`Struct` recurse element/field-wise.
fn resolve_node(
    node: Node,
    root: &CfgMap,
    memo: &mut HashMap<String, Node>,
    chain: &mut Vec<String>,
) -> Result<Node, Error> {
    match node {
        Node::ValueLookup { path, origin } => resolve_path(root, memo, &path, &origin, chain),
        Node::Expression {
            raw,
            lookups,
            origin,
        } => {
            let mut resolved_lookups = IndexMap::with_capacity(lookups.len());
            for (key, lookup_node) in lookups {
                let resolved = resolve_node(lookup_node, root, memo, chain)?;
                resolved_lookups.insert(key, resolved);
            }
            expr::evaluate_to_node(&raw, &resolved_lookups, &origin)
        }
        Node::List {
            elements,
            origin,
            ..
        } => {
            let mut resolved_elements = Vec::with_capacity(elements.len());
            let mut element_type = crate::node::ElementType::Unknown;
            for element in elements {
                let resolved = resolve_node(element, root, memo, chain)?;
                let found = crate::node::ElementType::of(&resolved)
                    .expect("a resolved list element always has a concrete tag");
                match element_type {
                    crate::node::ElementType::Unknown => element_type = found,
                    t if t == found => {}
                    _ => {
                        return Err(Error::Parse {
                            message: format!(
                                "list elements must share a type after resolution: found {found} after {element_type}"
                            ),
                            origin: resolved.origin().clone(),
                        })
                    }
                }
                resolved_elements.push(resolved);
            }
            Ok(Node::List {
                elements: resolved_elements,
                element_type,
                origin,
            })
        }
        Node::Struct { name, depth, data, origin } => {
            let mut resolved_data = IndexMap::with_capacity(data.len());
            for (key, child) in data {
                resolved_data.insert(key, resolve_node(child, root, memo, chain)?);
            }
            Ok(Node::Struct {
                name,
                depth,
                data: resolved_data,
                origin,
            })
        }
        other => Ok(other),
    }
}

/// Pass 8: evaluate every remaining `Expression` node into a concrete
/// numeric `Value`. In practice pass 7 already evaluates every `Expression`
/// it reaches (as the spec directs: an expression is evaluated as soon as
/// something needs its value, whether that's the tree walk or another
/// lookup chasing through it), so this pass is a defensive sweep that finds
/// nothing left to do; kept as its own step so a future change to pass 7
/// that stops being fully eager still has a pass guaranteeing the §3
/// lifecycle invariant ("no Expression survives resolution").
#[tracing::instrument(level = "debug", skip_all)]
fn evaluate_expressions(cfg_data: &mut CfgMap) -> Result<(), Error> {
    for node in cfg_data.values_mut() {
        evaluate_expressions_in_node(node)?;
    }
    Ok(())
}

fn evaluate_expressions_in_node(node: &mut Node) -> Result<(), Error> {
    match node {
        Node::Expression { raw, lookups, origin } => {
            *node = expr::evaluate_to_node(raw, lookups, origin)?;
        }
        Node::List { elements, .. } => {
            for element in elements.iter_mut() {
                evaluate_expressions_in_node(element)?;
            }
        }
        Node::Struct { data, .. } => {
            for child in data.values_mut() {
                evaluate_expressions_in_node(child)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Pass 9: drop empty structs and recompute `depth` to match the final
/// nesting (spec. §4.6 step 9).
#[tracing::instrument(level = "debug", skip_all)]
fn cleanup(cfg_data: &mut CfgMap, depth: usize) {
    let empty_keys: Vec<String> = cfg_data
        .iter()
        .filter_map(|(k, v)| match v {
            Node::Struct { data, .. } if data.is_empty() => Some(k.clone()),
            _ => None,
        })
        .collect();
    for key in empty_keys {
        cfg_data.shift_remove(&key);
    }

    for node in cfg_data.values_mut() {
        if let Node::Struct {
            depth: node_depth,
            data,
            ..
        } = node
        {
            *node_depth = depth;
            cleanup(data, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NumberValue, Origin, ScalarValue};

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
    fn resolves_simple_value_lookup_chain() {
        let mut map = CfgMap::new();
        map.insert("a".into(), num(1));
        map.insert(
            "b".into(),
            Node::ValueLookup {
                path: vec!["a".into()],
                origin: origin(),
            },
        );
        resolve_value_lookups(&mut map).unwrap();
        assert!(matches!(map["b"], Node::Value { .. }));
    }

    #[test]
    fn detects_cyclic_value_lookup() {
        let mut map = CfgMap::new();
        map.insert(
            "foo".into(),
            Node::ValueLookup {
                path: vec!["bar".into()],
                origin: origin(),
            },
        );
        map.insert(
            "bar".into(),
            Node::ValueLookup {
                path: vec!["baz".into()],
                origin: origin(),
            },
        );
        map.insert(
            "baz".into(),
            Node::ValueLookup {
                path: vec!["foo".into()],
                origin: origin(),
            },
        );
        let err = resolve_value_lookups(&mut map).unwrap_err();
        assert!(matches!(err, Error::CyclicReference { .. }));
    }

    #[test]
    fn cleanup_drops_empty_structs() {
        let mut map = CfgMap::new();
        map.insert(
            "empty".into(),
            Node::Struct {
                name: "empty".into(),
                depth: 0,
                data: CfgMap::new(),
                origin: origin(),
            },
        );
        cleanup(&mut map, 0);
        assert!(map.is_empty());
    }
}


