//! Read-only façade over a resolved [`CfgMap`]: typed accessors, sub-reader
//! extraction, overlay/merge, key enumeration (spec. §4.9).
//!
//! Grounded on the original implementation's `flexi_cfg::Reader`
//! (`examples/original_source/include/flexi_cfg/reader.h`,
//! `src/config_reader.cpp`): `getValue` overload set, `findStructsWithKey`,
//! `exists`. The per-type `convert` overload set becomes one `FromConfig`
//! trait implemented for the handful of scalar/list/sub-reader shapes
//! spec.md §4.9 names, so `get`/`try_get` are generic instead of overloaded.

use std::fmt;

use crate::error::Error;
use crate::helpers;
use crate::node::{CfgMap, Kind, Node, Origin, ScalarValue};

/// Read-only view over a resolved configuration tree.
///
/// Cloning a `Reader` is cheap relative to re-parsing, but not O(1) — `data`
/// is a full `CfgMap`. `Reader::get::<Reader>` and [`Reader::merge`] clone
/// the relevant subtree, matching the original's by-value `Reader(data,
/// parent)` constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct Reader {
    data: CfgMap,
    parent_name: String,
}

impl Reader {
    pub(crate) fn new(data: CfgMap, parent_name: Option<String>) -> Self {
        Self {
            data,
            parent_name: parent_name.unwrap_or_default(),
        }
    }

    /// Builds the absolute diagnostic name of `key` relative to this
    /// reader's parent prefix, e.g. a sub-reader for `"robot.legs"` reading
    /// `"fl.dof"` reports `"robot.legs.fl.dof"`.
    fn full_name(&self, key: &str) -> String {
        if self.parent_name.is_empty() {
            key.to_owned()
        } else {
            format!("{}.{key}", self.parent_name)
        }
    }

    fn segments(key: &str) -> Vec<String> {
        key.split('.').map(str::to_owned).collect()
    }

    fn lookup(&self, key: &str) -> Result<&Node, Error> {
        let segments = Self::segments(key);
        let origin = self.origin_for_errors();
        helpers::get_config_value(&self.data, &segments, &self.full_name(key), &origin)
    }

    /// `exists`/`find_structs_with_key` raise no error of their own, so any
    /// origin serves only as a placeholder; errors produced along the way
    /// are discarded, not surfaced.
    fn origin_for_errors(&self) -> Origin {
        Origin::synthetic("reader lookup")
    }

    /// `exists(key)` — true iff `key` resolves to some node without raising
    /// `InvalidKey`/`InvalidType` along the way (spec. §4.9, §8 property 6).
    pub fn exists(&self, key: &str) -> bool {
        self.lookup(key).is_ok()
    }

    /// The ordered list of this reader's top-level keys, in source order.
    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// The node kind at `key` (spec. §4.9 `type(key)`, renamed `kind` since
    /// `type` is a Rust keyword).
    pub fn kind(&self, key: &str) -> Result<Kind, Error> {
        Ok(self.lookup(key)?.kind())
    }

    /// Reads a scalar, list, or sub-`Reader` value at `key`.
    ///
    /// Numeric requests require [`Kind::Number`] (or `Kind::Hex`, whose
    /// parsed integer is exposed the same way); `bool` requires
    /// `Kind::Boolean`; `String` requires `Kind::String` and strips the
    /// surrounding quotes kept in the node payload.
    pub fn try_get<T: FromConfig>(&self, key: &str) -> Result<T, Error> {
        let node = self.lookup(key)?;
        T::from_node(node, &self.full_name(key))
    }

    /// Panicking convenience wrapper over [`Reader::try_get`] for call
    /// sites that already know the key exists and is well-typed (spec. §6.3
    /// names both `get<T>(key)` and `get<T>(key, &out)`; `try_get` covers
    /// the latter by returning `Result` instead of writing through a
    /// reference, which is not idiomatic Rust).
    ///
    /// # Panics
    /// Panics if `key` does not exist or does not hold a `T`.
    pub fn get<T: FromConfig>(&self, key: &str) -> T {
        self.try_get(key)
            .unwrap_or_else(|err| panic!("flexi-cfg: {err}"))
    }

    /// Every dotted path (relative to this reader) whose struct's immediate
    /// `data` contains `key` (spec. §4.9 `find_structs_with_key`).
    pub fn find_structs_with_key(&self, key: &str) -> Vec<String> {
        let mut out = Vec::new();
        find_structs_with_key_in(&self.data, "", key, &mut out);
        out
    }

    /// Destructive deep merge: every key in `other` is copied into `self`,
    /// recursing when both sides are structs; `other` wins on scalar/list
    /// collisions, no type compatibility is required (spec. §4.9 `merge`).
    pub fn merge(&mut self, other: &Reader) {
        merge_into(&mut self.data, &other.data);
    }

    /// Strict merge: every key in `other` must already exist in `self` at
    /// the same path with the same [`Kind`] (spec. §4.9 `apply_overlay`).
    /// `InvalidKey` if a key is missing; `MismatchType` if kinds differ.
    pub fn apply_overlay(&mut self, other: &Reader) -> Result<(), Error> {
        apply_overlay_into(&mut self.data, &other.data, &self.parent_name)
    }

    /// Renders the resolved tree as pretty-printed JSON (spec. SPEC_FULL.md
    /// §5.1). Object keys preserve source insertion order via
    /// `serde_json`'s `preserve_order` feature.
    pub fn dump(&self) -> String {
        let value = dump_to_json(&self.data);
        serde_json::to_string_pretty(&value).expect("CfgMap -> serde_json::Value never fails")
    }
}

impl fmt::Display for Reader {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.dump())
    }
}

fn find_structs_with_key_in(map: &CfgMap, prefix: &str, key: &str, out: &mut Vec<String>) {
    for (k, node) in map {
        if k == key {
            out.push(prefix.to_owned());
        }
        if let Node::Struct { data, .. } = node {
            let child_prefix = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            find_structs_with_key_in(data, &child_prefix, key, out);
        }
    }
}

fn merge_into(a: &mut CfgMap, b: &CfgMap) {
    for (key, b_node) in b {
        match a.get_mut(key) {
            Some(Node::Struct { data: a_data, .. }) => {
                if let Node::Struct { data: b_data, .. } = b_node {
                    merge_into(a_data, b_data);
                    continue;
                }
                a.insert(key.clone(), b_node.clone());
            }
            _ => {
                a.insert(key.clone(), b_node.clone());
            }
        }
    }
}

fn apply_overlay_into(a: &mut CfgMap, b: &CfgMap, parent_name: &str) -> Result<(), Error> {
    for (key, b_node) in b {
        let full_key = if parent_name.is_empty() {
            key.clone()
        } else {
            format!("{parent_name}.{key}")
        };
        match a.get_mut(key) {
            None => {
                return Err(Error::invalid_key(full_key, b_node.origin().clone()));
            }
            Some(Node::Struct { data: a_data, .. }) => match b_node {
                Node::Struct { data: b_data, .. } => {
                    apply_overlay_into(a_data, b_data, &full_key)?;
                }
                other => {
                    return Err(Error::mismatch_type(
                        full_key,
                        "struct",
                        other.kind_name(),
                        a.get(key).expect("just matched").origin().clone(),
                        other.origin().clone(),
                    ))
                }
            },
            Some(existing) => {
                if std::mem::discriminant(existing) != std::mem::discriminant(b_node) {
                    return Err(Error::mismatch_type(
                        full_key,
                        existing.kind_name(),
                        b_node.kind_name(),
                        existing.origin().clone(),
                        b_node.origin().clone(),
                    ));
                }
                a.insert(key.clone(), b_node.clone());
            }
        }
    }
    Ok(())
}

fn dump_to_json(map: &CfgMap) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for (key, node) in map {
        object.insert(key.clone(), node_to_json(node));
    }
    serde_json::Value::Object(object)
}

fn node_to_json(node: &Node) -> serde_json::Value {
    match node {
        Node::Value {
            value: ScalarValue::String(s),
            ..
        } => serde_json::Value::String(s.trim_matches('"').to_owned()),
        Node::Value {
            value: ScalarValue::Number { value, .. },
            ..
        } => match value.as_i64() {
            Some(i) => serde_json::Value::from(i),
            None => serde_json::Number::from_f64(value.as_f64())
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        },
        Node::Value {
            value: ScalarValue::Boolean(b),
            ..
        } => serde_json::Value::Bool(*b),
        Node::Value {
            value: ScalarValue::Hex(hex),
            ..
        } => serde_json::Value::from(hex.value),
        Node::List { elements, .. } => {
            serde_json::Value::Array(elements.iter().map(node_to_json).collect())
        }
        Node::Struct { data, .. } => dump_to_json(data),
        // Unreachable on a resolved tree (spec. §3 Lifecycle), but `dump`
        // shouldn't panic on a partially-resolved one handed to it by tests.
        other => serde_json::Value::String(format!("<unresolved {}>", other.kind_name())),
    }
}

/// Types a [`Reader`] can read out of a resolved [`Node`] (spec. §4.9).
///
/// Implemented for the scalar/list/sub-reader shapes spec.md §6.3 names;
/// not meant to be implemented outside this crate.
#[allow(private_interfaces)]
pub trait FromConfig: Sized {
    #[doc(hidden)]
    fn from_node(node: &Node, full_name: &str) -> Result<Self, Error>;
}

/// Numeric accessors also accept [`Kind::Hex`] nodes: spec.md §3 calls hex
/// literals "number-typed semantically", keeping the distinct `Hex` tag
/// only for round-tripping the original `0x...` text, not for gating reads.
fn expect_number(node: &Node, full_name: &str) -> Result<crate::node::NumberValue, Error> {
    match node {
        Node::Value {
            value: ScalarValue::Number { value, .. },
            ..
        } => Ok(value.clone()),
        Node::Value {
            value: ScalarValue::Hex(hex),
            ..
        } => i64::try_from(hex.value)
            .map(crate::node::NumberValue::Int)
            .map_err(|_| {
                Error::invalid_type(full_name, "number", "hex value too large for i64", node.origin().clone())
            }),
        other => Err(Error::invalid_type(
            full_name,
            "number",
            other.kind_name(),
            other.origin().clone(),
        )),
    }
}

macro_rules! impl_from_config_int {
    ($($t:ty),+) => {
        $(
            impl FromConfig for $t {
                fn from_node(node: &Node, full_name: &str) -> Result<Self, Error> {
                    let value = expect_number(node, full_name)?;
                    match value {
                        crate::node::NumberValue::Int(i) => <$t>::try_from(i).map_err(|_| {
                            Error::invalid_type(full_name, stringify!($t), "out-of-range integer", node.origin().clone())
                        }),
                        crate::node::NumberValue::Float(f) if f.fract() == 0.0 => {
                            Ok(f as $t)
                        }
                        crate::node::NumberValue::Float(_) => Err(Error::invalid_type(
                            full_name,
                            stringify!($t),
                            "float with a fractional part",
                            node.origin().clone(),
                        )),
                    }
                }
            }
        )+
    };
}

impl_from_config_int!(i32, i64, u32, u64, usize);

impl FromConfig for f32 {
    fn from_node(node: &Node, full_name: &str) -> Result<Self, Error> {
        Ok(expect_number(node, full_name)?.as_f64() as f32)
    }
}

impl FromConfig for f64 {
    fn from_node(node: &Node, full_name: &str) -> Result<Self, Error> {
        Ok(expect_number(node, full_name)?.as_f64())
    }
}

impl FromConfig for bool {
    fn from_node(node: &Node, full_name: &str) -> Result<Self, Error> {
        match node {
            Node::Value {
                value: ScalarValue::Boolean(b),
                ..
            } => Ok(*b),
            other => Err(Error::invalid_type(
                full_name,
                "boolean",
                other.kind_name(),
                other.origin().clone(),
            )),
        }
    }
}

impl FromConfig for String {
    fn from_node(node: &Node, full_name: &str) -> Result<Self, Error> {
        match node {
            Node::Value {
                value: ScalarValue::String(s),
                ..
            } => Ok(s.trim_matches('"').to_owned()),
            other => Err(Error::invalid_type(
                full_name,
                "string",
                other.kind_name(),
                other.origin().clone(),
            )),
        }
    }
}

impl<T: FromConfig> FromConfig for Vec<T> {
    fn from_node(node: &Node, full_name: &str) -> Result<Self, Error> {
        match node {
            Node::List { elements, .. } => elements
                .iter()
                .map(|element| T::from_node(element, full_name))
                .collect(),
            other => Err(Error::invalid_type(
                full_name,
                "list",
                other.kind_name(),
                other.origin().clone(),
            )),
        }
    }
}

impl<T: FromConfig + Default + Copy, const N: usize> FromConfig for [T; N] {
    fn from_node(node: &Node, full_name: &str) -> Result<Self, Error> {
        match node {
            Node::List { elements, .. } => {
                if elements.len() != N {
                    return Err(Error::InvalidConfig {
                        message: format!(
                            "expected {N} entries in '{full_name}', but found {}",
                            elements.len()
                        ),
                        origin: node.origin().clone(),
                    });
                }
                let mut out = [T::default(); N];
                for (slot, element) in out.iter_mut().zip(elements) {
                    *slot = T::from_node(element, full_name)?;
                }
                Ok(out)
            }
            other => Err(Error::invalid_type(
                full_name,
                "list",
                other.kind_name(),
                other.origin().clone(),
            )),
        }
    }
}

impl FromConfig for Reader {
    fn from_node(node: &Node, full_name: &str) -> Result<Self, Error> {
        match node {
            Node::Struct { data, .. } => Ok(Reader::new(data.clone(), Some(full_name.to_owned()))),
            other => Err(Error::invalid_type(
                full_name,
                "struct",
                other.kind_name(),
                other.origin().clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NumberValue, Origin};

    fn origin() -> Origin {
        Origin::new("test.cfg", 1)
    }

    fn reader_from(data: CfgMap) -> Reader {
        Reader::new(data, None)
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

    fn string(s: &str) -> Node {
        Node::Value {
            value: ScalarValue::String(format!("\"{s}\"")),
            origin: origin(),
        }
    }

    #[test]
    fn reads_scalars_and_strips_string_quotes() {
        let mut data = CfgMap::new();
        data.insert("key1".into(), string("value"));
        data.insert("key3".into(), num(10));
        let reader = reader_from(data);
        assert_eq!(reader.get::<String>("key1"), "value");
        assert_eq!(reader.get::<i64>("key3"), 10);
    }

    #[test]
    fn exists_false_on_missing_or_wrong_shape() {
        let mut inner = CfgMap::new();
        inner.insert("v".into(), num(1));
        let mut data = CfgMap::new();
        data.insert(
            "s".into(),
            Node::Struct {
                name: "s".into(),
                depth: 0,
                data: inner,
                origin: origin(),
            },
        );
        let reader = reader_from(data);
        assert!(reader.exists("s.v"));
        assert!(!reader.exists("s.missing"));
        assert!(!reader.exists("s.v.too_deep"));
        assert!(!reader.exists("missing"));
    }

    #[test]
    fn sub_reader_extraction() {
        let mut inner = CfgMap::new();
        inner.insert("v".into(), num(42));
        let mut data = CfgMap::new();
        data.insert(
            "s".into(),
            Node::Struct {
                name: "s".into(),
                depth: 0,
                data: inner,
                origin: origin(),
            },
        );
        let reader = reader_from(data);
        let sub: Reader = reader.get("s");
        assert_eq!(sub.get::<i64>("v"), 42);
    }

    #[test]
    fn find_structs_with_key_enumerates_matches() {
        let mut a = CfgMap::new();
        a.insert("target".into(), num(1));
        let mut b = CfgMap::new();
        b.insert("other".into(), num(2));
        let mut data = CfgMap::new();
        data.insert(
            "a".into(),
            Node::Struct {
                name: "a".into(),
                depth: 0,
                data: a,
                origin: origin(),
            },
        );
        data.insert(
            "b".into(),
            Node::Struct {
                name: "b".into(),
                depth: 0,
                data: b,
                origin: origin(),
            },
        );
        let reader = reader_from(data);
        assert_eq!(reader.find_structs_with_key("target"), vec!["a".to_string()]);
    }

    #[test]
    fn apply_overlay_rejects_unknown_key() {
        let mut base_data = CfgMap::new();
        base_data.insert("a".into(), num(1));
        let mut overlay_data = CfgMap::new();
        overlay_data.insert("c".into(), num(3));

        let mut base = reader_from(base_data);
        let overlay = reader_from(overlay_data);
        let err = base.apply_overlay(&overlay).unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }));
    }

    #[test]
    fn apply_overlay_replaces_matching_scalar() {
        let mut base_data = CfgMap::new();
        base_data.insert("a".into(), num(1));
        let mut overlay_data = CfgMap::new();
        overlay_data.insert("a".into(), num(2));

        let mut base = reader_from(base_data);
        let overlay = reader_from(overlay_data);
        base.apply_overlay(&overlay).unwrap();
        assert_eq!(base.get::<i64>("a"), 2);
    }

    #[test]
    fn merge_lets_other_win_on_scalar_collision() {
        let mut base_data = CfgMap::new();
        base_data.insert("a".into(), num(1));
        let mut other_data = CfgMap::new();
        other_data.insert("a".into(), num(2));
        other_data.insert("b".into(), num(3));

        let mut base = reader_from(base_data);
        base.merge(&reader_from(other_data));
        assert_eq!(base.get::<i64>("a"), 2);
        assert_eq!(base.get::<i64>("b"), 3);
    }
}


