//! The configuration node model: a tagged value tree with origin metadata.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;

/// Where a [`Node`] came from, for diagnostics.
///
/// The Rust analogue of the original implementation's `loc()`: every node
/// and every [`Error`](crate::error::Error) carries one of these so messages
/// can point back at a concrete file and line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Source file this node was parsed from (or a synthetic tag for
    /// `parse_from_string`).
    pub file: Arc<str>,
    /// 1-based line number within `file`.
    pub line: usize,
}

impl Origin {
    pub fn new(file: impl Into<Arc<str>>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// A placeholder origin for synthetically-constructed nodes (e.g. override
    /// application, proto-variable substitution results).
    pub fn synthetic(description: &'static str) -> Self {
        Self {
            file: Arc::from(description),
            line: 0,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.file, self.line)
    }
}

/// The canonical insertion-ordered mapping from key segment to [`Node`].
///
/// Iteration order matches the order keys first appeared in the source; this
/// is a hard invariant (spec. §3) so `CfgMap` is backed by `IndexMap` rather
/// than `BTreeMap` (which would sort keys lexically).
pub type CfgMap = IndexMap<String, Node>;

/// An integer or floating-point numeric literal: raw text plus parsed value.
///
/// The raw text is retained so hex values round-trip losslessly (spec. §9
/// design notes) and so `Reader::get::<i64>` can reject floats whose decimal
/// part would be silently truncated.
#[derive(Debug, Clone, PartialEq)]
pub enum NumberValue {
    Int(i64),
    Float(f64),
}

impl NumberValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            Self::Float(v) if v.fract() == 0.0 => Some(v as i64),
            Self::Float(_) => None,
        }
    }
}

/// A `0x…` literal: number-typed semantically, but its raw text is kept
/// separately from a plain integer so it can be re-emitted unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct HexValue {
    pub raw: String,
    pub value: u64,
}

/// Scalar payloads carried by [`Node::Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// Kept with the surrounding `"..."`; accessors strip them.
    String(String),
    Number { raw: String, value: NumberValue },
    Boolean(bool),
    Hex(HexValue),
}

impl ScalarValue {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number { .. } => "number",
            Self::Boolean(_) => "boolean",
            Self::Hex(_) => "hex",
        }
    }
}

/// The tag fixed by a list's first concrete element (spec. §3 invariant 1).
///
/// `Var`, `ValueLookup` and `Expression` elements are "opaque": they neither
/// set nor are checked against this tag until they have been resolved into a
/// concrete value, at which point homogeneity is re-validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Unknown,
    String,
    Number,
    Boolean,
    Hex,
    List,
    Struct,
}

impl ElementType {
    pub(crate) fn of(node: &Node) -> Option<Self> {
        Some(match node {
            Node::Value {
                value: ScalarValue::String(_),
                ..
            } => Self::String,
            Node::Value {
                value: ScalarValue::Number { .. },
                ..
            } => Self::Number,
            Node::Value {
                value: ScalarValue::Boolean(_),
                ..
            } => Self::Boolean,
            Node::Value {
                value: ScalarValue::Hex(_),
                ..
            } => Self::Hex,
            Node::List { .. } => Self::List,
            Node::Struct { .. } | Node::StructInProto { .. } | Node::Reference { .. } => {
                Self::Struct
            }
            Node::Var { .. } | Node::ValueLookup { .. } | Node::Expression { .. } => return None,
            Node::Proto { .. } => return None,
        })
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Unknown => "unknown",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Hex => "hex",
            Self::List => "list",
            Self::Struct => "struct",
        })
    }
}

/// A single tagged value-tree node. Every variant carries its own [`Origin`].
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A scalar: string, number, boolean, or hex literal.
    Value { value: ScalarValue, origin: Origin },
    /// An ordered, (after resolution) homogeneous sequence.
    List {
        elements: Vec<Node>,
        element_type: ElementType,
        origin: Origin,
    },
    /// `{{ ... }}` — arithmetic to evaluate once all lookups resolve.
    Expression {
        raw: String,
        lookups: IndexMap<String, Node>,
        origin: Origin,
    },
    /// `$(a.b.c)` — a deferred dereference of another key's value.
    ValueLookup { path: Vec<String>, origin: Origin },
    /// `$NAME` / `${NAME}` — a proto formal parameter.
    Var { name: String, origin: Origin },
    /// A named, ordered record.
    Struct {
        name: String,
        depth: usize,
        data: CfgMap,
        origin: Origin,
    },
    /// A `Struct` lexically declared inside a `Proto`; may still contain
    /// `Var` nodes until its enclosing `Reference` is resolved.
    StructInProto {
        name: String,
        depth: usize,
        data: CfgMap,
        origin: Origin,
    },
    /// A reusable record template; may contain `Var` nodes.
    Proto {
        name: String,
        depth: usize,
        data: CfgMap,
        origin: Origin,
    },
    /// An instantiation of a `Proto`.
    Reference {
        name: String,
        /// Dotted path of the referenced proto (by path, not by node pointer).
        proto_path: String,
        depth: usize,
        /// `+key = ...` additions.
        data: CfgMap,
        /// `$VAR = ...` bindings, seeded with `"$PARENT_NAME"`.
        ref_vars: CfgMap,
        origin: Origin,
    },
}

impl Node {
    pub fn origin(&self) -> &Origin {
        match self {
            Self::Value { origin, .. }
            | Self::List { origin, .. }
            | Self::Expression { origin, .. }
            | Self::ValueLookup { origin, .. }
            | Self::Var { origin, .. }
            | Self::Struct { origin, .. }
            | Self::StructInProto { origin, .. }
            | Self::Proto { origin, .. }
            | Self::Reference { origin, .. } => origin,
        }
    }

    /// Struct-like nodes are the ones merge and lookup are allowed to recurse
    /// into: `Struct`, `StructInProto`, `Proto`, `Reference` (spec. §4.3).
    pub fn is_struct_like(&self) -> bool {
        matches!(
            self,
            Self::Struct { .. } | Self::StructInProto { .. } | Self::Proto { .. } | Self::Reference { .. }
        )
    }

    /// Shared `.data` accessor for the struct-like variants.
    pub fn data(&self) -> Option<&CfgMap> {
        match self {
            Self::Struct { data, .. }
            | Self::StructInProto { data, .. }
            | Self::Proto { data, .. }
            | Self::Reference { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn data_mut(&mut self) -> Option<&mut CfgMap> {
        match self {
            Self::Struct { data, .. }
            | Self::StructInProto { data, .. }
            | Self::Proto { data, .. }
            | Self::Reference { data, .. } => Some(data),
            _ => None,
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Value { value, .. } => value.kind_name(),
            Self::List { .. } => "list",
            Self::Expression { .. } => "expression",
            Self::ValueLookup { .. } => "value lookup",
            Self::Var { .. } => "var",
            Self::Struct { .. } => "struct",
            Self::StructInProto { .. } => "struct-in-proto",
            Self::Proto { .. } => "proto",
            Self::Reference { .. } => "reference",
        }
    }

    /// True for `Var`/`ValueLookup`/`Expression`: nodes that do not yet carry
    /// a concrete value and so are exempt from list element-type checks
    /// (spec. §3 invariant 1) until resolved.
    pub(crate) fn is_opaque(&self) -> bool {
        matches!(self, Self::Var { .. } | Self::ValueLookup { .. } | Self::Expression { .. })
    }

    /// Depth-first deep clone, used when materializing a struct from a proto
    /// (spec. §4.4) so edits to the new struct never mutate the shared proto.
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }
}

/// Public kind tag returned by `Reader::kind`, after resolution has stripped
/// the tree down to `Value`/`List`/`Struct` (spec. §3 Lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Kind {
    String,
    Number,
    Boolean,
    Hex,
    List,
    Struct,
}

impl fmt::Display for Kind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Hex => "hex",
            Self::List => "list",
            Self::Struct => "struct",
        })
    }
}

impl Node {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Value {
                value: ScalarValue::String(_),
                ..
            } => Kind::String,
            Self::Value {
                value: ScalarValue::Number { .. },
                ..
            } => Kind::Number,
            Self::Value {
                value: ScalarValue::Boolean(_),
                ..
            } => Kind::Boolean,
            Self::Value {
                value: ScalarValue::Hex(_),
                ..
            } => Kind::Hex,
            Self::List { .. } => Kind::List,
            Self::Struct { .. } => Kind::Struct,
            // Only reachable before resolution completes; treated as struct-like
            // for diagnostic purposes.
            Self::StructInProto { .. } | Self::Proto { .. } | Self::Reference { .. } => {
                Kind::Struct
            }
            Self::Expression { .. } | Self::ValueLookup { .. } | Self::Var { .. } => {
                unreachable!("resolved trees never contain Expression/ValueLookup/Var nodes")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Origin {
        Origin::new("test.cfg", 1)
    }

    #[test]
    fn element_type_of_scalars() {
        let n = Node::Value {
            value: ScalarValue::Boolean(true),
            origin: origin(),
        };
        assert_eq!(ElementType::of(&n), Some(ElementType::Boolean));
    }

    #[test]
    fn opaque_nodes_have_no_element_type() {
        let n = Node::Var {
            name: "X".into(),
            origin: origin(),
        };
        assert_eq!(ElementType::of(&n), None);
        assert!(n.is_opaque());
    }

    #[test]
    fn struct_like_recognizes_all_four_kinds() {
        let data = CfgMap::new();
        for node in [
            Node::Struct {
                name: "s".into(),
                depth: 0,
                data: data.clone(),
                origin: origin(),
            },
            Node::Proto {
                name: "p".into(),
                depth: 0,
                data: data.clone(),
                origin: origin(),
            },
            Node::StructInProto {
                name: "sp".into(),
                depth: 0,
                data: data.clone(),
                origin: origin(),
            },
            Node::Reference {
                name: "r".into(),
                proto_path: "p".into(),
                depth: 0,
                data: data.clone(),
                ref_vars: CfgMap::new(),
                origin: origin(),
            },
        ] {
            assert!(node.is_struct_like());
        }
    }
}
