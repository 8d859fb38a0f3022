//! Parser driver: consumes source text and builds the node tree (spec. §4.1,
//! §4.2). The mutable mechanics below are the Rust analogue of the original
//! implementation's `ActionData` (`config_parser.cpp`, `config/actions.h`):
//! a builder that is threaded through parsing and discarded once a `CfgMap`
//! has been produced, rather than a long-lived object.

mod include;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::Error;
use crate::expr;
use crate::helpers;
use crate::lexer::{self, Lexer, Token};
use crate::node::{CfgMap, ElementType, HexValue, Node, NumberValue, Origin, ScalarValue};
use crate::reader::Reader;

/// Top-level parsing state shared across a root file and everything it
/// (transitively) includes.
pub(crate) struct ParseContext {
    pub(crate) all_files: std::collections::HashSet<PathBuf>,
    pub(crate) fragments: Vec<CfgMap>,
    pub(crate) overrides: IndexMap<String, (Node, Origin)>,
}

impl ParseContext {
    fn new() -> Self {
        Self {
            all_files: std::collections::HashSet::new(),
            fragments: Vec::new(),
            overrides: IndexMap::new(),
        }
    }
}

/// Entry point: parses a root file (and anything it includes) and resolves
/// the result into a [`Reader`] (spec. §6.3).
#[derive(Debug)]
pub struct Parser;

impl Parser {
    /// Parses `path`, resolving includes relative to `path`'s parent
    /// directory.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn parse(path: impl AsRef<Path>) -> Result<Reader, Error> {
        let path = path.as_ref();
        let root_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse_with_root(path, root_dir)
    }

    /// Parses `path`, resolving top-level (non-`include_relative`) includes
    /// against `root_dir` instead of `path`'s own directory.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn parse_with_root(path: impl AsRef<Path>, root_dir: impl AsRef<Path>) -> Result<Reader, Error> {
        let path = path.as_ref();
        let mut ctx = ParseContext::new();
        include::parse_file(&mut ctx, path, root_dir.as_ref())?;
        finish(ctx)
    }

    /// Parses `source` directly, tagging every origin in it with `tag`
    /// (instead of a file path). Includes, if any, resolve against the
    /// current working directory.
    #[tracing::instrument(skip_all, fields(tag = tracing::field::Empty))]
    pub fn parse_from_string(source: &str, tag: impl Into<SourceTag>) -> Result<Reader, Error> {
        let tag = tag.into().into_inner();
        tracing::Span::current().record("tag", tracing::field::display(&tag));
        let mut ctx = ParseContext::new();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        parse_source(&mut ctx, source, Arc::from(tag), &cwd)?;
        finish(ctx)
    }
}

/// A thin wrapper so `parse_from_string` accepts both `&str` and `String`
/// tags without an extra turbofish at call sites.
#[derive(Debug)]
pub struct SourceTag(String);

impl SourceTag {
    fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for SourceTag {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for SourceTag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn finish(ctx: ParseContext) -> Result<Reader, Error> {
    let resolved = crate::resolver::resolve(ctx.fragments, ctx.overrides)?;
    Ok(Reader::new(resolved, None))
}

/// Tokenizes and parses one document's top-level items, pushing fragments
/// and overrides into `ctx`. Called once per root/included file.
#[tracing::instrument(level = "debug", skip_all, fields(file = %file))]
pub(crate) fn parse_source(
    ctx: &mut ParseContext,
    source: &str,
    file: Arc<str>,
    base_dir: &Path,
) -> Result<(), Error> {
    let mut cursor = Cursor::new(source, file.clone());
    loop {
        match cursor.peek()? {
            Token::Eof => break,
            Token::Ident(word) if word == "include" || word == "include_relative" => {
                let relative = word == "include_relative";
                cursor.bump()?;
                include::handle_directive(ctx, &mut cursor, &file, base_dir, relative)?;
            }
            Token::Ident(word) => match word.as_str() {
                "struct" => {
                    let (name, node) =
                        parse_struct_like_header(ctx, &mut cursor, 1, &[], false, false)?;
                    let mut frag = CfgMap::new();
                    frag.insert(name, node);
                    ctx.fragments.push(frag);
                }
                "proto" => {
                    let (name, node) =
                        parse_struct_like_header(ctx, &mut cursor, 1, &[], true, false)?;
                    let mut frag = CfgMap::new();
                    frag.insert(name, node);
                    ctx.fragments.push(frag);
                }
                "reference" => {
                    let (name, node) = parse_reference_header(&mut cursor, 1)?;
                    let mut frag = CfgMap::new();
                    frag.insert(name, node);
                    ctx.fragments.push(frag);
                }
                _ => {
                    let (segments, value, is_override, origin) = parse_pair(&mut cursor, true)?;
                    if is_override {
                        insert_override(ctx, &segments, value, origin)?;
                    } else {
                        let frag = helpers::unflatten(&segments, value, &origin);
                        ctx.fragments.push(frag);
                    }
                }
            },
            other => {
                return Err(Error::Parse {
                    message: format!("unexpected token {other} at top level"),
                    origin: Origin::new(file.clone(), cursor.peek_line()?),
                })
            }
        }
    }
    Ok(())
}

fn insert_override(
    ctx: &mut ParseContext,
    segments: &[String],
    value: Node,
    origin: Origin,
) -> Result<(), Error> {
    let key = segments.join(".");
    if let Some((_, first_origin)) = ctx.overrides.get(&key) {
        return Err(Error::DuplicateOverride {
            key,
            first: first_origin.clone(),
            second: origin,
        });
    }
    ctx.overrides.insert(key, (value, origin));
    Ok(())
}

/// A one-token-lookahead cursor over a single document's tokens.
pub(crate) struct Cursor<'a> {
    lexer: Lexer<'a>,
    peeked: Option<(Token, usize)>,
    file: Arc<str>,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str, file: Arc<str>) -> Self {
        Self {
            lexer: Lexer::new(source),
            peeked: None,
            file,
        }
    }

    fn peek(&mut self) -> Result<&Token, Error> {
        if self.peeked.is_none() {
            let spanned = self.lexer.next_token().map_err(|(message, line)| Error::Parse {
                message,
                origin: Origin::new(self.file.clone(), line),
            })?;
            self.peeked = Some((spanned.token, spanned.line));
        }
        Ok(&self.peeked.as_ref().unwrap().0)
    }

    fn peek_line(&mut self) -> Result<usize, Error> {
        self.peek()?;
        Ok(self.peeked.as_ref().unwrap().1)
    }

    fn bump(&mut self) -> Result<(Token, usize), Error> {
        if let Some(spanned) = self.peeked.take() {
            return Ok(spanned);
        }
        let spanned = self.lexer.next_token().map_err(|(message, line)| Error::Parse {
            message,
            origin: Origin::new(self.file.clone(), line),
        })?;
        Ok((spanned.token, spanned.line))
    }

    fn origin_here(&mut self) -> Result<Origin, Error> {
        Ok(Origin::new(self.file.clone(), self.peek_line()?))
    }

    fn expect(&mut self, expected: &Token) -> Result<(), Error> {
        let (tok, line) = self.bump()?;
        if &tok == expected {
            Ok(())
        } else {
            Err(Error::Parse {
                message: format!("expected {expected}, found {tok}"),
                origin: Origin::new(self.file.clone(), line),
            })
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(), Error> {
        let (tok, line) = self.bump()?;
        match tok {
            Token::Ident(word) if word == expected => Ok(()),
            other => Err(Error::Parse {
                message: format!("expected `{expected}`, found {other}"),
                origin: Origin::new(self.file.clone(), line),
            }),
        }
    }

    fn expect_key(&mut self) -> Result<(String, usize), Error> {
        let (tok, line) = self.bump()?;
        match tok {
            Token::Ident(word) if !lexer::is_reserved(&word) => Ok((word, line)),
            Token::Ident(word) => Err(Error::Parse {
                message: format!("'{word}' is a reserved word and cannot be used as a key"),
                origin: Origin::new(self.file.clone(), line),
            }),
            other => Err(Error::Parse {
                message: format!("expected a key, found {other}"),
                origin: Origin::new(self.file.clone(), line),
            }),
        }
    }
}

/// Parses `KEY ("." KEY)*` when `allow_flat` is set (top-level), or a single
/// `KEY` otherwise (nested blocks), followed by an optional `[override]`
/// annotation, `=`, and a value.
fn parse_pair(
    cursor: &mut Cursor<'_>,
    allow_flat: bool,
) -> Result<(Vec<String>, Node, bool, Origin), Error> {
    let origin = cursor.origin_here()?;
    let (first, _) = cursor.expect_key()?;
    let mut segments = vec![first];
    if allow_flat {
        while matches!(cursor.peek()?, Token::Dot) {
            cursor.bump()?;
            let (seg, _) = cursor.expect_key()?;
            segments.push(seg);
        }
    }

    let mut is_override = false;
    if matches!(cursor.peek()?, Token::LBracket) {
        cursor.bump()?;
        let (word, line) = cursor.bump()?;
        match word {
            Token::Ident(w) if w == "override" => is_override = true,
            other => {
                return Err(Error::Parse {
                    message: format!("expected `override`, found {other}"),
                    origin: Origin::new(cursor.file.clone(), line),
                })
            }
        }
        cursor.expect(&Token::RBracket)?;
    }

    cursor.expect(&Token::Equals)?;
    let value = parse_value(cursor)?;
    Ok((segments, value, is_override, origin))
}

fn parse_value(cursor: &mut Cursor<'_>) -> Result<Node, Error> {
    let origin = cursor.origin_here()?;
    let (tok, line) = cursor.bump()?;
    match tok {
        Token::Str(s) => Ok(Node::Value {
            value: ScalarValue::String(format!("\"{s}\"")),
            origin,
        }),
        Token::Integer { raw, value } => Ok(Node::Value {
            value: ScalarValue::Number {
                raw,
                value: NumberValue::Int(value),
            },
            origin,
        }),
        Token::Float { raw, value } => Ok(Node::Value {
            value: ScalarValue::Number {
                raw,
                value: NumberValue::Float(value),
            },
            origin,
        }),
        Token::Hex { raw, value } => Ok(Node::Value {
            value: ScalarValue::Hex(HexValue { raw, value }),
            origin,
        }),
        Token::Ident(w) if w == "true" => Ok(Node::Value {
            value: ScalarValue::Boolean(true),
            origin,
        }),
        Token::Ident(w) if w == "false" => Ok(Node::Value {
            value: ScalarValue::Boolean(false),
            origin,
        }),
        Token::Var(name) => Ok(Node::Var { name, origin }),
        Token::ValueLookup(segments) => Ok(Node::ValueLookup {
            path: segments,
            origin,
        }),
        Token::ExprRaw(raw) => {
            let lookups = expr::extract_lookups(&raw, &origin)?;
            Ok(Node::Expression {
                raw,
                lookups,
                origin,
            })
        }
        Token::LBracket => parse_list_body(cursor, origin),
        other => Err(Error::Parse {
            message: format!("expected a value, found {other}"),
            origin: Origin::new(cursor.file.clone(), line),
        }),
    }
}

fn parse_list_body(cursor: &mut Cursor<'_>, origin: Origin) -> Result<Node, Error> {
    let mut elements = Vec::new();
    let mut element_type = ElementType::Unknown;

    if matches!(cursor.peek()?, Token::RBracket) {
        cursor.bump()?;
        return Ok(Node::List {
            elements,
            element_type,
            origin,
        });
    }

    loop {
        let value = parse_value(cursor)?;
        if !value.is_opaque() {
            let found = ElementType::of(&value).expect("non-opaque has a tag");
            match element_type {
                ElementType::Unknown => element_type = found,
                t if t == found => {}
                _ => {
                    return Err(Error::Parse {
                        message: format!(
                            "list elements must share a type: found {found} after {element_type}"
                        ),
                        origin: value.origin().clone(),
                    })
                }
            }
        }
        elements.push(value);

        match cursor.bump()? {
            (Token::Comma, _) => {
                if matches!(cursor.peek()?, Token::RBracket) {
                    cursor.bump()?;
                    break;
                }
            }
            (Token::RBracket, _) => break,
            (other, line) => {
                return Err(Error::Parse {
                    message: format!("expected ',' or ']' in list, found {other}"),
                    origin: Origin::new(cursor.file.clone(), line),
                })
            }
        }
    }

    Ok(Node::List {
        elements,
        element_type,
        origin,
    })
}

/// Parses a `struct NAME { ... }` or `proto NAME { ... }` body.
/// `is_proto_keyword` says which keyword introduced this block;
/// `ambient_in_proto` says whether this block is lexically nested inside a
/// `proto` (possibly several levels up). A `struct` nested inside a `proto`
/// produces `Node::StructInProto` rather than `Node::Struct` (spec. §4.2) so
/// the resolver knows it may still contain unbound `Var` nodes.
fn parse_struct_like_header(
    ctx: &mut ParseContext,
    cursor: &mut Cursor<'_>,
    depth: usize,
    name_stack: &[String],
    is_proto_keyword: bool,
    ambient_in_proto: bool,
) -> Result<(String, Node), Error> {
    let origin = cursor.origin_here()?;
    let (name, _) = cursor.expect_key()?;
    cursor.expect(&Token::LBrace)?;

    let mut child_stack = name_stack.to_vec();
    child_stack.push(name.clone());
    let child_in_proto = is_proto_keyword || ambient_in_proto;
    let data = parse_block(ctx, cursor, depth, &child_stack, child_in_proto)?;

    let node = if is_proto_keyword {
        Node::Proto {
            name: name.clone(),
            depth,
            data,
            origin,
        }
    } else if ambient_in_proto {
        Node::StructInProto {
            name: name.clone(),
            depth,
            data,
            origin,
        }
    } else {
        Node::Struct {
            name: name.clone(),
            depth,
            data,
            origin,
        }
    };
    Ok((name, node))
}

/// Parses the body of a struct/proto (everything up to, and including, the
/// closing `}`): nested pairs, nested structs/protos/references. A pair
/// annotated `[override]` never lands in the returned map — it is recorded
/// in `ctx.overrides` under its absolute dotted path (`name_stack` + its own
/// key) instead, to be applied once the whole tree is merged (spec. §4.6
/// pass 4).
fn parse_block(
    ctx: &mut ParseContext,
    cursor: &mut Cursor<'_>,
    depth: usize,
    name_stack: &[String],
    in_proto: bool,
) -> Result<CfgMap, Error> {
    let mut data = CfgMap::new();
    loop {
        match cursor.peek()? {
            Token::RBrace => {
                cursor.bump()?;
                break;
            }
            Token::Eof => {
                return Err(Error::Parse {
                    message: "unterminated block: expected '}'".into(),
                    origin: cursor.origin_here()?,
                })
            }
            Token::Ident(word) => match word.as_str() {
                "struct" => {
                    cursor.bump()?;
                    let (name, node) = parse_struct_like_header(
                        ctx,
                        cursor,
                        depth + 1,
                        name_stack,
                        false,
                        in_proto,
                    )?;
                    insert_unique(&mut data, name, node)?;
                }
                "proto" => {
                    cursor.bump()?;
                    let (name, node) = parse_struct_like_header(
                        ctx,
                        cursor,
                        depth + 1,
                        name_stack,
                        true,
                        in_proto,
                    )?;
                    insert_unique(&mut data, name, node)?;
                }
                "reference" => {
                    cursor.bump()?;
                    let (name, node) = parse_reference_header(cursor, depth + 1)?;
                    insert_unique(&mut data, name, node)?;
                }
                _ => {
                    let (segments, value, is_override, origin) = parse_pair(cursor, false)?;
                    let key = segments.into_iter().next().expect("single segment");
                    if is_override {
                        let mut absolute = name_stack.to_vec();
                        absolute.push(key);
                        insert_override(ctx, &absolute, value, origin)?;
                    } else {
                        insert_unique(&mut data, key, value)?;
                    }
                }
            },
            other => {
                return Err(Error::Parse {
                    message: format!("unexpected token {other} in block"),
                    origin: cursor.origin_here()?,
                })
            }
        }
    }
    Ok(data)
}

fn insert_unique(data: &mut CfgMap, key: String, node: Node) -> Result<(), Error> {
    if let Some(existing) = data.get(&key) {
        return Err(Error::duplicate_key(
            key,
            existing.origin().clone(),
            node.origin().clone(),
        ));
    }
    data.insert(key, node);
    Ok(())
}

/// `reference DOTTED.PATH as NAME { ... }` (spec. §6.1, §4.2 REF_ADDKVP /
/// REF_VARDEF).
fn parse_reference_header(cursor: &mut Cursor<'_>, depth: usize) -> Result<(String, Node), Error> {
    let origin = cursor.origin_here()?;
    let (first, _) = cursor.expect_key()?;
    let mut path_segments = vec![first];
    while matches!(cursor.peek()?, Token::Dot) {
        cursor.bump()?;
        let (seg, _) = cursor.expect_key()?;
        path_segments.push(seg);
    }
    let proto_path = path_segments.join(".");

    cursor.expect_ident("as")?;
    let (name, _) = cursor.expect_key()?;
    cursor.expect(&Token::LBrace)?;

    let mut data = CfgMap::new();
    let mut ref_vars = CfgMap::new();
    ref_vars.insert(
        "PARENT_NAME".to_string(),
        Node::Value {
            value: ScalarValue::String(format!("\"{name}\"")),
            origin: origin.clone(),
        },
    );

    loop {
        match cursor.peek()? {
            Token::RBrace => {
                cursor.bump()?;
                break;
            }
            Token::Eof => {
                return Err(Error::Parse {
                    message: "unterminated reference: expected '}'".into(),
                    origin: cursor.origin_here()?,
                })
            }
            Token::Plus => {
                cursor.bump()?;
                let (key, _) = cursor.expect_key()?;
                cursor.expect(&Token::Equals)?;
                let value = parse_value(cursor)?;
                insert_unique(&mut data, key, value)?;
            }
            Token::Var(_) => {
                let (tok, _) = cursor.bump()?;
                let Token::Var(var_name) = tok else {
                    unreachable!()
                };
                cursor.expect(&Token::Equals)?;
                let value = parse_value(cursor)?;
                if let Some(existing) = ref_vars.get(&var_name) {
                    return Err(Error::duplicate_key(
                        format!("${var_name}"),
                        existing.origin().clone(),
                        value.origin().clone(),
                    ));
                }
                ref_vars.insert(var_name, value);
            }
            other => {
                return Err(Error::Parse {
                    message: format!(
                        "expected '+KEY = value', '$VAR = value', or '}}' in reference body, found {other}"
                    ),
                    origin: cursor.origin_here()?,
                })
            }
        }
    }

    Ok((
        name.clone(),
        Node::Reference {
            name,
            proto_path,
            depth,
            data,
            ref_vars,
            origin,
        },
    ))
}
