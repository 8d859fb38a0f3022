//! Tokenizer for the source language described in spec. §6.1.
//!
//! No parser-combinator or PEG crate is used anywhere in the example pack
//! this project was grounded on, so the grammar contract is implemented as a
//! hand-rolled lexer feeding a recursive-descent driver (`crate::parser`)
//! rather than a generated parser. Token *shapes* below are bit-exact with
//! spec. §6.1; keywords (`struct`, `proto`, `include`, ...) are recognized by
//! the parser from plain `Ident` tokens rather than the lexer, since they
//! share the `KEY` shape with ordinary identifiers.

use std::fmt;

use crate::node::{NumberValue, Origin};

/// Key segments, reference/struct/proto names: `[a-z][A-Za-z0-9_]*`.
pub(crate) const RESERVED_WORDS: &[&str] = &[
    "struct",
    "proto",
    "reference",
    "as",
    "include",
    "include_relative",
    "override",
    "optional",
    "once",
    "true",
    "false",
];

pub(crate) fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.contains(&word)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// `KEY`-shaped word; may turn out to be a keyword or a boolean literal
    /// once the parser knows the context.
    Ident(String),
    Integer { raw: String, value: i64 },
    Float { raw: String, value: f64 },
    Hex { raw: String, value: u64 },
    /// Content between the quotes, without them.
    Str(String),
    /// `$NAME` or `${NAME}` — the `NAME` part only.
    Var(String),
    /// `$(a.b.c)` — already split on `.`.
    ValueLookup(Vec<String>),
    /// Raw text between `{{` and `}}`, unparsed.
    ExprRaw(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Equals,
    Plus,
    Dot,
    Comma,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(formatter, "`{s}`"),
            Self::Integer { raw, .. } | Self::Float { raw, .. } | Self::Hex { raw, .. } => {
                write!(formatter, "`{raw}`")
            }
            Self::Str(s) => write!(formatter, "\"{s}\""),
            Self::Var(name) => write!(formatter, "${name}"),
            Self::ValueLookup(segs) => write!(formatter, "$({})", segs.join(".")),
            Self::ExprRaw(raw) => write!(formatter, "{{{{ {raw} }}}}"),
            Self::LBrace => formatter.write_str("'{'"),
            Self::RBrace => formatter.write_str("'}'"),
            Self::LBracket => formatter.write_str("'['"),
            Self::RBracket => formatter.write_str("']'"),
            Self::Equals => formatter.write_str("'='"),
            Self::Plus => formatter.write_str("'+'"),
            Self::Dot => formatter.write_str("'.'"),
            Self::Comma => formatter.write_str("','"),
            Self::Eof => formatter.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: usize,
}

pub(crate) struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    pub(crate) fn tokenize(mut self) -> Result<Vec<Spanned>, (String, usize)> {
        let mut out = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            out.push(spanned);
            if done {
                break;
            }
        }
        Ok(out)
    }

    /// Current 1-based line, for diagnostics issued by the parser between
    /// token reads (e.g. while scanning an include path).
    pub(crate) fn current_line(&self) -> usize {
        self.line
    }

    /// Skips trivia, then returns (without consuming) the next raw
    /// character. Used by the parser to decide whether a bracketed
    /// `[optional]`/`[once]` annotation follows `include`, without routing
    /// through the generic tokenizer (which would choke on a bare file path).
    pub(crate) fn peek_significant_char(&mut self) -> Option<char> {
        self.skip_trivia();
        self.peek()
    }

    /// Reads one token, skipping leading trivia first.
    pub(crate) fn next_token(&mut self) -> Result<Spanned, (String, usize)> {
        self.skip_trivia();
        let line = self.line;
        let Some(ch) = self.peek() else {
            return Ok(Spanned {
                token: Token::Eof,
                line,
            });
        };
        let token = match ch {
                '{' if self.peek_at(1) == Some('{') => {
                    self.advance();
                    self.advance();
                    self.lex_expression(line)?
                }
                '{' => {
                    self.advance();
                    Token::LBrace
                }
                '}' => {
                    self.advance();
                    Token::RBrace
                }
                '[' => {
                    self.advance();
                    Token::LBracket
                }
                ']' => {
                    self.advance();
                    Token::RBracket
                }
                '=' => {
                    self.advance();
                    Token::Equals
                }
                c if (c == '-' || c == '+') && self.peek_digit_at(1) => self.lex_number(line)?,
                '+' => {
                    self.advance();
                    Token::Plus
                }
                '.' => {
                    self.advance();
                    Token::Dot
                }
                ',' => {
                    self.advance();
                    Token::Comma
                }
                '"' => self.lex_string(line)?,
                '$' => self.lex_dollar(line)?,
                c if c.is_ascii_digit() => self.lex_number(line)?,
                c if c.is_ascii_lowercase() => self.lex_ident(),
                other => {
                    return Err((format!("unexpected character '{other}'"), line));
                }
            };
        Ok(Spanned { token, line })
    }

    /// Reads a bare, whitespace-terminated include path starting at the
    /// current (post-trivia) position. Paths are not part of the token
    /// grammar proper — they may contain `/`, `-`, digits-leading segments,
    /// etc. — so this reads raw characters rather than routing through
    /// `next_token`.
    pub(crate) fn scan_path(&mut self) -> Result<(String, usize), (String, usize)> {
        self.skip_trivia();
        let line = self.line;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '#' {
                break;
            }
            self.advance();
        }
        if self.pos == start {
            return Err(("expected an include path".into(), line));
        }
        Ok((self.source[start..self.pos].to_owned(), line))
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn peek_digit_at(&self, n: usize) -> bool {
        self.peek_at(n).is_some_and(|c| c.is_ascii_digit())
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
        }
        Some(ch)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        Token::Ident(self.source[start..self.pos].to_owned())
    }

    fn lex_string(&mut self, line: usize) -> Result<Token, (String, usize)> {
        self.advance(); // opening quote
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '"' {
                let content = self.source[start..self.pos].to_owned();
                self.advance(); // closing quote
                if content.is_empty() {
                    return Err(("empty string literals are not permitted".into(), line));
                }
                return Ok(Token::Str(content));
            }
            self.advance();
        }
        Err(("unterminated string literal".into(), line))
    }

    fn lex_number(&mut self, line: usize) -> Result<Token, (String, usize)> {
        let start = self.pos;
        if self.bytes[self.pos] == b'-' || self.bytes[self.pos] == b'+' {
            self.advance();
        }
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let hex_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            if self.pos == hex_start {
                return Err(("invalid hex literal".into(), line));
            }
            let raw = self.source[start..self.pos].to_owned();
            let value = u64::from_str_radix(&self.source[hex_start..self.pos], 16)
                .map_err(|e| (format!("invalid hex literal: {e}"), line))?;
            return Ok(Token::Hex { raw, value });
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit() || !c.is_ascii_alphanumeric()) {
            // Only treat '.' as a decimal point if followed by a digit, so that
            // `10.field` style lookups (not part of this grammar, but defensive)
            // never get swallowed.
            if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance();
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let save = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = save;
            }
        }

        let raw = self.source[start..self.pos].to_owned();
        if is_float {
            let value: f64 = raw
                .parse()
                .map_err(|e| (format!("invalid float literal '{raw}': {e}"), line))?;
            Ok(Token::Float { raw, value })
        } else {
            let value: i64 = raw
                .parse()
                .map_err(|e| (format!("invalid integer literal '{raw}': {e}"), line))?;
            Ok(Token::Integer { raw, value })
        }
    }

    fn lex_dollar(&mut self, line: usize) -> Result<Token, (String, usize)> {
        self.advance(); // '$'
        match self.peek() {
            Some('(') => {
                self.advance();
                let start = self.pos;
                while self.peek().is_some_and(|c| c != ')') {
                    self.advance();
                }
                if self.peek() != Some(')') {
                    return Err(("unterminated value lookup".into(), line));
                }
                let inner = &self.source[start..self.pos];
                self.advance(); // ')'
                let segments: Vec<String> = inner.split('.').map(str::to_owned).collect();
                if segments.is_empty() || segments.iter().any(String::is_empty) {
                    return Err(("value lookup must contain a non-empty dotted path".into(), line));
                }
                Ok(Token::ValueLookup(segments))
            }
            Some('{') => {
                self.advance();
                let start = self.pos;
                while self.peek().is_some_and(|c| c != '}') {
                    self.advance();
                }
                if self.peek() != Some('}') {
                    return Err(("unterminated ${VAR}".into(), line));
                }
                let name = self.source[start..self.pos].to_owned();
                self.advance(); // '}'
                validate_var_name(&name, line)?;
                Ok(Token::Var(name))
            }
            _ => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
                    self.advance();
                }
                let name = self.source[start..self.pos].to_owned();
                validate_var_name(&name, line)?;
                Ok(Token::Var(name))
            }
        }
    }

    fn lex_expression(&mut self, line: usize) -> Result<Token, (String, usize)> {
        let start = self.pos;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some('}'), Some('}')) => {
                    let raw = self.source[start..self.pos].trim().to_owned();
                    self.advance();
                    self.advance();
                    return Ok(Token::ExprRaw(raw));
                }
                (Some(_), _) => {
                    self.advance();
                }
                (None, _) => return Err(("unterminated expression".into(), line)),
            }
        }
    }
}

fn validate_var_name(name: &str, line: usize) -> Result<(), (String, usize)> {
    let mut chars = name.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if ok {
        Ok(())
    } else {
        Err((format!("invalid variable name '${name}'"), line))
    }
}

/// Tokenizes `source`, translating lexer errors into `(message, line)` pairs
/// the caller attaches an [`Origin`] to.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, (String, usize)> {
    Lexer::new(source).tokenize()
}

pub(crate) fn number_value(token: &Token) -> Option<NumberValue> {
    match token {
        Token::Integer { value, .. } => Some(NumberValue::Int(*value)),
        Token::Float { value, .. } => Some(NumberValue::Float(*value)),
        _ => None,
    }
}

pub(crate) fn origin_for(file: &std::sync::Arc<str>, line: usize) -> Origin {
    Origin {
        file: file.clone(),
        line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_scalars() {
        let toks = kinds(r#"key1 = "value""#);
        assert_eq!(
            toks,
            vec![
                Token::Ident("key1".into()),
                Token::Equals,
                Token::Str("value".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn lexes_integer_vs_float_vs_hex() {
        assert!(matches!(kinds("10")[0], Token::Integer { value: 10, .. }));
        assert!(matches!(kinds("1.342")[0], Token::Float { .. }));
        assert!(matches!(kinds("0x1F")[0], Token::Hex { value: 31, .. }));
        assert!(matches!(kinds("-4.7")[0], Token::Float { .. }));
    }

    #[test]
    fn lexes_var_and_value_lookup() {
        assert_eq!(kinds("$DOF")[0], Token::Var("DOF".into()));
        assert_eq!(kinds("${DOF}")[0], Token::Var("DOF".into()));
        assert_eq!(
            kinds("$(a.b.c)")[0],
            Token::ValueLookup(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn lexes_expression_raw() {
        let toks = kinds("{{ -4.7 * -(3.72 + -pi) }}");
        assert_eq!(
            toks[0],
            Token::ExprRaw("-4.7 * -(3.72 + -pi)".into())
        );
    }

    #[test]
    fn comments_are_skipped() {
        let toks = kinds("key1 = 1 # trailing comment\nkey2 = 2");
        assert_eq!(
            toks,
            vec![
                Token::Ident("key1".into()),
                Token::Equals,
                Token::Integer {
                    raw: "1".into(),
                    value: 1
                },
                Token::Ident("key2".into()),
                Token::Equals,
                Token::Integer {
                    raw: "2".into(),
                    value: 2
                },
                Token::Eof,
            ]
        );
    }

    #[test]
    fn rejects_empty_string() {
        assert!(tokenize(r#"k = """#).is_err());
    }
}


