//! `include` / `include_relative` resolution: `[optional]`/`[once]`
//! semantics, `${VAR}` substitution in paths, base-directory swapping
//! (spec. §4.1). Grounded on the original implementation's file-level parse
//! loop in `config_parser.cpp`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{parse_source, Cursor, ParseContext};
use crate::error::Error;
use crate::lexer::Token;
use crate::node::Origin;

/// Parses the root file directly (not via an `include` directive).
pub(crate) fn parse_file(ctx: &mut ParseContext, path: &Path, base_dir: &Path) -> Result<(), Error> {
    let origin = Origin::new(path.display().to_string(), 0);
    let source = read_file(path, &origin)?;
    ctx.all_files.insert(normalize(path));
    parse_source(ctx, &source, Arc::from(path.display().to_string()), base_dir)
}

/// Called right after the `include` / `include_relative` keyword has been
/// consumed: reads the optional `[optional]`/`[once]` tags, then the bare
/// file path, then resolves and (conditionally) parses the target file.
pub(crate) fn handle_directive(
    ctx: &mut ParseContext,
    cursor: &mut Cursor<'_>,
    including_file: &Arc<str>,
    base_dir: &Path,
    relative: bool,
) -> Result<(), Error> {
    let directive_line = cursor.lexer_current_line();
    let mut optional = false;
    let mut once = false;
    while cursor.lexer_peek_char() == Some('[') {
        cursor.lexer_bump_char();
        let (tag, line) = cursor.lexer_scan_tag()?;
        match tag.as_str() {
            "optional" => optional = true,
            "once" => once = true,
            other => {
                return Err(Error::Parse {
                    message: format!("unknown include annotation '[{other}]'"),
                    origin: Origin::new(including_file.clone(), line),
                })
            }
        }
    }

    let (raw_path, path_line) = cursor.lexer_scan_path()?;
    let origin = Origin::new(including_file.clone(), directive_line.max(path_line));
    let substituted = substitute_env_vars(&raw_path, &origin)?;

    // Both forms resolve against the *ambient* `base_dir`, not literally
    // against the currently-parsing file's own directory: `base_dir` is
    // already threaded through as a scoped override by the nearest
    // enclosing `include_relative` (or the root directory, if none), which
    // is what "the including file's directory" means once nesting is
    // involved (spec. §4.1).
    let target = base_dir.join(&substituted);
    let key = normalize(&target);

    if ctx.all_files.contains(&key) {
        if once {
            tracing::warn!(path = %target.display(), "skipping already-included file ([once])");
            return Ok(());
        }
        return Err(Error::Parse {
            message: format!(
                "'{}' was already included; annotate with [once] to allow re-inclusion checks to skip it",
                target.display()
            ),
            origin,
        });
    }

    let source = match read_file(&target, &origin) {
        Ok(source) => source,
        Err(err) => {
            if optional {
                tracing::warn!(path = %target.display(), error = %err, "skipping missing optional include");
                return Ok(());
            }
            return Err(err);
        }
    };

    ctx.all_files.insert(key);
    // Mirrors the original's `ScopedOverride`: only `include_relative`
    // rebinds `base_dir`, to the resolved target's own directory, for the
    // duration of that file's (and its descendants') parse.
    let child_base_dir = if relative {
        target.parent().unwrap_or_else(|| Path::new("."))
    } else {
        base_dir
    };
    parse_source(ctx, &source, Arc::from(target.display().to_string()), child_base_dir)
}

fn read_file(path: &Path, origin: &Origin) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        origin: origin.clone(),
        source,
    })
}

fn normalize(path: &Path) -> PathBuf {
    canonicalize_or_warn(path).unwrap_or_else(|| path.to_path_buf())
}

/// `all_files` dedup only needs a stable key, not a hard error, so a failed
/// canonicalization (e.g. a dangling symlink) falls back to the path as
/// written rather than failing the whole parse.
fn canonicalize_or_warn(path: &Path) -> Option<PathBuf> {
    use anyhow::Context as _;
    match std::fs::canonicalize(path).context("canonicalizing include path") {
        Ok(canonical) => Some(canonical),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "falling back to non-canonical path for include dedup");
            None
        }
    }
}

fn substitute_env_vars(path: &str, origin: &Origin) -> Result<String, Error> {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' || path[i + 1..].chars().next() != Some('{') {
            out.push(c);
            continue;
        }
        let rest = &path[i + 2..];
        let Some(end) = rest.find('}') else {
            out.push(c);
            continue;
        };
        let name = &rest[..end];
        let value = std::env::var(name).map_err(|_| Error::InvalidConfig {
            message: format!("environment variable '{name}' is not set"),
            origin: origin.clone(),
        })?;
        out.push_str(&value);
        for _ in 0..end + 2 {
            chars.next();
        }
    }
    Ok(out)
}

impl<'a> Cursor<'a> {
    /// These helpers bypass the one-token lookahead buffer and talk to the
    /// lexer directly. They are only safe to call when `peeked` is known to
    /// be empty — true right after consuming the `include`/`include_relative`
    /// keyword, which is the only place they're used.
    fn lexer_current_line(&self) -> usize {
        debug_assert!(self.peeked.is_none());
        self.lexer.current_line()
    }

    fn lexer_peek_char(&mut self) -> Option<char> {
        debug_assert!(self.peeked.is_none());
        self.lexer.peek_significant_char()
    }

    fn lexer_bump_char(&mut self) {
        debug_assert!(self.peeked.is_none());
        let _ = self.lexer.next_token();
    }

    fn lexer_scan_tag(&mut self) -> Result<(String, usize), Error> {
        let (tok, line) = self.bump()?;
        let name = match tok {
            Token::Ident(word) => word,
            other => {
                return Err(Error::Parse {
                    message: format!("expected an annotation name, found {other}"),
                    origin: Origin::new(self.file.clone(), line),
                })
            }
        };
        self.expect(&Token::RBracket)?;
        Ok((name, line))
    }

    fn lexer_scan_path(&mut self) -> Result<(String, usize), Error> {
        debug_assert!(self.peeked.is_none());
        self.lexer
            .scan_path()
            .map_err(|(message, line)| Error::Parse {
                message,
                origin: Origin::new(self.file.clone(), line),
            })
    }
}


