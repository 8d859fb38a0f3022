//! The error taxonomy (spec. §7).
//!
//! The original implementation models each category as its own exception
//! subclass (`flexi_cfg::config::{InvalidKeyException, DuplicateKeyException, ...}`).
//! Rust idiom favors one flat enum over a class hierarchy meant only for
//! `catch`-by-type, so all ten categories live on [`Error`] and callers match
//! on the variant when they need to distinguish them.

use std::{fmt, io};

use crate::node::Origin;

/// Errors produced anywhere in the parser or resolver.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A grammar violation at a token position.
    Parse { message: String, origin: Origin },
    /// A dotted path refers to a non-existent key.
    InvalidKey { path: String, origin: Origin },
    /// A path segment expected to be struct-like was a scalar, or an
    /// accessor's requested type doesn't match the stored kind.
    InvalidType {
        path: String,
        expected: String,
        found: String,
        origin: Origin,
    },
    /// The same key was defined twice in one scope without `[override]`.
    DuplicateKey {
        key: String,
        first: Origin,
        second: Origin,
    },
    /// The same flat key was overridden twice.
    DuplicateOverride {
        key: String,
        first: Origin,
        second: Origin,
    },
    /// Merging two maps where one side has a struct-like value and the other
    /// a scalar at the same key.
    MismatchKey {
        key: String,
        first: Origin,
        second: Origin,
    },
    /// Merging or overlaying where both sides are non-struct but of
    /// different kinds.
    MismatchType {
        key: String,
        first_kind: String,
        second_kind: String,
        first: Origin,
        second: Origin,
    },
    /// A `reference` names a proto that was never defined.
    UndefinedProto { path: String, origin: Origin },
    /// A proto contains a `Var` whose name was not bound in the reference.
    UndefinedReferenceVar { var: String, origin: Origin },
    /// A value-lookup chain returns to a previously visited key, or a
    /// reference chain re-enters a proto already on the stack.
    CyclicReference { chain: Vec<String>, origin: Origin },
    /// An internal invariant was violated (e.g. an empty key stack at a rule
    /// that requires one).
    InvalidState { message: String },
    /// The configuration is structurally invalid in a way not covered by a
    /// more specific category (e.g. an unresolved `$` surviving proto
    /// variable substitution).
    InvalidConfig { message: String, origin: Origin },
    /// An included file could not be read.
    Io {
        path: String,
        origin: Origin,
        source: io::Error,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { message, origin } => {
                write!(formatter, "parse error at {origin}: {message}")
            }
            Self::InvalidKey { path, origin } => {
                write!(formatter, "invalid key '{path}' at {origin}")
            }
            Self::InvalidType {
                path,
                expected,
                found,
                origin,
            } => write!(
                formatter,
                "invalid type for '{path}' at {origin}: expected {expected}, found {found}"
            ),
            Self::DuplicateKey { key, first, second } => write!(
                formatter,
                "duplicate key '{key}' found at {first} and {second}"
            ),
            Self::DuplicateOverride { key, first, second } => write!(
                formatter,
                "key '{key}' overridden twice, at {first} and {second}"
            ),
            Self::MismatchKey { key, first, second } => write!(
                formatter,
                "mismatched types for key '{key}' found at {first} and {second}: both keys must point to structs to be merged"
            ),
            Self::MismatchType {
                key,
                first_kind,
                second_kind,
                first,
                second,
            } => write!(
                formatter,
                "types at key '{key}' must match: {first_kind} at {first}, {second_kind} at {second}"
            ),
            Self::UndefinedProto { path, origin } => {
                write!(formatter, "reference at {origin} names undefined proto '{path}'")
            }
            Self::UndefinedReferenceVar { var, origin } => write!(
                formatter,
                "proto variable '{var}' at {origin} is not bound by its reference"
            ),
            Self::CyclicReference { chain, origin } => {
                write!(formatter, "cyclic reference at {origin}: ")?;
                for (i, link) in chain.iter().enumerate() {
                    if i > 0 {
                        write!(formatter, " -> ")?;
                    }
                    write!(formatter, "{link}")?;
                }
                Ok(())
            }
            Self::InvalidState { message } => write!(formatter, "invalid parser state: {message}"),
            Self::InvalidConfig { message, origin } => {
                write!(formatter, "invalid config at {origin}: {message}")
            }
            Self::Io {
                path,
                origin,
                source,
            } => write!(
                formatter,
                "failed to read included file '{path}' (included at {origin}): {source}"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Error {
    pub(crate) fn duplicate_key(key: impl Into<String>, first: Origin, second: Origin) -> Self {
        Self::DuplicateKey {
            key: key.into(),
            first,
            second,
        }
    }

    pub(crate) fn mismatch_key(key: impl Into<String>, first: Origin, second: Origin) -> Self {
        Self::MismatchKey {
            key: key.into(),
            first,
            second,
        }
    }

    pub(crate) fn mismatch_type(
        key: impl Into<String>,
        first_kind: impl Into<String>,
        second_kind: impl Into<String>,
        first: Origin,
        second: Origin,
    ) -> Self {
        Self::MismatchType {
            key: key.into(),
            first_kind: first_kind.into(),
            second_kind: second_kind.into(),
            first,
            second,
        }
    }

    pub(crate) fn invalid_key(path: impl Into<String>, origin: Origin) -> Self {
        Self::InvalidKey {
            path: path.into(),
            origin,
        }
    }

    pub(crate) fn invalid_type(
        path: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
        origin: Origin,
    ) -> Self {
        Self::InvalidType {
            path: path.into(),
            expected: expected.into(),
            found: found.into(),
            origin,
        }
    }
}

/// A `Result` alias used throughout the crate's public API.
pub type Result<T, E = Error> = std::result::Result<T, E>;


