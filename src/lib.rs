//! `flexi-cfg`: a text-based hierarchical configuration language, its
//! parser, and its semantic resolver.
//!
//! A configuration file defines nested, strongly-shaped records
//! (`struct`), reusable record templates (`proto`), instantiations of those
//! templates (`reference`), arithmetic expressions over config values
//! (`{{ ... }}`), and cross-key lookups (`$(a.b.c)`). [`Parser::parse`]
//! compiles a set of source files (following `include`/`include_relative`
//! directives) into a single immutable key/value tree, exposed read-only
//! through [`Reader`].
//!
//! ```no_run
//! use flexi_cfg::Parser;
//!
//! let reader = Parser::parse("robot.cfg")?;
//! let gain: f64 = reader.get("legs.fl.gain");
//! # Ok::<(), flexi_cfg::Error>(())
//! ```

mod error;
mod expr;
mod helpers;
mod lexer;
mod node;
mod parser;
mod reader;
mod resolver;

pub use self::{
    error::{Error, Result},
    node::Kind,
    parser::{Parser, SourceTag},
    reader::{FromConfig, Reader},
};
