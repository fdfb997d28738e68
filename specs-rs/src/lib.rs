//! specs: a column-oriented, record-at-a-time text processing language.
//!
//! A specs program is a list of items.  For every input record the items
//! extract ranges, words or fields, optionally convert them, and place them
//! at output columns; expressions evaluated by the ALU add arithmetic,
//! string functions, conditionals and loops.
//!
//! ```text
//! $ printf 'alpha beta\n' | specs w2 1 w1 nw
//! beta alpha
//! ```

pub mod cli;
pub mod config;
pub mod conversion;
pub mod error;
pub mod external;
pub mod lua;
pub mod output;
pub mod pattern;
pub mod python;
pub mod record;
pub mod script;
pub mod stream;
pub mod timefmt;

pub use error::{RtResult, RuntimeError, SpecsError};

/// Crate version, exposed as the `version` configuration literal.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
