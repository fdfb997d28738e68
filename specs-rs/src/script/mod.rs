//! The specs language.
//!
//! A program goes through three stages:
//!
//! - [`token`]: program text is split into words and each word classified
//!   (ranges, literals, placements, keywords, labels);
//! - [`item`]: tokens are compiled into a flat item list with resolved jump
//!   targets, expressions parsed once by [`expr`];
//! - [`interp`]: the items run once per input cycle, with [`builtins`]
//!   supplying the ALU functions.
//!
//! # Quick start
//!
//! ```rust
//! use std::io::Cursor;
//! use specs::output::Outputs;
//! use specs::script::{compile_program, Interpreter};
//! use specs::stream::Streams;
//!
//! let program = compile_program("w2 1 w1 nw").unwrap();
//! let input = Streams::primary(Box::new(Cursor::new(b"hello world\n".to_vec())));
//! let outputs = Outputs::new(Box::new(std::io::stdout()), Box::new(std::io::stderr()));
//! // prints "world hello"
//! Interpreter::new(program, input, outputs).run().unwrap();
//! ```

pub mod builtins;
pub mod expr;
pub mod interp;
pub mod item;
pub mod token;
pub mod value;

pub use expr::EvalContext;
pub use interp::Interpreter;
pub use item::Program;
pub use value::Value;

use crate::error::SpecsError;

/// Split, tokenize and compile program text.
pub fn compile_program(src: &str) -> Result<Program, SpecsError> {
    compile_words(token::split_program(src)?)
}

/// Compile program arguments as the command line passes them.
pub fn compile_args(args: &[String]) -> Result<Program, SpecsError> {
    compile_words(token::words_from_args(args)?)
}

fn compile_words(words: Vec<token::Word>) -> Result<Program, SpecsError> {
    item::compile(token::tokenize(words)?)
}
