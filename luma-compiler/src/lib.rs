#![forbid(unsafe_code)]

//! `luma-compiler` — tokenizer, parser, and code generator for the Luma
//! source language, lowering directly to an `lumavm::Container`.

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod token;

pub use codegen::{Codegen, CodegenError};
pub use lexer::{LexError, Lexer};
pub use parser::{parse, ParseError, Parser};
pub use registry::Registry;

use lumavm::container::Container;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Compiles Luma source text straight into an in-memory `Container`,
/// resolving namespaced calls and `require` names through `registry`.
pub fn compile(src: &str, registry: &Registry) -> Result<Container, CompileError> {
    let tokens = Lexer::new(src).tokenize_all()?;
    let program = parse(tokens)?;
    let container = Codegen::compile(&program, registry)?;
    Ok(container)
}
