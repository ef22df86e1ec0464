// Lua bytecode compiler: lexer -> parser -> single-pass code generator.

pub mod ast;
mod codegen;
mod expr;
mod lexer;
mod parser;
pub mod token;

use std::rc::Rc;

use crate::lua_value::Proto;
use crate::lua_vm::lua_error::short_source;
use crate::lua_vm::{LuaError, LuaResult};

pub use codegen::CodeGen;
pub use lexer::Lexer;
pub use parser::Parser;

/// A positioned front-end error; rendered as
/// `<source>:<line>: <message> near <token>`.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub message: String,
    pub near: String,
    pub line: u32,
}

impl SyntaxError {
    pub fn render(&self, chunk_name: &str) -> String {
        format!(
            "{}:{}: {} near {}",
            short_source(chunk_name),
            self.line,
            self.message,
            self.near
        )
    }
}

pub struct Compiler;

impl Compiler {
    /// Compile a chunk to its main prototype. The chunk name follows the
    /// usual conventions: `@file`, `=display`, or the source text itself.
    pub fn compile(source: &str, chunk_name: &str) -> LuaResult<Rc<Proto>> {
        let tokens = Lexer::new(source)
            .tokenize()
            .map_err(|e| LuaError::msg(e.render(chunk_name)))?;
        let block = Parser::new(tokens)
            .parse_chunk()
            .map_err(|e| LuaError::msg(e.render(chunk_name)))?;
        let proto = CodeGen::compile_chunk(&block, chunk_name)
            .map_err(|e| LuaError::msg(e.render(chunk_name)))?;
        Ok(Rc::new(proto))
    }

    /// True when a parse failure is an incomplete-input error (the REPL
    /// uses this to keep reading lines).
    pub fn is_incomplete(source: &str) -> bool {
        let tokens = match Lexer::new(source).tokenize() {
            Ok(tokens) => tokens,
            Err(e) => return e.near == "<eof>",
        };
        match Parser::new(tokens).parse_chunk() {
            Ok(_) => false,
            Err(e) => e.near == "<eof>",
        }
    }
}
