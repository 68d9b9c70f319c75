//! DSL front-end: indentation-sensitive tokenizer, AST, and parser.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{AssignTarget, BinOp, Expr, ExprKind, Program, Stmt, StmtKind};
pub use lexer::tokenize;
pub use parser::parse;

use ps_core::PsResult;

/// Tokenize and parse a script in one shot.
pub fn parse_source(source: &str) -> PsResult<Program> {
    parse(tokenize(source)?)
}
