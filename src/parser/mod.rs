pub(crate) mod ast;
pub(crate) mod char_reader;
pub(crate) mod lexer;
pub(crate) mod parser;
pub(crate) mod put_back_n;

use crate::parser::ast::*;
use crate::parser::parser::Parser;

/// Reads every clause term of `src`.
pub(crate) fn read_terms(src: &str, op_dir: &OpDir) -> Result<Vec<Term>, ParserError> {
    let mut parser = Parser::new(src.chars());
    let mut terms = vec![];

    while let Some(term) = parser.read_term(op_dir)? {
        terms.push(term);
    }

    Ok(terms)
}

/// Reads a single term, such as a query, from `src`. A missing
/// final end token is supplied.
pub(crate) fn read_single_term(src: &str, op_dir: &OpDir) -> Result<Option<Term>, ParserError> {
    let trimmed = src.trim_end();

    let src = if trimmed.ends_with('.') && !trimmed.ends_with("..") {
        format!("{}\n", trimmed)
    } else {
        format!("{} .\n", trimmed)
    };

    Parser::new(src.chars()).read_term(op_dir)
}
