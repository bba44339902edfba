//! Lexer implementation using logos

mod token;

pub use token::Token;

use crate::ast::{FileId, Span};
use crate::error::{CompileError, Result};
use logos::Logos;

/// Tokenize source code
pub fn tokenize(source: &str, file: FileId) -> Result<Vec<(Token, Span)>> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let span = Span::new(file, lexer.span().start, lexer.span().end);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(_) => {
                let slice = lexer.slice();
                let message = if slice.starts_with('"') {
                    "unterminated string literal".to_string()
                } else if slice.starts_with("/*") {
                    "unterminated block comment".to_string()
                } else {
                    format!("unexpected character: {slice:?}")
                };
                return Err(CompileError::scan(message, span));
            }
        }
    }

    Ok(tokens)
}
