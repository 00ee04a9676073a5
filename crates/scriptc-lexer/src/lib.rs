//! Tokenizer for the scriptc source language.
//!
//! Produces a flat token stream (keywords, identifiers, literals, operators
//! and statement-separating newlines) consumed by the resolver's source walker.

pub mod token;
pub mod lexer;

pub use token::{Span, Token, TokenKind};
pub use lexer::Lexer;
