use std::fmt;

/// Byte range of a token in its source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Represents the different kinds of tokens in the script language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Keywords
    Function,
    End,
    If,
    Elseif,
    Else,
    For,
    Parfor,
    While,
    Switch,
    Case,
    Otherwise,
    Try,
    Catch,
    Return,
    Break,
    Continue,
    Global,
    Persistent,
    Classdef,
    Spmd,

    // Literals
    NumberLiteral,
    StringLiteral,

    // Identifier
    Identifier,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Backslash,    // \
    Caret,        // ^
    DotStar,      // .*
    DotSlash,     // ./
    DotBackslash, // .\
    DotCaret,     // .^
    Transpose,    // '
    DotTranspose, // .'
    Eq,           // =
    EqEq,         // ==
    TildeEq,      // ~=
    Lt,           // <
    Gt,           // >
    LtEq,         // <=
    GtEq,         // >=
    Amp,          // &
    AmpAmp,       // &&
    Pipe,         // |
    PipePipe,     // ||
    Tilde,        // ~ (also !)
    Colon,        // :

    // Delimiters
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Semicolon, // ;
    Comma,     // ,
    Dot,       // .
    At,        // @

    // Special
    Newline,
    Eof,
    Error,
}

impl TokenKind {
    /// Keywords that open a block closed by a statement-level `end`.
    pub fn opens_block(self) -> bool {
        matches!(
            self,
            TokenKind::Function
                | TokenKind::If
                | TokenKind::For
                | TokenKind::Parfor
                | TokenKind::While
                | TokenKind::Switch
                | TokenKind::Try
                | TokenKind::Spmd
                | TokenKind::Classdef
        )
    }

    /// Tokens after which a `'` is a transpose rather than a string quote.
    pub(crate) fn allows_transpose(self) -> bool {
        matches!(
            self,
            TokenKind::Identifier
                | TokenKind::NumberLiteral
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Transpose
                | TokenKind::DotTranspose
                | TokenKind::End
        )
    }
}

/// Represents a token with its kind, span, and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub value: String,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, span: Span, value: String) -> Self {
        Self { kind, span, value }
    }

    /// Whether this token ends a statement at bracket depth zero.
    pub fn is_separator(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Comma | TokenKind::Eof
        )
    }
}
