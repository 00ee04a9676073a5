use crate::token::{Span, Token, TokenKind};

/// The lexer/tokenizer for script source files and command-line snippets.
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current_pos: usize,
    current_char: Option<char>,
    /// Kind of the last token produced, used to tell transposes from strings.
    previous: Option<TokenKind>,
    /// Whether whitespace separated the last token from the current position.
    spaced: bool,
    /// Whether the cursor sits at the start of a line (ignoring indentation).
    line_start: bool,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer from source code.
    pub fn new(source: &'a str) -> Self {
        let mut chars = source.char_indices();
        let current_char = chars.next().map(|(_, c)| c);
        Self {
            source,
            chars,
            current_pos: 0,
            current_char,
            previous: None,
            spaced: false,
            line_start: true,
        }
    }

    /// Tokenizes the entire source code and returns all tokens.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }

    /// Gets the next token from the source.
    pub fn next_token(&mut self) -> Token {
        self.spaced = false;
        if let Some(error_token) = self.skip_whitespace_and_comments() {
            return self.emit(error_token);
        }

        let start = self.current_pos;

        let token = match self.current_char {
            None => Token::new(TokenKind::Eof, Span::new(start, start), String::new()),
            Some(ch) => match ch {
                '\n' => {
                    self.advance();
                    self.line_start = true;
                    self.single(TokenKind::Newline, start, "\n")
                }
                '\'' => {
                    let transpose = !self.spaced
                        && self.previous.map_or(false, TokenKind::allows_transpose);
                    if transpose {
                        self.advance();
                        self.single(TokenKind::Transpose, start, "'")
                    } else {
                        self.read_string_literal('\'')
                    }
                }
                '"' => self.read_string_literal('"'),
                '0'..='9' => self.read_number(),
                'a'..='z' | 'A'..='Z' => self.read_identifier_or_keyword(),
                '.' => self.read_dot(),
                '+' => self.one(TokenKind::Plus, start, "+"),
                '-' => self.one(TokenKind::Minus, start, "-"),
                '*' => self.one(TokenKind::Star, start, "*"),
                '/' => self.one(TokenKind::Slash, start, "/"),
                '\\' => self.one(TokenKind::Backslash, start, "\\"),
                '^' => self.one(TokenKind::Caret, start, "^"),
                ':' => self.one(TokenKind::Colon, start, ":"),
                '(' => self.one(TokenKind::LParen, start, "("),
                ')' => self.one(TokenKind::RParen, start, ")"),
                '{' => self.one(TokenKind::LBrace, start, "{"),
                '}' => self.one(TokenKind::RBrace, start, "}"),
                '[' => self.one(TokenKind::LBracket, start, "["),
                ']' => self.one(TokenKind::RBracket, start, "]"),
                ';' => self.one(TokenKind::Semicolon, start, ";"),
                ',' => self.one(TokenKind::Comma, start, ","),
                '@' => self.one(TokenKind::At, start, "@"),
                '=' => self.one_or_two(start, '=', TokenKind::Eq, "=", TokenKind::EqEq, "=="),
                '<' => self.one_or_two(start, '=', TokenKind::Lt, "<", TokenKind::LtEq, "<="),
                '>' => self.one_or_two(start, '=', TokenKind::Gt, ">", TokenKind::GtEq, ">="),
                '~' | '!' => {
                    self.one_or_two(start, '=', TokenKind::Tilde, "~", TokenKind::TildeEq, "~=")
                }
                '&' => self.one_or_two(start, '&', TokenKind::Amp, "&", TokenKind::AmpAmp, "&&"),
                '|' => {
                    self.one_or_two(start, '|', TokenKind::Pipe, "|", TokenKind::PipePipe, "||")
                }
                _ if ch.is_alphabetic() => self.read_identifier_or_keyword(),
                _ => {
                    self.advance();
                    Token::new(
                        TokenKind::Error,
                        Span::new(start, self.current_pos),
                        format!("Unexpected character: {}", ch),
                    )
                }
            },
        };

        self.emit(token)
    }

    // Helper methods

    fn emit(&mut self, token: Token) -> Token {
        if token.kind != TokenKind::Newline {
            self.line_start = false;
        }
        self.previous = Some(token.kind);
        token
    }

    fn single(&self, kind: TokenKind, start: usize, text: &str) -> Token {
        Token::new(kind, Span::new(start, self.current_pos), text.to_string())
    }

    fn one(&mut self, kind: TokenKind, start: usize, text: &str) -> Token {
        self.advance();
        self.single(kind, start, text)
    }

    fn one_or_two(
        &mut self,
        start: usize,
        second: char,
        short: TokenKind,
        short_text: &str,
        long: TokenKind,
        long_text: &str,
    ) -> Token {
        self.advance();
        if self.current_char == Some(second) {
            self.advance();
            self.single(long, start, long_text)
        } else {
            self.single(short, start, short_text)
        }
    }

    fn advance(&mut self) {
        if let Some((pos, ch)) = self.chars.next() {
            self.current_pos = pos;
            self.current_char = Some(ch);
        } else {
            self.current_pos = self.source.len();
            self.current_char = None;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next().map(|(_, c)| c)
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.chars.clone().nth(n).map(|(_, c)| c)
    }

    fn rest_of_line(&self) -> &'a str {
        let rest = &self.source[self.current_pos..];
        rest.split('\n').next().unwrap_or("")
    }

    fn skip_whitespace_and_comments(&mut self) -> Option<Token> {
        loop {
            match self.current_char {
                Some(ch) if ch != '\n' && ch.is_whitespace() => {
                    self.spaced = true;
                    self.advance();
                }
                Some('%') => {
                    if self.line_start && self.rest_of_line().trim_end() == "%{" {
                        let start = self.current_pos;
                        if !self.skip_block_comment() {
                            return Some(Token::new(
                                TokenKind::Error,
                                Span::new(start, self.current_pos),
                                "Unterminated block comment".to_string(),
                            ));
                        }
                    } else {
                        self.skip_to_line_end();
                    }
                }
                Some('.') if self.peek() == Some('.') && self.peek_nth(1) == Some('.') => {
                    // Continuation: the rest of the line and its newline are ignored.
                    self.skip_to_line_end();
                    if self.current_char == Some('\n') {
                        self.advance();
                    }
                    self.spaced = true;
                }
                _ => break,
            }
        }
        None
    }

    /// Skips up to (not including) the next newline.
    fn skip_to_line_end(&mut self) {
        while let Some(ch) = self.current_char {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> bool {
        // The opening `%{` line
        self.skip_to_line_end();

        while self.current_char.is_some() {
            // Positioned on a newline
            self.advance();
            if self.rest_of_line().trim() == "%}" {
                self.skip_to_line_end();
                return true;
            }
            self.skip_to_line_end();
        }
        false
    }

    fn read_string_literal(&mut self, quote: char) -> Token {
        let start = self.current_pos;
        self.advance(); // Skip opening quote

        let mut value = String::new();

        while let Some(ch) = self.current_char {
            if ch == quote {
                if self.peek() == Some(quote) {
                    // Doubled quote is an escaped quote
                    value.push(quote);
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance(); // Skip closing quote
                return Token::new(
                    TokenKind::StringLiteral,
                    Span::new(start, self.current_pos),
                    value,
                );
            } else if ch == '\n' {
                break;
            }
            value.push(ch);
            self.advance();
        }

        Token::new(
            TokenKind::Error,
            Span::new(start, self.current_pos),
            "Unterminated string literal".to_string(),
        )
    }

    fn read_digits(&mut self, value: &mut String) {
        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Token {
        let start = self.current_pos;
        let mut value = String::new();

        self.read_digits(&mut value);

        // Fractional part, but not an element-wise operator such as `1.*x`
        if self.current_char == Some('.')
            && !matches!(self.peek(), Some('*') | Some('/') | Some('\\') | Some('^') | Some('\''))
            && !(self.peek() == Some('.') && self.peek_nth(1) == Some('.'))
        {
            value.push('.');
            self.advance();
            self.read_digits(&mut value);
        }

        self.read_exponent(&mut value);

        // Imaginary suffix
        if matches!(self.current_char, Some('i') | Some('j')) {
            value.push('i');
            self.advance();
        }

        Token::new(TokenKind::NumberLiteral, Span::new(start, self.current_pos), value)
    }

    fn read_exponent(&mut self, value: &mut String) {
        if !matches!(self.current_char, Some('e') | Some('E')) {
            return;
        }
        let signed = matches!(self.peek(), Some('+') | Some('-'));
        let digit_at = if signed { self.peek_nth(1) } else { self.peek() };
        if !digit_at.map_or(false, |c| c.is_ascii_digit()) {
            return;
        }

        value.push('e');
        self.advance();
        if signed {
            if let Some(sign) = self.current_char {
                value.push(sign);
            }
            self.advance();
        }
        self.read_digits(value);
    }

    fn read_identifier_or_keyword(&mut self) -> Token {
        let start = self.current_pos;
        let mut value = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let kind = match value.as_str() {
            "function" => TokenKind::Function,
            "end" => TokenKind::End,
            "if" => TokenKind::If,
            "elseif" => TokenKind::Elseif,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "parfor" => TokenKind::Parfor,
            "while" => TokenKind::While,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "otherwise" => TokenKind::Otherwise,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "global" => TokenKind::Global,
            "persistent" => TokenKind::Persistent,
            "classdef" => TokenKind::Classdef,
            "spmd" => TokenKind::Spmd,
            _ => TokenKind::Identifier,
        };

        Token::new(kind, Span::new(start, self.current_pos), value)
    }

    fn read_dot(&mut self) -> Token {
        let start = self.current_pos;

        if self.peek().map_or(false, |c| c.is_ascii_digit()) {
            let mut value = String::from("0.");
            self.advance();
            self.read_digits(&mut value);
            self.read_exponent(&mut value);
            return Token::new(TokenKind::NumberLiteral, Span::new(start, self.current_pos), value);
        }

        let compound = match self.peek() {
            Some('*') => Some((TokenKind::DotStar, ".*")),
            Some('/') => Some((TokenKind::DotSlash, "./")),
            Some('\\') => Some((TokenKind::DotBackslash, ".\\")),
            Some('^') => Some((TokenKind::DotCaret, ".^")),
            Some('\'') => Some((TokenKind::DotTranspose, ".'")),
            _ => None,
        };

        self.advance();
        match compound {
            Some((kind, text)) => {
                self.advance();
                self.single(kind, start, text)
            }
            None => self.single(TokenKind::Dot, start, "."),
        }
    }
}
