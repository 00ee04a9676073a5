//! Token-level walker for script files and command-line snippets.
//!
//! The walker does not build a syntax tree. It splits the token stream into
//! statements at bracket depth zero and recognises just enough structure to
//! report declarations, references and scope boundaries in source order:
//! function headers, assignment targets, loop variables, `global` and
//! `persistent` lists, `catch` identifiers and anonymous functions.

use std::fs;

use scriptc_lexer::{Lexer, Token, TokenKind};

use crate::error::{ResolveError, Result};
use crate::scope::ScopeKind;
use crate::unit::DefinitionHandle;
use crate::walker::{AstWalker, Declaration, Visitor};

/// Class-body sections whose contents are not code
const DATA_SECTIONS: &[&str] = &["properties", "events", "enumeration"];

#[derive(Debug, Default, Clone, Copy)]
pub struct SourceWalker;

impl SourceWalker {
    pub fn new() -> Self {
        Self
    }
}

impl AstWalker for SourceWalker {
    fn walk(&self, handle: &DefinitionHandle, visitor: &mut dyn Visitor) -> Result<()> {
        let (origin, source) = match handle {
            DefinitionHandle::File(path) => {
                let source = fs::read_to_string(path).map_err(|e| ResolveError::io(path, e))?;
                (path.display().to_string(), source)
            }
            DefinitionHandle::Inline { text } => ("<snippet>".to_string(), text.clone()),
            DefinitionHandle::Table => return Ok(()),
        };

        let tokens = Lexer::new(&source).tokenize();
        if let Some(bad) = tokens.iter().find(|t| t.kind == TokenKind::Error) {
            return Err(ResolveError::Syntax {
                origin,
                span: bad.span,
                message: bad.value.clone(),
            });
        }

        let ended = functions_are_terminated(&tokens);
        let mut walk = Walk {
            visitor,
            ended,
            blocks: Vec::new(),
        };
        walk.run(&tokens);
        Ok(())
    }
}

/// Whether the functions of a file are closed by their own `end`.
///
/// Counts block openers against `end`s at bracket depth zero: with terminated
/// functions the two balance, otherwise there is one opener too many per
/// function. Class files always terminate their functions.
fn functions_are_terminated(tokens: &[Token]) -> bool {
    let mut depth = 0usize;
    let mut openers = 0usize;
    let mut ends = 0usize;

    for token in tokens {
        match token.kind {
            TokenKind::Classdef => return true,
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::End if depth == 0 => ends += 1,
            kind if depth == 0 && kind.opens_block() => openers += 1,
            _ => {}
        }
    }

    openers == ends
}

fn is_opener(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace
    )
}

fn is_closer(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace
    )
}

/// Index of the first `=` at bracket depth zero
fn assignment_position(stmt: &[Token]) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in stmt.iter().enumerate() {
        match token.kind {
            kind if is_opener(kind) => depth += 1,
            kind if is_closer(kind) => depth = depth.saturating_sub(1),
            TokenKind::Eq if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// `name arg arg` with only words after the name, e.g. `hold on`
fn is_command_syntax(stmt: &[Token]) -> bool {
    stmt.len() >= 2
        && stmt[0].kind == TokenKind::Identifier
        && stmt[1].span.start > stmt[0].span.end
        && stmt[1..].iter().all(|t| {
            matches!(t.kind, TokenKind::Identifier | TokenKind::NumberLiteral)
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Function,
    Control,
    Class,
    /// `properties`, `events` or `enumeration` section of a class
    Data,
}

struct Walk<'v> {
    visitor: &'v mut dyn Visitor,
    ended: bool,
    blocks: Vec<Block>,
}

impl<'v> Walk<'v> {
    fn run(&mut self, tokens: &[Token]) {
        let mut start = 0;
        let mut depth = 0usize;

        for (i, token) in tokens.iter().enumerate() {
            if is_opener(token.kind) {
                depth += 1;
            } else if is_closer(token.kind) {
                depth = depth.saturating_sub(1);
            }

            if depth == 0 && token.is_separator() {
                if i > start {
                    self.statement(&tokens[start..i]);
                }
                start = i + 1;
            }
        }
        if start < tokens.len() {
            self.statement(&tokens[start..]);
        }

        self.close_all();
    }

    fn statement(&mut self, stmt: &[Token]) {
        let Some(first) = stmt.first() else {
            return;
        };

        if self.blocks.last() == Some(&Block::Data) {
            if first.kind == TokenKind::End {
                self.blocks.pop();
            }
            return;
        }

        let rest = &stmt[1..];
        match first.kind {
            TokenKind::Function => self.function_header(rest),
            TokenKind::End => self.close_block(),
            TokenKind::For | TokenKind::Parfor => {
                self.blocks.push(Block::Control);
                self.for_header(rest);
            }
            TokenKind::If | TokenKind::While | TokenKind::Switch | TokenKind::Spmd => {
                self.blocks.push(Block::Control);
                self.expression(rest);
            }
            TokenKind::Try => {
                self.blocks.push(Block::Control);
                self.statement(rest);
            }
            TokenKind::Elseif | TokenKind::Case => self.expression(rest),
            TokenKind::Else | TokenKind::Otherwise => self.statement(rest),
            TokenKind::Catch => match rest {
                [id] if id.kind == TokenKind::Identifier => {
                    self.visitor.declare(&id.value, Declaration::Local, id.span);
                }
                _ => self.statement(rest),
            },
            TokenKind::Global | TokenKind::Persistent => {
                let declaration = if first.kind == TokenKind::Global {
                    Declaration::Global
                } else {
                    Declaration::Persistent
                };
                for id in rest.iter().filter(|t| t.kind == TokenKind::Identifier) {
                    self.visitor.declare(&id.value, declaration, id.span);
                }
            }
            TokenKind::Classdef => {
                self.blocks.push(Block::Class);
                // Superclasses follow `<`
                if let Some(lt) = rest.iter().position(|t| t.kind == TokenKind::Lt) {
                    self.expression(&rest[lt + 1..]);
                }
            }
            TokenKind::Return | TokenKind::Break | TokenKind::Continue => {}
            TokenKind::Identifier if self.blocks.last() == Some(&Block::Class) => {
                if DATA_SECTIONS.contains(&first.value.as_str()) {
                    self.blocks.push(Block::Data);
                } else if first.value == "methods" {
                    self.blocks.push(Block::Control);
                }
            }
            _ => self.simple_statement(stmt),
        }
    }

    /// `function name(params)`, `function out = name(params)` or
    /// `function [a, b] = name(params)`
    fn function_header(&mut self, header: &[Token]) {
        if !self.ended {
            self.close_all();
        }

        let (outputs, signature) = match assignment_position(header) {
            Some(eq) => (&header[..eq], &header[eq + 1..]),
            None => (&header[..0], header),
        };

        let Some(name_token) = signature.first().filter(|t| t.kind == TokenKind::Identifier)
        else {
            return;
        };

        // Property accessors such as `get.Value`
        let mut name = name_token.value.clone();
        let mut next = 1;
        while let [dot, part, ..] = &signature[next..] {
            if dot.kind != TokenKind::Dot || part.kind != TokenKind::Identifier {
                break;
            }
            name.push('.');
            name.push_str(&part.value);
            next += 2;
        }

        self.visitor
            .declare(&name, Declaration::Function, name_token.span);
        self.visitor
            .enter_scope(ScopeKind::Function, Some(&name), name_token.span);
        self.blocks.push(Block::Function);

        let params = signature[next..]
            .iter()
            .filter(|t| t.kind == TokenKind::Identifier);
        for id in params.chain(outputs.iter().filter(|t| t.kind == TokenKind::Identifier)) {
            self.visitor.declare(&id.value, Declaration::Local, id.span);
        }
    }

    /// `for k = range` with optional parentheses
    fn for_header(&mut self, header: &[Token]) {
        let inner = match header {
            [open, inner @ .., close]
                if open.kind == TokenKind::LParen && close.kind == TokenKind::RParen =>
            {
                inner
            }
            _ => header,
        };

        match inner {
            [var, eq, range @ ..]
                if var.kind == TokenKind::Identifier && eq.kind == TokenKind::Eq =>
            {
                self.expression(range);
                self.visitor.declare(&var.value, Declaration::Local, var.span);
            }
            _ => self.expression(inner),
        }
    }

    fn simple_statement(&mut self, stmt: &[Token]) {
        if is_command_syntax(stmt) {
            self.visitor.reference(&stmt[0].value, stmt[0].span);
            return;
        }

        let Some(eq) = assignment_position(stmt) else {
            self.expression(stmt);
            return;
        };

        let (lhs, rhs) = (&stmt[..eq], &stmt[eq + 1..]);
        self.expression(rhs);

        let mut targets = Vec::new();
        match lhs.first().map(|t| t.kind) {
            Some(TokenKind::LBracket) => {
                let inner = match lhs.last() {
                    Some(last) if lhs.len() >= 2 && last.kind == TokenKind::RBracket => {
                        &lhs[1..lhs.len() - 1]
                    }
                    _ => &lhs[1..],
                };
                for element in split_elements(inner) {
                    match element.split_first() {
                        Some((id, indices)) if id.kind == TokenKind::Identifier => {
                            self.expression(indices);
                            targets.push(id);
                        }
                        _ => self.expression(element),
                    }
                }
            }
            Some(TokenKind::Identifier) => {
                self.expression(&lhs[1..]);
                targets.push(&lhs[0]);
            }
            _ => self.expression(lhs),
        }

        for id in targets {
            self.visitor.declare(&id.value, Declaration::Local, id.span);
        }
    }

    /// Report references in an expression, opening a closure scope for every
    /// `@(params) body`. A closure body ends at a `,` on its own bracket level,
    /// at a bracket that closes around it, or at the end of the expression.
    fn expression(&mut self, tokens: &[Token]) {
        let mut depth = 0usize;
        let mut closures: Vec<usize> = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            match token.kind {
                kind if is_opener(kind) => depth += 1,
                kind if is_closer(kind) => {
                    depth = depth.saturating_sub(1);
                    while closures.last().map_or(false, |&d| d > depth) {
                        closures.pop();
                        self.visitor.exit_scope();
                    }
                }
                TokenKind::Comma | TokenKind::Semicolon | TokenKind::Newline => {
                    while closures.last() == Some(&depth) {
                        closures.pop();
                        self.visitor.exit_scope();
                    }
                }
                TokenKind::At => match tokens.get(i + 1).map(|t| t.kind) {
                    Some(TokenKind::LParen) => {
                        self.visitor
                            .enter_scope(ScopeKind::Closure, None, token.span);
                        let mut j = i + 2;
                        while j < tokens.len() && tokens[j].kind != TokenKind::RParen {
                            if tokens[j].kind == TokenKind::Identifier {
                                self.visitor.declare(
                                    &tokens[j].value,
                                    Declaration::Local,
                                    tokens[j].span,
                                );
                            }
                            j += 1;
                        }
                        closures.push(depth);
                        i = j + 1;
                        continue;
                    }
                    Some(TokenKind::Identifier) => {
                        let target = &tokens[i + 1];
                        self.visitor.reference(&target.value, target.span);
                        i += 2;
                        continue;
                    }
                    _ => {}
                },
                TokenKind::Identifier => {
                    let is_field = i > 0 && tokens[i - 1].kind == TokenKind::Dot;
                    if !is_field {
                        self.visitor.reference(&token.value, token.span);
                    }
                }
                _ => {}
            }
            i += 1;
        }

        for _ in closures {
            self.visitor.exit_scope();
        }
    }

    fn close_block(&mut self) {
        if self.blocks.pop() == Some(Block::Function) {
            self.visitor.exit_scope();
        }
    }

    fn close_all(&mut self) {
        while let Some(block) = self.blocks.pop() {
            if block == Block::Function {
                self.visitor.exit_scope();
            }
        }
    }
}

/// Split the inside of `[a, b(i), ~]` into its elements.
///
/// Elements are separated by commas or, as in `[a b]`, by whitespace between
/// two operands.
fn split_elements(tokens: &[Token]) -> Vec<&[Token]> {
    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, token) in tokens.iter().enumerate() {
        if is_opener(token.kind) {
            depth += 1;
            continue;
        }
        if is_closer(token.kind) {
            depth = depth.saturating_sub(1);
            continue;
        }
        if depth > 0 {
            continue;
        }

        if token.kind == TokenKind::Comma {
            if i > start {
                elements.push(&tokens[start..i]);
            }
            start = i + 1;
        } else if i > start
            && token.span.start > tokens[i - 1].span.end
            && matches!(token.kind, TokenKind::Identifier | TokenKind::Tilde)
            && matches!(
                tokens[i - 1].kind,
                TokenKind::Identifier | TokenKind::RParen | TokenKind::RBrace | TokenKind::Tilde
            )
        {
            elements.push(&tokens[start..i]);
            start = i;
        }
    }
    if start < tokens.len() {
        elements.push(&tokens[start..]);
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptc_lexer::Span;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl Visitor for Recorder {
        fn enter_scope(&mut self, kind: ScopeKind, name: Option<&str>, _span: Span) {
            self.events
                .push(format!("enter {:?} {}", kind, name.unwrap_or("_")));
        }

        fn exit_scope(&mut self) {
            self.events.push("exit".to_string());
        }

        fn declare(&mut self, name: &str, declaration: Declaration, _span: Span) {
            self.events.push(format!("declare {:?} {}", declaration, name));
        }

        fn reference(&mut self, name: &str, _span: Span) {
            self.events.push(format!("ref {}", name));
        }
    }

    fn walk(source: &str) -> Vec<String> {
        let mut recorder = Recorder::default();
        SourceWalker::new()
            .walk(
                &DefinitionHandle::Inline {
                    text: source.to_string(),
                },
                &mut recorder,
            )
            .unwrap();
        recorder.events
    }

    #[test]
    fn test_unterminated_functions() {
        let events = walk(
            "function y = main(x)\n\
             y = helper(x);\n\
             \n\
             function z = sub(a)\n\
             z = a;\n",
        );
        assert_eq!(
            events,
            vec![
                "declare Function main",
                "enter Function main",
                "declare Local x",
                "declare Local y",
                "ref helper",
                "ref x",
                "declare Local y",
                "exit",
                "declare Function sub",
                "enter Function sub",
                "declare Local a",
                "declare Local z",
                "ref a",
                "declare Local z",
                "exit",
            ]
        );
    }

    #[test]
    fn test_terminated_nested_functions() {
        let events = walk(
            "function outer()\n\
             if true\n\
               inner();\n\
             end\n\
               function inner()\n\
                 disp(1);\n\
               end\n\
             end\n",
        );
        assert_eq!(
            events,
            vec![
                "declare Function outer",
                "enter Function outer",
                "ref true",
                "ref inner",
                "declare Function inner",
                "enter Function inner",
                "ref disp",
                "exit",
                "exit",
            ]
        );
    }

    #[test]
    fn test_multiple_outputs_and_indexing() {
        let events = walk("[rows, cols] = size(m);\n[a b] = deal(1, 2);\nx(k) = 3;\n");
        assert_eq!(
            events,
            vec![
                "ref size",
                "ref m",
                "declare Local rows",
                "declare Local cols",
                "ref deal",
                "declare Local a",
                "declare Local b",
                "ref k",
                "declare Local x",
            ]
        );
    }

    #[test]
    fn test_closure_scope() {
        let events = walk("f = @(v) v + offset;\ng = cellfun(@(c) c * 2, items);\n");
        assert_eq!(
            events,
            vec![
                "enter Closure _",
                "declare Local v",
                "ref v",
                "ref offset",
                "exit",
                "declare Local f",
                "ref cellfun",
                "enter Closure _",
                "declare Local c",
                "ref c",
                "exit",
                "ref items",
                "declare Local g",
            ]
        );
    }

    #[test]
    fn test_function_handle_and_fields() {
        let events = walk("h = @compute;\nv = s.field + s.(key);\n");
        assert_eq!(
            events,
            vec![
                "ref compute",
                "declare Local h",
                "ref s",
                "ref s",
                "ref key",
                "declare Local v",
            ]
        );
    }

    #[test]
    fn test_loops_globals_and_catch() {
        let events = walk(
            "global counter limit\n\
             persistent cache\n\
             for k = 1:limit\n\
               counter = counter + k;\n\
             end\n\
             try\n\
               risky();\n\
             catch err\n\
               report(err);\n\
             end\n",
        );
        assert_eq!(
            events,
            vec![
                "declare Global counter",
                "declare Global limit",
                "declare Persistent cache",
                "ref limit",
                "declare Local k",
                "ref counter",
                "ref k",
                "declare Local counter",
                "ref risky",
                "declare Local err",
                "ref report",
                "ref err",
            ]
        );
    }

    #[test]
    fn test_command_syntax_and_end_index() {
        let events = walk("hold on\nlast = data(end);\n");
        assert_eq!(
            events,
            vec!["ref hold", "ref data", "declare Local last"]
        );
    }

    #[test]
    fn test_classdef_sections() {
        let events = walk(
            "classdef Account < Base\n\
               properties\n\
                 Balance = 0\n\
               end\n\
               methods\n\
                 function obj = deposit(obj, amount)\n\
                   obj.Balance = obj.Balance + amount;\n\
                 end\n\
               end\n\
             end\n",
        );
        assert_eq!(
            events,
            vec![
                "ref Base",
                "declare Function deposit",
                "enter Function deposit",
                "declare Local obj",
                "declare Local amount",
                "declare Local obj",
                "ref obj",
                "ref amount",
                "declare Local obj",
                "exit",
            ]
        );
    }

    #[test]
    fn test_lexer_error_is_syntax_error() {
        let mut recorder = Recorder::default();
        let result = SourceWalker::new().walk(
            &DefinitionHandle::Inline {
                text: "x = 1 $ 2".to_string(),
            },
            &mut recorder,
        );
        assert!(matches!(result, Err(ResolveError::Syntax { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut recorder = Recorder::default();
        let result = SourceWalker::new().walk(
            &DefinitionHandle::File(PathBuf::from("/nonexistent/scriptc/none.m")),
            &mut recorder,
        );
        assert!(matches!(result, Err(ResolveError::Io { .. })));
    }

    #[test]
    fn test_table_handle_has_no_body() {
        let mut recorder = Recorder::default();
        SourceWalker::new()
            .walk(&DefinitionHandle::Table, &mut recorder)
            .unwrap();
        assert!(recorder.events.is_empty());
    }
}
