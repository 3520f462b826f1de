// catlua-parser -- recursive-descent parser for the catlua source language.
//
// One token of lookahead, Pratt expression parsing, and per-statement error
// recovery: a failed statement records its error and the parser skips ahead
// to the next safe keyword, so one bad line does not hide the rest of the
// file from diagnostics.

pub mod ast;

use std::fmt;

use catlua_common::span::Span;
use catlua_common::token::{Token, TokenKind};

use ast::{
    Annotations, AssignOp, AssignStmt, BinOp, BinaryExpr, BreakStmt, Call, CallStmt, CommentStmt,
    DeleteStmt, ElseIf, Event, Expr, ForStmt, FuncDef, IfStmt, IndexRef, InterpStringLit,
    NumberLit, Prefix, Program, PropRef, RepeatStmt, ReturnStmt, Scope, Shard, Stmt, StringLit,
    TableLit, UnOp, UnaryExpr, VarRef,
};

/// A parse error with the line (and byte span) of the offending token.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, token: &Token) -> Self {
        Self {
            message: message.into(),
            line: token.line,
            span: token.span,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}", self.message, self.line)
    }
}

impl std::error::Error for ParseError {}

/// Result of parsing one file.
///
/// `program` is `None` when a top-level construct was malformed (fatal for
/// the file); `errors` holds every recorded error either way, including
/// statement-level ones the parser recovered from.
#[derive(Debug)]
pub struct ParseOutcome {
    pub program: Option<Program>,
    pub errors: Vec<ParseError>,
}

/// Keywords the parser skips to when recovering from a bad statement.
const SAFE_KEYWORDS: &[&str] = &[
    "function", "local", "global", "object", "if", "for", "repeat", "end", "return", "break",
    "delete",
];

/// Method names routed back to the `string` library by the `:method()` sugar.
const STRING_METHODS: &[&str] = &["lower", "upper", "sub", "gsub", "len", "split"];

/// Parse a token stream (as produced by `catlua_lexer::Lexer::tokenize`)
/// into a [`Program`].
pub fn parse(tokens: Vec<Token>) -> ParseOutcome {
    Parser::new(tokens).run()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    block_annotations: Annotations,
    errors: Vec<ParseError>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            block_annotations: Annotations::default(),
            errors: Vec::new(),
        }
    }

    // ── Token plumbing ─────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        self.peek_ahead(0)
    }

    fn peek_ahead(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn check(&self, kind: TokenKind, lexeme: &str) -> bool {
        let tok = self.peek();
        tok.kind == kind && tok.lexeme == lexeme
    }

    fn eat(&mut self, kind: TokenKind, lexeme: &str) -> bool {
        if self.check(kind, lexeme) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, word: &str) -> bool {
        self.eat(TokenKind::Keyword, word)
    }

    fn eat_punc(&mut self, punc: &str) -> bool {
        self.eat(TokenKind::Punc, punc)
    }

    fn expect(&mut self, kind: TokenKind, lexeme: Option<&str>) -> Result<Token, ParseError> {
        let tok = self.peek();
        if tok.kind == kind && lexeme.map_or(true, |l| tok.lexeme == l) {
            return Ok(self.advance());
        }
        let expected = lexeme.map(str::to_string).unwrap_or_else(|| format!("{kind:?}"));
        Err(ParseError::new(
            format!("expected {}, got {:?}", expected, tok.lexeme),
            tok,
        ))
    }

    fn expect_ident(&mut self) -> Result<Token, ParseError> {
        self.expect(TokenKind::Ident, None)
    }

    fn expect_punc(&mut self, punc: &str) -> Result<Token, ParseError> {
        self.expect(TokenKind::Punc, Some(punc))
    }

    fn expect_kw(&mut self, word: &str) -> Result<Token, ParseError> {
        self.expect(TokenKind::Keyword, Some(word))
    }

    /// Skip ahead to the next safe keyword (or end of input) after a bad
    /// statement.
    fn synchronize(&mut self) {
        self.advance();
        while !self.at(TokenKind::Eof) {
            let tok = self.peek();
            if tok.kind == TokenKind::Keyword && SAFE_KEYWORDS.contains(&tok.lexeme.as_str()) {
                return;
            }
            self.advance();
        }
    }

    // ── Top level ──────────────────────────────────────────────────────

    fn run(mut self) -> ParseOutcome {
        match self.parse_program() {
            Ok(program) => ParseOutcome {
                program: Some(program),
                errors: self.errors,
            },
            Err(fatal) => {
                self.errors.push(fatal);
                ParseOutcome {
                    program: None,
                    errors: self.errors,
                }
            }
        }
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut shards = Vec::new();
        let mut current = Shard::default();

        while !self.at(TokenKind::Eof) {
            let line = self.peek().line;

            // Comments between declarations carry no statement to attach to.
            if self.at(TokenKind::Comment) {
                self.advance();
                continue;
            }

            if self.check(TokenKind::Ident, "require") {
                self.advance();
                let has_parens = self.eat_punc("(");
                let file = self.expect(TokenKind::Str, None)?.lexeme;
                if has_parens {
                    self.expect_punc(")")?;
                }
                current.requires.push(file);
                continue;
            }

            if self.at(TokenKind::Annotation) {
                let raw = self.advance().lexeme;
                let text = raw[3.min(raw.len())..].trim().to_string();

                if text == "script" {
                    if !current.is_empty() {
                        shards.push(std::mem::take(&mut current));
                    } else {
                        current = Shard::default();
                    }
                } else if let Some(rest) = text.strip_prefix("script_alias") {
                    if let Some(value) = rest.split_once('=').map(|(_, v)| v) {
                        let alias = value.trim().trim_matches(|c| c == '"' || c == '\'');
                        current.alias = alias.to_string();
                    }
                }
                continue;
            }

            if self.eat_kw("function") {
                let mut name = self.expect_ident()?.lexeme;
                while self.eat_punc(".") {
                    name.push('.');
                    name.push_str(&self.expect_ident()?.lexeme);
                }

                self.expect_punc("(")?;
                let mut params = Vec::new();
                if !self.eat_punc(")") {
                    params.push(self.expect_ident()?.lexeme);
                    while self.eat_punc(",") {
                        params.push(self.expect_ident()?.lexeme);
                    }
                    self.expect_punc(")")?;
                }
                let body = self.parse_block();
                self.expect_kw("end")?;
                current.func_defs.push(FuncDef { line, name, params, body });
                continue;
            }

            // Event declaration: Ident[.Ident][(args...)] body end
            let head = self.expect_ident()?.lexeme;
            let event_type = if self.eat_punc(".") {
                format!("{}.{}", head, self.expect_ident()?.lexeme)
            } else {
                head
            };

            let mut args = Vec::new();
            if self.eat_punc("(") && !self.eat_punc(")") {
                args.push(self.expect_event_arg(line)?);
                while self.eat_punc(",") {
                    args.push(self.expect_event_arg(line)?);
                }
                self.expect_punc(")")?;
            }

            let body = self.parse_block();
            self.expect_kw("end")?;
            current.events.push(Event { line, event_type, args, body });
        }

        if !current.is_empty() {
            shards.push(current);
        }
        Ok(Program { shards })
    }

    /// Event arguments are bare identifiers or string literals only.
    fn expect_event_arg(&mut self, line: u32) -> Result<String, ParseError> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Ident | TokenKind::Str => Ok(tok.lexeme),
            _ => Err(ParseError {
                message: format!("expected IDENT or STRING, got {:?}", tok.lexeme),
                line,
                span: tok.span,
            }),
        }
    }

    // ── Blocks and statements ──────────────────────────────────────────

    fn parse_block(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        let mut line_annotations = Annotations::default();

        while !self.at(TokenKind::Eof) {
            if self.at(TokenKind::Annotation) {
                let raw = self.advance().lexeme;
                let is_block = raw.starts_with("--#");
                let text = raw[3.min(raw.len())..].trim().to_string();

                if is_block {
                    if text == "end" {
                        self.block_annotations = Annotations::default();
                    } else if let Some((key, value)) = split_block_annotation(&text) {
                        match value {
                            Some(v) => self.block_annotations.apply(key, Some(v)),
                            None => self.block_annotations.remove(key),
                        }
                    }
                } else {
                    for tag in text.split_whitespace() {
                        match tag.split_once('=') {
                            Some((key, value)) => line_annotations.apply(key, Some(value)),
                            None => line_annotations.apply(tag, None),
                        }
                    }
                }
                continue;
            }

            let tok = self.peek();
            if tok.kind == TokenKind::Keyword
                && matches!(tok.lexeme.as_str(), "end" | "else" | "elseif")
            {
                break;
            }

            match self.parse_statement() {
                Ok(mut stmt) => {
                    stmt.set_annotations(self.block_annotations.merged_with(line_annotations));
                    stmts.push(stmt);
                }
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
            line_annotations = Annotations::default();
        }

        stmts
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.peek().line;

        if self.at(TokenKind::Comment) {
            let text = self.advance().lexeme;
            return Ok(Stmt::Comment(CommentStmt { line, text }));
        }

        if self.eat_kw("if") {
            return self.parse_if(line);
        }

        if self.eat_kw("repeat") {
            let count = if self.eat_kw("forever") || self.check(TokenKind::Keyword, "end") {
                None
            } else {
                Some(self.parse_expr(0)?)
            };
            let body = self.parse_block();
            self.expect_kw("end")?;
            return Ok(Stmt::Repeat(RepeatStmt { line, count, body }));
        }

        if self.eat_kw("for") {
            let key = self.expect_ident()?.lexeme;
            self.expect_punc(",")?;
            let value = self.expect_ident()?.lexeme;
            self.expect_kw("in")?;

            if !self.eat_kw("pairs") && !self.eat_kw("ipairs") {
                let tok = self.peek();
                return Err(ParseError {
                    message: format!("expected 'pairs' or 'ipairs', got {:?}", tok.lexeme),
                    line,
                    span: tok.span,
                });
            }

            self.expect_punc("(")?;
            let iterator = self.parse_expr(0)?;
            self.expect_punc(")")?;
            self.expect_kw("do")?;
            let body = self.parse_block();
            self.expect_kw("end")?;
            return Ok(Stmt::For(ForStmt { line, key, value, iterator, body }));
        }

        if self.eat_kw("break") {
            return Ok(Stmt::Break(BreakStmt { line }));
        }

        if self.eat_kw("return") {
            // A return value must sit on the same line as the keyword.
            let tok = self.peek();
            let value = if tok.line == line
                && !(tok.kind == TokenKind::Keyword
                    && matches!(tok.lexeme.as_str(), "end" | "else" | "elseif"))
                && tok.kind != TokenKind::Eof
            {
                Some(self.parse_expr(0)?)
            } else {
                None
            };
            return Ok(Stmt::Return(ReturnStmt { line, value }));
        }

        if self.eat_kw("delete") {
            let target = self.parse_postfix(None)?;
            return Ok(Stmt::Delete(DeleteStmt { line, target }));
        }

        let scope = match Scope::from_keyword(&self.peek().lexeme) {
            Some(scope) if self.peek().kind == TokenKind::Keyword => {
                self.advance();
                Some(scope)
            }
            _ => None,
        };

        let is_bg = self.eat_kw("bg") || self.eat(TokenKind::Ident, "background");

        let mut targets = vec![self.parse_postfix(None)?];
        while self.eat_punc(",") {
            targets.push(self.parse_postfix(None)?);
        }

        if self.eat(TokenKind::Op, "=") {
            let is_protected = self.eat_kw("protected");
            let value = self.parse_expr(0)?;

            // A call on the right-hand side becomes the statement itself,
            // with the left-hand targets as its outputs.
            if let Expr::Call(call) = value {
                return Ok(Stmt::Call(CallStmt {
                    line,
                    call: *call,
                    is_bg: false,
                    targets,
                    is_protected,
                    scope,
                    annotations: Annotations::default(),
                }));
            }
            return Ok(Stmt::Assign(AssignStmt {
                line,
                scope,
                targets,
                value,
                op: AssignOp::Set,
                annotations: Annotations::default(),
            }));
        }

        if self.peek().kind == TokenKind::Op {
            if let Some(op) = AssignOp::from_lexeme(&self.peek().lexeme) {
                if targets.len() > 1 {
                    let tok = self.peek();
                    return Err(ParseError {
                        message: "compound assignment cannot have multiple targets".to_string(),
                        line,
                        span: tok.span,
                    });
                }
                self.advance();
                let value = self.parse_expr(0)?;
                return Ok(Stmt::Assign(AssignStmt {
                    line,
                    scope,
                    targets,
                    value,
                    op,
                    annotations: Annotations::default(),
                }));
            }
        }

        if let [Expr::Call(_)] = targets.as_slice() {
            if let Some(Expr::Call(call)) = targets.pop() {
                return Ok(Stmt::Call(CallStmt {
                    line,
                    call: *call,
                    is_bg,
                    targets: Vec::new(),
                    is_protected: false,
                    scope: None,
                    annotations: Annotations::default(),
                }));
            }
        }

        let tok = self.peek();
        Err(ParseError {
            message: format!("unexpected statement: {:?}", tok.lexeme),
            line,
            span: tok.span,
        })
    }

    fn parse_if(&mut self, line: u32) -> Result<Stmt, ParseError> {
        let condition = self.parse_expr(0)?;
        self.expect_kw("then")?;
        let true_body = self.parse_block();

        let mut else_ifs = Vec::new();
        while self.eat_kw("elseif") {
            let condition = self.parse_expr(0)?;
            self.expect_kw("then")?;
            let body = self.parse_block();
            else_ifs.push(ElseIf { condition, body });
        }

        let false_body = if self.eat_kw("else") {
            Some(self.parse_block())
        } else {
            None
        };

        self.expect_kw("end")?;
        Ok(Stmt::If(IfStmt { line, condition, true_body, else_ifs, false_body }))
    }

    // ── Expressions ────────────────────────────────────────────────────

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let line = self.peek().line;

        let mut left = if self.check(TokenKind::Op, "-") || self.check(TokenKind::Op, "#") {
            let op = if self.advance().lexeme == "-" { UnOp::Neg } else { UnOp::Len };
            Expr::Unary(Box::new(UnaryExpr { line, op, right: self.parse_expr(7)? }))
        } else if self.eat_kw("not") {
            Expr::Unary(Box::new(UnaryExpr { line, op: UnOp::Not, right: self.parse_expr(7)? }))
        } else {
            self.parse_primary()?
        };

        left = self.parse_postfix(Some(left))?;

        loop {
            let tok = self.peek();
            if !matches!(tok.kind, TokenKind::Keyword | TokenKind::Op) {
                break;
            }

            // `not contains` is a two-token composite at relational precedence.
            let composite = tok.is_kw("not") && self.peek_ahead(1).is_kw("contains");
            let op = if composite {
                BinOp::NotContains
            } else {
                match BinOp::from_lexeme(&tok.lexeme) {
                    Some(op) => op,
                    None => break,
                }
            };

            let prec = op.precedence();
            if prec < min_prec {
                break;
            }

            self.advance();
            if composite {
                self.advance();
            }

            let next_prec = if op.is_right_assoc() { prec } else { prec + 1 };
            let right = self.parse_expr(next_prec)?;
            left = Expr::Binary(Box::new(BinaryExpr { line, left, op, right }));
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.advance();
        let line = tok.line;

        match tok.kind {
            TokenKind::Number => Ok(Expr::Number(NumberLit::new(line, tok.lexeme))),
            TokenKind::Str => Ok(Expr::Str(StringLit { line, value: tok.lexeme })),
            TokenKind::InterpStr => Ok(Expr::InterpStr(InterpStringLit { line, value: tok.lexeme })),
            TokenKind::Ident => {
                let (prefix, name) = match Prefix::from_str(tok.lexeme.get(..2).unwrap_or("")) {
                    Some(prefix) => (Some(prefix), tok.lexeme[2..].to_string()),
                    None => (None, tok.lexeme),
                };
                Ok(Expr::Var(VarRef::new(line, name, prefix)))
            }
            TokenKind::Keyword if tok.lexeme == "nil" => {
                Ok(Expr::Var(VarRef::new(line, "nil", None)))
            }
            TokenKind::Punc if tok.lexeme == "{" => {
                self.expect_punc("}")?;
                Ok(Expr::Table(TableLit { line }))
            }
            TokenKind::Punc if tok.lexeme == "(" => {
                let expr = self.parse_expr(0)?;
                self.expect_punc(")")?;
                Ok(expr)
            }
            _ => Err(ParseError {
                message: format!("unexpected primary token {:?}", tok.lexeme),
                line,
                span: tok.span,
            }),
        }
    }

    /// Parse postfix forms: `.prop`, `[index]`, `(args)`, `:method(args)`.
    fn parse_postfix(&mut self, left: Option<Expr>) -> Result<Expr, ParseError> {
        let mut left = match left {
            Some(expr) => expr,
            None => self.parse_primary()?,
        };

        loop {
            let line = self.peek().line;

            if self.eat_punc(".") {
                let prop = self.expect_ident()?.lexeme;
                left = Expr::Prop(Box::new(PropRef { line, obj: left, prop }));
            } else if self.eat_punc("[") {
                let index = self.parse_expr(0)?;
                self.expect_punc("]")?;
                left = Expr::Index(Box::new(IndexRef { line, table: left, index }));
            } else if self.eat_punc("(") {
                let args = self.parse_call_args()?;
                left = Expr::Call(Box::new(Call { line, func: left, args }));
            } else if self.eat_punc(":") {
                let method = self.expect_ident()?.lexeme;
                self.expect_punc("(")?;

                // The receiver becomes the first argument.
                let mut args = vec![left];
                args.extend(self.parse_call_args()?);

                let func = if STRING_METHODS.contains(&method.as_str()) {
                    Expr::Prop(Box::new(PropRef {
                        line,
                        obj: Expr::Var(VarRef::new(line, "string", None)),
                        prop: method,
                    }))
                } else {
                    Expr::Var(VarRef::new(line, method, None))
                };
                left = Expr::Call(Box::new(Call { line, func, args }));
            } else {
                break;
            }
        }

        Ok(left)
    }

    /// Parse comma-separated call arguments; the `(` has been consumed.
    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat_punc(")") {
            return Ok(args);
        }
        args.push(self.parse_expr(0)?);
        while self.eat_punc(",") {
            args.push(self.parse_expr(0)?);
        }
        self.expect_punc(")")?;
        Ok(args)
    }
}

/// Split a block annotation body into key and optional value
/// (`type audio` -> ("type", Some("audio")); `type` -> ("type", None)).
fn split_block_annotation(text: &str) -> Option<(&str, Option<&str>)> {
    let mut parts = text.splitn(2, char::is_whitespace);
    let key = parts.next().filter(|k| !k.is_empty())?;
    Some((key, parts.next().map(str::trim).filter(|v| !v.is_empty())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use catlua_lexer::Lexer;

    fn parse_ok(source: &str) -> Program {
        let tokens = Lexer::tokenize(source).unwrap();
        let outcome = parse(tokens);
        assert!(outcome.errors.is_empty(), "unexpected errors: {:?}", outcome.errors);
        outcome.program.unwrap()
    }

    #[test]
    fn empty_shards_are_not_flushed() {
        let program = parse_ok("--@ script\n--@ script\nOnWebsiteLoaded\nend");
        assert_eq!(program.shards.len(), 1);
    }

    #[test]
    fn script_alias_strips_quotes() {
        let program = parse_ok("--@ script_alias = \"main menu\"\nOnWebsiteLoaded\nend");
        assert_eq!(program.shards[0].alias, "main menu");
    }

    #[test]
    fn split_block_annotation_forms() {
        assert_eq!(split_block_annotation("type audio"), Some(("type", Some("audio"))));
        assert_eq!(split_block_annotation("type"), Some(("type", None)));
        assert_eq!(split_block_annotation(""), None);
    }
}
