// catlua-lexer -- tokenizer for the catlua source language.

mod cursor;

use std::fmt;

use catlua_common::span::Span;
use catlua_common::token::{is_keyword, Token, TokenKind};
use cursor::Cursor;

/// A fatal lexer error with location information.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub line: u32,
    pub column: u32,
    pub span: Span,
}

/// The specific kind of lexer error.
#[derive(Debug, Clone, PartialEq)]
pub enum LexErrorKind {
    /// An unexpected character was encountered.
    UnexpectedCharacter(char),
    /// A string literal was not closed before end of input.
    UnterminatedString,
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexErrorKind::UnexpectedCharacter(c) => write!(f, "unexpected char {c:?}"),
            LexErrorKind::UnterminatedString => write!(f, "unterminated string"),
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}, col {}", self.kind, self.line, self.column)
    }
}

impl std::error::Error for LexError {}

/// The catlua lexer. Converts source text into a stream of tokens.
///
/// Whitespace is skipped, newlines advance the line counter, and string
/// lexemes are stored without their delimiters. Lexing stops at the first
/// malformed character.
pub struct Lexer<'src> {
    cursor: Cursor<'src>,
    line: u32,
    line_start: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            cursor: Cursor::new(source),
            line: 1,
            line_start: 0,
        }
    }

    /// Convenience: tokenize the entire source, including the final Eof token.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn column_at(&self, pos: u32) -> u32 {
        pos - self.line_start
    }

    fn token(&self, kind: TokenKind, lexeme: impl Into<String>, start: u32) -> Token {
        Token::new(
            kind,
            lexeme,
            self.line,
            self.column_at(start),
            Span::new(start, self.cursor.pos()),
        )
    }

    fn error(&self, kind: LexErrorKind, start: u32) -> LexError {
        LexError {
            kind,
            line: self.line,
            column: self.column_at(start),
            span: Span::new(start, self.cursor.pos()),
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        loop {
            let start = self.cursor.pos();
            let Some(c) = self.cursor.peek() else {
                return Ok(self.token(TokenKind::Eof, "", start));
            };

            match c {
                ' ' | '\t' | '\r' => {
                    self.cursor.advance();
                }
                '\n' => {
                    self.cursor.advance();
                    self.line += 1;
                    self.line_start = self.cursor.pos();
                }
                '-' if self.cursor.peek_next() == Some('-') => {
                    return Ok(self.lex_comment(start));
                }
                '0'..='9' => return Ok(self.lex_number(start)),
                '`' => return self.lex_delimited(start, '`', TokenKind::InterpStr),
                '"' | '\'' => return self.lex_delimited(start, c, TokenKind::Str),
                c if is_ident_start(c) => return self.lex_ident(start),
                '=' | '~' | '<' | '>' | '+' | '-' | '*' | '/' | '^' | '%' | '#' => {
                    return self.lex_operator(start, c);
                }
                '.' => {
                    self.cursor.advance();
                    if self.cursor.peek() == Some('.') {
                        self.cursor.advance();
                        return Ok(self.token(TokenKind::Op, "..", start));
                    }
                    return Ok(self.token(TokenKind::Punc, ".", start));
                }
                '(' | ')' | '[' | ']' | '{' | '}' | ',' | ':' => {
                    self.cursor.advance();
                    return Ok(self.token(TokenKind::Punc, c, start));
                }
                _ => {
                    self.cursor.advance();
                    return Err(self.error(LexErrorKind::UnexpectedCharacter(c), start));
                }
            }
        }
    }

    /// Lex `--` comments and `--@`/`--#` annotations.
    ///
    /// Annotations keep their raw text (including the marker) so the parser
    /// can distinguish line-scoped from block-scoped forms; plain comments
    /// store only the trimmed body.
    fn lex_comment(&mut self, start: u32) -> Token {
        self.cursor.advance(); // first '-'
        self.cursor.advance(); // second '-'
        let is_annotation = matches!(self.cursor.peek(), Some('@') | Some('#'));
        self.cursor.eat_while(|c| c != '\n');
        let raw = self.cursor.slice(start, self.cursor.pos());

        if is_annotation {
            self.token(TokenKind::Annotation, raw, start)
        } else {
            let body = raw[2..].trim().to_string();
            self.token(TokenKind::Comment, body, start)
        }
    }

    /// Lex an integer or decimal number. A trailing `.` with no digit after
    /// it is not part of the number.
    fn lex_number(&mut self, start: u32) -> Token {
        self.cursor.eat_while(|c| c.is_ascii_digit());
        if self.cursor.peek() == Some('.')
            && self.cursor.peek_next().is_some_and(|c| c.is_ascii_digit())
        {
            self.cursor.advance();
            self.cursor.eat_while(|c| c.is_ascii_digit());
        }
        let text = self.cursor.slice(start, self.cursor.pos()).to_string();
        self.token(TokenKind::Number, text, start)
    }

    /// Lex a quoted or backtick-delimited literal. The lexeme excludes the
    /// delimiters; there is no escape handling.
    fn lex_delimited(&mut self, start: u32, close: char, kind: TokenKind) -> Result<Token, LexError> {
        self.cursor.advance(); // opening delimiter
        let body_start = self.cursor.pos();
        self.cursor.eat_while(|c| c != close && c != '\n');
        if self.cursor.peek() != Some(close) {
            return Err(self.error(LexErrorKind::UnterminatedString, start));
        }
        let body = self.cursor.slice(body_start, self.cursor.pos()).to_string();
        self.cursor.advance(); // closing delimiter
        Ok(self.token(kind, body, start))
    }

    /// Lex an identifier or keyword, handling the `l!`/`g!`/`o!` scope
    /// prefix. The prefix is only consumed when an identifier head follows
    /// the `!`; a stray `!` is left for the next token (and rejected there).
    fn lex_ident(&mut self, start: u32) -> Result<Token, LexError> {
        self.cursor.advance();
        self.cursor.eat_while(is_ident_continue);
        let head = self.cursor.slice(start, self.cursor.pos());

        if matches!(head, "l" | "g" | "o")
            && self.cursor.peek() == Some('!')
            && self.cursor.peek_next().is_some_and(is_ident_start)
        {
            self.cursor.advance(); // '!'
            self.cursor.advance(); // identifier head
            self.cursor.eat_while(is_ident_continue);
        }

        let text = self.cursor.slice(start, self.cursor.pos()).to_string();
        let kind = if is_keyword(&text) {
            TokenKind::Keyword
        } else {
            TokenKind::Ident
        };
        Ok(self.token(kind, text, start))
    }

    /// Lex single- and double-character operators.
    fn lex_operator(&mut self, start: u32, first: char) -> Result<Token, LexError> {
        self.cursor.advance();
        let second = self.cursor.peek();

        let two = matches!(
            (first, second),
            ('=', Some('=')) | ('~', Some('=')) | ('<', Some('=')) | ('>', Some('='))
                | ('+', Some('=')) | ('-', Some('=')) | ('*', Some('='))
                | ('/', Some('=')) | ('^', Some('=')) | ('%', Some('='))
        );
        if two {
            self.cursor.advance();
            let text = self.cursor.slice(start, self.cursor.pos()).to_string();
            return Ok(self.token(TokenKind::Op, text, start));
        }

        // Bare '~' is only valid as part of '~='.
        if first == '~' {
            return Err(self.error(LexErrorKind::UnexpectedCharacter('~'), start));
        }
        Ok(self.token(TokenKind::Op, first, start))
    }
}

/// Whether a character can start an identifier.
fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Whether a character can continue an identifier.
fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
