// src/frontend/lexer.rs

use super::span::{Pos, Span};
use super::token::{Token, TokenType};

pub struct Lexer<'src> {
    source: &'src str,
    chars: std::iter::Peekable<std::str::CharIndices<'src>>,
    /// Global position of the file's first byte in the run's `FileSet`.
    base: u32,
    start: usize,
    current: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, base: u32) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            base,
            start: 0,
            current: 0,
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        self.start = self.current;

        let Some(c) = self.advance() else {
            return self.make_token(TokenType::Eof);
        };

        match c {
            '(' => self.make_token(TokenType::LParen),
            ')' => self.make_token(TokenType::RParen),
            '{' => self.make_token(TokenType::LBrace),
            '}' => self.make_token(TokenType::RBrace),
            ':' => self.make_token(TokenType::Colon),
            ',' => self.make_token(TokenType::Comma),
            '.' => self.make_token(TokenType::Dot),
            '"' => self.string(),
            c if c.is_ascii_alphabetic() || c == '_' => self.identifier(),
            _ => self.make_token(TokenType::Error),
        }
    }

    fn identifier(&mut self) -> Token {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let ty = match &self.source[self.start..self.current] {
            "package" => TokenType::KwPackage,
            "import" => TokenType::KwImport,
            "as" => TokenType::KwAs,
            "pub" => TokenType::KwPub,
            "fn" => TokenType::KwFn,
            "type" => TokenType::KwType,
            "const" => TokenType::KwConst,
            "var" => TokenType::KwVar,
            _ => TokenType::Identifier,
        };
        self.make_token(ty)
    }

    fn string(&mut self) -> Token {
        loop {
            match self.advance() {
                Some('"') => break,
                Some(_) => {}
                None => return self.make_token(TokenType::Error),
            }
        }
        // Strip the surrounding quotes from the lexeme.
        let lexeme = self.source[self.start + 1..self.current - 1].to_string();
        Token {
            ty: TokenType::String,
            lexeme,
            span: self.span(),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.source[self.current..].starts_with("//") => {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn advance(&mut self) -> Option<char> {
        let (i, c) = self.chars.next()?;
        self.current = i + c.len_utf8();
        Some(c)
    }

    fn span(&self) -> Span {
        Span::new(
            Pos(self.base + self.start as u32),
            Pos(self.base + self.current as u32),
        )
    }

    fn make_token(&self, ty: TokenType) -> Token {
        Token {
            ty,
            lexeme: self.source[self.start..self.current].to_string(),
            span: self.span(),
        }
    }
}
