// src/frontend/parser.rs
//! Recursive-descent parser for the declaration language.
//!
//! The first syntax error aborts the file's parse; recovery buys nothing
//! for a driver that refuses to analyze unparseable packages anyway.

use std::path::Path;

use smallvec::SmallVec;
use thiserror::Error;

use super::ast::{Decl, DeclKind, Field, ImportDecl, NodeId, Ref, SourceFile};
use super::lexer::Lexer;
use super::span::{FileId, Pos, Span};
use super::token::{Token, TokenType};

#[derive(Debug, Clone, Error)]
#[error("{msg}")]
pub struct ParseError {
    pub pos: Pos,
    pub msg: String,
}

impl ParseError {
    fn new(pos: Pos, msg: impl Into<String>) -> Self {
        Self {
            pos,
            msg: msg.into(),
        }
    }
}

pub struct Parser<'src> {
    lexer: Lexer<'src>,
    current: Token,
    file_id: FileId,
    path: &'src Path,
    next_node_id: u32,
}

impl<'src> Parser<'src> {
    /// Parse one file. `base` is the file's base offset in the run's
    /// file set; `ids` keeps node ids unique across the files of one
    /// package and is advanced past the ids handed out here.
    pub fn parse(
        source: &'src str,
        path: &'src Path,
        file_id: FileId,
        base: u32,
        ids: &mut u32,
    ) -> Result<SourceFile, ParseError> {
        let mut lexer = Lexer::new(source, base);
        let current = lexer.next_token();
        let mut parser = Parser {
            lexer,
            current,
            file_id,
            path,
            next_node_id: *ids,
        };
        let file = parser.file();
        *ids = parser.next_node_id;
        file
    }

    fn file(&mut self) -> Result<SourceFile, ParseError> {
        self.expect(TokenType::KwPackage, "expected package clause")?;
        let package_pos = self.current.span.start;
        let package_name = self.expect_ident("expected package name")?;

        let mut imports = Vec::new();
        let mut decls = Vec::new();
        while self.current.ty != TokenType::Eof {
            if self.current.ty == TokenType::KwImport {
                imports.push(self.import_decl()?);
            } else {
                decls.push(self.decl()?);
            }
        }

        Ok(SourceFile {
            file_id: self.file_id,
            path: self.path.to_path_buf(),
            package_name,
            package_pos,
            imports,
            decls,
        })
    }

    fn import_decl(&mut self) -> Result<ImportDecl, ParseError> {
        let start = self.current.span;
        self.advance(); // consume 'import'

        if self.current.ty != TokenType::String {
            return Err(self.unexpected("expected import path string"));
        }
        let path = self.current.lexeme.clone();
        let mut span = Span::new(start.start, self.current.span.end);
        self.advance();

        let alias = if self.eat(TokenType::KwAs) {
            span.end = self.current.span.end;
            Some(self.expect_ident("expected import alias")?)
        } else {
            None
        };

        Ok(ImportDecl { path, alias, span })
    }

    fn decl(&mut self) -> Result<Decl, ParseError> {
        let start = self.current.span;
        let exported = self.eat(TokenType::KwPub);

        match self.current.ty {
            TokenType::KwFn => self.fn_decl(start, exported),
            TokenType::KwType => self.type_decl(start, exported),
            TokenType::KwConst => self.simple_decl(start, exported, DeclKind::Const),
            TokenType::KwVar => self.simple_decl(start, exported, DeclKind::Var),
            _ => Err(self.unexpected("expected declaration")),
        }
    }

    fn fn_decl(&mut self, start: Span, exported: bool) -> Result<Decl, ParseError> {
        self.advance(); // consume 'fn'

        let receiver = if self.eat(TokenType::LParen) {
            let recv = self.expect_ident("expected receiver type name")?;
            self.expect(TokenType::RParen, "expected ')' after receiver")?;
            Some(recv)
        } else {
            None
        };

        let name = self.expect_ident("expected function name")?;
        self.expect(TokenType::LParen, "expected '(' after function name")?;
        self.expect(TokenType::RParen, "expected ')'")?;
        let refs = self.uses_clause()?;

        Ok(Decl {
            id: self.node_id(),
            name,
            exported,
            kind: DeclKind::Func { receiver },
            span: Span::new(start.start, self.current.span.start),
            refs,
        })
    }

    fn type_decl(&mut self, start: Span, exported: bool) -> Result<Decl, ParseError> {
        self.advance(); // consume 'type'
        let name = self.expect_ident("expected type name")?;

        let mut fields = Vec::new();
        if self.eat(TokenType::LBrace) {
            while !self.eat(TokenType::RBrace) {
                let field_span = self.current.span;
                let field_exported = self.eat(TokenType::KwPub);
                let field_name = self.expect_ident("expected field name")?;
                fields.push(Field {
                    id: self.node_id(),
                    name: field_name,
                    exported: field_exported,
                    span: field_span,
                });
            }
        }
        let refs = self.uses_clause()?;

        Ok(Decl {
            id: self.node_id(),
            name,
            exported,
            kind: DeclKind::Type { fields },
            span: Span::new(start.start, self.current.span.start),
            refs,
        })
    }

    fn simple_decl(
        &mut self,
        start: Span,
        exported: bool,
        kind: DeclKind,
    ) -> Result<Decl, ParseError> {
        self.advance(); // consume 'const' / 'var'
        let name = self.expect_ident("expected name")?;
        let refs = self.uses_clause()?;

        Ok(Decl {
            id: self.node_id(),
            name,
            exported,
            kind,
            span: Span::new(start.start, self.current.span.start),
            refs,
        })
    }

    /// `: ref (, ref)*` — the names a declaration depends on.
    fn uses_clause(&mut self) -> Result<SmallVec<[Ref; 2]>, ParseError> {
        let mut refs = SmallVec::new();
        if !self.eat(TokenType::Colon) {
            return Ok(refs);
        }
        loop {
            refs.push(self.reference()?);
            if !self.eat(TokenType::Comma) {
                break;
            }
        }
        Ok(refs)
    }

    fn reference(&mut self) -> Result<Ref, ParseError> {
        let span = self.current.span;
        let first = self.expect_ident("expected name")?;
        if self.eat(TokenType::Dot) {
            let end = self.current.span;
            let name = self.expect_ident("expected name after '.'")?;
            Ok(Ref {
                id: self.node_id(),
                qualifier: Some(first),
                name,
                span: Span::new(span.start, end.end),
            })
        } else {
            Ok(Ref {
                id: self.node_id(),
                qualifier: None,
                name: first,
                span,
            })
        }
    }

    fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn advance(&mut self) {
        self.current = self.lexer.next_token();
    }

    fn eat(&mut self, ty: TokenType) -> bool {
        if self.current.ty == ty {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ty: TokenType, msg: &str) -> Result<(), ParseError> {
        if self.eat(ty) {
            Ok(())
        } else {
            Err(self.unexpected(msg))
        }
    }

    fn expect_ident(&mut self, msg: &str) -> Result<String, ParseError> {
        if self.current.ty == TokenType::Identifier {
            let name = self.current.lexeme.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected(msg))
        }
    }

    fn unexpected(&self, msg: &str) -> ParseError {
        ParseError::new(
            self.current.span.start,
            format!("{}, found '{}'", msg, self.current.ty.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<SourceFile, ParseError> {
        let mut ids = 0;
        Parser::parse(src, Path::new("test.fr"), FileId(0), 1, &mut ids)
    }

    #[test]
    fn parses_package_and_imports() {
        let file = parse("package geo\nimport \"lib/math\"\nimport \"lib/strings\" as str")
            .expect("parse");
        assert_eq!(file.package_name, "geo");
        assert_eq!(file.imports.len(), 2);
        assert_eq!(file.imports[0].local_name(), "math");
        assert_eq!(file.imports[1].local_name(), "str");
    }

    #[test]
    fn parses_declarations() {
        let src = "package geo\n\
                   pub type Matrix { rows, pub Cols }\n\
                   pub fn (Matrix) Det()\n\
                   fn helper() : Matrix, math.Sqrt\n\
                   pub const Origin\n\
                   var cache";
        let file = parse(src).expect("parse");
        assert_eq!(file.decls.len(), 5);

        let matrix = &file.decls[0];
        assert!(matrix.exported);
        let DeclKind::Type { fields } = &matrix.kind else {
            panic!("expected type decl");
        };
        assert_eq!(fields.len(), 2);
        assert!(!fields[0].exported);
        assert!(fields[1].exported);

        let det = &file.decls[1];
        assert!(matches!(
            &det.kind,
            DeclKind::Func { receiver: Some(r) } if r == "Matrix"
        ));

        let helper = &file.decls[2];
        assert_eq!(helper.refs.len(), 2);
        assert_eq!(helper.refs[0].qualifier, None);
        assert_eq!(helper.refs[1].qualifier.as_deref(), Some("math"));
        assert_eq!(helper.refs[1].name, "Sqrt");
    }

    #[test]
    fn missing_package_clause_is_an_error() {
        let err = parse("fn f()").unwrap_err();
        assert!(err.msg.contains("package"), "{}", err.msg);
        assert_eq!(err.pos, Pos(1));
    }

    #[test]
    fn node_ids_are_unique() {
        let file = parse("package p\nfn a() : x\nfn b() : y").expect("parse");
        let mut seen = std::collections::HashSet::new();
        for decl in &file.decls {
            assert!(seen.insert(decl.id));
            for r in &decl.refs {
                assert!(seen.insert(r.id));
            }
        }
    }
}
