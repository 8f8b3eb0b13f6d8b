// src/frontend/ast.rs

use std::path::PathBuf;

use smallvec::SmallVec;

use super::span::{FileId, Pos, Span};

/// Unique identifier for AST nodes within one parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// A parsed source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file_id: FileId,
    pub path: PathBuf,
    pub package_name: String,
    pub package_pos: Pos,
    pub imports: Vec<ImportDecl>,
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub path: String,
    pub alias: Option<String>,
    pub span: Span,
}

impl ImportDecl {
    /// The name the import is referenced by: its alias, or the last
    /// segment of its path.
    pub fn local_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.path.rsplit('/').next().unwrap_or(&self.path),
        }
    }
}

/// A top-level declaration.
#[derive(Debug, Clone)]
pub struct Decl {
    pub id: NodeId,
    pub name: String,
    pub exported: bool,
    pub kind: DeclKind,
    pub span: Span,
    /// Names this declaration references, resolved by the checker.
    pub refs: SmallVec<[Ref; 2]>,
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    /// `fn (Recv)? name()`. The receiver names a type declared in the
    /// same package.
    Func { receiver: Option<String> },
    /// `type name { fields }`.
    Type { fields: Vec<Field> },
    Const,
    Var,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub id: NodeId,
    pub name: String,
    pub exported: bool,
    pub span: Span,
}

/// A possibly-qualified reference: `name` or `pkg.name`.
#[derive(Debug, Clone)]
pub struct Ref {
    pub id: NodeId,
    pub qualifier: Option<String>,
    pub name: String,
    pub span: Span,
}
