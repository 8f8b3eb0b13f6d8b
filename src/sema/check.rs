// src/sema/check.rs
//! The type checker: builds a package's universe from parsed syntax.
//!
//! Checking never hard-fails. Every problem is recorded as a `CheckError`
//! and the caller decides ill-typedness from the error list; a partial
//! universe is still useful to importers and to analyzers that opt into
//! running despite errors.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use super::info::TypeInfo;
use super::universe::{Object, ObjectKey, ObjectKind, ObjectRef, Universe};
use crate::frontend::{DeclKind, Pos, SourceFile};

/// A recorded type error. Carries a raw position; the error classifier
/// turns it into a normalized source-error record.
#[derive(Debug, Clone)]
pub struct CheckError {
    pub pos: Pos,
    pub msg: String,
}

/// Failure to supply an import's universe.
#[derive(Debug, Clone, Error)]
pub enum ImportError {
    #[error("package {0:?} is not provided")]
    NotFound(String),
    #[error("extern preprocessing failed")]
    ExternFailed,
    #[error("{0}")]
    Dependency(String),
}

/// Resolves an import path to the already-materialized universe of a
/// direct import, or explains why it cannot.
pub type Importer<'a> = &'a dyn Fn(&str) -> Result<Arc<Universe>, ImportError>;

/// Type-check `files` as the package at `pkg_path` named `pkg_name`.
pub fn check(
    pkg_path: &str,
    pkg_name: &str,
    files: &[SourceFile],
    importer: Importer<'_>,
) -> (Arc<Universe>, TypeInfo, Vec<CheckError>) {
    let mut checker = Checker {
        pkg_path,
        pkg_name,
        importer,
        universe: Universe::new(pkg_path, pkg_name),
        info: TypeInfo::default(),
        errors: Vec::new(),
        declared: FxHashMap::default(),
        type_names: files
            .iter()
            .flat_map(|f| &f.decls)
            .filter(|d| matches!(d.kind, DeclKind::Type { .. }))
            .map(|d| d.name.clone())
            .collect(),
    };
    checker.run(files);
    debug!(
        pkg = pkg_path,
        objects = checker.universe.len(),
        errors = checker.errors.len(),
        "type-checked package"
    );
    (checker.universe, checker.info, checker.errors)
}

/// A declaration awaiting object construction; refs are attached during
/// the resolution pass.
struct Declared {
    object: Object,
}

struct Checker<'a> {
    pkg_path: &'a str,
    pkg_name: &'a str,
    importer: Importer<'a>,
    universe: Arc<Universe>,
    info: TypeInfo,
    errors: Vec<CheckError>,
    declared: FxHashMap<String, Declared>,
    type_names: rustc_hash::FxHashSet<String>,
}

impl Checker<'_> {
    fn run(&mut self, files: &[SourceFile]) {
        for file in files {
            if file.package_name != self.pkg_name {
                self.error(
                    file.package_pos,
                    format!(
                        "package clause {:?} does not match package name {:?}",
                        file.package_name, self.pkg_name
                    ),
                );
            }
            self.declare_file(file);
        }
        for file in files {
            let imports = self.resolve_imports(file);
            self.resolve_refs(file, &imports);
        }
        for (_, declared) in std::mem::take(&mut self.declared) {
            self.universe.insert(Arc::new(declared.object));
        }
    }

    fn declare_file(&mut self, file: &SourceFile) {
        for decl in &file.decls {
            let path = match &decl.kind {
                DeclKind::Func {
                    receiver: Some(recv),
                } => {
                    if !self.type_names.contains(recv) {
                        self.error(
                            decl.span.start,
                            format!("undefined receiver type: {recv}"),
                        );
                        continue;
                    }
                    format!("{recv}.{}", decl.name)
                }
                _ => decl.name.clone(),
            };

            let kind = match &decl.kind {
                DeclKind::Func { receiver } => ObjectKind::Func {
                    receiver: receiver.clone(),
                },
                DeclKind::Type { .. } => ObjectKind::TypeName,
                DeclKind::Const => ObjectKind::Const,
                DeclKind::Var => ObjectKind::Var { is_field: false },
            };
            if !self.declare(decl.id, &path, &decl.name, kind, decl.exported, decl.span.start) {
                continue;
            }

            if let DeclKind::Type { fields } = &decl.kind {
                for field in fields {
                    let field_path = format!("{}.{}", decl.name, field.name);
                    self.declare(
                        field.id,
                        &field_path,
                        &field.name,
                        ObjectKind::Var { is_field: true },
                        field.exported,
                        field.span.start,
                    );
                }
            }
        }
    }

    fn declare(
        &mut self,
        node: crate::frontend::NodeId,
        path: &str,
        name: &str,
        kind: ObjectKind,
        exported: bool,
        pos: Pos,
    ) -> bool {
        if self.declared.contains_key(path) {
            self.error(pos, format!("{path} redeclared in this package"));
            return false;
        }
        let object = Object {
            name: name.to_string(),
            path: path.to_string(),
            pkg: self.pkg_path.to_string(),
            kind,
            exported,
            pos,
            refs: Vec::new(),
        };
        self.info.defs.insert(node, object.key());
        self.declared.insert(path.to_string(), Declared { object });
        true
    }

    /// Resolve a file's imports to universes. Failures are recorded once
    /// here; later references through the failed import stay silent.
    fn resolve_imports(
        &mut self,
        file: &SourceFile,
    ) -> FxHashMap<String, Option<Arc<Universe>>> {
        let mut imports = FxHashMap::default();
        for imp in &file.imports {
            let resolved = match (self.importer)(&imp.path) {
                Ok(universe) => Some(universe),
                Err(err) => {
                    self.error(
                        imp.span.start,
                        format!("could not import {}: {}", imp.path, err),
                    );
                    None
                }
            };
            imports.insert(imp.local_name().to_string(), resolved);
        }
        imports
    }

    fn resolve_refs(
        &mut self,
        file: &SourceFile,
        imports: &FxHashMap<String, Option<Arc<Universe>>>,
    ) {
        for decl in &file.decls {
            let decl_path = match self.info.defs.get(&decl.id) {
                Some(key) => key.path.clone(),
                None => continue, // declaration itself failed
            };
            for r in &decl.refs {
                match &r.qualifier {
                    None => {
                        if self.declared.contains_key(&r.name) {
                            let key = ObjectKey {
                                pkg: self.pkg_path.to_string(),
                                path: r.name.clone(),
                            };
                            self.info.uses.insert(r.id, key);
                        } else {
                            self.error(r.span.start, format!("undefined: {}", r.name));
                        }
                    }
                    Some(qualifier) => {
                        let Some(resolved) = imports.get(qualifier) else {
                            self.error(r.span.start, format!("undefined: {qualifier}"));
                            continue;
                        };
                        let Some(universe) = resolved else {
                            continue; // import failure already reported
                        };
                        let Some(object) = universe.lookup(&r.name) else {
                            self.error(
                                r.span.start,
                                format!("undefined: {}.{}", qualifier, r.name),
                            );
                            continue;
                        };
                        if !object.exported {
                            self.error(
                                r.span.start,
                                format!(
                                    "name {} not exported by package {}",
                                    r.name, qualifier
                                ),
                            );
                            continue;
                        }
                        self.info.uses.insert(r.id, object.key());
                        if let Some(declared) = self.declared.get_mut(&decl_path) {
                            declared.object.refs.push(ObjectRef {
                                key: object.key(),
                                kind: object.kind.clone(),
                            });
                        }
                    }
                }
            }
        }
    }

    fn error(&mut self, pos: Pos, msg: String) {
        self.errors.push(CheckError { pos, msg });
    }
}
