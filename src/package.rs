// src/package.rs
//! The package contract: what the external package-discovery tool hands
//! the driver, plus the fields the driver populates while loading.
//!
//! Driver-populated fields sit behind locks: a package is published to
//! dependent loader threads through its completion latch, and the fact
//! demotion path may later reset the universe and reload from source.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::errors::SourceError;
use crate::frontend::{FileSet, SourceFile};
use crate::sema::{TypeInfo, TypeSizes, Universe};

pub struct Package {
    /// Stable import path; package identity throughout the driver.
    pub path: String,
    pub name: String,
    /// Direct imports, keyed by import path. Ordered, so every
    /// enumeration of imports is deterministic.
    pub imports: BTreeMap<String, Arc<Package>>,
    pub compiled_files: Vec<PathBuf>,
    pub other_files: Vec<PathBuf>,
    /// Compiler-emitted export data, when the build system produced it.
    pub export_file: Option<PathBuf>,
    pub fset: Arc<FileSet>,
    pub type_sizes: TypeSizes,

    errors: Mutex<Vec<SourceError>>,
    ill_typed: AtomicBool,
    types: RwLock<Option<Arc<Universe>>>,
    syntax: RwLock<Option<Arc<Vec<SourceFile>>>>,
    type_info: RwLock<Option<Arc<TypeInfo>>>,
}

impl Package {
    pub fn new(path: impl Into<String>, name: impl Into<String>, fset: Arc<FileSet>) -> Package {
        Package {
            path: path.into(),
            name: name.into(),
            imports: BTreeMap::new(),
            compiled_files: Vec::new(),
            other_files: Vec::new(),
            export_file: None,
            fset,
            type_sizes: TypeSizes::default(),
            errors: Mutex::new(Vec::new()),
            ill_typed: AtomicBool::new(false),
            types: RwLock::new(None),
            syntax: RwLock::new(None),
            type_info: RwLock::new(None),
        }
    }

    pub fn push_error(&self, err: SourceError) {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(err);
    }

    pub fn errors(&self) -> Vec<SourceError> {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn first_error(&self) -> Option<SourceError> {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .first()
            .cloned()
    }

    pub fn ill_typed(&self) -> bool {
        self.ill_typed.load(Ordering::Acquire)
    }

    pub fn set_ill_typed(&self, value: bool) {
        self.ill_typed.store(value, Ordering::Release);
    }

    pub fn types(&self) -> Option<Arc<Universe>> {
        self.types
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_types(&self, universe: Arc<Universe>) {
        *self.types.write().unwrap_or_else(|e| e.into_inner()) = Some(universe);
    }

    /// Discard the current universe. The demotion path resets before a
    /// source reload so the checker starts from a clean scope.
    pub fn reset_types(&self) {
        *self.types.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn syntax(&self) -> Option<Arc<Vec<SourceFile>>> {
        self.syntax
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_syntax(&self, files: Vec<SourceFile>) {
        *self.syntax.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(files));
    }

    pub fn type_info(&self) -> Option<Arc<TypeInfo>> {
        self.type_info
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_type_info(&self, info: TypeInfo) {
        *self.type_info.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(info));
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("path", &self.path)
            .field("imports", &self.imports.keys().collect::<Vec<_>>())
            .field("ill_typed", &self.ill_typed())
            .finish()
    }
}
