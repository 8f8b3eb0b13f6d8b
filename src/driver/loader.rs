// src/driver/loader.rs
//! The two-phase package loader.
//!
//! Each package gets one loading task. A task waits for its direct
//! imports' completion latches, takes a semaphore permit, then loads the
//! package one of three ways: the predefined intrinsics universe, source
//! (parse + type-check), or export data. Export-data decoding runs under
//! the load guard's single mutex because it may mutate the universes of
//! transitively reachable packages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info_span};

use super::action::Action;
use super::sync::Latch;
use crate::errors::{SourceError, SourceErrorKind};
use crate::frontend::{ParseError, Parser, Position, SourceFile};
use crate::package::Package;
use crate::sema::{
    self, EXTERN_IMPORT, INTRINSICS_PATH, ImportError, TypeInfo, Universe, export_data,
    intrinsics,
};

/// Serializes export-data decoding across packages. The decoder mutates
/// shared type universes transitively; finer locking is not attempted.
pub struct LoadGuard {
    export_data: Mutex<()>,
}

impl LoadGuard {
    pub fn new() -> Self {
        LoadGuard {
            export_data: Mutex::new(()),
        }
    }

    pub(crate) fn lock_export_data(&self) -> MutexGuard<'_, ()> {
        self.export_data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for LoadGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{0}")]
    Parse(SourceError),
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("no export data for {0:?}")]
    NoExportData(String),
    #[error("dependency {0:?} has not been loaded yet")]
    DependencyNotLoaded(String),
    #[error(transparent)]
    ExportDataFormat(#[from] export_data::ExportDataError),
    /// Any of the above, decorated at the demotion call site.
    #[error("could not load export data: {0}")]
    ExportData(String),
}

/// A package's companion during the load phase.
pub(crate) struct LoadingPackage {
    pub(crate) pkg: Arc<Package>,
    /// Direct imports' loading companions, awaited before loading.
    pub(crate) imports: Vec<Arc<LoadingPackage>>,
    pub(crate) is_initial: bool,
    pub(crate) done: Latch,
    /// All actions that analyze this package.
    pub(crate) actions: Vec<Arc<Action>>,
    was_loaded: AtomicBool,
    guard: Arc<LoadGuard>,
}

impl LoadingPackage {
    pub(crate) fn new(
        pkg: Arc<Package>,
        imports: Vec<Arc<LoadingPackage>>,
        is_initial: bool,
        actions: Vec<Arc<Action>>,
        guard: Arc<LoadGuard>,
    ) -> LoadingPackage {
        LoadingPackage {
            pkg,
            imports,
            is_initial,
            done: Latch::new(),
            actions,
            was_loaded: AtomicBool::new(false),
            guard,
        }
    }

    pub(crate) fn wait_until_imports_loaded(&self) {
        for imp in &self.imports {
            imp.done.wait();
        }
    }

    /// Load the package, consulting cached facts to decide whether
    /// non-initial packages can skip source analysis. Runs exactly once;
    /// `was_loaded` and the action flags it writes are read only after
    /// the done latch opens.
    pub(crate) fn load_with_facts(&self) -> Result<(), LoadError> {
        let pkg = &self.pkg;

        if pkg.path == INTRINSICS_PATH {
            // Fill in the blanks to avoid surprises.
            pkg.set_types(intrinsics());
            pkg.set_syntax(Vec::new());
            pkg.set_type_info(TypeInfo::default());
            self.was_loaded.store(true, Ordering::Release);
            return Ok(());
        }

        if pkg.type_info().is_some() {
            // Already loaded, e.g. by a prior client of the same
            // packages. Just try the cached facts.
            if !self.was_loaded.load(Ordering::Acquire) {
                for act in &self.actions {
                    if !act.load_cached_facts() {
                        act.mark_needs_source();
                        mark_deps_for_analyzing_source(act);
                    }
                }
            }
            self.was_loaded.store(true, Ordering::Release);
            return Ok(());
        }

        let result = self.load_with_facts_uncached();
        self.was_loaded.store(true, Ordering::Release);
        result
    }

    fn load_with_facts_uncached(&self) -> Result<(), LoadError> {
        let pkg = &self.pkg;

        if self.is_initial {
            // Initial packages are analyzed from source regardless, so
            // cached facts are never consulted.
            return self.load_from_source();
        }

        if let Err(err) = self.load_from_export_data() {
            // We were given export data yet cannot use it; something is
            // wrong. Load from source anyway to surface the compile
            // errors, but keep the package excluded from analysis by
            // returning the original error, decorated.
            let err = LoadError::ExportData(err.to_string());
            pkg.reset_types();
            self.load_from_source()?;
            pkg.push_error(SourceError {
                pos: Position::none(),
                msg: err.to_string(),
                kind: SourceErrorKind::Parse,
            });
            return Err(err);
        }

        let mut need_load_from_source = false;
        for act in &self.actions {
            if act.load_cached_facts() {
                continue;
            }
            // Cached facts are gone; this action must analyze source.
            debug!(action = %act, "cached facts missing, demoting to source analysis");
            act.mark_needs_source();
            need_load_from_source = true;
            mark_deps_for_analyzing_source(act);
        }

        if need_load_from_source {
            pkg.reset_types();
            return self.load_from_source();
        }
        Ok(())
    }

    /// Parse every compiled file and type-check the package. Files are
    /// parsed sequentially: packages have few files and parsing is fast,
    /// so intra-package parallelism loses to scheduler overhead.
    fn load_from_source(&self) -> Result<(), LoadError> {
        let pkg = &self.pkg;
        let _span = info_span!("load_source", pkg = %pkg.path).entered();

        pkg.set_ill_typed(true);

        let mut files: Vec<SourceFile> = Vec::with_capacity(pkg.compiled_files.len());
        let mut next_node_id = 0u32;
        for path in &pkg.compiled_files {
            let source = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
                path: path.display().to_string(),
                source: e,
            })?;
            let (file_id, base) = pkg.fset.add_file(path, &source);
            match Parser::parse(&source, path, file_id, base, &mut next_node_id) {
                Ok(file) => files.push(file),
                Err(err) => {
                    pkg.push_error(convert_parse_error(pkg, &err));
                    return Err(LoadError::Parse(convert_parse_error(pkg, &err)));
                }
            }
        }

        let importer = |path: &str| -> Result<Arc<Universe>, ImportError> {
            if path == INTRINSICS_PATH {
                return Ok(intrinsics());
            }
            if path == EXTERN_IMPORT {
                // The discovery tool does not tell us that binding
                // preprocessing failed; we find out here.
                return Err(ImportError::ExternFailed);
            }
            let Some(imp) = pkg.imports.get(path) else {
                return Err(ImportError::NotFound(path.to_string()));
            };
            if let Some(err) = imp.first_error() {
                return Err(ImportError::Dependency(err.to_string()));
            }
            match imp.types() {
                Some(universe) => Ok(universe),
                None => Err(ImportError::Dependency(format!(
                    "dependency {path:?} has not been loaded yet"
                ))),
            }
        };

        let (universe, info, check_errors) = sema::check(&pkg.path, &pkg.name, &files, &importer);
        let clean = check_errors.is_empty();
        for err in check_errors {
            pkg.push_error(SourceError {
                pos: pkg.fset.position(err.pos),
                msg: err.msg,
                kind: SourceErrorKind::Type,
            });
        }

        pkg.set_syntax(files);
        pkg.set_types(universe);
        pkg.set_type_info(info);
        if clean {
            pkg.set_ill_typed(false);
        }
        Ok(())
    }

    /// Decode the package's export data under the shared mutex.
    fn load_from_export_data(&self) -> Result<(), LoadError> {
        let pkg = &self.pkg;
        let _guard = self.guard.lock_export_data();
        let _span = info_span!("load_export_data", pkg = %pkg.path).entered();

        pkg.set_ill_typed(true);

        for (path, imp) in &pkg.imports {
            if imp.types().is_none() {
                return Err(LoadError::DependencyNotLoaded(path.clone()));
            }
        }
        let Some(export_file) = &pkg.export_file else {
            return Err(LoadError::NoExportData(pkg.path.clone()));
        };

        // The view seen by the decoder: every transitively reachable
        // package's universe.
        let mut view: FxHashMap<String, Arc<Universe>> = FxHashMap::default();
        let mut stack: Vec<&Arc<Package>> = pkg.imports.values().collect();
        while let Some(dep) = stack.pop() {
            if view.contains_key(&dep.path) {
                continue;
            }
            if let Some(universe) = dep.types() {
                view.insert(dep.path.clone(), universe);
            }
            stack.extend(dep.imports.values());
        }

        let universe = export_data::read(export_file, &pkg.path, &view)?;
        pkg.set_types(universe);
        pkg.set_ill_typed(false);
        Ok(())
    }
}

/// Horizontal dependencies must run on source whenever the demoted
/// action does.
fn mark_deps_for_analyzing_source(act: &Action) {
    for dep in &act.deps {
        if Arc::ptr_eq(&dep.pkg, &act.pkg) {
            dep.mark_needs_source();
        }
    }
}

fn convert_parse_error(pkg: &Package, err: &ParseError) -> SourceError {
    SourceError {
        pos: pkg.fset.position(err.pos),
        msg: err.msg.clone(),
        kind: SourceErrorKind::Parse,
    }
}
