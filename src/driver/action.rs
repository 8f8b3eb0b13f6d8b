// src/driver/action.rs
//! One unit of analysis work: the application of one analyzer to one
//! package. Actions form a DAG, both within a package (across analyzers)
//! and across packages (same analyzer over imports).

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::debug::debug_flags;
use super::sync::Latch;
use crate::analysis::{
    Analyzer, AnalyzerResult, Diagnostic, Fact, FactRegistry, FactType, ObjectFact, PackageFact,
    Pass, PassHost, code_fact,
};
use crate::cache::{CacheError, PackageCache};
use crate::package::Package;
use crate::sema::{Object, ObjectKey, ObjectKind, object_path_for};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("failed prerequisites: {0}")]
    FailedPrerequisites(String),
    #[error("analysis skipped due to errors in package")]
    SkippedDueToErrors,
    #[error("{0}")]
    Analyzer(String),
    #[error(
        "internal error: on package {pkg}, analyzer {analyzer} returned a result of \
         unexpected type, but declared result type {want}"
    )]
    ResultTypeMismatch {
        pkg: String,
        analyzer: String,
        want: &'static str,
    },
    #[error("internal error: package {0} has no type information")]
    MissingTypes(String),
}

struct StoredObjectFact {
    obj: Arc<Object>,
    ty: FactType,
    fact: Box<dyn Fact>,
}

struct StoredPackageFact {
    ty: FactType,
    fact: Box<dyn Fact>,
}

/// The at-rest shape of one fact: an object path (empty for package
/// facts) plus the serialized value tagged with its descriptor name.
#[derive(Serialize, Deserialize)]
struct PersistedFact {
    path: String,
    #[serde(rename = "type")]
    ty: String,
    fact: serde_json::Value,
}

pub struct Action {
    pub(crate) analyzer: Arc<Analyzer>,
    pub(crate) pkg: Arc<Package>,
    pub(crate) deps: Vec<Arc<Action>>,
    pub(crate) is_root: AtomicBool,
    pub(crate) is_initial_pkg: bool,
    /// Dynamically promoted when cached facts fail to load. Written only
    /// in the loader's single-threaded inspection region; the executor
    /// reads strictly after the load phase joins.
    need_analyze_source: AtomicBool,
    pub(crate) done: Latch,

    registry: Arc<FactRegistry>,
    cache: Arc<dyn PackageCache>,
    prefix: Arc<str>,

    object_facts: Mutex<FxHashMap<(ObjectKey, TypeId), StoredObjectFact>>,
    package_facts: Mutex<FxHashMap<(String, TypeId), StoredPackageFact>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
    result: Mutex<Option<AnalyzerResult>>,
    error: Mutex<Option<Arc<ActionError>>>,
    pass_closed: AtomicBool,

    load_cached_facts_done: AtomicBool,
    load_cached_facts_ok: AtomicBool,
}

impl Action {
    pub(crate) fn new(
        analyzer: Arc<Analyzer>,
        pkg: Arc<Package>,
        deps: Vec<Arc<Action>>,
        is_initial_pkg: bool,
        registry: Arc<FactRegistry>,
        cache: Arc<dyn PackageCache>,
        prefix: Arc<str>,
    ) -> Action {
        Action {
            analyzer,
            pkg,
            deps,
            is_root: AtomicBool::new(false),
            is_initial_pkg,
            need_analyze_source: AtomicBool::new(is_initial_pkg),
            done: Latch::new(),
            registry,
            cache,
            prefix,
            object_facts: Mutex::new(FxHashMap::default()),
            package_facts: Mutex::new(FxHashMap::default()),
            diagnostics: Mutex::new(Vec::new()),
            result: Mutex::new(None),
            error: Mutex::new(None),
            pass_closed: AtomicBool::new(false),
            load_cached_facts_done: AtomicBool::new(false),
            load_cached_facts_ok: AtomicBool::new(false),
        }
    }

    pub(crate) fn needs_source(&self) -> bool {
        self.need_analyze_source.load(Ordering::Acquire)
    }

    pub(crate) fn mark_needs_source(&self) {
        self.need_analyze_source.store(true, Ordering::Release);
    }

    pub(crate) fn result(&self) -> Option<AnalyzerResult> {
        self.result
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn error(&self) -> Option<Arc<ActionError>> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_error(&self, err: ActionError) {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(err));
    }

    pub(crate) fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn facts_cache_key(&self) -> String {
        format!("{}/facts", self.analyzer.name)
    }

    /// Load cached facts once. Initial packages and fact-free analyzers
    /// trivially succeed; everything else reads the cache.
    pub(crate) fn load_cached_facts(&self) -> bool {
        if self.load_cached_facts_done.load(Ordering::Acquire) {
            return self.load_cached_facts_ok.load(Ordering::Acquire);
        }
        let ok = if self.is_initial_pkg {
            true
        } else if self.analyzer.fact_types.is_empty() {
            true
        } else {
            self.load_persisted_facts()
        };
        self.load_cached_facts_ok.store(ok, Ordering::Release);
        self.load_cached_facts_done.store(true, Ordering::Release);
        ok
    }

    /// Run the analyzer once all dependencies have completed.
    ///
    /// The caller is responsible for opening the done latch afterwards,
    /// panic or not.
    pub(crate) fn analyze(&self) {
        if !self.needs_source() {
            // Facts were already inherited from the cache.
            return;
        }

        for dep in &self.deps {
            dep.done.wait();
        }

        let started = debug_flags().timing.then(Instant::now);

        let mut failed: Vec<String> = self
            .deps
            .iter()
            .filter(|dep| dep.error().is_some())
            .map(|dep| dep.to_string())
            .collect();
        if !failed.is_empty() {
            failed.sort();
            self.set_error(ActionError::FailedPrerequisites(failed.join(", ")));
            return;
        }

        // Plumb dependency outputs into this action: in-memory results
        // along horizontal edges, facts along vertical edges.
        let mut inputs: FxHashMap<&'static str, AnalyzerResult> = FxHashMap::default();
        for dep in &self.deps {
            if Arc::ptr_eq(&dep.pkg, &self.pkg) {
                if let Some(result) = dep.result() {
                    inputs.insert(dep.analyzer.name, result);
                }
            } else if dep.analyzer.name == self.analyzer.name {
                self.inherit_facts(dep);
            }
        }

        let Some(universe) = self.pkg.types() else {
            self.set_error(ActionError::MissingTypes(self.pkg.path.clone()));
            return;
        };
        let syntax = self.pkg.syntax().unwrap_or_default();
        let type_info = self.pkg.type_info().unwrap_or_default();

        let pass = Pass::new(
            &self.analyzer,
            &self.pkg.fset,
            &syntax,
            &self.pkg.other_files,
            universe,
            type_info,
            self.pkg.type_sizes,
            &inputs,
            self,
        );

        let outcome = if self.pkg.ill_typed() && !self.analyzer.run_despite_errors {
            Err(ActionError::SkippedDueToErrors)
        } else {
            match (self.analyzer.run)(&pass) {
                Ok(result) => {
                    if self.analyzer.result_type.matches(&*result) {
                        Ok(result)
                    } else {
                        Err(ActionError::ResultTypeMismatch {
                            pkg: self.pkg.path.clone(),
                            analyzer: self.analyzer.name.to_string(),
                            want: self.analyzer.result_type.name,
                        })
                    }
                }
                Err(err) => Err(ActionError::Analyzer(err.to_string())),
            }
        };
        match outcome {
            Ok(result) => {
                *self.result.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
            }
            Err(err) => self.set_error(err),
        }

        // Fact exports from outside the analyzer's run are programmer
        // errors; close the pass so they panic.
        self.pass_closed.store(true, Ordering::Release);

        if let Some(started) = started {
            debug!(
                prefix = %self.prefix,
                analyzer = self.analyzer.name,
                pkg = %self.pkg.name,
                elapsed = ?started.elapsed(),
                "analyzed package"
            );
        }

        if let Err(err) = self.persist_facts_to_cache() {
            warn!("failed to persist facts to cache: {err}");
        }
    }

    /// Copy a vertical dependency's facts into this action, dropping
    /// object facts that are not visible through the dependency's export
    /// boundary. Package facts are inherited unfiltered.
    fn inherit_facts(&self, dep: &Action) {
        let sanity = debug_flags().sanity;
        let facts_debug = debug_flags().facts;

        let dep_object_facts = dep
            .object_facts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut object_facts = self
            .object_facts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for (key, stored) in dep_object_facts.iter() {
            if !exported_from(&stored.obj, &dep.pkg.path) {
                if facts_debug {
                    debug!(
                        action = %self,
                        object = %key.0,
                        fact = ?stored.fact,
                        "discarding fact not visible through export boundary"
                    );
                }
                continue;
            }
            let fact = if sanity {
                match code_fact(&stored.ty, stored.fact.as_ref()) {
                    Ok(fact) => fact,
                    Err(err) => panic!("internal error: {err} in {self}"),
                }
            } else {
                stored.ty.clone_fact(stored.fact.as_ref())
            };
            if facts_debug {
                debug!(action = %self, object = %key.0, fact = ?fact, "inherited fact");
            }
            object_facts.insert(
                key.clone(),
                StoredObjectFact {
                    obj: stored.obj.clone(),
                    ty: stored.ty,
                    fact,
                },
            );
        }
        drop(object_facts);
        drop(dep_object_facts);

        let dep_package_facts = dep
            .package_facts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut package_facts = self
            .package_facts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for (key, stored) in dep_package_facts.iter() {
            let fact = if sanity {
                match code_fact(&stored.ty, stored.fact.as_ref()) {
                    Ok(fact) => fact,
                    Err(err) => panic!("internal error: {err} in {self}"),
                }
            } else {
                stored.ty.clone_fact(stored.fact.as_ref())
            };
            if facts_debug {
                debug!(action = %self, pkg = %key.0, fact = ?fact, "inherited package fact");
            }
            package_facts.insert(
                key.clone(),
                StoredPackageFact {
                    ty: stored.ty,
                    fact,
                },
            );
        }
    }

    /// Write this action's own facts to the cache: package facts for this
    /// package, and object facts whose target both belongs to this
    /// package and has a computable object path.
    fn persist_facts_to_cache(&self) -> Result<(), CacheError> {
        if self.analyzer.fact_types.is_empty() {
            return Ok(());
        }

        let mut records: Vec<PersistedFact> = Vec::new();
        {
            let package_facts = self
                .package_facts
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for ((pkg_path, _), stored) in package_facts.iter() {
                if *pkg_path != self.pkg.path {
                    continue; // inherited from another package
                }
                let Ok(encoded) = self.encode_fact(&stored.ty, stored.fact.as_ref()) else {
                    continue;
                };
                records.push(PersistedFact {
                    path: String::new(),
                    ty: stored.ty.name.to_string(),
                    fact: encoded,
                });
            }
        }
        {
            let object_facts = self
                .object_facts
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for (_, stored) in object_facts.iter() {
                if stored.obj.pkg != self.pkg.path {
                    continue; // inherited from another package
                }
                let Some(path) = object_path_for(&stored.obj) else {
                    continue; // not globally addressable
                };
                let Ok(encoded) = self.encode_fact(&stored.ty, stored.fact.as_ref()) else {
                    continue;
                };
                records.push(PersistedFact {
                    path,
                    ty: stored.ty.name.to_string(),
                    fact: encoded,
                });
            }
        }
        records.sort_by(|a, b| (&a.path, &a.ty).cmp(&(&b.path, &b.ty)));

        if debug_flags().verbose {
            debug!(
                count = records.len(),
                pkg = %self.pkg.name,
                analyzer = self.analyzer.name,
                "caching facts"
            );
        }

        let bytes = serde_json::to_vec(&records)
            .map_err(|e| CacheError::Io(std::io::Error::other(e)))?;
        self.cache.put(&self.pkg.path, &self.facts_cache_key(), bytes)
    }

    fn encode_fact(
        &self,
        ty: &FactType,
        fact: &dyn Fact,
    ) -> Result<serde_json::Value, CacheError> {
        // Encoding failures are internal consistency bugs.
        let bytes = ty
            .encode(fact)
            .unwrap_or_else(|err| panic!("internal error: {err} in {self}"));
        serde_json::from_slice(&bytes).map_err(|e| CacheError::Io(std::io::Error::other(e)))
    }

    /// Read this action's persisted facts. Object paths that no longer
    /// resolve are skipped leniently: an object can exist in source but
    /// not in export data, and vice versa.
    fn load_persisted_facts(&self) -> bool {
        let bytes = match self.cache.get(&self.pkg.path, &self.facts_cache_key()) {
            Ok(bytes) => bytes,
            Err(CacheError::Missing) => {
                debug!(
                    pkg = %self.pkg.name,
                    analyzer = self.analyzer.name,
                    "no cached facts"
                );
                return false;
            }
            Err(err) => {
                warn!("failed to get persisted facts: {err}");
                return false;
            }
        };
        let records: Vec<PersistedFact> = match serde_json::from_slice(&bytes) {
            Ok(records) => records,
            Err(err) => {
                warn!("failed to decode persisted facts: {err}");
                return false;
            }
        };
        let Some(universe) = self.pkg.types() else {
            return false;
        };

        let mut loaded = 0usize;
        for record in records {
            let Some(ty) = self.registry.get(&record.ty).copied() else {
                // A fact type no analyzer registered this run.
                return false;
            };
            let encoded = match serde_json::to_vec(&record.fact) {
                Ok(encoded) => encoded,
                Err(_) => return false,
            };
            let Ok(fact) = ty.decode(&encoded) else {
                return false;
            };

            if record.path.is_empty() {
                self.package_facts
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(
                        (self.pkg.path.clone(), ty.id()),
                        StoredPackageFact { ty, fact },
                    );
            } else {
                let Some(obj) = universe.lookup(&record.path) else {
                    continue;
                };
                self.object_facts
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(
                        (obj.key(), ty.id()),
                        StoredObjectFact { obj, ty, fact },
                    );
            }
            loaded += 1;
        }
        debug!(
            loaded,
            pkg = %self.pkg.name,
            analyzer = self.analyzer.name,
            "loaded cached facts"
        );
        true
    }
}

/// Whether `obj` may be visible to a package importing `pkg`: exported
/// functions and variables of the package itself, methods and fields
/// regardless of export, and type names and constants always. A
/// permissive over-approximation of export-data reachability.
fn exported_from(obj: &Object, pkg: &str) -> bool {
    match &obj.kind {
        ObjectKind::Func { receiver } => (obj.exported && obj.pkg == pkg) || receiver.is_some(),
        ObjectKind::Var { is_field } => (obj.exported && obj.pkg == pkg) || *is_field,
        ObjectKind::TypeName | ObjectKind::Const => true,
        ObjectKind::Builtin | ObjectKind::PkgName | ObjectKind::Label => false,
    }
}

impl PassHost for Action {
    fn object_fact(&self, key: &ObjectKey, ty: TypeId) -> Option<Box<dyn Fact>> {
        let facts = self.object_facts.lock().unwrap_or_else(|e| e.into_inner());
        facts
            .get(&(key.clone(), ty))
            .map(|stored| stored.ty.clone_fact(stored.fact.as_ref()))
    }

    fn set_object_fact(&self, obj: &Object, fact: Box<dyn Fact>, ty: TypeId) {
        if self.pass_closed.load(Ordering::Acquire) {
            panic!(
                "{self}: export of {:?} fact for {} after the analyzer returned",
                fact, obj.path
            );
        }
        if obj.pkg != self.pkg.path {
            panic!(
                "internal error: in analysis {} of package {}: can't set facts on objects \
                 belonging to another package (object {} of package {})",
                self.analyzer.name, self.pkg.path, obj.path, obj.pkg
            );
        }
        let Some(fact_ty) = self.analyzer.fact_type_for(ty) else {
            panic!(
                "analyzer {} exports a fact type it does not declare",
                self.analyzer.name
            );
        };
        if debug_flags().facts {
            debug!(
                pos = %self.pkg.fset.position(obj.pos),
                object = %obj.path,
                fact = ?fact,
                "object fact recorded"
            );
        }
        self.object_facts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (obj.key(), ty),
                StoredObjectFact {
                    obj: Arc::new(obj.clone()),
                    ty: *fact_ty,
                    fact,
                },
            );
    }

    fn package_fact(&self, pkg_path: &str, ty: TypeId) -> Option<Box<dyn Fact>> {
        let facts = self.package_facts.lock().unwrap_or_else(|e| e.into_inner());
        facts
            .get(&(pkg_path.to_string(), ty))
            .map(|stored| stored.ty.clone_fact(stored.fact.as_ref()))
    }

    fn set_package_fact(&self, fact: Box<dyn Fact>, ty: TypeId) {
        if self.pass_closed.load(Ordering::Acquire) {
            panic!("{self}: export of {fact:?} package fact after the analyzer returned");
        }
        let Some(fact_ty) = self.analyzer.fact_type_for(ty) else {
            panic!(
                "analyzer {} exports a fact type it does not declare",
                self.analyzer.name
            );
        };
        if debug_flags().facts {
            debug!(pkg = %self.pkg.path, fact = ?fact, "package fact recorded");
        }
        self.package_facts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (self.pkg.path.clone(), ty),
                StoredPackageFact { ty: *fact_ty, fact },
            );
    }

    fn all_object_facts(&self) -> Vec<ObjectFact> {
        let facts = self.object_facts.lock().unwrap_or_else(|e| e.into_inner());
        facts
            .iter()
            .map(|((key, _), stored)| ObjectFact {
                object: key.clone(),
                fact: stored.ty.clone_fact(stored.fact.as_ref()),
            })
            .collect()
    }

    fn all_package_facts(&self) -> Vec<PackageFact> {
        let facts = self.package_facts.lock().unwrap_or_else(|e| e.into_inner());
        facts
            .iter()
            .map(|((pkg, _), stored)| PackageFact {
                package: pkg.clone(),
                fact: stored.ty.clone_fact(stored.fact.as_ref()),
            })
            .collect()
    }

    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(diagnostic);
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.analyzer.name, self.pkg.path)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("analyzer", &self.analyzer.name)
            .field("pkg", &self.pkg.path)
            .field("deps", &self.deps.len())
            .field("is_root", &self.is_root.load(Ordering::Relaxed))
            .finish()
    }
}
