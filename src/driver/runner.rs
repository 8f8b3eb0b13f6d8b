// src/driver/runner.rs
//! The driver entry point: builds the action DAG, loads packages and
//! facts, executes actions in parallel and extracts diagnostics.

use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::debug;

use super::action::{Action, ActionError};
use super::debug::debug_flags;
use super::loader::{LoadError, LoadGuard, LoadingPackage};
use super::sync::Semaphore;
use crate::analysis::{self, Analyzer, FactRegistry};
use crate::cache::PackageCache;
use crate::errors::PanicError;
use crate::frontend::Position;
use crate::package::Package;

/// A diagnostic as returned to the caller: the analyzer's finding, the
/// analyzer that produced it, and its resolved position.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub diagnostic: analysis::Diagnostic,
    pub analyzer: Arc<Analyzer>,
    pub position: Position,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to load package {pkg}: {source}")]
    Load {
        pkg: String,
        #[source]
        source: LoadError,
    },
    #[error("{analyzer}: {err}")]
    Action {
        analyzer: String,
        err: Arc<ActionError>,
    },
}

pub struct Runner {
    /// Distinguishes drivers sharing one log stream; analyzer names are
    /// only unique within a driver.
    prefix: Arc<str>,
    cache: Arc<dyn PackageCache>,
    load_guard: Arc<LoadGuard>,
}

impl Runner {
    pub fn new(
        prefix: impl Into<Arc<str>>,
        cache: Arc<dyn PackageCache>,
        load_guard: Arc<LoadGuard>,
    ) -> Runner {
        Runner {
            prefix: prefix.into(),
            cache,
            load_guard,
        }
    }

    /// Apply `analyzers` to `initial_packages` and collect diagnostics
    /// and errors. The cache is trimmed on the way out.
    pub fn run(
        &self,
        analyzers: &[Arc<Analyzer>],
        initial_packages: &[Arc<Package>],
    ) -> (Vec<Diagnostic>, Vec<RunError>) {
        let result = match self.analyze(analyzers, initial_packages) {
            Ok(roots) => extract_diagnostics(&roots),
            Err(err) => (Vec::new(), vec![err]),
        };
        self.cache.trim();
        result
    }

    /// Construct the action graph, load every package it references,
    /// then execute it. Returns the root actions.
    ///
    /// Each graph node (action) is one unit of analysis. Edges express
    /// analyzer-to-analyzer (horizontal) dependencies within a package,
    /// and package-to-package (vertical) dependencies for analyzers with
    /// facts.
    fn analyze(
        &self,
        analyzers: &[Arc<Analyzer>],
        initial_packages: &[Arc<Package>],
    ) -> Result<Vec<Arc<Action>>, RunError> {
        let initial: FxHashSet<String> = initial_packages
            .iter()
            .map(|pkg| pkg.path.clone())
            .collect();

        let (roots, all_actions) = self.build_actions(analyzers, initial_packages, &initial);

        self.load_packages_and_facts(&all_actions, &initial)?;
        run_actions(&all_actions);

        Ok(roots)
    }

    /// Build the action DAG: one root per (analyzer, initial package),
    /// the full action set in creation order.
    fn build_actions(
        &self,
        analyzers: &[Arc<Analyzer>],
        initial_packages: &[Arc<Package>],
        initial: &FxHashSet<String>,
    ) -> (Vec<Arc<Action>>, Vec<Arc<Action>>) {
        let mut builder = Builder {
            actions: FxHashMap::default(),
            order: Vec::new(),
            initial,
            registry: Arc::new(build_fact_registry(analyzers)),
            cache: self.cache.clone(),
            prefix: self.prefix.clone(),
        };

        let mut roots = Vec::new();
        for analyzer in analyzers {
            for pkg in initial_packages {
                let root = builder.mk_action(analyzer, pkg);
                root.is_root.store(true, Ordering::Release);
                roots.push(root);
            }
        }
        (roots, builder.order)
    }

    /// Launch one loading task per package reachable from the actions.
    /// Any package error fails the load with the first error collected;
    /// the other tasks still run to completion.
    fn load_packages_and_facts(
        &self,
        actions: &[Arc<Action>],
        initial: &FxHashSet<String>,
    ) -> Result<(), RunError> {
        let started = Instant::now();

        let mut action_per_pkg: FxHashMap<String, Vec<Arc<Action>>> = FxHashMap::default();
        for act in actions {
            action_per_pkg
                .entry(act.pkg.path.clone())
                .or_default()
                .push(act.clone());
        }

        let mut loading: FxHashMap<String, Arc<LoadingPackage>> = FxHashMap::default();
        for act in actions {
            build_loading_package(
                &act.pkg,
                initial,
                &mut action_per_pkg,
                &mut loading,
                &self.load_guard,
            );
        }

        // Limit I/O to the host's effective parallelism.
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let sem = Semaphore::new(parallelism);
        let errors: Mutex<Vec<RunError>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for lp in loading.values() {
                let sem = &sem;
                let errors = &errors;
                scope.spawn(move || {
                    lp.wait_until_imports_loaded();
                    let _permit = sem.acquire();
                    let result = lp.load_with_facts();
                    lp.done.open();
                    if let Err(err) = result {
                        errors.lock().unwrap_or_else(|e| e.into_inner()).push(
                            RunError::Load {
                                pkg: lp.pkg.name.clone(),
                                source: err,
                            },
                        );
                    }
                });
            }
        });

        debug!(elapsed = ?started.elapsed(), "loaded packages and facts");

        let mut errors = errors.into_inner().unwrap_or_else(|e| e.into_inner());
        match errors.is_empty() {
            true => Ok(()),
            false => Err(errors.remove(0)),
        }
    }
}

struct Builder<'a> {
    actions: FxHashMap<(&'static str, String), Arc<Action>>,
    order: Vec<Arc<Action>>,
    initial: &'a FxHashSet<String>,
    registry: Arc<FactRegistry>,
    cache: Arc<dyn PackageCache>,
    prefix: Arc<str>,
}

impl Builder<'_> {
    /// One action per (analyzer, package), deduplicated. Dependencies:
    /// the required analyzers on the same package and, for analyzers
    /// with facts, the same analyzer on every direct import. The import
    /// map is ordered, so the graph is structurally deterministic.
    fn mk_action(&mut self, analyzer: &Arc<Analyzer>, pkg: &Arc<Package>) -> Arc<Action> {
        let key = (analyzer.name, pkg.path.clone());
        if let Some(act) = self.actions.get(&key) {
            return act.clone();
        }

        let mut deps = Vec::new();
        for req in &analyzer.requires {
            deps.push(self.mk_action(req, pkg));
        }
        if !analyzer.fact_types.is_empty() {
            // An analyzer that consumes or produces facts must run on
            // the package's dependencies too.
            for imp in pkg.imports.values() {
                deps.push(self.mk_action(analyzer, imp));
            }
        }

        let act = Arc::new(Action::new(
            analyzer.clone(),
            pkg.clone(),
            deps,
            self.initial.contains(&pkg.path),
            self.registry.clone(),
            self.cache.clone(),
            self.prefix.clone(),
        ));
        self.actions.insert(key, act.clone());
        self.order.push(act.clone());
        act
    }
}

/// Register every fact type reachable through the analyzers' transitive
/// requirements, so persisted facts can round-trip.
fn build_fact_registry(analyzers: &[Arc<Analyzer>]) -> FactRegistry {
    let mut registry = FactRegistry::new();
    let mut seen: FxHashSet<&'static str> = FxHashSet::default();
    let mut queue: Vec<Arc<Analyzer>> = analyzers.to_vec();
    while let Some(analyzer) = queue.pop() {
        if !seen.insert(analyzer.name) {
            continue;
        }
        for ty in &analyzer.fact_types {
            registry.register(*ty);
        }
        queue.extend(analyzer.requires.iter().cloned());
    }
    registry
}

fn build_loading_package(
    pkg: &Arc<Package>,
    initial: &FxHashSet<String>,
    action_per_pkg: &mut FxHashMap<String, Vec<Arc<Action>>>,
    loading: &mut FxHashMap<String, Arc<LoadingPackage>>,
    guard: &Arc<LoadGuard>,
) -> Arc<LoadingPackage> {
    if let Some(lp) = loading.get(&pkg.path) {
        return lp.clone();
    }
    let imports = pkg
        .imports
        .values()
        .map(|imp| build_loading_package(imp, initial, action_per_pkg, loading, guard))
        .collect();
    let lp = Arc::new(LoadingPackage::new(
        pkg.clone(),
        imports,
        initial.contains(&pkg.path),
        action_per_pkg.remove(&pkg.path).unwrap_or_default(),
        guard.clone(),
    ));
    loading.insert(pkg.path.clone(), lp.clone());
    lp
}

/// Execute the graph. Every task fires its action's done latch whether
/// the action ran, was skipped or panicked; panics are captured with
/// context and the first is re-raised once all actions have settled.
fn run_actions(actions: &[Arc<Action>]) {
    debug!(count = actions.len(), "running actions");
    let panics: Mutex<Vec<PanicError>> = Mutex::new(Vec::new());

    let run_one = |act: &Arc<Action>| {
        let result = panic::catch_unwind(AssertUnwindSafe(|| act.analyze()));
        act.done.open();
        if let Err(payload) = result {
            let context = format!(
                "{}: package {:?} (initial: {}, needs source: {})",
                act.analyzer.name,
                act.pkg.name,
                act.is_initial_pkg,
                act.needs_source(),
            );
            panics.lock().unwrap_or_else(|e| e.into_inner()).push(PanicError::new(
                context,
                payload.as_ref(),
                Backtrace::force_capture().to_string(),
            ));
        }
    };

    if debug_flags().no_parallel {
        // Dependency-first walk; latches are already open by the time a
        // dependent runs.
        let mut visited: FxHashSet<*const Action> = FxHashSet::default();
        let mut stack: Vec<(Arc<Action>, bool)> = actions
            .iter()
            .rev()
            .map(|act| (act.clone(), false))
            .collect();
        while let Some((act, ready)) = stack.pop() {
            if ready {
                run_one(&act);
                continue;
            }
            if !visited.insert(Arc::as_ptr(&act)) {
                continue;
            }
            stack.push((act.clone(), true));
            for dep in &act.deps {
                stack.push((dep.clone(), false));
            }
        }
    } else {
        std::thread::scope(|scope| {
            for act in actions {
                let run_one = &run_one;
                scope.spawn(move || run_one(act));
            }
        });
    }

    let panics = panics.into_inner().unwrap_or_else(|e| e.into_inner());
    if let Some(first) = panics.into_iter().next() {
        panic!("{first}");
    }
}

/// Post-order traversal of the roots: wrap action errors with the
/// analyzer name, emit root diagnostics, deduplicating by resolved
/// position, analyzer and message. A file may belong to more than one
/// package, and the same diagnostic would otherwise appear twice.
fn extract_diagnostics(roots: &[Arc<Action>]) -> (Vec<Diagnostic>, Vec<RunError>) {
    let mut extractor = Extractor {
        visited: FxHashSet::default(),
        seen: FxHashSet::default(),
        diagnostics: Vec::new(),
        errors: Vec::new(),
    };
    extractor.visit_all(roots);
    (extractor.diagnostics, extractor.errors)
}

struct Extractor {
    visited: FxHashSet<*const Action>,
    seen: FxHashSet<(Position, &'static str, String)>,
    diagnostics: Vec<Diagnostic>,
    errors: Vec<RunError>,
}

impl Extractor {
    fn visit_all(&mut self, actions: &[Arc<Action>]) {
        for act in actions {
            if self.visited.insert(Arc::as_ptr(act)) {
                self.visit_all(&act.deps);
                self.extract(act);
            }
        }
    }

    fn extract(&mut self, act: &Arc<Action>) {
        if let Some(err) = act.error() {
            self.errors.push(RunError::Action {
                analyzer: act.analyzer.name.to_string(),
                err,
            });
            return;
        }
        if !act.is_root.load(Ordering::Acquire) {
            return;
        }
        for diagnostic in act.diagnostics() {
            let position = act.pkg.fset.position(diagnostic.pos);
            let key = (
                position.clone(),
                act.analyzer.name,
                diagnostic.message.clone(),
            );
            if !self.seen.insert(key) {
                continue; // duplicate
            }
            self.diagnostics.push(Diagnostic {
                diagnostic,
                analyzer: act.analyzer.clone(),
                position,
            });
        }
    }
}

/// Whether any analysis in the set, or required by it, uses facts. If
/// so, the caller must load the entire import transitive closure.
pub fn need_facts(analyzers: &[Arc<Analyzer>]) -> bool {
    let mut seen: FxHashSet<&'static str> = FxHashSet::default();
    let mut queue: std::collections::VecDeque<Arc<Analyzer>> =
        analyzers.iter().cloned().collect();
    while let Some(analyzer) = queue.pop_front() {
        if !seen.insert(analyzer.name) {
            continue;
        }
        if !analyzer.fact_types.is_empty() {
            return true;
        }
        queue.extend(analyzer.requires.iter().cloned());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FactType, ResultType, unit_result};
    use serde::{Deserialize, Serialize};

    fn analyzer(
        name: &'static str,
        requires: Vec<Arc<Analyzer>>,
        fact_types: Vec<FactType>,
    ) -> Arc<Analyzer> {
        Arc::new(Analyzer {
            name,
            doc: "",
            requires,
            fact_types,
            run_despite_errors: false,
            result_type: ResultType::unit(),
            run: Box::new(|_| Ok(unit_result())),
        })
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct SomeFact;

    impl crate::analysis::Fact for SomeFact {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn need_facts_walks_transitive_requires() {
        let leaf = analyzer("leaf", vec![], vec![FactType::of::<SomeFact>("some")]);
        let mid = analyzer("mid", vec![leaf], vec![]);
        let top = analyzer("top", vec![mid], vec![]);
        assert!(need_facts(&[top]));

        let plain = analyzer("plain", vec![], vec![]);
        let wrapper = analyzer("wrapper", vec![plain], vec![]);
        assert!(!need_facts(&[wrapper]));
    }

    #[test]
    fn fact_registry_covers_required_analyzers() {
        let leaf = analyzer("leaf", vec![], vec![FactType::of::<SomeFact>("some")]);
        let top = analyzer("top", vec![leaf], vec![]);
        let registry = build_fact_registry(&[top]);
        assert!(registry.get("some").is_some());
    }

    use crate::cache::MemoryCache;
    use crate::frontend::FileSet;

    fn runner() -> Runner {
        Runner::new(
            "test",
            Arc::new(MemoryCache::new()),
            Arc::new(LoadGuard::new()),
        )
    }

    fn package(path: &str, imports: &[&Arc<Package>]) -> Arc<Package> {
        let mut pkg = Package::new(path, path, Arc::new(FileSet::new()));
        for imp in imports {
            pkg.imports.insert(imp.path.clone(), (*imp).clone());
        }
        Arc::new(pkg)
    }

    fn graph(
        analyzers: &[Arc<Analyzer>],
        initial_packages: &[Arc<Package>],
    ) -> (Vec<Arc<Action>>, Vec<Arc<Action>>) {
        let initial: FxHashSet<String> = initial_packages
            .iter()
            .map(|p| p.path.clone())
            .collect();
        runner().build_actions(analyzers, initial_packages, &initial)
    }

    fn find<'a>(
        actions: &'a [Arc<Action>],
        analyzer: &str,
        pkg: &str,
    ) -> &'a Arc<Action> {
        actions
            .iter()
            .find(|a| a.analyzer.name == analyzer && a.pkg.path == pkg)
            .expect("action exists")
    }

    #[test]
    fn fact_free_analyzer_gets_no_edges() {
        let a = analyzer("a", vec![], vec![]);
        let p2 = package("p2", &[]);
        let p1 = package("p1", &[&p2]);

        let (roots, all) = graph(&[a], &[p1, p2]);

        assert_eq!(all.len(), 2);
        assert_eq!(roots.len(), 2);
        for act in &all {
            assert!(act.deps.is_empty());
            assert!(act.is_root.load(Ordering::Relaxed));
        }
    }

    #[test]
    fn fact_analyzer_spans_the_import_chain() {
        let f = analyzer("f", vec![], vec![FactType::of::<SomeFact>("some")]);
        let leaf = package("leaf", &[]);
        let mid = package("mid", &[&leaf]);
        let root = package("root", &[&mid]);

        let (roots, all) = graph(&[f], &[root]);

        assert_eq!(all.len(), 3);
        assert_eq!(roots.len(), 1);

        let f_root = find(&all, "f", "root");
        let f_mid = find(&all, "f", "mid");
        let f_leaf = find(&all, "f", "leaf");

        assert!(f_root.deps.iter().any(|d| Arc::ptr_eq(d, f_mid)));
        assert!(f_mid.deps.iter().any(|d| Arc::ptr_eq(d, f_leaf)));
        assert!(f_leaf.deps.is_empty());

        assert!(f_root.is_root.load(Ordering::Relaxed));
        assert!(!f_mid.is_root.load(Ordering::Relaxed));
        assert!(!f_leaf.is_root.load(Ordering::Relaxed));
        assert!(f_root.is_initial_pkg && f_root.needs_source());
        assert!(!f_mid.is_initial_pkg && !f_mid.needs_source());
    }

    #[test]
    fn required_analyzers_become_dependencies_on_the_same_package() {
        let b = analyzer("b", vec![], vec![]);
        let c = analyzer("c", vec![b.clone()], vec![]);
        let p = package("p", &[]);

        let (roots, all) = graph(&[c], &[p]);

        assert_eq!(all.len(), 2);
        assert_eq!(roots.len(), 1);
        let c_p = find(&all, "c", "p");
        let b_p = find(&all, "b", "p");
        assert!(c_p.deps.iter().any(|d| Arc::ptr_eq(d, b_p)));
        assert!(!b_p.is_root.load(Ordering::Relaxed));
    }

    #[test]
    fn transitive_requires_are_reachable_and_deduplicated() {
        let base = analyzer("base", vec![], vec![]);
        let left = analyzer("left", vec![base.clone()], vec![]);
        let right = analyzer("right", vec![base.clone()], vec![]);
        let top = analyzer("top", vec![left, right], vec![]);
        let p = package("p", &[]);

        let (_, all) = graph(&[top], &[p]);

        // top, left, right, base — base created once despite two edges.
        assert_eq!(all.len(), 4);
        let top_p = find(&all, "top", "p");
        let base_p = find(&all, "base", "p");

        // base is reachable from top through either branch.
        let mut stack = vec![top_p.clone()];
        let mut reachable = false;
        while let Some(act) = stack.pop() {
            if Arc::ptr_eq(&act, base_p) {
                reachable = true;
                break;
            }
            stack.extend(act.deps.iter().cloned());
        }
        assert!(reachable);
    }

    #[test]
    fn actions_are_deduplicated_across_roots() {
        let f = analyzer("f", vec![], vec![FactType::of::<SomeFact>("some")]);
        let shared = package("shared", &[]);
        let p1 = package("p1", &[&shared]);
        let p2 = package("p2", &[&shared]);

        let (_, all) = graph(&[f], &[p1, p2, shared.clone()]);

        // (f,p1), (f,p2), (f,shared) — shared appears once.
        assert_eq!(all.len(), 3);
        let f_shared = find(&all, "f", "shared");
        assert!(f_shared.is_root.load(Ordering::Relaxed));
        assert!(f_shared.is_initial_pkg);
    }
}
