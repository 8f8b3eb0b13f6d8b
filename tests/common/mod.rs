// tests/common/mod.rs
//! Shared fixtures for the driver scenario tests: on-disk package
//! construction (sources plus export data) and a small set of test
//! analyzers.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use ferret::analysis::{
    Analyzer, Diagnostic, Fact, FactType, ResultType, unit_result,
};
use ferret::frontend::{FileSet, Parser};
use ferret::package::Package;
use ferret::sema::{self, ImportError, Universe};

/// Route driver logs through the test harness when `FERRET_TEST_LOG`
/// is set, e.g. `FERRET_TEST_LOG=ferret=debug`.
pub fn init_test_logging() {
    if let Ok(filter) = std::env::var("FERRET_TEST_LOG") {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub fset: Arc<FileSet>,
    /// Universes computed for export-data generation, keyed by package
    /// path. Build dependencies before their importers.
    universes: RefCell<HashMap<String, Arc<Universe>>>,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture {
            dir: tempfile::tempdir().expect("tempdir"),
            fset: Arc::new(FileSet::new()),
            universes: RefCell::new(HashMap::new()),
        }
    }

    pub fn package(&self, path: &str, name: &str) -> PackageBuilder<'_> {
        PackageBuilder {
            fixture: self,
            path: path.to_string(),
            name: name.to_string(),
            sources: Vec::new(),
            compiled_files: Vec::new(),
            imports: Vec::new(),
            export_data: false,
        }
    }

    /// Write a standalone source file, for sharing one file between
    /// packages.
    pub fn write_file(&self, name: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, text).expect("write source file");
        path
    }
}

pub struct PackageBuilder<'a> {
    fixture: &'a Fixture,
    path: String,
    name: String,
    sources: Vec<(String, String)>,
    compiled_files: Vec<PathBuf>,
    imports: Vec<Arc<Package>>,
    export_data: bool,
}

impl PackageBuilder<'_> {
    pub fn source(mut self, file_name: &str, text: &str) -> Self {
        self.sources.push((file_name.to_string(), text.to_string()));
        self
    }

    /// Add an already-written file to the package's compiled files.
    pub fn compiled_file(mut self, path: PathBuf) -> Self {
        self.compiled_files.push(path);
        self
    }

    pub fn import(mut self, pkg: &Arc<Package>) -> Self {
        self.imports.push(pkg.clone());
        self
    }

    /// Emit export data for this package, as the build system would.
    pub fn export_data(mut self) -> Self {
        self.export_data = true;
        self
    }

    pub fn build(self) -> Arc<Package> {
        let pkg_dir = self.fixture.dir.path().join(self.path.replace('/', "_"));
        std::fs::create_dir_all(&pkg_dir).expect("package dir");

        let mut files = Vec::new();
        for (name, text) in &self.sources {
            let path = pkg_dir.join(name);
            std::fs::write(&path, text).expect("write source");
            files.push(path);
        }
        files.extend(self.compiled_files.iter().cloned());

        // Compute the package's universe the way a compiler would, so
        // export data can be emitted ahead of the run. Uses a scratch
        // file set; the driver's own load starts from a clean slate.
        let scratch = FileSet::new();
        let mut parsed = Vec::new();
        let mut ids = 0u32;
        for path in &files {
            let text = std::fs::read_to_string(path).expect("read source");
            let (file_id, base) = scratch.add_file(path, &text);
            if let Ok(file) = Parser::parse(&text, path, file_id, base, &mut ids) {
                parsed.push(file);
            }
        }
        let known = self.fixture.universes.borrow().clone();
        let importer = move |p: &str| -> Result<Arc<Universe>, ImportError> {
            if p == sema::INTRINSICS_PATH {
                return Ok(sema::intrinsics());
            }
            known
                .get(p)
                .cloned()
                .ok_or_else(|| ImportError::NotFound(p.to_string()))
        };
        let (universe, _, _) = sema::check(&self.path, &self.name, &parsed, &importer);
        self.fixture
            .universes
            .borrow_mut()
            .insert(self.path.clone(), universe.clone());

        let export_file = self.export_data.then(|| {
            let path = pkg_dir.join("export.fx");
            sema::export_data::write(&path, &universe).expect("write export data");
            path
        });

        let mut pkg = Package::new(self.path, self.name, self.fixture.fset.clone());
        for imp in self.imports {
            pkg.imports.insert(imp.path.clone(), imp);
        }
        pkg.compiled_files = files;
        pkg.export_file = export_file;
        Arc::new(pkg)
    }
}

// ---------------------------------------------------------------------
// Test analyzers
// ---------------------------------------------------------------------

/// Reports one diagnostic per exported top-level declaration.
pub fn export_reporter(name: &'static str) -> Arc<Analyzer> {
    export_reporter_with(name, false)
}

pub fn export_reporter_with(name: &'static str, run_despite_errors: bool) -> Arc<Analyzer> {
    Arc::new(Analyzer {
        name,
        doc: "reports exported declarations",
        requires: vec![],
        fact_types: vec![],
        run_despite_errors,
        result_type: ResultType::unit(),
        run: Box::new(|pass| {
            for file in pass.files {
                for decl in &file.decls {
                    if decl.exported {
                        pass.report(Diagnostic::new(
                            decl.span.start,
                            format!("exported declaration {}", decl.name),
                        ));
                    }
                }
            }
            Ok(unit_result())
        }),
    })
}

/// Does nothing but count its source invocations.
pub fn counting_analyzer(name: &'static str, runs: Arc<AtomicUsize>) -> Arc<Analyzer> {
    Arc::new(Analyzer {
        name,
        doc: "counts invocations",
        requires: vec![],
        fact_types: vec![],
        run_despite_errors: false,
        result_type: ResultType::unit(),
        run: Box::new(move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(unit_result())
        }),
    })
}

/// Counts a package's declarations; its result feeds dependents.
pub fn decl_counter(name: &'static str) -> Arc<Analyzer> {
    Arc::new(Analyzer {
        name,
        doc: "counts declarations",
        requires: vec![],
        fact_types: vec![],
        run_despite_errors: false,
        result_type: ResultType::of::<usize>(),
        run: Box::new(|pass| {
            let count: usize = pass.files.iter().map(|f| f.decls.len()).sum();
            Ok(Arc::new(count))
        }),
    })
}

/// Requires `counter` and reports its in-memory result.
pub fn count_reporter(name: &'static str, counter: &Arc<Analyzer>) -> Arc<Analyzer> {
    let required = counter.clone();
    Arc::new(Analyzer {
        name,
        doc: "reports the declaration count computed by its requirement",
        requires: vec![counter.clone()],
        fact_types: vec![],
        run_despite_errors: false,
        result_type: ResultType::unit(),
        run: Box::new(move |pass| {
            let count = pass.result_of::<usize>(&required).map(|n| *n).unwrap_or(0);
            if let Some(file) = pass.files.first() {
                pass.report(Diagnostic::new(
                    file.package_pos,
                    format!("package declares {count} items"),
                ));
            }
            Ok(unit_result())
        }),
    })
}

/// Package fact carrying the length of the longest import chain below a
/// package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainDepth {
    pub depth: u32,
}

impl Fact for ChainDepth {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub fn chain_depth_type() -> FactType {
    FactType::of::<ChainDepth>("chain_depth")
}

/// Propagates [`ChainDepth`] package facts up the import graph and
/// reports the depth at the package clause. `runs` counts source
/// invocations, so tests can observe cache-driven skips.
pub fn chain_analyzer(name: &'static str, runs: Arc<AtomicUsize>) -> Arc<Analyzer> {
    Arc::new(Analyzer {
        name,
        doc: "propagates chain depth through package facts",
        requires: vec![],
        fact_types: vec![chain_depth_type()],
        run_despite_errors: false,
        result_type: ResultType::unit(),
        run: Box::new(move |pass| {
            runs.fetch_add(1, Ordering::SeqCst);
            let mut depth = 0u32;
            for file in pass.files {
                for imp in &file.imports {
                    let mut chain = ChainDepth::default();
                    if pass.import_package_fact(&imp.path, &mut chain) {
                        depth = depth.max(chain.depth);
                    }
                }
            }
            pass.export_package_fact(ChainDepth { depth: depth + 1 });
            if let Some(file) = pass.files.first() {
                pass.report(Diagnostic::new(
                    file.package_pos,
                    format!("chain depth {}", depth + 1),
                ));
            }
            Ok(unit_result())
        }),
    })
}

/// Object fact marking exported functions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flagged {
    pub note: String,
}

impl Fact for Flagged {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub fn flagged_type() -> FactType {
    FactType::of::<Flagged>("flagged")
}

/// Flags every exported function of its own package and reports each
/// referenced imported object that carries a flag.
pub fn flagger(name: &'static str) -> Arc<Analyzer> {
    Arc::new(Analyzer {
        name,
        doc: "flags exported functions and reports flagged references",
        requires: vec![],
        fact_types: vec![flagged_type()],
        run_despite_errors: false,
        result_type: ResultType::unit(),
        run: Box::new(|pass| {
            for file in pass.files {
                for decl in &file.decls {
                    if decl.exported {
                        if let Some(obj) = pass.pkg.lookup(&decl.name) {
                            if matches!(
                                obj.kind,
                                ferret::sema::ObjectKind::Func { receiver: None }
                            ) {
                                pass.export_object_fact(
                                    &obj,
                                    Flagged {
                                        note: decl.name.clone(),
                                    },
                                );
                            }
                        }
                    }
                }
            }

            let mut findings = Vec::new();
            for key in pass.type_info.uses.values() {
                if key.pkg == pass.pkg.path() {
                    continue;
                }
                let mut flag = Flagged::default();
                if pass.import_object_fact(key, &mut flag) {
                    findings.push(format!("{key} is flagged"));
                }
            }
            findings.sort();
            findings.dedup();
            if let Some(file) = pass.files.first() {
                for finding in findings {
                    pass.report(Diagnostic::new(file.package_pos, finding));
                }
            }
            Ok(unit_result())
        }),
    })
}
