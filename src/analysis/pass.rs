// src/analysis/pass.rs
//! The per-invocation context handed to an analyzer.

use std::any::{Any, TypeId};
use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::analyzer::{Analyzer, AnalyzerResult};
use super::diagnostic::Diagnostic;
use super::fact::Fact;
use crate::frontend::{FileSet, SourceFile};
use crate::sema::{Object, ObjectKey, TypeInfo, TypeSizes, Universe};

/// An (object, fact) pair from a pass's object-fact store.
#[derive(Debug)]
pub struct ObjectFact {
    pub object: ObjectKey,
    pub fact: Box<dyn Fact>,
}

/// A (package path, fact) pair from a pass's package-fact store.
#[derive(Debug)]
pub struct PackageFact {
    pub package: String,
    pub fact: Box<dyn Fact>,
}

/// The driver-side backing of a pass: fact stores and the diagnostic
/// sink. Implemented by the executor's action type.
pub trait PassHost: Send + Sync {
    /// A clone of the stored fact for (target, fact type), if any.
    fn object_fact(&self, key: &ObjectKey, ty: TypeId) -> Option<Box<dyn Fact>>;
    /// Store or clobber. Panics if the pass is closed or the object
    /// belongs to another package.
    fn set_object_fact(&self, obj: &Object, fact: Box<dyn Fact>, ty: TypeId);
    fn package_fact(&self, pkg_path: &str, ty: TypeId) -> Option<Box<dyn Fact>>;
    /// Store or clobber on the pass's own package. Panics if closed.
    fn set_package_fact(&self, fact: Box<dyn Fact>, ty: TypeId);
    fn all_object_facts(&self) -> Vec<ObjectFact>;
    fn all_package_facts(&self) -> Vec<PackageFact>;
    fn report(&self, diagnostic: Diagnostic);
}

/// Everything one analyzer invocation may see and do.
pub struct Pass<'a> {
    pub analyzer: &'a Analyzer,
    pub fset: &'a FileSet,
    pub files: &'a [SourceFile],
    pub other_files: &'a [PathBuf],
    pub pkg: Arc<Universe>,
    pub type_info: Arc<TypeInfo>,
    pub type_sizes: TypeSizes,
    inputs: &'a FxHashMap<&'static str, AnalyzerResult>,
    host: &'a dyn PassHost,
}

impl<'a> Pass<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        analyzer: &'a Analyzer,
        fset: &'a FileSet,
        files: &'a [SourceFile],
        other_files: &'a [PathBuf],
        pkg: Arc<Universe>,
        type_info: Arc<TypeInfo>,
        type_sizes: TypeSizes,
        inputs: &'a FxHashMap<&'static str, AnalyzerResult>,
        host: &'a dyn PassHost,
    ) -> Self {
        Pass {
            analyzer,
            fset,
            files,
            other_files,
            pkg,
            type_info,
            type_sizes,
            inputs,
            host,
        }
    }

    /// The result of a required analyzer on this package, downcast to
    /// its declared type.
    pub fn result_of<T: Any + Send + Sync>(&self, analyzer: &Analyzer) -> Option<Arc<T>> {
        self.inputs
            .get(analyzer.name)
            .and_then(|r| r.clone().downcast::<T>().ok())
    }

    /// Record a diagnostic against this pass's package.
    pub fn report(&self, diagnostic: Diagnostic) {
        self.host.report(diagnostic);
    }

    /// True iff a fact of type `F` exists for the object identified by
    /// `obj`; copies it into `*out`. Objects are identified by their
    /// (owning package, object path) key, the same identity type info
    /// records carry, so facts about imported objects are reachable
    /// without that package's universe in hand.
    pub fn import_object_fact<F: Fact + Clone>(&self, obj: &ObjectKey, out: &mut F) -> bool {
        match self.host.object_fact(obj, TypeId::of::<F>()) {
            Some(fact) => {
                match fact.as_any().downcast_ref::<F>() {
                    Some(fact) => *out = fact.clone(),
                    None => return false,
                }
                true
            }
            None => false,
        }
    }

    /// Attach a fact to an object of this pass's package.
    ///
    /// Panics if the pass has finished running, if `obj` belongs to
    /// another package, or if `F` is not among the analyzer's declared
    /// fact types.
    pub fn export_object_fact<F: Fact>(&self, obj: &Object, fact: F) {
        self.declared(TypeId::of::<F>());
        self.host.set_object_fact(obj, Box::new(fact), TypeId::of::<F>());
    }

    /// The package-scoped analog of [`Pass::import_object_fact`];
    /// packages are identified by import path.
    pub fn import_package_fact<F: Fact + Clone>(&self, pkg_path: &str, out: &mut F) -> bool {
        match self.host.package_fact(pkg_path, TypeId::of::<F>()) {
            Some(fact) => {
                match fact.as_any().downcast_ref::<F>() {
                    Some(fact) => *out = fact.clone(),
                    None => return false,
                }
                true
            }
            None => false,
        }
    }

    /// Attach a fact to this pass's own package. Same panics as
    /// [`Pass::export_object_fact`].
    pub fn export_package_fact<F: Fact>(&self, fact: F) {
        self.declared(TypeId::of::<F>());
        self.host.set_package_fact(Box::new(fact), TypeId::of::<F>());
    }

    pub fn all_object_facts(&self) -> Vec<ObjectFact> {
        self.host.all_object_facts()
    }

    pub fn all_package_facts(&self) -> Vec<PackageFact> {
        self.host.all_package_facts()
    }

    fn declared(&self, id: TypeId) {
        if self.analyzer.fact_type_for(id).is_none() {
            panic!(
                "analyzer {} exports a fact type it does not declare",
                self.analyzer.name
            );
        }
    }
}
