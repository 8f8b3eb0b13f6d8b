// src/analysis/analyzer.rs
//! The analyzer contract: what the driver knows about a static analysis.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use super::fact::FactType;
use super::pass::Pass;

/// The value an analyzer computes for one package, shared with the
/// analyzers that require it.
pub type AnalyzerResult = Arc<dyn Any + Send + Sync>;

pub type AnalyzerError = Box<dyn std::error::Error + Send + Sync>;

pub type RunFn = Box<dyn Fn(&Pass<'_>) -> Result<AnalyzerResult, AnalyzerError> + Send + Sync>;

/// Runtime descriptor of an analyzer's declared result type. The
/// executor verifies each result's dynamic type against it.
#[derive(Clone, Copy)]
pub struct ResultType {
    pub name: &'static str,
    id: TypeId,
}

impl ResultType {
    pub fn of<T: Any + Send + Sync>() -> Self {
        ResultType {
            name: std::any::type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    /// For analyzers computed only for their facts or diagnostics.
    pub fn unit() -> Self {
        Self::of::<()>()
    }

    pub fn matches(&self, value: &(dyn Any + Send + Sync)) -> bool {
        value.type_id() == self.id
    }
}

impl fmt::Debug for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultType({})", self.name)
    }
}

/// The unit result, for analyzers declaring `ResultType::unit()`.
pub fn unit_result() -> AnalyzerResult {
    Arc::new(())
}

/// A pluggable static analysis. Identity is the (unique) name.
pub struct Analyzer {
    pub name: &'static str,
    pub doc: &'static str,
    /// Analyzers whose results this one consumes; they run first on the
    /// same package.
    pub requires: Vec<Arc<Analyzer>>,
    /// Fact types this analyzer may read or write. Non-empty fact types
    /// extend the action graph over package imports.
    pub fact_types: Vec<FactType>,
    /// Run even when the package failed type checking.
    pub run_despite_errors: bool,
    pub result_type: ResultType,
    pub run: RunFn,
}

impl Analyzer {
    /// The declared descriptor for the fact type with this `TypeId`.
    pub fn fact_type_for(&self, id: TypeId) -> Option<&FactType> {
        self.fact_types.iter().find(|ty| ty.id() == id)
    }
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer")
            .field("name", &self.name)
            .field("requires", &self.requires.len())
            .field("fact_types", &self.fact_types)
            .finish()
    }
}

impl fmt::Display for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
