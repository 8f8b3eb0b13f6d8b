// src/analysis/mod.rs
//! The analyzer contract: analyzers, passes, diagnostics and facts.
//!
//! The driver is polymorphic over analyzers: it consults only the
//! attributes declared here and calls `run` with a fully-marshaled
//! [`Pass`].

pub mod analyzer;
pub mod diagnostic;
pub mod fact;
pub mod pass;

pub use analyzer::{
    Analyzer, AnalyzerError, AnalyzerResult, ResultType, RunFn, unit_result,
};
pub use diagnostic::Diagnostic;
pub use fact::{Fact, FactCodecError, FactRegistry, FactType, code_fact};
pub use pass::{ObjectFact, PackageFact, Pass, PassHost};
