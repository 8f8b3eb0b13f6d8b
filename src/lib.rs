// src/lib.rs
//! ferret: a parallel static-analysis driver.
//!
//! The driver schedules a DAG of (analyzer, package) actions, loads
//! package type information from source or compiler export data, persists
//! per-package analyzer facts across runs through a key-value cache, and
//! returns a deduplicated list of diagnostics.

pub mod analysis;
pub mod cache;
pub mod driver;
pub mod errors;
pub mod frontend;
pub mod package;
pub mod sema;

pub use driver::{Diagnostic, LoadGuard, RunError, Runner, need_facts};
pub use package::Package;
