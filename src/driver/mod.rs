// src/driver/mod.rs
//! The parallel static-analysis driver: action DAG construction, the
//! two-phase package loader, the executor and diagnostic extraction.

pub mod action;
pub mod debug;
pub mod loader;
pub mod runner;
pub mod sync;

pub use action::ActionError;
pub use debug::{DEBUG_ENV, DebugFlags, debug_flags};
pub use loader::{LoadError, LoadGuard};
pub use runner::{Diagnostic, RunError, Runner, need_facts};
