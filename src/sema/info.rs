// src/sema/info.rs
//! Per-package type information produced by the checker.

use rustc_hash::FxHashMap;

use super::universe::ObjectKey;
use crate::frontend::NodeId;

/// What the checker learned about a package's syntax: which object each
/// declaration node defines, and which object each reference resolves to.
#[derive(Debug, Default)]
pub struct TypeInfo {
    pub defs: FxHashMap<NodeId, ObjectKey>,
    pub uses: FxHashMap<NodeId, ObjectKey>,
}

/// The target's size model, handed through to every analyzer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSizes {
    pub word_size: u32,
    pub max_align: u32,
}

impl Default for TypeSizes {
    fn default() -> Self {
        TypeSizes {
            word_size: 8,
            max_align: 8,
        }
    }
}
