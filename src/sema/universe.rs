// src/sema/universe.rs
//! Type universes: a package's typed API surface.
//!
//! A `Universe` is the set of objects a package declares, keyed by object
//! path. Universes are shared across loader threads once published, and
//! export-data decoding may insert synthesized objects into the universes
//! of transitively reachable packages, so the scope sits behind a lock.

use std::sync::{Arc, LazyLock, RwLock};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::frontend::Pos;

/// Import path of the designated intrinsics package. Its universe is
/// predefined; it is never loaded from source or export data.
pub const INTRINSICS_PATH: &str = "intrinsics";

/// Pseudo-import that signals upstream binding preprocessing failed.
pub const EXTERN_IMPORT: &str = "extern";

/// Stable identity of an object: owning-package path plus the object's
/// path within that package. Identity survives a universe being rebuilt
/// from a different representation (source vs export data).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub pkg: String,
    pub path: String,
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.pkg, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A function; methods carry the receiver type's name.
    Func { receiver: Option<String> },
    Var { is_field: bool },
    TypeName,
    Const,
    Builtin,
    PkgName,
    Label,
}

impl ObjectKind {
    pub fn is_method(&self) -> bool {
        matches!(self, ObjectKind::Func { receiver: Some(_) })
    }
}

/// A cross-package reference recorded on a declaration, carried into
/// export data so the decoder can resynthesize referenced objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: ObjectKey,
    pub kind: ObjectKind,
}

#[derive(Debug, Clone)]
pub struct Object {
    pub name: String,
    /// Object path within the owning package: `name` for top-level
    /// declarations, `Owner.name` for fields and methods.
    pub path: String,
    pub pkg: String,
    pub kind: ObjectKind,
    pub exported: bool,
    pub pos: Pos,
    /// Objects in other packages this declaration references.
    pub refs: Vec<ObjectRef>,
}

impl Object {
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            pkg: self.pkg.clone(),
            path: self.path.clone(),
        }
    }
}

pub struct Universe {
    path: String,
    name: String,
    scope: RwLock<FxHashMap<String, Arc<Object>>>,
}

impl Universe {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Universe {
            path: path.into(),
            name: name.into(),
            scope: RwLock::new(FxHashMap::default()),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lookup(&self, object_path: &str) -> Option<Arc<Object>> {
        self.scope
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(object_path)
            .cloned()
    }

    /// Insert an object, clobbering any previous entry at the same path.
    pub fn insert(&self, object: Arc<Object>) {
        self.scope
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(object.path.clone(), object);
    }

    /// All objects, sorted by path. Sorting keeps every consumer of the
    /// scope (export-data encoding in particular) deterministic.
    pub fn objects(&self) -> Vec<Arc<Object>> {
        let scope = self.scope.read().unwrap_or_else(|e| e.into_inner());
        let mut objects: Vec<_> = scope.values().cloned().collect();
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        objects
    }

    pub fn len(&self) -> usize {
        self.scope.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Universe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Universe")
            .field("path", &self.path)
            .field("objects", &self.len())
            .finish()
    }
}

/// The predefined universe of the intrinsics package.
pub fn intrinsics() -> Arc<Universe> {
    static INTRINSICS: LazyLock<Arc<Universe>> = LazyLock::new(|| {
        let u = Universe::new(INTRINSICS_PATH, INTRINSICS_PATH);
        for name in ["size_of", "align_of", "offset_of", "bit_cast"] {
            u.insert(Arc::new(Object {
                name: name.to_string(),
                path: name.to_string(),
                pkg: INTRINSICS_PATH.to_string(),
                kind: ObjectKind::Builtin,
                exported: true,
                pos: Pos::NONE,
                refs: Vec::new(),
            }));
        }
        u
    });
    INTRINSICS.clone()
}
