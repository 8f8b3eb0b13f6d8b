// src/sema/export_data.rs
//! Compiler export data: a compact serialized form of a package's export
//! surface, sufficient to type-check importers without reparsing sources.
//!
//! Decoding is NOT self-contained: export data references objects in other
//! packages, and resolving those references may insert synthesized objects
//! into the universes of transitively reachable packages. Every call to
//! [`read`] must therefore hold the driver's export-data mutex; see the
//! load guard.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use super::universe::{Object, ObjectKind, ObjectRef, Universe};
use crate::frontend::Pos;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ExportDataError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed export data: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported export data format {0}")]
    Version(u32),
    #[error("export data is for package {got:?}, want {want:?}")]
    WrongPackage { got: String, want: String },
    #[error("export data references package {0:?} which has not been loaded")]
    UnknownPackage(String),
}

#[derive(Serialize, Deserialize)]
struct ExportFile {
    format: u32,
    path: String,
    name: String,
    objects: Vec<ExportObject>,
}

#[derive(Serialize, Deserialize)]
struct ExportObject {
    path: String,
    name: String,
    kind: ObjectKind,
    exported: bool,
    refs: Vec<ObjectRef>,
}

/// Whether an object belongs in export data: exported declarations, and
/// the fields and methods of exported types. Members of unexported types
/// are omitted even when they are globally addressable; a fact persisted
/// against one resolves again only when the package is loaded from source.
fn in_export_surface(universe: &Universe, obj: &Object) -> bool {
    if let ObjectKind::Builtin | ObjectKind::PkgName | ObjectKind::Label = obj.kind {
        return false;
    }
    match obj.path.split_once('.') {
        Some((owner, _)) => universe.lookup(owner).is_some_and(|o| o.exported),
        None => obj.exported,
    }
}

/// Serialize the export surface of `universe` to `path`.
pub fn write(path: &Path, universe: &Universe) -> Result<(), ExportDataError> {
    let objects = universe
        .objects()
        .into_iter()
        .filter(|o| in_export_surface(universe, o))
        .map(|o| ExportObject {
            path: o.path.clone(),
            name: o.name.clone(),
            kind: o.kind.clone(),
            exported: o.exported,
            refs: o.refs.clone(),
        })
        .collect();
    let file = ExportFile {
        format: FORMAT_VERSION,
        path: universe.path().to_string(),
        name: universe.name().to_string(),
        objects,
    };
    fs::write(path, serde_json::to_vec(&file)?)?;
    Ok(())
}

/// Decode export data for the package at `pkg_path`.
///
/// `view` maps every transitively reachable package path to its
/// already-materialized universe. References into the view that do not
/// resolve are satisfied by inserting a synthesized object into the
/// referenced universe — shared mutation, hence the mutex requirement.
pub fn read(
    path: &Path,
    pkg_path: &str,
    view: &FxHashMap<String, Arc<Universe>>,
) -> Result<Arc<Universe>, ExportDataError> {
    let bytes = fs::read(path)?;
    let file: ExportFile = serde_json::from_slice(&bytes)?;
    if file.format != FORMAT_VERSION {
        return Err(ExportDataError::Version(file.format));
    }
    if file.path != pkg_path {
        return Err(ExportDataError::WrongPackage {
            got: file.path,
            want: pkg_path.to_string(),
        });
    }

    let universe = Universe::new(file.path, file.name);
    for obj in file.objects {
        for r in &obj.refs {
            let Some(target) = view.get(&r.key.pkg) else {
                return Err(ExportDataError::UnknownPackage(r.key.pkg.clone()));
            };
            if target.lookup(&r.key.path).is_none() {
                trace!(pkg = %r.key.pkg, object = %r.key.path, "synthesizing referenced object");
                target.insert(Arc::new(Object {
                    name: r.key.path.rsplit('.').next().unwrap_or(&r.key.path).to_string(),
                    path: r.key.path.clone(),
                    pkg: r.key.pkg.clone(),
                    kind: r.kind.clone(),
                    exported: true,
                    pos: Pos::NONE,
                    refs: Vec::new(),
                }));
            }
        }
        universe.insert(Arc::new(Object {
            name: obj.name,
            path: obj.path,
            pkg: universe.path().to_string(),
            kind: obj.kind,
            exported: obj.exported,
            pos: Pos::NONE,
            refs: obj.refs,
        }));
    }
    Ok(universe)
}
