// src/sema/mod.rs
//! Type universes, the checker, object paths and the export-data codec.

pub mod check;
pub mod export_data;
pub mod info;
pub mod object_path;
pub mod universe;

pub use check::{CheckError, ImportError, Importer, check};
pub use info::{TypeInfo, TypeSizes};
pub use object_path::object_path_for;
pub use universe::{
    EXTERN_IMPORT, INTRINSICS_PATH, Object, ObjectKey, ObjectKind, ObjectRef, Universe,
    intrinsics,
};
