// src/sema/object_path.rs
//! Stable addresses for objects reachable through a package's export
//! surface.
//!
//! Persisted facts refer to their target by object path, so only objects
//! with a computable path survive persistence. The rules are a deliberate
//! over-approximation of export-data reachability: methods and fields are
//! always addressable (their owner may become reachable through an
//! exported embedding even when it is unexported itself), plain
//! declarations only when exported.

use super::universe::{Object, ObjectKind};

/// Compute the object's export-surface address, or `None` when the
/// object is not globally addressable.
pub fn object_path_for(obj: &Object) -> Option<String> {
    match &obj.kind {
        ObjectKind::Builtin | ObjectKind::PkgName | ObjectKind::Label => None,
        ObjectKind::Func { receiver: Some(_) } => Some(obj.path.clone()),
        ObjectKind::Var { is_field: true } => Some(obj.path.clone()),
        _ => obj.exported.then(|| obj.path.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Pos;

    fn object(path: &str, kind: ObjectKind, exported: bool) -> Object {
        Object {
            name: path.rsplit('.').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            pkg: "p".to_string(),
            kind,
            exported,
            pos: Pos::NONE,
            refs: Vec::new(),
        }
    }

    #[test]
    fn exported_declarations_are_addressable() {
        let obj = object("Sqrt", ObjectKind::Func { receiver: None }, true);
        assert_eq!(object_path_for(&obj).as_deref(), Some("Sqrt"));
    }

    #[test]
    fn unexported_top_level_is_not_addressable() {
        let obj = object("helper", ObjectKind::Func { receiver: None }, false);
        assert_eq!(object_path_for(&obj), None);
        let obj = object("cache", ObjectKind::Var { is_field: false }, false);
        assert_eq!(object_path_for(&obj), None);
    }

    #[test]
    fn methods_and_fields_are_always_addressable() {
        let method = object(
            "matrix.det",
            ObjectKind::Func {
                receiver: Some("matrix".into()),
            },
            false,
        );
        assert_eq!(object_path_for(&method).as_deref(), Some("matrix.det"));

        let field = object("matrix.rows", ObjectKind::Var { is_field: true }, false);
        assert_eq!(object_path_for(&field).as_deref(), Some("matrix.rows"));
    }

    #[test]
    fn builtins_have_no_path() {
        let obj = object("size_of", ObjectKind::Builtin, true);
        assert_eq!(object_path_for(&obj), None);
    }
}
