// src/analysis/fact.rs
//! Facts: typed values an analyzer records about objects or packages,
//! consumable by the same analyzer on importing packages.
//!
//! The driver treats facts as opaque. Each fact type registers a
//! descriptor carrying its name and encode/decode/clone entry points; at
//! rest a fact is tagged with its descriptor name, in memory fact maps are
//! keyed by (target, `TypeId`). Encoding must be deterministic: the JSON
//! codec emits map keys in sorted order, and sanity mode verifies
//! byte-equality of repeated encodings.

use std::any::{Any, TypeId};
use std::fmt;

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A fact value. Implementations add the `as_any` boilerplate:
///
/// ```ignore
/// impl Fact for NoReturn {
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
/// ```
pub trait Fact: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Error)]
pub enum FactCodecError {
    #[error("encoding of {0} fact failed: {1}")]
    Encode(&'static str, serde_json::Error),
    #[error("decoding of {0} fact failed: {1}")]
    Decode(&'static str, serde_json::Error),
    #[error("encoding of {0} fact is nondeterministic")]
    Nondeterministic(&'static str),
    #[error("value is not a {0} fact")]
    WrongType(&'static str),
}

/// Runtime descriptor of a fact type: its stable name plus the typed
/// entry points the driver needs to move values across address spaces.
#[derive(Clone, Copy)]
pub struct FactType {
    pub name: &'static str,
    id: TypeId,
    encode: fn(&dyn Fact) -> Result<Vec<u8>, FactCodecError>,
    decode: fn(&[u8]) -> Result<Box<dyn Fact>, FactCodecError>,
    clone_box: fn(&dyn Fact) -> Box<dyn Fact>,
}

impl FactType {
    pub fn of<F>(name: &'static str) -> FactType
    where
        F: Fact + Clone + Serialize + DeserializeOwned,
    {
        FactType {
            name,
            id: TypeId::of::<F>(),
            encode: |fact| {
                let fact = fact
                    .as_any()
                    .downcast_ref::<F>()
                    .ok_or(FactCodecError::WrongType(std::any::type_name::<F>()))?;
                serde_json::to_vec(fact)
                    .map_err(|e| FactCodecError::Encode(std::any::type_name::<F>(), e))
            },
            decode: |bytes| {
                let fact: F = serde_json::from_slice(bytes)
                    .map_err(|e| FactCodecError::Decode(std::any::type_name::<F>(), e))?;
                Ok(Box::new(fact) as Box<dyn Fact>)
            },
            clone_box: |fact| {
                let fact = fact
                    .as_any()
                    .downcast_ref::<F>()
                    .unwrap_or_else(|| {
                        panic!(
                            "internal error: fact stored under {} descriptor has another type",
                            std::any::type_name::<F>()
                        )
                    });
                Box::new(fact.clone())
            },
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn encode(&self, fact: &dyn Fact) -> Result<Vec<u8>, FactCodecError> {
        (self.encode)(fact)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Fact>, FactCodecError> {
        (self.decode)(bytes)
    }

    pub fn clone_fact(&self, fact: &dyn Fact) -> Box<dyn Fact> {
        (self.clone_box)(fact)
    }
}

impl PartialEq for FactType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FactType {}

impl fmt::Debug for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactType({})", self.name)
    }
}

/// Maps descriptor names back to descriptors so persisted facts can
/// round-trip. Populated during action-graph construction.
#[derive(Default)]
pub struct FactRegistry {
    by_name: FxHashMap<&'static str, FactType>,
}

impl FactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ty: FactType) {
        self.by_name.insert(ty.name, ty);
    }

    pub fn get(&self, name: &str) -> Option<&FactType> {
        self.by_name.get(name)
    }
}

/// Encode then decode a fact, returning the fresh instance.
///
/// Encodes twice and compares the bytes: a mismatch means the fact's
/// serialization is nondeterministic, which would defeat the
/// content-addressed cache. Used by the sanity debug flag.
pub fn code_fact(ty: &FactType, fact: &dyn Fact) -> Result<Box<dyn Fact>, FactCodecError> {
    let first = ty.encode(fact)?;
    let second = ty.encode(fact)?;
    if first != second {
        return Err(FactCodecError::Nondeterministic(ty.name));
    }
    ty.decode(&first)
}
