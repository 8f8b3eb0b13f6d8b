// src/errors.rs
//! Normalized error records shared across the loader and the driver.

use std::fmt;

use crate::frontend::Position;

/// How a source failure was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Parse,
    Type,
    Unknown,
}

/// A loader/parser/checker failure, normalized to one shape and recorded
/// on the package it belongs to.
#[derive(Debug, Clone)]
pub struct SourceError {
    pub pos: Position,
    pub msg: String,
    pub kind: SourceErrorKind,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.msg)
    }
}

impl std::error::Error for SourceError {}

/// A panic captured from an analyzer task, carrying enough context to
/// name the action that blew up.
#[derive(Debug)]
pub struct PanicError {
    pub context: String,
    pub message: String,
    pub backtrace: String,
}

impl PanicError {
    pub fn new(context: String, payload: &(dyn std::any::Any + Send), backtrace: String) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        PanicError {
            context,
            message,
            backtrace,
        }
    }
}

impl fmt::Display for PanicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}\n{}", self.context, self.message, self.backtrace)
    }
}

impl std::error::Error for PanicError {}
