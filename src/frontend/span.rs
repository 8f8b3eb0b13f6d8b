// src/frontend/span.rs
//! Positions, spans and the shared file set.
//!
//! Every package in a run registers its files in one `FileSet`, so a `Pos`
//! is a single global offset that stays meaningful across packages. This is
//! what lets the diagnostic collector deduplicate by resolved position when
//! the same file belongs to more than one package.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A global byte position inside a `FileSet`. Zero means "no position".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Pos(pub u32);

impl Pos {
    pub const NONE: Pos = Pos(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// A half-open range of global positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    pub fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }
}

/// Index of a file within its `FileSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// A resolved human-readable position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Position {
    /// Placeholder for errors that carry no location.
    pub fn none() -> Self {
        Position {
            file: String::new(),
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            return write!(f, "-");
        }
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

struct FileEntry {
    path: PathBuf,
    base: u32,
    size: u32,
    /// Byte offset of the start of each line, ascending.
    line_starts: Vec<u32>,
}

/// Registry of source files with disjoint position ranges.
///
/// Files are registered concurrently by loader threads, so the table sits
/// behind a mutex. Resolution walks the table; runs have few enough files
/// that a linear scan over sorted bases is not worth replacing.
pub struct FileSet {
    files: Mutex<Vec<FileEntry>>,
}

impl FileSet {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(Vec::new()),
        }
    }

    /// Register a file's source text and return its base position.
    /// Local offset `o` within the file maps to global `Pos(base + o)`.
    pub fn add_file(&self, path: &Path, source: &str) -> (FileId, u32) {
        let mut line_starts = vec![0u32];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }

        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let base = files.last().map_or(1, |f| f.base + f.size + 1);
        let id = FileId(files.len() as u32);
        files.push(FileEntry {
            path: path.to_path_buf(),
            base,
            size: source.len() as u32,
            line_starts,
        });
        (id, base)
    }

    /// Resolve a global position to file, line and column (all 1-indexed).
    pub fn position(&self, pos: Pos) -> Position {
        if !pos.is_valid() {
            return Position::none();
        }
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let entry = files
            .iter()
            .rev()
            .find(|f| pos.0 >= f.base && pos.0 <= f.base + f.size);
        let Some(entry) = entry else {
            return Position::none();
        };
        let offset = pos.0 - entry.base;
        let line_idx = match entry.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Position {
            file: entry.path.display().to_string(),
            line: line_idx as u32 + 1,
            column: offset - entry.line_starts[line_idx] + 1,
        }
    }
}

impl Default for FileSet {
    fn default() -> Self {
        Self::new()
    }
}
