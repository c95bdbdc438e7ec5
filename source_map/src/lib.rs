//! Source positions for translator diagnostics
//!
//! The translator works on resolved input, so source text is optional: a
//! file may be registered by name alone and diagnostics still point at
//! `name:line:column`. When the text is available the formatter quotes the
//! offending line.

use std::collections::BTreeMap;
use std::fmt;

/// A 1-based line and column plus the byte offset they correspond to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl SourcePosition {
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self { line, column, byte_offset }
    }
}

/// A half-open range of one file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub start: SourcePosition,
    pub end: SourcePosition,
    pub file_id: FileId,
}

impl SourceSpan {
    pub fn new(start: SourcePosition, end: SourcePosition, file_id: FileId) -> Self {
        Self { start, end, file_id }
    }

    /// The single character at `pos`
    pub fn single_position(pos: SourcePosition, file_id: FileId) -> Self {
        let end = SourcePosition::new(pos.line, pos.column + 1, pos.byte_offset + 1);
        Self::new(pos, end, file_id)
    }
}

/// Index of a file in the translation input
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(usize);

impl FileId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    content: String,
    /// Byte offset at which each line starts
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: String, content: String) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(content.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            name,
            content,
            line_starts,
        }
    }

    /// Whether the text of the file is known
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// Line `line_number` (1-based) without its terminator
    pub fn get_line(&self, line_number: usize) -> Option<&str> {
        if !self.has_content() {
            return None;
        }
        let start = *self.line_starts.get(line_number.checked_sub(1)?)?;
        let end = self
            .line_starts
            .get(line_number)
            .copied()
            .unwrap_or(self.content.len());
        Some(self.content[start..end].trim_end_matches(['\n', '\r']))
    }
}

/// The files of one translation, keyed by the ids the input uses
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: BTreeMap<FileId, SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file under the id after the highest one in use
    pub fn add_file(&mut self, name: String, content: String) -> FileId {
        let file_id = FileId(self.files.keys().next_back().map_or(0, |id| id.0 + 1));
        self.insert(file_id, name, content);
        file_id
    }

    /// Register a file under an id fixed by the input, replacing any
    /// file already there
    pub fn insert(&mut self, file_id: FileId, name: String, content: String) {
        self.files.insert(file_id, SourceFile::new(name, content));
    }

    pub fn get_file(&self, file_id: FileId) -> Option<&SourceFile> {
        self.files.get(&file_id)
    }

    pub fn get_line(&self, file_id: FileId, line_number: usize) -> Option<&str> {
        self.get_file(file_id)?.get_line(line_number)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
