//! The artifact model: immutable text documents (crash logs) and versioned
//! file documents (source under analysis, with pattern annotations).

use crate::pattern::{Fragment, Language};
use crate::util::truncate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const EXCERPT_MAX_CHARS: usize = 120;

/// A span attached to a file document, referencing the fragment that
/// produced it and the matcher or tool that found it. Annotations only
/// mark content; they never mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Name of the pattern or tool that produced this annotation.
    pub source: String,
    pub start: usize,
    pub end: usize,
    pub excerpt: String,
}

impl Annotation {
    pub fn from_fragment(source: &str, fragment: &Fragment) -> Self {
        Self {
            source: source.to_string(),
            start: fragment.start,
            end: fragment.end(),
            excerpt: truncate(&fragment.value, EXCERPT_MAX_CHARS),
        }
    }
}

/// Immutable content with no path, e.g. a crash log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocument {
    pub label: String,
    pub content: String,
}

impl TextDocument {
    pub fn new(label: impl Into<String>, content: impl Into<String>) -> Self {
        Self { label: label.into(), content: content.into() }
    }
}

/// Source file content plus annotations. The path is immutable for the
/// document's lifetime; content changes produce a new instance with a
/// bumped version, never an in-place mutation visible to prior snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDocument {
    pub path: PathBuf,
    pub content: String,
    pub version: u32,
    pub annotations: Vec<Annotation>,
    pub modified_at: DateTime<Utc>,
}

impl FileDocument {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            version: 1,
            annotations: Vec::new(),
            modified_at: Utc::now(),
        }
    }

    pub fn language(&self) -> Language {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Same version, extra annotations.
    pub fn annotated(&self, annotations: impl IntoIterator<Item = Annotation>) -> Self {
        let mut next = self.clone();
        next.annotations.extend(annotations);
        next
    }

    /// Next version with replaced content. Annotations reference spans in
    /// the old content, so the new version starts without them.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            path: self.path.clone(),
            content: content.into(),
            version: self.version + 1,
            annotations: Vec::new(),
            modified_at: Utc::now(),
        }
    }

    /// Apply a search/replace edit, yielding the next version, or `None`
    /// when the search text does not occur in this version's content.
    pub fn patched(&self, search: &str, replace: &str) -> Option<Self> {
        if search.is_empty() || !self.content.contains(search) {
            return None;
        }
        Some(self.with_content(self.content.replacen(search, replace, 1)))
    }
}

/// Closed family of document variants so dispatch stays exhaustive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Document {
    Text(TextDocument),
    File(FileDocument),
}

impl Document {
    /// Stable identity used when merging step results: label for text
    /// documents, path for file documents.
    pub fn key(&self) -> String {
        match self {
            Document::Text(doc) => doc.label.clone(),
            Document::File(doc) => doc.path.display().to_string(),
        }
    }

    pub fn as_file(&self) -> Option<&FileDocument> {
        match self {
            Document::File(doc) => Some(doc),
            Document::Text(_) => None,
        }
    }

    pub fn file_at(&self, path: &Path) -> Option<&FileDocument> {
        self.as_file().filter(|doc| doc.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_bumps_version_and_keeps_the_original() {
        let doc = FileDocument::new("src/buffer.cc", "strcpy(dst, src);\n");
        let patched = doc.patched("strcpy(dst, src)", "strncpy(dst, src, n)").unwrap();
        assert_eq!(patched.version, 2);
        assert!(patched.content.contains("strncpy"));
        // prior snapshot is untouched
        assert_eq!(doc.version, 1);
        assert!(doc.content.contains("strcpy(dst, src)"));
    }

    #[test]
    fn patch_misses_when_search_is_absent() {
        let doc = FileDocument::new("src/buffer.cc", "memcpy(dst, src, n);\n");
        assert!(doc.patched("strcpy(dst, src)", "x").is_none());
        assert!(doc.patched("", "x").is_none());
    }

    #[test]
    fn annotated_returns_a_new_instance() {
        let doc = FileDocument::new("Handler.java", "decode(data);");
        let fragment = Fragment::new(0, "decode(data)");
        let annotated = doc.annotated([Annotation::from_fragment("method_invocation", &fragment)]);
        assert!(doc.annotations.is_empty());
        assert_eq!(annotated.annotations.len(), 1);
        assert_eq!(annotated.annotations[0].end, 12);
    }

    #[test]
    fn document_keys_identify_variants() {
        let text = Document::Text(TextDocument::new("crash-log", "boom"));
        let file = Document::File(FileDocument::new("a/b.cc", ""));
        assert_eq!(text.key(), "crash-log");
        assert_eq!(file.key(), "a/b.cc");
    }

    #[test]
    fn language_follows_the_path_extension() {
        assert_eq!(FileDocument::new("x.cc", "").language(), Language::Cpp);
        assert_eq!(FileDocument::new("X.java", "").language(), Language::Java);
        assert_eq!(FileDocument::new("x.txt", "").language(), Language::Unknown);
    }
}
