//! AST-based definition extraction: resolve a symbol name to the source
//! file and span of its function or method definition.

use super::{SymbolLocator, Tool, ToolRequest};
use crate::document::{Annotation, FileDocument};
use crate::pattern::{parse_source, Fragment, Language};
use crate::runnable::{RunError, Runnable};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

const MAX_CANDIDATE_FILES: usize = 2_000;

/// Locates a named function/method definition in source reachable from
/// the scope and returns the file annotated at the definition span.
///
/// An optional locator narrows the candidate files first; a missing or
/// failing locator degrades to a full walk rather than failing the unit.
pub struct DefinitionExtractor {
    locator: Option<Arc<dyn SymbolLocator>>,
}

impl DefinitionExtractor {
    pub fn new() -> Self {
        Self { locator: None }
    }

    pub fn with_locator(locator: Arc<dyn SymbolLocator>) -> Self {
        Self { locator: Some(locator) }
    }

    fn candidate_files(&self, request: &ToolRequest<'_>) -> Vec<PathBuf> {
        if let Some(locator) = &self.locator {
            match locator.locate(request.symbol, request.scope) {
                Ok(Some(hit)) if hit.file.is_file() => return vec![hit.file],
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!("symbol locator degraded to a full walk: {err}");
                }
            }
        }

        WalkDir::new(request.scope.root())
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored(e.path()))
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter(|e| source_language(e.path()) != Language::Unknown)
            .map(|e| e.into_path())
            .take(MAX_CANDIDATE_FILES)
            .collect()
    }
}

impl Default for DefinitionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Runnable<ToolRequest<'a>, Option<FileDocument>> for DefinitionExtractor {
    fn run(&self, request: ToolRequest<'a>) -> Result<Option<FileDocument>, RunError> {
        for path in self.candidate_files(&request) {
            let language = source_language(&path);
            if language == Language::Unknown {
                continue;
            }
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(_) => continue,
            };
            // files the grammar rejects degrade silently; the symbol may
            // still resolve elsewhere
            let Ok(tree) = parse_source(&content, language) else {
                continue;
            };
            if let Some(fragment) = find_definition(&tree, &content, language, request.symbol) {
                let rel = path
                    .strip_prefix(request.scope.root())
                    .unwrap_or(&path)
                    .to_path_buf();
                let doc = FileDocument::new(rel, content.clone())
                    .annotated([Annotation::from_fragment(self.name(), &fragment)]);
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }
}

impl Tool for DefinitionExtractor {
    fn name(&self) -> &'static str {
        "definition_extractor"
    }
}

fn source_language(path: &Path) -> Language {
    path.extension()
        .and_then(|e| e.to_str())
        .map(Language::from_extension)
        .unwrap_or(Language::Unknown)
}

fn is_ignored(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| {
            matches!(name, ".git" | "build" | "out" | "target" | "node_modules")
                || (name.starts_with('.') && name.len() > 1 && path.is_dir())
        })
        .unwrap_or(false)
}

fn node_text(node: &tree_sitter::Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

/// Find the definition of `symbol` in a parsed tree, as a fragment
/// spanning the whole definition node.
fn find_definition(
    tree: &tree_sitter::Tree,
    source: &str,
    language: Language,
    symbol: &str,
) -> Option<Fragment> {
    let mut cursor = tree.root_node().walk();

    loop {
        let node = cursor.node();
        let name = match (language, node.kind()) {
            (Language::Cpp, "function_definition") => cpp_definition_name(&node, source),
            (Language::Java, "method_declaration" | "constructor_declaration") => node
                .child_by_field_name("name")
                .map(|n| node_text(&n, source)),
            _ => None,
        };

        if name.as_deref() == Some(symbol) {
            return Some(Fragment::new(node.start_byte(), node_text(&node, source)));
        }

        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

/// Descend the declarator chain of a C++ function definition down to the
/// bare name, dropping pointers, qualifiers and parameter lists.
fn cpp_definition_name(node: &tree_sitter::Node, source: &str) -> Option<String> {
    let mut decl = node.child_by_field_name("declarator")?;
    while let Some(inner) = decl.child_by_field_name("declarator") {
        decl = inner;
    }
    let text = node_text(&decl, source);
    let name = text.split('(').next().unwrap_or(&text);
    let name = name.rsplit("::").next().unwrap_or(name);
    let name = name.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '~'));
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use std::fs;
    use tempfile::tempdir;

    const CPP_FILE: &str = r#"
#include <cstring>

static int helper(int x) { return x + 1; }

void vuln_copy(char *dst, const char *src) {
    strcpy(dst, src);
}
"#;

    const JAVA_FILE: &str = r#"
class Decoder {
    int offset;

    Decoder(int offset) { this.offset = offset; }

    byte[] readBlock(byte[] data) {
        return decode(data, offset);
    }
}
"#;

    #[test]
    fn finds_a_cpp_function_definition() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/buffer.cc"), CPP_FILE).unwrap();
        let scope = Scope::read_only(dir.path()).unwrap();

        let tool = DefinitionExtractor::new();
        let doc = tool
            .run(ToolRequest { symbol: "vuln_copy", scope: &scope })
            .unwrap()
            .expect("definition should resolve");

        assert_eq!(doc.path, PathBuf::from("lib/buffer.cc"));
        assert_eq!(doc.annotations.len(), 1);
        let ann = &doc.annotations[0];
        assert_eq!(ann.source, "definition_extractor");
        assert!(doc.content[ann.start..ann.end].starts_with("void vuln_copy"));
    }

    #[test]
    fn finds_a_java_method_declaration() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Decoder.java"), JAVA_FILE).unwrap();
        let scope = Scope::read_only(dir.path()).unwrap();

        let tool = DefinitionExtractor::new();
        let doc = tool
            .run(ToolRequest { symbol: "readBlock", scope: &scope })
            .unwrap()
            .expect("method should resolve");
        assert!(doc.annotations[0].excerpt.contains("readBlock"));
    }

    #[test]
    fn unresolved_symbols_are_absent_not_errors() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.cc"), "int main() { return 0; }\n").unwrap();
        let scope = Scope::read_only(dir.path()).unwrap();

        let tool = DefinitionExtractor::new();
        let doc = tool.run(ToolRequest { symbol: "missing_fn", scope: &scope }).unwrap();
        assert!(doc.is_none());
    }

    #[test]
    fn a_failing_locator_degrades_to_the_walk() {
        struct BrokenLocator;
        impl SymbolLocator for BrokenLocator {
            fn locate(
                &self,
                _symbol: &str,
                _scope: &Scope,
            ) -> Result<Option<super::super::SourceLocation>, RunError> {
                Err(RunError::Lookup("backend offline".into()))
            }
        }

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("buffer.cc"), CPP_FILE).unwrap();
        let scope = Scope::read_only(dir.path()).unwrap();

        let tool = DefinitionExtractor::with_locator(Arc::new(BrokenLocator));
        let doc = tool.run(ToolRequest { symbol: "vuln_copy", scope: &scope }).unwrap();
        assert!(doc.is_some());
    }
}
