//! Tree-sitter based pattern matchers for C++ and Java sources.

use super::{Fragment, FragmentSet, Language, Pattern};
use crate::runnable::{RunError, Runnable};
use std::cell::RefCell;
use tree_sitter::Parser;

// Tree-sitter parsers are expensive to create but can be reused for many
// sources of the same language. Each rayon worker thread gets its own
// pre-configured parser via thread-local storage.

thread_local! {
    static CPP_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_cpp::LANGUAGE.into());
        p
    });

    static JAVA_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_java::LANGUAGE.into());
        p
    });
}

/// Parse source using a thread-local parser for the given language.
///
/// A source the grammar cannot make sense of (no tree, or a root with
/// error nodes) comes back as `RunError::Parse`.
pub fn parse_source(source: &str, language: Language) -> Result<tree_sitter::Tree, RunError> {
    let tree = match language {
        Language::Cpp => CPP_PARSER.with(|p| p.borrow_mut().parse(source, None)),
        Language::Java => JAVA_PARSER.with(|p| p.borrow_mut().parse(source, None)),
        Language::Unknown => None,
    };

    let tree = tree.ok_or_else(|| RunError::Parse {
        what: format!("{language:?} source"),
    })?;

    if tree.root_node().has_error() {
        return Err(RunError::Parse {
            what: format!("{language:?} source (syntax errors)"),
        });
    }

    Ok(tree)
}

fn node_text(node: &tree_sitter::Node, source: &str) -> String {
    source[node.start_byte()..node.end_byte()].to_string()
}

/// Walk the whole tree collecting fragments for nodes of `kind`, then cap
/// at the first `limit` in source order.
fn collect_kind(
    source: &str,
    language: Language,
    kind: &str,
    limit: Option<usize>,
) -> Result<FragmentSet, RunError> {
    let tree = parse_source(source, language)?;
    let mut cursor = tree.root_node().walk();
    let mut fragments = FragmentSet::new();

    loop {
        let node = cursor.node();
        if node.kind() == kind {
            fragments.insert(Fragment::new(node.start_byte(), node_text(&node, source)));
        }

        if cursor.goto_first_child() {
            continue;
        }

        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                let capped = match limit {
                    Some(k) => fragments.into_iter().take(k).collect(),
                    None => fragments,
                };
                return Ok(capped);
            }
        }
    }
}

/// Matches C++ `call_expression` nodes.
#[derive(Debug, Clone, Default)]
pub struct CallExpressionPattern {
    limit: Option<usize>,
}

impl CallExpressionPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap results at the first `k` fragments in source order.
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

impl<'a> Runnable<&'a str, FragmentSet> for CallExpressionPattern {
    fn run(&self, source: &'a str) -> Result<FragmentSet, RunError> {
        collect_kind(source, Language::Cpp, "call_expression", self.limit)
    }
}

impl Pattern for CallExpressionPattern {
    fn name(&self) -> &'static str {
        "call_expression"
    }

    fn language(&self) -> Language {
        Language::Cpp
    }
}

/// Matches Java `method_invocation` nodes.
#[derive(Debug, Clone, Default)]
pub struct MethodInvocationPattern {
    limit: Option<usize>,
}

impl MethodInvocationPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

impl<'a> Runnable<&'a str, FragmentSet> for MethodInvocationPattern {
    fn run(&self, source: &'a str) -> Result<FragmentSet, RunError> {
        collect_kind(source, Language::Java, "method_invocation", self.limit)
    }
}

impl Pattern for MethodInvocationPattern {
    fn name(&self) -> &'static str {
        "method_invocation"
    }

    fn language(&self) -> Language {
        Language::Java
    }
}
