//! Code fragments and the pattern-matching capability that produces them.

mod matchers;

pub use matchers::{parse_source, CallExpressionPattern, MethodInvocationPattern};

use crate::runnable::Runnable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Source language a pattern or document is associated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Cpp,
    Java,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "c" | "cc" | "cpp" | "cxx" | "h" | "hh" | "hpp" => Language::Cpp,
            "java" => Language::Java,
            _ => Language::Unknown,
        }
    }
}

/// A located slice of source text. Immutable once created; produced only
/// by pattern matching. Ordered by position first so set iteration walks
/// the source top to bottom.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fragment {
    /// Byte offset of the match in the source text.
    pub start: usize,
    pub value: String,
}

impl Fragment {
    pub fn new(start: usize, value: impl Into<String>) -> Self {
        Self { start, value: value.into() }
    }

    pub fn end(&self) -> usize {
        self.start + self.value.len()
    }
}

/// Duplicate fragments at the same position collapse; iteration is source order.
pub type FragmentSet = BTreeSet<Fragment>;

/// The matching capability: source text in, fragments out.
///
/// Malformed source is a `RunError::Parse` on the Runnable error channel,
/// never a panic; callers that tolerate it absorb it into an empty set.
/// Matching is deterministic for a fixed source and configuration.
pub trait Pattern: for<'a> Runnable<&'a str, FragmentSet> {
    fn name(&self) -> &'static str;
    fn language(&self) -> Language;
}
