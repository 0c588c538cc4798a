//! Tools: runnables that resolve a symbol to an annotated file document
//! under a scope, or to nothing at all.

mod extract;
mod locate;

pub use extract::DefinitionExtractor;
pub use locate::{GrepLocator, SourceLocation, SymbolLocator};

use crate::document::FileDocument;
use crate::runnable::Runnable;
use crate::scope::Scope;

/// One unit of fan-out work: a symbol to resolve plus the scope the
/// invocation is bounded by.
#[derive(Debug, Clone, Copy)]
pub struct ToolRequest<'a> {
    pub symbol: &'a str,
    pub scope: &'a Scope,
}

/// A tool locates a named construct reachable from the scope and returns
/// an annotated file document, or `None` when the symbol does not resolve.
/// Tools hold no cross-step state so they can be reused freely across
/// `(symbol, tool)` pairs within and across steps.
pub trait Tool: for<'a> Runnable<ToolRequest<'a>, Option<FileDocument>> {
    fn name(&self) -> &'static str;
}
