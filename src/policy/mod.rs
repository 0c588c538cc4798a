//! Policies: turn an observation (plus the previous one) into an action
//! through a three-phase pipeline — build the decision context, render
//! the prompt, obtain and parse a completion.

mod client;
mod parse;
mod prompts;

pub use client::{CompletionClient, HttpCompletionClient, Prompt};
pub use parse::{parse_action, parse_symbols};

use crate::episode::{Action, Observation};
use crate::util::truncate;
use std::sync::Arc;
use thiserror::Error;

const CRASH_EXCERPT_MAX_CHARS: usize = 2_000;
const DOCUMENT_BODY_MAX_CHARS: usize = 1_500;
const TRACE_LINES_MAX: usize = 12;

/// The pipeline phase a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyPhase {
    BuildingContext,
    Prompting,
    Completing,
    Parsing,
}

/// Episode-level policy failure. Surfaced to the caller as a typed
/// result; the episode driver decides what it means for the episode.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("completion timed out after {seconds}s during {phase:?}")]
    Timeout { phase: PolicyPhase, seconds: u64 },

    #[error("completion could not be parsed into an action: {reason}")]
    Unparseable { phase: PolicyPhase, reason: String },

    #[error("completion backend error: {0}")]
    Backend(String),
}

/// An observation in, an action out.
pub trait Policy: Send + Sync {
    fn decide(
        &self,
        current: &Observation,
        previous: Option<&Observation>,
    ) -> Result<Action, PolicyError>;
}

/// Decision-relevant view of an observation pair. Building it is pure, as
/// is rendering it into a prompt, so prompts are reproducible for a given
/// pair of observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionContext {
    pub crash_excerpt: String,
    pub trace_lines: Vec<String>,
    pub documents: Vec<DocumentBrief>,
    pub prior_outcome: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentBrief {
    pub key: String,
    pub version: u32,
    pub body: String,
}

impl DecisionContext {
    pub fn build(current: &Observation, previous: Option<&Observation>) -> Self {
        let crash_excerpt = current
            .documents
            .iter()
            .find_map(|d| match d {
                crate::document::Document::Text(t) => Some(truncate(&t.content, CRASH_EXCERPT_MAX_CHARS)),
                crate::document::Document::File(_) => None,
            })
            .unwrap_or_default();

        let trace_lines = current
            .trace
            .frames
            .iter()
            .take(TRACE_LINES_MAX)
            .map(|f| match (&f.file, f.line) {
                (Some(file), Some(line)) => format!("{} ({file}:{line})", f.symbol),
                (Some(file), None) => format!("{} ({file})", f.symbol),
                _ => f.symbol.clone(),
            })
            .collect();

        let documents = current
            .file_documents()
            .map(|doc| DocumentBrief {
                key: doc.path.display().to_string(),
                version: doc.version,
                body: truncate(&doc.content, DOCUMENT_BODY_MAX_CHARS),
            })
            .collect();

        let prior_outcome = current.outcome.as_ref().map(|outcome| {
            let mut parts = Vec::new();
            if !outcome.added_documents.is_empty() {
                parts.push(format!("added {}", outcome.added_documents.join(", ")));
            }
            if outcome.failed_units > 0 {
                parts.push(format!("{} unit(s) resolved nothing", outcome.failed_units));
            }
            match outcome.patch_applied {
                Some(true) => parts.push("patch applied".to_string()),
                Some(false) => parts.push("patch did not match".to_string()),
                None => {}
            }
            if parts.is_empty() {
                "no new information".to_string()
            } else {
                parts.join("; ")
            }
        });

        // the previous observation only matters for what it already
        // contained; everything additive shows up in the outcome above
        let _ = previous;

        Self { crash_excerpt, trace_lines, documents, prior_outcome }
    }
}

/// LLM-backed policy over the full action space.
///
/// Retry rule, fixed: an unparseable completion is retried exactly once
/// with the same prompt; a second parse failure or any timeout surfaces
/// to the caller.
pub struct LlmPolicy {
    client: Arc<dyn CompletionClient>,
}

impl LlmPolicy {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

impl Policy for LlmPolicy {
    fn decide(
        &self,
        current: &Observation,
        previous: Option<&Observation>,
    ) -> Result<Action, PolicyError> {
        let ctx = DecisionContext::build(current, previous);
        let prompt = prompts::render_decision(&ctx);

        let completion = self.client.complete(&prompt)?;
        match parse::parse_action(&completion) {
            Ok(action) => Ok(action),
            Err(first) => {
                tracing::warn!("unparseable completion, retrying once: {first}");
                let completion = self.client.complete(&prompt)?;
                parse::parse_action(&completion)
            }
        }
    }
}

/// Restricted policy whose output is always a set of vulnerability-relevant
/// symbols; used for extraction-only sub-tasks.
pub struct SymbolEraserPolicy {
    client: Arc<dyn CompletionClient>,
    max_symbols: usize,
}

impl SymbolEraserPolicy {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client, max_symbols: 8 }
    }

    pub fn with_max_symbols(mut self, max_symbols: usize) -> Self {
        self.max_symbols = max_symbols;
        self
    }
}

impl Policy for SymbolEraserPolicy {
    fn decide(
        &self,
        current: &Observation,
        previous: Option<&Observation>,
    ) -> Result<Action, PolicyError> {
        let ctx = DecisionContext::build(current, previous);
        let prompt = prompts::render_eraser(&ctx);

        let completion = self.client.complete(&prompt)?;
        let symbols = match parse::parse_symbols(&completion) {
            Ok(symbols) => symbols,
            Err(first) => {
                tracing::warn!("unparseable symbol list, retrying once: {first}");
                let completion = self.client.complete(&prompt)?;
                parse::parse_symbols(&completion)?
            }
        };

        Ok(Action::Extract { symbols: symbols.into_iter().take(self.max_symbols).collect() })
    }
}
