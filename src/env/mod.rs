//! The step-based environment: orchestrates tools, patterns and a policy
//! over discrete steps, building observations from parallel tool
//! execution and tracking episode termination.

pub mod reward;

use crate::document::{Annotation, Document, FileDocument, TextDocument};
use crate::episode::{Action, ActionOutcome, EpisodeContext, Observation, Transition};
use crate::pattern::Pattern;
use crate::policy::Policy;
use crate::runnable::{RunError, Runnable};
use crate::scope::Scope;
use crate::tools::{Tool, ToolRequest};
use crate::trace::StackTrace;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

const CRASH_DOCUMENT_LABEL: &str = "crash-log";

/// Episode-level failure. Unlike unit failures these surface to the
/// caller; they never skip scope release (scopes live inside the fan-out
/// units, which have already joined by the time a step can fail).
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("step called on a finished episode (terminated={terminated}, truncated={truncated})")]
    InvalidState { terminated: bool, truncated: bool },

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

/// Builds the fresh scope a single `(symbol, tool)` unit runs under.
pub type ScopeBuilder =
    Arc<dyn Fn(&EpisodeContext, &str, &str) -> Result<Scope, RunError> + Send + Sync>;

/// Read-only scope over the context's repository root; the default.
pub fn repo_scope_builder() -> ScopeBuilder {
    Arc::new(|ctx, _tool, _symbol| Scope::read_only(&ctx.repo_root))
}

/// Episode bookkeeping, owned exclusively by the environment and mutated
/// only inside `step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeState {
    pub step_count: usize,
    pub episode_length: usize,
    pub terminated: bool,
    pub truncated: bool,
}

impl EpisodeState {
    fn new(episode_length: usize) -> Self {
        Self { step_count: 0, episode_length, terminated: false, truncated: false }
    }

    pub fn is_over(&self) -> bool {
        self.terminated || self.truncated
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Fixed per-episode step cap.
    pub episode_length: usize,
    /// Fan-out worker count; `None` uses all available workers.
    pub workers: Option<usize>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self { episode_length: 8, workers: None }
    }
}

/// Cooperative cancellation for in-flight fan-out work.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

pub struct Environment {
    tools: Vec<Arc<dyn Tool>>,
    patterns: Vec<Arc<dyn Pattern>>,
    scope_builder: ScopeBuilder,
    pool: rayon::ThreadPool,
    state: EpisodeState,
    episode_length: usize,
    documents: Vec<Document>,
    trace: StackTrace,
    resolved: BTreeSet<String>,
    cancel: Arc<AtomicBool>,
}

impl Environment {
    /// Environments are configured with explicit tool and pattern lists;
    /// nothing is discovered at runtime.
    pub fn new(
        tools: Vec<Arc<dyn Tool>>,
        patterns: Vec<Arc<dyn Pattern>>,
        scope_builder: ScopeBuilder,
        config: EnvironmentConfig,
    ) -> Result<Self, EnvError> {
        let mut pool = rayon::ThreadPoolBuilder::new();
        if let Some(workers) = config.workers {
            pool = pool.num_threads(workers);
        }
        let pool = pool.build().map_err(|e| EnvError::Pool(e.to_string()))?;

        Ok(Self {
            tools,
            patterns,
            scope_builder,
            pool,
            state: EpisodeState::new(config.episode_length),
            episode_length: config.episode_length,
            documents: Vec::new(),
            trace: StackTrace::default(),
            resolved: BTreeSet::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn state(&self) -> &EpisodeState {
        &self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { flag: Arc::clone(&self.cancel) }
    }

    /// Cancel the episode. In-flight fan-out units observe the flag and
    /// stop contributing; their scopes are released unit-side. A no-op
    /// once the episode is already over.
    pub fn cancel(&mut self) {
        if self.state.is_over() {
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
        self.state.truncated = true;
    }

    /// Translate an episode-level policy failure into truncation, per the
    /// documented fixed rule. A no-op once the episode is already over.
    pub fn truncate_for_policy_failure(&mut self) {
        if !self.state.is_over() {
            self.state.truncated = true;
        }
    }

    /// Start a fresh episode: parse the crash trace (best-effort), seed
    /// the document set with the crash log, zero the bookkeeping.
    pub fn reset(&mut self, ctx: &EpisodeContext) -> Observation {
        self.state = EpisodeState::new(self.episode_length);
        self.cancel.store(false, Ordering::SeqCst);
        self.resolved.clear();
        self.trace = StackTrace::parse(&ctx.crash_text);
        if self.trace.is_empty() {
            tracing::debug!("no stack frames recognized in crash text");
        }
        self.documents =
            vec![Document::Text(TextDocument::new(CRASH_DOCUMENT_LABEL, ctx.crash_text.clone()))];

        self.observation(0, None)
    }

    /// Advance the episode by one step.
    ///
    /// Tool dispatch fans out over `(symbol, tool)` pairs, each under a
    /// fresh scope, with `run_or_none` semantics per unit; all units join
    /// before the next observation is built. A degraded step (some units
    /// failed) is indistinguishable in shape from a fully successful one.
    pub fn step(
        &mut self,
        action: &Action,
        observation: &Observation,
        ctx: &EpisodeContext,
    ) -> Result<Transition, EnvError> {
        if self.state.is_over() {
            return Err(EnvError::InvalidState {
                terminated: self.state.terminated,
                truncated: self.state.truncated,
            });
        }

        let mut outcome = ActionOutcome::default();
        let mut terminated = false;

        match action {
            Action::Done { summary } => {
                tracing::info!("episode completed: {summary}");
                terminated = true;
            }
            Action::Patch { path, search, replace } => {
                let applied = self.apply_patch(path, search, replace);
                outcome.patch_applied = Some(applied);
            }
            Action::Extract { symbols } => {
                let pending: Vec<String> = symbols
                    .iter()
                    .filter(|s| !self.resolved.contains(*s))
                    .cloned()
                    .collect();

                if self.tools.is_empty() || pending.is_empty() {
                    // nothing left any tool could make progress on
                    terminated = true;
                } else {
                    let results = self.fan_out(&pending, ctx);
                    for (symbol, doc) in results {
                        match doc {
                            Some(doc) => {
                                self.resolved.insert(symbol);
                                self.merge_document(doc);
                            }
                            None => outcome.failed_units += 1,
                        }
                    }
                }
            }
        }

        self.state.step_count += 1;
        let truncated = self.state.step_count >= self.state.episode_length
            || self.cancel.load(Ordering::SeqCst);
        self.state.terminated = terminated;
        self.state.truncated = truncated;

        // document identities added relative to the observation we stepped from
        let before: BTreeSet<(String, Option<u32>)> =
            observation.document_identities().into_iter().collect();
        outcome.added_documents = self
            .documents
            .iter()
            .map(|d| (d.key(), d.as_file().map(|f| f.version)))
            .filter(|identity| !before.contains(identity))
            .map(|(key, _)| key)
            .collect();

        let next = self.observation(self.state.step_count, Some(outcome));
        Ok(Transition { observation: next, terminated, truncated })
    }

    fn observation(&self, step: usize, outcome: Option<ActionOutcome>) -> Observation {
        Observation {
            step,
            documents: self.documents.clone(),
            trace: self.trace.clone(),
            outcome,
        }
    }

    /// Parallel fan-out: one unit per `(symbol, tool)` pair, each under
    /// its own fresh scope. Units that fail or time out are dropped;
    /// result order follows unit order, so merging stays deterministic
    /// regardless of completion order.
    fn fan_out(
        &self,
        symbols: &[String],
        ctx: &EpisodeContext,
    ) -> Vec<(String, Option<FileDocument>)> {
        let mut units: Vec<(&str, &Arc<dyn Tool>)> = Vec::new();
        for symbol in symbols {
            for tool in &self.tools {
                units.push((symbol, tool));
            }
        }

        let scope_builder = Arc::clone(&self.scope_builder);
        let cancel = Arc::clone(&self.cancel);

        self.pool.install(|| {
            units
                .par_iter()
                .map(|&(symbol, tool)| {
                    if cancel.load(Ordering::SeqCst) {
                        return (symbol.to_string(), None);
                    }
                    let scope = match scope_builder(ctx, tool.name(), symbol) {
                        Ok(scope) => scope,
                        Err(err) => {
                            tracing::debug!("scope acquisition failed for '{symbol}': {err}");
                            return (symbol.to_string(), None);
                        }
                    };
                    let doc = tool.run_or_none(ToolRequest { symbol, scope: &scope }).flatten();
                    scope.release();
                    (symbol.to_string(), doc)
                })
                .collect()
        })
    }

    /// Annotate a freshly extracted document with every configured
    /// pattern for its language, then merge it. Single-threaded, strictly
    /// after the fan-out joins. The first extraction of a path wins;
    /// re-extractions of known paths add nothing.
    fn merge_document(&mut self, doc: FileDocument) {
        if self.documents.iter().any(|d| d.file_at(&doc.path).is_some()) {
            return;
        }

        let mut annotations: Vec<Annotation> = Vec::new();
        for pattern in &self.patterns {
            if pattern.language() != doc.language() {
                continue;
            }
            if let Some(fragments) = pattern.run_or_none(doc.content.as_str()) {
                annotations
                    .extend(fragments.iter().map(|f| Annotation::from_fragment(pattern.name(), f)));
            }
        }

        self.documents.push(Document::File(doc.annotated(annotations)));
    }

    /// Search/replace against the newest version of the named document.
    /// A miss degrades the outcome, it never fails the step.
    fn apply_patch(&mut self, path: &Path, search: &str, replace: &str) -> bool {
        let position = self
            .documents
            .iter()
            .position(|d| d.file_at(path).is_some())
            .or_else(|| {
                self.documents
                    .iter()
                    .position(|d| d.as_file().is_some_and(|f| f.path.ends_with(path)))
            });

        let Some(position) = position else {
            tracing::debug!("patch target not among extracted documents: {}", path.display());
            return false;
        };
        let Some(doc) = self.documents[position].as_file() else {
            return false;
        };
        match doc.patched(search, replace) {
            Some(next) => {
                self.documents[position] = Document::File(next);
                true
            }
            None => {
                tracing::debug!("patch search text not found in {}", path.display());
                false
            }
        }
    }
}

/// Summary of one finished episode, for reporting.
#[derive(Debug, Serialize)]
pub struct DocumentSummary {
    pub key: String,
    pub version: Option<u32>,
    pub annotations: usize,
}

#[derive(Debug, Serialize)]
pub struct EpisodeReport {
    pub run_id: String,
    pub steps: usize,
    pub terminated: bool,
    pub truncated: bool,
    pub actions: Vec<Action>,
    pub documents: Vec<DocumentSummary>,
    pub policy_failure: Option<String>,
}

/// Drive a full episode: policy and environment alternate until the
/// episode terminates, truncates, or the policy fails (which truncates,
/// per the documented rule).
pub fn run_episode(
    env: &mut Environment,
    policy: &dyn Policy,
    ctx: &EpisodeContext,
) -> Result<EpisodeReport, EnvError> {
    let mut current = env.reset(ctx);
    let mut previous: Option<Observation> = None;
    let mut actions = Vec::new();
    let mut policy_failure = None;

    loop {
        let action = match policy.decide(&current, previous.as_ref()) {
            Ok(action) => action,
            Err(err) => {
                tracing::warn!("policy failed, truncating episode: {err}");
                policy_failure = Some(err.to_string());
                env.truncate_for_policy_failure();
                break;
            }
        };

        let transition = env.step(&action, &current, ctx)?;
        actions.push(action);
        previous = Some(current);
        current = transition.observation;

        if transition.terminated || transition.truncated {
            break;
        }
    }

    let state = env.state();
    Ok(EpisodeReport {
        run_id: ctx.run_id.clone(),
        steps: state.step_count,
        terminated: state.terminated,
        truncated: state.truncated,
        actions,
        documents: current
            .documents
            .iter()
            .map(|d| DocumentSummary {
                key: d.key(),
                version: d.as_file().map(|f| f.version),
                annotations: d.as_file().map(|f| f.annotations.len()).unwrap_or(0),
            })
            .collect(),
        policy_failure,
    })
}
