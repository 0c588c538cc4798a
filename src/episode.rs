//! Shared episode types: the context an episode runs against, the
//! observations handed to policies, and the actions they answer with.

use crate::document::{Document, FileDocument};
use crate::trace::StackTrace;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Read-only bag the environment runs an episode against: the seed crash
/// text plus whatever the tools need to find source. Produced by the
/// caller, never mutated by the core.
#[derive(Debug, Clone)]
pub struct EpisodeContext {
    pub crash_text: String,
    pub repo_root: PathBuf,
    pub run_id: String,
}

impl EpisodeContext {
    pub fn new(crash_text: impl Into<String>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            crash_text: crash_text.into(),
            repo_root: repo_root.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// The policy's decision output. A closed family so the environment's
/// dispatch stays exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Request definition extraction for the named symbols.
    Extract { symbols: Vec<String> },
    /// Propose a search/replace edit against an already-extracted file.
    Patch { path: PathBuf, search: String, replace: String },
    /// Explicitly finish the episode.
    Done { summary: String },
}

impl Action {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Done { .. })
    }
}

/// What the previous step actually did, visible to the policy alongside
/// the resulting documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Keys of documents added or re-versioned by the step.
    pub added_documents: Vec<String>,
    /// Fan-out units that failed or resolved to nothing.
    pub failed_units: usize,
    pub patch_applied: Option<bool>,
}

/// Immutable snapshot presented to a policy at a step boundary. A new
/// observation is built every step; documents inside are clones the
/// environment will never touch again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub step: usize,
    pub documents: Vec<Document>,
    pub trace: StackTrace,
    pub outcome: Option<ActionOutcome>,
}

impl Observation {
    pub fn file_documents(&self) -> impl Iterator<Item = &FileDocument> {
        self.documents.iter().filter_map(Document::as_file)
    }

    /// (key, version) identity pairs, the contract consumers rely on when
    /// comparing observations across steps.
    pub fn document_identities(&self) -> Vec<(String, Option<u32>)> {
        self.documents
            .iter()
            .map(|d| (d.key(), d.as_file().map(|f| f.version)))
            .collect()
    }
}

/// Result of one environment step.
#[derive(Debug, Clone)]
pub struct Transition {
    pub observation: Observation,
    pub terminated: bool,
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TextDocument;

    #[test]
    fn only_done_is_terminal() {
        assert!(Action::Done { summary: "patched".into() }.is_terminal());
        assert!(!Action::Extract { symbols: vec!["foo".into()] }.is_terminal());
        assert!(!Action::Patch {
            path: "a.cc".into(),
            search: "x".into(),
            replace: "y".into()
        }
        .is_terminal());
    }

    #[test]
    fn actions_round_trip_through_their_wire_shape() {
        let action = Action::Extract { symbols: vec!["vuln_copy".into()] };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains(r#""action":"extract""#));
        assert_eq!(serde_json::from_str::<Action>(&json).unwrap(), action);
    }

    #[test]
    fn document_identities_pair_key_and_version() {
        let obs = Observation {
            step: 0,
            documents: vec![
                Document::Text(TextDocument::new("crash-log", "boom")),
                Document::File(FileDocument::new("a.cc", "int x;")),
            ],
            trace: StackTrace::default(),
            outcome: None,
        };
        assert_eq!(
            obs.document_identities(),
            vec![("crash-log".to_string(), None), ("a.cc".to_string(), Some(1))]
        );
    }
}
