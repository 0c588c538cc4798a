//! Isolated execution contexts handed to tool invocations.
//!
//! Exactly one scope exists per `(symbol, tool)` unit in a fan-out, and
//! its release is guaranteed on every exit path: explicitly on completion,
//! via `Drop` otherwise. Creation has to stay cheap because a single step
//! can spawn dozens of scopes.

use crate::runnable::RunError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const SCOPE_ROOT_DIR: &str = "patchpilot-scope";

/// Handle to an isolated execution context for one tool invocation.
///
/// A read-only scope just bounds filesystem access to `root`. A sandbox
/// scope additionally owns a scratch directory in
/// `$TMPDIR/patchpilot-scope/<run_id>/<label>` that concurrent units
/// cannot observe and that is removed on release.
#[derive(Debug)]
pub struct Scope {
    root: PathBuf,
    scratch: Option<PathBuf>,
    released: AtomicBool,
    observer: Option<Arc<AtomicUsize>>,
}

impl Scope {
    /// Cheap per-unit scope over an existing tree; nothing to clean up
    /// beyond marking the release.
    pub fn read_only(root: &Path) -> Result<Self, RunError> {
        if !root.exists() {
            return Err(RunError::Scope(format!(
                "scope root does not exist: {}",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            scratch: None,
            released: AtomicBool::new(false),
            observer: None,
        })
    }

    /// Scope with an isolated scratch directory for tools that write.
    pub fn sandbox(root: &Path, run_id: &str, label: &str) -> Result<Self, RunError> {
        let mut scope = Self::read_only(root)?;
        let scratch = std::env::temp_dir()
            .join(SCOPE_ROOT_DIR)
            .join(sanitize_component(run_id))
            .join(sanitize_component(label));
        std::fs::create_dir_all(&scratch).map_err(|e| {
            RunError::Scope(format!(
                "failed to create scratch directory '{}': {}",
                scratch.display(),
                e
            ))
        })?;
        scope.scratch = Some(scratch);
        Ok(scope)
    }

    /// Count releases through the given counter. Used by tests to assert
    /// the exactly-once release contract.
    pub fn with_release_observer(mut self, observer: Arc<AtomicUsize>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scratch(&self) -> Option<&Path> {
        self.scratch.as_deref()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Release the scope. Only the first call has an effect; the `Drop`
    /// backstop makes the release safe on early-return and failure paths.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(scratch) = &self.scratch {
            if let Err(e) = std::fs::remove_dir_all(scratch) {
                tracing::warn!("failed to remove scope scratch '{}': {e}", scratch.display());
            }
        }
        if let Some(observer) = &self.observer {
            observer.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.release();
    }
}

fn sanitize_component(input: &str) -> String {
    let cleaned = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect::<String>();
    if cleaned.is_empty() {
        "unit".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_only_scope_requires_an_existing_root() {
        let dir = tempdir().unwrap();
        assert!(Scope::read_only(dir.path()).is_ok());
        assert!(Scope::read_only(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn release_is_observed_exactly_once() {
        let dir = tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let scope = Scope::read_only(dir.path())
            .unwrap()
            .with_release_observer(counter.clone());

        scope.release();
        scope.release();
        drop(scope);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_unreleased_scopes() {
        let dir = tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _scope = Scope::read_only(dir.path())
                .unwrap()
                .with_release_observer(counter.clone());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sandbox_scratch_is_created_and_removed() {
        let dir = tempdir().unwrap();
        let scope = Scope::sandbox(dir.path(), "run 01!", "extract/foo").unwrap();
        let scratch = scope.scratch().unwrap().to_path_buf();
        assert!(scratch.exists());
        assert!(scratch.ends_with("run01/extractfoo"));

        scope.release();
        assert!(!scratch.exists());
        assert!(scope.is_released());
    }
}
