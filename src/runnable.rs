//! Generic execution contract shared by patterns and tools.
//!
//! Failures travel as typed results instead of panics so the parallel
//! fan-out in the environment can collect partial failures without
//! aborting sibling units.

use thiserror::Error;

/// Unit-level failure. Absorbed by `run_or_none` at fan-out call sites;
/// a single failing unit degrades the observation, it never kills the step.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to parse {what}")]
    Parse { what: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("symbol lookup failed: {0}")]
    Lookup(String),

    #[error("{what} timed out after {seconds}s")]
    Timeout { what: String, seconds: u64 },

    #[error("scope error: {0}")]
    Scope(String),
}

/// Something that turns an input into an output or a typed failure.
///
/// `I` and `O` are deliberately free: a pattern runs `&str -> FragmentSet`,
/// a tool runs `ToolRequest -> Option<FileDocument>`.
pub trait Runnable<I, O>: Send + Sync {
    fn run(&self, input: I) -> Result<O, RunError>;

    /// Convert any failure into an absent result. Used by fan-out call
    /// sites that tolerate partial tool failure.
    fn run_or_none(&self, input: I) -> Option<O> {
        match self.run(input) {
            Ok(out) => Some(out),
            Err(err) => {
                tracing::debug!("unit dropped from fan-out: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl Runnable<u32, u32> for Doubler {
        fn run(&self, input: u32) -> Result<u32, RunError> {
            input
                .checked_mul(2)
                .ok_or_else(|| RunError::Parse { what: "overflow".into() })
        }
    }

    #[test]
    fn run_or_none_absorbs_failures() {
        let d = Doubler;
        assert_eq!(d.run_or_none(21), Some(42));
        assert_eq!(d.run_or_none(u32::MAX), None);
    }

    #[test]
    fn errors_render_their_context() {
        let err = RunError::Timeout { what: "rg lookup".into(), seconds: 20 };
        assert_eq!(err.to_string(), "rg lookup timed out after 20s");
    }
}
