//! External symbol lookup. The locator is a collaborator outside the
//! episodic core; tools tolerate it being unavailable.

use crate::runnable::RunError;
use crate::scope::Scope;
use crate::util::run_command_with_timeout;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
}

/// `(symbol, scope) -> location | absent`. Implementations must treat an
/// unavailable backend as `Ok(None)`, never as a unit failure.
pub trait SymbolLocator: Send + Sync {
    fn locate(&self, symbol: &str, scope: &Scope) -> Result<Option<SourceLocation>, RunError>;
}

/// Locator backed by ripgrep (with a grep fallback), bounded by a hard
/// timeout. Matches a definition-shaped occurrence of the symbol.
#[derive(Debug, Clone)]
pub struct GrepLocator {
    timeout: Duration,
}

impl GrepLocator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn pattern(symbol: &str) -> String {
        format!(r"\b{}\s*\(", regex::escape(symbol))
    }

    fn parse_first_hit(stdout: &str, scope: &Scope) -> Option<SourceLocation> {
        for line in stdout.lines() {
            let mut parts = line.splitn(3, ':');
            let file = parts.next()?;
            let line_no = parts.next().and_then(|n| n.parse::<u32>().ok())?;
            let file = PathBuf::from(file);
            let file = if file.is_absolute() { file } else { scope.root().join(file) };
            return Some(SourceLocation { file, line: line_no });
        }
        None
    }

    fn run_search(&self, program: &str, args: &[&str], scope: &Scope) -> Result<Option<String>, RunError> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(scope.root());
        match run_command_with_timeout(&mut cmd, self.timeout) {
            Ok(out) if out.timed_out => Err(RunError::Timeout {
                what: format!("{program} lookup"),
                seconds: self.timeout.as_secs(),
            }),
            Ok(out) => Ok(Some(out.stdout)),
            // binary not present: let the caller fall through
            Err(_) => Ok(None),
        }
    }
}

impl Default for GrepLocator {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

impl SymbolLocator for GrepLocator {
    fn locate(&self, symbol: &str, scope: &Scope) -> Result<Option<SourceLocation>, RunError> {
        let pattern = Self::pattern(symbol);

        if let Some(stdout) = self.run_search(
            "rg",
            &["--line-number", "--no-heading", "--color=never", "-m", "1", &pattern, "."],
            scope,
        )? {
            if let Some(hit) = Self::parse_first_hit(&stdout, scope) {
                return Ok(Some(hit));
            }
            if !stdout.is_empty() {
                return Ok(None);
            }
        }

        // Fallback to grep when rg is not installed
        if let Some(stdout) =
            self.run_search("grep", &["-rnE", "--", &pattern, "."], scope)?
        {
            return Ok(Self::parse_first_hit(&stdout, scope));
        }

        Ok(None)
    }
}
