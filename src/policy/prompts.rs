//! Prompt rendering. Pure functions of the decision context so a given
//! observation pair always produces the same request.

use super::client::Prompt;
use super::DecisionContext;

const DECISION_SYSTEM_PROMPT: &str = "\
You are a vulnerability triage assistant. You are given a crash report and \
source fragments extracted from the repository, and you decide the next \
analysis step.

Respond with exactly one JSON object, no prose, in one of these shapes:
  {\"action\": \"extract\", \"symbols\": [\"function_or_method\", ...]}
  {\"action\": \"patch\", \"path\": \"file/from/documents\", \"search\": \"exact text\", \"replace\": \"replacement\"}
  {\"action\": \"done\", \"summary\": \"one-line result\"}

Rules:
- extract only symbols that appear in the crash trace or in already-extracted code
- patch only files listed under DOCUMENTS, with search text copied verbatim
- when the offending code is patched or nothing further can be learned, respond done";

const ERASER_SYSTEM_PROMPT: &str = "\
You are a vulnerability triage assistant. From the crash report below, \
select only the symbols (function or method names) that are plausibly \
involved in the defect.

Respond with exactly one JSON array of symbol name strings, most suspicious \
first, no prose.";

pub(super) fn render_decision(ctx: &DecisionContext) -> Prompt {
    let mut user = String::new();

    user.push_str("CRASH REPORT:\n");
    user.push_str(&ctx.crash_excerpt);
    user.push_str("\n\n");

    if !ctx.trace_lines.is_empty() {
        user.push_str("PARSED STACK TRACE (crash site first):\n");
        for line in &ctx.trace_lines {
            user.push_str("  ");
            user.push_str(line);
            user.push('\n');
        }
        user.push('\n');
    }

    if ctx.documents.is_empty() {
        user.push_str("DOCUMENTS: none extracted yet\n\n");
    } else {
        user.push_str("DOCUMENTS:\n");
        for doc in &ctx.documents {
            user.push_str(&format!("--- {} (version {}) ---\n", doc.key, doc.version));
            user.push_str(&doc.body);
            user.push_str("\n\n");
        }
    }

    if let Some(outcome) = &ctx.prior_outcome {
        user.push_str("PREVIOUS STEP: ");
        user.push_str(outcome);
        user.push_str("\n\n");
    }

    user.push_str("Decide the next action.");

    Prompt { system: DECISION_SYSTEM_PROMPT.to_string(), user }
}

pub(super) fn render_eraser(ctx: &DecisionContext) -> Prompt {
    let mut user = String::new();
    user.push_str("CRASH REPORT:\n");
    user.push_str(&ctx.crash_excerpt);
    user.push('\n');

    if !ctx.trace_lines.is_empty() {
        user.push_str("\nPARSED STACK TRACE:\n");
        for line in &ctx.trace_lines {
            user.push_str("  ");
            user.push_str(line);
            user.push('\n');
        }
    }

    Prompt { system: ERASER_SYSTEM_PROMPT.to_string(), user }
}

#[cfg(test)]
mod tests {
    use super::super::DecisionContext;
    use super::*;

    fn context() -> DecisionContext {
        DecisionContext {
            crash_excerpt: "heap-buffer-overflow in vuln_copy".into(),
            trace_lines: vec!["vuln_copy (buffer.cc:42)".into()],
            documents: vec![],
            prior_outcome: Some("added lib/buffer.cc".into()),
        }
    }

    #[test]
    fn rendering_is_reproducible() {
        let ctx = context();
        assert_eq!(render_decision(&ctx), render_decision(&ctx));
        assert_eq!(render_eraser(&ctx), render_eraser(&ctx));
    }

    #[test]
    fn decision_prompt_carries_all_sections() {
        let prompt = render_decision(&context());
        assert!(prompt.system.contains("\"action\": \"extract\""));
        assert!(prompt.user.contains("CRASH REPORT:"));
        assert!(prompt.user.contains("vuln_copy (buffer.cc:42)"));
        assert!(prompt.user.contains("none extracted yet"));
        assert!(prompt.user.contains("PREVIOUS STEP: added lib/buffer.cc"));
    }

    #[test]
    fn eraser_prompt_asks_for_an_array_only() {
        let prompt = render_eraser(&context());
        assert!(prompt.system.contains("JSON array"));
        assert!(!prompt.user.contains("DOCUMENTS"));
    }
}
