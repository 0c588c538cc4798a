//! Turn raw model completions into well-formed actions.
//!
//! Models wrap JSON in fences, prose and half-valid objects; everything
//! lenient lives here so the rest of the policy stays strict. A completion
//! that survives none of the recovery paths is a typed `Unparseable`
//! error, never a crash.

use super::{PolicyError, PolicyPhase};
use crate::episode::Action;
use crate::util::truncate;
use serde::Deserialize;
use std::path::PathBuf;

/// Strip markdown code fences from a response.
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if trimmed.starts_with("```json") {
        trimmed.strip_prefix("```json").unwrap_or(trimmed)
    } else if trimmed.starts_with("```") {
        trimmed.strip_prefix("```").unwrap_or(trimmed)
    } else {
        trimmed
    };
    let clean = if clean.ends_with("```") {
        clean.strip_suffix("```").unwrap_or(clean)
    } else {
        clean
    };
    clean.trim()
}

/// Extract a JSON fragment between matching delimiters.
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[derive(Deserialize)]
struct ActionJson {
    action: String,
    #[serde(default)]
    symbols: Vec<String>,
    path: Option<String>,
    search: Option<String>,
    replace: Option<String>,
    #[serde(default)]
    summary: String,
}

fn unparseable(reason: impl Into<String>, completion: &str) -> PolicyError {
    PolicyError::Unparseable {
        phase: PolicyPhase::Parsing,
        reason: format!("{} (completion preview: {})", reason.into(), truncate(completion, 160)),
    }
}

/// Parse a completion into an action. Accepts a JSON object with an
/// `action` discriminator, possibly fenced or embedded in prose; a bare
/// JSON array of symbol names is treated as an extraction request.
pub fn parse_action(completion: &str) -> Result<Action, PolicyError> {
    let clean = strip_markdown_fences(completion);

    if let Some(fragment) = extract_json_fragment(clean, '{', '}') {
        if let Ok(parsed) = serde_json::from_str::<ActionJson>(fragment) {
            return action_from_json(parsed, completion);
        }
    }

    if let Some(symbols) = symbol_array(clean) {
        return extract_from_symbols(symbols, completion);
    }

    Err(unparseable("no action object or symbol array found", completion))
}

/// Parse a completion into symbol names only, for the eraser policy.
/// Accepts a bare array or an object carrying a `symbols` field.
pub fn parse_symbols(completion: &str) -> Result<Vec<String>, PolicyError> {
    let clean = strip_markdown_fences(completion);

    if let Some(symbols) = symbol_array(clean) {
        return cleaned_symbols(symbols, completion);
    }

    if let Some(fragment) = extract_json_fragment(clean, '{', '}') {
        #[derive(Deserialize)]
        struct SymbolsJson {
            symbols: Vec<String>,
        }
        if let Ok(parsed) = serde_json::from_str::<SymbolsJson>(fragment) {
            return cleaned_symbols(parsed.symbols, completion);
        }
    }

    Err(unparseable("no symbol array found", completion))
}

fn symbol_array(clean: &str) -> Option<Vec<String>> {
    let fragment = extract_json_fragment(clean, '[', ']')?;
    serde_json::from_str::<Vec<String>>(fragment).ok()
}

fn action_from_json(parsed: ActionJson, completion: &str) -> Result<Action, PolicyError> {
    match parsed.action.as_str() {
        "extract" => extract_from_symbols(parsed.symbols, completion),
        "patch" => {
            let path = parsed
                .path
                .filter(|p| !p.is_empty())
                .ok_or_else(|| unparseable("patch action without a path", completion))?;
            let search = parsed
                .search
                .filter(|s| !s.is_empty())
                .ok_or_else(|| unparseable("patch action without search text", completion))?;
            let replace = parsed
                .replace
                .ok_or_else(|| unparseable("patch action without replacement text", completion))?;
            Ok(Action::Patch { path: PathBuf::from(path), search, replace })
        }
        "done" => Ok(Action::Done { summary: parsed.summary }),
        other => Err(unparseable(format!("unknown action '{other}'"), completion)),
    }
}

fn extract_from_symbols(symbols: Vec<String>, completion: &str) -> Result<Action, PolicyError> {
    let symbols = cleaned_symbols(symbols, completion)?;
    Ok(Action::Extract { symbols })
}

fn cleaned_symbols(symbols: Vec<String>, completion: &str) -> Result<Vec<String>, PolicyError> {
    let mut cleaned: Vec<String> = Vec::new();
    for symbol in symbols {
        let symbol = symbol.trim().trim_end_matches("()").to_string();
        if symbol.is_empty() || cleaned.contains(&symbol) {
            continue;
        }
        cleaned.push(symbol);
    }
    if cleaned.is_empty() {
        return Err(unparseable("empty symbol list", completion));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_extract_action() {
        let action =
            parse_action(r#"{"action": "extract", "symbols": ["vuln_copy", "parse_header"]}"#)
                .unwrap();
        assert_eq!(
            action,
            Action::Extract { symbols: vec!["vuln_copy".into(), "parse_header".into()] }
        );
    }

    #[test]
    fn parses_a_fenced_patch_action() {
        let completion = r#"Here is my fix:
```json
{"action": "patch", "path": "lib/buffer.cc", "search": "strcpy(dst, src)", "replace": "strncpy(dst, src, sizeof(dst))"}
```"#;
        let action = parse_action(completion).unwrap();
        assert_eq!(
            action,
            Action::Patch {
                path: "lib/buffer.cc".into(),
                search: "strcpy(dst, src)".into(),
                replace: "strncpy(dst, src, sizeof(dst))".into(),
            }
        );
    }

    #[test]
    fn parses_done_with_a_summary() {
        let action = parse_action(r#"{"action": "done", "summary": "bounds check added"}"#).unwrap();
        assert_eq!(action, Action::Done { summary: "bounds check added".into() });
    }

    #[test]
    fn bare_symbol_arrays_become_extractions() {
        let action = parse_action(r#"The relevant symbols: ["readBlock", "decode"]"#).unwrap();
        assert_eq!(action, Action::Extract { symbols: vec!["readBlock".into(), "decode".into()] });
    }

    #[test]
    fn patch_without_fields_is_unparseable() {
        let err = parse_action(r#"{"action": "patch", "path": "a.cc"}"#).unwrap_err();
        assert!(matches!(err, PolicyError::Unparseable { .. }));
    }

    #[test]
    fn prose_is_unparseable() {
        let err = parse_action("I think the bug is in the copy loop.").unwrap_err();
        assert!(matches!(
            err,
            PolicyError::Unparseable { phase: PolicyPhase::Parsing, .. }
        ));
    }

    #[test]
    fn symbols_are_deduped_and_stripped() {
        let symbols =
            parse_symbols(r#"["vuln_copy()", " vuln_copy", "parse_header", ""]"#).unwrap();
        assert_eq!(symbols, vec!["vuln_copy".to_string(), "parse_header".to_string()]);
    }

    #[test]
    fn symbols_accept_the_object_shape() {
        let symbols = parse_symbols(r#"{"symbols": ["a", "b"]}"#).unwrap();
        assert_eq!(symbols, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn empty_symbol_lists_are_rejected() {
        assert!(parse_symbols("[]").is_err());
    }
}
