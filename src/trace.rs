//! Crash-log ingestion: extract a structured stack trace from raw crash
//! text before any pattern matching runs.
//!
//! Parsing is best-effort by design. Sanitizer reports, JVM dumps and
//! hand-pasted logs all flow through here; text we cannot make sense of
//! yields an empty trace, never an error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One resolved frame of a crash stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Symbol as it appeared in the report (possibly qualified).
    pub symbol: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Frame {
    /// Bare name used for symbol lookup: the tail of a `ns::func` or
    /// `com.foo.Bar.method` chain, without any argument list.
    pub fn lookup_name(&self) -> &str {
        let base = self.symbol.split('(').next().unwrap_or(&self.symbol);
        let base = base.rsplit("::").next().unwrap_or(base);
        base.rsplit('.').next().unwrap_or(base)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTrace {
    pub frames: Vec<Frame>,
}

// ASan / GDB: "#0 0x4f1b2c in vuln_copy /src/buffer.cc:42:9"
//             "#1  copy_name (dst=0x7ffe...) at buffer.cc:17"
fn native_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*#\d+\s+(?:0x[0-9a-fA-F]+\s+in\s+)?([~\w:]+)").expect("native frame regex")
    })
}

fn native_location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([\w./\\+-]+\.(?:cc|cpp|cxx|c|hh|hpp|h)):(\d+)").expect("native location regex")
    })
}

// JVM: "    at com.example.Handler.process(Handler.java:42)"
fn java_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*at\s+([\w.$<>/]+)\(([^)]*)\)").expect("java frame regex"))
}

fn java_location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\w$]+\.java):(\d+)").expect("java location regex"))
}

impl StackTrace {
    /// Best-effort parse of raw crash text. Unrecognized lines are skipped;
    /// arbitrary text parses to an empty trace.
    pub fn parse(crash_text: &str) -> Self {
        let mut frames = Vec::new();

        for line in crash_text.lines() {
            if let Some(caps) = native_frame_re().captures(line) {
                let symbol = caps[1].to_string();
                // bare addresses with no symbol are useless for lookup
                if symbol.starts_with("0x")
                    || (symbol.len() > 6 && symbol.chars().all(|c| c.is_ascii_hexdigit()))
                {
                    continue;
                }
                let (file, line_no) = match native_location_re().captures(line) {
                    Some(loc) => (Some(loc[1].to_string()), loc[2].parse().ok()),
                    None => (None, None),
                };
                frames.push(Frame { symbol, file, line: line_no });
                continue;
            }

            if let Some(caps) = java_frame_re().captures(line) {
                let symbol = caps[1].to_string();
                let (file, line_no) = match java_location_re().captures(&caps[2]) {
                    Some(loc) => (Some(loc[1].to_string()), loc[2].parse().ok()),
                    None => (None, None),
                };
                frames.push(Frame { symbol, file, line: line_no });
            }
        }

        Self { frames }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Deduplicated lookup names for the topmost `max` frames, crash
    /// site first.
    pub fn top_symbols(&self, max: usize) -> Vec<String> {
        let mut seen = Vec::new();
        for frame in &self.frames {
            let name = frame.lookup_name();
            if name.is_empty() || name == "<init>" {
                continue;
            }
            if !seen.iter().any(|s| s == name) {
                seen.push(name.to_string());
            }
            if seen.len() == max {
                break;
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASAN_REPORT: &str = r#"
==1234==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x602000000018
WRITE of size 24 at 0x602000000018 thread T0
    #0 0x4f1b2c in vuln_copy /src/lib/buffer.cc:42:9
    #1 0x4f1d03 in parse_header /src/lib/parser.cc:108
    #2 0x4f2001 in main /src/main.cc:15
"#;

    const GDB_BACKTRACE: &str = r#"
Program received signal SIGSEGV, Segmentation fault.
#0  vuln_copy (dst=0x7ffe0000, src=0x402010) at buffer.cc:42
#1  0x00000000004f1d03 in parse_header (input=...) at parser.cc:108
"#;

    const JAVA_TRACE: &str = r#"
Exception in thread "main" java.lang.ArrayIndexOutOfBoundsException: Index 8
    at com.example.codec.Decoder.readBlock(Decoder.java:77)
    at com.example.codec.Decoder.decode(Decoder.java:31)
    at com.example.Main.main(Main.java:12)
    at java.base/jdk.internal.reflect.DirectMethodHandleAccessor.invoke(Unknown Source)
"#;

    #[test]
    fn asan_frames_parse_with_locations() {
        let trace = StackTrace::parse(ASAN_REPORT);
        assert_eq!(trace.frames.len(), 3);
        assert_eq!(trace.frames[0].symbol, "vuln_copy");
        assert_eq!(trace.frames[0].file.as_deref(), Some("/src/lib/buffer.cc"));
        assert_eq!(trace.frames[0].line, Some(42));
    }

    #[test]
    fn gdb_frames_parse_with_and_without_addresses() {
        let trace = StackTrace::parse(GDB_BACKTRACE);
        assert_eq!(trace.frames.len(), 2);
        assert_eq!(trace.frames[0].symbol, "vuln_copy");
        assert_eq!(trace.frames[1].symbol, "parse_header");
        assert_eq!(trace.frames[1].file.as_deref(), Some("parser.cc"));
    }

    #[test]
    fn java_frames_parse_and_tolerate_unknown_source() {
        let trace = StackTrace::parse(JAVA_TRACE);
        assert_eq!(trace.frames.len(), 4);
        assert_eq!(trace.frames[0].symbol, "com.example.codec.Decoder.readBlock");
        assert_eq!(trace.frames[0].file.as_deref(), Some("Decoder.java"));
        assert_eq!(trace.frames[0].line, Some(77));
        assert_eq!(trace.frames[3].file, None);
        assert_eq!(trace.frames[3].line, None);
    }

    #[test]
    fn lookup_names_strip_qualification() {
        let trace = StackTrace::parse(JAVA_TRACE);
        assert_eq!(trace.frames[0].lookup_name(), "readBlock");

        let frame = Frame { symbol: "ns::inner::copy_name(char*)".into(), file: None, line: None };
        assert_eq!(frame.lookup_name(), "copy_name");
    }

    #[test]
    fn top_symbols_dedup_in_crash_order() {
        let trace = StackTrace::parse(JAVA_TRACE);
        assert_eq!(trace.top_symbols(2), vec!["readBlock".to_string(), "decode".to_string()]);
    }

    #[test]
    fn garbage_yields_an_empty_trace() {
        let trace = StackTrace::parse("the printer is on fire\nno frames here\n");
        assert!(trace.is_empty());
    }
}
