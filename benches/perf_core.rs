//! Core performance benchmarks: pattern matching and crash-trace parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use patchpilot::pattern::{CallExpressionPattern, MethodInvocationPattern};
use patchpilot::runnable::Runnable;
use patchpilot::trace::StackTrace;

fn cpp_source() -> String {
    let mut source = String::from("#include <cstring>\n");
    for i in 0..200 {
        source.push_str(&format!(
            "void handler_{i}(char *dst, const char *src) {{\n    strcpy(dst, src);\n    audit_{i}(dst);\n}}\n"
        ));
    }
    source
}

fn java_source() -> String {
    let mut source = String::from("class Decoder {\n");
    for i in 0..200 {
        source.push_str(&format!(
            "    byte[] readBlock{i}(byte[] data) {{ return decode(data, {i}); }}\n"
        ));
    }
    source.push_str("}\n");
    source
}

fn crash_report() -> String {
    let mut report = String::from("==1==ERROR: AddressSanitizer: heap-buffer-overflow\n");
    for i in 0..64 {
        report.push_str(&format!("    #{i} 0x4f{i:04x} in handler_{i} /src/lib/file_{i}.cc:{i}\n"));
    }
    report
}

fn bench_pattern_matching(c: &mut Criterion) {
    let cpp = cpp_source();
    let java = java_source();

    c.bench_function("match_cpp_calls", |b| {
        let pattern = CallExpressionPattern::new();
        b.iter(|| pattern.run(black_box(cpp.as_str())).unwrap())
    });

    c.bench_function("match_java_invocations", |b| {
        let pattern = MethodInvocationPattern::new();
        b.iter(|| pattern.run(black_box(java.as_str())).unwrap())
    });
}

fn bench_trace_parsing(c: &mut Criterion) {
    let report = crash_report();
    c.bench_function("parse_crash_trace", |b| {
        b.iter(|| StackTrace::parse(black_box(&report)))
    });
}

criterion_group!(benches, bench_pattern_matching, bench_trace_parsing);
criterion_main!(benches);
