use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::hint::black_box;
use toolwarden::tools::{
    build_command_line, escape, escape_query, Argument, CacheKey, ShellDialect,
};

const DIALECTS: [ShellDialect; 3] = [
    ShellDialect::Posix,
    ShellDialect::Cmd,
    ShellDialect::PowerShell,
];

fn bench_escape(c: &mut Criterion) {
    let inputs = [
        ("safe", "left-pad@1.3.0"),
        ("spaces", "state machine library"),
        ("hostile", "test'; rm -rf / & echo \"$(id)\" | tee `x`"),
    ];

    let mut group = c.benchmark_group("escape");
    for dialect in DIALECTS {
        for (label, input) in inputs {
            group.bench_with_input(
                BenchmarkId::new(dialect.as_str(), label),
                &input,
                |b, input| b.iter(|| escape(black_box(input), dialect)),
            );
        }
    }
    group.finish();

    c.bench_function("escape_query_structured", |b| {
        b.iter(|| {
            escape_query(
                black_box("\"state machine\" OR fsm NOT deprecated language:rust"),
                ShellDialect::Cmd,
            )
        })
    });
}

fn bench_command_line(c: &mut Criterion) {
    let args: Vec<Argument> = vec![
        "repos".into(),
        Argument::Query("\"state machine\" OR fsm".to_string()),
        "--limit".into(),
        "20".into(),
        "--json".into(),
        "name,owner,stargazersCount".into(),
    ];

    let mut group = c.benchmark_group("build_command_line");
    for dialect in DIALECTS {
        group.bench_function(dialect.as_str(), |b| {
            b.iter(|| {
                build_command_line(
                    black_box(r"C:\Program Files\GitHub CLI\gh.exe"),
                    "search",
                    black_box(&args),
                    dialect,
                )
            })
        });
    }
    group.finish();

    c.bench_function("cache_key_derive", |b| {
        let params = json!({
            "args": ["repos", "state machine", "--limit", "20"],
            "env": {"GH_PAGER": "", "NO_COLOR": "1"},
            "dialect": "posix",
        });
        b.iter(|| CacheKey::derive(black_box("gh search"), &params))
    });
}

criterion_group!(benches, bench_escape, bench_command_line);
criterion_main!(benches);
