//! Read-Only Gate Benchmarks
//!
//! Every query passes the gate before it reaches a connection, so it sits on
//! the hot path of both the daemon and the direct CLI route.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sherlock::{validate_cache_command, validate_query};

fn bench_simple_select(c: &mut Criterion) {
    c.bench_function("validate_simple_select", |b| {
        b.iter(|| validate_query(black_box("SELECT id, name FROM users WHERE id = 42")));
    });
}

fn bench_commented_query(c: &mut Criterion) {
    let sql = "WITH recent AS ( -- last day only\n\
               SELECT * FROM orders /* hot table */ WHERE created_at > now() - interval '1 day'\n\
               ) SELECT user_id, SUM(total) FROM recent # per user\n\
               GROUP BY user_id ORDER BY 2 DESC LIMIT 100";
    c.bench_function("validate_commented_query", |b| {
        b.iter(|| validate_query(black_box(sql)));
    });
}

fn bench_rejected_query(c: &mut Criterion) {
    c.bench_function("validate_rejected_query", |b| {
        b.iter(|| validate_query(black_box("SELECT * FROM users; DROP TABLE users")));
    });
}

fn bench_large_query(c: &mut Criterion) {
    let columns: Vec<String> = (0..500).map(|i| format!("column_{i}")).collect();
    let sql = format!("SELECT {} FROM wide_table", columns.join(", "));
    c.bench_function("validate_large_query", |b| {
        b.iter(|| validate_query(black_box(&sql)));
    });
}

fn bench_cache_command(c: &mut Criterion) {
    c.bench_function("validate_cache_command", |b| {
        b.iter(|| validate_cache_command(black_box("CONFIG"), black_box(&["GET", "maxmemory"])));
    });
}

criterion_group!(
    benches,
    bench_simple_select,
    bench_commented_query,
    bench_rejected_query,
    bench_large_query,
    bench_cache_command
);
criterion_main!(benches);
