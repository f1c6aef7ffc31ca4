//! Template compilation benchmark.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ontoloom::query::compile_template;

fn bench_compile(c: &mut Criterion) {
    let small = "SELECT * FROM orders WHERE email = {{email}} AND total > {{min_total}}";
    let wide: String = {
        let clauses: Vec<String> = (0..40)
            .map(|i| format!("col_{i} = {{{{param_{i}}}}}"))
            .collect();
        format!("SELECT * FROM wide WHERE {}", clauses.join(" AND "))
    };

    c.bench_function("compile_small_template", |b| {
        b.iter(|| compile_template(black_box(small)));
    });
    c.bench_function("compile_wide_template", |b| {
        b.iter(|| compile_template(black_box(&wide)));
    });
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
