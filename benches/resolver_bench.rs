//! Criterion benchmarks for the resolver and rule evaluator.
//!
//! Measures raw resolution cost against a prebuilt environment: expression
//! construction and JSON parsing are kept out of the measured loop.
//!
//! Run:
//!   cargo bench
//!   cargo bench -- simple_path # one group
//!   cargo bench -- validation  # one group

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pathrule::builder::{all, count, for_each, lit, navigate, path, rule, sum};
use pathrule::{resolve_and_evaluate, EvalExpr, Environment, Rule};
use serde_json::{json, Value};

// ── Data builders ─────────────────────────────────────────────────────────────

/// Flat numeric array: {"values": [0, 1, ..., n-1]}.
fn numeric_array(n: usize) -> Value {
    json!({ "values": (0..n).collect::<Vec<usize>>() })
}

/// n line-item objects: {id, value, active}.
fn items(n: usize) -> Value {
    let items: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "id": i,
                "value": 10.0 + i as f64 * 2.5,
                "active": i % 2 == 0
            })
        })
        .collect();
    json!({ "items": items })
}

/// 12-level nested object terminating in a number.
fn deep_object() -> Value {
    let mut v = json!(42);
    for key in ["l", "k", "j", "i", "h", "g", "f", "e", "d", "c", "b", "a"] {
        v = json!({ key: v });
    }
    v
}

#[inline]
fn eval(env: &Environment, expr: &EvalExpr) -> Value {
    resolve_and_evaluate(env, expr).unwrap()
}

// ── Bench groups ──────────────────────────────────────────────────────────────

fn bench_simple_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("simple_path");
    group.sample_size(300);

    {
        let env = Environment::for_data(json!({"name": "Alice", "age": 30}));
        let expr = path("name");
        group.bench_function("simple_path", |b| {
            b.iter(|| black_box(eval(black_box(&env), black_box(&expr))))
        });
    }

    {
        let env = Environment::for_data(deep_object());
        let expr = path("a.b.c.d.e.f.g.h.i.j.k.l");
        group.bench_function("deep_path_12", |b| {
            b.iter(|| black_box(eval(black_box(&env), black_box(&expr))))
        });
    }

    {
        let env = Environment::for_data(numeric_array(100));
        let expr = path("values[42]");
        group.bench_function("array_index_100", |b| {
            b.iter(|| black_box(eval(black_box(&env), black_box(&expr))))
        });
    }

    {
        let env = Environment::for_data(json!({"price": 10.5, "quantity": 3}));
        let expr = path("price").mul(path("quantity"));
        group.bench_function("arithmetic", |b| {
            b.iter(|| black_box(eval(black_box(&env), black_box(&expr))))
        });
    }

    group.finish();
}

fn bench_broadcasting(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcasting");

    // aggregates on flat numeric arrays at three sizes
    for n in [100_usize, 1000, 10000] {
        let env = Environment::for_data(numeric_array(n));
        let expr_sum = sum(path("values"));
        let expr_count = count(path("values"));

        group.bench_with_input(BenchmarkId::new("sum", n), &env, |b, e| {
            b.iter(|| black_box(eval(black_box(e), black_box(&expr_sum))))
        });
        if n == 100 {
            group.bench_with_input(BenchmarkId::new("count", n), &env, |b, e| {
                b.iter(|| black_box(eval(black_box(e), black_box(&expr_count))))
            });
        }
    }

    // field extraction across 100 item objects
    {
        let env = Environment::for_data(items(100));
        let expr = navigate("items.value");
        group.bench_function("map_field_100", |b| {
            b.iter(|| black_box(eval(black_box(&env), black_box(&expr))))
        });
    }

    // map then aggregate
    {
        let env = Environment::for_data(items(100));
        let expr = sum(navigate("items.value"));
        group.bench_function("map_sum_100", |b| {
            b.iter(|| black_box(eval(black_box(&env), black_box(&expr))))
        });
    }

    // filter with a per-element predicate
    {
        let env = Environment::for_data(items(100));
        let expr = path("items").filter(path("value").gt(lit(100.0)));
        group.bench_function("filter_predicate_100", |b| {
            b.iter(|| black_box(eval(black_box(&env), black_box(&expr))))
        });
    }

    // filter then map then aggregate
    {
        let env = Environment::for_data(items(100));
        let expr = sum(path("items")
            .filter(path("active").equals(lit(true)))
            .dot(path("value")));
        group.bench_function("filter_map_sum_100", |b| {
            b.iter(|| black_box(eval(black_box(&env), black_box(&expr))))
        });
    }

    group.finish();
}

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");

    fn ruleset() -> Rule {
        all(vec![for_each(
            path("items"),
            "i",
            all(vec![
                rule(path("value")).must(path("value").gt(lit(0))).build(),
                rule(path("id"))
                    .must(path("id").ge(lit(0)))
                    .message(lit("id must not be negative"))
                    .build(),
            ]),
        )])
    }

    for n in [10_usize, 100] {
        let rules = ruleset();
        let env = Environment::for_data(items(n));
        group.bench_with_input(BenchmarkId::new("for_each_clean", n), &env, |b, e| {
            b.iter(|| black_box(pathrule::evaluate_rule(black_box(&rules), black_box(e)).unwrap()))
        });
    }

    // every element fails: failure construction dominates
    {
        let rules = ruleset();
        let failing: Vec<Value> = (0..100)
            .map(|i| json!({"id": i, "value": -1.0, "active": false}))
            .collect();
        let env = Environment::for_data(json!({ "items": failing }));
        group.bench_function("for_each_all_failing_100", |b| {
            b.iter(|| black_box(pathrule::evaluate_rule(black_box(&rules), black_box(&env)).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_simple_paths,
    bench_broadcasting,
    bench_validation,
);
criterion_main!(benches);
