//! Host/engine round-trip benchmarks
//!
//! Run with: cargo bench -p qjs-core

use criterion::{Criterion, criterion_group, criterion_main};
use qjs_core::{EvalFlags, HostValue, QjsRuntime};
use std::hint::black_box;

/// Benchmark: evaluating small scripts
fn bench_eval(c: &mut Criterion) {
    let runtime = QjsRuntime::new().unwrap();
    let ctx = runtime.create_context().unwrap();

    c.bench_function("eval_arithmetic", |b| {
        b.iter(|| black_box(ctx.eval("1 + 2 * 3", "<bench>", EvalFlags::GLOBAL).unwrap()));
    });

    c.bench_function("eval_object_literal", |b| {
        b.iter(|| {
            let value = ctx
                .eval("({ a: 1, b: [1, 2, 3] })", "<bench>", EvalFlags::GLOBAL)
                .unwrap();
            black_box(value)
        });
    });
}

/// Benchmark: calling script functions from the host and host functions from script
fn bench_calls(c: &mut Criterion) {
    let runtime = QjsRuntime::new().unwrap();
    let ctx = runtime.create_context().unwrap();
    ctx.eval("function sq(n) { return n * n; }", "<bench>", EvalFlags::GLOBAL)
        .unwrap();
    let sq = ctx.global().unwrap().get("sq").unwrap().into_handle().unwrap();

    c.bench_function("call_script_function", |b| {
        b.iter(|| black_box(sq.call(&[HostValue::Int(7)]).unwrap()));
    });

    ctx.global()
        .unwrap()
        .define_function("add", 2, |_, args| {
            Ok(HostValue::Float(args.get(0)?.to_f64()? + args.get(1)?.to_f64()?))
        })
        .unwrap();

    c.bench_function("call_host_function_1000x", |b| {
        b.iter(|| {
            let value = ctx
                .eval(
                    "{ let t = 0; for (let i = 0; i < 1000; i++) t = add(t, i); t }",
                    "<bench>",
                    EvalFlags::GLOBAL,
                )
                .unwrap();
            black_box(value)
        });
    });
}

/// Benchmark: string and JSON conversion
fn bench_conversion(c: &mut Criterion) {
    let runtime = QjsRuntime::new().unwrap();
    let ctx = runtime.create_context().unwrap();
    let text = HostValue::from("x".repeat(1024));

    c.bench_function("string_round_trip_1k", |b| {
        b.iter(|| {
            let value = ctx.convert_from_host(&text).unwrap();
            black_box(ctx.convert_to_host(value, true).unwrap())
        });
    });

    let obj = ctx
        .eval(
            "({ items: Array.from({ length: 100 }, (_, i) => ({ id: i, name: 'item' + i })) })",
            "<bench>",
            EvalFlags::GLOBAL,
        )
        .unwrap();
    c.bench_function("to_json_value_100_items", |b| {
        b.iter(|| black_box(obj.to_json_value().unwrap()));
    });
}

criterion_group!(benches, bench_eval, bench_calls, bench_conversion);
criterion_main!(benches);
