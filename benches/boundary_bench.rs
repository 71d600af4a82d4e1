use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kiln::boundary::{materialize_locally, Value};
use kiln::services::{Event, EventBus, EventBusService};
use std::collections::BTreeMap;
use std::sync::Arc;

fn nested_value(depth: usize, width: usize) -> Value {
    if depth == 0 {
        return Value::String("rule-condition".repeat(4));
    }
    let mut map = BTreeMap::new();
    for i in 0..width {
        map.insert(format!("key{i}"), nested_value(depth - 1, width));
    }
    map.insert("tags".to_string(), Value::StringList(vec!["a".into(), "b".into()]));
    map.insert("blob".to_string(), Value::Bytes(vec![7; 64]));
    Value::Map(map)
}

/// Benchmark deep copies of values crossing a module boundary
fn bench_materialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("materialize");

    for depth in &[1usize, 2, 3, 4] {
        let value = nested_value(*depth, 4);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &value, |b, value| {
            b.iter(|| materialize_locally(black_box(value)));
        });
    }

    group.finish();
}

/// Benchmark event fan-out to pattern subscribers
fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_bus");

    for subscribers in &[1usize, 16, 64] {
        let bus = EventBusService::new();
        for i in 0..*subscribers {
            let pattern = if i % 2 == 0 { "rules/*" } else { "rules/changed" };
            bus.subscribe(pattern, "bench", Arc::new(|event: &Event| {
                black_box(&event.payload);
            }));
        }
        let payload = nested_value(2, 3);
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            subscribers,
            |b, _| {
                b.iter(|| bus.publish("rules/changed", &payload, "bench"));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_materialize, bench_publish);
criterion_main!(benches);
