//! Benchmarks for the per-stage hot paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relayflow::context::StateField;
use relayflow::events::{sanitize_error, LifecycleEvent, LifecycleEventType};
use relayflow::resilience::{CircuitBreaker, CircuitBreakerConfig};
use relayflow::testing::{fill_sample, test_state};

fn breaker_benchmark(c: &mut Criterion) {
    let breaker = CircuitBreaker::new("data", CircuitBreakerConfig::default());

    c.bench_function("breaker_can_execute", |b| {
        b.iter(|| black_box(breaker.can_execute()));
    });

    c.bench_function("breaker_record_success", |b| {
        b.iter(|| breaker.record_success());
    });
}

fn event_benchmark(c: &mut Criterion) {
    let event = LifecycleEvent::new(
        LifecycleEventType::ToolCompleted,
        "session-1",
        Some("data".to_string()),
        serde_json::json!({ "stage": "data", "fields": ["data_result"] }),
    );

    c.bench_function("event_serialize", |b| {
        b.iter(|| serde_json::to_value(black_box(&event)));
    });

    let raw = "Traceback (most recent call last):\n  File \"worker.py\", line 12\nValueError: token sk-live-abc123 rejected";
    c.bench_function("sanitize_error", |b| {
        b.iter(|| sanitize_error(black_box(raw)));
    });
}

fn state_benchmark(c: &mut Criterion) {
    let mut state = test_state("bench-run");
    for field in StateField::ALL {
        fill_sample(&mut state, field);
    }

    c.bench_function("state_digest", |b| {
        b.iter(|| black_box(&state).digest());
    });

    c.bench_function("state_snapshot", |b| {
        b.iter(|| black_box(&state).to_snapshot());
    });
}

criterion_group!(benches, breaker_benchmark, event_benchmark, state_benchmark);
criterion_main!(benches);
