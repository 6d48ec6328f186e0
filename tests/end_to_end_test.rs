//! End-to-end scenarios: span, metrics and log record from one observation.

use std::sync::Arc;
use std::time::Duration;

use metrics::Label;
use thiserror::Error;

use observe_core::telemetry::{AttributeValue, MemoryLogger, MemoryTracer, MetricsStore};
use observe_core::{Context, FieldValue, MetricRegistry, ObservationFactory};

#[derive(Debug, Error)]
enum BillingError {
    #[error("insufficient funds")]
    InsufficientFunds,
}

#[derive(Debug, Error)]
#[error("insufficient funds")]
struct InsufficientFunds;

struct Backends {
    store: Arc<MetricsStore>,
    registry: Arc<MetricRegistry>,
    tracer: Arc<MemoryTracer>,
    logger: Arc<MemoryLogger>,
}

fn backends() -> Backends {
    let store = Arc::new(MetricsStore::new());
    Backends {
        registry: Arc::new(MetricRegistry::new(store.clone())),
        store,
        tracer: Arc::new(MemoryTracer::new()),
        logger: Arc::new(MemoryLogger::default()),
    }
}

fn factory(b: &Backends, name: &str) -> Arc<ObservationFactory> {
    ObservationFactory::builder(name)
        .registry(b.registry.clone())
        .tracer(b.tracer.clone())
        .logger(b.logger.clone())
        .build()
        .unwrap()
}

fn error_label(value: &str) -> Vec<Label> {
    vec![Label::new("error", value.to_string())]
}

#[test]
fn successful_checkout() {
    let b = backends();
    let checkout = factory(&b, "checkout");

    let (_ctx, mut obs) = checkout.start(&Context::background());
    obs.add_field("user_id", 42);
    std::thread::sleep(Duration::from_millis(2));
    obs.end_ok();

    // Metrics
    assert_eq!(b.store.counter_value("checkout_total", &error_label("")), 1);
    let duration = b
        .store
        .histogram_summary("checkout_duration_seconds", &error_label(""))
        .unwrap();
    assert_eq!(duration.count, 1);
    assert!(duration.sum >= 0.002);

    // Span
    let span = b.tracer.find("checkout").unwrap();
    assert_eq!(span.attributes.get("user_id"), Some(&AttributeValue::Int(42)));
    assert!(!span.attributes.contains_key("error"));
    assert!(!span.error);

    // Log record
    let records = b.logger.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fields.get("user_id"), Some(&FieldValue::I64(42)));
}

#[test]
fn failed_checkout() {
    let b = backends();
    let checkout = factory(&b, "checkout");

    let (_ctx, mut obs) = checkout.start(&Context::background());
    obs.add_field("user_id", 42);
    let result: Result<(), InsufficientFunds> = Err(InsufficientFunds);
    obs.end_result(&result);

    assert_eq!(b.store.counter_value("checkout_total", &error_label("InsufficientFunds")), 1);
    assert_eq!(b.store.counter_value("checkout_total", &error_label("")), 0);
    assert!(b
        .store
        .histogram_summary("checkout_duration_seconds", &error_label("InsufficientFunds"))
        .is_some());

    let span = b.tracer.find("checkout").unwrap();
    assert!(span.error);
    assert_eq!(
        span.attributes.get("error"),
        Some(&AttributeValue::Str("insufficient funds".to_string()))
    );
}

#[test]
fn enum_errors_share_one_category() {
    let b = backends();
    let pay = factory(&b, "pay");
    for _ in 0..3 {
        let (_ctx, obs) = pay.start(&Context::background());
        obs.end(Some(&BillingError::InsufficientFunds));
    }
    assert_eq!(b.store.snapshot().counters["pay_total"].len(), 1);
    assert_eq!(b.store.counter_value("pay_total", &error_label("BillingError")), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_share_registration() {
    const TASKS: usize = 100;
    let b = backends();

    let mut handles = Vec::with_capacity(TASKS);
    for i in 0..TASKS {
        let registry = b.registry.clone();
        let tracer = b.tracer.clone();
        let logger = b.logger.clone();
        handles.push(tokio::spawn(async move {
            let op = ObservationFactory::builder("fanout")
                .registry(registry)
                .tracer(tracer)
                .logger(logger)
                .build()
                .unwrap();
            let (_ctx, mut obs) = op.start(&Context::background());
            obs.add_field("task", i);
            tokio::time::sleep(Duration::from_millis((i % 3) as u64)).await;
            obs.end_ok();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(b.registry.registrations(), 1);
    assert_eq!(b.store.registration_count(), 2);
    assert_eq!(b.store.counter_value("fanout_total", &error_label("")), TASKS as u64);
    let duration = b
        .store
        .histogram_summary("fanout_duration_seconds", &error_label(""))
        .unwrap();
    assert_eq!(duration.count, TASKS as u64);
    assert_eq!(duration.buckets.iter().sum::<u64>(), TASKS as u64);
    assert_eq!(b.tracer.finished().len(), TASKS);
    assert_eq!(b.logger.records().len(), TASKS);
}
