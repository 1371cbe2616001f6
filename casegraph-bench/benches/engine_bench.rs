//! Transition engine benchmarks.

use casegraph_core::{
    AttributeContext, BlobSource, CaseStore, Clock, DocumentStore, FixedClock, Guard, Predicates,
    RequestStore,
};
use casegraph_service::{CaseService, Collaborators, Config, Scheduler};
use casegraph_storage::{attributes, LogTransport, MemoryStore};
use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;

// Unique reply tokens across all benchmark iterations
static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn create_test_service(rt: &Runtime) -> (Arc<MemoryStore>, CaseService) {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_date(
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
    ));
    let store = Arc::new(MemoryStore::with_clock(Arc::clone(&clock)));
    let collaborators = Collaborators {
        cases: Arc::clone(&store) as Arc<dyn CaseStore>,
        requests: Arc::clone(&store) as Arc<dyn RequestStore>,
        documents: Arc::clone(&store) as Arc<dyn DocumentStore>,
        blobs: Arc::clone(&store) as Arc<dyn BlobSource>,
        transport: Arc::new(LogTransport),
        clock,
    };
    let service = CaseService::new(
        Config::default(),
        collaborators,
        Scheduler::new(rt.handle().clone()),
    )
    .unwrap();
    (store, service)
}

fn bench_guard_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard_evaluation");

    let mut predicates = Predicates::new();
    predicates.register("rejected", |ctx: &AttributeContext| {
        Ok(ctx.get("rejecting_date").is_some())
    });
    predicates.register("issuance_in_institution", |ctx: &AttributeContext| {
        Ok(ctx.get("issue_method") == Some("institution"))
    });
    let ctx = AttributeContext::new(
        "c-1",
        attributes([("issue_method", Some("mfc")), ("rejecting_date", None)]),
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
        Arc::new(predicates),
    );

    group.bench_function("parse", |b| {
        b.iter(|| black_box(Guard::parse("!issuance_in_institution && !rejected").unwrap()));
    });

    let simple = Guard::parse("rejected").unwrap();
    group.bench_function("simple", |b| {
        b.iter(|| black_box(simple.evaluate(&ctx).unwrap()));
    });

    let compound = Guard::parse("!issuance_in_institution && !rejected").unwrap();
    group.bench_function("compound", |b| {
        b.iter(|| black_box(compound.evaluate(&ctx).unwrap()));
    });

    group.finish();
}

fn bench_apply_transition(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_apply_transition");
    group.throughput(Throughput::Elements(1));

    let rt = Runtime::new().unwrap();
    let (store, service) = create_test_service(&rt);
    let case = store.create_case(
        "sd_full_auto_case",
        attributes([
            ("state", Some("packaging")),
            ("planned_sending_date", Some("2025-06-20")),
        ]),
    );
    let params = serde_json::json!({"pending_register_number": "42"});

    // packaging -> pending -> packaging, forever
    group.bench_function("round_trip", |b| {
        b.iter(|| {
            black_box(service.apply_transition(&case, "pending", &params).unwrap());
            black_box(
                service
                    .apply_transition(&case, "packaging", &serde_json::Value::Null)
                    .unwrap(),
            );
        });
    });

    group.finish();
}

fn bench_apply_reply(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_apply_reply");
    group.throughput(Throughput::Elements(1));

    let rt = Runtime::new().unwrap();
    let (store, service) = create_test_service(&rt);

    group.bench_function("response_closes_case", |b| {
        b.iter(|| {
            let token = format!("m-{}", TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed));
            let case = store.create_case(
                "sd_full_auto_case",
                attributes([
                    ("state", Some("smev_sending")),
                    ("issue_method", Some("institution")),
                ]),
            );
            store.create(&case.id, &token, None).unwrap();
            let body = serde_json::json!({
                "id": token,
                "format": "RESPONSE",
                "content": {"special_data": "<reply/>"},
            })
            .to_string();
            black_box(service.process_message(&body).unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_guard_evaluation,
    bench_apply_transition,
    bench_apply_reply,
);

criterion_main!(benches);
