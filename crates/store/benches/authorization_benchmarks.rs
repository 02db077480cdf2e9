use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use sentra_core::{GroupId, UserId};
use sentra_engine::{AuthorizationEngine, CheckOptions};
use sentra_store::{InMemoryAuditSink, InMemoryAuthStore};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("failed to build runtime")
}

/// One user per group, one role per group, every role granting `docs:read`.
fn setup(users: usize) -> (AuthorizationEngine, Vec<UserId>) {
    let store = Arc::new(InMemoryAuthStore::new());
    let audit = Arc::new(InMemoryAuditSink::new());
    let permission = store.insert_permission("docs:read");

    let mut user_ids = Vec::with_capacity(users);
    for _ in 0..users {
        let user = UserId::new();
        let group = GroupId::new();
        let role = store.insert_role(format!("reader-{user}"));
        store.grant_permission_to_role(role, permission);
        store.add_membership(user, group, None);
        store.add_group_role(group, role, None);
        user_ids.push(user);
    }

    let engine = AuthorizationEngine::new(
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        audit as _,
    );
    (engine, user_ids)
}

fn bench_decision_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("decision_latency");
    group.sample_size(1000);

    group.bench_function("user_check_allowed", |b| {
        let rt = runtime();
        let (engine, users) = setup(1);
        let user = users[0];
        b.iter(|| {
            let result = rt
                .block_on(engine.check_user_permission(
                    user,
                    black_box("docs:read"),
                    &CheckOptions::default(),
                ))
                .unwrap();
            black_box(result.allowed)
        });
    });

    group.bench_function("user_check_denied_no_roles", |b| {
        let rt = runtime();
        let (engine, _) = setup(1);
        let stranger = UserId::new();
        b.iter(|| {
            let result = rt
                .block_on(engine.check_user_permission(
                    stranger,
                    black_box("docs:read"),
                    &CheckOptions::default(),
                ))
                .unwrap();
            black_box(result.allowed)
        });
    });

    group.finish();
}

fn bench_batch_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_role_resolution");

    for batch_size in [1usize, 10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("user_permissions_batch", batch_size),
            &batch_size,
            |b, &size| {
                let rt = runtime();
                let (engine, users) = setup(size);
                b.iter(|| {
                    let resolved = rt
                        .block_on(engine.user_permissions_batch(black_box(&users)))
                        .unwrap();
                    black_box(resolved.len())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_decision_latency, bench_batch_resolution);
criterion_main!(benches);
