//! Scratch arena fill and reuse benchmarks.
//!
//! Compares the first fill of a session (every region grows) against the
//! per-term refill a boosting loop performs (every region reused).
//!
//! Run with: `cargo bench --bench arena_reuse`

use std::sync::Arc;
use std::time::Duration;

use booster_shell::{
    ArenaRequirements, BoosterConfig, BoosterCore, HandleRegistry, ScratchArena, ScratchBudget,
    SessionCore, TaskKind, Term, TreeLimits,
};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_criterion() -> Criterion {
    Criterion::default()
        .configure_from_args()
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(5))
        .sample_size(20)
}

fn session_core(task: TaskKind, n_bins: usize) -> Arc<dyn SessionCore> {
    let config = BoosterConfig::builder()
        .task(task)
        .tree(TreeLimits::new(6, 64))
        .build()
        .expect("valid config");
    let terms = vec![Term::main(n_bins), Term::new([n_bins / 4, n_bins / 4])];
    Arc::new(BoosterCore::new(config, terms).expect("valid terms"))
}

const TASKS: [(&str, TaskKind); 3] = [
    ("regression", TaskKind::Regression),
    ("binary", TaskKind::BinaryClassification),
    ("multiclass5", TaskKind::MulticlassClassification { n_classes: 5 }),
];

// =============================================================================
// Arena
// =============================================================================

fn bench_arena_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena/fill");

    for (name, task) in TASKS {
        let core = session_core(task, 256);
        let req = ArenaRequirements::for_core(&*core).expect("requirements fit");

        group.bench_with_input(BenchmarkId::new("cold", name), &req, |b, req| {
            b.iter(|| {
                let mut budget = ScratchBudget::unlimited();
                let mut arena = ScratchArena::new();
                arena.fill(black_box(req), &mut budget).unwrap();
                black_box(arena.size_bytes())
            })
        });

        group.bench_with_input(BenchmarkId::new("reuse", name), &req, |b, req| {
            let mut budget = ScratchBudget::unlimited();
            let mut arena = ScratchArena::new();
            arena.fill(req, &mut budget).unwrap();
            b.iter(|| {
                arena.fill(black_box(req), &mut budget).unwrap();
                black_box(arena.metrics().reuses)
            })
        });
    }

    group.finish();
}

// =============================================================================
// Session
// =============================================================================

fn bench_prepare_term(c: &mut Criterion) {
    let mut group = c.benchmark_group("session/prepare_term");

    for (name, task) in TASKS {
        let core = session_core(task, 256);
        let mut registry = HandleRegistry::new();
        let h = registry.create();
        registry.attach_core(h, core).unwrap();
        registry.fill_allocations(h).unwrap();

        group.bench_function(name, |b| {
            let mut term = 0;
            b.iter(|| {
                registry.prepare_term(h, black_box(term)).unwrap();
                term ^= 1;
            })
        });

        registry.free(h).unwrap();
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = bench_criterion();
    targets = bench_arena_fill, bench_prepare_term
}
criterion_main!(benches);
