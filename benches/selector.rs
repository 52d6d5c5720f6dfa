//! Benchmarks for operator selection and clone detection.

use std::collections::BTreeMap;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::prelude::*;

use evoloop::{
    evolution::{
        Candidate, CandidateId, CallOutcome, Fitness, Lineage, OperatorCategory,
        OperatorSelector, Quality, detect_clone_groups, bitstring::BitString,
    },
    schema::{DefaultEnabling, OperatorsConfig, SelectionStrategy},
};

fn selector(operators: usize, strategy: SelectionStrategy) -> (OperatorSelector, Vec<String>) {
    let names: Vec<String> = (0..operators).map(|i| format!("op{i:03}")).collect();
    let config = OperatorsConfig {
        default_enabling: DefaultEnabling::All,
        strategy,
        ..Default::default()
    };
    let mut selector = OperatorSelector::new(&config, 20);
    selector
        .apply_default_enabling(
            "bench",
            names.iter().map(|n| (n.as_str(), OperatorCategory::DefaultOn)),
        )
        .unwrap();
    for name in &names {
        selector.success(name);
    }

    // One generation of history so weights differ
    let mut rng = StdRng::seed_from_u64(1);
    let calls: Vec<CallOutcome> = names
        .iter()
        .map(|name| {
            let mut call = CallOutcome::new(name.as_str(), 1);
            call.record_evaluated();
            call.record_quality(*Quality::ALL.choose(&mut rng).unwrap());
            call.record_reward(rng.gen_range(0.0..1.0));
            call
        })
        .collect();
    selector.step(1, 1, &calls);
    selector.prepare_for_generation();
    (selector, names)
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");

    for operators in [4, 16, 64] {
        for (label, strategy) in [
            ("histogram", SelectionStrategy::Histogram),
            ("dmab", SelectionStrategy::Dmab { kappa: 1.0 }),
        ] {
            let (mut selector, _) = selector(operators, strategy);
            let mut rng = StdRng::seed_from_u64(7);
            group.bench_with_input(
                BenchmarkId::new(label, operators),
                &operators,
                |b, _| {
                    b.iter(|| black_box(selector.select(&mut rng).unwrap()));
                },
            );
        }
    }

    group.finish();
}

fn bench_clone_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect_clone_groups");

    for size in [50, 200, 800] {
        let mut rng = StdRng::seed_from_u64(3);
        let arena: BTreeMap<CandidateId, Candidate<BitString>> = (0..size)
            .map(|i| {
                // Short strings so that clones are common
                let bits = BitString::new((0..8).map(|_| rng.gen_bool(0.5)).collect());
                let mut candidate = Candidate::new(CandidateId::new(i), bits, Lineage::seed(), 0);
                candidate.set_raw_fitness(Fitness::new(vec![rng.gen_range(0.0..8.0)]));
                (candidate.id, candidate)
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &arena, |b, arena| {
            b.iter(|| black_box(detect_clone_groups(arena)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_select, bench_clone_detection);
criterion_main!(benches);
