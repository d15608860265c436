//! # Beacon Chain Benchmarks
//!
//! | Area | Operation |
//! |------|-----------|
//! | Committee math | Seeded shuffle, candidate assignment |
//! | State transition | Apply a block staking many keys |
//! | Hashing | Best-state hash |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qc_14_beacon_chain::test_utils::{genesis_state, next_block, stake_instruction};
use qc_14_beacon_chain::{assign_candidates, shuffle, ChainParams, CommitteeKey};
use std::collections::BTreeMap;
use std::time::Duration;

fn keys(n: usize) -> Vec<CommitteeKey> {
    (0..n)
        .map(|i| CommitteeKey::parse(&format!("validator-{}", i)).unwrap())
        .collect()
}

fn bench_committee_math(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-14-committee-math");
    group.measurement_time(Duration::from_secs(5));

    for size in [64, 512, 4_096] {
        let candidates = keys(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("shuffle", size), &candidates, |b, c| {
            b.iter(|| black_box(shuffle(c, black_box(-7_345_211))))
        });

        let pending = BTreeMap::new();
        group.bench_with_input(BenchmarkId::new("assign", size), &candidates, |b, c| {
            b.iter(|| black_box(assign_candidates(c, &pending, 42, usize::MAX, 64).unwrap()))
        });
    }
    group.finish();
}

fn bench_apply_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("qc-14-state-transition");
    let params = ChainParams::for_testing();
    let state = genesis_state();

    for stakers in [16, 256] {
        let names: Vec<String> = (0..stakers).map(|i| format!("staker-{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let block = next_block(
            &state,
            &params,
            vec![stake_instruction(&refs, "shard", true)],
        );

        group.throughput(Throughput::Elements(stakers as u64));
        group.bench_with_input(BenchmarkId::new("apply_stake", stakers), &block, |b, block| {
            b.iter(|| {
                let mut next = state.clone();
                next.apply_block(block, &params).unwrap();
                black_box(next.height)
            })
        });
    }

    group.bench_function("state_hash", |b| b.iter(|| black_box(state.hash())));
    group.finish();
}

criterion_group!(benches, bench_committee_math, bench_apply_block);
criterion_main!(benches);
