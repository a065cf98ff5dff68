//! Segmentation Performance Benchmark
//!
//! Measures frame → event → cycle throughput on synthetic sessions.
//!
//! **Goal:** Segmentation should be negligible next to frame classification
//! **Target:** one hour of 2 fps frames in well under 10 ms

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use opcycle_ca::services::{CycleAssembler, EventDetector, StatisticsEngine, TransitionTable};
use opcycle_ca::types::LabeledFrame;
use opcycle_common::OperationalState;

/// Synthetic session: repeated 20s cycles sampled at 2 fps
fn session(seconds: usize) -> Vec<LabeledFrame> {
    use OperationalState::*;

    (0..seconds * 2)
        .map(|i| {
            let t = i as f64 / 2.0;
            let state = match (t as usize) % 20 {
                0..=7 => ActivePrimary,
                8..=10 => TransitToSecondary,
                11..=14 => ActiveSecondary,
                15..=17 => TransitToPrimary,
                _ => Idle,
            };
            LabeledFrame::new(state, t, format!("{:.1}", t), i)
        })
        .collect()
}

fn bench_segmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation");
    let table = Arc::new(TransitionTable::default());
    let detector = EventDetector::new(Arc::clone(&table));
    let assembler = CycleAssembler::new(Arc::clone(&table));

    for minutes in [1usize, 10, 60] {
        let frames = session(minutes * 60);
        let events = detector.detect(&frames);

        group.bench_function(BenchmarkId::new("detect_events", minutes), |b| {
            b.iter(|| black_box(detector.detect(black_box(&frames))));
        });

        group.bench_function(BenchmarkId::new("assemble_cycles", minutes), |b| {
            b.iter(|| black_box(assembler.assemble(black_box(&events))));
        });

        let cycles = assembler.assemble(&events).cycles;
        let engine = StatisticsEngine::new();
        group.bench_function(BenchmarkId::new("compute_statistics", minutes), |b| {
            b.iter(|| black_box(engine.compute(black_box(&cycles))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_segmentation);
criterion_main!(benches);
