//! Benchmarks for batch packing and prompt rendering.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use feedkit_core::batch::{make_batches, BatchOptions};
use feedkit_core::llm::PromptSet;
use feedkit_testutil::feedback_corpus;

fn bench_make_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("batching/make_batches");

    for size in [100usize, 1_000, 10_000] {
        let comments = feedback_corpus(size);
        let indices: Vec<usize> = (0..size).collect();
        let options = BatchOptions::default();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &indices, |b, indices| {
            b.iter(|| make_batches(black_box(&comments), indices, &options));
        });
    }
    group.finish();
}

fn bench_user_prompt(c: &mut Criterion) {
    let comments = feedback_corpus(50);
    let indices: Vec<usize> = (0..comments.len()).collect();
    let batches = make_batches(&comments, &indices, &BatchOptions::default());
    let prompts = PromptSet::default();

    c.bench_function("batching/user_prompt", |b| {
        b.iter(|| {
            for batch in &batches {
                black_box(prompts.user_prompt(batch));
            }
        });
    });
}

criterion_group!(benches, bench_make_batches, bench_user_prompt);
criterion_main!(benches);
