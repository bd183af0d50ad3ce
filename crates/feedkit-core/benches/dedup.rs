//! Benchmarks for normalization and deduplication.
//!
//! Dedup runs over every comment of every upload before anything reaches the
//! model, so its cost scales with the raw sheet, not the unique count.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use feedkit_core::dedup::trivial::TrivialFilter;
use feedkit_core::dedup::{deduplicate, normalize, similarity, DedupOptions};
use feedkit_testutil::feedback_corpus;

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup/normalize");

    let cases = [
        ("short", "¡Excelente!"),
        ("accented", "La atención fue pésima y el envío tardó muchísimo"),
        (
            "long",
            "El producto llegó roto, el soporte nunca respondió mis correos y cuando por fin \
             contestaron me pidieron pagar el envío de la devolución. No vuelvo a comprar.",
        ),
    ];
    for (label, text) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(label), text, |b, text| {
            b.iter(|| normalize(black_box(text)));
        });
    }
    group.finish();
}

fn bench_similarity(c: &mut Criterion) {
    let a = normalize("el envio llego tarde y la caja estaba rota");
    let b = normalize("el envio llego muy tarde y la caja venia rota");
    c.bench_function("dedup/similarity", |bench| {
        bench.iter(|| similarity(black_box(&a), black_box(&b), 0.30));
    });
}

fn bench_deduplicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup/deduplicate");
    let options = DedupOptions::default();

    for size in [100usize, 1_000, 10_000] {
        let comments = feedback_corpus(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &comments, |b, comments| {
            b.iter(|| deduplicate(black_box(comments), &options));
        });
    }
    group.finish();
}

fn bench_trivial_filter(c: &mut Criterion) {
    let comments = feedback_corpus(1_000);
    let representatives: Vec<usize> = (0..comments.len()).collect();
    let filter = TrivialFilter::default();

    c.bench_function("dedup/trivial_filter_1000", |b| {
        b.iter(|| filter.filter(black_box(&comments), &representatives));
    });
}

criterion_group!(
    benches,
    bench_normalize,
    bench_similarity,
    bench_deduplicate,
    bench_trivial_filter
);
criterion_main!(benches);
