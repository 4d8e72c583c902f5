use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use imembed::index::{FlatIndex, HnswIndex, HnswParams, VectorIndex};
use rand::prelude::*;
use rayon::prelude::*;

const DIM: usize = 512;

fn random_vectors(rng: &mut StdRng, n: usize) -> Vec<Vec<f32>> {
    (0..n).map(|_| (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect()).collect()
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("Search");
    let mut rng = StdRng::seed_from_u64(0);
    let data = random_vectors(&mut rng, 20_000);
    let query = random_vectors(&mut rng, 1).remove(0);

    let flat = FlatIndex::new(Some(DIM), num_cpus::get());
    let hnsw = HnswIndex::new(Some(DIM), HnswParams { capacity: data.len(), exact_threshold: 0, ..Default::default() });
    data.par_iter().enumerate().for_each(|(i, v)| {
        flat.insert(i as u64 + 1, v).unwrap();
        hnsw.insert(i as u64 + 1, v).unwrap();
    });

    group.throughput(Throughput::Elements(data.len() as u64));
    for k in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("flat", k), &k, |b, &k| {
            b.iter(|| flat.search(black_box(&query), k).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("hnsw", k), &k, |b, &k| {
            b.iter(|| hnsw.search(black_box(&query), k).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
