use std::collections::HashMap;
use std::hint::black_box;
use std::sync::Arc;

use chunk_store::blob_store::MemoryBlobStore;
use chunk_store::{ChunkEngine, EngineConfig, Shape};
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::Value;

fn engine_with_chunk_size(max_chunk_size: usize) -> ChunkEngine {
    let mut overrides = HashMap::new();
    overrides.insert("dtype".to_owned(), Value::from("float32"));
    overrides.insert("chunk_size".to_owned(), Value::from(max_chunk_size));
    ChunkEngine::create(
        "bench",
        Arc::new(MemoryBlobStore::new()),
        "generic",
        overrides,
        EngineConfig::default(),
    )
    .expect("valid bench tensor config")
}

fn append_throughput(c: &mut Criterion) {
    const MIB: usize = 1024 * 1024;
    let mut group = c.benchmark_group("packer_append");

    for sample_kib in [4usize, 64, 512] {
        let sample = vec![0u8; sample_kib * 1024];
        let shape = Shape::from_slice(&[(sample.len() / 4) as u32]);

        group.bench_function(format!("{sample_kib}kib_sample_into_32mib_chunks"), |b| {
            b.iter_batched(
                || engine_with_chunk_size(32 * MIB),
                |engine| {
                    for _ in 0..64 {
                        engine.append(black_box(&sample), "float32", shape.clone()).unwrap();
                    }
                    engine
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, append_throughput);
criterion_main!(benches);
