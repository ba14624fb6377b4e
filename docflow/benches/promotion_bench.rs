//! Benchmarks for promotion and the store index.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use docflow::core::{Stage, State};
use docflow::store::DocumentStore;
use docflow::testing::{DocumentFixture, TestPipeline};
use tokio::runtime::Runtime;

fn seeded(rt: &Runtime, count: usize) -> TestPipeline {
    let pipeline = TestPipeline::new();
    rt.block_on(async {
        for i in 0..count {
            let stage = Stage::ALL[i % Stage::ALL.len()];
            let document = DocumentFixture::new(format!("d{i:05}"))
                .order((i % 4).to_string())
                .at(stage, State::Success)
                .build();
            pipeline.seed(document).await;
        }
    });
    pipeline
}

fn promotion_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");

    c.bench_function("promote_1000", |b| {
        b.iter_batched(
            || seeded(&rt, 1000),
            |pipeline| rt.block_on(async { black_box(pipeline.promotion().run().await) }),
            BatchSize::SmallInput,
        );
    });

    let pipeline = seeded(&rt, 1000);
    c.bench_function("count_success_per_stage", |b| {
        b.iter(|| {
            rt.block_on(async {
                for stage in Stage::ALL {
                    black_box(pipeline.store.count(stage, &[State::Success]).await.ok());
                }
            });
        });
    });
}

criterion_group!(benches, promotion_benchmark);
criterion_main!(benches);
