//! Tag dispatch benchmark suite.
//!
//! Benchmarks the hot path of tagged queries:
//! - Tag generation
//! - Register/resolve/await through the wait table at different fan-outs
//!
//! Run with: cargo bench --bench dispatch
//! Results saved to: target/criterion/

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use noise_socket::client::WaitTable;
use noise_socket::{Node, Tag, TagGenerator};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const FAN_OUT: &[usize] = &[1, 64, 1024];

// ============================================================================
// Benchmark: Tag Generation
// ============================================================================

fn bench_tag_generation(c: &mut Criterion) {
    let tags = TagGenerator::new();
    c.bench_function("tag_generation", |b| b.iter(|| tags.next_tag()));
}

// ============================================================================
// Benchmark: Register and Resolve
// ============================================================================

fn bench_register_resolve(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("register_resolve");
    group.measurement_time(Duration::from_secs(10));

    for &count in FAN_OUT {
        group.bench_with_input(BenchmarkId::new("waits", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| resolve_batch(count));
        });
    }

    group.finish();
}

/// Registers `count` waits, resolves them in reverse order, awaits all.
async fn resolve_batch(count: usize) {
    let table = WaitTable::<Tag, Node>::new();
    let tags = TagGenerator::new();

    let waits: Vec<_> = (0..count)
        .map(|_| table.register(tags.next_tag()).unwrap())
        .collect();

    for wait in waits.iter().rev() {
        let reply = Node::new("iq").with_attr("id", wait.key().as_str());
        table.resolve(wait.key(), reply).unwrap();
    }

    for wait in waits {
        wait.wait(Duration::from_secs(1)).await.unwrap();
    }
}

// ============================================================================
// Main
// ============================================================================

criterion_group!(benches, bench_tag_generation, bench_register_resolve);
criterion_main!(benches);
