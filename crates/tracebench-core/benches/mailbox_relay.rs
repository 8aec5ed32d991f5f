//! tracebench-core benchmark suite.
//!
//! - Mailbox push/recv throughput under each admission policy
//! - End-to-end relay through a zero-latency pipeline

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::runtime::Runtime;

use tracebench_core::{
    AdmissionPolicy, Mailbox, MailboxConfig, Pipeline, PipelineOptions, TopologyConfig,
};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_time()
        .build()
        .unwrap()
}

/// Single producer, single consumer through one mailbox.
fn mailbox_benchmarks(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("mailbox");
    let messages = 10_000u64;
    group.throughput(Throughput::Elements(messages));

    let configs = [
        ("unbounded", MailboxConfig::unbounded()),
        ("block_256", MailboxConfig::bounded(256, AdmissionPolicy::Block)),
        ("drop_oldest_256", MailboxConfig::bounded(256, AdmissionPolicy::DropOldest)),
    ];

    for (name, config) in configs {
        group.bench_with_input(BenchmarkId::new("push_recv", name), &config, |b, config| {
            b.iter(|| {
                rt.block_on(async {
                    let mailbox = Arc::new(Mailbox::new("bench", *config));
                    let consumer = {
                        let mailbox = Arc::clone(&mailbox);
                        tokio::spawn(async move {
                            let mut received = 0u64;
                            while mailbox.recv().await.is_some() {
                                received += 1;
                            }
                            received
                        })
                    };
                    for i in 0..messages {
                        mailbox.push(i).await.unwrap();
                    }
                    mailbox.close();
                    consumer.await.unwrap()
                })
            });
        });
    }

    group.finish();
}

/// Messages relayed through every stage of a zero-latency chain.
fn relay_benchmarks(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("relay");
    let messages = 5_000u64;
    group.throughput(Throughput::Elements(messages));

    // no span processor: spans are created and dropped
    let tracer = SdkTracerProvider::builder().build().tracer("relay-bench");

    for stages in [1usize, 4, 16] {
        let config = TopologyConfig::standard(0, 0.0, stages).unwrap();
        group.bench_with_input(BenchmarkId::new("stages", stages), &config, |b, config| {
            b.iter(|| {
                rt.block_on(async {
                    let pipeline =
                        Pipeline::start(config, PipelineOptions::default(), tracer.clone())
                            .unwrap();
                    for i in 0..messages {
                        pipeline.submit(i).await.unwrap();
                    }
                    pipeline.shutdown().await.completed()
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, mailbox_benchmarks, relay_benchmarks);
criterion_main!(benches);
