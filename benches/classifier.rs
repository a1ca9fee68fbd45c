//! Benchmark for kernel parsing and node classification
//!
//! Target: a 5K node cluster classified well under one reconcile interval

use baremetal_csi_operator::{KernelClassifier, KernelVersion, MemoryStore, PlatformCatalog};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use k8s_openapi::api::core::v1::{Node, NodeStatus, NodeSystemInfo};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;

const KERNELS: [&str; 6] = [
    "3.10.0-1160.el7.x86_64",
    "4.15.0-213-generic",
    "4.18.0-477.el8.x86_64",
    "5.4.0-66-generic",
    "5.14.0-284.el9.x86_64",
    "6.1.0-13-amd64",
];

fn nodes(count: usize) -> Vec<Node> {
    (0..count)
        .map(|i| Node {
            metadata: ObjectMeta {
                name: Some(format!("node-{:05}", i)),
                ..Default::default()
            },
            spec: None,
            status: Some(NodeStatus {
                node_info: Some(NodeSystemInfo {
                    kernel_version: KERNELS[i % KERNELS.len()].to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        })
        .collect()
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel_version");
    group.throughput(Throughput::Elements(KERNELS.len() as u64));

    group.bench_function("parse", |b| {
        b.iter(|| {
            for raw in KERNELS {
                let _ = KernelVersion::parse(black_box(raw));
            }
        });
    });

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");
    let classifier = KernelClassifier::new(
        Arc::new(PlatformCatalog::standard()),
        Arc::new(MemoryStore::new()),
    );

    for count in [100, 5_000] {
        let cluster = nodes(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("classify_{}", count), |b| {
            b.iter(|| classifier.classify(black_box(&cluster)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_classify);
criterion_main!(benches);
