use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use gpu_microbench::data::{InputGenerator, InputPattern};
use gpu_microbench::reduce::{reduce_cpu, reduce_sum, Exchange, ReduceKernel, ReduceOptions};
use gpu_microbench::Emulator;

const MEASUREMENT_SECS: u64 = 10;

fn reduce_run(crit: &mut Criterion) {
    let emulator = Emulator::default();
    let mut group = crit.benchmark_group("reduce");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(MEASUREMENT_SECS));

    let kernels = [
        ReduceKernel::Atomic,
        ReduceKernel::Tree(Exchange::Shuffle),
        ReduceKernel::Tree(Exchange::SharedMemory),
    ];
    for n in [1usize << 16, 1 << 20] {
        let values = InputGenerator::default().bytes(InputPattern::Random, n);
        group.throughput(Throughput::Bytes(n as u64));

        for kernel in kernels {
            let options = ReduceOptions {
                kernel,
                ..ReduceOptions::default()
            };
            group.bench_with_input(BenchmarkId::new(kernel.name(), n), &values, |ben, values| {
                ben.iter(|| black_box(reduce_sum(&emulator, values, &options)))
            });
        }
        group.bench_with_input(BenchmarkId::new("cpu", n), &values, |ben, values| {
            ben.iter(|| black_box(reduce_cpu(values)))
        });
    }
    group.finish();
}

criterion_group!(benches, reduce_run);
criterion_main!(benches);
