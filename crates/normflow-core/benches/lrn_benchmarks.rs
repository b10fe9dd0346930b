/// LRN Benchmarks
///
/// Forward and backward throughput of the cross-channel normalization
/// operators for both storage precisions, plus the cost of the shape
/// descriptor cache when the input shape keeps changing.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use normflow_core::{
    f16, Device, DeviceContext, EmulatedBackendConfig, ExecutionMode, LrnGradientOp, LrnOp,
    LrnParameters, Tensor,
};
use std::sync::Arc;

struct BenchConfig {
    name: &'static str,
    dims: [usize; 4],
}

const SHAPES: &[BenchConfig] = &[
    BenchConfig {
        name: "small_1x16x8x8",
        dims: [1, 16, 8, 8],
    },
    BenchConfig {
        name: "medium_8x64x16x16",
        dims: [8, 64, 16, 16],
    },
    BenchConfig {
        name: "large_16x96x27x27",
        dims: [16, 96, 27, 27],
    },
];

fn immediate_context() -> Arc<DeviceContext> {
    Arc::new(DeviceContext::emulated_with_config(
        0,
        EmulatedBackendConfig::default().with_execution_mode(ExecutionMode::Immediate),
    ))
}

fn params() -> LrnParameters {
    LrnParameters::new(5, 1e-4, 0.75, 2.0)
}

fn input(dims: &[usize; 4], half: bool) -> Tensor {
    let len: usize = dims.iter().product();
    let values: Vec<f32> = (0..len).map(|i| ((i % 17) as f32 - 8.0) * 0.25).collect();
    let tensor = if half {
        Tensor::from_vec(values.into_iter().map(f16::from_f32).collect(), dims)
    } else {
        Tensor::from_vec(values, dims)
    };
    tensor
        .and_then(|t| t.to_device(Device::Gpu(0)))
        .unwrap()
}

fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("lrn_forward");
    let ctx = immediate_context();

    for config in SHAPES {
        let elements: usize = config.dims.iter().product();
        group.throughput(Throughput::Elements(elements as u64));

        for (label, half) in [("f32", false), ("f16", true)] {
            let x = input(&config.dims, half);
            let mut op = LrnOp::new(Arc::clone(&ctx), params()).unwrap();
            let mut y = Tensor::empty(Device::Gpu(0));
            group.bench_with_input(BenchmarkId::new(label, config.name), &x, |b, x| {
                b.iter(|| op.forward(black_box(x), &mut y).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("lrn_backward");
    let ctx = immediate_context();

    for config in SHAPES {
        let elements: usize = config.dims.iter().product();
        group.throughput(Throughput::Elements(elements as u64));

        for (label, half) in [("f32", false), ("f16", true)] {
            let x = input(&config.dims, half);
            let dy = input(&config.dims, half);
            let mut fwd = LrnOp::new(Arc::clone(&ctx), params()).unwrap();
            let mut bwd = LrnGradientOp::new(Arc::clone(&ctx), params()).unwrap();
            let mut y = Tensor::empty(Device::Gpu(0));
            let mut dx = Tensor::empty(Device::Gpu(0));
            fwd.forward(&x, &mut y).unwrap();

            group.bench_function(BenchmarkId::new(label, config.name), |b| {
                b.iter(|| bwd.backward(black_box(&x), &y, &dy, &mut dx).unwrap())
            });
        }
    }
    group.finish();
}

/// Alternating shapes forces a descriptor rebuild on every call
fn bench_descriptor_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("lrn_descriptor_cache");
    let ctx = immediate_context();
    let a = input(&[1, 16, 8, 8], false);
    let b = input(&[1, 16, 8, 4], false);

    let mut op = LrnOp::new(Arc::clone(&ctx), params()).unwrap();
    let mut y = Tensor::empty(Device::Gpu(0));
    group.bench_function("same_shape", |bencher| {
        bencher.iter(|| op.forward(black_box(&a), &mut y).unwrap())
    });

    let mut op = LrnOp::new(Arc::clone(&ctx), params()).unwrap();
    let mut y = Tensor::empty(Device::Gpu(0));
    group.bench_function("alternating_shape", |bencher| {
        bencher.iter(|| {
            op.forward(black_box(&a), &mut y).unwrap();
            op.forward(black_box(&b), &mut y).unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, bench_forward, bench_backward, bench_descriptor_cache);
criterion_main!(benches);
