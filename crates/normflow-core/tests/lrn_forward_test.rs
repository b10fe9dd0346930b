use approx::assert_relative_eq;
use normflow_core::backend::BackendCall;
use normflow_core::{
    BackendStatus, DType, Device, DeviceContext, EmulatedBackend, EmulatedBackendConfig,
    EmulatedStream, ExecutionMode, LrnOp, LrnParameters, Tensor, TensorError,
};
use normflow_core::{bf16, f16};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Context whose backend stays reachable for fault injection and handle counting
fn emulated(mode: ExecutionMode) -> (Arc<EmulatedBackend>, Arc<DeviceContext>) {
    let config = EmulatedBackendConfig::default().with_execution_mode(mode);
    let backend = Arc::new(EmulatedBackend::new(config));
    let ctx = DeviceContext::new(
        Device::Gpu(0),
        Arc::new(EmulatedStream::new(0, mode)),
        backend.clone(),
    );
    (backend, Arc::new(ctx))
}

fn random_input(rng: &mut StdRng, dims: &[usize]) -> Tensor {
    let len: usize = dims.iter().product();
    let data: Vec<f32> = (0..len).map(|_| rng.gen_range(-2.0..2.0)).collect();
    Tensor::from_vec(data, dims)
        .unwrap()
        .to_device(Device::Gpu(0))
        .unwrap()
}

/// Direct evaluation of the truncated-window formula in f64
fn reference_lrn(x: &[f32], dims: [usize; 4], p: LrnParameters) -> Vec<f64> {
    let [n, c, h, w] = dims;
    let r = ((p.window_size - 1) / 2) as usize;
    let spatial = h * w;
    let mut y = vec![0.0; x.len()];
    for b in 0..n {
        for ch in 0..c {
            for s in 0..spatial {
                let lo = ch.saturating_sub(r);
                let hi = (ch + r).min(c - 1);
                let sum: f64 = (lo..=hi)
                    .map(|j| f64::from(x[(b * c + j) * spatial + s]).powi(2))
                    .sum();
                let idx = (b * c + ch) * spatial + s;
                let scale = f64::from(p.bias) + f64::from(p.alpha) * sum;
                y[idx] = f64::from(x[idx]) / scale.powf(f64::from(p.beta));
            }
        }
    }
    y
}

#[test]
fn test_four_channel_scenario() {
    let (_, ctx) = emulated(ExecutionMode::Deferred);
    let mut op = LrnOp::new(Arc::clone(&ctx), LrnParameters::new(3, 1.0, 0.5, 1.0)).unwrap();
    let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[1, 4, 1, 1])
        .unwrap()
        .to_device(Device::Gpu(0))
        .unwrap();
    let mut y = Tensor::empty(Device::Gpu(0));
    op.forward(&x, &mut y).unwrap();
    ctx.synchronize().unwrap();

    let y = y.to_vec::<f32>().unwrap();
    let expected = [
        1.0 / 6.0f32.sqrt(),
        2.0 / 15.0f32.sqrt(),
        3.0 / 30.0f32.sqrt(),
        4.0 / 26.0f32.sqrt(),
    ];
    for (got, want) in y.iter().zip(expected) {
        assert_relative_eq!(*got, want, max_relative = 1e-6);
    }
}

#[test]
fn test_matches_reference_on_random_batches() {
    let (_, ctx) = emulated(ExecutionMode::Deferred);
    let mut rng = StdRng::seed_from_u64(7);
    for (size, dims) in [(1, [2, 3, 4, 4]), (3, [1, 8, 3, 5]), (5, [3, 6, 2, 2]), (7, [1, 4, 1, 3])] {
        let params = LrnParameters::new(size, 1e-2, 0.75, 2.0);
        let mut op = LrnOp::new(Arc::clone(&ctx), params).unwrap();
        let x = random_input(&mut rng, &dims);
        let mut y = Tensor::empty(Device::Gpu(0));
        op.forward(&x, &mut y).unwrap();
        ctx.synchronize().unwrap();

        let expected = reference_lrn(&x.to_vec::<f32>().unwrap(), dims, params);
        for (got, want) in y.to_vec::<f32>().unwrap().iter().zip(&expected) {
            assert_relative_eq!(f64::from(*got), *want, max_relative = 1e-5, epsilon = 1e-7);
        }
    }
}

#[test]
fn test_window_one_is_per_channel() {
    let (_, ctx) = emulated(ExecutionMode::Immediate);
    let params = LrnParameters::new(1, 0.5, 0.75, 2.0);
    let mut op = LrnOp::new(ctx, params).unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let x = random_input(&mut rng, &[2, 5, 3, 3]);
    let mut y = Tensor::empty(Device::Gpu(0));
    op.forward(&x, &mut y).unwrap();

    let xs = x.to_vec::<f32>().unwrap();
    for (xi, yi) in xs.iter().zip(y.to_vec::<f32>().unwrap()) {
        let expected = xi / (2.0 + 0.5 * xi * xi).powf(0.75);
        assert_relative_eq!(yi, expected, max_relative = 1e-5);
    }
}

#[test]
fn test_boundary_channels_use_truncated_window() {
    // A huge value in the last channel must not leak into channel 0 with a
    // radius-1 window.
    let (_, ctx) = emulated(ExecutionMode::Immediate);
    let mut op = LrnOp::new(ctx, LrnParameters::new(3, 1.0, 1.0, 1.0)).unwrap();
    let x = Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 100.0], &[1, 4, 1, 1])
        .unwrap()
        .to_device(Device::Gpu(0))
        .unwrap();
    let mut y = Tensor::empty(Device::Gpu(0));
    op.forward(&x, &mut y).unwrap();
    let y = y.to_vec::<f32>().unwrap();
    assert_relative_eq!(y[0], 0.5);
    assert_relative_eq!(y[3], 100.0 / 10001.0, max_relative = 1e-6);
}

#[test]
fn test_output_shape_and_dtype_follow_input() {
    let (_, ctx) = emulated(ExecutionMode::Immediate);
    let mut op = LrnOp::new(ctx, LrnParameters::new(5, 1e-4, 0.75, 1.0)).unwrap();
    let x = Tensor::zeros(DType::Float16, &[2, 7, 3, 1], Device::Gpu(0));
    let mut y = Tensor::zeros(DType::Float32, &[9], Device::Gpu(0));
    op.forward(&x, &mut y).unwrap();
    assert_eq!(y.shape(), x.shape());
    assert_eq!(y.dtype(), DType::Float16);
}

#[test]
fn test_half_precision_tracks_single_precision() {
    let (_, ctx) = emulated(ExecutionMode::Immediate);
    let params = LrnParameters::new(3, 1e-1, 0.75, 1.0);
    let mut op = LrnOp::new(ctx, params).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let x32 = random_input(&mut rng, &[1, 6, 2, 2]);
    let x16 = Tensor::from_vec(
        x32.to_vec::<f32>()
            .unwrap()
            .into_iter()
            .map(f16::from_f32)
            .collect::<Vec<_>>(),
        &[1, 6, 2, 2],
    )
    .unwrap()
    .to_device(Device::Gpu(0))
    .unwrap();

    let mut y32 = Tensor::empty(Device::Gpu(0));
    let mut y16 = Tensor::empty(Device::Gpu(0));
    op.forward(&x32, &mut y32).unwrap();
    op.forward(&x16, &mut y16).unwrap();

    for (a, b) in y32.to_vec::<f32>().unwrap().iter().zip(y16.to_vec::<f16>().unwrap()) {
        assert_relative_eq!(*a, b.to_f32(), epsilon = 5e-3, max_relative = 5e-3);
    }
}

#[test]
fn test_cached_descriptor_gives_identical_results() {
    let (_, ctx) = emulated(ExecutionMode::Deferred);
    let params = LrnParameters::new(5, 1e-3, 0.75, 2.0);
    let mut rng = StdRng::seed_from_u64(42);
    let a = random_input(&mut rng, &[2, 8, 4, 4]);
    let b = random_input(&mut rng, &[1, 8, 5, 3]);

    let mut reused = LrnOp::new(Arc::clone(&ctx), params).unwrap();
    let mut y = Tensor::empty(Device::Gpu(0));
    for x in [&a, &a, &b, &a] {
        reused.forward(x, &mut y).unwrap();
        ctx.synchronize().unwrap();
    }
    assert_eq!(reused.data_descriptor().rebuild_count(), 3);

    let mut fresh = LrnOp::new(Arc::clone(&ctx), params).unwrap();
    let mut y_fresh = Tensor::empty(Device::Gpu(0));
    fresh.forward(&a, &mut y_fresh).unwrap();
    ctx.synchronize().unwrap();

    assert_eq!(y.to_bytes().unwrap(), y_fresh.to_bytes().unwrap());
}

/// An output reused across shapes before the stream drains: each launch
/// writes its own allocation, the last one is what `y` ends up holding
#[test]
fn test_output_reused_across_shapes_before_synchronize() {
    let (_, ctx) = emulated(ExecutionMode::Deferred);
    let params = LrnParameters::new(3, 1.0, 0.5, 1.0);
    let mut op = LrnOp::new(Arc::clone(&ctx), params).unwrap();
    let a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 4.0, 3.0, 2.0, 1.0], &[2, 4, 1, 1])
        .unwrap()
        .to_device(Device::Gpu(0))
        .unwrap();
    let b = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[1, 4, 1, 1])
        .unwrap()
        .to_device(Device::Gpu(0))
        .unwrap();

    let mut y = Tensor::empty(Device::Gpu(0));
    op.forward(&a, &mut y).unwrap();
    op.forward(&b, &mut y).unwrap();
    ctx.synchronize().unwrap();

    assert_eq!(y.dims(), &[1, 4, 1, 1]);
    let expected = reference_lrn(&[1.0, 2.0, 3.0, 4.0], [1, 4, 1, 1], params);
    for (got, want) in y.to_vec::<f32>().unwrap().iter().zip(&expected) {
        assert_relative_eq!(f64::from(*got), *want, max_relative = 1e-6);
    }
}

#[test]
fn test_unsupported_element_types() {
    let (_, ctx) = emulated(ExecutionMode::Immediate);
    let mut op = LrnOp::new(ctx, LrnParameters::new(3, 1.0, 0.75, 1.0)).unwrap();
    let mut y = Tensor::empty(Device::Gpu(0));

    let ints = Tensor::from_vec(vec![1i32, 2, 3, 4], &[1, 4, 1, 1])
        .unwrap()
        .to_device(Device::Gpu(0))
        .unwrap();
    let err = op.forward(&ints, &mut y).unwrap_err();
    assert!(matches!(
        err,
        TensorError::UnsupportedDType {
            dtype: DType::Int32,
            ..
        }
    ));

    let brain = Tensor::from_vec(vec![bf16::ONE; 4], &[1, 4, 1, 1])
        .unwrap()
        .to_device(Device::Gpu(0))
        .unwrap();
    assert!(matches!(
        op.forward(&brain, &mut y),
        Err(TensorError::UnsupportedDType { .. })
    ));
}

#[test]
fn test_deferred_output_written_on_synchronize() {
    let (_, ctx) = emulated(ExecutionMode::Deferred);
    let mut op = LrnOp::new(Arc::clone(&ctx), LrnParameters::new(1, 1.0, 1.0, 1.0)).unwrap();
    let x = Tensor::from_vec(vec![1.0f32; 4], &[1, 4, 1, 1])
        .unwrap()
        .to_device(Device::Gpu(0))
        .unwrap();
    let mut y = Tensor::empty(Device::Gpu(0));
    op.forward(&x, &mut y).unwrap();

    assert!(!ctx.stream().is_complete());
    assert_eq!(y.to_vec::<f32>().unwrap(), vec![0.0; 4]);
    ctx.synchronize().unwrap();
    assert_eq!(y.to_vec::<f32>().unwrap(), vec![0.5; 4]);
}

#[test]
fn test_invalid_parameters_are_configuration_errors() {
    let (backend, ctx) = emulated(ExecutionMode::Immediate);
    for params in [
        LrnParameters::default(),
        LrnParameters::new(4, 1.0, 0.75, 1.0),
        LrnParameters::new(-3, 1.0, 0.75, 1.0),
        LrnParameters::new(3, 1.0, 0.0, 1.0),
        LrnParameters::new(3, f32::INFINITY, 0.75, 1.0),
    ] {
        let err = LrnOp::new(Arc::clone(&ctx), params).unwrap_err();
        assert!(err.is_configuration_error(), "{params:?}: {err}");
    }
    assert_eq!(backend.live_descriptors(), 0);
}

#[test]
fn test_descriptors_released_on_drop() {
    let (backend, ctx) = emulated(ExecutionMode::Immediate);
    let op = LrnOp::new(ctx, LrnParameters::new(3, 1.0, 0.75, 1.0)).unwrap();
    assert_eq!(backend.live_descriptors(), 2);
    drop(op);
    assert_eq!(backend.live_descriptors(), 0);
}

#[test]
fn test_kernel_fault_reported_by_synchronize() {
    let (backend, ctx) = emulated(ExecutionMode::Deferred);
    let mut op = LrnOp::new(Arc::clone(&ctx), LrnParameters::new(3, 1.0, 0.75, 1.0)).unwrap();
    backend.inject_fault(BackendCall::KernelExecution);
    let x = Tensor::zeros(DType::Float32, &[1, 3, 2, 2], Device::Gpu(0));
    let mut y = Tensor::empty(Device::Gpu(0));
    op.forward(&x, &mut y).unwrap();

    let err = ctx.synchronize().unwrap_err();
    assert_eq!(err.backend_status(), Some(BackendStatus::ExecutionFailed));
}

#[test]
fn test_descriptor_fault_at_construction() {
    let (backend, ctx) = emulated(ExecutionMode::Immediate);
    backend.inject_fault(BackendCall::CreateTensorDescriptor);
    let err = LrnOp::new(ctx, LrnParameters::new(3, 1.0, 0.75, 1.0)).unwrap_err();
    assert!(matches!(err, TensorError::Backend { .. }));
    assert_eq!(backend.live_descriptors(), 0);
}

#[test]
fn test_sequential_and_parallel_kernels_agree() {
    let mut rng = StdRng::seed_from_u64(5);
    let x = random_input(&mut rng, &[4, 6, 3, 3]);
    let params = LrnParameters::new(3, 1e-2, 0.75, 1.0);

    let outputs: Vec<Vec<u8>> = [true, false]
        .into_iter()
        .map(|parallel| {
            let config = EmulatedBackendConfig::default()
                .with_execution_mode(ExecutionMode::Immediate)
                .with_parallel(parallel);
            let ctx = Arc::new(DeviceContext::emulated_with_config(0, config));
            let mut op = LrnOp::new(ctx, params).unwrap();
            let mut y = Tensor::empty(Device::Gpu(0));
            op.forward(&x, &mut y).unwrap();
            y.to_bytes().unwrap()
        })
        .collect();
    assert_eq!(outputs[0], outputs[1]);
}
