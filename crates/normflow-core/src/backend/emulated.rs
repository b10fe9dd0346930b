//! Emulated accelerator
//!
//! Device memory is host memory, descriptors live in a handle table and
//! kernels are queued on an [`EmulatedStream`](crate::device::EmulatedStream).
//! Parameter limits follow what accelerator LRN libraries accept, so an
//! operator that runs here also runs against a real device library.

use super::kernels::{lrn_backward, lrn_forward, LrnCoefficients};
use super::{
    BackendStatus, Blend, LrnDescriptorHandle, LrnMode, NormBackend, TensorArg,
    TensorDescriptorHandle, TensorFormat,
};
use crate::device::{DeviceStream, ExecutionMode};
use crate::precision::{PrecisionPair, StorageElement};
use crate::tensor::DeviceBuffer;
use crate::{DType, Result, TensorError};
use half::f16;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Smallest `beta` the emulated library accepts
pub const LRN_MIN_BETA: f64 = 0.01;
/// Smallest `bias` the emulated library accepts
pub const LRN_MIN_BIAS: f64 = 1e-5;
/// Default upper bound on the window size
pub const LRN_MAX_WINDOW: i32 = 16;

/// Configuration for the emulated accelerator
#[derive(Debug, Clone, PartialEq)]
pub struct EmulatedBackendConfig {
    /// How streams created for this backend run their kernels
    pub execution_mode: ExecutionMode,
    /// Split kernels over images with rayon
    pub parallel: bool,
    /// Largest accepted LRN window size
    pub max_window: i32,
}

impl Default for EmulatedBackendConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Deferred,
            parallel: true,
            max_window: LRN_MAX_WINDOW,
        }
    }
}

impl EmulatedBackendConfig {
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_max_window(mut self, max_window: i32) -> Self {
        self.max_window = max_window;
        self
    }
}

/// Backend entry points that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCall {
    CreateTensorDescriptor,
    SetTensorDescriptor,
    DestroyTensorDescriptor,
    CreateLrnDescriptor,
    SetLrnDescriptor,
    DestroyLrnDescriptor,
    /// Fail the forward launch itself
    LrnForward,
    /// Fail the backward launch itself
    LrnBackward,
    /// Accept launches but fail when the kernel runs on the stream
    KernelExecution,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TensorDesc {
    format: TensorFormat,
    dtype: DType,
    dims: [usize; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LrnDesc {
    window_size: usize,
    alpha: f64,
    beta: f64,
    bias: f64,
}

/// Host-memory stand-in for an accelerator normalization library
#[derive(Debug)]
pub struct EmulatedBackend {
    config: EmulatedBackendConfig,
    next_handle: AtomicU64,
    tensor_descs: Mutex<HashMap<u64, Option<TensorDesc>>>,
    lrn_descs: Mutex<HashMap<u64, Option<LrnDesc>>>,
    faults: Mutex<HashSet<BackendCall>>,
}

impl Default for EmulatedBackend {
    fn default() -> Self {
        Self::new(EmulatedBackendConfig::default())
    }
}

impl EmulatedBackend {
    pub fn new(config: EmulatedBackendConfig) -> Self {
        Self {
            config,
            next_handle: AtomicU64::new(1),
            tensor_descs: Mutex::new(HashMap::new()),
            lrn_descs: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashSet::new()),
        }
    }

    /// Make every subsequent `call` fail until [`clear_faults`](Self::clear_faults)
    pub fn inject_fault(&self, call: BackendCall) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(call);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    /// Number of descriptors created and not yet destroyed
    pub fn live_descriptors(&self) -> usize {
        let tensors = self.tensor_descs.lock().map(|t| t.len()).unwrap_or(0);
        let lrns = self.lrn_descs.lock().map(|t| t.len()).unwrap_or(0);
        tensors + lrns
    }

    fn injected(&self, call: BackendCall) -> bool {
        self.faults
            .lock()
            .map(|faults| faults.contains(&call))
            .unwrap_or(false)
    }

    fn fail_if_injected(&self, call: BackendCall, operation: &str) -> Result<()> {
        if self.injected(call) {
            let status = match call {
                BackendCall::LrnForward
                | BackendCall::LrnBackward
                | BackendCall::KernelExecution => BackendStatus::ExecutionFailed,
                _ => BackendStatus::InternalError,
            };
            return Err(TensorError::backend(operation, status, "injected fault"));
        }
        Ok(())
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn lrn_desc(&self, operation: &str, handle: LrnDescriptorHandle) -> Result<LrnDesc> {
        match self.lrn_descs.lock()?.get(&handle.0) {
            Some(Some(desc)) => Ok(*desc),
            Some(None) => Err(TensorError::backend(
                operation,
                BackendStatus::NotInitialized,
                format!("LRN descriptor {} was never set", handle.0),
            )),
            None => Err(unknown_handle(operation, "LRN", handle.0)),
        }
    }

    /// Resolve a tensor argument's descriptor and check it describes the tensor
    fn bound_desc(&self, operation: &str, name: &str, arg: TensorArg<'_>) -> Result<TensorDesc> {
        let desc = match self.tensor_descs.lock()?.get(&arg.desc.0) {
            Some(Some(desc)) => *desc,
            Some(None) => {
                return Err(TensorError::backend(
                    operation,
                    BackendStatus::NotInitialized,
                    format!("tensor descriptor {} for {name} was never set", arg.desc.0),
                ))
            }
            None => return Err(unknown_handle(operation, "tensor", arg.desc.0)),
        };
        if arg.data.dims() != desc.dims.as_slice() || arg.data.dtype() != desc.dtype {
            return Err(TensorError::backend(
                operation,
                BackendStatus::BadParam,
                format!(
                    "{name} is {} {}, descriptor says {} {:?}",
                    arg.data.dtype(),
                    arg.data.shape(),
                    desc.dtype,
                    desc.dims
                ),
            ));
        }
        Ok(desc)
    }

    fn precision(operation: &str, dtype: DType) -> Result<PrecisionPair> {
        PrecisionPair::for_dtype(dtype).ok_or_else(|| {
            TensorError::backend(
                operation,
                BackendStatus::NotSupported,
                format!("no LRN kernel for {dtype}"),
            )
        })
    }
}

fn unknown_handle(operation: &str, kind: &str, handle: u64) -> TensorError {
    TensorError::backend(
        operation,
        BackendStatus::BadParam,
        format!("unknown {kind} descriptor {handle}"),
    )
}

fn same_descs(operation: &str, descs: &[TensorDesc]) -> Result<()> {
    if descs.windows(2).all(|pair| pair[0] == pair[1]) {
        return Ok(());
    }
    Err(TensorError::backend(
        operation,
        BackendStatus::BadParam,
        "all tensor descriptors of an LRN call must be identical",
    ))
}

fn distinct_buffers(operation: &str, args: &[TensorArg<'_>]) -> Result<()> {
    for (i, a) in args.iter().enumerate() {
        if args[i + 1..].iter().any(|b| a.data.shares_buffer(b.data)) {
            return Err(TensorError::backend(
                operation,
                BackendStatus::BadParam,
                "LRN arguments must not share device memory",
            ));
        }
    }
    Ok(())
}

fn storage_changed(operation: &str) -> TensorError {
    TensorError::backend(
        operation,
        BackendStatus::ExecutionFailed,
        "tensor storage changed element type after launch",
    )
}

fn forward_typed<T: StorageElement>(
    lrn: LrnDesc,
    blend: Blend,
    dims: [usize; 4],
    x: &DeviceBuffer,
    y: &DeviceBuffer,
    parallel: bool,
) -> Result<()> {
    const OP: &str = "lrn_cross_channel_forward";
    let coeffs =
        LrnCoefficients::<T::Accum>::new(lrn.window_size, lrn.alpha, lrn.beta, lrn.bias, blend)?;
    let x = x.read()?;
    let mut y = y.write()?;
    let x = T::slice(&x).ok_or_else(|| storage_changed(OP))?;
    let y = T::slice_mut(&mut y).ok_or_else(|| storage_changed(OP))?;
    lrn_forward(&coeffs, dims, x, y, parallel)
}

#[allow(clippy::too_many_arguments)]
fn backward_typed<T: StorageElement>(
    lrn: LrnDesc,
    blend: Blend,
    dims: [usize; 4],
    y: &DeviceBuffer,
    dy: &DeviceBuffer,
    x: &DeviceBuffer,
    dx: &DeviceBuffer,
    parallel: bool,
) -> Result<()> {
    const OP: &str = "lrn_cross_channel_backward";
    let coeffs =
        LrnCoefficients::<T::Accum>::new(lrn.window_size, lrn.alpha, lrn.beta, lrn.bias, blend)?;
    let y = y.read()?;
    let dy = dy.read()?;
    let x = x.read()?;
    let mut dx = dx.write()?;
    let y = T::slice(&y).ok_or_else(|| storage_changed(OP))?;
    let dy = T::slice(&dy).ok_or_else(|| storage_changed(OP))?;
    let x = T::slice(&x).ok_or_else(|| storage_changed(OP))?;
    let dx = T::slice_mut(&mut dx).ok_or_else(|| storage_changed(OP))?;
    lrn_backward(&coeffs, dims, y, dy, x, dx, parallel)
}

impl NormBackend for EmulatedBackend {
    fn name(&self) -> &str {
        "emulated"
    }

    fn create_tensor_descriptor(&self) -> Result<TensorDescriptorHandle> {
        self.fail_if_injected(BackendCall::CreateTensorDescriptor, "create_tensor_descriptor")?;
        let handle = self.next_handle();
        self.tensor_descs.lock()?.insert(handle, None);
        Ok(TensorDescriptorHandle(handle))
    }

    fn set_tensor_4d_descriptor(
        &self,
        desc: TensorDescriptorHandle,
        format: TensorFormat,
        dtype: DType,
        dims: [usize; 4],
    ) -> Result<()> {
        const OP: &str = "set_tensor_4d_descriptor";
        self.fail_if_injected(BackendCall::SetTensorDescriptor, OP)?;
        if dims.iter().any(|&d| d > i32::MAX as usize) {
            return Err(TensorError::backend(
                OP,
                BackendStatus::BadParam,
                format!("dimension out of range in {dims:?}"),
            ));
        }
        match self.tensor_descs.lock()?.get_mut(&desc.0) {
            Some(slot) => {
                *slot = Some(TensorDesc {
                    format,
                    dtype,
                    dims,
                });
                Ok(())
            }
            None => Err(unknown_handle(OP, "tensor", desc.0)),
        }
    }

    fn destroy_tensor_descriptor(&self, desc: TensorDescriptorHandle) -> Result<()> {
        const OP: &str = "destroy_tensor_descriptor";
        self.fail_if_injected(BackendCall::DestroyTensorDescriptor, OP)?;
        match self.tensor_descs.lock()?.remove(&desc.0) {
            Some(_) => Ok(()),
            None => Err(unknown_handle(OP, "tensor", desc.0)),
        }
    }

    fn create_lrn_descriptor(&self) -> Result<LrnDescriptorHandle> {
        self.fail_if_injected(BackendCall::CreateLrnDescriptor, "create_lrn_descriptor")?;
        let handle = self.next_handle();
        self.lrn_descs.lock()?.insert(handle, None);
        Ok(LrnDescriptorHandle(handle))
    }

    fn set_lrn_descriptor(
        &self,
        desc: LrnDescriptorHandle,
        window_size: i32,
        alpha: f64,
        beta: f64,
        bias: f64,
    ) -> Result<()> {
        const OP: &str = "set_lrn_descriptor";
        self.fail_if_injected(BackendCall::SetLrnDescriptor, OP)?;

        let bad = |reason: String| Err(TensorError::backend(OP, BackendStatus::BadParam, reason));
        if window_size < 1 || window_size > self.config.max_window {
            return bad(format!(
                "window size {window_size} outside [1, {}]",
                self.config.max_window
            ));
        }
        if window_size % 2 == 0 {
            return bad(format!("window size {window_size} must be odd"));
        }
        if !alpha.is_finite() {
            return bad(format!("alpha {alpha} is not finite"));
        }
        if !beta.is_finite() || beta < LRN_MIN_BETA {
            return bad(format!("beta {beta} below {LRN_MIN_BETA}"));
        }
        if !bias.is_finite() || bias < LRN_MIN_BIAS {
            return bad(format!("bias {bias} below {LRN_MIN_BIAS}"));
        }

        match self.lrn_descs.lock()?.get_mut(&desc.0) {
            Some(slot) => {
                *slot = Some(LrnDesc {
                    window_size: window_size as usize,
                    alpha,
                    beta,
                    bias,
                });
                Ok(())
            }
            None => Err(unknown_handle(OP, "LRN", desc.0)),
        }
    }

    fn destroy_lrn_descriptor(&self, desc: LrnDescriptorHandle) -> Result<()> {
        const OP: &str = "destroy_lrn_descriptor";
        self.fail_if_injected(BackendCall::DestroyLrnDescriptor, OP)?;
        match self.lrn_descs.lock()?.remove(&desc.0) {
            Some(_) => Ok(()),
            None => Err(unknown_handle(OP, "LRN", desc.0)),
        }
    }

    fn lrn_cross_channel_forward(
        &self,
        stream: &dyn DeviceStream,
        norm: LrnDescriptorHandle,
        mode: LrnMode,
        blend: Blend,
        x: TensorArg<'_>,
        y: TensorArg<'_>,
    ) -> Result<()> {
        const OP: &str = "lrn_cross_channel_forward";
        self.fail_if_injected(BackendCall::LrnForward, OP)?;
        match mode {
            LrnMode::CrossChannelDim1 => {}
        }

        let lrn = self.lrn_desc(OP, norm)?;
        let x_desc = self.bound_desc(OP, "x", x)?;
        let y_desc = self.bound_desc(OP, "y", y)?;
        same_descs(OP, &[x_desc, y_desc])?;
        distinct_buffers(OP, &[x, y])?;
        let pair = Self::precision(OP, x_desc.dtype)?;

        let x_buf = Arc::clone(x.data.buffer());
        let y_buf = Arc::clone(y.data.buffer());
        let dims = x_desc.dims;
        let parallel = self.config.parallel;
        let fail = self.injected(BackendCall::KernelExecution);

        stream.enqueue(
            OP,
            Box::new(move || {
                if fail {
                    return Err(TensorError::backend(
                        OP,
                        BackendStatus::ExecutionFailed,
                        "injected kernel fault",
                    ));
                }
                match pair {
                    PrecisionPair::Float32 => {
                        forward_typed::<f32>(lrn, blend, dims, &x_buf, &y_buf, parallel)
                    }
                    PrecisionPair::Float16 => {
                        forward_typed::<f16>(lrn, blend, dims, &x_buf, &y_buf, parallel)
                    }
                }
            }),
        )
    }

    fn lrn_cross_channel_backward(
        &self,
        stream: &dyn DeviceStream,
        norm: LrnDescriptorHandle,
        mode: LrnMode,
        blend: Blend,
        y: TensorArg<'_>,
        dy: TensorArg<'_>,
        x: TensorArg<'_>,
        dx: TensorArg<'_>,
    ) -> Result<()> {
        const OP: &str = "lrn_cross_channel_backward";
        self.fail_if_injected(BackendCall::LrnBackward, OP)?;
        match mode {
            LrnMode::CrossChannelDim1 => {}
        }

        let lrn = self.lrn_desc(OP, norm)?;
        let descs = [
            self.bound_desc(OP, "y", y)?,
            self.bound_desc(OP, "dy", dy)?,
            self.bound_desc(OP, "x", x)?,
            self.bound_desc(OP, "dx", dx)?,
        ];
        same_descs(OP, &descs)?;
        distinct_buffers(OP, &[y, dy, x, dx])?;
        let pair = Self::precision(OP, descs[0].dtype)?;

        let y_buf = Arc::clone(y.data.buffer());
        let dy_buf = Arc::clone(dy.data.buffer());
        let x_buf = Arc::clone(x.data.buffer());
        let dx_buf = Arc::clone(dx.data.buffer());
        let dims = descs[0].dims;
        let parallel = self.config.parallel;
        let fail = self.injected(BackendCall::KernelExecution);

        stream.enqueue(
            OP,
            Box::new(move || {
                if fail {
                    return Err(TensorError::backend(
                        OP,
                        BackendStatus::ExecutionFailed,
                        "injected kernel fault",
                    ));
                }
                match pair {
                    PrecisionPair::Float32 => backward_typed::<f32>(
                        lrn, blend, dims, &y_buf, &dy_buf, &x_buf, &dx_buf, parallel,
                    ),
                    PrecisionPair::Float16 => backward_typed::<f16>(
                        lrn, blend, dims, &y_buf, &dy_buf, &x_buf, &dx_buf, parallel,
                    ),
                }
            }),
        )
    }
}
