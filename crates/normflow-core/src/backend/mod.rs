//! Accelerator math library interface
//!
//! The LRN operators never compute anything themselves. They describe tensors
//! and normalization parameters through opaque descriptor handles and ask a
//! [`NormBackend`] to launch cross-channel kernels on a device stream, the
//! same split an accelerator vendor library imposes.

pub mod emulated;
pub(crate) mod kernels;

pub use emulated::{BackendCall, EmulatedBackend, EmulatedBackendConfig};

use crate::device::DeviceStream;
use crate::{DType, Result, Tensor};

/// Status code returned by backend calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendStatus {
    Success,
    NotInitialized,
    BadParam,
    NotSupported,
    ExecutionFailed,
    InternalError,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Success => "SUCCESS",
            BackendStatus::NotInitialized => "NOT_INITIALIZED",
            BackendStatus::BadParam => "BAD_PARAM",
            BackendStatus::NotSupported => "NOT_SUPPORTED",
            BackendStatus::ExecutionFailed => "EXECUTION_FAILED",
            BackendStatus::InternalError => "INTERNAL_ERROR",
        }
    }

}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to a backend tensor descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorDescriptorHandle(pub(crate) u64);

/// Opaque handle to a backend LRN descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LrnDescriptorHandle(pub(crate) u64);

/// Memory layout a tensor descriptor encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorFormat {
    Nchw,
}

/// Which dimension the LRN window slides over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrnMode {
    /// Window over dimension 1 (channels) of an NCHW tensor
    CrossChannelDim1,
}

/// Output blending: `out = alpha * result + beta * out_prior`.
///
/// With `beta == 0` the prior contents of the output are never read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blend {
    pub alpha: f32,
    pub beta: f32,
}

impl Blend {
    /// Overwrite the output with the result
    pub const OVERWRITE: Blend = Blend {
        alpha: 1.0,
        beta: 0.0,
    };

    pub fn new(alpha: f32, beta: f32) -> Self {
        Self { alpha, beta }
    }
}

/// A tensor together with the descriptor the backend should read it with
#[derive(Debug, Clone, Copy)]
pub struct TensorArg<'a> {
    pub desc: TensorDescriptorHandle,
    pub data: &'a Tensor,
}

impl<'a> TensorArg<'a> {
    pub fn new(desc: TensorDescriptorHandle, data: &'a Tensor) -> Self {
        Self { desc, data }
    }
}

/// Accelerator library surface used by the normalization operators.
///
/// Descriptor handles must be destroyed by whoever created them. Kernel
/// launches are asynchronous with respect to the caller: a successful return
/// only means the work was accepted by `stream`.
pub trait NormBackend: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn create_tensor_descriptor(&self) -> Result<TensorDescriptorHandle>;

    fn set_tensor_4d_descriptor(
        &self,
        desc: TensorDescriptorHandle,
        format: TensorFormat,
        dtype: DType,
        dims: [usize; 4],
    ) -> Result<()>;

    fn destroy_tensor_descriptor(&self, desc: TensorDescriptorHandle) -> Result<()>;

    fn create_lrn_descriptor(&self) -> Result<LrnDescriptorHandle>;

    /// Set the window size and `bias + alpha * sum(x^2)` power-`beta` constants
    fn set_lrn_descriptor(
        &self,
        desc: LrnDescriptorHandle,
        window_size: i32,
        alpha: f64,
        beta: f64,
        bias: f64,
    ) -> Result<()>;

    fn destroy_lrn_descriptor(&self, desc: LrnDescriptorHandle) -> Result<()>;

    /// Launch `y = blend(lrn(x), y)` on `stream`
    fn lrn_cross_channel_forward(
        &self,
        stream: &dyn DeviceStream,
        norm: LrnDescriptorHandle,
        mode: LrnMode,
        blend: Blend,
        x: TensorArg<'_>,
        y: TensorArg<'_>,
    ) -> Result<()>;

    /// Launch `dx = blend(d lrn / dx . dy, dx)` on `stream`, given the
    /// forward output `y`, its gradient `dy` and the forward input `x`
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<()>;
}
