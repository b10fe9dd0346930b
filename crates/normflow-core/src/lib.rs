#![allow(clippy::result_large_err)]

pub mod backend;
pub mod device;
pub mod dtype;
pub mod error;
pub mod numerical_gradient;
pub mod ops;
pub mod precision;
pub mod shape;
pub mod tensor;

pub use backend::{
    BackendCall, BackendStatus, Blend, EmulatedBackend, EmulatedBackendConfig, NormBackend,
};
pub use device::{Device, DeviceContext, DeviceStream, EmulatedStream, ExecutionMode};
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use ops::{
    create_operator, ensure_initialized, Engine, LrnGradientOp, LrnOp, LrnParameters, Operator,
    OperatorDef, OP_REGISTRY,
};
pub use precision::{bf16, f16, PrecisionPair};
pub use shape::Shape;
pub use tensor::Tensor;
