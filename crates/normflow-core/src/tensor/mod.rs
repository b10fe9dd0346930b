pub mod core;
pub mod storage;

pub use self::core::{DeviceBuffer, Tensor};
pub use storage::{Element, TensorStorage};
