//! Storage and accumulation precision pairs
//!
//! LRN kernels read and write tensors in their storage type but accumulate
//! sums of squares and gradient reductions in a wider type. The supported
//! pairs are enumerated explicitly here rather than derived from an open
//! generic bound.

use crate::tensor::Element;
use crate::DType;
use num_traits::{Float, FromPrimitive};

pub use half::{bf16, f16};

/// Full-precision type that kernels accumulate in
pub trait Accumulator: Float + FromPrimitive + Send + Sync + std::fmt::Debug + 'static {}

impl Accumulator for f32 {}

/// Tensor element type with a designated accumulation type
pub trait StorageElement: Element {
    type Accum: Accumulator;

    /// Widen a stored value into the accumulation type
    fn to_accum(self) -> Self::Accum;

    /// Round an accumulated value back into storage
    fn from_accum(value: Self::Accum) -> Self;
}

impl StorageElement for f32 {
    type Accum = f32;

    fn to_accum(self) -> f32 {
        self
    }

    fn from_accum(value: f32) -> Self {
        value
    }
}

impl StorageElement for f16 {
    type Accum = f32;

    fn to_accum(self) -> f32 {
        self.to_f32()
    }

    fn from_accum(value: f32) -> Self {
        f16::from_f32(value)
    }
}

/// The closed set of (storage, accumulation) pairs LRN kernels run with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionPair {
    /// f32 storage, f32 accumulation
    Float32,
    /// f16 storage, f32 accumulation
    Float16,
}

impl PrecisionPair {
    /// Select the pair for a tensor element type, `None` if unsupported
    pub fn for_dtype(dtype: DType) -> Option<Self> {
        match dtype {
            DType::Float32 => Some(PrecisionPair::Float32),
            DType::Float16 => Some(PrecisionPair::Float16),
            _ => None,
        }
    }
}
