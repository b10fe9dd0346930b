//! Typed device storage behind a tensor handle

use crate::DType;
use half::{bf16, f16};

/// Element buffer of a tensor, tagged by element type
#[derive(Debug, Clone, PartialEq)]
pub enum TensorStorage {
    Float16(Vec<f16>),
    BFloat16(Vec<bf16>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
}

impl TensorStorage {
    /// Zero-filled storage of `len` elements
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Float16 => TensorStorage::Float16(vec![f16::ZERO; len]),
            DType::BFloat16 => TensorStorage::BFloat16(vec![bf16::ZERO; len]),
            DType::Float32 => TensorStorage::Float32(vec![0.0; len]),
            DType::Float64 => TensorStorage::Float64(vec![0.0; len]),
            DType::Int32 => TensorStorage::Int32(vec![0; len]),
            DType::Int64 => TensorStorage::Int64(vec![0; len]),
            DType::UInt8 => TensorStorage::UInt8(vec![0; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorStorage::Float16(v) => v.len(),
            TensorStorage::BFloat16(v) => v.len(),
            TensorStorage::Float32(v) => v.len(),
            TensorStorage::Float64(v) => v.len(),
            TensorStorage::Int32(v) => v.len(),
            TensorStorage::Int64(v) => v.len(),
            TensorStorage::UInt8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw little-endian bytes of the buffer
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TensorStorage::Float16(v) => bytemuck::cast_slice(v),
            TensorStorage::BFloat16(v) => bytemuck::cast_slice(v),
            TensorStorage::Float32(v) => bytemuck::cast_slice(v),
            TensorStorage::Float64(v) => bytemuck::cast_slice(v),
            TensorStorage::Int32(v) => bytemuck::cast_slice(v),
            TensorStorage::Int64(v) => bytemuck::cast_slice(v),
            TensorStorage::UInt8(v) => v.as_slice(),
        }
    }
}

/// Rust element type that can back a tensor
pub trait Element:
    bytemuck::Pod + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static
{
    const DTYPE: DType;

    /// Typed view of the storage, `None` if it holds another element type
    fn slice(storage: &TensorStorage) -> Option<&[Self]>;

    fn slice_mut(storage: &mut TensorStorage) -> Option<&mut [Self]>;

    fn into_storage(data: Vec<Self>) -> TensorStorage;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn slice(storage: &TensorStorage) -> Option<&[Self]> {
                match storage {
                    TensorStorage::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(storage: &mut TensorStorage) -> Option<&mut [Self]> {
                match storage {
                    TensorStorage::$variant(v) => Some(v.as_mut_slice()),
                    _ => None,
                }
            }

            fn into_storage(data: Vec<Self>) -> TensorStorage {
                TensorStorage::$variant(data)
            }
        }
    };
}

impl_element!(f16, Float16);
impl_element!(bf16, BFloat16);
impl_element!(f32, Float32);
impl_element!(f64, Float64);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, UInt8);
