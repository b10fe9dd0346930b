//! Tensor handle and typed access
//!
//! A `Tensor` is owned by the graph engine. Its storage sits behind a shared
//! buffer so that kernels queued on a device stream keep the memory alive
//! until the stream drains; operators only ever touch contents through typed
//! views or by asking the backend to launch work on them.

use super::storage::{Element, TensorStorage};
use crate::{DType, Device, Result, Shape, TensorError};
use std::sync::{Arc, RwLock};

/// Shared device memory backing a tensor
pub type DeviceBuffer = Arc<RwLock<TensorStorage>>;

#[derive(Debug)]
pub struct Tensor {
    buffer: DeviceBuffer,
    shape: Shape,
    dtype: DType,
    device: Device,
}

impl Tensor {
    /// Create a host tensor from a vector of elements
    pub fn from_vec<T: Element>(data: Vec<T>, dims: &[usize]) -> Result<Self> {
        let shape = Shape::from_slice(dims);
        if data.len() != shape.elements() {
            return Err(TensorError::shape_mismatch(
                "tensor_from_vec",
                &format!("{} elements for shape {}", shape.elements(), shape),
                &format!("{} elements", data.len()),
            ));
        }
        Ok(Self {
            buffer: Arc::new(RwLock::new(T::into_storage(data))),
            shape,
            dtype: T::DTYPE,
            device: Device::Cpu,
        })
    }

    pub fn zeros(dtype: DType, dims: &[usize], device: Device) -> Self {
        let shape = Shape::from_slice(dims);
        Self {
            buffer: Arc::new(RwLock::new(TensorStorage::zeros(dtype, shape.elements()))),
            shape,
            dtype,
            device,
        }
    }

    /// An unsized output placeholder on `device`, to be shaped by `resize_like`
    pub fn empty(device: Device) -> Self {
        Self::zeros(DType::Float32, &[0], device)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn elements(&self) -> usize {
        self.shape.elements()
    }

    /// Copy this tensor into fresh memory on `device`
    pub fn to_device(&self, device: Device) -> Result<Tensor> {
        let storage = self.buffer.read()?.clone();
        Ok(Self {
            buffer: Arc::new(RwLock::new(storage)),
            shape: self.shape.clone(),
            dtype: self.dtype,
            device,
        })
    }

    /// Give this tensor the shape and element type of `reference`.
    ///
    /// Memory is only reallocated when either differs; contents are
    /// unspecified afterwards. A reallocated tensor gets a new buffer, so
    /// kernels still queued against the old one keep writing there.
    pub fn resize_like(&mut self, reference: &Tensor) {
        if self.shape == reference.shape && self.dtype == reference.dtype {
            return;
        }
        self.buffer = Arc::new(RwLock::new(TensorStorage::zeros(
            reference.dtype,
            reference.elements(),
        )));
        self.shape = reference.shape.clone();
        self.dtype = reference.dtype;
    }

    /// Read access through a typed view
    pub fn with_data<T: Element, R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R> {
        let storage = self.buffer.read()?;
        let data = T::slice(&storage).ok_or_else(|| self.type_error::<T>())?;
        Ok(f(data))
    }

    /// Write access through a typed view
    pub fn with_data_mut<T: Element, R>(&mut self, f: impl FnOnce(&mut [T]) -> R) -> Result<R> {
        let mut storage = self.buffer.write()?;
        let expected = self.dtype;
        let data = T::slice_mut(&mut storage).ok_or_else(|| {
            TensorError::invalid_argument(
                "tensor_access",
                format!("tensor holds {expected}, requested {}", T::DTYPE),
            )
        })?;
        Ok(f(data))
    }

    /// Copy the contents out as a typed vector
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.with_data(|data: &[T]| data.to_vec())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.buffer.read()?.as_bytes().to_vec())
    }

    /// Whether two handles refer to the same device memory
    pub fn shares_buffer(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    pub(crate) fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    fn type_error<T: Element>(&self) -> TensorError {
        TensorError::invalid_argument(
            "tensor_access",
            format!("tensor holds {}, requested {}", self.dtype, T::DTYPE),
        )
    }
}
