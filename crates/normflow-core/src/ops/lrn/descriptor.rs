//! Backend descriptors owned by an LRN operator instance

use super::LrnParameters;
use crate::backend::{
    BackendStatus, LrnDescriptorHandle, NormBackend, TensorDescriptorHandle, TensorFormat,
};
use crate::{DType, Result, TensorError};
use std::sync::Arc;

/// Normalization descriptor holding the fixed LRN constants on the backend
#[derive(Debug)]
pub struct NormalizationDescriptor {
    backend: Arc<dyn NormBackend>,
    handle: LrnDescriptorHandle,
    params: LrnParameters,
}

impl NormalizationDescriptor {
    /// Create and set the descriptor.
    ///
    /// Parameters the backend rejects are reported as a configuration error
    /// (`InvalidArgument`); any other failure is a backend error.
    pub fn new(backend: Arc<dyn NormBackend>, operation: &str, params: LrnParameters) -> Result<Self> {
        let handle = backend.create_lrn_descriptor()?;
        // Built before the set call so a rejected descriptor is still destroyed.
        let descriptor = Self {
            backend,
            handle,
            params,
        };
        descriptor
            .backend
            .set_lrn_descriptor(
                handle,
                params.window_size,
                f64::from(params.alpha),
                f64::from(params.beta),
                f64::from(params.bias),
            )
            .map_err(|err| match err.backend_status() {
                Some(BackendStatus::BadParam) => TensorError::invalid_argument(
                    operation,
                    format!("LRN parameters {params:?} rejected: {err}"),
                ),
                _ => err,
            })?;
        Ok(descriptor)
    }

    pub fn handle(&self) -> LrnDescriptorHandle {
        self.handle
    }

    pub fn params(&self) -> &LrnParameters {
        &self.params
    }
}

impl Drop for NormalizationDescriptor {
    fn drop(&mut self) {
        if let Err(err) = self.backend.destroy_lrn_descriptor(self.handle) {
            log::error!("failed to release LRN descriptor: {err}");
        }
    }
}

/// Tensor descriptor describing the last input geometry an operator saw
#[derive(Debug)]
pub struct ShapeDescriptorCache {
    backend: Arc<dyn NormBackend>,
    handle: TensorDescriptorHandle,
    cached: Option<([usize; 4], DType)>,
    rebuilds: usize,
}

impl ShapeDescriptorCache {
    pub fn new(backend: Arc<dyn NormBackend>) -> Result<Self> {
        let handle = backend.create_tensor_descriptor()?;
        Ok(Self {
            backend,
            handle,
            cached: None,
            rebuilds: 0,
        })
    }

    /// Make the descriptor describe `dims`/`dtype`, returning whether it had
    /// to be rebuilt
    pub fn ensure(&mut self, operation: &str, dims: [usize; 4], dtype: DType) -> Result<bool> {
        if self.cached == Some((dims, dtype)) {
            return Ok(false);
        }

        log::debug!("{operation}: Setting descriptors for {dtype} {dims:?}");
        self.cached = None;
        self.backend
            .set_tensor_4d_descriptor(self.handle, TensorFormat::Nchw, dtype, dims)?;
        self.cached = Some((dims, dtype));
        self.rebuilds += 1;
        Ok(true)
    }

    pub fn handle(&self) -> TensorDescriptorHandle {
        self.handle
    }

    /// Dims the descriptor currently describes
    pub fn cached_dims(&self) -> Option<[usize; 4]> {
        self.cached.map(|(dims, _)| dims)
    }

    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }
}

impl Drop for ShapeDescriptorCache {
    fn drop(&mut self) {
        if let Err(err) = self.backend.destroy_tensor_descriptor(self.handle) {
            log::error!("failed to release tensor descriptor: {err}");
        }
    }
}
