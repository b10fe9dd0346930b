//! Execution context handed to operators
//!
//! A context binds one device to the stream work is queued on and to the
//! math library that launches kernels for it. Operators hold an `Arc` to the
//! context they were created with and never synchronize it themselves.

use super::{Device, DeviceStream, EmulatedStream};
use crate::backend::{EmulatedBackend, EmulatedBackendConfig, NormBackend};
use crate::Result;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DeviceContext {
    device: Device,
    stream: Arc<dyn DeviceStream>,
    backend: Arc<dyn NormBackend>,
}

impl DeviceContext {
    pub fn new(device: Device, stream: Arc<dyn DeviceStream>, backend: Arc<dyn NormBackend>) -> Self {
        Self {
            device,
            stream,
            backend,
        }
    }

    /// Context for GPU `device_id` backed by the emulated accelerator
    pub fn emulated(device_id: usize) -> Self {
        Self::emulated_with_config(device_id, EmulatedBackendConfig::default())
    }

    pub fn emulated_with_config(device_id: usize, config: EmulatedBackendConfig) -> Self {
        let stream = EmulatedStream::new(0, config.execution_mode);
        Self::new(
            Device::Gpu(device_id),
            Arc::new(stream),
            Arc::new(EmulatedBackend::new(config)),
        )
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn stream(&self) -> &dyn DeviceStream {
        self.stream.as_ref()
    }

    pub fn backend(&self) -> &Arc<dyn NormBackend> {
        &self.backend
    }

    /// Wait for every kernel queued on this context's stream
    pub fn synchronize(&self) -> Result<()> {
        log::trace!("synchronizing {} stream {}", self.device, self.stream.id());
        self.stream.synchronize()
    }
}
