//! Execution streams
//!
//! Backends enqueue kernels on a stream and return as soon as the launch is
//! recorded. Results are only defined after the owner of the stream calls
//! `synchronize`.

use crate::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A unit of device work
pub type StreamWork = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Device stream for asynchronous kernel execution
pub trait DeviceStream: Send + Sync + std::fmt::Debug {
    /// Stream identifier, unique per device
    fn id(&self) -> usize;

    /// Record a kernel launch; must not wait for the kernel to run
    fn enqueue(&self, kernel_name: &str, work: StreamWork) -> Result<()>;

    /// Block until all enqueued work has executed
    fn synchronize(&self) -> Result<()>;

    /// Check if operations are complete
    fn is_complete(&self) -> bool;
}

/// When an emulated stream runs its kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Queue kernels and run them in order on `synchronize`
    #[default]
    Deferred,
    /// Run each kernel as it is enqueued
    Immediate,
}

struct PendingKernel {
    name: String,
    work: StreamWork,
}

/// In-order stream of the emulated accelerator
pub struct EmulatedStream {
    id: usize,
    mode: ExecutionMode,
    queue: Mutex<VecDeque<PendingKernel>>,
    launched: AtomicU64,
    executed: AtomicU64,
}

impl EmulatedStream {
    pub fn new(id: usize, mode: ExecutionMode) -> Self {
        Self {
            id,
            mode,
            queue: Mutex::new(VecDeque::new()),
            launched: AtomicU64::new(0),
            executed: AtomicU64::new(0),
        }
    }

    /// Number of kernels launched on this stream so far
    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::Relaxed)
    }

    /// Number of kernels that have finished executing
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    fn run(&self, kernel: PendingKernel) -> Result<()> {
        log::trace!("stream {}: running {}", self.id, kernel.name);
        let result = (kernel.work)();
        self.executed.fetch_add(1, Ordering::Relaxed);
        result
    }
}

impl std::fmt::Debug for EmulatedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedStream")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("launched", &self.launched())
            .field("executed", &self.executed())
            .finish()
    }
}

impl DeviceStream for EmulatedStream {
    fn id(&self) -> usize {
        self.id
    }

    fn enqueue(&self, kernel_name: &str, work: StreamWork) -> Result<()> {
        self.launched.fetch_add(1, Ordering::Relaxed);
        let kernel = PendingKernel {
            name: kernel_name.to_string(),
            work,
        };
        match self.mode {
            ExecutionMode::Immediate => self.run(kernel),
            ExecutionMode::Deferred => {
                log::trace!("stream {}: enqueued {}", self.id, kernel_name);
                self.queue.lock()?.push_back(kernel);
                Ok(())
            }
        }
    }

    fn synchronize(&self) -> Result<()> {
        // Take the batch out first so kernels never run under the queue lock.
        let pending = std::mem::take(&mut *self.queue.lock()?);
        let total = pending.len();
        for (done, kernel) in pending.into_iter().enumerate() {
            let name = kernel.name.clone();
            if let Err(err) = self.run(kernel) {
                log::warn!(
                    "stream {}: kernel {} failed, dropping {} queued kernels",
                    self.id,
                    name,
                    total - done - 1
                );
                return Err(err);
            }
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.queue.lock().map(|q| q.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendStatus;
    use crate::TensorError;
    use std::sync::Arc;

    #[test]
    fn test_deferred_stream_runs_on_synchronize() {
        let stream = EmulatedStream::new(0, ExecutionMode::Deferred);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            stream
                .enqueue(
                    "push",
                    Box::new(move || {
                        log.lock().unwrap().push(i);
                        Ok(())
                    }),
                )
                .unwrap();
        }
        assert!(log.lock().unwrap().is_empty());
        assert!(!stream.is_complete());

        stream.synchronize().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert!(stream.is_complete());
        assert_eq!(stream.launched(), 3);
        assert_eq!(stream.executed(), 3);
    }

    #[test]
    fn test_immediate_stream_runs_inline() {
        let stream = EmulatedStream::new(1, ExecutionMode::Immediate);
        let err = stream
            .enqueue(
                "fail",
                Box::new(|| {
                    Err(TensorError::backend(
                        "fail",
                        BackendStatus::ExecutionFailed,
                        "boom",
                    ))
                }),
            )
            .unwrap_err();
        assert_eq!(err.backend_status(), Some(BackendStatus::ExecutionFailed));
        assert!(stream.is_complete());
    }

    #[test]
    fn test_failed_kernel_drops_rest_of_batch() {
        let stream = EmulatedStream::new(0, ExecutionMode::Deferred);
        let ran = Arc::new(AtomicU64::new(0));
        stream
            .enqueue(
                "fail",
                Box::new(|| {
                    Err(TensorError::backend(
                        "fail",
                        BackendStatus::ExecutionFailed,
                        "boom",
                    ))
                }),
            )
            .unwrap();
        let counter = Arc::clone(&ran);
        stream
            .enqueue(
                "after",
                Box::new(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }),
            )
            .unwrap();

        assert!(stream.synchronize().is_err());
        assert_eq!(ran.load(Ordering::Relaxed), 0);
        assert!(stream.is_complete());
    }
}
