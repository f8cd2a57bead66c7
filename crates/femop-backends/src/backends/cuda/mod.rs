//! CUDA backend implementation for NVIDIA GPUs
//!
//! Buffers live in device memory and kernels are NVRTC-compiled from CUDA C
//! on backend creation. Kernels are issued on the device's default stream,
//! so they execute in issue order and complete asynchronously until
//! [`Backend::synchronize`].
//!
//! # Architecture
//!
//! ```text
//! CudaBackend
//! ├── Device          - CUDA GPU device
//! ├── MemoryManager   - f64 device buffers + u32 index maps
//! └── Kernels         - fill / gather / scatter_add / gemv / gemv_t / noop
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use femop_backends::{Backend, CudaBackend, LaunchConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = CudaBackend::new()?;
//!
//! let buffer = backend.allocate_buffer(1024)?;
//! backend.launch_noop(&LaunchConfig::blocks(128, 1))?;
//! backend.synchronize()?;
//!
//! backend.free_buffer(buffer)?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "cuda")]
mod kernels;
#[cfg(feature = "cuda")]
mod memory;

use crate::error::{BackendError, Result};

#[cfg(feature = "cuda")]
use crate::backend::{Backend, BackendStats, BufferHandle, IndexHandle, LaunchConfig};
#[cfg(feature = "cuda")]
use cudarc::driver::CudaDevice;
#[cfg(feature = "cuda")]
use memory::CudaMemoryManager;
#[cfg(feature = "cuda")]
use parking_lot::RwLock;
#[cfg(feature = "cuda")]
use std::sync::Arc;

/// CUDA backend for NVIDIA GPUs
#[cfg(feature = "cuda")]
#[derive(Clone)]
pub struct CudaBackend {
    memory: Arc<RwLock<CudaMemoryManager>>,
}

#[cfg(feature = "cuda")]
impl CudaBackend {
    /// Create a new CUDA backend on device 0
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No CUDA device is available
    /// - CUDA initialization fails
    /// - The kernel module fails to compile or load
    pub fn new() -> Result<Self> {
        let device = CudaDevice::new(0).map_err(|e| {
            BackendError::DeviceUnavailable(format!("CUDA device not found or initialization failed: {e}"))
        })?;
        let memory = CudaMemoryManager::new(device)?;
        tracing::debug!(backend = "cuda", "CUDA backend initialised");
        Ok(Self {
            memory: Arc::new(RwLock::new(memory)),
        })
    }

    /// Check if CUDA is available on this system
    pub fn is_available() -> bool {
        CudaDevice::new(0).is_ok()
    }
}

#[cfg(feature = "cuda")]
impl Backend for CudaBackend {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn allocate_buffer(&mut self, len: usize) -> Result<BufferHandle> {
        self.memory.write().allocate_buffer(len)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.memory.write().free_buffer(handle)
    }

    fn buffer_len(&self, handle: BufferHandle) -> Result<usize> {
        self.memory.read().buffer_len(handle)
    }

    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[f64]) -> Result<()> {
        self.memory.write().copy_to_buffer(handle, data)
    }

    fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [f64]) -> Result<()> {
        self.memory.read().copy_from_buffer(handle, data)
    }

    fn upload_indices(&mut self, indices: &[u32]) -> Result<IndexHandle> {
        self.memory.write().upload_indices(indices)
    }

    fn free_indices(&mut self, handle: IndexHandle) -> Result<()> {
        self.memory.write().free_indices(handle)
    }

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle) -> Result<()> {
        self.memory.write().copy_buffer(src, dst)
    }

    fn fill_buffer(&mut self, dst: BufferHandle, value: f64) -> Result<()> {
        self.memory.write().fill_buffer(dst, value)
    }

    fn gather(&mut self, src: BufferHandle, map: IndexHandle, dst: BufferHandle) -> Result<()> {
        self.memory.write().gather(src, map, dst)
    }

    fn scatter_add(&mut self, src: BufferHandle, map: IndexHandle, dst: BufferHandle) -> Result<()> {
        self.memory.write().scatter_add(src, map, dst)
    }

    fn gemv(
        &mut self,
        matrix: BufferHandle,
        rows: usize,
        cols: usize,
        transpose: bool,
        x: BufferHandle,
        y: BufferHandle,
    ) -> Result<()> {
        self.memory.write().gemv(matrix, rows, cols, transpose, x, y)
    }

    fn launch_noop(&mut self, config: &LaunchConfig) -> Result<()> {
        self.memory.write().launch_noop(config)
    }

    fn synchronize(&mut self) -> Result<()> {
        self.memory.write().synchronize()
    }

    fn stats(&self) -> BackendStats {
        self.memory.read().stats()
    }
}

// Stub implementation when CUDA feature is not enabled
#[cfg(not(feature = "cuda"))]
pub struct CudaBackend;

#[cfg(not(feature = "cuda"))]
impl CudaBackend {
    pub fn new() -> Result<Self> {
        Err(BackendError::DeviceUnavailable(
            "CUDA backend requires 'cuda' feature to be enabled".into(),
        ))
    }

    pub fn is_available() -> bool {
        false
    }
}
