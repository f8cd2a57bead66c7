//! CPU backend implementation
//!
//! Reference implementation of the Backend trait for host execution.
//! Kernels run synchronously, so [`Backend::synchronize`] only resets the
//! pending-launch counter.
//!
//! # Architecture
//!
//! ```text
//! CpuBackend
//! ├── MemoryManager  - f64 buffers + u32 index maps + counters
//! └── kernels        - copy / fill / gather / scatter_add / gemv (rayon above a threshold)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use femop_backends::{Backend, CpuBackend, LaunchConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = CpuBackend::new();
//!
//! let buffer = backend.allocate_buffer(1024)?;
//! backend.launch_noop(&LaunchConfig::blocks(128, 1))?;
//! backend.synchronize()?;
//!
//! backend.free_buffer(buffer)?;
//! # Ok(())
//! # }
//! ```

mod kernels;
pub(crate) mod memory;

use crate::backend::{Backend, BackendStats, BufferHandle, IndexHandle, LaunchConfig};
use crate::error::{BackendError, Result};
use memory::MemoryManager;
use parking_lot::RwLock;
use std::sync::Arc;

/// CPU backend over host memory
///
/// Clones share the same memory manager.
#[derive(Clone)]
pub struct CpuBackend {
    memory: Arc<RwLock<MemoryManager>>,
}

impl CpuBackend {
    /// Create a new CPU backend
    ///
    /// # Example
    ///
    /// ```rust
    /// use femop_backends::CpuBackend;
    ///
    /// let backend = CpuBackend::new();
    /// ```
    pub fn new() -> Self {
        Self {
            memory: Arc::new(RwLock::new(MemoryManager::new())),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
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
        if config.total_lanes() == 0 {
            return Err(BackendError::InvalidLaunchConfig(format!("empty launch: {config}")));
        }
        tracing::trace!(backend = "cpu", %config, "noop launch");
        self.memory.write().record_launch();
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        self.memory.write().record_sync();
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.memory.read().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_backend_creation() {
        let backend = CpuBackend::new();
        assert_eq!(backend.name(), "cpu");
        assert_eq!(backend.stats(), BackendStats::default());
    }

    #[test]
    fn test_buffer_allocation() {
        let mut backend = CpuBackend::new();

        let buffer = backend.allocate_buffer(16).unwrap();
        assert_eq!(backend.buffer_len(buffer).unwrap(), 16);

        let mut out = [1.0; 16];
        backend.copy_from_buffer(buffer, &mut out).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));

        backend.free_buffer(buffer).unwrap();
        assert!(backend.buffer_len(buffer).is_err());
    }

    #[test]
    fn test_copy_length_mismatch() {
        let mut backend = CpuBackend::new();
        let buffer = backend.allocate_buffer(4).unwrap();
        let err = backend.copy_to_buffer(buffer, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, BackendError::LengthMismatch { expected: 4, actual: 2 }));
    }

    #[test]
    fn test_clones_share_memory() {
        let mut backend = CpuBackend::new();
        let buffer = backend.allocate_buffer(2).unwrap();
        backend.copy_to_buffer(buffer, &[3.0, 4.0]).unwrap();

        let mut other = backend.clone();
        let mut out = [0.0; 2];
        other.copy_from_buffer(buffer, &mut out).unwrap();
        assert_eq!(out, [3.0, 4.0]);
    }

    #[test]
    fn test_noop_launch_and_sync() {
        let mut backend = CpuBackend::new();
        backend.launch_noop(&LaunchConfig::blocks(128, 1)).unwrap();
        assert_eq!(backend.stats().pending_launches, 1);

        backend.synchronize().unwrap();
        let stats = backend.stats();
        assert_eq!(stats.pending_launches, 0);
        assert_eq!(stats.synchronizations, 1);

        let err = backend.launch_noop(&LaunchConfig::blocks(0, 1)).unwrap_err();
        assert!(matches!(err, BackendError::InvalidLaunchConfig(_)));
    }
}
