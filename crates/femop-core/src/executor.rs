//! Executor for managing backend execution
//!
//! The `Executor` wraps a `femop-backends::Backend` and is the only way
//! vectors, index maps and kernels reach the device.
//!
//! ## Architecture
//!
//! ```text
//! femop-core::Executor
//!   ↓ delegates to
//! femop-backends::Backend (CpuBackend, CudaBackend)
//!   ↓ runs
//! copy / fill / gather / scatter_add / gemv kernels
//! ```
//!
//! Executors are cheap to clone; every clone drives the same backend, so a
//! `Vector` can keep its own handle and free itself on drop.

use crate::error::{Error, Result};
use crate::vector::Vector;
use femop_backends::{Backend, BackendError, BackendStats, BufferHandle, CpuBackend, IndexHandle, LaunchConfig};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "cuda")]
use femop_backends::CudaBackend;

/// Backend type for executor initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// CPU backend (always available)
    #[default]
    Cpu,
    /// CUDA backend (NVIDIA GPUs, `cuda` feature)
    Cuda,
}

impl BackendType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(Error::InvalidConfig(format!("unknown backend '{other}' (expected cpu or cuda)"))),
        }
    }
}

/// Shared handle to a device backend
///
/// # Example
///
/// ```
/// use femop_core::Executor;
///
/// let exec = Executor::new()?;
/// let mut x = exec.allocate(4)?;
/// x.fill(1.0)?;
/// exec.synchronize()?;
/// assert_eq!(x.to_vec()?, vec![1.0; 4]);
/// # Ok::<(), femop_core::Error>(())
/// ```
#[derive(Clone)]
pub struct Executor {
    backend: Arc<RwLock<Box<dyn Backend + Send + Sync>>>,
    backend_type: BackendType,
}

impl Executor {
    /// Create a new executor with CPU backend
    ///
    /// This is equivalent to `Executor::new_with_backend(BackendType::Cpu)`.
    pub fn new() -> Result<Self> {
        Self::new_with_backend(BackendType::Cpu)
    }

    /// Create a new executor with specified backend
    ///
    /// # Errors
    ///
    /// Returns `Err` if the backend is not compiled in or no device is present.
    #[tracing::instrument]
    pub fn new_with_backend(backend_type: BackendType) -> Result<Self> {
        let start = std::time::Instant::now();

        let backend: Box<dyn Backend + Send + Sync> = match backend_type {
            BackendType::Cpu => Box::new(CpuBackend::new()),
            BackendType::Cuda => {
                #[cfg(feature = "cuda")]
                {
                    Box::new(CudaBackend::new()?)
                }
                #[cfg(not(feature = "cuda"))]
                {
                    return Err(Error::Backend(BackendError::DeviceUnavailable(
                        "CUDA backend requires 'cuda' feature to be enabled".into(),
                    )));
                }
            }
        };

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(duration_us = duration_us, backend = %backend_type, "executor_created");

        Ok(Self {
            backend: Arc::new(RwLock::new(backend)),
            backend_type,
        })
    }

    /// Which backend this executor drives
    pub fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    /// Backend activity counters
    pub fn stats(&self) -> BackendStats {
        self.backend.read().stats()
    }

    // ============================================================================================
    // Allocation
    // ============================================================================================

    /// Allocate a zero-filled vector of `len` elements
    pub fn allocate(&self, len: usize) -> Result<Vector> {
        let handle = self.backend.write().allocate_buffer(len)?;
        Ok(Vector::from_parts(self.clone(), handle, len))
    }

    /// Allocate a vector holding a copy of `data`
    pub fn vector_from_slice(&self, data: &[f64]) -> Result<Vector> {
        let mut vector = self.allocate(data.len())?;
        vector.copy_from_slice(data)?;
        Ok(vector)
    }

    /// Allocate a vector with every element set to `value`
    pub fn constant(&self, len: usize, value: f64) -> Result<Vector> {
        let mut vector = self.allocate(len)?;
        vector.fill(value)?;
        Ok(vector)
    }

    pub(crate) fn free_buffer(&self, handle: BufferHandle) -> Result<()> {
        Ok(self.backend.write().free_buffer(handle)?)
    }

    /// Upload an immutable index map
    pub fn upload_indices(&self, indices: &[u32]) -> Result<IndexHandle> {
        Ok(self.backend.write().upload_indices(indices)?)
    }

    pub fn free_indices(&self, handle: IndexHandle) -> Result<()> {
        Ok(self.backend.write().free_indices(handle)?)
    }

    // ============================================================================================
    // Device control
    // ============================================================================================

    /// Block until all previously issued device work has completed
    pub fn synchronize(&self) -> Result<()> {
        Ok(self.backend.write().synchronize()?)
    }

    /// Launch a kernel that does nothing
    pub fn launch_noop(&self, config: &LaunchConfig) -> Result<()> {
        Ok(self.backend.write().launch_noop(config)?)
    }

    /// Run `f` against the backend under the write lock
    pub(crate) fn with_backend<R>(
        &self,
        f: impl FnOnce(&mut dyn Backend) -> std::result::Result<R, BackendError>,
    ) -> Result<R> {
        let mut backend = self.backend.write();
        Ok(f(&mut **backend)?)
    }

    /// Whether `other` drives the same backend instance
    pub fn same_device(&self, other: &Executor) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("backend", &self.backend_type)
            .finish_non_exhaustive()
    }
}
