//! Backend trait for device-resident vectors
//!
//! This trait defines the interface that all backends must implement.
//! A backend owns device memory and issues the handful of kernels femop's
//! operators need. Kernels may complete asynchronously; callers observe
//! their results only through host copies or after [`Backend::synchronize`].

use super::types::{BackendStats, BufferHandle, IndexHandle, LaunchConfig};
use crate::error::Result;

/// Backend trait for device execution
///
/// # Memory Model
///
/// Backends manage two kinds of memory:
///
/// 1. **Buffers** - mutable `f64` arrays holding vector and matrix data
/// 2. **Index maps** - immutable `u32` arrays driving gather/scatter
///
/// # Ordering
///
/// Kernels issued through one backend execute in issue order. Host copies
/// (`copy_to_buffer` / `copy_from_buffer`) are ordered after every earlier
/// kernel on the same backend.
///
/// # Usage
///
/// ```rust
/// use femop_backends::{Backend, CpuBackend};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut backend = CpuBackend::new();
///
/// let x = backend.allocate_buffer(4)?;
/// let y = backend.allocate_buffer(4)?;
/// backend.copy_to_buffer(x, &[1.0, 2.0, 3.0, 4.0])?;
/// backend.copy_buffer(x, y)?;
/// backend.synchronize()?;
///
/// let mut out = [0.0; 4];
/// backend.copy_from_buffer(y, &mut out)?;
/// assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
///
/// backend.free_buffer(x)?;
/// backend.free_buffer(y)?;
/// # Ok(())
/// # }
/// ```
pub trait Backend {
    /// Short backend name for logs ("cpu", "cuda")
    fn name(&self) -> &'static str;

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    /// Allocate a zero-initialised buffer of `len` elements
    fn allocate_buffer(&mut self, len: usize) -> Result<BufferHandle>;

    /// Free a previously allocated buffer
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer handle is invalid.
    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Number of elements in a buffer
    fn buffer_len(&self, handle: BufferHandle) -> Result<usize>;

    /// Copy `data` from the host into the buffer (H2D)
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is invalid or `data.len()` differs
    /// from the buffer length.
    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[f64]) -> Result<()>;

    /// Copy the buffer into `data` on the host (D2H)
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is invalid or `data.len()` differs
    /// from the buffer length.
    fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [f64]) -> Result<()>;

    // ============================================================================================
    // Index Maps
    // ============================================================================================

    /// Upload an index map
    fn upload_indices(&mut self, indices: &[u32]) -> Result<IndexHandle>;

    /// Free an index map
    fn free_indices(&mut self, handle: IndexHandle) -> Result<()>;

    // ============================================================================================
    // Kernels
    // ============================================================================================

    /// `dst := src`; both buffers must have equal length
    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle) -> Result<()>;

    /// `dst[i] := value` for every element
    fn fill_buffer(&mut self, dst: BufferHandle, value: f64) -> Result<()>;

    /// `dst[i] := src[map[i]]`; `map` and `dst` have equal length
    fn gather(&mut self, src: BufferHandle, map: IndexHandle, dst: BufferHandle) -> Result<()>;

    /// `dst := 0; dst[map[i]] += src[i]`; `map` and `src` have equal length
    fn scatter_add(&mut self, src: BufferHandle, map: IndexHandle, dst: BufferHandle) -> Result<()>;

    /// Dense matrix-vector product with a row-major `rows × cols` matrix
    ///
    /// `y := A x` when `transpose` is false (x: cols, y: rows), otherwise
    /// `y := Aᵀ x` (x: rows, y: cols).
    fn gemv(
        &mut self,
        matrix: BufferHandle,
        rows: usize,
        cols: usize,
        transpose: bool,
        x: BufferHandle,
        y: BufferHandle,
    ) -> Result<()>;

    /// Launch a kernel that does nothing
    ///
    /// Used to absorb first-launch overhead of the device and any attached
    /// profiler before a timed region starts.
    fn launch_noop(&mut self, config: &LaunchConfig) -> Result<()>;

    // ============================================================================================
    // Synchronization
    // ============================================================================================

    /// Block until every kernel issued so far has completed
    fn synchronize(&mut self) -> Result<()>;

    /// Activity counters
    fn stats(&self) -> BackendStats;
}
