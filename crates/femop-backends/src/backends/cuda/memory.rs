//! CUDA memory management for device buffers and index maps

use super::kernels::{CudaKernels, BLOCK_SIZE};
use crate::backend::{BackendStats, BufferHandle, IndexHandle, LaunchConfig};
use crate::error::{BackendError, Result};
use cudarc::driver::{CudaDevice, CudaSlice, LaunchAsync, LaunchConfig as CudaLaunchConfig};
use std::collections::HashMap;
use std::sync::Arc;

struct DeviceIndexMap {
    indices: CudaSlice<u32>,
    len: usize,
    max: Option<u32>,
}

impl DeviceIndexMap {
    fn check_target(&self, target_len: usize) -> Result<()> {
        match self.max {
            Some(max) if max as usize >= target_len => Err(BackendError::IndexOutOfBounds {
                index: max as usize,
                len: target_len,
            }),
            _ => Ok(()),
        }
    }
}

fn element_launch(n: usize) -> Result<(CudaLaunchConfig, u32)> {
    let n = u32::try_from(n).map_err(|_| BackendError::InvalidLaunchConfig(format!("{n} elements exceed u32")))?;
    let config = LaunchConfig::linear(n.max(1), BLOCK_SIZE);
    Ok((to_cuda(&config), n))
}

fn to_cuda(config: &LaunchConfig) -> CudaLaunchConfig {
    CudaLaunchConfig {
        grid_dim: (config.grid.x, config.grid.y, config.grid.z),
        block_dim: (config.block.x, config.block.y, config.block.z),
        shared_mem_bytes: 0,
    }
}

/// Memory manager for CUDA device buffers
pub struct CudaMemoryManager {
    device: Arc<CudaDevice>,
    kernels: CudaKernels,

    /// Allocated buffers (handle -> device slice)
    buffers: HashMap<u64, CudaSlice<f64>>,

    /// Uploaded index maps
    indices: HashMap<u64, DeviceIndexMap>,

    next_buffer_id: u64,
    next_index_id: u64,
    stats: BackendStats,
}

impl CudaMemoryManager {
    /// Create a memory manager and load the kernel module on `device`
    pub fn new(device: Arc<CudaDevice>) -> Result<Self> {
        let kernels = CudaKernels::load(&device)?;
        Ok(Self {
            device,
            kernels,
            buffers: HashMap::new(),
            indices: HashMap::new(),
            next_buffer_id: 1,
            next_index_id: 1,
            stats: BackendStats::default(),
        })
    }

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    pub fn allocate_buffer(&mut self, len: usize) -> Result<BufferHandle> {
        let slice = self
            .device
            .alloc_zeros::<f64>(len)
            .map_err(|e| BackendError::Other(format!("CUDA buffer allocation failed: {e}")))?;

        let handle = BufferHandle::new(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.buffers.insert(handle.id(), slice);
        self.stats.allocations += 1;
        self.stats.live_buffers = self.buffers.len();
        Ok(handle)
    }

    pub fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        // Device memory is released when the slice drops
        self.buffers
            .remove(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        self.stats.frees += 1;
        self.stats.live_buffers = self.buffers.len();
        Ok(())
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&CudaSlice<f64>> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    pub fn buffer_len(&self, handle: BufferHandle) -> Result<usize> {
        self.buffer(handle).map(CudaSlice::len)
    }

    pub fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[f64]) -> Result<()> {
        let slice = self
            .buffers
            .get_mut(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        if slice.len() != data.len() {
            return Err(BackendError::length_mismatch(slice.len(), data.len()));
        }
        self.device
            .htod_sync_copy_into(data, slice)
            .map_err(|e| BackendError::Other(format!("CUDA host-to-device copy failed: {e}")))
    }

    pub fn copy_from_buffer(&self, handle: BufferHandle, data: &mut [f64]) -> Result<()> {
        let slice = self.buffer(handle)?;
        if slice.len() != data.len() {
            return Err(BackendError::length_mismatch(slice.len(), data.len()));
        }
        self.device
            .dtoh_sync_copy_into(slice, data)
            .map_err(|e| BackendError::Other(format!("CUDA device-to-host copy failed: {e}")))
    }

    // ============================================================================================
    // Index Maps
    // ============================================================================================

    pub fn upload_indices(&mut self, indices: &[u32]) -> Result<IndexHandle> {
        let slice = self
            .device
            .htod_sync_copy(indices)
            .map_err(|e| BackendError::Other(format!("CUDA index upload failed: {e}")))?;

        let handle = IndexHandle::new(self.next_index_id);
        self.next_index_id += 1;
        self.indices.insert(
            handle.id(),
            DeviceIndexMap {
                indices: slice,
                len: indices.len(),
                max: indices.iter().copied().max(),
            },
        );
        self.stats.allocations += 1;
        Ok(handle)
    }

    pub fn free_indices(&mut self, handle: IndexHandle) -> Result<()> {
        self.indices
            .remove(&handle.id())
            .ok_or(BackendError::InvalidIndexHandle(handle.id()))?;
        self.stats.frees += 1;
        Ok(())
    }

    fn index_map(&self, handle: IndexHandle) -> Result<&DeviceIndexMap> {
        self.indices
            .get(&handle.id())
            .ok_or(BackendError::InvalidIndexHandle(handle.id()))
    }

    // ============================================================================================
    // Kernels
    // ============================================================================================

    /// Take `dst` out of the map for the duration of `f`; it is always reinserted.
    fn with_output<R>(&mut self, dst: BufferHandle, f: impl FnOnce(&Self, &mut CudaSlice<f64>) -> Result<R>) -> Result<R> {
        let mut out = self
            .buffers
            .remove(&dst.id())
            .ok_or(BackendError::InvalidBufferHandle(dst.id()))?;
        let result = f(self, &mut out);
        self.buffers.insert(dst.id(), out);
        self.stats.record_launch();
        result
    }

    fn fill_slice(&self, out: &mut CudaSlice<f64>, value: f64) -> Result<()> {
        let (cfg, n) = element_launch(out.len())?;
        // SAFETY: argument list matches femop_fill and `n` bounds every write
        unsafe { self.kernels.fill.clone().launch(cfg, (out, value, n)) }.map_err(BackendError::launch_failed)
    }

    pub fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle) -> Result<()> {
        if src == dst {
            self.buffer(src)?;
            self.stats.record_launch();
            return Ok(());
        }
        self.with_output(dst, |this, out| {
            let input = this.buffer(src)?;
            if input.len() != out.len() {
                return Err(BackendError::length_mismatch(out.len(), input.len()));
            }
            this.device.dtod_copy(input, out).map_err(BackendError::launch_failed)
        })
    }

    pub fn fill_buffer(&mut self, dst: BufferHandle, value: f64) -> Result<()> {
        self.with_output(dst, |this, out| this.fill_slice(out, value))
    }

    pub fn gather(&mut self, src: BufferHandle, map: IndexHandle, dst: BufferHandle) -> Result<()> {
        if src == dst {
            return Err(BackendError::Aliased(src.id()));
        }
        self.with_output(dst, |this, out| {
            let input = this.buffer(src)?;
            let map = this.index_map(map)?;
            if map.len != out.len() {
                return Err(BackendError::length_mismatch(out.len(), map.len));
            }
            map.check_target(input.len())?;
            if out.len() == 0 {
                return Ok(());
            }
            let (cfg, n) = element_launch(out.len())?;
            // SAFETY: map entries are bounds-checked against `input`
            unsafe { this.kernels.gather.clone().launch(cfg, (input, &map.indices, out, n)) }
                .map_err(BackendError::launch_failed)
        })
    }

    pub fn scatter_add(&mut self, src: BufferHandle, map: IndexHandle, dst: BufferHandle) -> Result<()> {
        if src == dst {
            return Err(BackendError::Aliased(src.id()));
        }
        self.with_output(dst, |this, out| {
            let input = this.buffer(src)?;
            let map = this.index_map(map)?;
            if map.len != input.len() {
                return Err(BackendError::length_mismatch(input.len(), map.len));
            }
            map.check_target(out.len())?;
            if out.len() > 0 {
                this.fill_slice(out, 0.0)?;
            }
            if input.len() == 0 {
                return Ok(());
            }
            let (cfg, n) = element_launch(input.len())?;
            // SAFETY: map entries are bounds-checked against `out`; collisions use atomicAdd
            unsafe { this.kernels.scatter_add.clone().launch(cfg, (input, &map.indices, out, n)) }
                .map_err(BackendError::launch_failed)
        })
    }

    pub fn gemv(
        &mut self,
        matrix: BufferHandle,
        rows: usize,
        cols: usize,
        transpose: bool,
        x: BufferHandle,
        y: BufferHandle,
    ) -> Result<()> {
        if y == x || y == matrix {
            return Err(BackendError::Aliased(y.id()));
        }
        self.with_output(y, |this, out| {
            let a = this.buffer(matrix)?;
            if a.len() != rows * cols {
                return Err(BackendError::MatrixShape { rows, cols, len: a.len() });
            }
            let input = this.buffer(x)?;
            let (in_len, out_len) = if transpose { (rows, cols) } else { (cols, rows) };
            if input.len() != in_len {
                return Err(BackendError::length_mismatch(in_len, input.len()));
            }
            if out.len() != out_len {
                return Err(BackendError::length_mismatch(out_len, out.len()));
            }
            if out_len == 0 {
                return Ok(());
            }
            let (cfg, _) = element_launch(out_len)?;
            let (rows, cols) = (rows as u32, cols as u32);
            let func = if transpose { &this.kernels.gemv_t } else { &this.kernels.gemv };
            // SAFETY: shapes were checked above
            unsafe { func.clone().launch(cfg, (a, input, out, rows, cols)) }.map_err(BackendError::launch_failed)
        })
    }

    pub fn launch_noop(&mut self, config: &LaunchConfig) -> Result<()> {
        if config.total_lanes() == 0 {
            return Err(BackendError::InvalidLaunchConfig(format!("empty launch: {config}")));
        }
        // SAFETY: the kernel touches no memory
        unsafe { self.kernels.noop.clone().launch(to_cuda(config), (0u32,)) }.map_err(BackendError::launch_failed)?;
        self.stats.record_launch();
        Ok(())
    }

    pub fn synchronize(&mut self) -> Result<()> {
        self.device.synchronize().map_err(BackendError::launch_failed)?;
        self.stats.record_sync();
        Ok(())
    }

    pub fn stats(&self) -> BackendStats {
        self.stats
    }
}
