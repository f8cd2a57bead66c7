//! Memory manager for the CPU backend
//!
//! Buffers and index maps live in host `Vec`s keyed by handle id. Kernels
//! that write one buffer while reading others temporarily take the output
//! buffer out of the map, so no copy is made and no extra allocation happens.

use super::kernels;
use crate::backend::{BackendStats, BufferHandle, IndexHandle};
use crate::error::{BackendError, Result};
use std::collections::HashMap;

/// Uploaded index map plus its largest entry, for O(1) bounds checks.
struct IndexMap {
    indices: Vec<u32>,
    max: Option<u32>,
}

impl IndexMap {
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

/// Memory manager for the CPU backend
pub struct MemoryManager {
    buffers: HashMap<u64, Vec<f64>>,
    indices: HashMap<u64, IndexMap>,
    next_buffer_id: u64,
    next_index_id: u64,
    stats: BackendStats,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            indices: HashMap::new(),
            next_buffer_id: 1,
            next_index_id: 1,
            stats: BackendStats::default(),
        }
    }

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    pub fn allocate_buffer(&mut self, len: usize) -> Result<BufferHandle> {
        let handle = BufferHandle::new(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.buffers.insert(handle.id(), vec![0.0; len]);
        self.stats.allocations += 1;
        self.stats.live_buffers = self.buffers.len();
        Ok(handle)
    }

    pub fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.buffers
            .remove(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;
        self.stats.frees += 1;
        self.stats.live_buffers = self.buffers.len();
        Ok(())
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&[f64]> {
        self.buffers
            .get(&handle.id())
            .map(Vec::as_slice)
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut [f64]> {
        self.buffers
            .get_mut(&handle.id())
            .map(Vec::as_mut_slice)
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    pub fn buffer_len(&self, handle: BufferHandle) -> Result<usize> {
        self.buffer(handle).map(<[f64]>::len)
    }

    pub fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[f64]) -> Result<()> {
        let buffer = self.buffer_mut(handle)?;
        if buffer.len() != data.len() {
            return Err(BackendError::length_mismatch(buffer.len(), data.len()));
        }
        buffer.copy_from_slice(data);
        Ok(())
    }

    pub fn copy_from_buffer(&self, handle: BufferHandle, data: &mut [f64]) -> Result<()> {
        let buffer = self.buffer(handle)?;
        if buffer.len() != data.len() {
            return Err(BackendError::length_mismatch(buffer.len(), data.len()));
        }
        data.copy_from_slice(buffer);
        Ok(())
    }

    // ============================================================================================
    // Index Maps
    // ============================================================================================

    pub fn upload_indices(&mut self, indices: &[u32]) -> Result<IndexHandle> {
        let handle = IndexHandle::new(self.next_index_id);
        self.next_index_id += 1;
        self.indices.insert(
            handle.id(),
            IndexMap {
                indices: indices.to_vec(),
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

    fn index_map(indices: &HashMap<u64, IndexMap>, handle: IndexHandle) -> Result<&IndexMap> {
        indices
            .get(&handle.id())
            .ok_or(BackendError::InvalidIndexHandle(handle.id()))
    }

    // ============================================================================================
    // Kernels
    // ============================================================================================

    /// Run `f` with `dst` taken out of the buffer map; `dst` is always put back.
    fn with_output<R>(
        &mut self,
        dst: BufferHandle,
        f: impl FnOnce(&HashMap<u64, Vec<f64>>, &HashMap<u64, IndexMap>, &mut [f64]) -> Result<R>,
    ) -> Result<R> {
        let mut out = self
            .buffers
            .remove(&dst.id())
            .ok_or(BackendError::InvalidBufferHandle(dst.id()))?;
        let result = f(&self.buffers, &self.indices, &mut out);
        self.buffers.insert(dst.id(), out);
        self.stats.record_launch();
        result
    }

    fn input<'a>(buffers: &'a HashMap<u64, Vec<f64>>, handle: BufferHandle) -> Result<&'a [f64]> {
        buffers
            .get(&handle.id())
            .map(Vec::as_slice)
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    pub fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle) -> Result<()> {
        if src == dst {
            self.buffer(src)?;
            self.stats.record_launch();
            return Ok(());
        }
        self.with_output(dst, |buffers, _, out| {
            let input = Self::input(buffers, src)?;
            if input.len() != out.len() {
                return Err(BackendError::length_mismatch(out.len(), input.len()));
            }
            kernels::copy(input, out);
            Ok(())
        })
    }

    pub fn fill_buffer(&mut self, dst: BufferHandle, value: f64) -> Result<()> {
        kernels::fill(self.buffer_mut(dst)?, value);
        self.stats.record_launch();
        Ok(())
    }

    pub fn gather(&mut self, src: BufferHandle, map: IndexHandle, dst: BufferHandle) -> Result<()> {
        if src == dst {
            return Err(BackendError::Aliased(src.id()));
        }
        self.with_output(dst, |buffers, indices, out| {
            let input = Self::input(buffers, src)?;
            let map = Self::index_map(indices, map)?;
            if map.indices.len() != out.len() {
                return Err(BackendError::length_mismatch(out.len(), map.indices.len()));
            }
            map.check_target(input.len())?;
            kernels::gather(input, &map.indices, out);
            Ok(())
        })
    }

    pub fn scatter_add(&mut self, src: BufferHandle, map: IndexHandle, dst: BufferHandle) -> Result<()> {
        if src == dst {
            return Err(BackendError::Aliased(src.id()));
        }
        self.with_output(dst, |buffers, indices, out| {
            let input = Self::input(buffers, src)?;
            let map = Self::index_map(indices, map)?;
            if map.indices.len() != input.len() {
                return Err(BackendError::length_mismatch(input.len(), map.indices.len()));
            }
            map.check_target(out.len())?;
            kernels::scatter_add(input, &map.indices, out);
            Ok(())
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
        self.with_output(y, |buffers, _, out| {
            let a = Self::input(buffers, matrix)?;
            if a.len() != rows * cols {
                return Err(BackendError::MatrixShape { rows, cols, len: a.len() });
            }
            let input = Self::input(buffers, x)?;
            let (in_len, out_len) = if transpose { (rows, cols) } else { (cols, rows) };
            if input.len() != in_len {
                return Err(BackendError::length_mismatch(in_len, input.len()));
            }
            if out.len() != out_len {
                return Err(BackendError::length_mismatch(out_len, out.len()));
            }
            if transpose {
                kernels::gemv_transpose(a, rows, cols, input, out);
            } else {
                kernels::gemv(a, rows, cols, input, out);
            }
            Ok(())
        })
    }

    // ============================================================================================
    // Bookkeeping
    // ============================================================================================

    pub fn record_launch(&mut self) {
        self.stats.record_launch();
    }

    pub fn record_sync(&mut self) {
        self.stats.record_sync();
    }

    pub fn stats(&self) -> BackendStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_kernel_puts_output_back() {
        let mut memory = MemoryManager::new();
        let src = memory.allocate_buffer(3).unwrap();
        let dst = memory.allocate_buffer(4).unwrap();

        let err = memory.copy_buffer(src, dst).unwrap_err();
        assert!(matches!(err, BackendError::LengthMismatch { expected: 4, actual: 3 }));
        assert_eq!(memory.buffer_len(dst).unwrap(), 4);
    }

    #[test]
    fn gather_rejects_out_of_range_map() {
        let mut memory = MemoryManager::new();
        let src = memory.allocate_buffer(2).unwrap();
        let dst = memory.allocate_buffer(2).unwrap();
        let map = memory.upload_indices(&[0, 2]).unwrap();

        let err = memory.gather(src, map, dst).unwrap_err();
        assert!(matches!(err, BackendError::IndexOutOfBounds { index: 2, len: 2 }));
    }

    #[test]
    fn aliased_gemv_is_rejected() {
        let mut memory = MemoryManager::new();
        let a = memory.allocate_buffer(4).unwrap();
        let x = memory.allocate_buffer(2).unwrap();
        assert!(matches!(
            memory.gemv(a, 2, 2, false, x, x),
            Err(BackendError::Aliased(_))
        ));
    }

    #[test]
    fn allocation_counters() {
        let mut memory = MemoryManager::new();
        let a = memory.allocate_buffer(8).unwrap();
        let map = memory.upload_indices(&[0]).unwrap();
        assert_eq!(memory.stats().allocations, 2);
        assert_eq!(memory.stats().live_buffers, 1);

        memory.free_buffer(a).unwrap();
        memory.free_indices(map).unwrap();
        assert_eq!(memory.stats().frees, 2);
        assert_eq!(memory.stats().live_buffers, 0);
        assert!(matches!(memory.free_buffer(a), Err(BackendError::InvalidBufferHandle(_))));
    }
}
