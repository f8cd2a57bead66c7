//! Types for backend configuration and handles

use std::fmt;

/// Handle to an allocated `f64` buffer
///
/// Buffers are opaque handles managed by the backend.
/// Use Backend methods to interact with buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Create a new buffer handle
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Handle to an uploaded `u32` index map
///
/// Index maps are immutable once uploaded and drive gather/scatter kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexHandle(pub u64);

impl IndexHandle {
    /// Create a new index handle
    pub const fn new(id: u64) -> Self {
        IndexHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idx{}", self.0)
    }
}

/// Grid dimensions for kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDim {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn linear(size: u32) -> Self {
        Self::new(size, 1, 1)
    }

    pub const fn total_blocks(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for GridDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for GridDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Block dimensions for kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BlockDim {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn linear(size: u32) -> Self {
        Self::new(size, 1, 1)
    }

    pub const fn total_lanes(&self) -> u32 {
        self.x * self.y * self.z
    }
}

impl Default for BlockDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for BlockDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Launch configuration for explicitly launched kernels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: GridDim,
    pub block: BlockDim,
}

impl LaunchConfig {
    pub const fn new(grid: GridDim, block: BlockDim) -> Self {
        Self { grid, block }
    }

    /// 1D launch of `blocks` blocks with `threads` lanes each.
    pub const fn blocks(blocks: u32, threads: u32) -> Self {
        Self::new(GridDim::linear(blocks), BlockDim::linear(threads))
    }

    /// 1D launch covering `total_elements` with `block_size` lanes per block.
    pub const fn linear(total_elements: u32, block_size: u32) -> Self {
        let num_blocks = total_elements.div_ceil(block_size);
        Self::blocks(num_blocks, block_size)
    }

    pub const fn total_lanes(&self) -> u64 {
        self.grid.total_blocks() * self.block.total_lanes() as u64
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid={}, block={}", self.grid, self.block)
    }
}

/// Counters a backend keeps about its own activity.
///
/// `launches` counts every kernel issued (including copies and fills);
/// `pending_launches` is the subset issued since the last synchronize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub allocations: u64,
    pub frees: u64,
    pub live_buffers: usize,
    pub launches: u64,
    pub pending_launches: u64,
    pub synchronizations: u64,
}

impl BackendStats {
    /// Record one issued kernel.
    pub fn record_launch(&mut self) {
        self.launches += 1;
        self.pending_launches += 1;
    }

    /// Record a completed synchronize.
    pub fn record_sync(&mut self) {
        self.synchronizations += 1;
        self.pending_launches = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_launch_rounds_up() {
        let config = LaunchConfig::linear(1000, 256);
        assert_eq!(config.grid.x, 4);
        assert_eq!(config.total_lanes(), 1024);
    }

    #[test]
    fn prime_launch_shape() {
        let config = LaunchConfig::blocks(128, 1);
        assert_eq!(config.total_lanes(), 128);
        assert_eq!(config.to_string(), "grid=(128, 1, 1), block=(1, 1, 1)");
        assert_eq!(config, LaunchConfig::new(GridDim::new(128, 1, 1), BlockDim::new(1, 1, 1)));
    }

    #[test]
    fn multi_dimensional_launch_counts_every_lane() {
        let config = LaunchConfig::new(GridDim::new(4, 2, 3), BlockDim::new(8, 4, 1));
        assert_eq!(config.grid.total_blocks(), 24);
        assert_eq!(config.block.total_lanes(), 32);
        assert_eq!(config.total_lanes(), 768);
    }

    #[test]
    fn stats_track_pending_work() {
        let mut stats = BackendStats::default();
        stats.record_launch();
        stats.record_launch();
        assert_eq!(stats.pending_launches, 2);
        stats.record_sync();
        assert_eq!(stats.pending_launches, 0);
        assert_eq!(stats.launches, 2);
        assert_eq!(stats.synchronizations, 1);
    }

    #[test]
    fn handles_display() {
        assert_eq!(BufferHandle::new(3).to_string(), "buf3");
        assert_eq!(IndexHandle::new(7).to_string(), "idx7");
    }
}
