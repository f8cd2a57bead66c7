//! Backend implementations for different execution targets
//!
//! This module contains:
//! - `cpu` - CPU backend (reference implementation)
//! - `cuda` - CUDA GPU backend (NVIDIA GPUs, behind the `cuda` feature)

pub mod cpu;
pub mod cuda;

// Re-export backends
pub use cpu::CpuBackend;
pub use cuda::CudaBackend;
