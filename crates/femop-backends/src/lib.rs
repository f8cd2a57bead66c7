//! Device backends for femop vectors and operators
//!
//! This crate provides:
//! - **Backend Trait**: device memory plus the kernels femop's operators need
//! - **CPU Backend**: host reference implementation (rayon for large kernels)
//! - **CUDA Backend**: NVRTC-compiled kernels via cudarc (`cuda` feature)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              femop-core (Vector, Operator)               │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │  Backend trait
//!             ┌─────────┴─────────┐
//!             ▼                   ▼
//!       ┌─────────┐         ┌─────────┐
//!       │   CPU   │         │  CUDA   │
//!       │ Backend │         │ Backend │
//!       └─────────┘         └─────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use femop_backends::{Backend, CpuBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = CpuBackend::new();
//!
//! // Three true dofs shared by four element-local dofs
//! let global = backend.allocate_buffer(3)?;
//! let local = backend.allocate_buffer(4)?;
//! let map = backend.upload_indices(&[0, 1, 1, 2])?;
//!
//! backend.copy_to_buffer(global, &[1.0, 2.0, 3.0])?;
//! backend.gather(global, map, local)?;
//! backend.scatter_add(local, map, global)?;
//! backend.synchronize()?;
//!
//! let mut out = [0.0; 3];
//! backend.copy_from_buffer(global, &mut out)?;
//! assert_eq!(out, [1.0, 4.0, 3.0]);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod error;

// Re-export public API
pub use backend::{Backend, BackendStats, BlockDim, BufferHandle, GridDim, IndexHandle, LaunchConfig};
pub use backends::{CpuBackend, CudaBackend};
pub use error::{BackendError, Result};
