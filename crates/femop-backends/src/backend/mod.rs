//! Backend trait and types for device execution

mod traits;
mod types;

pub use traits::Backend;
pub use types::{BackendStats, BlockDim, BufferHandle, GridDim, IndexHandle, LaunchConfig};
