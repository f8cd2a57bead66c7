//! CUDA C sources for the femop kernels, compiled at runtime with NVRTC.

use crate::error::{BackendError, Result};
use cudarc::driver::{CudaDevice, CudaFunction};
use cudarc::nvrtc::{compile_ptx_with_opts, CompileOptions};
use std::sync::Arc;

const MODULE_NAME: &str = "femop_kernels";

/// Lanes per block for element-wise kernels
pub(crate) const BLOCK_SIZE: u32 = 256;

const KERNEL_NAMES: [&str; 6] = [
    "femop_fill",
    "femop_gather",
    "femop_scatter_add",
    "femop_gemv",
    "femop_gemv_t",
    "femop_noop",
];

// atomicAdd on double needs sm_60.
const KERNEL_SOURCE: &str = r#"
extern "C" __global__ void femop_fill(double* dst, double value, unsigned int n) {
    unsigned int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) dst[i] = value;
}

extern "C" __global__ void femop_gather(const double* src, const unsigned int* map, double* dst, unsigned int n) {
    unsigned int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) dst[i] = src[map[i]];
}

extern "C" __global__ void femop_scatter_add(const double* src, const unsigned int* map, double* dst, unsigned int n) {
    unsigned int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) atomicAdd(&dst[map[i]], src[i]);
}

extern "C" __global__ void femop_gemv(const double* a, const double* x, double* y, unsigned int rows, unsigned int cols) {
    unsigned int r = blockIdx.x * blockDim.x + threadIdx.x;
    if (r >= rows) return;
    double sum = 0.0;
    for (unsigned int c = 0; c < cols; ++c) sum += a[r * cols + c] * x[c];
    y[r] = sum;
}

extern "C" __global__ void femop_gemv_t(const double* a, const double* x, double* y, unsigned int rows, unsigned int cols) {
    unsigned int c = blockIdx.x * blockDim.x + threadIdx.x;
    if (c >= cols) return;
    double sum = 0.0;
    for (unsigned int r = 0; r < rows; ++r) sum += a[r * cols + c] * x[r];
    y[c] = sum;
}

extern "C" __global__ void femop_noop(unsigned int unused) {}
"#;

/// Loaded kernel functions
#[derive(Clone)]
pub(crate) struct CudaKernels {
    pub fill: CudaFunction,
    pub gather: CudaFunction,
    pub scatter_add: CudaFunction,
    pub gemv: CudaFunction,
    pub gemv_t: CudaFunction,
    pub noop: CudaFunction,
}

impl CudaKernels {
    /// Compile the kernel module and load it into `device`.
    pub fn load(device: &Arc<CudaDevice>) -> Result<Self> {
        let options = CompileOptions {
            arch: Some("sm_60"),
            ..Default::default()
        };
        let ptx = compile_ptx_with_opts(KERNEL_SOURCE, options).map_err(BackendError::launch_failed)?;
        device
            .load_ptx(ptx, MODULE_NAME, &KERNEL_NAMES)
            .map_err(BackendError::launch_failed)?;

        let func = |name: &str| {
            device
                .get_func(MODULE_NAME, name)
                .ok_or_else(|| BackendError::LaunchFailed(format!("kernel {name} missing from {MODULE_NAME}")))
        };

        Ok(Self {
            fill: func("femop_fill")?,
            gather: func("femop_gather")?,
            scatter_add: func("femop_scatter_add")?,
            gemv: func("femop_gemv")?,
            gemv_t: func("femop_gemv_t")?,
            noop: func("femop_noop")?,
        })
    }
}
