//! # femop-core - Composable Device-Resident Linear Operators
//!
//! Device vectors, linear operators over them, and a driver that times the
//! composite `Pᵀ I P` apply on one or more ranks.
//!
//! ## Architecture
//!
//! - **Executor**: owns the device backend (CPU, or CUDA with the `cuda` feature)
//! - **Vector**: fixed-length `f64` buffer living on the executor's device
//! - **Operator**: height × width linear map with `apply` and `apply_transpose`
//! - **Communicator**: barrier and sum-reduction across cooperating ranks
//! - **BenchmarkDriver**: Setup → WarmUp → Synchronize → ProfiledRun → Report
//!
//! Every operator application is bracketed in a profiling region (see
//! `femop-tracing`), so an attached profiler sees the nesting
//! `apply ⊃ RAP ⊃ {P, Id, P^T}` for each timed step.
//!
//! ## Example
//!
//! ```
//! use femop_core::{Executor, IdentityOperator, Operator, RapOperator};
//!
//! let exec = Executor::new()?;
//! let id = IdentityOperator::new(4);
//! let rap = RapOperator::new(&exec, &id, &id, &id)?;
//!
//! let x = exec.vector_from_slice(&[1.0, 2.0, 3.0, 4.0])?;
//! let mut y = exec.allocate(4)?;
//! rap.apply(&x, &mut y)?;
//! assert_eq!(y.to_vec()?, vec![1.0, 2.0, 3.0, 4.0]);
//! # Ok::<(), femop_core::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`operator`] - the `Operator` trait and its implementations
//! - [`space`] - distributed space metadata and the structured grid space
//! - [`comm`] - serial and thread-group communicators
//! - [`bench`] - benchmark configuration, driver and report

pub mod bench;
pub mod comm;
pub mod error;
pub mod executor;
pub mod operator;
pub mod space;
pub mod vector;

pub use bench::{BenchConfig, BenchPhase, BenchReport, BenchmarkDriver, DEFAULT_ITERATIONS};
pub use comm::{Communicator, SerialCommunicator, ThreadCommunicator, ROOT_RANK};
pub use error::{Error, Result};
pub use executor::{BackendType, Executor};
pub use operator::{DenseOperator, IdentityOperator, Operator, ProlongationOperator, RapOperator};
pub use space::{DistributedSpace, StructuredSpace};
pub use vector::Vector;
