//! Timed RAP apply benchmark
//!
//! [`BenchmarkDriver`] measures the steady-state cost of one forward plus one
//! transpose application of `Pᵀ I P` on every rank of a communicator group.
//! It moves through the phases of [`BenchPhase`] exactly once:
//!
//! ```text
//! Setup ─▶ WarmUp ─▶ Synchronize ─▶ ProfiledRun ─▶ Report ─▶ Done
//! ```
//!
//! The timed interval starts after the second barrier + device sync of the
//! Synchronize phase and ends after the device sync that follows the loop,
//! so it covers all device work the loop issued on every rank.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::executor::{BackendType, Executor};
use crate::operator::{IdentityOperator, Operator, RapOperator};
use crate::space::{DistributedSpace, StructuredSpace};
use femop_backends::LaunchConfig;
use femop_tracing::{region, Profiler};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Iteration count used when none (or a non-positive one) is requested
pub const DEFAULT_ITERATIONS: usize = 100;

/// Launch shape of the no-op kernel that primes the device and profiler
pub const PRIME_LAUNCH: LaunchConfig = LaunchConfig::blocks(128, 1);

/// Map a requested iteration count to the one actually run.
pub fn iterations_from_request(requested: i64) -> usize {
    if requested > 0 {
        requested as usize
    } else {
        DEFAULT_ITERATIONS
    }
}

// ================================================================================================
// Configuration
// ================================================================================================

/// Benchmark parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Timed forward + transpose steps
    pub iterations: usize,
    /// Polynomial order of the space
    pub order: usize,
    /// Spatial dimension (1, 2 or 3)
    pub dimension: usize,
    /// Elements along each axis of every rank's grid
    pub elements_per_axis: usize,
    pub backend: BackendType,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            order: 2,
            dimension: 3,
            elements_per_axis: 4,
            backend: BackendType::Cpu,
        }
    }
}

impl BenchConfig {
    /// Set the iteration count; values `<= 0` select [`DEFAULT_ITERATIONS`].
    pub fn with_iterations(mut self, requested: i64) -> Self {
        self.iterations = iterations_from_request(requested);
        self
    }

    /// Build a configuration from defaults overridden by the environment.
    ///
    /// # Environment Variables
    ///
    /// - `FEMOP_BENCH_ITERATIONS` - Timed steps (`<= 0` means the default)
    /// - `FEMOP_BENCH_ORDER` - Polynomial order
    /// - `FEMOP_BENCH_DIM` - Spatial dimension
    /// - `FEMOP_BENCH_ELEMENTS` - Elements per axis
    /// - `FEMOP_BENCH_BACKEND` - `cpu` or `cuda`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(iterations) = env_value::<i64>("FEMOP_BENCH_ITERATIONS")? {
            config.iterations = iterations_from_request(iterations);
        }
        if let Some(order) = env_value("FEMOP_BENCH_ORDER")? {
            config.order = order;
        }
        if let Some(dimension) = env_value("FEMOP_BENCH_DIM")? {
            config.dimension = dimension;
        }
        if let Some(elements) = env_value("FEMOP_BENCH_ELEMENTS")? {
            config.elements_per_axis = elements;
        }
        if let Some(backend) = env_value("FEMOP_BENCH_BACKEND")? {
            config.backend = backend;
        }

        Ok(config)
    }

    /// Reject configurations the driver cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("iterations must be >= 1".into()));
        }
        if self.order == 0 {
            return Err(Error::InvalidConfig("order must be >= 1".into()));
        }
        if !(1..=3).contains(&self.dimension) {
            return Err(Error::InvalidConfig(format!(
                "dimension must be 1, 2 or 3, got {}",
                self.dimension
            )));
        }
        if self.elements_per_axis == 0 {
            return Err(Error::InvalidConfig("elements per axis must be >= 1".into()));
        }
        Ok(())
    }
}

fn env_value<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| Error::InvalidConfig(format!("{key}={raw}: {err}"))),
        _ => Ok(None),
    }
}

// ================================================================================================
// Phases
// ================================================================================================

/// Benchmark phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BenchPhase {
    Setup,
    WarmUp,
    Synchronize,
    ProfiledRun,
    Report,
    Done,
}

impl BenchPhase {
    /// The phase that follows this one
    pub fn next(self) -> Option<BenchPhase> {
        match self {
            Self::Setup => Some(Self::WarmUp),
            Self::WarmUp => Some(Self::Synchronize),
            Self::Synchronize => Some(Self::ProfiledRun),
            Self::ProfiledRun => Some(Self::Report),
            Self::Report => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl fmt::Display for BenchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ================================================================================================
// Report
// ================================================================================================

/// Result of one benchmark run on one rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchReport {
    pub rank: usize,
    pub ranks: usize,
    pub backend: BackendType,
    pub iterations: usize,
    /// Wall-clock time of the timed loop in milliseconds
    pub total_ms: f64,
    pub ms_per_step: f64,
    pub global_dofs: u64,
    pub local_dofs: usize,
    pub true_local_dofs: usize,
}

impl BenchReport {
    /// The line root prints after the run
    pub fn summary_line(&self) -> String {
        format!("[femop] Elapsed time = {:.6} ms/step", self.ms_per_step)
    }

    /// Pretty-printed JSON form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Emit the report as a structured event
    pub fn log(&self) {
        tracing::info!(
            rank = self.rank,
            backend = %self.backend,
            iterations = self.iterations,
            total_ms = self.total_ms,
            ms_per_step = self.ms_per_step,
            global_dofs = self.global_dofs,
            local_dofs = self.local_dofs,
            "bench_complete"
        );
    }
}

// ================================================================================================
// Driver
// ================================================================================================

/// Stops profiler capture on every exit path of the timed section.
struct CaptureGuard<'p>(Option<&'p dyn Profiler>);

impl<'p> CaptureGuard<'p> {
    fn start(profiler: Option<&'p dyn Profiler>) -> Self {
        if let Some(profiler) = profiler {
            profiler.start_capture();
        }
        Self(profiler)
    }
}

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        if let Some(profiler) = self.0 {
            profiler.stop_capture();
        }
    }
}

/// Runs the RAP apply benchmark once on one rank
///
/// # Example
///
/// ```
/// use femop_core::{BenchConfig, BenchmarkDriver, Executor, SerialCommunicator};
///
/// let config = BenchConfig {
///     iterations: 3,
///     order: 1,
///     dimension: 1,
///     elements_per_axis: 4,
///     ..BenchConfig::default()
/// };
/// let report = BenchmarkDriver::new(config, Executor::new()?, &SerialCommunicator)?
///     .with_writer(std::io::sink())
///     .run()?;
/// assert_eq!(report.global_dofs, 5);
/// assert!(report.ms_per_step > 0.0);
/// # Ok::<(), femop_core::Error>(())
/// ```
pub struct BenchmarkDriver<'c> {
    config: BenchConfig,
    exec: Executor,
    comm: &'c dyn Communicator,
    profiler: Option<Arc<dyn Profiler>>,
    writer: Box<dyn Write + Send>,
    phase: BenchPhase,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl<'c> BenchmarkDriver<'c> {
    /// Create a driver in the [`BenchPhase::Setup`] phase
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(config: BenchConfig, exec: Executor, comm: &'c dyn Communicator) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            exec,
            comm,
            profiler: None,
            writer: Box::new(io::stdout()),
            phase: BenchPhase::Setup,
            started_at: None,
            finished_at: None,
        })
    }

    /// Start and stop `profiler` capture around the timed section
    pub fn with_profiler(mut self, profiler: Arc<dyn Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Where root writes its report lines (stdout by default)
    pub fn with_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writer = Box::new(writer);
        self
    }

    pub fn phase(&self) -> BenchPhase {
        self.phase
    }

    pub fn warmup_done(&self) -> bool {
        self.phase > BenchPhase::WarmUp
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Wall-clock duration of the timed loop, once it has finished
    pub fn elapsed(&self) -> Option<Duration> {
        Some(self.finished_at?.duration_since(self.started_at?))
    }

    /// Build a [`StructuredSpace`] from the configuration and run on it
    ///
    /// Collective over the driver's communicator.
    pub fn run(&mut self) -> Result<BenchReport> {
        self.expect_phase(BenchPhase::Setup)?;
        let space = StructuredSpace::new(
            &self.exec,
            self.comm,
            self.config.dimension,
            self.config.order,
            self.config.elements_per_axis,
        )?;
        self.run_with_space(&space)
    }

    /// Run every phase against `space`
    ///
    /// Collective over the driver's communicator.
    ///
    /// # Errors
    ///
    /// Fails if the driver already ran, if the operators do not compose,
    /// or on any device failure. Nothing is retried.
    #[tracing::instrument(skip_all, fields(rank = self.comm.rank(), ranks = self.comm.size()))]
    pub fn run_with_space(&mut self, space: &dyn DistributedSpace) -> Result<BenchReport> {
        self.expect_phase(BenchPhase::Setup)?;

        // Setup
        let global_dofs = space.global_true_size();
        let local_dofs = space.local_size();
        let true_local_dofs = space.true_local_size();
        if self.comm.is_root() {
            writeln!(self.writer, "Number of global dofs: {global_dofs}")?;
            writeln!(self.writer, "Number of local dofs: {local_dofs}")?;
        }

        let prolongation = space.prolongation();
        let identity = IdentityOperator::new(local_dofs);
        let rap = RapOperator::new(&self.exec, prolongation, &identity, prolongation)?;
        let x = self.exec.constant(true_local_dofs, 1.0)?;
        let mut y = self.exec.allocate(rap.height())?;
        self.sync_all()?;
        tracing::debug!(global_dofs, local_dofs, true_local_dofs, "bench_setup_complete");

        // WarmUp: materialise lazily created communication state
        self.advance(BenchPhase::WarmUp)?;
        rap.apply(&x, &mut y)?;
        rap.apply_transpose(&x, &mut y)?;

        // Synchronize
        self.advance(BenchPhase::Synchronize)?;
        self.sync_all()?;
        let profiler = self.profiler.clone();
        let capture = CaptureGuard::start(profiler.as_deref());
        {
            let _region = region!("prime", Green);
            self.exec.launch_noop(&PRIME_LAUNCH)?;
        }
        self.sync_all()?;
        let started_at = Instant::now();
        self.started_at = Some(started_at);

        // ProfiledRun
        self.advance(BenchPhase::ProfiledRun)?;
        let iterations = self.config.iterations;
        for _ in 0..iterations {
            self.exec.synchronize()?;
            {
                let _region = region!("apply", SkyBlue);
                rap.apply(&x, &mut y)?;
            }
            {
                let _region = region!("apply^T", SkyBlue);
                rap.apply_transpose(&x, &mut y)?;
            }
        }
        // In-flight device work must be inside the measurement.
        self.exec.synchronize()?;
        let finished_at = Instant::now();
        self.finished_at = Some(finished_at);
        // Ranks share one profiler; nobody stops capture while others still run.
        self.comm.barrier();
        drop(capture);

        // Report
        self.advance(BenchPhase::Report)?;
        let total_ms = finished_at.duration_since(started_at).as_secs_f64() * 1.0e3;
        let report = BenchReport {
            rank: self.comm.rank(),
            ranks: self.comm.size(),
            backend: self.exec.backend_type(),
            iterations,
            total_ms,
            ms_per_step: total_ms / iterations as f64,
            global_dofs,
            local_dofs,
            true_local_dofs,
        };
        if self.comm.is_root() {
            writeln!(self.writer, "{}", report.summary_line())?;
            self.writer.flush()?;
        }
        report.log();

        self.advance(BenchPhase::Done)?;
        Ok(report)
    }

    /// Barrier across ranks, then wait for this rank's device.
    fn sync_all(&self) -> Result<()> {
        self.comm.barrier();
        self.exec.synchronize()
    }

    fn expect_phase(&self, expected: BenchPhase) -> Result<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "benchmark driver is in phase {}, expected {expected}",
                self.phase
            )))
        }
    }

    fn advance(&mut self, to: BenchPhase) -> Result<()> {
        if self.phase.next() != Some(to) {
            return Err(Error::InvalidOperation(format!(
                "benchmark phase cannot move from {} to {to}",
                self.phase
            )));
        }
        tracing::trace!(from = %self.phase, to = %to, "bench_phase");
        self.phase = to;
        Ok(())
    }
}
