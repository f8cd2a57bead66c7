//! RAP apply benchmark CLI
//!
//! Times `Pᵀ I P` forward + transpose applications on one or more ranks.
//! Every rank is a thread of this process with its own executor.
//!
//! ## Usage
//!
//! ```bash
//! # 100 steps of a 3D quadratic space on the CPU
//! cargo run --release -p femop-bench -- --order 2 --dim 3
//!
//! # 4 ranks, region summary and reports as JSON
//! cargo run --release -p femop-bench -- --ranks 4 --trace-regions --json
//!
//! # CUDA backend
//! cargo run --release -p femop-bench --features cuda -- --backend cuda
//! ```
//!
//! Defaults come from `FEMOP_BENCH_*` environment variables; flags override
//! them. Logging follows `FEMOP_TRACING_*` and `RUST_LOG`.

use std::io;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use femop_core::{BackendType, BenchConfig, BenchReport, BenchmarkDriver, Communicator, Executor, ThreadCommunicator};
use femop_tracing::{init_global_tracing, init_with_profiler, Profiler, RegionRecorder, TracingConfig};
use tracing::info;

/// femop RAP apply benchmark
#[derive(Parser, Debug)]
#[command(name = "femop-bench")]
#[command(about = "Time forward and transpose applications of a composite RAP operator")]
struct Args {
    /// Timed steps; zero or negative selects the default of 100
    #[arg(short = 'i', long, allow_negative_numbers = true)]
    iterations: Option<i64>,

    /// Polynomial order of the space
    #[arg(short = 'o', long)]
    order: Option<usize>,

    /// Spatial dimension (1, 2 or 3)
    #[arg(short = 'd', long)]
    dim: Option<usize>,

    /// Elements along each axis of every rank's grid
    #[arg(short = 'e', long)]
    elements: Option<usize>,

    /// Number of ranks
    #[arg(short = 'n', long, default_value = "1")]
    ranks: usize,

    /// Device backend: cpu or cuda
    #[arg(short = 'b', long)]
    backend: Option<BackendType>,

    /// Print reports (and the region summary) as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Record profiling regions during the timed section
    #[arg(long)]
    trace_regions: bool,
}

impl Args {
    fn bench_config(&self) -> Result<BenchConfig> {
        let mut config = BenchConfig::from_env().context("invalid FEMOP_BENCH_* environment")?;
        if let Some(iterations) = self.iterations {
            config = config.with_iterations(iterations);
        }
        if let Some(order) = self.order {
            config.order = order;
        }
        if let Some(dim) = self.dim {
            config.dimension = dim;
        }
        if let Some(elements) = self.elements {
            config.elements_per_axis = elements;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        config.validate().context("invalid benchmark configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let tracing_config = TracingConfig::from_env();

    let recorder = Arc::new(RegionRecorder::new());
    if args.trace_regions {
        init_with_profiler(&tracing_config, Arc::clone(&recorder))
    } else {
        init_global_tracing(&tracing_config)
    }
    .context("failed to initialise tracing")?;

    let config = args.bench_config()?;
    info!(?config, ranks = args.ranks, "femop_bench_start");

    let profiler = args.trace_regions.then(|| Arc::clone(&recorder) as Arc<dyn Profiler>);
    let reports = run_ranks(&config, args.ranks, profiler, !args.json)?;

    if args.json {
        let mut document = serde_json::json!({ "reports": reports });
        if args.trace_regions {
            document["regions"] = recorder.summary().to_json();
        }
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else if args.trace_regions {
        let summary = recorder.summary();
        for (label, stats) in &summary.regions {
            println!("{label:>10}  count = {:>8}  mean = {:.6} ms", stats.count, stats.mean_ms());
        }
        if !summary.is_balanced() {
            tracing::warn!(violations = summary.violations, open = summary.open, "unbalanced profiling regions");
        }
    }

    Ok(())
}

/// Run one driver per rank and collect the reports in rank order.
fn run_ranks(
    config: &BenchConfig,
    ranks: usize,
    profiler: Option<Arc<dyn Profiler>>,
    print_text: bool,
) -> Result<Vec<BenchReport>> {
    let group = ThreadCommunicator::group(ranks);

    thread::scope(|scope| {
        let handles: Vec<_> = group
            .into_iter()
            .map(|comm| {
                let profiler = profiler.clone();
                let rank = comm.rank();
                let handle = scope.spawn(move || run_rank(config, &comm, profiler, print_text));
                (rank, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .map_err(|_| anyhow!("rank {rank} panicked"))?
                    .with_context(|| format!("rank {rank} failed"))
            })
            .collect()
    })
}

fn run_rank(
    config: &BenchConfig,
    comm: &ThreadCommunicator,
    profiler: Option<Arc<dyn Profiler>>,
    print_text: bool,
) -> femop_core::Result<BenchReport> {
    let exec = Executor::new_with_backend(config.backend)?;
    let mut driver = BenchmarkDriver::new(config.clone(), exec, comm)?;
    if let Some(profiler) = profiler {
        driver = driver.with_profiler(profiler);
    }
    if !print_text {
        driver = driver.with_writer(io::sink());
    }
    driver.run()
}
