//! Integration tests for the RAP apply benchmark driver

use femop_core::{
    BackendType, BenchConfig, BenchPhase, BenchmarkDriver, Communicator, Error, Executor, Result,
    SerialCommunicator, ThreadCommunicator, DEFAULT_ITERATIONS,
};
use femop_tracing::{Profiler, RegionLayer, RegionRecorder};
use parking_lot::Mutex;
use serial_test::serial;
use std::env;
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

const ENV_KEYS: &[&str] = &[
    "FEMOP_BENCH_ITERATIONS",
    "FEMOP_BENCH_ORDER",
    "FEMOP_BENCH_DIM",
    "FEMOP_BENCH_ELEMENTS",
    "FEMOP_BENCH_BACKEND",
];

fn reset_env() {
    for key in ENV_KEYS {
        env::remove_var(key);
    }
}

/// Writer whose contents stay readable after the driver takes it.
#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn small_config(iterations: usize) -> BenchConfig {
    BenchConfig {
        iterations,
        order: 2,
        dimension: 2,
        elements_per_axis: 3,
        backend: BackendType::Cpu,
    }
}

#[test]
fn hundred_iterations_on_one_rank() -> Result<()> {
    let output = SharedOutput::default();
    let mut driver =
        BenchmarkDriver::new(small_config(100), Executor::new()?, &SerialCommunicator)?.with_writer(output.clone());
    let report = driver.run()?;

    assert_eq!(report.iterations, 100);
    assert!(report.ms_per_step.is_finite() && report.ms_per_step > 0.0);
    assert!((report.ms_per_step * 100.0 - report.total_ms).abs() <= 1e-9 * report.total_ms.max(1.0));
    assert_eq!(report.global_dofs, 49);
    assert_eq!(report.local_dofs, 81);
    assert_eq!(report.true_local_dofs, 49);

    let lines = output.lines();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "Number of global dofs: 49");
    assert_eq!(lines[1], "Number of local dofs: 81");
    assert_eq!(lines[2], report.summary_line());
    assert!(lines[2].starts_with("[femop] Elapsed time = "));
    assert!(lines[2].ends_with(" ms/step"));
    Ok(())
}

#[test]
fn single_iteration_reports_whole_loop() -> Result<()> {
    let mut driver =
        BenchmarkDriver::new(small_config(1), Executor::new()?, &SerialCommunicator)?.with_writer(io::sink());
    let report = driver.run()?;

    assert_eq!(report.iterations, 1);
    assert!(report.ms_per_step > 0.0);
    assert_eq!(report.ms_per_step, report.total_ms);
    Ok(())
}

#[test]
fn non_positive_iterations_use_default() {
    let config = small_config(1).with_iterations(0);
    assert_eq!(config.iterations, DEFAULT_ITERATIONS);
    let config = small_config(1).with_iterations(-3);
    assert_eq!(config.iterations, DEFAULT_ITERATIONS);
}

#[test]
fn driver_rejects_invalid_config() {
    let exec = Executor::new().unwrap();
    let config = BenchConfig {
        order: 0,
        ..small_config(1)
    };
    assert!(matches!(
        BenchmarkDriver::new(config, exec, &SerialCommunicator),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn driver_runs_only_once() -> Result<()> {
    let mut driver =
        BenchmarkDriver::new(small_config(2), Executor::new()?, &SerialCommunicator)?.with_writer(io::sink());
    assert_eq!(driver.phase(), BenchPhase::Setup);
    driver.run()?;
    assert_eq!(driver.phase(), BenchPhase::Done);
    assert!(matches!(driver.run(), Err(Error::InvalidOperation(_))));
    Ok(())
}

#[test]
fn only_root_prints_on_multiple_ranks() {
    let output = SharedOutput::default();
    let handles: Vec<_> = ThreadCommunicator::group(3)
        .into_iter()
        .map(|comm| {
            let output = output.clone();
            thread::spawn(move || -> Result<_> {
                let exec = Executor::new()?;
                let mut driver = BenchmarkDriver::new(small_config(5), exec, &comm)?.with_writer(output);
                let report = driver.run()?;
                Ok((comm.rank(), report))
            })
        })
        .collect();

    let mut reports: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect();
    reports.sort_by_key(|(rank, _)| *rank);

    for (rank, report) in &reports {
        assert_eq!(report.rank, *rank);
        assert_eq!(report.ranks, 3);
        assert_eq!(report.global_dofs, 3 * 49);
        assert_eq!(report.local_dofs, 81);
        assert!(report.ms_per_step > 0.0);
    }

    let lines = output.lines();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "Number of global dofs: 147");
    assert_eq!(lines[2], reports[0].1.summary_line());
}

#[test]
fn profiler_sees_only_the_timed_section() -> Result<()> {
    let recorder = Arc::new(RegionRecorder::new());
    let subscriber = Registry::default().with(RegionLayer::new(Arc::clone(&recorder)));
    let profiler: Arc<dyn Profiler> = recorder.clone();

    let config = BenchConfig {
        iterations: 5,
        order: 1,
        dimension: 3,
        elements_per_axis: 2,
        backend: BackendType::Cpu,
    };
    let mut driver = BenchmarkDriver::new(config, Executor::new()?, &SerialCommunicator)?
        .with_profiler(profiler)
        .with_writer(io::sink());
    tracing::subscriber::with_default(subscriber, || driver.run())?;

    assert!(!recorder.is_capturing());
    let summary = recorder.summary();
    assert!(summary.is_balanced());
    assert_eq!(summary.max_depth, 3);

    let count = |label: &str| summary.regions.get(label).map_or(0, |stats| stats.count);
    assert_eq!(count("prime"), 1);
    assert_eq!(count("apply"), 5);
    assert_eq!(count("apply^T"), 5);
    assert_eq!(count("RAP"), 5);
    assert_eq!(count("RAP^T"), 5);
    // P is applied once by each direction of RAP
    assert_eq!(count("P"), 10);
    assert_eq!(count("P^T"), 10);
    assert_eq!(count("Id"), 5);
    assert_eq!(count("Id^T"), 5);
    Ok(())
}

#[test]
fn report_serializes_to_json() -> Result<()> {
    let mut driver =
        BenchmarkDriver::new(small_config(3), Executor::new()?, &SerialCommunicator)?.with_writer(io::sink());
    let report = driver.run()?;
    let value: serde_json::Value = serde_json::from_str(&report.to_json()?)?;
    assert_eq!(value["iterations"], 3);
    assert_eq!(value["backend"], "cpu");
    assert_eq!(value["rank"], 0);
    Ok(())
}

#[test]
#[serial]
fn config_from_env_overrides_defaults() -> Result<()> {
    reset_env();
    env::set_var("FEMOP_BENCH_ITERATIONS", "25");
    env::set_var("FEMOP_BENCH_ORDER", "3");
    env::set_var("FEMOP_BENCH_DIM", "2");
    env::set_var("FEMOP_BENCH_BACKEND", "cpu");

    let config = BenchConfig::from_env()?;
    reset_env();

    assert_eq!(config.iterations, 25);
    assert_eq!(config.order, 3);
    assert_eq!(config.dimension, 2);
    assert_eq!(config.elements_per_axis, BenchConfig::default().elements_per_axis);
    assert_eq!(config.backend, BackendType::Cpu);
    Ok(())
}

#[test]
#[serial]
fn config_from_env_maps_non_positive_iterations() -> Result<()> {
    reset_env();
    env::set_var("FEMOP_BENCH_ITERATIONS", "-1");
    let config = BenchConfig::from_env()?;
    reset_env();

    assert_eq!(config.iterations, DEFAULT_ITERATIONS);
    Ok(())
}

#[test]
#[serial]
fn config_from_env_rejects_garbage() {
    reset_env();
    env::set_var("FEMOP_BENCH_ORDER", "two");
    let result = BenchConfig::from_env();
    reset_env();

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
