//! Timed benchmark driver.
//!
//! [`BenchmarkRunner`] walks through
//! `Unconfigured → Initialized → Running → Completed`, or ends in `Failed`
//! as soon as any step reports an error. A failed run keeps no results.
//!
//! # Example
//!
//! ```rust
//! use gpustream_core::prelude::*;
//!
//! let config = BenchmarkConfig::builder()
//!     .array_size(4096)
//!     .iterations(5)
//!     .build()
//!     .unwrap();
//! let platform = HostPlatform::with_thread_counts(&[2]);
//!
//! let mut runner = BenchmarkRunner::<f64, _>::new(config).unwrap();
//! runner.initialize(&platform).unwrap();
//! let results = runner.run().unwrap();
//! assert_eq!(results.len(), 5);
//! runner.finish().unwrap();
//! ```

use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::BenchmarkConfig;
use crate::device::{BufferRole, DeviceBackend, DeviceContext, DeviceDescriptor, Platform};
use crate::error::{ConfigurationError, Result, StreamError};
use crate::kernels::KernelSet;
use crate::stats::KernelResult;
use crate::types::{ScalarType, StreamScalar};
use crate::verify::{check_solution, SolutionCheck};

/// Lifecycle of a [`BenchmarkRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerState {
    /// Configured, no device bound yet
    Unconfigured,
    /// Buffers allocated and filled with the start values
    Initialized,
    /// Timed loop in progress
    Running,
    /// Timed loop finished, statistics available
    Completed,
    /// A step failed; the run is over
    Failed,
}

impl RunnerState {
    /// Lowercase state name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Drives the timed kernel loop for one precision and one device type.
pub struct BenchmarkRunner<T: StreamScalar, D: DeviceBackend<T>> {
    config: BenchmarkConfig,
    state: RunnerState,
    kernels: Option<KernelSet<T, D>>,
    results: Vec<KernelResult>,
    dot_result: Option<T>,
}

impl<T: StreamScalar, D: DeviceBackend<T>> BenchmarkRunner<T, D> {
    /// Create a runner for a validated configuration whose precision matches
    /// `T`.
    pub fn new(config: BenchmarkConfig) -> Result<Self> {
        config.validate()?;
        if config.scalar_type() != T::SCALAR_TYPE {
            return Err(ConfigurationError::ScalarTypeMismatch {
                configured: config.scalar_type(),
                instantiated: T::SCALAR_TYPE,
            }
            .into());
        }
        Ok(Self {
            config,
            state: RunnerState::Unconfigured,
            kernels: None,
            results: Vec::new(),
            dot_result: None,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Settings of this run.
    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Bound device, once initialized.
    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.kernels
            .as_ref()
            .map(|k| k.context().device().descriptor())
    }

    /// Per-kernel results of a completed run.
    pub fn results(&self) -> &[KernelResult] {
        &self.results
    }

    /// Result of the last dot product of a completed run.
    pub fn dot_result(&self) -> Option<T> {
        self.dot_result
    }

    fn expect_state(&self, expected: RunnerState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StreamError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    fn fail(&mut self, err: StreamError) -> StreamError {
        tracing::error!(error = %err, state = %self.state, "Benchmark run failed");
        self.state = RunnerState::Failed;
        self.results.clear();
        self.dot_result = None;
        err
    }

    /// Bind the configured device, allocate A, B, C and the reduction
    /// scratch, and fill the arrays with their start values.
    pub fn initialize<P>(&mut self, platform: &P) -> Result<()>
    where
        P: Platform<Device = D>,
    {
        self.expect_state(RunnerState::Unconfigured)?;
        match prepare(&self.config, platform) {
            Ok(kernels) => {
                self.kernels = Some(kernels);
                self.state = RunnerState::Initialized;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Execute the timed loop and compute statistics.
    ///
    /// Each iteration runs every configured kernel once, in canonical order.
    /// The first iteration is timed like the others but excluded from the
    /// statistics.
    pub fn run(&mut self) -> Result<&[KernelResult]> {
        self.expect_state(RunnerState::Initialized)?;
        self.state = RunnerState::Running;

        let Some(kernels) = self.kernels.as_mut() else {
            let err = StreamError::InvalidState {
                expected: RunnerState::Initialized.name(),
                actual: RunnerState::Unconfigured.name(),
            };
            return Err(self.fail(err));
        };
        match measure(&self.config, kernels) {
            Ok((results, dot)) => {
                self.results = results;
                self.dot_result = dot;
                self.state = RunnerState::Completed;
                Ok(&self.results)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Copy a buffer back to the host.
    pub fn read_buffer(&self, role: BufferRole) -> Result<Vec<T>> {
        match &self.kernels {
            Some(kernels) => kernels.read(role),
            None => Err(StreamError::InvalidState {
                expected: RunnerState::Initialized.name(),
                actual: self.state.name(),
            }),
        }
    }

    /// Compare the final arrays and dot result with their expected values.
    pub fn verify(&self) -> Result<SolutionCheck> {
        self.expect_state(RunnerState::Completed)?;
        let a = self.read_buffer(BufferRole::A)?;
        let b = self.read_buffer(BufferRole::B)?;
        let c = self.read_buffer(BufferRole::C)?;
        let check = check_solution(&self.config, &a, &b, &c, self.dot_result);
        for failure in check.failures() {
            tracing::warn!("{failure}");
        }
        Ok(check)
    }

    /// Snapshot of a completed run.
    pub fn report(&self, implementation: &str) -> Result<BenchmarkReport> {
        self.expect_state(RunnerState::Completed)?;
        let device = self.device().cloned().ok_or(StreamError::InvalidState {
            expected: RunnerState::Initialized.name(),
            actual: self.state.name(),
        })?;
        Ok(BenchmarkReport {
            implementation: implementation.to_string(),
            device,
            config: self.config.clone(),
            results: self.results.clone(),
            dot_result: self.dot_result.map(T::widen),
            verification: None,
        })
    }

    /// Release every device buffer.
    pub fn finish(mut self) -> Result<()> {
        match self.kernels.take() {
            Some(kernels) => {
                let mut context = kernels.into_context();
                context.release_all()
            }
            None => Ok(()),
        }
    }
}

impl<T: StreamScalar, D: DeviceBackend<T>> fmt::Debug for BenchmarkRunner<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchmarkRunner")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("results", &self.results.len())
            .finish_non_exhaustive()
    }
}

fn prepare<T, D, P>(config: &BenchmarkConfig, platform: &P) -> Result<KernelSet<T, D>>
where
    T: StreamScalar,
    D: DeviceBackend<T>,
    P: Platform<Device = D>,
{
    let mut context = DeviceContext::select(platform, config.device_index(), config.array_size())?;
    context.allocate_all()?;

    let start = config.start_values();
    context.initialize(BufferRole::A, T::narrow(start.a))?;
    context.initialize(BufferRole::B, T::narrow(start.b))?;
    context.initialize(BufferRole::C, T::narrow(start.c))?;
    tracing::debug!(
        array_size = config.array_size(),
        precision = %T::SCALAR_TYPE,
        "Arrays initialized"
    );

    Ok(KernelSet::new(context, T::narrow(start.scalar)))
}

fn measure<T, D>(
    config: &BenchmarkConfig,
    kernels: &mut KernelSet<T, D>,
) -> Result<(Vec<KernelResult>, Option<T>)>
where
    T: StreamScalar,
    D: DeviceBackend<T>,
{
    let selected = config.kernels();
    let mut timings: Vec<Vec<Duration>> =
        vec![Vec::with_capacity(config.iterations()); selected.len()];
    let mut dot = None;

    for iteration in 0..config.iterations() {
        for (samples, &kernel) in timings.iter_mut().zip(selected) {
            let execution = kernels.execute(kernel)?;
            samples.push(execution.elapsed);
            if execution.dot.is_some() {
                dot = execution.dot;
            }
        }
        tracing::debug!(iteration, "Iteration complete");
    }

    let results = selected
        .iter()
        .zip(&timings)
        .map(|(&kernel, samples)| {
            let bytes = kernel.bytes_moved(config.array_size(), T::size_bytes());
            KernelResult::from_durations(kernel, bytes, samples).ok_or(
                ConfigurationError::TooFewIterations {
                    iterations: config.iterations(),
                },
            )
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for result in &results {
        tracing::info!(
            kernel = %result.kernel,
            bandwidth_mbs = result.bandwidth_mbs,
            min = result.statistics.min,
            max = result.statistics.max,
            average = result.statistics.average,
            "Kernel summary"
        );
    }
    Ok((results, dot))
}

/// Precision-independent record of a finished run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BenchmarkReport {
    /// Backend name
    pub implementation: String,
    /// Device the run used
    pub device: DeviceDescriptor,
    /// Settings of the run
    pub config: BenchmarkConfig,
    /// One entry per executed kernel, in execution order
    pub results: Vec<KernelResult>,
    /// Result of the last dot product, if the dot kernel ran
    pub dot_result: Option<f64>,
    /// Solution check, if performed
    pub verification: Option<SolutionCheck>,
}

/// Run the full lifecycle on `platform`: bind, allocate, initialize,
/// iterate, summarize, verify and release.
///
/// The configured precision is resolved here, once.
pub fn run_benchmark<P>(config: &BenchmarkConfig, platform: &P) -> Result<BenchmarkReport>
where
    P: Platform,
    P::Device: DeviceBackend<f32> + DeviceBackend<f64>,
{
    match config.scalar_type() {
        ScalarType::Float32 => run_typed::<f32, P>(config, platform),
        ScalarType::Float64 => run_typed::<f64, P>(config, platform),
    }
}

fn run_typed<T, P>(config: &BenchmarkConfig, platform: &P) -> Result<BenchmarkReport>
where
    T: StreamScalar,
    P: Platform,
    P::Device: DeviceBackend<T>,
{
    let mut runner = BenchmarkRunner::<T, P::Device>::new(config.clone())?;
    runner.initialize(platform)?;
    runner.run()?;
    let verification = runner.verify()?;
    let mut report = runner.report(platform.name())?;
    report.verification = Some(verification);
    runner.finish()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostPlatform;
    use crate::kernels::Kernel;

    fn config(array_size: usize, iterations: usize) -> BenchmarkConfig {
        BenchmarkConfig::builder()
            .array_size(array_size)
            .iterations(iterations)
            .build()
            .unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let platform = HostPlatform::with_thread_counts(&[2]);
        let mut runner = BenchmarkRunner::<f64, _>::new(config(2048, 3)).unwrap();
        assert_eq!(runner.state(), RunnerState::Unconfigured);
        assert!(runner.run().is_err());

        runner.initialize(&platform).unwrap();
        assert_eq!(runner.state(), RunnerState::Initialized);
        assert!(runner.device().is_some());

        let results = runner.run().unwrap();
        assert_eq!(results.len(), Kernel::ALL.len());
        assert_eq!(runner.state(), RunnerState::Completed);

        let err = runner.run().unwrap_err();
        assert_eq!(
            err,
            StreamError::InvalidState {
                expected: "initialized",
                actual: "completed"
            }
        );
        runner.finish().unwrap();
    }

    #[test]
    fn test_precision_mismatch() {
        let err = BenchmarkRunner::<f32, crate::device::HostDevice>::new(config(1024, 2))
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Configuration(ConfigurationError::ScalarTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_device_fails_the_runner() {
        let platform = HostPlatform::with_thread_counts(&[1, 1]);
        let config = BenchmarkConfig::builder()
            .array_size(1024)
            .iterations(2)
            .device_index(99)
            .build()
            .unwrap();
        let mut runner = BenchmarkRunner::<f64, _>::new(config).unwrap();
        let err = runner.initialize(&platform).unwrap_err();
        assert!(err.to_string().contains("invalid device index"));
        assert_eq!(runner.state(), RunnerState::Failed);
        assert!(runner.initialize(&platform).is_err());
    }

    #[test]
    fn test_run_benchmark_float() {
        let platform = HostPlatform::with_thread_counts(&[2]);
        let config = BenchmarkConfig::builder()
            .array_size(4096)
            .iterations(4)
            .scalar_type(ScalarType::Float32)
            .build()
            .unwrap();
        let report = run_benchmark(&config, &platform).unwrap();
        assert_eq!(report.implementation, "host");
        assert_eq!(report.results.len(), 5);
        assert!(report.dot_result.is_some());
        let verification = report.verification.unwrap();
        assert!(verification.passed(), "{:?}", verification.failures());
    }
}
