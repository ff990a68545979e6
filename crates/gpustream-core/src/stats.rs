//! Timing statistics and bandwidth.
//!
//! Sample 0 of every kernel is the warm-up iteration and never contributes
//! to min, max, average or bandwidth.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::kernels::Kernel;

/// Bytes per megabyte as used for MB/s.
pub const BYTES_PER_MB: f64 = 1.0e6;

/// Min, max and average of the retained samples, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Statistics {
    /// Fastest retained sample
    pub min: f64,
    /// Slowest retained sample
    pub max: f64,
    /// Mean of the retained samples
    pub average: f64,
}

impl Statistics {
    /// Statistics over `samples[1..]`. `None` when nothing is left once the
    /// warm-up sample is dropped.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        let retained = samples.get(1..).filter(|s| !s.is_empty())?;
        let (min, max, sum) = retained.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), &t| (min.min(t), max.max(t), sum + t),
        );
        let average = (sum / retained.len() as f64).max(min).min(max);
        Some(Self { min, max, average })
    }
}

/// Everything measured for one kernel over a run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KernelResult {
    /// Kernel measured
    pub kernel: Kernel,
    /// Bytes moved by one invocation
    pub bytes_moved: usize,
    /// Every sample in seconds, warm-up included
    pub samples: Vec<f64>,
    /// Statistics over the retained samples
    pub statistics: Statistics,
    /// `bytes_moved / min` in MB/s
    pub bandwidth_mbs: f64,
}

impl KernelResult {
    /// Summarize the samples of `kernel`.
    pub fn from_samples(kernel: Kernel, bytes_moved: usize, samples: Vec<f64>) -> Option<Self> {
        let statistics = Statistics::from_samples(&samples)?;
        Some(Self {
            kernel,
            bytes_moved,
            bandwidth_mbs: bandwidth_mbs(bytes_moved, statistics.min),
            samples,
            statistics,
        })
    }

    /// Summarize samples given as durations.
    pub fn from_durations(kernel: Kernel, bytes_moved: usize, samples: &[Duration]) -> Option<Self> {
        Self::from_samples(
            kernel,
            bytes_moved,
            samples.iter().map(Duration::as_secs_f64).collect(),
        )
    }

    /// Table label of the kernel.
    pub fn label(&self) -> &'static str {
        self.kernel.label()
    }

    /// Number of samples that entered the statistics.
    pub fn retained_samples(&self) -> usize {
        self.samples.len().saturating_sub(1)
    }
}

/// Bandwidth in MB/s for `bytes` moved in `seconds`.
pub fn bandwidth_mbs(bytes: usize, seconds: f64) -> f64 {
    bytes as f64 / BYTES_PER_MB / seconds
}
