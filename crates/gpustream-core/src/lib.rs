//! Core engine of a STREAM-style memory bandwidth benchmark for accelerators.
//!
//! The benchmark fills three device arrays, repeatedly runs five simple
//! data-parallel kernels over them and reports the sustained bandwidth each
//! kernel achieved. Every kernel call waits for device completion inside its
//! timed window, so the numbers measure memory traffic rather than dispatch
//! latency.
//!
//! # Key Concepts
//!
//! - **Kernels**: copy, mul (scale), add, triad and dot
//! - **Device backends**: accelerator APIs behind one capability trait
//! - **Warm-up**: the first iteration is timed but excluded from statistics
//! - **Bandwidth**: bytes moved divided by the fastest retained sample
//!
//! # Modules
//!
//! - [`config`]: Validated run settings and their builder
//! - [`device`]: Platforms, backends and the per-run device context
//! - [`error`]: Error taxonomy
//! - [`kernels`]: Kernel identifiers and the synchronous kernel set
//! - [`reduction`]: Two-phase dot-product reduction geometry
//! - [`runner`]: Timed loop, lifecycle and reports
//! - [`stats`]: Statistics and bandwidth
//! - [`types`]: Scalar precisions
//! - [`verify`]: Post-run solution check

pub mod config;
pub mod device;
pub mod error;
pub mod kernels;
pub mod reduction;
pub mod runner;
pub mod stats;
pub mod types;
pub mod verify;

// Re-export commonly used items at the crate root
pub use error::{
    BackendError, ConfigurationError, DeviceError, KernelLaunchError, Result, StreamError,
};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use gpustream_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{BenchmarkConfig, BenchmarkConfigBuilder, StartValues, BLOCK_SIZE};
    pub use crate::device::{
        BufferRole, DeviceBackend, DeviceContext, DeviceDescriptor, HostDevice, HostPlatform,
        Platform,
    };
    pub use crate::error::{
        BackendError, ConfigurationError, DeviceError, KernelLaunchError, Result, StreamError,
    };
    pub use crate::kernels::{Execution, Kernel, KernelSet};
    pub use crate::reduction::DotGeometry;
    pub use crate::runner::{run_benchmark, BenchmarkReport, BenchmarkRunner, RunnerState};
    pub use crate::stats::{KernelResult, Statistics};
    pub use crate::types::{ScalarType, StreamScalar};
    pub use crate::verify::SolutionCheck;

    #[cfg(feature = "cuda")]
    pub use crate::device::{CudaDevice, CudaPlatform};
}
