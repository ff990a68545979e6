//! Error types for the bandwidth benchmark.
//!
//! The taxonomy has three fatal kinds, each detected at a different stage of
//! a run: [`ConfigurationError`] before any device resource exists,
//! [`DeviceError`] while binding the device or managing its buffers, and
//! [`KernelLaunchError`] while a kernel is dispatched or awaited. None of them
//! is retried. [`BackendError`] is the raw cause a device backend reports.

use std::fmt;
use std::panic::Location;

use thiserror::Error;

use crate::device::BufferRole;
use crate::kernels::Kernel;

/// Errors detected while validating a benchmark configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// The array size is not a whole number of work-groups.
    #[error("Array size must be a multiple of {block_size}")]
    ArraySizeNotMultiple {
        /// Requested number of elements
        array_size: usize,
        /// Required granularity
        block_size: usize,
    },

    /// The array size is zero.
    #[error("Array size must be positive")]
    EmptyArray,

    /// Fewer than two iterations leaves nothing once the warm-up is dropped.
    #[error("Number of times must be 2 or more (got {iterations})")]
    TooFewIterations {
        /// Requested iteration count
        iterations: usize,
    },

    /// The three arrays would not fit in the address space.
    #[error("Array size {array_size} is too large: {arrays} arrays of {element_bytes}-byte elements exceed the address space")]
    ArrayTooLarge {
        /// Requested number of elements
        array_size: usize,
        /// Number of arrays the run allocates
        arrays: usize,
        /// Size of one element in bytes
        element_bytes: usize,
    },

    /// A named option did not match any known choice.
    #[error("Unknown {parameter} '{value}' (expected one of: {expected})")]
    UnknownName {
        /// Name of the offending parameter
        parameter: String,
        /// Text of the rejected value
        value: String,
        /// Accepted spellings
        expected: &'static str,
    },

    /// A numeric input could not be used.
    #[error("Invalid value for {parameter}: {value}")]
    InvalidNumber {
        /// Name of the offending parameter
        parameter: String,
        /// Text of the rejected value
        value: String,
    },

    /// No kernel was selected.
    #[error("At least one kernel must be selected")]
    NoKernels,

    /// The configuration asks for a precision other than the instantiated one.
    #[error("Configuration requests {configured} but the runner was built for {instantiated}")]
    ScalarTypeMismatch {
        /// Precision named in the configuration
        configured: crate::types::ScalarType,
        /// Precision the runner is monomorphized for
        instantiated: crate::types::ScalarType,
    },
}

impl ConfigurationError {
    /// Create an InvalidNumber error.
    pub fn invalid_number<S1, S2>(parameter: S1, value: S2) -> Self
    where
        S1: Into<String>,
        S2: fmt::Display,
    {
        Self::InvalidNumber {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    /// Create an UnknownName error.
    pub fn unknown_name<S1, S2>(parameter: S1, value: S2, expected: &'static str) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::UnknownName {
            parameter: parameter.into(),
            value: value.into(),
            expected,
        }
    }
}

/// Failures reported by a device backend.
///
/// These carry the backend's own description of what went wrong and are
/// wrapped into a [`DeviceError`] or [`KernelLaunchError`] by the caller,
/// which knows the operation being attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Device could not be opened.
    #[error("failed to bind device: {0}")]
    Bind(String),

    /// Memory could not be reserved.
    #[error("allocation of {bytes} bytes failed: {reason}")]
    Allocation {
        /// Requested size in bytes
        bytes: usize,
        /// Backend description
        reason: String,
    },

    /// Host/device copy failed.
    #[error("memory transfer failed: {0}")]
    Transfer(String),

    /// Kernel could not be dispatched.
    #[error("kernel launch failed: {0}")]
    Launch(String),

    /// Completion wait failed.
    #[error("synchronization failed: {0}")]
    Synchronize(String),

    /// Buffers handed to one operation disagree in length.
    #[error("buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Expected element count
        expected: usize,
        /// Element count found
        actual: usize,
    },

    /// Device enumeration failed.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),
}

/// Errors raised while binding a device or managing its buffers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The requested index is past the end of the enumeration.
    #[error("invalid device index {index} ({available} device(s) available)")]
    InvalidIndex {
        /// Requested index
        index: usize,
        /// Number of enumerated devices
        available: usize,
    },

    /// The device list could not be obtained.
    #[error("could not enumerate devices: {source}")]
    Enumeration {
        /// Backend cause
        source: BackendError,
    },

    /// The device exists but could not be bound.
    #[error("could not bind device {index}: {source}")]
    Bind {
        /// Requested index
        index: usize,
        /// Backend cause
        source: BackendError,
    },

    /// Device memory could not be reserved.
    #[error("could not allocate buffer {role} ({count} elements, {bytes} bytes): {source}")]
    Allocation {
        /// Buffer being allocated
        role: BufferRole,
        /// Element count
        count: usize,
        /// Size in bytes
        bytes: usize,
        /// Backend cause
        source: BackendError,
    },

    /// Host/device transfer failed.
    #[error("transfer for buffer {role} failed: {source}")]
    Transfer {
        /// Buffer being transferred
        role: BufferRole,
        /// Backend cause
        source: BackendError,
    },

    /// Buffer was used before allocation or after release.
    #[error("buffer {role} is not allocated")]
    NotAllocated {
        /// Buffer requested
        role: BufferRole,
    },

    /// Buffer was allocated twice without a release in between.
    #[error("buffer {role} is already allocated")]
    AlreadyAllocated {
        /// Buffer requested
        role: BufferRole,
    },

    /// Buffer was released twice.
    #[error("buffer {role} was already released")]
    DoubleRelease {
        /// Buffer released
        role: BufferRole,
    },

    /// Backend refused to release a buffer.
    #[error("could not release buffer {role}: {source}")]
    Release {
        /// Buffer released
        role: BufferRole,
        /// Backend cause
        source: BackendError,
    },
}

/// A kernel dispatch or completion wait failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("kernel `{kernel}` failed at {file}:{line}: {source}")]
pub struct KernelLaunchError {
    /// Kernel that failed
    pub kernel: Kernel,
    /// Source file of the launch site
    pub file: &'static str,
    /// Source line of the launch site
    pub line: u32,
    /// Backend cause
    #[source]
    pub source: BackendError,
}

impl KernelLaunchError {
    /// Create a launch error located at the caller.
    #[track_caller]
    pub fn new(kernel: Kernel, source: BackendError) -> Self {
        let location = Location::caller();
        Self {
            kernel,
            file: location.file(),
            line: location.line(),
            source,
        }
    }
}

/// Any error that aborts a benchmark run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Device binding or buffer management failure.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Kernel dispatch or completion failure.
    #[error("Kernel launch error: {0}")]
    KernelLaunch(#[from] KernelLaunchError),

    /// Operation called in the wrong lifecycle state.
    #[error("Runner is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation requires
        expected: &'static str,
        /// State the runner was in
        actual: &'static str,
    },
}

impl StreamError {
    /// Whether the error was raised before any device resource was acquired.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result type alias for benchmark operations.
pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_messages() {
        let err = ConfigurationError::ArraySizeNotMultiple {
            array_size: 1000,
            block_size: 1024,
        };
        assert_eq!(err.to_string(), "Array size must be a multiple of 1024");

        let err = ConfigurationError::TooFewIterations { iterations: 1 };
        assert!(err.to_string().starts_with("Number of times must be 2 or more"));

        let err = ConfigurationError::invalid_number("scalar", f64::NAN);
        assert_eq!(err.to_string(), "Invalid value for scalar: NaN");

        let err = ConfigurationError::unknown_name("kernel", "fma", "copy, mul, add, triad, dot");
        assert_eq!(
            err.to_string(),
            "Unknown kernel 'fma' (expected one of: copy, mul, add, triad, dot)"
        );
    }

    #[test]
    fn test_device_index_message() {
        let err = DeviceError::InvalidIndex {
            index: 99,
            available: 2,
        };
        assert!(err.to_string().contains("invalid device index"));
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn test_kernel_launch_error_carries_location() {
        let line = line!() + 1;
        let err = KernelLaunchError::new(Kernel::Triad, BackendError::Launch("boom".into()));
        assert_eq!(err.kernel, Kernel::Triad);
        assert_eq!(err.line, line);
        assert!(err.file.ends_with("error.rs"));

        let message = err.to_string();
        assert!(message.contains("triad"));
        assert!(message.contains("boom"));
    }

    #[test]
    fn test_stream_error_conversion() {
        let err: StreamError = ConfigurationError::EmptyArray.into();
        assert!(err.is_configuration());
        assert!(err.to_string().starts_with("Configuration error"));

        let err: StreamError = DeviceError::DoubleRelease {
            role: BufferRole::C,
        }
        .into();
        assert!(!err.is_configuration());
        assert_eq!(err.to_string(), "Device error: buffer C was already released");
    }
}
