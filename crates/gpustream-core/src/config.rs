//! Benchmark configuration.
//!
//! A [`BenchmarkConfig`] is built once, validated by
//! [`BenchmarkConfigBuilder::build`] before any device is touched, and then
//! passed by reference into the engine. Nothing in the crate keeps run
//! settings in global state.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::kernels::Kernel;
use crate::types::ScalarType;

/// Work-group granularity. Array sizes must be a multiple of this.
pub const BLOCK_SIZE: usize = 1024;

/// Default number of elements per array (2^25).
pub const DEFAULT_ARRAY_SIZE: usize = 33_554_432;

/// Default number of timed iterations.
pub const DEFAULT_ITERATIONS: usize = 100;

/// Device arrays allocated per run.
pub const ARRAY_COUNT: usize = 3;

/// Starting values of the three arrays and the scalar multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StartValues {
    /// Initial value of every element of A
    pub a: f64,
    /// Initial value of every element of B
    pub b: f64,
    /// Initial value of every element of C
    pub c: f64,
    /// Multiplier used by the scale and triad kernels
    pub scalar: f64,
}

impl Default for StartValues {
    fn default() -> Self {
        Self {
            a: 0.1,
            b: 0.2,
            c: 0.2,
            scalar: 0.4,
        }
    }
}

impl StartValues {
    fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, value) in [
            ("initial A", self.a),
            ("initial B", self.b),
            ("initial C", self.c),
            ("scalar", self.scalar),
        ] {
            if !value.is_finite() {
                return Err(ConfigurationError::invalid_number(name, value));
            }
        }
        Ok(())
    }
}

/// Validated, immutable benchmark settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BenchmarkConfig {
    array_size: usize,
    iterations: usize,
    device_index: usize,
    scalar_type: ScalarType,
    start_values: StartValues,
    kernels: Vec<Kernel>,
}

impl BenchmarkConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> BenchmarkConfigBuilder {
        BenchmarkConfigBuilder::new()
    }

    /// Number of elements per array.
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Number of timed iterations, warm-up included.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Position of the device in the platform enumeration.
    pub fn device_index(&self) -> usize {
        self.device_index
    }

    /// Element precision.
    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    /// Starting values and multiplier.
    pub fn start_values(&self) -> StartValues {
        self.start_values
    }

    /// Kernels to run each iteration, in execution order.
    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    /// Size of one array in bytes.
    pub fn array_bytes(&self) -> usize {
        self.array_size.saturating_mul(self.scalar_type.size_bytes())
    }

    /// Size of all three arrays in bytes.
    pub fn total_bytes(&self) -> usize {
        ARRAY_COUNT.saturating_mul(self.array_bytes())
    }

    /// Check every invariant.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.array_size == 0 {
            return Err(ConfigurationError::EmptyArray);
        }
        if self.array_size % BLOCK_SIZE != 0 {
            return Err(ConfigurationError::ArraySizeNotMultiple {
                array_size: self.array_size,
                block_size: BLOCK_SIZE,
            });
        }
        let element_bytes = self.scalar_type.size_bytes();
        if self
            .array_size
            .checked_mul(element_bytes)
            .and_then(|bytes| bytes.checked_mul(ARRAY_COUNT))
            .is_none()
        {
            return Err(ConfigurationError::ArrayTooLarge {
                array_size: self.array_size,
                arrays: ARRAY_COUNT,
                element_bytes,
            });
        }
        if self.iterations < 2 {
            return Err(ConfigurationError::TooFewIterations {
                iterations: self.iterations,
            });
        }
        if self.kernels.is_empty() {
            return Err(ConfigurationError::NoKernels);
        }
        self.start_values.validate()
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            array_size: DEFAULT_ARRAY_SIZE,
            iterations: DEFAULT_ITERATIONS,
            device_index: 0,
            scalar_type: ScalarType::default(),
            start_values: StartValues::default(),
            kernels: Kernel::ALL.to_vec(),
        }
    }
}

/// Builder for [`BenchmarkConfig`].
#[derive(Debug, Clone, Default)]
pub struct BenchmarkConfigBuilder {
    config: BenchmarkConfig,
}

impl BenchmarkConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of elements per array.
    pub fn array_size(mut self, array_size: usize) -> Self {
        self.config.array_size = array_size;
        self
    }

    /// Set the number of timed iterations.
    pub fn iterations(mut self, iterations: usize) -> Self {
        self.config.iterations = iterations;
        self
    }

    /// Select the device by enumeration index.
    pub fn device_index(mut self, index: usize) -> Self {
        self.config.device_index = index;
        self
    }

    /// Set the element precision.
    pub fn scalar_type(mut self, scalar_type: ScalarType) -> Self {
        self.config.scalar_type = scalar_type;
        self
    }

    /// Replace all starting values at once.
    pub fn start_values(mut self, start_values: StartValues) -> Self {
        self.config.start_values = start_values;
        self
    }

    /// Override the scalar multiplier.
    pub fn scalar(mut self, scalar: f64) -> Self {
        self.config.start_values.scalar = scalar;
        self
    }

    /// Choose which kernels run. Duplicates are dropped and the canonical
    /// execution order is restored.
    pub fn kernels<I>(mut self, kernels: I) -> Self
    where
        I: IntoIterator<Item = Kernel>,
    {
        let requested: Vec<Kernel> = kernels.into_iter().collect();
        self.config.kernels = Kernel::ALL
            .iter()
            .copied()
            .filter(|k| requested.contains(k))
            .collect();
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<BenchmarkConfig, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BenchmarkConfig::builder().build().unwrap();
        assert_eq!(config.array_size(), 33_554_432);
        assert_eq!(config.iterations(), 100);
        assert_eq!(config.device_index(), 0);
        assert_eq!(config.scalar_type(), ScalarType::Float64);
        assert_eq!(config.kernels(), &Kernel::ALL);
        assert_eq!(config.start_values(), StartValues::default());
    }

    #[test]
    fn test_array_size_must_be_block_multiple() {
        let err = BenchmarkConfig::builder().array_size(1000).build().unwrap_err();
        assert_eq!(err.to_string(), "Array size must be a multiple of 1024");

        let err = BenchmarkConfig::builder().array_size(0).build().unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyArray);
    }

    #[test]
    fn test_iteration_count_lower_bound() {
        let err = BenchmarkConfig::builder().iterations(1).build().unwrap_err();
        assert_eq!(err, ConfigurationError::TooFewIterations { iterations: 1 });
        assert!(BenchmarkConfig::builder().iterations(2).build().is_ok());
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let err = BenchmarkConfig::builder()
            .scalar(f64::INFINITY)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidNumber { .. }));
    }

    #[test]
    fn test_kernel_selection_is_ordered_and_deduplicated() {
        let config = BenchmarkConfig::builder()
            .kernels([Kernel::Dot, Kernel::Copy, Kernel::Dot])
            .build()
            .unwrap();
        assert_eq!(config.kernels(), &[Kernel::Copy, Kernel::Dot]);

        let err = BenchmarkConfig::builder().kernels(Vec::new()).build().unwrap_err();
        assert_eq!(err, ConfigurationError::NoKernels);
    }

    #[test]
    fn test_sizes_in_bytes() {
        let config = BenchmarkConfig::builder()
            .array_size(2048)
            .scalar_type(ScalarType::Float32)
            .build()
            .unwrap();
        assert_eq!(config.array_bytes(), 8192);
        assert_eq!(config.total_bytes(), 3 * 8192);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_array_size_overflowing_byte_count_is_rejected() {
        let err = BenchmarkConfig::builder()
            .array_size(1 << 61)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::ArrayTooLarge {
                array_size: 1 << 61,
                arrays: 3,
                element_bytes: 8,
            }
        );
        assert!(err.to_string().starts_with("Array size 2305843009213693952 is too large"));

        // Largest power of two whose three arrays still fit
        let config = BenchmarkConfig::builder().array_size(1 << 58).build().unwrap();
        assert_eq!(config.array_bytes(), 1 << 61);
        assert_eq!(config.total_bytes(), 3 << 61);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_single_precision_limit() {
        let builder = BenchmarkConfig::builder().scalar_type(ScalarType::Float32);
        assert!(builder.clone().array_size(1 << 59).build().is_ok());
        assert!(matches!(
            builder.array_size(1 << 62).build(),
            Err(ConfigurationError::ArrayTooLarge { element_bytes: 4, .. })
        ));
    }
}
