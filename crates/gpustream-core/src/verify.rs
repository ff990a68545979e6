//! Post-run solution check.
//!
//! Every array starts uniform and every kernel is element-wise, so after any
//! number of iterations each array is still uniform. Replaying the executed
//! kernels on one scalar per array gives the expected ("gold") value, which is
//! compared against what the device produced.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::BenchmarkConfig;
use crate::device::BufferRole;
use crate::kernels::Kernel;
use crate::reduction::{dot_tolerance, DotGeometry};
use crate::types::StreamScalar;

/// Expected final value of A, B and C and of the last dot product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoldValues<T> {
    /// Value of every element of A
    pub a: T,
    /// Value of every element of B
    pub b: T,
    /// Value of every element of C
    pub c: T,
    /// Result of the last dot product, if one ran
    pub dot: Option<f64>,
}

impl<T: StreamScalar> GoldValues<T> {
    /// Replay `config.iterations()` rounds of the configured kernels.
    pub fn replay(config: &BenchmarkConfig) -> Self {
        let start = config.start_values();
        let scalar = T::narrow(start.scalar);
        let mut a = T::narrow(start.a);
        let mut b = T::narrow(start.b);
        let mut c = T::narrow(start.c);
        let mut dot = None;

        for _ in 0..config.iterations() {
            for &kernel in config.kernels() {
                match kernel {
                    Kernel::Copy => c = a,
                    Kernel::Mul => b = scalar * c,
                    Kernel::Add => c = a + b,
                    Kernel::Triad => a = b + scalar * c,
                    Kernel::Dot => {
                        dot = Some((a * b).widen() * config.array_size() as f64);
                    }
                }
            }
        }
        Self { a, b, c, dot }
    }
}

/// Deviation of one array from its gold value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArrayCheck {
    /// Array checked
    pub role: BufferRole,
    /// Gold value
    pub expected: f64,
    /// Mean absolute deviation over all elements
    pub mean_abs_error: f64,
    /// `mean_abs_error / |expected|`, or the absolute error when the gold
    /// value is zero
    pub relative_error: f64,
}

/// Deviation of the dot result from its gold value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DotCheck {
    /// Gold value
    pub expected: f64,
    /// Device result
    pub actual: f64,
    /// Relative deviation
    pub relative_error: f64,
    /// Accepted relative deviation for the reduction geometry
    pub tolerance: f64,
}

impl DotCheck {
    /// Whether the result is within tolerance.
    pub fn passed(&self) -> bool {
        self.relative_error <= self.tolerance
    }
}

/// Outcome of the solution check.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolutionCheck {
    /// One entry per array
    pub arrays: Vec<ArrayCheck>,
    /// Present when the dot kernel ran
    pub dot: Option<DotCheck>,
    /// Accepted relative deviation for the arrays
    pub element_tolerance: f64,
}

impl SolutionCheck {
    /// Whether every array and the dot result are within tolerance.
    pub fn passed(&self) -> bool {
        self.arrays
            .iter()
            .all(|a| a.relative_error <= self.element_tolerance)
            && self.dot.is_none_or(|d| d.passed())
    }

    /// Human-readable description of each failed check.
    pub fn failures(&self) -> Vec<String> {
        let mut failures: Vec<String> = self
            .arrays
            .iter()
            .filter(|a| a.relative_error > self.element_tolerance)
            .map(|a| {
                format!(
                    "Validation failed on {}. Average error {:e}",
                    a.role, a.mean_abs_error
                )
            })
            .collect();
        if let Some(dot) = self.dot.filter(|d| !d.passed()) {
            failures.push(format!(
                "Validation failed on sum. Error {:e}; sum was {} but should be {}",
                dot.relative_error, dot.actual, dot.expected
            ));
        }
        failures
    }
}

fn array_check<T: StreamScalar>(role: BufferRole, values: &[T], expected: T) -> ArrayCheck {
    let expected = expected.widen();
    let total: f64 = values.iter().map(|v| (v.widen() - expected).abs()).sum();
    let mean_abs_error = if values.is_empty() {
        0.0
    } else {
        total / values.len() as f64
    };
    let relative_error = if expected == 0.0 {
        mean_abs_error
    } else {
        mean_abs_error / expected.abs()
    };
    ArrayCheck {
        role,
        expected,
        mean_abs_error,
        relative_error,
    }
}

/// Compare downloaded arrays and the dot result against the replayed gold
/// values.
pub fn check_solution<T: StreamScalar>(
    config: &BenchmarkConfig,
    a: &[T],
    b: &[T],
    c: &[T],
    dot: Option<T>,
) -> SolutionCheck {
    let gold = GoldValues::<T>::replay(config);
    let arrays = vec![
        array_check(BufferRole::A, a, gold.a),
        array_check(BufferRole::B, b, gold.b),
        array_check(BufferRole::C, c, gold.c),
    ];

    let geometry = DotGeometry::new(config.array_size());
    let dot = gold.dot.zip(dot).map(|(expected, actual)| {
        let actual = actual.widen();
        let relative_error = if expected == 0.0 {
            actual.abs()
        } else {
            ((actual - expected) / expected).abs()
        };
        DotCheck {
            expected,
            actual,
            relative_error,
            tolerance: dot_tolerance::<T>(&geometry),
        }
    });

    SolutionCheck {
        arrays,
        dot,
        element_tolerance: T::ELEMENT_TOLERANCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(kernels: &[Kernel], iterations: usize) -> BenchmarkConfig {
        BenchmarkConfig::builder()
            .array_size(1024)
            .iterations(iterations)
            .kernels(kernels.iter().copied())
            .build()
            .unwrap()
    }

    #[test]
    fn test_gold_after_one_round() {
        let gold = GoldValues::<f64>::replay(&config(&Kernel::ALL, 2));
        // Round 1: c=0.1 b=0.04 c=0.14 a=0.096; round 2 from there
        let (mut a, mut b, mut c) = (0.1, 0.2, 0.2);
        for _ in 0..2 {
            c = a;
            b = 0.4 * c;
            c = a + b;
            a = b + 0.4 * c;
        }
        assert_eq!(gold.a, a);
        assert_eq!(gold.b, b);
        assert_eq!(gold.c, c);
        assert_relative_eq!(gold.dot.unwrap(), a * b * 1024.0);
    }

    #[test]
    fn test_gold_without_dot() {
        let gold = GoldValues::<f32>::replay(&config(&[Kernel::Copy], 10));
        assert_eq!(gold.c, 0.1_f32);
        assert_eq!(gold.a, 0.1_f32);
        assert!(gold.dot.is_none());
    }

    #[test]
    fn test_check_passes_on_exact_values() {
        let config = config(&[Kernel::Triad], 3);
        let a = vec![0.2 + 0.4 * 0.2; 1024];
        let b = vec![0.2; 1024];
        let c = vec![0.2; 1024];
        let check = check_solution::<f64>(&config, &a, &b, &c, None);
        assert!(check.passed(), "{:?}", check.failures());
        assert!(check.dot.is_none());
    }

    #[test]
    fn test_check_reports_corrupted_array() {
        let config = config(&[Kernel::Copy], 2);
        let a = vec![0.1; 1024];
        let b = vec![0.2; 1024];
        let mut c = vec![0.1; 1024];
        c[7] = 5.0;
        let check = check_solution::<f64>(&config, &a, &b, &c, None);
        assert!(!check.passed());
        let failures = check.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("on C"));
    }

    #[test]
    fn test_check_reports_wrong_dot() {
        let config = config(&[Kernel::Dot], 2);
        let a = vec![0.1; 1024];
        let b = vec![0.2; 1024];
        let c = vec![0.2; 1024];
        let good = check_solution::<f64>(&config, &a, &b, &c, Some(0.1 * 0.2 * 1024.0));
        assert!(good.passed());
        let bad = check_solution::<f64>(&config, &a, &b, &c, Some(21.0));
        assert!(!bad.passed());
        assert!(bad.failures()[0].contains("sum"));
    }
}
