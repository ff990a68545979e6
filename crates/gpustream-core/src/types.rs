//! Scalar types the benchmark can run with.
//!
//! The precision is chosen once at configuration time through [`ScalarType`]
//! and the whole engine is then monomorphized over a [`StreamScalar`], so
//! kernels never branch on the element width.

use num_traits::Float;
use std::fmt::{self, Debug, Display};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Runtime selector for the element precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScalarType {
    /// IEEE-754 binary32
    Float32,
    /// IEEE-754 binary64
    #[default]
    Float64,
}

impl ScalarType {
    /// Width of one element in bytes.
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Human-readable precision name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalarType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float" | "f32" | "float32" => Ok(Self::Float32),
            "double" | "f64" | "float64" => Ok(Self::Float64),
            _ => Err(ConfigurationError::unknown_name(
                "precision",
                s,
                "float, f32, double, f64",
            )),
        }
    }
}

/// Element type the kernels operate on (`f32` or `f64`).
pub trait StreamScalar:
    Float + Default + Display + Debug + Send + Sync + 'static
{
    /// Runtime tag of this precision.
    const SCALAR_TYPE: ScalarType;

    /// Name used to look up device kernel symbols.
    const TYPE_NAME: &'static str;

    /// Machine epsilon.
    const EPSILON: Self;

    /// Relative tolerance used when checking element-wise kernel results.
    const ELEMENT_TOLERANCE: f64;

    /// Convert a configuration constant into this precision.
    fn narrow(v: f64) -> Self;

    /// Widen to f64 for statistics and display.
    fn widen(self) -> f64;

    /// Size of one element in bytes.
    fn size_bytes() -> usize {
        Self::SCALAR_TYPE.size_bytes()
    }
}

impl StreamScalar for f32 {
    const SCALAR_TYPE: ScalarType = ScalarType::Float32;
    const TYPE_NAME: &'static str = "float";
    const EPSILON: Self = f32::EPSILON;
    const ELEMENT_TOLERANCE: f64 = 1e-6;

    #[allow(clippy::cast_possible_truncation)]
    fn narrow(v: f64) -> Self {
        v as f32
    }

    fn widen(self) -> f64 {
        f64::from(self)
    }
}

impl StreamScalar for f64 {
    const SCALAR_TYPE: ScalarType = ScalarType::Float64;
    const TYPE_NAME: &'static str = "double";
    const EPSILON: Self = f64::EPSILON;
    const ELEMENT_TOLERANCE: f64 = 1e-13;

    fn narrow(v: f64) -> Self {
        v
    }

    fn widen(self) -> f64 {
        self
    }
}
