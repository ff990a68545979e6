//! Command-line arguments.

use clap::{Parser, ValueEnum};
use gpustream_core::config::{BenchmarkConfig, StartValues, DEFAULT_ARRAY_SIZE, DEFAULT_ITERATIONS};
use gpustream_core::kernels::Kernel;
use gpustream_core::types::ScalarType;
use gpustream_core::ConfigurationError;

use crate::report::OutputFormat;

/// Device API the benchmark runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// CPU worker pool
    Host,
    /// NVIDIA GPUs through the CUDA driver
    Cuda,
}

#[derive(Debug, Parser)]
#[command(
    name = "gpustream",
    about = "Measure sustained memory bandwidth with the STREAM kernels",
    version,
    long_about = None
)]
pub struct Cli {
    /// List available devices and exit
    #[arg(long)]
    pub list: bool,

    /// Select device at INDEX
    #[arg(long, value_name = "INDEX", default_value_t = 0)]
    pub device: usize,

    /// Use SIZE elements in each array
    #[arg(short = 's', long = "arraysize", value_name = "SIZE", default_value_t = DEFAULT_ARRAY_SIZE)]
    pub array_size: usize,

    /// Run the test NUM times (NUM >= 2)
    #[arg(short = 'n', long = "numtimes", value_name = "NUM", default_value_t = DEFAULT_ITERATIONS)]
    pub iterations: usize,

    /// Use floats (rather than doubles)
    #[arg(long)]
    pub float: bool,

    /// Comma-separated kernels to run
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    pub kernels: Vec<Kernel>,

    /// Device API
    #[arg(long, value_enum, default_value_t = Backend::Host)]
    pub backend: Backend,

    /// Worker threads of the host device (defaults to every logical CPU)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Initial value of array A
    #[arg(long, value_name = "VALUE")]
    pub init_a: Option<f64>,

    /// Initial value of array B
    #[arg(long, value_name = "VALUE")]
    pub init_b: Option<f64>,

    /// Initial value of array C
    #[arg(long, value_name = "VALUE")]
    pub init_c: Option<f64>,

    /// Scalar of the mul and triad kernels
    #[arg(long, value_name = "VALUE")]
    pub scalar: Option<f64>,

    /// Print results as CSV
    #[arg(long, conflicts_with = "json")]
    pub csv: bool,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Validated benchmark settings.
    pub fn config(&self) -> Result<BenchmarkConfig, ConfigurationError> {
        let defaults = StartValues::default();
        let start = StartValues {
            a: self.init_a.unwrap_or(defaults.a),
            b: self.init_b.unwrap_or(defaults.b),
            c: self.init_c.unwrap_or(defaults.c),
            scalar: self.scalar.unwrap_or(defaults.scalar),
        };
        let scalar_type = if self.float {
            ScalarType::Float32
        } else {
            ScalarType::Float64
        };

        let mut builder = BenchmarkConfig::builder()
            .array_size(self.array_size)
            .iterations(self.iterations)
            .device_index(self.device)
            .scalar_type(scalar_type)
            .start_values(start);
        if !self.kernels.is_empty() {
            builder = builder.kernels(self.kernels.iter().copied());
        }
        builder.build()
    }

    /// Output format selected by the flags.
    pub const fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else if self.csv {
            OutputFormat::Csv
        } else {
            OutputFormat::Table
        }
    }
}
