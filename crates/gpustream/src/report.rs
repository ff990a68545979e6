//! Human and machine readable output of a benchmark run.

use std::io::{self, Write};

use gpustream_core::config::BenchmarkConfig;
use gpustream_core::device::DeviceDescriptor;
use gpustream_core::runner::BenchmarkReport;
use serde::Serialize;

const PROGRAM: &str = "GPU-STREAM";
const VERSION: &str = env!("CARGO_PKG_VERSION");

const CSV_HEADER: &str =
    "function,num_times,n_elements,sizeof,max_mbytes_per_sec,min_runtime,max_runtime,avg_runtime";

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Banner and aligned table
    Table,
    /// One CSV row per kernel
    Csv,
    /// The whole report as a JSON document
    Json,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    program: &'static str,
    version: &'static str,
    #[serde(flatten)]
    report: &'a BenchmarkReport,
}

/// Writes the banner, device list and results in the selected format.
#[derive(Debug, Clone, Copy)]
pub struct ResultReporter {
    format: OutputFormat,
}

impl ResultReporter {
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Banner printed before the run starts. Only the table format has one.
    pub fn write_header<W: Write>(
        &self,
        out: &mut W,
        implementation: &str,
        config: &BenchmarkConfig,
    ) -> io::Result<()> {
        if self.format != OutputFormat::Table {
            return Ok(());
        }
        let array_bytes = config.array_bytes() as f64;
        let total_bytes = config.total_bytes() as f64;
        writeln!(out, "{PROGRAM}")?;
        writeln!(out, "Version: {VERSION}")?;
        writeln!(out, "Implementation: {implementation}")?;
        writeln!(out, "Running kernels {} times", config.iterations())?;
        writeln!(out, "Precision: {}", config.scalar_type())?;
        writeln!(
            out,
            "Array size: {:.1} MB (={:.1} GB)",
            array_bytes * 1e-6,
            array_bytes * 1e-9
        )?;
        writeln!(
            out,
            "Total size: {:.1} MB (={:.1} GB)",
            total_bytes * 1e-6,
            total_bytes * 1e-9
        )
    }

    /// Enumerated devices, one per line.
    pub fn write_devices<W: Write>(
        &self,
        out: &mut W,
        devices: &[DeviceDescriptor],
    ) -> io::Result<()> {
        if devices.is_empty() {
            return writeln!(out, "No devices found.");
        }
        if self.format == OutputFormat::Json {
            let names: Vec<String> = devices.iter().map(ToString::to_string).collect();
            return writeln!(out, "{}", serde_json::to_string_pretty(&names)?);
        }
        writeln!(out, "Devices:")?;
        for device in devices {
            writeln!(out, "{device}")?;
        }
        Ok(())
    }

    /// Results of a finished run.
    pub fn write_results<W: Write>(&self, out: &mut W, report: &BenchmarkReport) -> io::Result<()> {
        match self.format {
            OutputFormat::Table => write_table(out, report),
            OutputFormat::Csv => write_csv(out, report),
            OutputFormat::Json => {
                let json = JsonReport {
                    program: PROGRAM,
                    version: VERSION,
                    report,
                };
                writeln!(out, "{}", serde_json::to_string_pretty(&json)?)
            }
        }
    }
}

fn write_table<W: Write>(out: &mut W, report: &BenchmarkReport) -> io::Result<()> {
    writeln!(out, "Using device {}", report.device)?;
    writeln!(
        out,
        "{:<12}{:<12}{:<12}{:<12}{:<12}",
        "Function", "MBytes/sec", "Min (sec)", "Max", "Average"
    )?;
    for result in &report.results {
        let stats = result.statistics;
        writeln!(
            out,
            "{:<16}{:<16.3}{:<16.5}{:<16.5}{:<16.5}",
            result.label(),
            result.bandwidth_mbs,
            stats.min,
            stats.max,
            stats.average
        )?;
    }

    if let Some(dot) = report.dot_result {
        writeln!(out, "Dot result: {dot}")?;
    }
    if let Some(check) = &report.verification {
        if check.passed() {
            writeln!(out, "Validation: passed")?;
        } else {
            for failure in check.failures() {
                writeln!(out, "{failure}")?;
            }
        }
    }
    Ok(())
}

fn write_csv<W: Write>(out: &mut W, report: &BenchmarkReport) -> io::Result<()> {
    let config = &report.config;
    writeln!(out, "{CSV_HEADER}")?;
    for result in &report.results {
        let stats = result.statistics;
        writeln!(
            out,
            "{},{},{},{},{:.3},{:.5},{:.5},{:.5}",
            result.kernel,
            config.iterations(),
            config.array_size(),
            config.scalar_type().size_bytes(),
            result.bandwidth_mbs,
            stats.min,
            stats.max,
            stats.average
        )?;
    }
    Ok(())
}
