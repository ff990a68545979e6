//! `gpustream` command-line benchmark.

mod cli;
mod report;

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use gpustream_core::config::BenchmarkConfig;
use gpustream_core::device::{DeviceBackend, HostPlatform, Platform};
use gpustream_core::runner::run_benchmark;

use crate::cli::{Backend, Cli};
use crate::report::ResultReporter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.backend {
        Backend::Host => {
            let platform = cli
                .threads
                .map_or_else(HostPlatform::new, |n| HostPlatform::with_thread_counts(&[n]));
            execute(&cli, &platform)
        }
        Backend::Cuda => execute_cuda(&cli),
    }
}

#[cfg(feature = "cuda")]
fn execute_cuda(cli: &Cli) -> Result<()> {
    execute(cli, &gpustream_core::device::CudaPlatform::new())
}

#[cfg(not(feature = "cuda"))]
fn execute_cuda(_cli: &Cli) -> Result<()> {
    anyhow::bail!("CUDA backend not available: rebuild with `--features cuda`")
}

fn execute<P>(cli: &Cli, platform: &P) -> Result<()>
where
    P: Platform,
    P::Device: DeviceBackend<f32> + DeviceBackend<f64>,
{
    let reporter = ResultReporter::new(cli.format());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if cli.list {
        let devices = platform
            .devices()
            .with_context(|| format!("listing {} devices", platform.name()))?;
        reporter.write_devices(&mut out, &devices)?;
        return Ok(());
    }

    let config: BenchmarkConfig = cli.config()?;
    reporter.write_header(&mut out, platform.name(), &config)?;
    out.flush()?;

    tracing::info!(
        backend = platform.name(),
        device = config.device_index(),
        array_size = config.array_size(),
        "Starting benchmark"
    );
    let report = run_benchmark(&config, platform)?;
    reporter.write_results(&mut out, &report)?;
    Ok(())
}
