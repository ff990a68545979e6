//! The five stream kernels.
//!
//! | Kernel | Operation              | Bytes per element |
//! |--------|------------------------|-------------------|
//! | Copy   | `C[i] = A[i]`          | 2 × sizeof(T)     |
//! | Mul    | `B[i] = M × C[i]`      | 2 × sizeof(T)     |
//! | Add    | `C[i] = A[i] + B[i]`   | 3 × sizeof(T)     |
//! | Triad  | `A[i] = B[i] + M × C[i]` | 3 × sizeof(T)   |
//! | Dot    | `Σ A[i] × B[i]`        | 2 × sizeof(T)     |
//!
//! Every call on [`KernelSet`] is synchronous: it enqueues the kernel, waits
//! for device completion and only then returns. The elapsed time reported in
//! [`Execution`] brackets exactly that launch-and-wait window.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::device::{BufferRole, DeviceBackend, DeviceContext};
use crate::error::{BackendError, ConfigurationError, KernelLaunchError, Result};
use crate::reduction::{fold_partials, DotGeometry};
use crate::types::StreamScalar;

/// Identifier of one stream kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Kernel {
    /// `C = A`
    Copy,
    /// `B = M * C`, also known as scale
    Mul,
    /// `C = A + B`
    Add,
    /// `A = B + M * C`
    Triad,
    /// `sum(A * B)`
    Dot,
}

impl Kernel {
    /// Every kernel, in execution order.
    pub const ALL: [Self; 5] = [Self::Copy, Self::Mul, Self::Add, Self::Triad, Self::Dot];

    /// Lowercase identifier.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Mul => "mul",
            Self::Add => "add",
            Self::Triad => "triad",
            Self::Dot => "dot",
        }
    }

    /// Label used in result tables.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Copy => "Copy",
            Self::Mul => "Mul",
            Self::Add => "Add",
            Self::Triad => "Triad",
            Self::Dot => "Dot",
        }
    }

    /// Number of arrays each element touches (reads plus writes).
    pub const fn arrays_touched(self) -> usize {
        match self {
            Self::Copy | Self::Mul | Self::Dot => 2,
            Self::Add | Self::Triad => 3,
        }
    }

    /// Bytes moved by one invocation over `array_size` elements of
    /// `element_bytes` each.
    ///
    /// Saturates instead of overflowing; validated configurations never
    /// reach the limit.
    pub const fn bytes_moved(self, array_size: usize, element_bytes: usize) -> usize {
        self.arrays_touched()
            .saturating_mul(array_size)
            .saturating_mul(element_bytes)
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kernel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "mul" | "scale" => Ok(Self::Mul),
            "add" => Ok(Self::Add),
            "triad" => Ok(Self::Triad),
            "dot" => Ok(Self::Dot),
            _ => Err(ConfigurationError::unknown_name(
                "kernel",
                s.trim(),
                "copy, mul (scale), add, triad, dot",
            )),
        }
    }
}

/// Outcome of one synchronous kernel call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Execution<T> {
    /// Time from launch to completion
    pub elapsed: Duration,
    /// Reduction result, only set for [`Kernel::Dot`]
    pub dot: Option<T>,
}

/// The kernels bound to one device context and scalar multiplier.
pub struct KernelSet<T: StreamScalar, D: DeviceBackend<T>> {
    context: DeviceContext<T, D>,
    scalar: T,
    geometry: DotGeometry,
    partials: Vec<T>,
}

impl<T: StreamScalar, D: DeviceBackend<T>> KernelSet<T, D> {
    /// Bind the kernels to `context`. Buffers A, B, C and the dot partial
    /// sums must be allocated before any kernel runs.
    pub fn new(context: DeviceContext<T, D>, scalar: T) -> Self {
        let geometry = DotGeometry::new(context.array_size());
        Self {
            partials: vec![T::zero(); geometry.groups],
            context,
            scalar,
            geometry,
        }
    }

    /// Scalar multiplier used by mul and triad.
    pub fn scalar(&self) -> T {
        self.scalar
    }

    /// Reduction launch geometry.
    pub fn geometry(&self) -> DotGeometry {
        self.geometry
    }

    /// Underlying device context.
    pub fn context(&self) -> &DeviceContext<T, D> {
        &self.context
    }

    /// Mutable access to the underlying device context.
    pub fn context_mut(&mut self) -> &mut DeviceContext<T, D> {
        &mut self.context
    }

    /// Give back the device context.
    pub fn into_context(self) -> DeviceContext<T, D> {
        self.context
    }

    /// `C = A`
    pub fn copy(&mut self) -> Result<Duration> {
        self.execute(Kernel::Copy).map(|e| e.elapsed)
    }

    /// `B = M * C`
    pub fn mul(&mut self) -> Result<Duration> {
        self.execute(Kernel::Mul).map(|e| e.elapsed)
    }

    /// `C = A + B`
    pub fn add(&mut self) -> Result<Duration> {
        self.execute(Kernel::Add).map(|e| e.elapsed)
    }

    /// `A = B + M * C`
    pub fn triad(&mut self) -> Result<Duration> {
        self.execute(Kernel::Triad).map(|e| e.elapsed)
    }

    /// `sum(A * B)` and the time it took.
    pub fn dot(&mut self) -> Result<(T, Duration)> {
        let execution = self.execute(Kernel::Dot)?;
        Ok((execution.dot.unwrap_or_else(T::zero), execution.elapsed))
    }

    /// Run `kernel` once, wait for completion and time it.
    pub fn execute(&mut self, kernel: Kernel) -> Result<Execution<T>> {
        let scalar = self.scalar;
        let geometry = self.geometry;
        let (device, buffers) = self.context.split()?;

        let start = Instant::now();
        let launched = match kernel {
            Kernel::Copy => device.copy(buffers.a, buffers.c),
            Kernel::Mul => device.mul(buffers.c, buffers.b, scalar),
            Kernel::Add => device.add(buffers.a, buffers.b, buffers.c),
            Kernel::Triad => device.triad(buffers.b, buffers.c, buffers.a, scalar),
            Kernel::Dot => device.dot_partials(buffers.a, buffers.b, buffers.sums, geometry),
        };
        let completed = launched.and_then(|()| device.synchronize());
        let dot = match (kernel, completed) {
            (_, Err(cause)) => return Err(KernelLaunchError::new(kernel, cause).into()),
            (Kernel::Dot, Ok(())) => Some(
                download_partials(device, buffers.sums, &mut self.partials)
                    .map(|()| fold_partials(&self.partials))
                    .map_err(|cause| KernelLaunchError::new(kernel, cause))?,
            ),
            (_, Ok(())) => None,
        };
        let elapsed = start.elapsed();

        tracing::trace!(%kernel, ?elapsed, "Kernel completed");
        Ok(Execution { elapsed, dot })
    }

    /// Copy the contents of `role` back to the host.
    pub fn read(&self, role: BufferRole) -> Result<Vec<T>> {
        self.context.read(role)
    }
}

fn download_partials<T: StreamScalar, D: DeviceBackend<T>>(
    device: &D,
    sums: &D::Buffer,
    partials: &mut [T],
) -> std::result::Result<(), BackendError> {
    let len = device.buffer_len(sums);
    if len < partials.len() {
        return Err(BackendError::LengthMismatch {
            expected: partials.len(),
            actual: len,
        });
    }
    if len == partials.len() {
        return device.download(sums, partials);
    }
    let mut all = vec![T::zero(); len];
    device.download(sums, &mut all)?;
    partials.copy_from_slice(&all[..partials.len()]);
    Ok(())
}

impl<T: StreamScalar, D: DeviceBackend<T>> fmt::Debug for KernelSet<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSet")
            .field("context", &self.context)
            .field("scalar", &self.scalar)
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}
