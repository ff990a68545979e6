//! Host backend: a dedicated rayon pool plays the accelerator.
//!
//! Each kernel launch is cut into work-groups of
//! [`BLOCK_SIZE`](crate::config::BLOCK_SIZE) elements that are scheduled on
//! the pool. The reduction follows the device algorithm step by step (strided
//! per-work-item partial, group scratch, halving tree) so results match what
//! an accelerator with the same geometry would produce.
//!
//! Launches run to completion before returning, which makes
//! [`DeviceBackend::synchronize`] a no-op here.
//!
//! The reduction keeps the device's grid-stride access pattern: neighbouring
//! work-items read neighbouring elements, which coalesces on a GPU but hands
//! each CPU worker a strided walk. Host "Dot" bandwidth is therefore lower
//! than Copy or Triad and is not directly comparable with them.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{DeviceBackend, DeviceDescriptor, Platform};
use crate::config::BLOCK_SIZE;
use crate::error::BackendError;
use crate::reduction::{tree_reduce, work_item_partial, DotGeometry};
use crate::types::StreamScalar;

type BackendResult<T> = std::result::Result<T, BackendError>;

/// Host platform exposing one device per configured pool size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    thread_counts: Vec<usize>,
}

impl HostPlatform {
    /// A single device using every logical CPU.
    pub fn new() -> Self {
        Self {
            thread_counts: vec![num_cpus::get()],
        }
    }

    /// One device per entry, each with a pool of that many threads.
    pub fn with_thread_counts(thread_counts: &[usize]) -> Self {
        Self {
            thread_counts: thread_counts.iter().map(|&n| n.max(1)).collect(),
        }
    }

    fn descriptor(&self, index: usize, threads: usize) -> DeviceDescriptor {
        DeviceDescriptor {
            index,
            name: format!("Host CPU ({threads} threads)"),
            driver: format!("rayon thread pool, {} logical CPUs", num_cpus::get()),
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    type Device = HostDevice;

    fn name(&self) -> &str {
        "host"
    }

    fn devices(&self) -> BackendResult<Vec<DeviceDescriptor>> {
        Ok(self
            .thread_counts
            .iter()
            .enumerate()
            .map(|(index, &threads)| self.descriptor(index, threads))
            .collect())
    }

    fn open(&self, index: usize) -> BackendResult<HostDevice> {
        let threads = *self
            .thread_counts
            .get(index)
            .ok_or_else(|| BackendError::Bind(format!("no host device {index}")))?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gpustream-worker-{i}"))
            .build()
            .map_err(|e| BackendError::Bind(e.to_string()))?;
        Ok(HostDevice {
            descriptor: self.descriptor(index, threads),
            pool,
        })
    }
}

/// An opened host device.
#[derive(Debug)]
pub struct HostDevice {
    descriptor: DeviceDescriptor,
    pool: ThreadPool,
}

impl HostDevice {
    /// Enumeration entry of this device.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

fn check_len(expected: usize, actual: usize) -> BackendResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BackendError::LengthMismatch { expected, actual })
    }
}

impl<T: StreamScalar> DeviceBackend<T> for HostDevice {
    type Buffer = Vec<T>;

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn allocate(&self, len: usize) -> BackendResult<Vec<T>> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|e| BackendError::Allocation {
                bytes: len.saturating_mul(T::size_bytes()),
                reason: e.to_string(),
            })?;
        buffer.resize(len, T::zero());
        Ok(buffer)
    }

    fn release(&self, buffer: Vec<T>) -> BackendResult<()> {
        drop(buffer);
        Ok(())
    }

    fn buffer_len(&self, buffer: &Vec<T>) -> usize {
        buffer.len()
    }

    fn upload(&self, src: &[T], dst: &mut Vec<T>) -> BackendResult<()> {
        check_len(dst.len(), src.len())?;
        self.pool.install(|| {
            dst.par_chunks_mut(BLOCK_SIZE)
                .zip(src.par_chunks(BLOCK_SIZE))
                .for_each(|(d, s)| d.copy_from_slice(s));
        });
        Ok(())
    }

    fn download(&self, src: &Vec<T>, dst: &mut [T]) -> BackendResult<()> {
        check_len(src.len(), dst.len())?;
        self.pool.install(|| {
            dst.par_chunks_mut(BLOCK_SIZE)
                .zip(src.par_chunks(BLOCK_SIZE))
                .for_each(|(d, s)| d.copy_from_slice(s));
        });
        Ok(())
    }

    fn fill(&self, dst: &mut Vec<T>, value: T) -> BackendResult<()> {
        self.pool.install(|| {
            dst.par_chunks_mut(BLOCK_SIZE).for_each(|d| d.fill(value));
        });
        Ok(())
    }

    fn copy(&self, src: &Vec<T>, dst: &mut Vec<T>) -> BackendResult<()> {
        check_len(dst.len(), src.len())?;
        self.pool.install(|| {
            dst.par_chunks_mut(BLOCK_SIZE)
                .zip(src.par_chunks(BLOCK_SIZE))
                .for_each(|(d, s)| d.copy_from_slice(s));
        });
        Ok(())
    }

    fn mul(&self, src: &Vec<T>, dst: &mut Vec<T>, scalar: T) -> BackendResult<()> {
        check_len(dst.len(), src.len())?;
        self.pool.install(|| {
            dst.par_chunks_mut(BLOCK_SIZE)
                .zip(src.par_chunks(BLOCK_SIZE))
                .for_each(|(d, s)| {
                    for (x, &y) in d.iter_mut().zip(s) {
                        *x = scalar * y;
                    }
                });
        });
        Ok(())
    }

    fn add(&self, a: &Vec<T>, b: &Vec<T>, dst: &mut Vec<T>) -> BackendResult<()> {
        check_len(dst.len(), a.len())?;
        check_len(dst.len(), b.len())?;
        self.pool.install(|| {
            dst.par_chunks_mut(BLOCK_SIZE)
                .zip(a.par_chunks(BLOCK_SIZE))
                .zip(b.par_chunks(BLOCK_SIZE))
                .for_each(|((d, a), b)| {
                    for ((x, &p), &q) in d.iter_mut().zip(a).zip(b) {
                        *x = p + q;
                    }
                });
        });
        Ok(())
    }

    fn triad(&self, b: &Vec<T>, c: &Vec<T>, dst: &mut Vec<T>, scalar: T) -> BackendResult<()> {
        check_len(dst.len(), b.len())?;
        check_len(dst.len(), c.len())?;
        self.pool.install(|| {
            dst.par_chunks_mut(BLOCK_SIZE)
                .zip(b.par_chunks(BLOCK_SIZE))
                .zip(c.par_chunks(BLOCK_SIZE))
                .for_each(|((d, b), c)| {
                    for ((x, &p), &q) in d.iter_mut().zip(b).zip(c) {
                        *x = p + scalar * q;
                    }
                });
        });
        Ok(())
    }

    fn dot_partials(
        &self,
        a: &Vec<T>,
        b: &Vec<T>,
        partials: &mut Vec<T>,
        geometry: DotGeometry,
    ) -> BackendResult<()> {
        check_len(a.len(), b.len())?;
        check_len(geometry.len, a.len())?;
        if partials.len() < geometry.groups {
            return Err(BackendError::LengthMismatch {
                expected: geometry.groups,
                actual: partials.len(),
            });
        }

        let DotGeometry {
            group_size, stride, ..
        } = geometry;
        self.pool.install(|| {
            partials[..geometry.groups]
                .par_iter_mut()
                .enumerate()
                .for_each_init(
                    || vec![T::zero(); group_size],
                    |scratch, (group, out)| {
                        for (local, slot) in scratch.iter_mut().enumerate() {
                            *slot = work_item_partial(a, b, group * group_size + local, stride);
                        }
                        *out = tree_reduce(scratch);
                    },
                );
        });
        Ok(())
    }

    fn synchronize(&self) -> BackendResult<()> {
        Ok(())
    }
}
