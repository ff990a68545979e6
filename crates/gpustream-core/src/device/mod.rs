//! Device abstraction: platforms, backends and the per-run device context.
//!
//! A [`Platform`] enumerates the devices it can reach and opens one of them.
//! The opened device implements [`DeviceBackend`], the capability interface
//! every accelerator API has to provide: allocate, release, upload, download,
//! launch the stream kernels and wait for completion. [`DeviceContext`] binds
//! one such device to the buffers of a single benchmark run and owns them
//! until the run ends.
//!
//! # Backends
//!
//! - [`host`]: a dedicated worker pool stands in for the accelerator.
//!   Always available.
//! - `cuda`: NVIDIA devices through `cudarc`. Requires the `cuda` feature.

pub mod host;

#[cfg(feature = "cuda")]
pub mod cuda;

use std::fmt;
use std::marker::PhantomData;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, DeviceError, Result};
use crate::reduction::DotGeometry;
use crate::types::StreamScalar;

pub use host::{HostDevice, HostPlatform};

#[cfg(feature = "cuda")]
pub use cuda::{CudaDevice, CudaPlatform};

/// Description of one enumerated device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceDescriptor {
    /// Position in the platform enumeration
    pub index: usize,
    /// Display name
    pub name: String,
    /// Driver or runtime description
    pub driver: String,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.index, self.name, self.driver)
    }
}

/// Source of devices.
pub trait Platform {
    /// Device type produced by [`Platform::open`].
    type Device;

    /// Short name of the implementation, e.g. "host" or "CUDA".
    fn name(&self) -> &str;

    /// Ordered list of reachable devices.
    fn devices(&self) -> std::result::Result<Vec<DeviceDescriptor>, BackendError>;

    /// Open the device at `index` of [`Platform::devices`].
    fn open(&self, index: usize) -> std::result::Result<Self::Device, BackendError>;
}

/// Capability interface of an accelerator for one precision.
///
/// Launch methods only enqueue work; completion is observed through
/// [`DeviceBackend::synchronize`]. The arrays passed to one launch have the
/// same length, a multiple of the block size; only the dot partial-sum
/// buffer is shorter.
pub trait DeviceBackend<T: StreamScalar>: Send + Sync {
    /// Device-resident storage.
    type Buffer: Send;

    /// Enumeration entry of this device.
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Reserve storage for `len` elements.
    fn allocate(&self, len: usize) -> std::result::Result<Self::Buffer, BackendError>;

    /// Free storage.
    fn release(&self, buffer: Self::Buffer) -> std::result::Result<(), BackendError>;

    /// Number of elements a buffer holds.
    fn buffer_len(&self, buffer: &Self::Buffer) -> usize;

    /// Copy host data into a buffer.
    fn upload(&self, src: &[T], dst: &mut Self::Buffer) -> std::result::Result<(), BackendError>;

    /// Copy a buffer back to the host. Blocks until the data is available.
    fn download(&self, src: &Self::Buffer, dst: &mut [T])
        -> std::result::Result<(), BackendError>;

    /// `dst[i] = value`
    fn fill(&self, dst: &mut Self::Buffer, value: T) -> std::result::Result<(), BackendError>;

    /// `dst[i] = src[i]`
    fn copy(&self, src: &Self::Buffer, dst: &mut Self::Buffer)
        -> std::result::Result<(), BackendError>;

    /// `dst[i] = scalar * src[i]`
    fn mul(
        &self,
        src: &Self::Buffer,
        dst: &mut Self::Buffer,
        scalar: T,
    ) -> std::result::Result<(), BackendError>;

    /// `dst[i] = a[i] + b[i]`
    fn add(
        &self,
        a: &Self::Buffer,
        b: &Self::Buffer,
        dst: &mut Self::Buffer,
    ) -> std::result::Result<(), BackendError>;

    /// `dst[i] = b[i] + scalar * c[i]`
    fn triad(
        &self,
        b: &Self::Buffer,
        c: &Self::Buffer,
        dst: &mut Self::Buffer,
        scalar: T,
    ) -> std::result::Result<(), BackendError>;

    /// First phase of the dot product: one partial sum per work-group,
    /// written to `partials[0..geometry.groups]`.
    fn dot_partials(
        &self,
        a: &Self::Buffer,
        b: &Self::Buffer,
        partials: &mut Self::Buffer,
        geometry: DotGeometry,
    ) -> std::result::Result<(), BackendError>;

    /// Wait until every enqueued operation has completed.
    fn synchronize(&self) -> std::result::Result<(), BackendError>;
}

/// Buffers a run can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BufferRole {
    /// Array A
    A,
    /// Array B
    B,
    /// Array C
    C,
    /// Per-group partial sums of the dot product
    DotSums,
}

impl BufferRole {
    /// The three benchmark arrays.
    pub const ARRAYS: [Self; 3] = [Self::A, Self::B, Self::C];

    const fn slot(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::DotSums => 3,
        }
    }
}

impl fmt::Display for BufferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::B => f.write_str("B"),
            Self::C => f.write_str("C"),
            Self::DotSums => f.write_str("dot sums"),
        }
    }
}

#[derive(Debug)]
enum Slot<B> {
    Empty,
    Live(B),
    Released,
}

impl<B> Slot<B> {
    fn live_mut(&mut self, role: BufferRole) -> Result<&mut B> {
        match self {
            Self::Live(buffer) => Ok(buffer),
            _ => Err(DeviceError::NotAllocated { role }.into()),
        }
    }
}

/// Mutable view of every live buffer, split so kernels can read some
/// buffers while writing another.
pub(crate) struct BufferSet<'a, B> {
    pub a: &'a mut B,
    pub b: &'a mut B,
    pub c: &'a mut B,
    pub sums: &'a mut B,
}

/// A bound device and the buffers of one benchmark run.
///
/// Created once per run. Buffers are released explicitly with
/// [`DeviceContext::release`] or [`DeviceContext::release_all`]; any buffer
/// still live when the context is dropped is released then.
pub struct DeviceContext<T: StreamScalar, D: DeviceBackend<T>> {
    device: D,
    array_size: usize,
    slots: [Slot<D::Buffer>; 4],
    _scalar: PhantomData<T>,
}

impl<T: StreamScalar, D: DeviceBackend<T>> DeviceContext<T, D> {
    /// Bind to the device at `index` of the platform's enumeration.
    pub fn select<P>(platform: &P, index: usize, array_size: usize) -> Result<Self>
    where
        P: Platform<Device = D>,
    {
        let devices = platform
            .devices()
            .map_err(|source| DeviceError::Enumeration { source })?;
        if index >= devices.len() {
            return Err(DeviceError::InvalidIndex {
                index,
                available: devices.len(),
            }
            .into());
        }

        let device = platform
            .open(index)
            .map_err(|source| DeviceError::Bind { index, source })?;
        tracing::info!(
            platform = platform.name(),
            device = %device.descriptor(),
            "Using device"
        );

        Ok(Self::from_device(device, array_size))
    }

    /// Wrap an already opened device.
    pub fn from_device(device: D, array_size: usize) -> Self {
        Self {
            device,
            array_size,
            slots: [Slot::Empty, Slot::Empty, Slot::Empty, Slot::Empty],
            _scalar: PhantomData,
        }
    }

    /// The bound device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Number of elements in each benchmark array.
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Whether `role` currently holds device storage.
    pub fn is_allocated(&self, role: BufferRole) -> bool {
        matches!(self.slots[role.slot()], Slot::Live(_))
    }

    /// Reserve `count` elements of device storage for `role`.
    ///
    /// A role that was released may be allocated again.
    pub fn allocate(&mut self, count: usize, role: BufferRole) -> Result<()> {
        if self.is_allocated(role) {
            return Err(DeviceError::AlreadyAllocated { role }.into());
        }
        let bytes = count.saturating_mul(T::size_bytes());
        let buffer = self
            .device
            .allocate(count)
            .map_err(|source| DeviceError::Allocation {
                role,
                count,
                bytes,
                source,
            })?;
        tracing::info!(%role, count, bytes, "Allocated buffer");
        self.slots[role.slot()] = Slot::Live(buffer);
        Ok(())
    }

    /// Allocate A, B, C and the dot partial-sum buffer for this run.
    pub fn allocate_all(&mut self) -> Result<()> {
        for role in BufferRole::ARRAYS {
            self.allocate(self.array_size, role)?;
        }
        let sums = DotGeometry::new(self.array_size).groups.max(1);
        self.allocate(sums, BufferRole::DotSums)
    }

    /// Free the storage of `role`. Releasing twice is an error.
    pub fn release(&mut self, role: BufferRole) -> Result<()> {
        let slot = std::mem::replace(&mut self.slots[role.slot()], Slot::Released);
        match slot {
            Slot::Live(buffer) => {
                self.device
                    .release(buffer)
                    .map_err(|source| DeviceError::Release { role, source })?;
                tracing::debug!(%role, "Released buffer");
                Ok(())
            }
            Slot::Released => Err(DeviceError::DoubleRelease { role }.into()),
            Slot::Empty => {
                self.slots[role.slot()] = Slot::Empty;
                Err(DeviceError::NotAllocated { role }.into())
            }
        }
    }

    /// Release every live buffer. The first failure is returned after all
    /// releases have been attempted.
    pub fn release_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for role in [BufferRole::A, BufferRole::B, BufferRole::C, BufferRole::DotSums] {
            if self.is_allocated(role) {
                if let Err(err) = self.release(role) {
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Fill every element of `role` with `value` and wait for completion.
    pub fn initialize(&mut self, role: BufferRole, value: T) -> Result<()> {
        let buffer = self.slots[role.slot()].live_mut(role)?;
        self.device
            .fill(buffer, value)
            .and_then(|()| self.device.synchronize())
            .map_err(|source| DeviceError::Transfer { role, source })?;
        Ok(())
    }

    /// Copy host values into `role`.
    pub fn upload(&mut self, role: BufferRole, values: &[T]) -> Result<()> {
        let buffer = self.slots[role.slot()].live_mut(role)?;
        self.device
            .upload(values, buffer)
            .map_err(|source| DeviceError::Transfer { role, source })?;
        Ok(())
    }

    /// Copy the contents of `role` back to the host.
    pub fn read(&self, role: BufferRole) -> Result<Vec<T>> {
        let buffer = match &self.slots[role.slot()] {
            Slot::Live(buffer) => buffer,
            _ => return Err(DeviceError::NotAllocated { role }.into()),
        };
        let mut values = vec![T::zero(); self.device.buffer_len(buffer)];
        self.device
            .download(buffer, &mut values)
            .map_err(|source| DeviceError::Transfer { role, source })?;
        Ok(values)
    }

    pub(crate) fn split(&mut self) -> Result<(&D, BufferSet<'_, D::Buffer>)> {
        let [a, b, c, sums] = &mut self.slots;
        let set = BufferSet {
            a: a.live_mut(BufferRole::A)?,
            b: b.live_mut(BufferRole::B)?,
            c: c.live_mut(BufferRole::C)?,
            sums: sums.live_mut(BufferRole::DotSums)?,
        };
        Ok((&self.device, set))
    }
}

impl<T: StreamScalar, D: DeviceBackend<T>> Drop for DeviceContext<T, D> {
    fn drop(&mut self) {
        if let Err(err) = self.release_all() {
            tracing::warn!(error = %err, "Buffer teardown failed");
        }
    }
}

impl<T: StreamScalar, D: DeviceBackend<T>> fmt::Debug for DeviceContext<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", self.device.descriptor())
            .field("array_size", &self.array_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;

    fn context() -> DeviceContext<f64, HostDevice> {
        let platform = HostPlatform::with_thread_counts(&[2]);
        DeviceContext::select(&platform, 0, 2048).unwrap()
    }

    #[test]
    fn test_select_out_of_range() {
        let platform = HostPlatform::with_thread_counts(&[1, 2]);
        let err = DeviceContext::<f64, _>::select(&platform, 99, 1024).unwrap_err();
        assert_eq!(
            err,
            StreamError::Device(DeviceError::InvalidIndex {
                index: 99,
                available: 2
            })
        );
    }

    #[test]
    fn test_allocate_initialize_read() {
        let mut ctx = context();
        ctx.allocate(2048, BufferRole::A).unwrap();
        ctx.initialize(BufferRole::A, 0.5).unwrap();
        let values = ctx.read(BufferRole::A).unwrap();
        assert_eq!(values.len(), 2048);
        assert!(values.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_double_release_is_rejected() {
        let mut ctx = context();
        ctx.allocate(1024, BufferRole::B).unwrap();
        ctx.release(BufferRole::B).unwrap();
        let err = ctx.release(BufferRole::B).unwrap_err();
        assert_eq!(
            err,
            StreamError::Device(DeviceError::DoubleRelease { role: BufferRole::B })
        );
    }

    #[test]
    fn test_release_of_unallocated_buffer() {
        let mut ctx = context();
        let err = ctx.release(BufferRole::C).unwrap_err();
        assert_eq!(
            err,
            StreamError::Device(DeviceError::NotAllocated { role: BufferRole::C })
        );
        // Still allocatable afterwards
        ctx.allocate(1024, BufferRole::C).unwrap();
    }

    #[test]
    fn test_use_after_release() {
        let mut ctx = context();
        ctx.allocate(1024, BufferRole::A).unwrap();
        ctx.release(BufferRole::A).unwrap();
        assert!(ctx.initialize(BufferRole::A, 1.0).is_err());
        assert!(ctx.read(BufferRole::A).is_err());
    }

    #[test]
    fn test_allocate_all_then_split() {
        let mut ctx = context();
        assert!(ctx.split().is_err());
        ctx.allocate_all().unwrap();
        assert!(BufferRole::ARRAYS.iter().all(|&r| ctx.is_allocated(r)));
        assert!(ctx.is_allocated(BufferRole::DotSums));
        assert!(ctx.split().is_ok());

        ctx.release_all().unwrap();
        assert!(!ctx.is_allocated(BufferRole::A));
        // Nothing left to release
        ctx.release_all().unwrap();
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_unsatisfiable_allocation_is_a_device_error() {
        let mut ctx = context();
        let err = ctx.allocate(1 << 61, BufferRole::A).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Device(DeviceError::Allocation {
                role: BufferRole::A,
                count,
                bytes: usize::MAX,
                ..
            }) if count == 1 << 61
        ));
        assert!(!ctx.is_allocated(BufferRole::A));
    }

    #[test]
    fn test_double_allocation_is_rejected() {
        let mut ctx = context();
        ctx.allocate(1024, BufferRole::A).unwrap();
        let err = ctx.allocate(1024, BufferRole::A).unwrap_err();
        assert_eq!(
            err,
            StreamError::Device(DeviceError::AlreadyAllocated { role: BufferRole::A })
        );
    }
}
