//! CUDA backend built on `cudarc`.
//!
//! The stream kernels are compiled with NVRTC when a device is opened, once
//! for `float` and once for `double`. Element-wise kernels launch
//! `len / 1024` blocks of 1024 threads. The dot kernel launches
//! [`DotGeometry::groups`] blocks that reduce into `__shared__` scratch with a
//! `__syncthreads()` between tree levels and write one partial per block.
//! Element indices are `size_t`, so arrays past 2^31 elements address
//! correctly.
#![allow(unsafe_code)]

use std::sync::Arc;

use cudarc::driver::{
    CudaContext, CudaFunction, CudaSlice, CudaStream, DeviceRepr, LaunchArgs, LaunchConfig,
    PushKernelArg, ValidAsZeroBits,
};
use cudarc::nvrtc::compile_ptx;

use super::{DeviceBackend, DeviceDescriptor, Platform};
use crate::config::BLOCK_SIZE;
use crate::error::BackendError;
use crate::reduction::DotGeometry;
use crate::types::{ScalarType, StreamScalar};

type BackendResult<T> = std::result::Result<T, BackendError>;

const THREADS_PER_BLOCK: u32 = 1024;

const STREAM_KERNELS_SRC: &str = r#"
#define TBSIZE 1024

#define STREAM_KERNELS(T)                                                          \
extern "C" __global__ void fill_##T(T *a, const T value) {                         \
    const size_t i = (size_t)blockDim.x * blockIdx.x + threadIdx.x;                \
    a[i] = value;                                                                  \
}                                                                                  \
extern "C" __global__ void copy_##T(const T *a, T *c) {                            \
    const size_t i = (size_t)blockDim.x * blockIdx.x + threadIdx.x;                \
    c[i] = a[i];                                                                   \
}                                                                                  \
extern "C" __global__ void mul_##T(const T *c, T *b, const T scalar) {             \
    const size_t i = (size_t)blockDim.x * blockIdx.x + threadIdx.x;                \
    b[i] = scalar * c[i];                                                          \
}                                                                                  \
extern "C" __global__ void add_##T(const T *a, const T *b, T *c) {                 \
    const size_t i = (size_t)blockDim.x * blockIdx.x + threadIdx.x;                \
    c[i] = a[i] + b[i];                                                            \
}                                                                                  \
extern "C" __global__ void triad_##T(const T *b, const T *c, T *a, const T scalar) { \
    const size_t i = (size_t)blockDim.x * blockIdx.x + threadIdx.x;                \
    a[i] = b[i] + scalar * c[i];                                                   \
}                                                                                  \
extern "C" __global__ void dot_##T(const T *a, const T *b, T *sums, const size_t n) { \
    __shared__ T tb_sum[TBSIZE];                                                   \
    const unsigned int local_i = threadIdx.x;                                      \
    const size_t stride = (size_t)blockDim.x * gridDim.x;                          \
    tb_sum[local_i] = 0;                                                           \
    for (size_t i = (size_t)blockDim.x * blockIdx.x + local_i; i < n; i += stride) \
        tb_sum[local_i] += a[i] * b[i];                                            \
    for (unsigned int offset = blockDim.x / 2; offset > 0; offset /= 2) {          \
        __syncthreads();                                                           \
        if (local_i < offset) tb_sum[local_i] += tb_sum[local_i + offset];         \
    }                                                                              \
    if (local_i == 0) sums[blockIdx.x] = tb_sum[0];                                \
}

STREAM_KERNELS(float)
STREAM_KERNELS(double)
"#;

/// NVIDIA devices visible to the CUDA driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct CudaPlatform;

impl CudaPlatform {
    /// Create the platform. The driver is only queried on use.
    pub fn new() -> Self {
        Self
    }
}

fn describe(index: usize) -> BackendResult<DeviceDescriptor> {
    let ctx = CudaContext::new(index).map_err(|e| BackendError::Enumeration(e.to_string()))?;
    let name = ctx
        .name()
        .map_err(|e| BackendError::Enumeration(e.to_string()))?;
    Ok(DeviceDescriptor {
        index,
        name,
        driver: "CUDA driver".to_string(),
    })
}

impl Platform for CudaPlatform {
    type Device = CudaDevice;

    fn name(&self) -> &str {
        "CUDA"
    }

    fn devices(&self) -> BackendResult<Vec<DeviceDescriptor>> {
        let count =
            CudaContext::device_count().map_err(|e| BackendError::Enumeration(e.to_string()))?;
        let count = usize::try_from(count).unwrap_or(0);
        (0..count).map(describe).collect()
    }

    fn open(&self, index: usize) -> BackendResult<CudaDevice> {
        let descriptor = describe(index).map_err(|e| BackendError::Bind(e.to_string()))?;
        let ctx = CudaContext::new(index).map_err(|e| BackendError::Bind(e.to_string()))?;
        let stream = ctx.default_stream();

        let ptx = compile_ptx(STREAM_KERNELS_SRC)
            .map_err(|e| BackendError::Bind(format!("NVRTC compilation failed: {e:?}")))?;
        let module = ctx
            .load_module(ptx)
            .map_err(|e| BackendError::Bind(e.to_string()))?;

        let load = |kernel: &str, ty: &str| {
            module
                .load_function(&format!("{kernel}_{ty}"))
                .map_err(|e| BackendError::Bind(format!("{kernel}_{ty}: {e}")))
        };
        let table = |ty: &str| -> BackendResult<KernelTable> {
            Ok(KernelTable {
                fill: load("fill", ty)?,
                copy: load("copy", ty)?,
                mul: load("mul", ty)?,
                add: load("add", ty)?,
                triad: load("triad", ty)?,
                dot: load("dot", ty)?,
            })
        };

        Ok(CudaDevice {
            descriptor,
            float: table(<f32 as StreamScalar>::TYPE_NAME)?,
            double: table(<f64 as StreamScalar>::TYPE_NAME)?,
            stream,
            _ctx: ctx,
        })
    }
}

struct KernelTable {
    fill: CudaFunction,
    copy: CudaFunction,
    mul: CudaFunction,
    add: CudaFunction,
    triad: CudaFunction,
    dot: CudaFunction,
}

/// An opened CUDA device with its compiled kernels.
pub struct CudaDevice {
    descriptor: DeviceDescriptor,
    _ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    float: KernelTable,
    double: KernelTable,
}

impl std::fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaDevice")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl CudaDevice {
    /// Enumeration entry of this device.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn kernels<T: StreamScalar>(&self) -> &KernelTable {
        match T::SCALAR_TYPE {
            ScalarType::Float32 => &self.float,
            ScalarType::Float64 => &self.double,
        }
    }
}

fn launch_config(blocks: usize) -> BackendResult<LaunchConfig> {
    let grid = u32::try_from(blocks).map_err(|_| {
        BackendError::Launch(format!("grid of {blocks} blocks exceeds the launch limit"))
    })?;
    Ok(LaunchConfig {
        grid_dim: (grid, 1, 1),
        block_dim: (THREADS_PER_BLOCK, 1, 1),
        shared_mem_bytes: 0,
    })
}

fn fire(mut builder: LaunchArgs<'_>, config: LaunchConfig) -> BackendResult<()> {
    // Safety: every argument list matches its kernel signature in
    // STREAM_KERNELS_SRC and buffers hold `grid * THREADS_PER_BLOCK` elements.
    unsafe { builder.launch(config) }
        .map(|_| ())
        .map_err(|e| BackendError::Launch(e.to_string()))
}

fn check_len(expected: usize, actual: usize) -> BackendResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BackendError::LengthMismatch { expected, actual })
    }
}

impl<T> DeviceBackend<T> for CudaDevice
where
    T: StreamScalar + DeviceRepr + ValidAsZeroBits,
{
    type Buffer = CudaSlice<T>;

    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn allocate(&self, len: usize) -> BackendResult<CudaSlice<T>> {
        self.stream
            .alloc_zeros::<T>(len)
            .map_err(|e| BackendError::Allocation {
                bytes: len.saturating_mul(T::size_bytes()),
                reason: e.to_string(),
            })
    }

    fn release(&self, buffer: CudaSlice<T>) -> BackendResult<()> {
        drop(buffer);
        Ok(())
    }

    fn buffer_len(&self, buffer: &CudaSlice<T>) -> usize {
        buffer.len()
    }

    fn upload(&self, src: &[T], dst: &mut CudaSlice<T>) -> BackendResult<()> {
        check_len(dst.len(), src.len())?;
        self.stream
            .memcpy_htod(src, dst)
            .map_err(|e| BackendError::Transfer(e.to_string()))
    }

    fn download(&self, src: &CudaSlice<T>, dst: &mut [T]) -> BackendResult<()> {
        check_len(src.len(), dst.len())?;
        self.stream
            .memcpy_dtoh(src, dst)
            .map_err(|e| BackendError::Transfer(e.to_string()))?;
        self.stream
            .synchronize()
            .map_err(|e| BackendError::Synchronize(e.to_string()))
    }

    fn fill(&self, dst: &mut CudaSlice<T>, value: T) -> BackendResult<()> {
        let config = launch_config(dst.len() / BLOCK_SIZE)?;
        let mut builder = self.stream.launch_builder(&self.kernels::<T>().fill);
        builder.arg(dst);
        builder.arg(&value);
        fire(builder, config)
    }

    fn copy(&self, src: &CudaSlice<T>, dst: &mut CudaSlice<T>) -> BackendResult<()> {
        check_len(dst.len(), src.len())?;
        let config = launch_config(dst.len() / BLOCK_SIZE)?;
        let mut builder = self.stream.launch_builder(&self.kernels::<T>().copy);
        builder.arg(src);
        builder.arg(dst);
        fire(builder, config)
    }

    fn mul(&self, src: &CudaSlice<T>, dst: &mut CudaSlice<T>, scalar: T) -> BackendResult<()> {
        check_len(dst.len(), src.len())?;
        let config = launch_config(dst.len() / BLOCK_SIZE)?;
        let mut builder = self.stream.launch_builder(&self.kernels::<T>().mul);
        builder.arg(src);
        builder.arg(dst);
        builder.arg(&scalar);
        fire(builder, config)
    }

    fn add(
        &self,
        a: &CudaSlice<T>,
        b: &CudaSlice<T>,
        dst: &mut CudaSlice<T>,
    ) -> BackendResult<()> {
        check_len(dst.len(), a.len())?;
        check_len(dst.len(), b.len())?;
        let config = launch_config(dst.len() / BLOCK_SIZE)?;
        let mut builder = self.stream.launch_builder(&self.kernels::<T>().add);
        builder.arg(a);
        builder.arg(b);
        builder.arg(dst);
        fire(builder, config)
    }

    fn triad(
        &self,
        b: &CudaSlice<T>,
        c: &CudaSlice<T>,
        dst: &mut CudaSlice<T>,
        scalar: T,
    ) -> BackendResult<()> {
        check_len(dst.len(), b.len())?;
        check_len(dst.len(), c.len())?;
        let config = launch_config(dst.len() / BLOCK_SIZE)?;
        let mut builder = self.stream.launch_builder(&self.kernels::<T>().triad);
        builder.arg(b);
        builder.arg(c);
        builder.arg(dst);
        builder.arg(&scalar);
        fire(builder, config)
    }

    fn dot_partials(
        &self,
        a: &CudaSlice<T>,
        b: &CudaSlice<T>,
        partials: &mut CudaSlice<T>,
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
        let n = u64::try_from(geometry.len).map_err(|_| {
            BackendError::Launch(format!("{} elements exceed the kernel index range", geometry.len))
        })?;
        let config = launch_config(geometry.groups)?;
        let mut builder = self.stream.launch_builder(&self.kernels::<T>().dot);
        builder.arg(a);
        builder.arg(b);
        builder.arg(partials);
        builder.arg(&n);
        fire(builder, config)
    }

    fn synchronize(&self) -> BackendResult<()> {
        self.stream
            .synchronize()
            .map_err(|e| BackendError::Synchronize(e.to_string()))
    }
}
