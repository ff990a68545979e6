//! Element-wise and reduction semantics of the stream kernels.
//!
//! Each test runs kernels on the host backend and checks the downloaded
//! arrays against the defining formula.

use approx::assert_relative_eq;
use gpustream_core::prelude::*;
use gpustream_core::reduction::{dot_tolerance, within_dot_tolerance, MAX_DOT_GROUPS};

const N: usize = 16 * BLOCK_SIZE;

fn kernel_set<T: StreamScalar>(
    array_size: usize,
    start: StartValues,
) -> KernelSet<T, HostDevice>
where
    HostDevice: DeviceBackend<T>,
{
    let platform = HostPlatform::with_thread_counts(&[4]);
    let mut context = DeviceContext::select(&platform, 0, array_size).unwrap();
    context.allocate_all().unwrap();
    context.initialize(BufferRole::A, T::narrow(start.a)).unwrap();
    context.initialize(BufferRole::B, T::narrow(start.b)).unwrap();
    context.initialize(BufferRole::C, T::narrow(start.c)).unwrap();
    KernelSet::new(context, T::narrow(start.scalar))
}

/// Dyadic values: every product and partial sum below is exact in f64.
fn ramp(len: usize) -> Vec<f64> {
    (0..len).map(|i| (1 + i % 97) as f64 * 0.125).collect()
}

#[test]
fn test_copy_is_exact() {
    let mut kernels = kernel_set::<f64>(N, StartValues::default());
    let a = ramp(N);
    kernels.context_mut().upload(BufferRole::A, &a).unwrap();

    kernels.copy().unwrap();

    let c = kernels.read(BufferRole::C).unwrap();
    assert_eq!(c, a);
}

#[test]
fn test_scale() {
    let mut kernels = kernel_set::<f64>(N, StartValues::default());
    let c = ramp(N);
    kernels.context_mut().upload(BufferRole::C, &c).unwrap();

    kernels.mul().unwrap();

    let b = kernels.read(BufferRole::B).unwrap();
    for (bi, ci) in b.iter().zip(&c) {
        assert_relative_eq!(*bi, 0.4 * ci, max_relative = f64::ELEMENT_TOLERANCE);
    }
}

#[test]
fn test_add() {
    let mut kernels = kernel_set::<f32>(N, StartValues::default());
    let a: Vec<f32> = ramp(N).into_iter().map(|v| v as f32).collect();
    kernels.context_mut().upload(BufferRole::A, &a).unwrap();

    kernels.add().unwrap();

    let c = kernels.read(BufferRole::C).unwrap();
    for (ci, ai) in c.iter().zip(&a) {
        assert_relative_eq!(*ci, ai + 0.2, max_relative = 1e-6);
    }
}

#[test]
fn test_triad() {
    let mut kernels = kernel_set::<f64>(N, StartValues::default());
    let b = ramp(N);
    kernels.context_mut().upload(BufferRole::B, &b).unwrap();

    kernels.triad().unwrap();

    let a = kernels.read(BufferRole::A).unwrap();
    for (ai, bi) in a.iter().zip(&b) {
        assert_relative_eq!(*ai, bi + 0.4 * 0.2, max_relative = f64::ELEMENT_TOLERANCE);
    }
}

#[test]
fn test_triad_from_start_values() {
    let mut kernels = kernel_set::<f64>(1024 * 1024, StartValues::default());
    kernels.triad().unwrap();
    let a = kernels.read(BufferRole::A).unwrap();
    assert!(a.iter().all(|&v| (v - 0.28).abs() < 1e-15));
}

#[test]
fn test_dot_matches_host_reference() {
    let mut kernels = kernel_set::<f64>(N, StartValues::default());
    let a = ramp(N);
    let b: Vec<f64> = ramp(N).into_iter().rev().collect();
    kernels.context_mut().upload(BufferRole::A, &a).unwrap();
    kernels.context_mut().upload(BufferRole::B, &b).unwrap();

    let (dot, elapsed) = kernels.dot().unwrap();

    let reference: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
    let geometry = kernels.geometry();
    assert!(elapsed.as_nanos() > 0);
    assert!(
        within_dot_tolerance::<f64>(dot, reference, &geometry),
        "dot {dot} vs reference {reference}, tolerance {}",
        dot_tolerance::<f64>(&geometry)
    );
}

#[test]
fn test_dot_strides_past_the_group_cap() {
    let n = 1024 * BLOCK_SIZE;
    let mut kernels = kernel_set::<f64>(n, StartValues::default());
    let a = ramp(n);
    let b: Vec<f64> = ramp(n + 31).into_iter().skip(31).rev().collect();
    kernels.context_mut().upload(BufferRole::A, &a).unwrap();
    kernels.context_mut().upload(BufferRole::B, &b).unwrap();

    let geometry = kernels.geometry();
    assert_eq!(geometry.groups, MAX_DOT_GROUPS);
    assert_eq!(geometry.stride, MAX_DOT_GROUPS * BLOCK_SIZE);
    assert_eq!(geometry.items_per_work_item(), 4);

    let (dot, _) = kernels.dot().unwrap();

    let reference: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
    assert!(
        within_dot_tolerance::<f64>(dot, reference, &geometry),
        "dot {dot} vs reference {reference}"
    );
    // Dyadic inputs: every partial sum is exact whatever the order
    assert_eq!(dot, reference);
}

#[test]
fn test_dot_single_precision() {
    let mut kernels = kernel_set::<f32>(N, StartValues::default());
    let a: Vec<f32> = ramp(N).into_iter().map(|v| v as f32).collect();
    kernels.context_mut().upload(BufferRole::A, &a).unwrap();

    let (dot, _) = kernels.dot().unwrap();

    let reference: f64 = a.iter().map(|&x| f64::from(x) * f64::from(0.2_f32)).sum();
    assert!(within_dot_tolerance::<f32>(
        f64::from(dot),
        reference,
        &kernels.geometry()
    ));
}

#[test]
fn test_dot_of_start_values() {
    let start = StartValues {
        a: 0.1,
        b: 0.2,
        ..StartValues::default()
    };
    let mut kernels = kernel_set::<f64>(1024, start);
    let (dot, _) = kernels.dot().unwrap();
    assert!(within_dot_tolerance::<f64>(dot, 20.48, &kernels.geometry()));
}

#[test]
fn test_dot_does_not_modify_inputs() {
    let mut kernels = kernel_set::<f64>(N, StartValues::default());
    kernels.dot().unwrap();
    assert!(kernels.read(BufferRole::A).unwrap().iter().all(|&v| v == 0.1));
    assert!(kernels.read(BufferRole::B).unwrap().iter().all(|&v| v == 0.2));
}

#[test]
fn test_reduction_is_independent_of_worker_count() {
    let a = ramp(N);
    let mut results = Vec::new();
    for threads in [1, 3, 8] {
        let platform = HostPlatform::with_thread_counts(&[threads]);
        let mut context: DeviceContext<f64, HostDevice> =
            DeviceContext::select(&platform, 0, N).unwrap();
        context.allocate_all().unwrap();
        context.upload(BufferRole::A, &a).unwrap();
        context.upload(BufferRole::B, &a).unwrap();
        let mut kernels = KernelSet::new(context, 0.4);
        results.push(kernels.dot().unwrap().0);
    }
    // Same geometry, same summation order
    assert!(results.windows(2).all(|w| w[0].to_bits() == w[1].to_bits()));
}
