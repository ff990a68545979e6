//! Two-phase dot-product reduction.
//!
//! Phase one runs on the device: the index space is covered by
//! [`DotGeometry::groups`] work-groups of [`DotGeometry::group_size`]
//! work-items. Each work-item accumulates `a[i] * b[i]` over a grid-stride
//! loop, stores its partial in group-shared scratch, and the group collapses
//! the scratch with a pairwise halving tree, one barrier per level. Phase two
//! folds the per-group partials on the host.
//!
//! Floating-point addition is not associative, so the result depends on the
//! geometry. Checks against a reference sum use [`dot_tolerance`].

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::BLOCK_SIZE;
use crate::types::StreamScalar;

/// Upper bound on the number of work-groups in the reduction grid.
pub const MAX_DOT_GROUPS: usize = 256;

/// Launch geometry of the reduction kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DotGeometry {
    /// Work-items per group, also the scratch length
    pub group_size: usize,
    /// Number of groups in the grid
    pub groups: usize,
    /// Total number of work-items (grid-stride step)
    pub stride: usize,
    /// Elements reduced
    pub len: usize,
}

impl DotGeometry {
    /// Geometry for arrays of `len` elements.
    pub fn new(len: usize) -> Self {
        let groups = (len / BLOCK_SIZE).clamp(1, MAX_DOT_GROUPS);
        Self {
            group_size: BLOCK_SIZE,
            groups,
            stride: groups * BLOCK_SIZE,
            len,
        }
    }

    /// Elements handled by the busiest work-item.
    pub fn items_per_work_item(&self) -> usize {
        self.len.div_ceil(self.stride)
    }

    /// Levels of the in-group tree.
    pub fn tree_depth(&self) -> usize {
        self.group_size.trailing_zeros() as usize
    }
}

/// Phase one for a single work-item: strided sum of products starting at
/// `global_id`.
#[inline]
pub fn work_item_partial<T: StreamScalar>(
    a: &[T],
    b: &[T],
    global_id: usize,
    stride: usize,
) -> T {
    let mut sum = T::zero();
    let mut i = global_id;
    while i < a.len() {
        sum = sum + a[i] * b[i];
        i += stride;
    }
    sum
}

/// In-group tree: at each level the lower half adds the upper half.
///
/// `scratch.len()` must be a power of two. The result ends up in
/// `scratch[0]`.
pub fn tree_reduce<T: StreamScalar>(scratch: &mut [T]) -> T {
    debug_assert!(scratch.len().is_power_of_two());
    let mut offset = scratch.len() / 2;
    while offset > 0 {
        let (lower, upper) = scratch.split_at_mut(offset);
        for (lo, &hi) in lower.iter_mut().zip(upper[..offset].iter()) {
            *lo = *lo + hi;
        }
        offset /= 2;
    }
    scratch.first().copied().unwrap_or_else(T::zero)
}

/// Phase two: sequential fold of the group partials.
pub fn fold_partials<T: StreamScalar>(partials: &[T]) -> T {
    partials.iter().fold(T::zero(), |acc, &p| acc + p)
}

/// Relative error bound for a dot product computed with `geometry`.
///
/// Each phase is a sequential or tree summation and contributes its length
/// (or depth) times the unit roundoff.
pub fn dot_tolerance<T: StreamScalar>(geometry: &DotGeometry) -> f64 {
    let steps = geometry.items_per_work_item() + geometry.tree_depth() + geometry.groups + 2;
    T::EPSILON.widen() * steps as f64
}

/// Whether `value` is within the reduction tolerance of `reference`.
pub fn within_dot_tolerance<T: StreamScalar>(
    value: f64,
    reference: f64,
    geometry: &DotGeometry,
) -> bool {
    if reference == 0.0 {
        return value.abs() <= dot_tolerance::<T>(geometry);
    }
    ((value - reference) / reference).abs() <= dot_tolerance::<T>(geometry)
}
