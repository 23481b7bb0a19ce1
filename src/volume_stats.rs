//! Agreement statistics between two 3D label volumes.
//!
//! Every function accepts any pair of [`ndarray`] arrays whose elements
//! convert losslessly into `f64` (`u8`, `u16`, `i16`, `u32`, `f32`, ...).
//! Values greater than zero are foreground, zero is background.
//!
//! A ratio that is undefined because both volumes are empty for the measured
//! quantity is reported as [`UNDEFINED_METRIC`] (`-1.0`). That value is a
//! regular result, not an error: check it with [`is_defined`] before
//! treating a score as a similarity.

use ndarray::{Array, ArrayBase, Data, Dimension};
use thiserror::Error;

/// Returned when both inputs are empty for the quantity being measured.
pub const UNDEFINED_METRIC: f64 = -1.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VolumeStatsError {
    #[error("{operation}: expecting 3 dimensional inputs, got {a:?} and {b:?}")]
    Rank {
        operation: &'static str,
        a: Vec<usize>,
        b: Vec<usize>,
    },

    #[error("{operation}: expecting inputs of the same shape, got {a:?} and {b:?}")]
    ShapeMismatch {
        operation: &'static str,
        a: Vec<usize>,
        b: Vec<usize>,
    },
}

/// `false` for the [`UNDEFINED_METRIC`] sentinel.
#[inline]
pub fn is_defined(score: f64) -> bool {
    score != UNDEFINED_METRIC
}

/// Checks that both inputs are 3D and share one shape.
pub(crate) fn check_volumes<S1, S2, D1, D2>(
    operation: &'static str,
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<(), VolumeStatsError>
where
    S1: Data,
    S2: Data,
    D1: Dimension,
    D2: Dimension,
{
    if a.ndim() != 3 || b.ndim() != 3 {
        return Err(VolumeStatsError::Rank {
            operation,
            a: a.shape().to_vec(),
            b: b.shape().to_vec(),
        });
    }
    if a.shape() != b.shape() {
        return Err(VolumeStatsError::ShapeMismatch {
            operation,
            a: a.shape().to_vec(),
            b: b.shape().to_vec(),
        });
    }
    Ok(())
}

/// Foreground mask as a fresh array; the input is left untouched.
fn binarize<A, S, D>(volume: &ArrayBase<S, D>) -> Array<u8, D>
where
    A: Copy + Into<f64>,
    S: Data<Elem = A>,
    D: Dimension,
{
    volume.mapv(|v| u8::from(v.into() > 0.0))
}

/// Returns (intersection, foreground of a, foreground of b) over binarized inputs.
fn overlap_counts<A, S1, S2, D1, D2>(a: &ArrayBase<S1, D1>, b: &ArrayBase<S2, D2>) -> (u64, u64, u64)
where
    A: Copy + Into<f64>,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    D1: Dimension,
    D2: Dimension,
{
    let a_mask = binarize(a);
    let b_mask = binarize(b);

    a_mask
        .iter()
        .zip(b_mask.iter())
        .fold((0, 0, 0), |(both, in_a, in_b), (&x, &y)| {
            (
                both + u64::from(x & y),
                in_a + u64::from(x),
                in_b + u64::from(y),
            )
        })
}

/// Dice similarity coefficient of the foreground of two volumes.
///
/// Returns `2·|A∩B| / (|A| + |B|)`, or [`UNDEFINED_METRIC`] when both
/// volumes are entirely background.
///
/// # Errors
///
/// [`VolumeStatsError::Rank`] if either input is not 3D,
/// [`VolumeStatsError::ShapeMismatch`] if the shapes differ.
pub fn dice3d<A, S1, S2, D1, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<f64, VolumeStatsError>
where
    A: Copy + Into<f64>,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    D1: Dimension,
    D2: Dimension,
{
    check_volumes("dice3d", a, b)?;

    let (intersection, in_a, in_b) = overlap_counts(a, b);
    let volumes = in_a + in_b;
    if volumes == 0 {
        return Ok(UNDEFINED_METRIC);
    }
    Ok(2.0 * intersection as f64 / volumes as f64)
}

/// Jaccard index of the foreground of two volumes.
///
/// Returns `|A∩B| / |A∪B|`, or [`UNDEFINED_METRIC`] when the union is empty.
///
/// # Errors
///
/// Same as [`dice3d`].
pub fn jaccard3d<A, S1, S2, D1, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<f64, VolumeStatsError>
where
    A: Copy + Into<f64>,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    D1: Dimension,
    D2: Dimension,
{
    check_volumes("jaccard3d", a, b)?;

    let (intersection, in_a, in_b) = overlap_counts(a, b);
    let union = in_a + in_b - intersection;
    if union == 0 {
        return Ok(UNDEFINED_METRIC);
    }
    Ok(intersection as f64 / union as f64)
}

/// Sensitivity computed over raw label values.
///
/// `tp` is the sum of `a` where `a == b`, `fn` the sum of `a` where they
/// differ. Disagreements are weighted by the label value in `a`, so for
/// multi-class volumes this is not a voxel-count ratio.
///
/// # Errors
///
/// Same as [`dice3d`].
pub fn sensitivity<A, S1, S2, D1, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<f64, VolumeStatsError>
where
    A: Copy + Into<f64>,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    D1: Dimension,
    D2: Dimension,
{
    check_volumes("sensitivity", a, b)?;

    let (tp, fn_) = a
        .iter()
        .zip(b.iter())
        .fold((0.0_f64, 0.0_f64), |(tp, fn_), (&x, &y)| {
            let (x, y): (f64, f64) = (x.into(), y.into());
            if x == y { (tp + x, fn_) } else { (tp, fn_ + x) }
        });

    if tp + fn_ == 0.0 {
        return Ok(UNDEFINED_METRIC);
    }
    Ok(tp / (tp + fn_))
}

/// Specificity: `tn / (tn + fp)` where `tn` counts voxels that are
/// background in both volumes and `fp` counts voxels where `b` is background
/// but `a` is not.
///
/// # Errors
///
/// Same as [`dice3d`].
pub fn specificity<A, S1, S2, D1, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<f64, VolumeStatsError>
where
    A: Copy + Into<f64>,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    D1: Dimension,
    D2: Dimension,
{
    check_volumes("specificity", a, b)?;

    let (tn, fp) = a
        .iter()
        .zip(b.iter())
        .fold((0_u64, 0_u64), |(tn, fp), (&x, &y)| {
            let (x, y): (f64, f64) = (x.into(), y.into());
            let tn = tn + u64::from(x == 0.0 && y == 0.0);
            let fp = fp + u64::from(x != y && y == 0.0);
            (tn, fp)
        });

    if tn + fp == 0 {
        return Ok(UNDEFINED_METRIC);
    }
    Ok(tn as f64 / (tn + fp) as f64)
}
