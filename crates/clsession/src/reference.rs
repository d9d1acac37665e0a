//! CPU reference implementations matching the matrix kernels exactly.
//!
//! These prioritize correctness over speed and serve as the ground truth for
//! validating device results. All matrices are square and row-major:
//! `A[i][j] = a[i * m + j]`.

use std::fmt;

use bytemuck::Pod;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Smallest value produced by [`random_matrix`].
pub const MIN_VAL: i32 = 1;
/// Exclusive upper bound of values produced by [`random_matrix`].
pub const MAX_VAL: i32 = 1000;

/// Element type of a matrix that the kernels and the reference agree on.
pub trait MatrixElement: Pod + PartialEq + fmt::Debug + fmt::Display + Send + Sync {
    const ZERO: Self;
    /// OpenCL C spelling of the type.
    const CL_TYPE: &'static str;

    /// `acc + a * b` with the device's overflow semantics.
    fn mul_add(acc: Self, a: Self, b: Self) -> Self;

    fn from_i32(v: i32) -> Self;

    /// Equality up to rounding for floating-point types.
    fn approx_eq(self, other: Self) -> bool;
}

impl MatrixElement for i32 {
    const ZERO: Self = 0;
    const CL_TYPE: &'static str = "int";

    fn mul_add(acc: Self, a: Self, b: Self) -> Self {
        acc.wrapping_add(a.wrapping_mul(b))
    }

    fn from_i32(v: i32) -> Self {
        v
    }

    fn approx_eq(self, other: Self) -> bool {
        self == other
    }
}

impl MatrixElement for f32 {
    const ZERO: Self = 0.0;
    const CL_TYPE: &'static str = "float";

    fn mul_add(acc: Self, a: Self, b: Self) -> Self {
        acc + a * b
    }

    fn from_i32(v: i32) -> Self {
        v as f32
    }

    fn approx_eq(self, other: Self) -> bool {
        (self - other).abs() <= 1e-4 * self.abs().max(other.abs()).max(1.0)
    }
}

impl MatrixElement for f64 {
    const ZERO: Self = 0.0;
    const CL_TYPE: &'static str = "double";

    fn mul_add(acc: Self, a: Self, b: Self) -> Self {
        acc + a * b
    }

    fn from_i32(v: i32) -> Self {
        f64::from(v)
    }

    fn approx_eq(self, other: Self) -> bool {
        (self - other).abs() <= 1e-9 * self.abs().max(other.abs()).max(1.0)
    }
}

/// C = A * B for square `m × m` matrices.
pub fn ref_matmul<T: MatrixElement>(a: &[T], b: &[T], c: &mut [T], m: usize) {
    assert_eq!(a.len(), m * m, "A dimensions mismatch");
    assert_eq!(b.len(), m * m, "B dimensions mismatch");
    assert_eq!(c.len(), m * m, "C dimensions mismatch");

    for row in 0..m {
        for col in 0..m {
            let mut sum = T::ZERO;
            for k in 0..m {
                sum = T::mul_add(sum, a[row * m + k], b[k * m + col]);
            }
            c[row * m + col] = sum;
        }
    }
}

/// C = A * B where `b_trans` holds Bᵀ.
pub fn ref_matmul_trans<T: MatrixElement>(a: &[T], b_trans: &[T], c: &mut [T], m: usize) {
    assert_eq!(a.len(), m * m, "A dimensions mismatch");
    assert_eq!(b_trans.len(), m * m, "B dimensions mismatch");
    assert_eq!(c.len(), m * m, "C dimensions mismatch");

    for row in 0..m {
        for col in 0..m {
            let mut sum = T::ZERO;
            for k in 0..m {
                sum = T::mul_add(sum, a[row * m + k], b_trans[col * m + k]);
            }
            c[row * m + col] = sum;
        }
    }
}

/// Transpose of a square `m × m` matrix.
pub fn transpose<T: MatrixElement>(src: &[T], m: usize) -> Vec<T> {
    assert_eq!(src.len(), m * m, "matrix dimensions mismatch");
    let mut out = vec![T::ZERO; m * m];
    for i in 0..m {
        for j in 0..m {
            out[j * m + i] = src[i * m + j];
        }
    }
    out
}

/// `m × m` matrix with every element in `MIN_VAL..MAX_VAL`.
pub fn random_matrix<T: MatrixElement, R: Rng + ?Sized>(rng: &mut R, m: usize) -> Vec<T> {
    (0..m).flat_map(|_| 0..m).map(|_| T::from_i32(rng.gen_range(MIN_VAL..MAX_VAL))).collect()
}

/// Deterministic generator for reproducible runs.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Reset every element to zero.
pub fn clear_matrix<T: MatrixElement>(matrix: &mut [T]) {
    matrix.fill(T::ZERO);
}

/// Position of the first element where `actual` and `expected` differ.
pub fn first_mismatch<T: MatrixElement>(actual: &[T], expected: &[T]) -> Option<usize> {
    if actual.len() != expected.len() {
        return Some(actual.len().min(expected.len()));
    }
    actual.iter().zip(expected).position(|(&x, &y)| !x.approx_eq(y))
}
