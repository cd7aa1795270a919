use nalgebra::RealField;

pub use nalgebra;

/// Scalar type accepted by the solvers and linear algebra in the `mach` crates.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// Euclidean inner product of two equally sized slices.
///
/// This is the single-rank counterpart of a distributed inner product; every
/// global reduction in `mach` goes through this function.
pub fn inner_product<T: Real>(a: &[T], b: &[T]) -> T {
    assert_eq!(a.len(), b.len(), "inner product requires slices of equal length");
    a.iter()
        .zip(b)
        .fold(T::zero(), |acc, (a_i, b_i)| acc + *a_i * *b_i)
}
