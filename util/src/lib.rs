use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Deterministic vector with entries in `[-1, 1]`, reproducible across platforms.
pub fn scrambled_vector(n: usize, seed: u64) -> DVector<f64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    DVector::from_fn(n, |_, _| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let bits = (state >> 11) as f64 / (1u64 << 53) as f64;
        2.0 * bits - 1.0
    })
}

/// The 1D finite-difference Laplacian `tridiag(-1, 2, -1)` of dimension `n`.
pub fn laplacian_1d(n: usize) -> CsrMatrix<f64> {
    convection_diffusion_1d(n, 0.0)
}

/// Upwinded 1D convection-diffusion matrix `tridiag(-1 - c, 2 + c, -1)`.
///
/// Nonsymmetric whenever `c != 0`, which makes it a useful GMRES test operator.
pub fn convection_diffusion_1d(n: usize, c: f64) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, 2.0 + c);
        if i > 0 {
            coo.push(i, i - 1, -1.0 - c);
        }
        if i + 1 < n {
            coo.push(i, i + 1, -1.0);
        }
    }
    CsrMatrix::from(&coo)
}

/// A symmetric positive definite dense matrix `A^T A + n I` built from a scrambled `A`.
pub fn spd_matrix(n: usize, seed: u64) -> DMatrix<f64> {
    let a = DMatrix::from_column_slice(n, n, scrambled_vector(n * n, seed).as_slice());
    a.transpose() * &a + DMatrix::identity(n, n) * n as f64
}
