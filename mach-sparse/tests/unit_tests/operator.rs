use mach_sparse::{CsrTranspose, DiagonalOperator, IdentityOperator, LinearOperator};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use util::{convection_diffusion_1d, scrambled_vector};

#[test]
fn csr_apply_matches_dense_product() {
    let a = convection_diffusion_1d(7, 0.5);
    let dense = DMatrix::from(&a);
    let x = scrambled_vector(7, 3);

    let mut y = DVector::zeros(7);
    a.apply((&mut y).into(), (&x).into()).unwrap();
    assert_matrix_eq!(y, &dense * &x, comp = abs, tol = 1e-14);

    let mut y_dense = DVector::zeros(7);
    dense.apply((&mut y_dense).into(), (&x).into()).unwrap();
    assert_matrix_eq!(y_dense, &dense * &x, comp = abs, tol = 1e-14);
}

#[test]
fn csr_transpose_apply_matches_dense_transpose() {
    let a: CsrMatrix<f64> = convection_diffusion_1d(6, 2.0);
    let dense = DMatrix::from(&a);
    let x = scrambled_vector(6, 11);

    let mut y = DVector::zeros(6);
    CsrTranspose(&a).apply((&mut y).into(), (&x).into()).unwrap();
    assert_matrix_eq!(y, dense.transpose() * &x, comp = abs, tol = 1e-14);
}

#[test]
fn identity_and_diagonal_operators() {
    let x = DVector::from_column_slice(&[1.0, -2.0, 3.0]);
    let mut y = DVector::zeros(3);

    IdentityOperator.apply((&mut y).into(), (&x).into()).unwrap();
    assert_eq!(y, x);

    let diag = DiagonalOperator::new(DVector::from_column_slice(&[2.0, 0.5, -1.0]));
    diag.apply((&mut y).into(), (&x).into()).unwrap();
    assert_eq!(y, DVector::from_column_slice(&[2.0, -1.0, -3.0]));
}
