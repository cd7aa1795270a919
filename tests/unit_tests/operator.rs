use mach::operator::JacobianOperator;
use mach::sparse::LinearOperator;
use mach::MachError;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use util::{laplacian_1d, scrambled_vector};

fn operators(n: usize) -> Vec<JacobianOperator> {
    vec![
        JacobianOperator::Identity(n),
        JacobianOperator::Diagonal(DVector::from_fn(n, |i, _| 1.0 + i as f64)),
        JacobianOperator::Sparse(laplacian_1d(n)),
        JacobianOperator::Dense(DMatrix::from_fn(n, n, |i, j| (i * n + j) as f64 / 7.0)),
    ]
}

#[test]
fn add_scaled_matches_dense_arithmetic_for_every_pair() {
    let n = 4;
    for a in operators(n) {
        for b in operators(n) {
            let sum = a.add_scaled(0.25, &b).unwrap();
            let expected = a.to_dense() + b.to_dense() * 0.25;
            assert_matrix_eq!(sum.to_dense(), expected, comp = abs, tol = 1e-14);
        }
    }
}

#[test]
fn add_scaled_takes_the_widest_representation() {
    let [identity, diagonal, sparse, dense]: [JacobianOperator; 4] = operators(3).try_into().unwrap();
    assert_eq!(identity.add_scaled(2.0, &identity).unwrap().kind(), "diagonal");
    assert_eq!(identity.add_scaled(2.0, &diagonal).unwrap().kind(), "diagonal");
    assert_eq!(diagonal.add_scaled(2.0, &sparse).unwrap().kind(), "sparse");
    assert_eq!(sparse.add_scaled(2.0, &identity).unwrap().kind(), "sparse");
    assert_eq!(sparse.add_scaled(2.0, &dense).unwrap().kind(), "dense");
    assert_eq!(dense.add_scaled(2.0, &diagonal).unwrap().kind(), "dense");
}

#[test]
fn add_scaled_rejects_shape_mismatch() {
    let a = JacobianOperator::Identity(3);
    let b = JacobianOperator::Sparse(laplacian_1d(4));
    assert!(matches!(a.add_scaled(1.0, &b), Err(MachError::OperatorMismatch(_))));
}

#[test]
fn apply_and_transpose_apply_agree_with_dense() {
    let n = 5;
    let x = scrambled_vector(n, 3);
    for op in operators(n) {
        let dense = op.to_dense();
        let mut y = DVector::zeros(n);
        op.apply((&mut y).into(), (&x).into()).unwrap();
        assert_matrix_eq!(y, &dense * &x, comp = abs, tol = 1e-13);

        let mut y_t = DVector::repeat(n, 1.0);
        op.transpose_apply_add(&mut y_t, 2.0, (&x).into());
        let expected = DVector::repeat(n, 1.0) + dense.transpose() * &x * 2.0;
        assert_matrix_eq!(y_t, expected, comp = abs, tol = 1e-13);

        assert_matrix_eq!(op.transpose().to_dense(), dense.transpose(), comp = abs, tol = 0.0);
    }
}

#[test]
fn to_csr_preserves_entries() {
    for op in operators(4) {
        let csr: CsrMatrix<f64> = op.to_csr();
        assert_matrix_eq!(DMatrix::from(&csr), op.to_dense(), comp = abs, tol = 0.0);
    }
}
