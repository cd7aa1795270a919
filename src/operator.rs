//! Jacobian representations handed out by residuals.
use crate::error::{MachError, Result};
use mach_sparse::LinearOperator;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::error::Error;

/// A Jacobian in one of the representations the residuals produce.
///
/// Operators of different kinds can be combined with [`JacobianOperator::add_scaled`];
/// the result takes the widest representation of the two operands, in the order
/// `Identity < Diagonal < Sparse < Dense`.
#[derive(Debug, Clone, PartialEq)]
pub enum JacobianOperator {
    Identity(usize),
    Diagonal(DVector<f64>),
    Sparse(CsrMatrix<f64>),
    Dense(DMatrix<f64>),
}

impl JacobianOperator {
    pub fn nrows(&self) -> usize {
        match self {
            Self::Identity(n) => *n,
            Self::Diagonal(d) => d.len(),
            Self::Sparse(m) => m.nrows(),
            Self::Dense(m) => m.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Identity(n) => *n,
            Self::Diagonal(d) => d.len(),
            Self::Sparse(m) => m.ncols(),
            Self::Dense(m) => m.ncols(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity",
            Self::Diagonal(_) => "diagonal",
            Self::Sparse(_) => "sparse",
            Self::Dense(_) => "dense",
        }
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        match self {
            Self::Identity(n) => DMatrix::identity(*n, *n),
            Self::Diagonal(d) => DMatrix::from_diagonal(d),
            Self::Sparse(m) => DMatrix::from(m),
            Self::Dense(m) => m.clone(),
        }
    }

    /// Converts to a sparse matrix. Dense operators keep every entry, including zeros.
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        match self {
            Self::Identity(n) => CsrMatrix::identity(*n),
            Self::Diagonal(d) => diagonal_csr(d),
            Self::Sparse(m) => m.clone(),
            Self::Dense(m) => {
                let mut coo = CooMatrix::new(m.nrows(), m.ncols());
                for j in 0..m.ncols() {
                    for i in 0..m.nrows() {
                        coo.push(i, j, m[(i, j)]);
                    }
                }
                CsrMatrix::from(&coo)
            }
        }
    }

    pub fn transpose(&self) -> Self {
        match self {
            Self::Identity(n) => Self::Identity(*n),
            Self::Diagonal(d) => Self::Diagonal(d.clone()),
            Self::Sparse(m) => Self::Sparse(m.transpose()),
            Self::Dense(m) => Self::Dense(m.transpose()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Identity(_) => 0,
            Self::Diagonal(_) => 1,
            Self::Sparse(_) => 2,
            Self::Dense(_) => 3,
        }
    }

    /// Computes `self + alpha * other`.
    ///
    /// Fails with [`MachError::OperatorMismatch`] if the operators do not have the same shape.
    pub fn add_scaled(&self, alpha: f64, other: &Self) -> Result<Self> {
        if self.nrows() != other.nrows() || self.ncols() != other.ncols() {
            return Err(MachError::OperatorMismatch(format!(
                "cannot add {} operator of shape {}x{} to {} operator of shape {}x{}",
                other.kind(),
                other.nrows(),
                other.ncols(),
                self.kind(),
                self.nrows(),
                self.ncols()
            )));
        }

        let n = self.nrows();
        let result = match self.rank().max(other.rank()) {
            0 | 1 => {
                let mut d = diagonal_of(self, n);
                d.axpy(alpha, &diagonal_of(other, n), 1.0);
                Self::Diagonal(d)
            }
            2 => Self::Sparse(&self.to_csr() + &(other.to_csr() * alpha)),
            _ => {
                let mut m = self.to_dense();
                m += other.to_dense() * alpha;
                Self::Dense(m)
            }
        };
        Ok(result)
    }

    /// Accumulates `y += alpha * A^T x`.
    pub fn transpose_apply_add(&self, y: &mut DVector<f64>, alpha: f64, x: DVectorView<f64>) {
        assert_eq!(x.len(), self.nrows());
        assert_eq!(y.len(), self.ncols());
        match self {
            Self::Identity(_) => y.axpy(alpha, &x, 1.0),
            Self::Diagonal(d) => y.zip_zip_apply(&x, d, |y_i, x_i, d_i| *y_i += alpha * d_i * x_i),
            Self::Sparse(m) => {
                nalgebra_sparse::ops::serial::spmm_csr_dense(
                    1.0,
                    y,
                    alpha,
                    nalgebra_sparse::ops::Op::Transpose(m),
                    nalgebra_sparse::ops::Op::NoOp(&x),
                );
            }
            Self::Dense(m) => y.gemv_tr(alpha, m, &x, 1.0),
        }
    }
}

fn diagonal_of(op: &JacobianOperator, n: usize) -> DVector<f64> {
    match op {
        JacobianOperator::Identity(_) => DVector::repeat(n, 1.0),
        JacobianOperator::Diagonal(d) => d.clone(),
        JacobianOperator::Sparse(m) => DVector::from_fn(n, |i, _| {
            m.get_entry(i, i).map(|e| e.into_value()).unwrap_or(0.0)
        }),
        JacobianOperator::Dense(m) => m.diagonal(),
    }
}

fn diagonal_csr(d: &DVector<f64>) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(d.len(), d.len());
    for (i, &d_i) in d.iter().enumerate() {
        coo.push(i, i, d_i);
    }
    CsrMatrix::from(&coo)
}

impl LinearOperator<f64> for JacobianOperator {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> std::result::Result<(), Box<dyn Error>> {
        assert_eq!(x.len(), self.ncols());
        assert_eq!(y.len(), self.nrows());
        match self {
            Self::Identity(_) => y.copy_from(&x),
            Self::Diagonal(d) => {
                for ((y_i, x_i), d_i) in y.iter_mut().zip(x.iter()).zip(d.iter()) {
                    *y_i = x_i * d_i;
                }
            }
            Self::Sparse(m) => m.apply(y, x)?,
            Self::Dense(m) => y.gemv(1.0, m, &x, 0.0),
        }
        Ok(())
    }
}
