//! Preconditioners assembled from a sparse matrix.
use crate::operator::LinearOperator;
use core::fmt;
use mach_traits::Real;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum PreconditionerError {
    /// A diagonal entry (or diagonal block) could not be inverted.
    SingularDiagonal { row: usize },
    /// The matrix dimension is not a multiple of the block size.
    IncompatibleBlockSize { dim: usize, block_size: usize },
}

impl fmt::Display for PreconditionerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingularDiagonal { row } => write!(f, "singular diagonal at row {}", row),
            Self::IncompatibleBlockSize { dim, block_size } => {
                write!(f, "dimension {} is not divisible by block size {}", dim, block_size)
            }
        }
    }
}

impl Error for PreconditionerError {}

/// Point Jacobi, `P = diag(A)^{-1}`.
#[derive(Debug, Clone)]
pub struct Jacobi<T: Real> {
    inverse_diagonal: DVector<T>,
}

impl<T: Real> Jacobi<T> {
    pub fn from_csr(matrix: &CsrMatrix<T>) -> Result<Self, PreconditionerError> {
        assert_eq!(matrix.nrows(), matrix.ncols(), "Jacobi requires a square matrix");
        let mut inverse_diagonal = DVector::zeros(matrix.nrows());
        for (i, row) in matrix.row_iter().enumerate() {
            let a_ii = row.get_entry(i).map(|e| e.into_value()).unwrap_or(T::zero());
            if a_ii == T::zero() {
                return Err(PreconditionerError::SingularDiagonal { row: i });
            }
            inverse_diagonal[i] = T::one() / a_ii;
        }
        Ok(Self { inverse_diagonal })
    }

    pub fn inverse_diagonal(&self) -> &DVector<T> {
        &self.inverse_diagonal
    }
}

impl<T: Real> LinearOperator<T> for Jacobi<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        assert_eq!(x.len(), self.inverse_diagonal.len());
        y.copy_from(&x);
        y.component_mul_assign(&self.inverse_diagonal);
        Ok(())
    }
}

/// Block Jacobi with dense inverses of consecutive `block_size x block_size` diagonal blocks.
///
/// With `block_size` equal to the number of nodes times the number of state variables of an
/// element this is the element-block Jacobi preconditioner.
#[derive(Debug, Clone)]
pub struct BlockJacobi<T: Real> {
    block_size: usize,
    inverse_blocks: Vec<DMatrix<T>>,
}

impl<T: Real> BlockJacobi<T> {
    pub fn from_csr(matrix: &CsrMatrix<T>, block_size: usize) -> Result<Self, PreconditionerError> {
        assert_eq!(matrix.nrows(), matrix.ncols(), "block Jacobi requires a square matrix");
        let dim = matrix.nrows();
        if block_size == 0 || dim % block_size != 0 {
            return Err(PreconditionerError::IncompatibleBlockSize { dim, block_size });
        }

        let mut inverse_blocks = Vec::with_capacity(dim / block_size);
        for block_start in (0..dim).step_by(block_size) {
            let mut block = DMatrix::zeros(block_size, block_size);
            for local_row in 0..block_size {
                let row = matrix.row(block_start + local_row);
                for (&col, &value) in row.col_indices().iter().zip(row.values()) {
                    if col >= block_start && col < block_start + block_size {
                        block[(local_row, col - block_start)] = value;
                    }
                }
            }
            let inverse = block
                .lu()
                .try_inverse()
                .ok_or(PreconditionerError::SingularDiagonal { row: block_start })?;
            inverse_blocks.push(inverse);
        }

        Ok(Self {
            block_size,
            inverse_blocks,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Applies the transpose of the preconditioner, which approximates `A^{-T}`.
    pub fn apply_transpose(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        let b = self.block_size;
        assert_eq!(x.len(), b * self.inverse_blocks.len());
        for (k, inverse) in self.inverse_blocks.iter().enumerate() {
            let x_k = x.rows(k * b, b);
            let mut y_k = y.rows_mut(k * b, b);
            y_k.gemv_tr(T::one(), inverse, &x_k, T::zero());
        }
        Ok(())
    }
}

impl<T: Real> LinearOperator<T> for BlockJacobi<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        let b = self.block_size;
        assert_eq!(x.len(), b * self.inverse_blocks.len());
        for (k, inverse) in self.inverse_blocks.iter().enumerate() {
            let x_k = x.rows(k * b, b);
            let mut y_k = y.rows_mut(k * b, b);
            y_k.gemv(T::one(), inverse, &x_k, T::zero());
        }
        Ok(())
    }
}
