//! Linear solvers and preconditioners used inside Newton and adjoint solves.
use crate::error::{MachError, Result};
use crate::operator::JacobianOperator;
use crate::options::{LinPrecOptions, LinSolverOptions};
use log::{debug, info, warn};
use mach_sparse::gmres::SolveErrorKind;
use mach_sparse::{BlockJacobi, Gmres, GmresWorkspace, Jacobi, LinearOperator, ResidualCriterion};
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use std::error::Error;

/// Preconditioner selected by the `lin-prec` options.
#[derive(Debug, Clone)]
pub enum Preconditioner {
    None,
    Jacobi(Jacobi<f64>),
    BlockJacobi(BlockJacobi<f64>),
}

impl Preconditioner {
    /// Builds the preconditioner named by `options["type"]` from a Jacobian.
    ///
    /// `block_size` is the size of the diagonal blocks used by `"block-jacobi"`.
    pub fn from_options(jacobian: &JacobianOperator, options: &serde_json::Value, block_size: usize) -> Result<Self> {
        let opts: LinPrecOptions = serde_json::from_value(options.clone())?;
        match opts.prec_type.as_str() {
            "none" => Ok(Self::None),
            "jacobi" => {
                let jacobi = Jacobi::from_csr(&jacobian.to_csr()).map_err(|err| MachError::LinearSolve(Box::new(err)))?;
                Ok(Self::Jacobi(jacobi))
            }
            "block-jacobi" => {
                let block_jacobi = BlockJacobi::from_csr(&jacobian.to_csr(), block_size)
                    .map_err(|err| MachError::LinearSolve(Box::new(err)))?;
                Ok(Self::BlockJacobi(block_jacobi))
            }
            other => Err(MachError::UnknownOption {
                key: "lin-prec.type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl LinearOperator<f64> for Preconditioner {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> std::result::Result<(), Box<dyn Error>> {
        match self {
            Self::None => {
                y.copy_from(&x);
                Ok(())
            }
            Self::Jacobi(jacobi) => jacobi.apply(y, x),
            Self::BlockJacobi(block_jacobi) => block_jacobi.apply(y, x),
        }
    }
}

/// Applies the transpose of an operator.
struct Transposed<'a>(&'a JacobianOperator);

impl<'a> LinearOperator<f64> for Transposed<'a> {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> std::result::Result<(), Box<dyn Error>> {
        let mut result = DVector::zeros(y.len());
        self.0.transpose_apply_add(&mut result, 1.0, x);
        y.copy_from(&result);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinearSolverType {
    Gmres,
    Direct,
}

/// Solver for `A x = b` configured by the `lin-solver` (or `adj-solver`) options.
#[derive(Debug)]
pub struct LinearSolver {
    solver_type: LinearSolverType,
    options: LinSolverOptions,
    workspace: GmresWorkspace<f64>,
}

impl LinearSolver {
    pub fn from_options(options: &serde_json::Value) -> Result<Self> {
        let options: LinSolverOptions = serde_json::from_value(options.clone())?;
        let solver_type = match options.solver_type.as_str() {
            "gmres" | "hyprefgmres" => LinearSolverType::Gmres,
            "direct" => LinearSolverType::Direct,
            other => {
                return Err(MachError::UnknownOption {
                    key: "lin-solver.type".to_string(),
                    value: other.to_string(),
                })
            }
        };
        Ok(Self {
            solver_type,
            options,
            workspace: GmresWorkspace::default(),
        })
    }

    pub fn options(&self) -> &LinSolverOptions {
        &self.options
    }

    /// Solves `A x = b` using the content of `x` as initial guess. Returns the number of
    /// iterations.
    pub fn solve(&mut self, a: &JacobianOperator, preconditioner: &Preconditioner, b: &[f64], x: &mut [f64]) -> Result<usize> {
        self.solve_(a, preconditioner, b, x, false)
    }

    /// Solves `A^T x = b`.
    pub fn solve_transpose(
        &mut self,
        a: &JacobianOperator,
        preconditioner: &Preconditioner,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<usize> {
        self.solve_(a, preconditioner, b, x, true)
    }

    fn solve_(
        &mut self,
        a: &JacobianOperator,
        preconditioner: &Preconditioner,
        b: &[f64],
        x: &mut [f64],
        transpose: bool,
    ) -> Result<usize> {
        assert_eq!(a.nrows(), b.len(), "right-hand side does not match the operator");
        assert_eq!(a.ncols(), x.len(), "solution does not match the operator");
        let b = DVectorView::from_slice(b, b.len());
        let n = x.len();
        let x = DVectorViewMut::from_slice(x, n);

        match self.solver_type {
            LinearSolverType::Direct => {
                let matrix = if transpose { a.to_dense().transpose() } else { a.to_dense() };
                let solution = matrix
                    .lu()
                    .solve(&b)
                    .ok_or_else(|| MachError::LinearSolve(Box::new(MachError::Other("singular matrix".to_string()))))?;
                let mut x = x;
                x.copy_from(&solution);
                Ok(1)
            }
            LinearSolverType::Gmres => {
                let criterion = ResidualCriterion::new(self.options.reltol, self.options.abstol);
                let result = if transpose {
                    Gmres::with_workspace(&mut self.workspace)
                        .with_operator(Transposed(a))
                        .with_preconditioner(PreconditionerTranspose(preconditioner))
                        .with_stopping_criterion(criterion)
                        .with_max_iter(self.options.maxiter)
                        .with_restart(self.options.kdim.max(1))
                        .solve_with_guess(b, x)
                } else {
                    Gmres::with_workspace(&mut self.workspace)
                        .with_operator(a)
                        .with_preconditioner(preconditioner)
                        .with_stopping_criterion(criterion)
                        .with_max_iter(self.options.maxiter)
                        .with_restart(self.options.kdim.max(1))
                        .solve_with_guess(b, x)
                };
                match result {
                    Ok(output) => {
                        if self.options.printlevel > 0 {
                            info!(
                                "GMRES converged in {} iterations, ||r|| = {}",
                                output.num_iterations, output.residual_norm
                            );
                        } else {
                            debug!("GMRES converged in {} iterations", output.num_iterations);
                        }
                        Ok(output.num_iterations)
                    }
                    Err(err) => match err.kind {
                        SolveErrorKind::MaxIterationsReached { .. } => {
                            warn!(
                                "GMRES did not converge in {} iterations, ||r|| = {}",
                                err.output.num_iterations, err.output.residual_norm
                            );
                            Ok(err.output.num_iterations)
                        }
                        _ => Err(MachError::LinearSolve(Box::new(err))),
                    },
                }
            }
        }
    }
}

/// The transpose of a (block) diagonal preconditioner.
struct PreconditionerTranspose<'a>(&'a Preconditioner);

impl<'a> LinearOperator<f64> for PreconditionerTranspose<'a> {
    fn apply(&self, y: DVectorViewMut<f64>, x: DVectorView<f64>) -> std::result::Result<(), Box<dyn Error>> {
        match self.0 {
            Preconditioner::BlockJacobi(block_jacobi) => block_jacobi.apply_transpose(y, x),
            other => other.apply(y, x),
        }
    }
}
