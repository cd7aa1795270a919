use crate::operator::{IdentityOperator, LinearOperator};
use core::fmt;
use log::debug;
use mach_traits::Real;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, Scalar};
use num::Zero;
use std::error::Error;
use std::ops::{Deref, DerefMut};

pub trait GmresStoppingCriterion<T: Scalar> {
    /// Decides convergence from the (estimated) norm of the current residual.
    fn has_converged(&self, b_norm: T, iteration: usize, residual_norm: T) -> bool;
}

/// Residual tolerance `||r|| <= max(rel_tol * ||b||, abs_tol)`.
///
/// The residual norm is the estimate produced by the Arnoldi process, which coincides with
/// the true residual norm in exact arithmetic since the preconditioner is applied from the right.
#[derive(Debug, Clone, Copy)]
pub struct ResidualCriterion<T: Scalar> {
    rel_tol: T,
    abs_tol: T,
}

impl<T: Scalar + Zero> ResidualCriterion<T> {
    pub fn new(rel_tol: T, abs_tol: T) -> Self {
        Self { rel_tol, abs_tol }
    }

    pub fn relative(rel_tol: T) -> Self {
        Self::new(rel_tol, T::zero())
    }
}

impl Default for ResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-12, 1e-12)
    }
}

impl<T: Real> GmresStoppingCriterion<T> for ResidualCriterion<T> {
    fn has_converged(&self, b_norm: T, _iteration: usize, residual_norm: T) -> bool {
        residual_norm <= (self.rel_tol * b_norm).max(self.abs_tol)
    }
}

#[derive(Debug, Clone)]
pub struct GmresWorkspace<T: Scalar> {
    basis: Vec<DVector<T>>,
    hessenberg: DMatrix<T>,
    cs: DVector<T>,
    sn: DVector<T>,
    g: DVector<T>,
    r: DVector<T>,
    w: DVector<T>,
    z: DVector<T>,
}

impl<T: Scalar + Zero> Default for GmresWorkspace<T> {
    fn default() -> Self {
        Self {
            basis: Vec::new(),
            hessenberg: DMatrix::zeros(0, 0),
            cs: DVector::zeros(0),
            sn: DVector::zeros(0),
            g: DVector::zeros(0),
            r: DVector::zeros(0),
            w: DVector::zeros(0),
            z: DVector::zeros(0),
        }
    }
}

impl<T: Scalar + Zero> GmresWorkspace<T> {
    fn prepare(&mut self, dim: usize, restart: usize) {
        self.basis.resize_with(restart + 1, || DVector::zeros(dim));
        for v in &mut self.basis {
            v.resize_vertically_mut(dim, T::zero());
        }
        self.hessenberg = DMatrix::zeros(restart + 1, restart);
        self.cs.resize_vertically_mut(restart, T::zero());
        self.sn.resize_vertically_mut(restart, T::zero());
        self.g.resize_vertically_mut(restart + 1, T::zero());
        self.r.resize_vertically_mut(dim, T::zero());
        self.w.resize_vertically_mut(dim, T::zero());
        self.z.resize_vertically_mut(dim, T::zero());
    }
}

#[derive(Debug)]
enum OwnedOrMutRef<'a, T> {
    Owned(T),
    MutRef(&'a mut T),
}

impl<'a, T> Deref for OwnedOrMutRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

impl<'a, T> DerefMut for OwnedOrMutRef<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

/// Restarted GMRES with right preconditioning.
///
/// The preconditioner `P` is an approximation of `A^{-1}`: the method solves `A P z = b` and
/// returns `x = P z`.
#[derive(Debug)]
pub struct Gmres<'a, T, A, P, Criterion>
where
    T: Scalar,
{
    workspace: OwnedOrMutRef<'a, GmresWorkspace<T>>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    max_iter: Option<usize>,
    restart: usize,
}

impl<'a, T: Scalar + Zero> Gmres<'a, T, (), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self {
            workspace: OwnedOrMutRef::Owned(GmresWorkspace::default()),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
            restart: 100,
        }
    }
}

impl<'a, T: Scalar> Gmres<'a, T, (), IdentityOperator, ()> {
    pub fn with_workspace(workspace: &'a mut GmresWorkspace<T>) -> Self {
        Self {
            workspace: OwnedOrMutRef::MutRef(workspace),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
            restart: 100,
        }
    }
}

impl<'a, T: Scalar, P, Criterion> Gmres<'a, T, (), P, Criterion> {
    pub fn with_operator<A>(self, operator: A) -> Gmres<'a, T, A, P, Criterion> {
        Gmres {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
            restart: self.restart,
        }
    }
}

impl<'a, T: Scalar, A, P, Criterion> Gmres<'a, T, A, P, Criterion> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> Gmres<'a, T, A, P2, Criterion> {
        Gmres {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
            restart: self.restart,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }

    /// Sets the Krylov dimension after which the method restarts (`kdim`).
    pub fn with_restart(self, restart: usize) -> Self {
        assert!(restart > 0, "restart dimension must be positive");
        Self { restart, ..self }
    }
}

impl<'a, T: Scalar, A, P> Gmres<'a, T, A, P, ()> {
    pub fn with_stopping_criterion<Criterion>(self, stopping_criterion: Criterion) -> Gmres<'a, T, A, P, Criterion> {
        Gmres {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            max_iter: self.max_iter,
            restart: self.restart,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => {
                write!(f, "Error applying operator: ")?;
                err.fmt(f)
            }
            Self::PreconditionerError(err) => {
                write!(f, "Error applying preconditioner: ")?;
                err.fmt(f)
            }
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "Max iterations ({}) reached.", max_iter)
            }
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: GmresOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    fn new(output: GmresOutput<T>, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GMRES solve failed after {} iterations. ", self.output.num_iterations)?;
        write!(f, "Error: {}", self.kind)
    }
}

impl<T: fmt::Debug> std::error::Error for SolveError<T> {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct GmresOutput<T> {
    /// Number of Arnoldi steps (operator applications) performed.
    pub num_iterations: usize,
    /// Norm of the final residual estimate.
    pub residual_norm: T,
}

/// Generates a Givens rotation `(c, s)` that zeroes `b` in `[a, b]`.
fn givens<T: Real>(a: T, b: T) -> (T, T) {
    if b == T::zero() {
        (T::one(), T::zero())
    } else if b.abs() > a.abs() {
        let tau = a / b;
        let s = T::one() / (T::one() + tau * tau).sqrt();
        (s * tau, s)
    } else {
        let tau = b / a;
        let c = T::one() / (T::one() + tau * tau).sqrt();
        (c, c * tau)
    }
}

impl<'a, T, A, P, Criterion> Gmres<'a, T, A, P, Criterion>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    Criterion: GmresStoppingCriterion<T>,
{
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<GmresOutput<T>, SolveError<T>> {
        self.solve_with_guess_(b.into(), x.into())
    }

    fn solve_with_guess_(&mut self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<GmresOutput<T>, SolveError<T>> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let n = x.len();
        let m = self.restart.min(n.max(1));
        let mut output = GmresOutput {
            num_iterations: 0,
            residual_norm: T::zero(),
        };

        let b_norm = b.norm();
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(output);
        }

        self.workspace.prepare(n, m);
        let ws = &mut *self.workspace;

        loop {
            // r = b - A x
            if let Err(err) = self.operator.apply((&mut ws.r).into(), (&x).into()) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            ws.r.zip_apply(&b, |ax_i, b_i| *ax_i = b_i - *ax_i);
            let beta = ws.r.norm();
            output.residual_norm = beta;

            if self.stopping_criterion.has_converged(b_norm, output.num_iterations, beta) {
                break;
            }
            if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
                }
            }

            ws.basis[0].copy_from(&ws.r);
            ws.basis[0] /= beta;
            ws.g.fill(T::zero());
            ws.g[0] = beta;
            ws.hessenberg.fill(T::zero());

            let mut k = 0;
            let mut converged = false;
            while k < m {
                // w = A P v_k
                if let Err(err) = self
                    .preconditioner
                    .apply((&mut ws.z).into(), (&ws.basis[k]).into())
                {
                    return Err(SolveError::new(output, PreconditionerError(err)));
                }
                if let Err(err) = self.operator.apply((&mut ws.w).into(), (&ws.z).into()) {
                    return Err(SolveError::new(output, OperatorError(err)));
                }

                // Modified Gram-Schmidt
                for i in 0..=k {
                    let h_ik = ws.w.dot(&ws.basis[i]);
                    ws.hessenberg[(i, k)] = h_ik;
                    ws.w.axpy(-h_ik, &ws.basis[i], T::one());
                }
                let h_next = ws.w.norm();
                ws.hessenberg[(k + 1, k)] = h_next;

                for i in 0..k {
                    let (c, s) = (ws.cs[i], ws.sn[i]);
                    let h_i = ws.hessenberg[(i, k)];
                    let h_ip = ws.hessenberg[(i + 1, k)];
                    ws.hessenberg[(i, k)] = c * h_i + s * h_ip;
                    ws.hessenberg[(i + 1, k)] = -s * h_i + c * h_ip;
                }
                let (c, s) = givens(ws.hessenberg[(k, k)], ws.hessenberg[(k + 1, k)]);
                ws.cs[k] = c;
                ws.sn[k] = s;
                ws.hessenberg[(k, k)] = c * ws.hessenberg[(k, k)] + s * ws.hessenberg[(k + 1, k)];
                ws.hessenberg[(k + 1, k)] = T::zero();
                ws.g[k + 1] = -s * ws.g[k];
                ws.g[k] = c * ws.g[k];

                output.num_iterations += 1;
                k += 1;

                let residual_estimate = ws.g[k].abs();
                output.residual_norm = residual_estimate;
                debug!("GMRES iteration {}: residual estimate {}", output.num_iterations, residual_estimate);

                let breakdown = h_next == T::zero();
                if breakdown
                    || self
                        .stopping_criterion
                        .has_converged(b_norm, output.num_iterations, residual_estimate)
                {
                    converged = true;
                    break;
                }
                if self
                    .max_iter
                    .map(|max_iter| output.num_iterations >= max_iter)
                    .unwrap_or(false)
                {
                    break;
                }
                ws.basis[k].copy_from(&ws.w);
                ws.basis[k] /= h_next;
            }

            // Back substitution for H y = g on the leading k x k block
            let mut y = DVector::zeros(k);
            for i in (0..k).rev() {
                let mut sum = ws.g[i];
                for j in (i + 1)..k {
                    sum -= ws.hessenberg[(i, j)] * y[j];
                }
                y[i] = sum / ws.hessenberg[(i, i)];
            }

            // x <- x + P (V y)
            ws.w.fill(T::zero());
            for (i, y_i) in y.iter().enumerate() {
                ws.w.axpy(*y_i, &ws.basis[i], T::one());
            }
            if let Err(err) = self.preconditioner.apply((&mut ws.z).into(), (&ws.w).into()) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            x += &ws.z;

            if converged {
                break;
            }
        }

        Ok(output)
    }
}
