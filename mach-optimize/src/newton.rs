use crate::calculus::DifferentiableVectorFunction;
use crate::line_search::{create_line_search, LineSearch, LineSearchConfigError, LineSearchError, Phi};
use log::{debug, info};
use mach_traits::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use std::error::Error;
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub struct NewtonResult<T> {
    /// Whether the residual norm reached the requested tolerance.
    pub converged: bool,
    pub iterations: usize,
    pub initial_norm: T,
    pub final_norm: T,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NewtonSettings<T> {
    pub max_iter: usize,
    pub rel_tol: T,
    pub abs_tol: T,
    /// Iteration diagnostics are logged at info level when non-negative, at debug level otherwise.
    pub print_level: i32,
}

impl Default for NewtonSettings<f64> {
    fn default() -> Self {
        Self {
            max_iter: 100,
            rel_tol: 1e-14,
            abs_tol: 1e-14,
            print_level: 1,
        }
    }
}

#[derive(Debug)]
pub enum NewtonError {
    /// Evaluating the residual failed.
    EvaluationError(Box<dyn Error>),
    /// The procedure failed because solving the Jacobian system failed.
    JacobianError(Box<dyn Error>),
    /// The line search failed to produce an admissible step.
    LineSearchError(LineSearchError),
    /// The residual norm became NaN or infinite.
    NonFiniteResidual { iteration: usize },
}

impl Display for NewtonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            NewtonError::EvaluationError(err) => write!(f, "Failed to evaluate residual. Error: {}", err),
            NewtonError::JacobianError(err) => {
                write!(f, "Failed to solve Jacobian system. Error: {}", err)
            }
            NewtonError::LineSearchError(err) => {
                write!(f, "Line search failed to produce valid step. Error: {}", err)
            }
            NewtonError::NonFiniteResidual { iteration } => {
                write!(f, "Residual norm is not finite at Newton iteration {}.", iteration)
            }
        }
    }
}

impl Error for NewtonError {}

/// Newton's method with a step length chosen by a line search,
/// $x_{i+1} = x_i - s_i [DF(x_i)]^{-1} (F(x_i) - b)$.
///
/// Reaching `max_iter` is not an error: the returned [`NewtonResult`] reports
/// `converged == false` and `x` holds the last iterate.
pub struct RelaxedNewton<T: Real, L = Box<dyn LineSearch<T>>> {
    settings: NewtonSettings<T>,
    line_search: L,
}

impl<T: Real> RelaxedNewton<T> {
    /// Creates a solver whose line search is configured by the `"linesearch"` option,
    /// which may be absent.
    pub fn from_options(
        settings: NewtonSettings<T>,
        line_search: Option<&serde_json::Value>,
    ) -> Result<Self, LineSearchConfigError> {
        Ok(Self {
            settings,
            line_search: create_line_search(line_search)?,
        })
    }
}

impl<T: Real, L: LineSearch<T>> RelaxedNewton<T, L> {
    pub fn new(settings: NewtonSettings<T>, line_search: L) -> Self {
        Self { settings, line_search }
    }

    pub fn settings(&self) -> &NewtonSettings<T> {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: NewtonSettings<T>) {
        self.settings = settings;
    }

    /// Solves `F(x) = b` starting from the current content of `x`.
    ///
    /// If `b` is `None` the right-hand side is zero.
    pub fn solve<'a, F>(
        &mut self,
        mut function: F,
        b: Option<DVectorView<T>>,
        x: impl Into<DVectorViewMut<'a, T>>,
    ) -> Result<NewtonResult<T>, NewtonError>
    where
        F: DifferentiableVectorFunction<T>,
    {
        let mut x = x.into();
        let n = x.len();
        let m = function.dimension();
        if let Some(b) = &b {
            assert_eq!(b.len(), m, "right-hand side must match the function dimension");
        }

        let mut r = DVector::zeros(m);
        let mut c = DVector::zeros(n);
        let mut jc = DVector::zeros(m);

        let mut norm = residual_norm(&mut function, DVectorView::from(&x), b, &mut r)?;
        let norm0 = norm;
        let norm_goal = (self.settings.rel_tol * norm0).max(self.settings.abs_tol);

        let mut it = 0;
        let converged = loop {
            if !norm.is_finite() {
                return Err(NewtonError::NonFiniteResidual { iteration: it });
            }
            self.log_iteration(it, norm, norm0);

            if norm <= norm_goal {
                break true;
            }
            if it >= self.settings.max_iter {
                break false;
            }

            function
                .solve_jacobian_system(
                    &mut DVectorViewMut::from(&mut c),
                    &DVectorView::from(&x),
                    &DVectorView::from(&r),
                )
                .map_err(NewtonError::JacobianError)?;
            function
                .apply_jacobian(&mut DVectorViewMut::from(&mut jc), &DVectorView::from(&c))
                .map_err(NewtonError::JacobianError)?;
            let dphi0 = -r.dot(&jc);

            let step = {
                let mut phi = Phi::new(
                    &mut function,
                    DVectorView::from(&x),
                    DVectorView::from(&c),
                    b,
                    DVectorView::from(&r),
                    dphi0,
                );
                self.line_search
                    .search(&mut phi)
                    .map_err(NewtonError::LineSearchError)?
            };
            debug!("Newton step length at iter {}: {}", it, step);

            x.axpy(-step, &c, T::one());
            norm = residual_norm(&mut function, DVectorView::from(&x), b, &mut r)?;
            it += 1;
        };

        if !converged {
            info!("Newton: no convergence after {} iterations, ||r|| = {}", it, norm);
        }

        Ok(NewtonResult {
            converged,
            iterations: it,
            initial_norm: norm0,
            final_norm: norm,
        })
    }

    fn log_iteration(&self, it: usize, norm: T, norm0: T) {
        if self.settings.print_level >= 0 {
            if it == 0 {
                info!("Newton iteration {:2} : ||r|| = {}", it, norm);
            } else {
                info!("Newton iteration {:2} : ||r|| = {}, ||r||/||r_0|| = {}", it, norm, norm / norm0);
            }
        } else {
            debug!("Newton iteration {:2} : ||r|| = {}", it, norm);
        }
    }
}

fn residual_norm<T, F>(
    function: &mut F,
    x: DVectorView<T>,
    b: Option<DVectorView<T>>,
    r: &mut DVector<T>,
) -> Result<T, NewtonError>
where
    T: Real,
    F: DifferentiableVectorFunction<T>,
{
    function
        .eval_into(&mut DVectorViewMut::from(&mut *r), &x)
        .map_err(NewtonError::EvaluationError)?;
    if let Some(b) = b {
        *r -= b;
    }
    Ok(r.norm())
}
