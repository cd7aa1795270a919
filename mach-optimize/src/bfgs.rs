use crate::calculus::VectorFunction;
use crate::line_search::{InexactNewtonBacktracking, LineSearch, LineSearchError, Phi};
use log::{debug, info, warn};
use mach_traits::Real;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use numeric_literals::replace_float_literals;
use std::error::Error;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BfgsSettings<T> {
    pub max_iter: usize,
    pub rel_tol: T,
    pub abs_tol: T,
    pub print_level: i32,
}

impl Default for BfgsSettings<f64> {
    fn default() -> Self {
        Self {
            max_iter: 100,
            rel_tol: 1e-10,
            abs_tol: 1e-12,
            print_level: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BfgsResult<T> {
    pub converged: bool,
    pub iterations: usize,
    pub final_norm: T,
    /// Number of iterations in which the inverse Hessian update was skipped.
    pub skipped_updates: usize,
}

#[derive(Debug)]
pub enum BfgsError {
    EvaluationError(Box<dyn Error>),
}

impl fmt::Display for BfgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EvaluationError(err) => write!(f, "Failed to evaluate function in BFGS. Error: {}", err),
        }
    }
}

impl Error for BfgsError {}

/// Quasi-Newton solver for `F(x) = b` where `F` is typically the gradient of an objective.
///
/// The inverse Jacobian of `F` is approximated by the BFGS secant update, starting from
/// the identity. The dense approximation makes this suitable only for small problems such
/// as design variables.
///
/// A failed line search is not an error: the solver stops and reports `converged == false`,
/// leaving the last accepted iterate in `x`.
pub struct Bfgs<T: Real, L = InexactNewtonBacktracking> {
    settings: BfgsSettings<T>,
    line_search: L,
    inverse_hessian: DMatrix<T>,
}

impl<T: Real> Bfgs<T, InexactNewtonBacktracking> {
    /// Solver globalized by [`InexactNewtonBacktracking`] with the given forcing term
    /// parameters.
    pub fn with_forcing_term(settings: BfgsSettings<T>, eta_init: f64, eta_max: f64, ared_scale: f64) -> Self {
        let mut line_search = InexactNewtonBacktracking::new(eta_init, eta_max, ared_scale);
        line_search.print_level = settings.print_level;
        Self::new(settings, line_search)
    }
}

impl<T: Real, L: LineSearch<T>> Bfgs<T, L> {
    pub fn new(settings: BfgsSettings<T>, line_search: L) -> Self {
        Self {
            settings,
            line_search,
            inverse_hessian: DMatrix::zeros(0, 0),
        }
    }

    pub fn line_search(&self) -> &L {
        &self.line_search
    }

    /// The inverse Hessian approximation after the last solve.
    pub fn inverse_hessian(&self) -> &DMatrix<T> {
        &self.inverse_hessian
    }

    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn solve<'a, F>(
        &mut self,
        mut function: F,
        b: Option<DVectorView<T>>,
        x: impl Into<DVectorViewMut<'a, T>>,
    ) -> Result<BfgsResult<T>, BfgsError>
    where
        F: VectorFunction<T>,
    {
        let mut x = x.into();
        let n = x.len();
        assert_eq!(function.dimension(), n, "BFGS requires a square system");

        self.inverse_hessian = DMatrix::identity(n, n);
        let mut r = DVector::zeros(n);
        let mut r_new = DVector::zeros(n);
        let mut c = DVector::zeros(n);

        let mut norm = eval_residual(&mut function, DVectorView::from(&x), b, &mut r)?;
        let norm0 = norm;
        let norm_goal = (self.settings.rel_tol * norm0).max(self.settings.abs_tol);
        let mut skipped_updates = 0;

        let mut it = 0;
        let converged = loop {
            if self.settings.print_level >= 0 {
                info!("BFGS iteration {:2} : ||r|| = {}, ||r||/||r_0|| = {}", it, norm, norm / norm0);
            } else {
                debug!("BFGS iteration {:2} : ||r|| = {}", it, norm);
            }

            if norm <= norm_goal {
                break true;
            }
            if it >= self.settings.max_iter || !norm.is_finite() {
                break false;
            }

            c.gemv(T::one(), &self.inverse_hessian, &r, T::zero());
            if r.dot(&c) <= 0.0 {
                debug!("BFGS: approximation lost positive definiteness, resetting to identity");
                self.inverse_hessian.fill_with_identity();
                c.copy_from(&r);
            }

            // With J approximated by B^{-1}, the slope of the merit function along -c is -r^T r.
            let dphi0 = -r.norm_squared();
            let step = {
                let mut phi = Phi::new(
                    &mut function,
                    DVectorView::from(&x),
                    DVectorView::from(&c),
                    b,
                    DVectorView::from(&r),
                    dphi0,
                );
                match self.line_search.search(&mut phi) {
                    Ok(step) => step,
                    Err(LineSearchError::Evaluation(err)) => return Err(BfgsError::EvaluationError(err)),
                    Err(err) => {
                        warn!("BFGS globalization failed at iteration {}: {}", it, err);
                        break false;
                    }
                }
            };

            // s = x_new - x = -step * c
            c *= -step;
            x += &c;
            let norm_new = eval_residual(&mut function, DVectorView::from(&x), b, &mut r_new)?;
            let y = &r_new - &r;
            if !update_inverse_hessian(&mut self.inverse_hessian, &c, &y) {
                skipped_updates += 1;
            }
            std::mem::swap(&mut r, &mut r_new);
            norm = norm_new;
            it += 1;
        };

        Ok(BfgsResult {
            converged,
            iterations: it,
            final_norm: norm,
            skipped_updates,
        })
    }
}

fn eval_residual<T, F>(
    function: &mut F,
    x: DVectorView<T>,
    b: Option<DVectorView<T>>,
    r: &mut DVector<T>,
) -> Result<T, BfgsError>
where
    T: Real,
    F: VectorFunction<T>,
{
    function
        .eval_into(&mut DVectorViewMut::from(&mut *r), &x)
        .map_err(BfgsError::EvaluationError)?;
    if let Some(b) = b {
        *r -= b;
    }
    Ok(r.norm())
}

/// Applies the BFGS update
/// $B \leftarrow (I - \rho s y^T) B (I - \rho y s^T) + \rho s s^T$ with $\rho = 1 / (y^T s)$.
///
/// The update is skipped, and `false` returned, when the curvature condition
/// $y^T s > \epsilon \|y\| \|s\|$ fails, which keeps `B` positive definite.
pub fn update_inverse_hessian<T: Real>(b: &mut DMatrix<T>, s: &DVector<T>, y: &DVector<T>) -> bool {
    let ys = y.dot(s);
    if ys <= T::from_f64(f64::EPSILON).unwrap() * y.norm() * s.norm() {
        return false;
    }
    let rho = T::one() / ys;
    let n = s.len();

    // (I - rho s y^T) B (I - rho y s^T) = B - rho s (y^T B) - rho (B y) s^T + rho^2 (y^T B y) s s^T
    let by = &*b * y;
    let yb = b.tr_mul(y);
    let ybby = y.dot(&by);
    for j in 0..n {
        for i in 0..n {
            b[(i, j)] += -rho * (s[i] * yb[j] + by[i] * s[j]) + (rho * rho * ybby + rho) * s[i] * s[j];
        }
    }
    true
}
