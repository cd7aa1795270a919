//! Globalization strategies for Newton-type solvers.
//!
//! A line search sees the nonlinear problem only through a one-dimensional merit function
//! $\phi(s) = \frac{1}{2} \| F(x - s c) - b \|^2$, where $c$ is the (quasi-)Newton step.
//! This keeps the search strategy independent of the solver driving it.
use crate::calculus::VectorFunction;
use log::{debug, info};
use mach_traits::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use numeric_literals::replace_float_literals;
use serde::Deserialize;
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum LineSearchError {
    /// The step is not a descent direction for the merit function.
    NotDescentDirection { dphi0: f64 },
    /// No admissible step was found within the configured number of backtracks.
    MaxIterations { max_iter: usize },
    /// Evaluating the residual at a trial point failed.
    Evaluation(Box<dyn Error>),
}

impl fmt::Display for LineSearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDescentDirection { dphi0 } => {
                write!(f, "search direction is not a descent direction (dphi(0) = {:e})", dphi0)
            }
            Self::MaxIterations { max_iter } => {
                write!(f, "line search exceeded maximum number of iterations ({})", max_iter)
            }
            Self::Evaluation(err) => write!(f, "residual evaluation failed during line search: {}", err),
        }
    }
}

impl Error for LineSearchError {}

/// One-dimensional merit function seen by a line search.
pub trait MeritFunction<T> {
    /// Value at `s = 0`.
    fn phi0(&self) -> T;
    /// Derivative at `s = 0`.
    fn dphi0(&self) -> T;
    fn eval(&mut self, s: T) -> Result<T, Box<dyn Error>>;
}

/// The merit function $\phi(s) = \frac{1}{2} \| F(x - s c) - b \|^2$.
///
/// `phi0` is computed from the residual at `x` supplied by the caller, which already has it.
/// The slope `dphi0 = -r^T J c` depends on how the solver represents the Jacobian and is
/// therefore passed in as well.
pub struct Phi<'a, T: Real, F> {
    function: &'a mut F,
    x: DVectorView<'a, T>,
    step: DVectorView<'a, T>,
    b: Option<DVectorView<'a, T>>,
    x_trial: DVector<T>,
    r_trial: DVector<T>,
    phi0: T,
    dphi0: T,
}

impl<'a, T, F> Phi<'a, T, F>
where
    T: Real,
    F: VectorFunction<T>,
{
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn new(
        function: &'a mut F,
        x: DVectorView<'a, T>,
        step: DVectorView<'a, T>,
        b: Option<DVectorView<'a, T>>,
        residual: DVectorView<T>,
        dphi0: T,
    ) -> Self {
        assert_eq!(x.len(), step.len());
        let phi0 = 0.5 * residual.norm_squared();
        Self {
            x_trial: DVector::zeros(x.len()),
            r_trial: DVector::zeros(residual.len()),
            function,
            x,
            step,
            b,
            phi0,
            dphi0,
        }
    }

    /// Residual at the most recently evaluated trial point.
    pub fn trial_residual(&self) -> &DVector<T> {
        &self.r_trial
    }
}

impl<'a, T, F> MeritFunction<T> for Phi<'a, T, F>
where
    T: Real,
    F: VectorFunction<T>,
{
    fn phi0(&self) -> T {
        self.phi0
    }

    fn dphi0(&self) -> T {
        self.dphi0
    }

    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn eval(&mut self, s: T) -> Result<T, Box<dyn Error>> {
        self.x_trial.copy_from(&self.x);
        self.x_trial.axpy(-s, &self.step, T::one());
        self.function.eval_into(
            &mut DVectorViewMut::from(&mut self.r_trial),
            &DVectorView::from(&self.x_trial),
        )?;
        if let Some(b) = &self.b {
            self.r_trial -= b;
        }
        Ok(0.5 * self.r_trial.norm_squared())
    }
}

pub trait LineSearch<T: Real> {
    /// Returns an admissible step size `s` for the merit function.
    fn search(&mut self, phi: &mut dyn MeritFunction<T>) -> Result<T, LineSearchError>;
}

impl<T: Real, L: ?Sized + LineSearch<T>> LineSearch<T> for Box<L> {
    fn search(&mut self, phi: &mut dyn MeritFunction<T>) -> Result<T, LineSearchError> {
        L::search(self, phi)
    }
}

/// Always takes the full step.
#[derive(Clone, Debug, Default)]
pub struct NoLineSearch;

impl<T: Real> LineSearch<T> for NoLineSearch {
    fn search(&mut self, _phi: &mut dyn MeritFunction<T>) -> Result<T, LineSearchError> {
        Ok(T::one())
    }
}

/// Backtracking line search with the Armijo condition and polynomial interpolation.
///
/// Starting from `s = 1`, the step is accepted once
/// $\phi(s) \leq \phi(0) + \mu s \phi'(0)$. Otherwise a new step is found by minimizing a
/// quadratic (or, once two trial points are known and `interp_order == 3`, a cubic) model of
/// $\phi$, safeguarded to lie in `[rho_lo * s, rho_hi * s]`.
///
/// See Nocedal & Wright (2006), Numerical Optimization, Chapter 3.5.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktrackingLineSearch {
    pub mu: f64,
    pub rho_hi: f64,
    pub rho_lo: f64,
    pub interp_order: usize,
    pub max_iter: usize,
}

impl Default for BacktrackingLineSearch {
    fn default() -> Self {
        Self {
            mu: 1e-4,
            rho_hi: 0.9,
            rho_lo: 0.1,
            interp_order: 3,
            max_iter: 10,
        }
    }
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
fn quadratic_minimizer<T: Real>(phi0: T, dphi0: T, s: T, phi_s: T) -> T {
    let curvature = phi_s - phi0 - dphi0 * s;
    -dphi0 * s * s / (2.0 * curvature)
}

#[replace_float_literals(T::from_f64(literal).unwrap())]
fn cubic_minimizer<T: Real>(phi0: T, dphi0: T, s: T, phi_s: T, s_prev: T, phi_prev: T) -> Option<T> {
    let d1 = phi_s - phi0 - dphi0 * s;
    let d2 = phi_prev - phi0 - dphi0 * s_prev;
    let denom = s * s * s_prev * s_prev * (s - s_prev);
    if denom == 0.0 {
        return None;
    }
    let a = (s_prev * s_prev * d1 - s * s * d2) / denom;
    let b = (-s_prev * s_prev * s_prev * d1 + s * s * s * d2) / denom;
    if a == 0.0 {
        return (b != 0.0).then(|| -dphi0 / (2.0 * b));
    }
    let disc = b * b - 3.0 * a * dphi0;
    if disc < 0.0 {
        return None;
    }
    Some((-b + disc.sqrt()) / (3.0 * a))
}

impl<T: Real> LineSearch<T> for BacktrackingLineSearch {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn search(&mut self, phi: &mut dyn MeritFunction<T>) -> Result<T, LineSearchError> {
        let mu = T::from_f64(self.mu).unwrap();
        let rho_hi = T::from_f64(self.rho_hi).unwrap();
        let rho_lo = T::from_f64(self.rho_lo).unwrap();

        let phi0 = phi.phi0();
        let dphi0 = phi.dphi0();
        if dphi0 >= 0.0 {
            return Err(LineSearchError::NotDescentDirection {
                dphi0: dphi0.to_subset().unwrap_or(f64::NAN),
            });
        }

        let mut s = T::one();
        let mut previous: Option<(T, T)> = None;
        for iter in 0..self.max_iter {
            let phi_s = phi.eval(s).map_err(LineSearchError::Evaluation)?;
            debug!("backtracking iter {}: s = {}, phi(s) = {}", iter, s, phi_s);
            if phi_s <= phi0 + mu * s * dphi0 {
                return Ok(s);
            }

            let cubic = match previous {
                Some((s_prev, phi_prev)) if self.interp_order >= 3 => {
                    cubic_minimizer(phi0, dphi0, s, phi_s, s_prev, phi_prev)
                }
                _ => None,
            };
            let candidate = cubic.unwrap_or_else(|| quadratic_minimizer(phi0, dphi0, s, phi_s));
            let s_new = if candidate.is_finite() {
                candidate.max(rho_lo * s).min(rho_hi * s)
            } else {
                rho_lo * s
            };
            previous = Some((s, phi_s));
            s = s_new;
        }

        Err(LineSearchError::MaxIterations { max_iter: self.max_iter })
    }
}

/// Backtracking for inexact Newton methods with a forcing term `eta`.
///
/// A step is accepted once $\|F(x - s c)\| \leq (1 - t (1 - \eta)) \|F(x)\|$. On rejection the
/// step is scaled by $\theta \in [\theta_{min}, \theta_{max}]$ obtained from quadratic
/// interpolation of $\phi$ on the current interval, and the forcing term is relaxed to
/// $\eta \leftarrow \min(1 - \theta (1 - \eta), \eta_{max})$. The forcing term persists across
/// searches.
///
/// See Pawlowski, Shadid, Simonis & Walker (2006), Globalization techniques for Newton-Krylov
/// methods and applications to the fully coupled solution of the Navier-Stokes equations.
#[derive(Clone, Debug, PartialEq)]
pub struct InexactNewtonBacktracking {
    pub eta: f64,
    pub eta_max: f64,
    /// Sufficient-decrease scale `t` applied to the actual reduction.
    pub ared_scale: f64,
    pub theta_min: f64,
    pub theta_max: f64,
    pub max_iter: usize,
    pub print_level: i32,
}

impl InexactNewtonBacktracking {
    pub fn new(eta: f64, eta_max: f64, ared_scale: f64) -> Self {
        Self {
            eta,
            eta_max,
            ared_scale,
            ..Self::default()
        }
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    fn relax_forcing_term(&mut self, theta: f64) {
        self.eta = (1.0 - theta * (1.0 - self.eta)).min(self.eta_max);
    }
}

impl Default for InexactNewtonBacktracking {
    fn default() -> Self {
        Self {
            eta: 1e-4,
            eta_max: 0.9,
            ared_scale: 1e-4,
            theta_min: 0.1,
            theta_max: 0.5,
            max_iter: 10,
            print_level: -1,
        }
    }
}

impl<T: Real> LineSearch<T> for InexactNewtonBacktracking {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn search(&mut self, phi: &mut dyn MeritFunction<T>) -> Result<T, LineSearchError> {
        let t = T::from_f64(self.ared_scale).unwrap();
        let theta_min = T::from_f64(self.theta_min).unwrap();
        let theta_max = T::from_f64(self.theta_max).unwrap();

        let phi0 = phi.phi0();
        let norm = (2.0 * phi0).sqrt();

        let mut s = T::one();
        let mut phi_s = phi.eval(s).map_err(LineSearchError::Evaluation)?;
        let mut iter = 0;
        loop {
            let eta = T::from_f64(self.eta).unwrap();
            if (2.0 * phi_s).sqrt() <= (1.0 - t * (1.0 - eta)) * norm {
                break;
            }
            if iter >= self.max_iter {
                return Err(LineSearchError::MaxIterations { max_iter: self.max_iter });
            }

            let theta = quadratic_minimizer(phi0, s * phi.dphi0(), 1.0, phi_s);
            let theta = if theta.is_finite() {
                theta.max(theta_min).min(theta_max)
            } else {
                theta_max
            };
            s *= theta;
            self.relax_forcing_term(theta.to_subset().unwrap_or(self.theta_max));

            phi_s = phi.eval(s).map_err(LineSearchError::Evaluation)?;
            iter += 1;
        }

        if self.print_level >= 0 {
            info!(" Globalization factors: theta = {}, eta = {}", s, self.eta);
        } else {
            debug!(" Globalization factors: theta = {}, eta = {}", s, self.eta);
        }
        Ok(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct BacktrackingOptions {
    mu: f64,
    #[serde(rename = "rhohi")]
    rho_hi: f64,
    #[serde(rename = "rholo")]
    rho_lo: f64,
    #[serde(rename = "interp-order")]
    interp_order: usize,
    #[serde(rename = "maxiter")]
    max_iter: usize,
}

impl Default for BacktrackingOptions {
    fn default() -> Self {
        let defaults = BacktrackingLineSearch::default();
        Self {
            mu: defaults.mu,
            rho_hi: defaults.rho_hi,
            rho_lo: defaults.rho_lo,
            interp_order: defaults.interp_order,
            max_iter: defaults.max_iter,
        }
    }
}

#[derive(Debug)]
pub enum LineSearchConfigError {
    UnknownType(String),
    Malformed(serde_json::Error),
}

impl fmt::Display for LineSearchConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType(name) => write!(f, "Unknown linesearch type \"{}\"!", name),
            Self::Malformed(err) => write!(f, "malformed linesearch options: {}", err),
        }
    }
}

impl Error for LineSearchConfigError {}

/// Builds a line search from the `"linesearch"` entry of the nonlinear solver options.
///
/// The entry is either a type name or an object with a `"type"` key and per-type
/// parameters. A missing entry selects the default backtracking search.
pub fn create_line_search<T: Real>(
    options: Option<&serde_json::Value>,
) -> Result<Box<dyn LineSearch<T>>, LineSearchConfigError> {
    let (ls_type, params) = match options {
        None => return Ok(Box::new(BacktrackingLineSearch::default())),
        Some(serde_json::Value::String(name)) => (name.as_str(), None),
        Some(value) => {
            let name = value
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| LineSearchConfigError::UnknownType(value.to_string()))?;
            (name, Some(value))
        }
    };

    match ls_type {
        "backtracking" => {
            let opts: BacktrackingOptions = match params {
                Some(value) => serde_json::from_value(strip_type(value)).map_err(LineSearchConfigError::Malformed)?,
                None => BacktrackingOptions::default(),
            };
            Ok(Box::new(BacktrackingLineSearch {
                mu: opts.mu,
                rho_hi: opts.rho_hi,
                rho_lo: opts.rho_lo,
                interp_order: opts.interp_order,
                max_iter: opts.max_iter,
            }))
        }
        "none" => Ok(Box::new(NoLineSearch)),
        other => Err(LineSearchConfigError::UnknownType(other.to_string())),
    }
}

fn strip_type(value: &serde_json::Value) -> serde_json::Value {
    let mut value = value.clone();
    if let Some(map) = value.as_object_mut() {
        map.remove("type");
    }
    value
}
