//! Semi-discrete systems `M du/dt + R(u) = 0` and the time steppers that advance them.
use crate::error::{MachError, Result};
use crate::inputs::{check_size, MachInputs};
use crate::linear::{LinearSolver, Preconditioner};
use crate::operator::JacobianOperator;
use crate::options::{with_defaults, TimeDisOptions};
use crate::output::MachOutput;
use crate::residual::{newton_from_options, solve_residual, Residual};
use log::{debug, warn};
use std::borrow::Cow;
use mach_optimize::newton::{NewtonResult, RelaxedNewton};

/// The residual `M k + R(u + dt k)` of the stage equation for the stage derivative
/// `k = "state_dot"`, with `u = "state"` and step `"dt"`.
///
/// For `dt == 0` the stage equation is the explicit `M k = -R(u)`.
pub struct TimeDependentResidual {
    spatial: Box<dyn Residual>,
    mass: JacobianOperator,
    jacobian: Option<JacobianOperator>,
}

impl TimeDependentResidual {
    pub fn new(spatial: Box<dyn Residual>) -> Self {
        let mass = spatial.mass_matrix().into_owned();
        assert_eq!(mass.nrows(), spatial.size(), "mass operator does not match the residual");
        Self {
            spatial,
            mass,
            jacobian: None,
        }
    }

    pub fn spatial(&self) -> &dyn Residual {
        self.spatial.as_ref()
    }

    pub fn spatial_mut(&mut self) -> &mut dyn Residual {
        self.spatial.as_mut()
    }

    pub fn mass(&self) -> &JacobianOperator {
        &self.mass
    }

    /// `u + dt k`.
    fn perturbed_state(&self, inputs: &MachInputs) -> Result<(Vec<f64>, f64)> {
        let state = inputs.require_field("state")?;
        let state_dot = inputs.require_field("state_dot")?;
        check_size(self.size(), state.len())?;
        check_size(self.size(), state_dot.len())?;
        let dt = inputs.scalar("dt")?.unwrap_or(0.0);
        let work = state.iter().zip(state_dot).map(|(u, k)| u + dt * k).collect();
        Ok((work, dt))
    }
}

impl Residual for TimeDependentResidual {
    fn size(&self) -> usize {
        self.spatial.size()
    }

    fn set_options(&mut self, options: &serde_json::Value) -> Result<()> {
        self.spatial.set_options(options)
    }

    fn set_inputs(&mut self, inputs: &MachInputs) -> Result<()> {
        self.jacobian = None;
        self.spatial.set_inputs(inputs)
    }

    fn evaluate(&mut self, inputs: &MachInputs, res: &mut [f64]) -> Result<()> {
        let (work, _) = self.perturbed_state(inputs)?;
        let state_dot = inputs.require_field("state_dot")?;
        let mut spatial_inputs = inputs.clone();
        spatial_inputs.insert("state", &work);
        self.spatial.evaluate(&spatial_inputs, res)?;
        crate::residual::apply_jacobian_add(&self.mass, state_dot, res)
    }

    /// `M + dt dR/du(u + dt k)`, the derivative with respect to the stage unknown.
    ///
    /// The stage is addressed either as `"state"` or as `"state_dot"`.
    fn jacobian(&mut self, inputs: &MachInputs, wrt: &str) -> Result<&JacobianOperator> {
        if wrt != "state" && wrt != "state_dot" {
            return Err(MachError::Unsupported(format!(
                "time-dependent Jacobian with respect to \"{}\"",
                wrt
            )));
        }
        let (work, dt) = self.perturbed_state(inputs)?;
        let jacobian = if dt == 0.0 {
            self.mass.clone()
        } else {
            let mut spatial_inputs = inputs.clone();
            spatial_inputs.insert("state", &work);
            let spatial_jacobian = self.spatial.jacobian(&spatial_inputs, "state")?;
            self.mass.add_scaled(dt, spatial_jacobian)?
        };
        Ok(&*self.jacobian.insert(jacobian))
    }

    fn calc_entropy(&mut self, inputs: &MachInputs) -> Result<f64> {
        self.spatial.calc_entropy(inputs)
    }

    fn calc_entropy_change(&mut self, inputs: &MachInputs) -> Result<f64> {
        self.spatial.calc_entropy_change(inputs)
    }

    fn block_size(&self) -> usize {
        self.spatial.block_size()
    }

    fn mass_matrix(&self) -> Cow<'_, JacobianOperator> {
        Cow::Borrowed(&self.mass)
    }

    fn get_preconditioner(&mut self, inputs: &MachInputs, options: &serde_json::Value) -> Result<Preconditioner> {
        let block_size = self.block_size();
        let jacobian = self.jacobian(inputs, "state_dot")?;
        Preconditioner::from_options(jacobian, options, block_size)
    }

    fn min_cfl_time_step(&mut self, cfl: f64, state: &[f64]) -> Result<f64> {
        self.spatial.min_cfl_time_step(cfl, state)
    }

    fn create_output(&self, name: &str, options: &serde_json::Value) -> Result<Box<dyn MachOutput>> {
        self.spatial.create_output(name, options)
    }
}

/// Time integration schemes selected by `time-dis.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeStepper {
    /// `RK1`, forward Euler.
    ForwardEuler,
    /// `RK4`, the classical fourth-order Runge-Kutta method.
    Rk4,
    /// `MIDPOINT`, implicit midpoint.
    ImplicitMidpoint,
    /// `RRK` (or `RRKMIDPOINT`), implicit midpoint with entropy relaxation.
    RelaxationMidpoint,
    /// `PTC`, backward Euler steps towards a steady state.
    PseudoTransient,
    /// `steady`, one nonlinear solve of `R(u) = 0` per step.
    Steady,
}

impl TimeStepper {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "RK1" => Ok(Self::ForwardEuler),
            "RK4" => Ok(Self::Rk4),
            "MIDPOINT" => Ok(Self::ImplicitMidpoint),
            "RRK" | "RRKMIDPOINT" => Ok(Self::RelaxationMidpoint),
            "PTC" => Ok(Self::PseudoTransient),
            "steady" => Ok(Self::Steady),
            other => Err(MachError::UnknownOption {
                key: "time-dis.type".to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub fn is_implicit(&self) -> bool {
        !matches!(self, Self::ForwardEuler | Self::Rk4)
    }
}

/// Parses a `time-dis` section, rejecting the retired `"ode-solver"` key.
pub fn time_dis_options(time_dis: &serde_json::Value) -> Result<TimeDisOptions> {
    if time_dis.get("ode-solver").is_some() {
        return Err(MachError::Other(
            "The option key \"ode-solver\" is deprecated. Please use the key \"type\" instead.".to_string(),
        ));
    }
    Ok(serde_json::from_value(time_dis.clone())?)
}

/// A first-order ODE `M du/dt + R(u) = 0` advanced one step at a time.
///
/// Every stage is a solve of [`TimeDependentResidual`] for the stage derivative; explicit
/// stages with a diagonal mass are solved directly.
pub struct FirstOrderOde {
    residual: TimeDependentResidual,
    stepper: TimeStepper,
    newton: RelaxedNewton<f64>,
    linear_solver: LinearSolver,
    prec_options: serde_json::Value,
}

impl FirstOrderOde {
    /// `options` is the option document, merged over the defaults; `time-dis`,
    /// `nonlin-solver`, `lin-solver` and `lin-prec` are read from it.
    pub fn new(spatial: Box<dyn Residual>, options: &serde_json::Value) -> Result<Self> {
        let options = with_defaults(options);
        let residual = TimeDependentResidual::new(spatial);
        let mut ode = Self {
            residual,
            stepper: TimeStepper::Rk4,
            newton: newton_from_options(&options["nonlin-solver"])?,
            linear_solver: LinearSolver::from_options(&options["lin-solver"])?,
            prec_options: options["lin-prec"].clone(),
        };
        ode.set_timestepper(&options["time-dis"])?;
        Ok(ode)
    }

    /// Selects the time stepper from a `time-dis` section.
    pub fn set_timestepper(&mut self, time_dis: &serde_json::Value) -> Result<()> {
        let options = if time_dis.is_null() {
            TimeDisOptions::default()
        } else {
            time_dis_options(time_dis)?
        };
        self.stepper = if options.steady && options.ode_type != "PTC" {
            TimeStepper::Steady
        } else {
            TimeStepper::from_name(&options.ode_type)?
        };
        self.residual
            .set_options(&serde_json::json!({ "implicit": self.stepper.is_implicit() }))?;
        debug!("Time stepper: {:?}", self.stepper);
        Ok(())
    }

    pub fn stepper(&self) -> TimeStepper {
        self.stepper
    }

    pub fn residual(&self) -> &TimeDependentResidual {
        &self.residual
    }

    pub fn residual_mut(&mut self) -> &mut TimeDependentResidual {
        &mut self.residual
    }

    /// Solves the stage equation `M k + R(u + dt k) = 0` for `k`, using the content of
    /// `state_dot` as initial guess.
    pub fn solve(&mut self, dt: f64, state: &[f64], time: f64, state_dot: &mut [f64]) -> Result<()> {
        check_size(self.residual.size(), state.len())?;
        check_size(self.residual.size(), state_dot.len())?;
        if dt == 0.0 {
            if let Some(inverse_mass) = inverse_diagonal(self.residual.mass()) {
                let zero = vec![0.0; state.len()];
                let inputs = MachInputs::new()
                    .with("state", state)
                    .with("state_dot", &zero)
                    .with("dt", 0.0)
                    .with("time", time);
                self.residual.evaluate(&inputs, state_dot)?;
                for (k, m_inv) in state_dot.iter_mut().zip(inverse_mass) {
                    *k *= -m_inv;
                }
                return Ok(());
            }
        }

        let inputs = MachInputs::new()
            .with("state", state)
            .with("dt", dt)
            .with("time", time);
        let result = solve_residual(
            &mut self.residual,
            &inputs,
            "state_dot",
            state_dot,
            &mut self.newton,
            &mut self.linear_solver,
            self.prec_options.clone(),
        )?;
        if !result.converged {
            warn!(
                "Stage solve did not converge in {} iterations, ||r|| = {}",
                result.iterations, result.final_norm
            );
        }
        Ok(())
    }

    /// Solves the spatial residual `R(u) = 0` with Newton's method, starting from `state`.
    pub fn solve_steady(&mut self, state: &mut [f64], time: f64) -> Result<NewtonResult<f64>> {
        let inputs = MachInputs::new().with("time", time);
        solve_residual(
            self.residual.spatial_mut(),
            &inputs,
            "state",
            state,
            &mut self.newton,
            &mut self.linear_solver,
            self.prec_options.clone(),
        )
    }

    /// Advances `state` from `time` by `dt` and returns the time increment taken, which
    /// differs from `dt` only for relaxation schemes.
    pub fn step(&mut self, state: &mut [f64], time: f64, dt: f64) -> Result<f64> {
        let n = state.len();
        match self.stepper {
            TimeStepper::ForwardEuler => {
                let mut k = vec![0.0; n];
                self.solve(0.0, state, time, &mut k)?;
                axpy(dt, &k, state);
                Ok(dt)
            }
            TimeStepper::Rk4 => {
                let mut k = vec![vec![0.0; n]; 4];
                let mut stage = state.to_vec();
                let offsets = [0.0, 0.5, 0.5, 1.0];
                for s in 0..4 {
                    if s > 0 {
                        stage.copy_from_slice(state);
                        axpy(offsets[s] * dt, &k[s - 1], &mut stage);
                    }
                    self.solve(0.0, &stage, time + offsets[s] * dt, &mut k[s])?;
                }
                let weights = [1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0];
                for (w, k_s) in weights.iter().zip(&k) {
                    axpy(w * dt, k_s, state);
                }
                Ok(dt)
            }
            TimeStepper::ImplicitMidpoint => {
                let mut k = vec![0.0; n];
                self.solve(0.5 * dt, state, time + 0.5 * dt, &mut k)?;
                axpy(dt, &k, state);
                Ok(dt)
            }
            TimeStepper::RelaxationMidpoint => {
                let mut k = vec![0.0; n];
                self.solve(0.5 * dt, state, time + 0.5 * dt, &mut k)?;
                let gamma = self.relaxation_parameter(state, &k, dt)?;
                debug!("Relaxation parameter: {}", gamma);
                axpy(gamma * dt, &k, state);
                Ok(gamma * dt)
            }
            TimeStepper::PseudoTransient => {
                let mut k = vec![0.0; n];
                self.solve(dt, state, time + dt, &mut k)?;
                axpy(dt, &k, state);
                Ok(dt)
            }
            TimeStepper::Steady => {
                let result = self.solve_steady(state, time)?;
                if !result.converged {
                    warn!("Steady solve did not converge in {} iterations", result.iterations);
                }
                Ok(dt)
            }
        }
    }

    /// Finds `gamma` near one such that the entropy of `u + gamma dt k` changes by exactly
    /// `gamma dt` times the entropy production of the midpoint stage.
    fn relaxation_parameter(&mut self, state: &[f64], k: &[f64], dt: f64) -> Result<f64> {
        let production = self.residual.calc_entropy_change(
            &MachInputs::new()
                .with("state", state)
                .with("state_dot", k)
                .with("dt", 0.5 * dt),
        )?;
        let entropy_old = self.residual.calc_entropy(&MachInputs::new().with("state", state))?;
        let mut trial = state.to_vec();
        let mut residual = |gamma: f64, ode: &mut Self| -> Result<f64> {
            trial.copy_from_slice(state);
            axpy(gamma * dt, k, &mut trial);
            let entropy = ode.residual.calc_entropy(&MachInputs::new().with("state", &trial))?;
            Ok(entropy - entropy_old - gamma * dt * production)
        };

        // Secant iteration from gamma = 1
        let (mut g0, mut g1) = (0.99, 1.0);
        let mut f0 = residual(g0, self)?;
        let mut f1 = residual(g1, self)?;
        for _ in 0..30 {
            if f1.abs() <= 1e-14 * entropy_old.abs().max(1.0) || f1 == f0 {
                return Ok(g1);
            }
            let g2 = g1 - f1 * (g1 - g0) / (f1 - f0);
            g0 = g1;
            f0 = f1;
            g1 = g2;
            f1 = residual(g1, self)?;
        }
        warn!("Relaxation parameter did not converge; using gamma = 1");
        Ok(1.0)
    }
}

fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (y_i, x_i) in y.iter_mut().zip(x) {
        *y_i += alpha * x_i;
    }
}

fn inverse_diagonal(mass: &JacobianOperator) -> Option<Vec<f64>> {
    match mass {
        JacobianOperator::Identity(n) => Some(vec![1.0; *n]),
        JacobianOperator::Diagonal(d) => Some(d.iter().map(|m| 1.0 / m).collect()),
        _ => None,
    }
}
